//! Dotted-path patch operators applied to JSON document trees.

use serde_json::{Map, Value};

use super::StoreError;

/// A single field operator.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    /// Overwrite the field, creating missing parent objects.
    Set(Value),
    /// Add to a numeric field, treating a missing field as 0.
    Inc(i64),
    /// Write only if the new value is strictly greater than the current one.
    Max(i64),
    /// Write only if the new value is strictly lesser than the current one.
    Min(i64),
    /// Append to an array field, creating it when missing.
    Push(Value),
    /// Insert at the front of an array field, creating it when missing.
    Unshift(Value),
    /// Remove every array element matching the predicate. An object
    /// predicate matches elements that carry all of its key/value pairs;
    /// any other predicate matches by equality.
    Pull(Value),
}

/// An ordered list of `(path, op)` pairs applied atomically to one document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Patch {
    ops: Vec<(String, Op)>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.ops.push((path.into(), Op::Set(value)));
        self
    }

    pub fn inc(mut self, path: impl Into<String>, delta: i64) -> Self {
        self.ops.push((path.into(), Op::Inc(delta)));
        self
    }

    pub fn max(mut self, path: impl Into<String>, value: i64) -> Self {
        self.ops.push((path.into(), Op::Max(value)));
        self
    }

    pub fn min(mut self, path: impl Into<String>, value: i64) -> Self {
        self.ops.push((path.into(), Op::Min(value)));
        self
    }

    pub fn push(mut self, path: impl Into<String>, value: Value) -> Self {
        self.ops.push((path.into(), Op::Push(value)));
        self
    }

    pub fn unshift(mut self, path: impl Into<String>, value: Value) -> Self {
        self.ops.push((path.into(), Op::Unshift(value)));
        self
    }

    pub fn pull(mut self, path: impl Into<String>, predicate: Value) -> Self {
        self.ops.push((path.into(), Op::Pull(predicate)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The touched field paths, deduplicated, in first-touch order.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::with_capacity(self.ops.len());
        for (path, _) in &self.ops {
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }
        paths
    }

    /// Apply every operator in order. Fails on the first bad path without
    /// any rollback; callers treat a failed apply as fatal for the update.
    pub fn apply(&self, doc: &mut Value) -> Result<(), StoreError> {
        for (path, op) in &self.ops {
            apply_op(doc, path, op)?;
        }
        Ok(())
    }
}

fn invalid(path: &str) -> StoreError {
    StoreError::InvalidPath {
        path: path.to_string(),
    }
}

/// Walk `segments` below `root`, optionally creating missing object levels.
fn locate<'a>(
    root: &'a mut Value,
    segments: &[&str],
    create: bool,
    path: &str,
) -> Result<&'a mut Value, StoreError> {
    let mut node = root;
    for seg in segments {
        node = match node {
            Value::Object(map) => {
                if create {
                    map.entry(seg.to_string())
                        .or_insert_with(|| Value::Object(Map::new()))
                } else {
                    map.get_mut(*seg).ok_or_else(|| invalid(path))?
                }
            }
            Value::Array(items) => {
                let idx: usize = seg.parse().map_err(|_| invalid(path))?;
                items.get_mut(idx).ok_or_else(|| invalid(path))?
            }
            _ => return Err(invalid(path)),
        };
    }
    Ok(node)
}

fn apply_op(doc: &mut Value, path: &str, op: &Op) -> Result<(), StoreError> {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(invalid(path));
    };
    let create = matches!(
        op,
        Op::Set(_) | Op::Inc(_) | Op::Max(_) | Op::Min(_) | Op::Push(_) | Op::Unshift(_)
    );
    let parent = locate(doc, parents, create, path)?;

    match op {
        Op::Set(value) => write_field(parent, last, value.clone(), path),
        Op::Inc(delta) => {
            let current = read_number(parent, last).unwrap_or(0);
            write_field(parent, last, Value::from(current + delta), path)
        }
        Op::Max(value) => match read_number(parent, last) {
            Some(current) if current >= *value => Ok(()),
            _ => write_field(parent, last, Value::from(*value), path),
        },
        Op::Min(value) => match read_number(parent, last) {
            Some(current) if current <= *value => Ok(()),
            _ => write_field(parent, last, Value::from(*value), path),
        },
        Op::Push(value) => {
            let items = array_field(parent, last, path)?;
            items.push(value.clone());
            Ok(())
        }
        Op::Unshift(value) => {
            let items = array_field(parent, last, path)?;
            items.insert(0, value.clone());
            Ok(())
        }
        Op::Pull(predicate) => {
            // Pulling from a missing field is a no-op.
            let Some(field) = read_field(parent, last) else {
                return Ok(());
            };
            let Value::Array(items) = field else {
                return Err(invalid(path));
            };
            items.retain(|item| !pull_matches(item, predicate));
            Ok(())
        }
    }
}

fn read_field<'a>(parent: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    match parent {
        Value::Object(map) => map.get_mut(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|idx| items.get_mut(idx)),
        _ => None,
    }
}

fn read_number(parent: &mut Value, key: &str) -> Option<i64> {
    read_field(parent, key).and_then(|v| v.as_i64())
}

fn write_field(parent: &mut Value, key: &str, value: Value, path: &str) -> Result<(), StoreError> {
    match parent {
        Value::Object(map) => {
            map.insert(key.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let idx: usize = key.parse().map_err(|_| invalid(path))?;
            match items.get_mut(idx) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(invalid(path)),
            }
        }
        _ => Err(invalid(path)),
    }
}

/// The array at `key`, created empty when the parent is an object without it.
fn array_field<'a>(
    parent: &'a mut Value,
    key: &str,
    path: &str,
) -> Result<&'a mut Vec<Value>, StoreError> {
    if let Value::Object(map) = parent {
        let slot = map
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        return match slot {
            Value::Array(items) => Ok(items),
            _ => Err(invalid(path)),
        };
    }
    match read_field(parent, key) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(invalid(path)),
    }
}

fn pull_matches(item: &Value, predicate: &Value) -> bool {
    match predicate {
        Value::Object(fields) => fields
            .iter()
            .all(|(key, expected)| item.get(key) == Some(expected)),
        other => item == other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_creates_parents() {
        let mut doc = json!({});
        Patch::new()
            .set("gameInfo.roundNr", json!(3))
            .apply(&mut doc)
            .unwrap();
        assert_eq!(doc, json!({"gameInfo": {"roundNr": 3}}));
    }

    #[test]
    fn test_set_array_index() {
        let mut doc = json!({"cards": [[{"flipped": false}, {"flipped": false}]]});
        Patch::new()
            .set("cards.0.1.flipped", json!(true))
            .apply(&mut doc)
            .unwrap();
        assert_eq!(doc["cards"][0][1]["flipped"], json!(true));
        assert_eq!(doc["cards"][0][0]["flipped"], json!(false));
    }

    #[test]
    fn test_set_out_of_bounds_index_fails() {
        let mut doc = json!({"cards": []});
        let err = Patch::new()
            .set("cards.2", json!({}))
            .apply(&mut doc)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath { .. }));
    }

    #[test]
    fn test_inc_missing_starts_at_zero() {
        let mut doc = json!({});
        Patch::new().inc("drinks", 4).apply(&mut doc).unwrap();
        Patch::new().inc("drinks", -1).apply(&mut doc).unwrap();
        assert_eq!(doc["drinks"], json!(3));
    }

    #[test]
    fn test_max_is_monotonic() {
        let mut doc = json!({"statistics": {"maxDrinksPerRound": 5}});
        Patch::new()
            .max("statistics.maxDrinksPerRound", 3)
            .apply(&mut doc)
            .unwrap();
        assert_eq!(doc["statistics"]["maxDrinksPerRound"], json!(5));
        Patch::new()
            .max("statistics.maxDrinksPerRound", 8)
            .apply(&mut doc)
            .unwrap();
        assert_eq!(doc["statistics"]["maxDrinksPerRound"], json!(8));
    }

    #[test]
    fn test_min_is_monotonic() {
        let mut doc = json!({"best": 10});
        Patch::new().min("best", 12).apply(&mut doc).unwrap();
        assert_eq!(doc["best"], json!(10));
        Patch::new().min("best", 7).apply(&mut doc).unwrap();
        assert_eq!(doc["best"], json!(7));
    }

    #[test]
    fn test_push_and_unshift() {
        let mut doc = json!({});
        Patch::new()
            .push("messages", json!("first"))
            .push("messages", json!("second"))
            .unshift("messages", json!("zeroth"))
            .apply(&mut doc)
            .unwrap();
        assert_eq!(doc["messages"], json!(["zeroth", "first", "second"]));
    }

    #[test]
    fn test_pull_by_partial_object() {
        let mut doc = json!({"players": [
            {"id": "a", "name": "Anna"},
            {"id": "b", "name": "Ben"},
        ]});
        Patch::new()
            .pull("players", json!({"id": "a"}))
            .apply(&mut doc)
            .unwrap();
        assert_eq!(doc["players"], json!([{"id": "b", "name": "Ben"}]));
    }

    #[test]
    fn test_pull_by_equality_and_missing_field() {
        let mut doc = json!({"isJoining": ["u1", "u2"]});
        Patch::new()
            .pull("isJoining", json!("u1"))
            .pull("ghosts", json!("u1"))
            .apply(&mut doc)
            .unwrap();
        assert_eq!(doc["isJoining"], json!(["u2"]));
        assert!(doc.get("ghosts").is_none());
    }

    #[test]
    fn test_paths_dedupe_in_order() {
        let patch = Patch::new()
            .inc("gameInfo.drinksPerRound", 1)
            .set("status", json!("PHASE2"))
            .inc("gameInfo.drinksPerRound", 2);
        assert_eq!(patch.paths(), vec!["gameInfo.drinksPerRound", "status"]);
    }
}
