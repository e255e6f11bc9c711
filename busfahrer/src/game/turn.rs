//! Turn-order progression.

use rand::seq::IndexedRandom;

use super::entities::Turning;

/// Compute the player who acts after `current`.
///
/// `Default` walks the order forward, `Reverse` backward. `Random` picks
/// uniformly among players that have not had their turn this round, never
/// the current player; it returns `None` when everyone has acted, which
/// callers treat as the end of the round.
pub fn next_player(
    mode: Turning,
    order: &[String],
    current: &str,
    had_turn: impl Fn(&str) -> bool,
) -> Option<String> {
    let n = order.len();
    if n == 0 {
        return None;
    }
    let idx = order.iter().position(|id| id == current)?;
    match mode {
        Turning::Default => Some(order[(idx + 1) % n].clone()),
        Turning::Reverse => Some(order[(idx + n - 1) % n].clone()),
        Turning::Random => {
            let candidates: Vec<&String> = order
                .iter()
                .filter(|id| id.as_str() != current && !had_turn(id))
                .collect();
            candidates.choose(&mut rand::rng()).map(|id| (*id).clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn order() -> Vec<String> {
        vec!["a".into(), "b".into(), "c".into(), "d".into()]
    }

    #[test]
    fn test_default_advances_and_wraps() {
        let order = order();
        assert_eq!(
            next_player(Turning::Default, &order, "a", |_| false),
            Some("b".to_string())
        );
        assert_eq!(
            next_player(Turning::Default, &order, "d", |_| false),
            Some("a".to_string())
        );
    }

    #[test]
    fn test_reverse_advances_and_wraps() {
        let order = order();
        assert_eq!(
            next_player(Turning::Reverse, &order, "c", |_| false),
            Some("b".to_string())
        );
        assert_eq!(
            next_player(Turning::Reverse, &order, "a", |_| false),
            Some("d".to_string())
        );
    }

    #[test]
    fn test_random_visits_everyone_once() {
        let order = order();
        let mut had: HashSet<String> = HashSet::new();
        let mut current = "a".to_string();
        had.insert(current.clone());
        while let Some(next) = next_player(Turning::Random, &order, &current, |id| {
            had.contains(id)
        }) {
            assert!(!had.contains(&next), "{next} got a second turn");
            had.insert(next.clone());
            current = next;
        }
        assert_eq!(had.len(), order.len());
    }

    #[test]
    fn test_random_round_ends_when_all_acted() {
        let order = order();
        assert_eq!(
            next_player(Turning::Random, &order, "a", |_| true),
            None
        );
    }

    #[test]
    fn test_unknown_current_player() {
        let order = order();
        assert_eq!(next_player(Turning::Default, &order, "x", |_| false), None);
    }
}
