//! Lobby and friend code generation.

use rand::seq::IndexedRandom;

use crate::game::constants::{CODE_ALPHABET, CODE_LENGTH};

/// Sample a 5-character uppercase alphanumeric code. Uniqueness within a
/// namespace is the caller's job (rejection sampling against the store).
pub fn random_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| *CODE_ALPHABET.choose(&mut rng).unwrap_or(&b'A') as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_shape() {
        for _ in 0..100 {
            let code = random_code();
            assert_eq!(code.len(), 5);
            assert!(
                code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()),
                "unexpected character in {code}"
            );
        }
    }
}
