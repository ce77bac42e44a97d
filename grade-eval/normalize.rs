/// Canonical form used before comparing free-text answers.
///
/// Lowercases, drops everything except letters, digits, `_` and whitespace,
/// then collapses whitespace runs to single spaces and trims.
pub fn normalize(text: &str) -> String {
    let kept: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_examples() {
        assert_eq!(normalize("  Photo-Synthesis! "), "photosynthesis");
        assert_eq!(normalize("The  Nile\triver."), "the nile river");
        assert_eq!(normalize("snake_case 42"), "snake_case 42");
        assert_eq!(normalize("?!."), "");
        assert_eq!(normalize("a - b"), "a b");
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(s in ".*") {
            let once = normalize(&s);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn normalize_ignores_case_and_punctuation(s in "[a-z ]{0,20}") {
            let noisy = format!("{}!?", s.to_uppercase());
            prop_assert_eq!(normalize(&noisy), normalize(&s));
        }
    }
}
