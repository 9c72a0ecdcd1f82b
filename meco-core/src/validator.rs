//! JSON syntax validation.

use crate::types::Outcome;

pub const VALID_MESSAGE: &str = "Content syntax is valid.";
pub const INVALID_MESSAGE: &str = "Error: Invalid JSON syntax.";

/// Check whether `content` is well-formed JSON.
///
/// Parse errors never escape: they become a failed [`Outcome`].
pub fn validate(content: &str) -> Outcome {
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(_) => Outcome::ok(VALID_MESSAGE),
        Err(err) => {
            tracing::debug!("validation failed: {err}");
            Outcome::fail(INVALID_MESSAGE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(r#"{"a":1}"#)]
    #[case("[1, 2, 3]")]
    #[case("\"just a string\"")]
    #[case("42")]
    #[case("null")]
    #[case("  {\n  \"nested\": {\"list\": [true, false]}\n}\n")]
    fn accepts_well_formed_json(#[case] content: &str) {
        let outcome = validate(content);
        assert!(outcome.success, "expected valid: {content}");
        assert_eq!(outcome.message, VALID_MESSAGE);
    }

    #[rstest]
    #[case("not json")]
    #[case("")]
    #[case("{\"a\":1")]
    #[case("{'a': 1}")]
    #[case("{\"a\":1} trailing")]
    fn rejects_malformed_json(#[case] content: &str) {
        let outcome = validate(content);
        assert!(!outcome.success, "expected invalid: {content}");
        assert_eq!(outcome.message, INVALID_MESSAGE);
    }
}
