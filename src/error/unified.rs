//! Failure taxonomy surfaced to the conversation state.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Classification of a failed attempt, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureClass {
    UserCancelled,
    RateLimited,
    Timeout,
    NetworkUnavailable,
    ProtocolError,
    Generic,
}

impl FailureClass {
    /// Whether this failure is shown as an error rather than a neutral notice.
    pub fn is_error(self) -> bool {
        self != Self::UserCancelled
    }
}

/// Compatibility shim: substring patterns for backends that only report
/// human-readable text. Matched case-insensitively, first row wins.
/// Structured status codes from the transport always take precedence.
const MESSAGE_PATTERNS: &[(&str, FailureClass)] = &[
    ("429", FailureClass::RateLimited),
    ("rate limit", FailureClass::RateLimited),
    ("too many requests", FailureClass::RateLimited),
    ("quota exceeded", FailureClass::RateLimited),
    ("timed out", FailureClass::Timeout),
    ("timeout", FailureClass::Timeout),
    ("failed to fetch", FailureClass::NetworkUnavailable),
    ("network", FailureClass::NetworkUnavailable),
    ("offline", FailureClass::NetworkUnavailable),
    ("connection", FailureClass::NetworkUnavailable),
    ("dns", FailureClass::NetworkUnavailable),
];

/// Classify a free-form error message using the fallback table.
pub fn classify_message(message: &str) -> Option<FailureClass> {
    let lower = message.to_lowercase();
    MESSAGE_PATTERNS
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, class)| *class)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_case_insensitively() {
        assert_eq!(
            classify_message("HTTP 429 Too Many Requests"),
            Some(FailureClass::RateLimited)
        );
        assert_eq!(
            classify_message("Request Timed Out"),
            Some(FailureClass::Timeout)
        );
        assert_eq!(
            classify_message("TypeError: Failed to fetch"),
            Some(FailureClass::NetworkUnavailable)
        );
        assert_eq!(classify_message("model exploded"), None);
    }

    #[test]
    fn display_is_snake_case() {
        assert_eq!(FailureClass::NetworkUnavailable.to_string(), "network_unavailable");
        assert_eq!(
            "rate_limited".parse::<FailureClass>().ok(),
            Some(FailureClass::RateLimited)
        );
    }
}
