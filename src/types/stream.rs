//! Wire events of the line-delimited streaming protocol.

use serde::{Deserialize, Serialize};

use super::message::SourceRef;

/// One decoded line of the response stream.
///
/// ```
/// use turnstream::types::StreamEvent;
///
/// let event: StreamEvent = serde_json::from_str(r#"{"type":"delta","content":"Hi"}"#).unwrap();
/// assert_eq!(event, StreamEvent::Delta { text: "Hi".into() });
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Side-channel citations.
    Meta {
        #[serde(default)]
        sources: Vec<SourceRef>,
    },
    /// Incremental text fragment.
    Delta {
        #[serde(alias = "content", alias = "delta")]
        text: String,
    },
    /// End of turn.
    Done {
        #[serde(default)]
        followups: Vec<String>,
    },
    /// Backend-reported failure; aborts decoding.
    Error {
        #[serde(default = "default_error_message", alias = "error")]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retryable: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fatal: Option<bool>,
    },
}

fn default_error_message() -> String {
    "stream error".to_string()
}

impl StreamEvent {
    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Whether an `error` event describes a transient failure.
    ///
    /// Absent hints default to transient.
    pub fn is_transient_error(&self) -> bool {
        match self {
            Self::Error {
                retryable, fatal, ..
            } => retryable.unwrap_or(true) && !fatal.unwrap_or(false),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_event_type() {
        let meta: StreamEvent =
            serde_json::from_str(r#"{"type":"meta","sources":[{"title":"A","url":"https://a"}]}"#)
                .unwrap();
        assert!(matches!(meta, StreamEvent::Meta { ref sources } if sources.len() == 1));

        let done: StreamEvent =
            serde_json::from_str(r#"{"type":"done","followups":["more?"]}"#).unwrap();
        assert_eq!(
            done,
            StreamEvent::Done {
                followups: vec!["more?".into()]
            }
        );

        let bare_done: StreamEvent = serde_json::from_str(r#"{"type":"done"}"#).unwrap();
        assert_eq!(bare_done, StreamEvent::Done { followups: vec![] });
    }

    #[test]
    fn error_event_hints() {
        let transient: StreamEvent =
            serde_json::from_str(r#"{"type":"error","message":"overloaded"}"#).unwrap();
        assert!(transient.is_transient_error());

        let fatal: StreamEvent =
            serde_json::from_str(r#"{"type":"error","message":"blocked","fatal":true}"#).unwrap();
        assert!(!fatal.is_transient_error());
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<StreamEvent>(r#"{"type":"ping"}"#).is_err());
    }
}
