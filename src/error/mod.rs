//! Error types for turnstream.

pub mod unified;

pub use unified::{classify_message, FailureClass};

use thiserror::Error;

use crate::cancel::CancelReason;
use crate::quota::QuotaRejection;

/// Primary error type for all engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Attempt cancelled: {0}")]
    Cancelled(CancelReason),

    #[error("Protocol error: {message}")]
    Protocol { message: String, retryable: bool },

    #[error(transparent)]
    Rejected(#[from] QuotaRejection),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl EngineError {
    /// Create an API error from a status code and body.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a protocol error carried by an explicit `error` stream event.
    pub fn protocol(message: impl Into<String>, retryable: bool) -> Self {
        Self::Protocol {
            message: message.into(),
            retryable,
        }
    }

    /// Classify this error, first match wins.
    ///
    /// `user_cancelled` is the broker's record of an explicit stop request; it
    /// outranks everything the transport reported. Structured variants are
    /// consulted before the string table in [`classify_message`].
    pub fn classify(&self, user_cancelled: bool) -> FailureClass {
        if user_cancelled || matches!(self, Self::Cancelled(CancelReason::UserStop)) {
            return FailureClass::UserCancelled;
        }
        match self {
            Self::RateLimited { .. } | Self::Api { status: 429, .. } => FailureClass::RateLimited,
            Self::Timeout(_) | Self::Cancelled(CancelReason::Timeout) => FailureClass::Timeout,
            Self::Network(e) if e.is_timeout() => FailureClass::Timeout,
            Self::Network(e) if e.status().map(|s| s.as_u16()) == Some(429) => {
                FailureClass::RateLimited
            }
            // Display text of a reqwest error carries the URL, so only the
            // error kind decides here.
            Self::Network(_) | Self::Io(_) => FailureClass::NetworkUnavailable,
            Self::Transport(message) => {
                classify_message(message).unwrap_or(FailureClass::NetworkUnavailable)
            }
            Self::Protocol { message, .. } => match classify_message(message) {
                Some(FailureClass::RateLimited) => FailureClass::RateLimited,
                _ => FailureClass::ProtocolError,
            },
            Self::Api { message, .. } => {
                classify_message(message).unwrap_or(FailureClass::Generic)
            }
            _ => FailureClass::Generic,
        }
    }

    /// Whether another attempt may be issued after this error.
    ///
    /// Everything except cancellation, local rejections and non-transient
    /// protocol errors is retried; the attempt budget bounds the rest.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Cancelled(CancelReason::UserStop)
                | Self::Rejected(_)
                | Self::InvalidState(_)
                | Self::Configuration(_)
                | Self::Protocol {
                    retryable: false,
                    ..
                }
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, EngineError>;
