//! Transport trait and the HTTP implementation.

pub mod http;

pub use http::HttpTransport;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::cancel::AttemptToken;
use crate::error::Result;
use crate::types::{OneShotReply, RequestPayload};

/// Raw response body chunks.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// What a single network call produced.
pub enum TransportResponse {
    /// Text path: a line-delimited event stream.
    Stream(ByteStream),
    /// Image path: one JSON object.
    Complete(OneShotReply),
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("TransportResponse::Stream(..)"),
            Self::Complete(reply) => f.debug_tuple("TransportResponse::Complete").field(reply).finish(),
        }
    }
}

/// Issues exactly one network call per invocation.
///
/// Implementations may watch `token` to abort early; the attempt runner also
/// drops the returned future or stream once the token fires.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn issue(
        &self,
        request: &RequestPayload,
        token: &AttemptToken,
    ) -> Result<TransportResponse>;
}
