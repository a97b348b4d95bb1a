//! One network attempt under a deadline and a cancellation token.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::debug;

use crate::cancel::{AttemptToken, CancelReason};
use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::resolve::SideChannel;
use crate::stream::{decode_stream, DeltaAccumulator};
use crate::transport::{ByteStream, Transport, TransportResponse};
use crate::types::{AttemptRecord, OneShotReply, RequestPayload, StreamEvent};

/// Progress reported while an attempt runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptProgress<'a> {
    /// The response started arriving (or the one-shot body was parsed).
    FirstByte,
    /// The accumulated text to publish.
    Flush(&'a str),
    /// A new attempt is about to replace any partial text.
    Restart,
}

/// Progress callback handed to the runner.
pub type ProgressFn<'a> = dyn FnMut(AttemptProgress<'_>) + Send + 'a;

/// What a successful attempt produced, before resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum RawReply {
    Streamed { text: String, side: SideChannel },
    OneShot(OneShotReply),
}

/// Executes a single attempt.
pub struct RequestAttemptRunner {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    stream_throttle: Duration,
    clock: Arc<dyn Clock>,
}

impl RequestAttemptRunner {
    pub fn new(
        transport: Arc<dyn Transport>,
        timeout: Duration,
        stream_throttle: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            timeout,
            stream_throttle,
            clock,
        }
    }

    /// Run one attempt. The deadline fires `record.token` with
    /// [`CancelReason::Timeout`]; the attempt then unwinds through the same
    /// path as a user stop and surfaces as [`EngineError::Timeout`].
    pub async fn run(
        &self,
        payload: &RequestPayload,
        record: &AttemptRecord,
        progress: &mut ProgressFn<'_>,
    ) -> Result<RawReply> {
        let token = &record.token;
        let work = self.execute(payload, token, progress);
        tokio::pin!(work);
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        tokio::select! {
            result = &mut work => result,
            _ = &mut deadline => {
                let timeout_ms = self.timeout.as_millis() as u64;
                debug!(attempt = record.index, timeout_ms, "attempt deadline reached");
                token.cancel(CancelReason::Timeout);
                match work.await {
                    Err(EngineError::Cancelled(CancelReason::Timeout)) => {
                        Err(EngineError::Timeout(timeout_ms))
                    }
                    other => other,
                }
            }
        }
    }

    async fn execute(
        &self,
        payload: &RequestPayload,
        token: &AttemptToken,
        progress: &mut ProgressFn<'_>,
    ) -> Result<RawReply> {
        if token.is_cancelled() {
            return Err(cancelled(token));
        }

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(cancelled(token)),
            response = self.transport.issue(payload, token) => response?,
        };

        progress(AttemptProgress::FirstByte);
        match response {
            TransportResponse::Complete(reply) => Ok(RawReply::OneShot(reply)),
            TransportResponse::Stream(bytes) => self.consume(bytes, token, progress).await,
        }
    }

    async fn consume(
        &self,
        bytes: ByteStream,
        token: &AttemptToken,
        progress: &mut ProgressFn<'_>,
    ) -> Result<RawReply> {
        let mut events = decode_stream(bytes);
        let mut acc = DeltaAccumulator::new(self.stream_throttle, Arc::clone(&self.clock));
        let mut side = SideChannel::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(cancelled(token)),
                next = events.next() => next,
            };
            let Some(event) = next else { break };

            let event = event?;
            let transient = event.is_transient_error();
            match event {
                StreamEvent::Meta { sources } => {
                    // Last meta wins.
                    side.sources = sources;
                }
                StreamEvent::Delta { text } => {
                    if let Some(buffer) = acc.push(&text) {
                        progress(AttemptProgress::Flush(buffer));
                    }
                }
                StreamEvent::Done { followups } => {
                    side.followups = followups;
                    break;
                }
                StreamEvent::Error { message, .. } => {
                    return Err(EngineError::protocol(message, transient));
                }
            }
        }

        progress(AttemptProgress::Flush(acc.finish()));
        debug!(chars = acc.text().len(), flushes = acc.flush_count(), "stream complete");
        Ok(RawReply::Streamed {
            text: acc.into_text(),
            side,
        })
    }
}

fn cancelled(token: &AttemptToken) -> EngineError {
    EngineError::Cancelled(token.reason().unwrap_or(CancelReason::UserStop))
}
