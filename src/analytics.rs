//! Fire-and-forget analytics events.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{FailureClass, Result};

/// Events emitted over a turn's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnalyticsEvent {
    TurnSubmitted {
        turn_id: String,
        topics: Vec<String>,
        has_image: bool,
        replay: bool,
    },
    SendRejected {
        reason: String,
    },
    AttemptFailed {
        turn_id: String,
        attempt: u32,
        class: FailureClass,
    },
    TurnSucceeded {
        turn_id: String,
        attempts: u32,
        chars: usize,
    },
    TurnFailed {
        turn_id: String,
        class: FailureClass,
    },
    TurnCancelled {
        turn_id: String,
    },
}

/// Analytics collaborator. Never awaited on the turn's path.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn emit(&self, event: AnalyticsEvent) -> Result<()>;
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnalytics;

#[async_trait]
impl AnalyticsSink for NoopAnalytics {
    async fn emit(&self, _event: AnalyticsEvent) -> Result<()> {
        Ok(())
    }
}

/// Logs events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAnalytics;

#[async_trait]
impl AnalyticsSink for TracingAnalytics {
    async fn emit(&self, event: AnalyticsEvent) -> Result<()> {
        let payload = serde_json::to_string(&event)?;
        tracing::info!(target: "turnstream::analytics", %payload, "analytics event");
        Ok(())
    }
}

/// Spawn delivery of `event`; failures are logged and dropped.
pub(crate) fn dispatch(sink: &Arc<dyn AnalyticsSink>, event: AnalyticsEvent) {
    let sink = Arc::clone(sink);
    tokio::spawn(async move {
        if let Err(e) = sink.emit(event).await {
            tracing::debug!(error = %e, "analytics sink failed");
        }
    });
}
