//! Bounded retries over attempts, with failure classification.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::attempt::{AttemptProgress, ProgressFn, RawReply, RequestAttemptRunner};
use crate::analytics::{self, AnalyticsEvent, AnalyticsSink};
use crate::cancel::CancellationBroker;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, FailureClass};
use crate::types::{AttemptRecord, RequestPayload, Turn, TurnStatus};

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Fixed pause before a retry.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            retry_delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay(),
        }
    }

    /// Whether attempt `index` (0-based) may be followed by another.
    pub fn should_retry(&self, index: u32, class: FailureClass, error: &EngineError) -> bool {
        index + 1 < self.max_attempts && class != FailureClass::UserCancelled && error.is_retryable()
    }
}

/// A turn that succeeded.
#[derive(Debug)]
pub struct TurnSuccess {
    pub reply: RawReply,
    pub attempts: u32,
}

/// A turn that failed; carries only the last attempt's classification.
#[derive(Debug)]
pub struct TurnFailure {
    pub class: FailureClass,
    pub error: EngineError,
    pub attempts: u32,
}

/// Drives a turn through `Dispatching -> Streaming -> {Succeeded | Retrying | Failed}`.
pub struct RetryController<'a> {
    runner: &'a RequestAttemptRunner,
    broker: &'a CancellationBroker,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    analytics: Arc<dyn AnalyticsSink>,
}

impl<'a> RetryController<'a> {
    pub fn new(
        runner: &'a RequestAttemptRunner,
        broker: &'a CancellationBroker,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Self {
        Self {
            runner,
            broker,
            policy,
            clock,
            analytics,
        }
    }

    /// Run attempts until one succeeds, the budget is spent, or the user
    /// stops the turn. Every attempt reuses `payload` with a fresh token.
    pub async fn run(
        &self,
        turn: &mut Turn,
        payload: &RequestPayload,
        progress: &mut ProgressFn<'_>,
    ) -> Result<TurnSuccess, TurnFailure> {
        let mut index = 0;
        loop {
            if index > 0 && self.broker.user_cancelled() {
                // Stopped between attempts: nothing is dispatched.
                return Err(self.fail(
                    turn,
                    EngineError::Cancelled(crate::cancel::CancelReason::UserStop),
                    FailureClass::UserCancelled,
                    index,
                ));
            }

            advance(turn, TurnStatus::Dispatching, index)?;
            let record = AttemptRecord {
                index,
                token: self.broker.begin_attempt(),
                started_at: self.clock.now(),
            };
            debug!(turn_id = %turn.id, attempt = index, "dispatching attempt");

            let result = {
                let mut on_progress = |p: AttemptProgress<'_>| {
                    if p == AttemptProgress::FirstByte && turn.status == TurnStatus::Dispatching {
                        turn.status = TurnStatus::Streaming;
                    }
                    progress(p);
                };
                self.runner.run(payload, &record, &mut on_progress).await
            };
            self.broker.end_attempt();
            let elapsed_ms = (self.clock.now() - record.started_at).num_milliseconds();
            drop(record);

            let error = match result {
                Ok(reply) => {
                    if turn.status == TurnStatus::Dispatching {
                        advance(turn, TurnStatus::Streaming, index)?;
                    }
                    advance(turn, TurnStatus::Succeeded, index)?;
                    info!(turn_id = %turn.id, attempts = index + 1, elapsed_ms, "turn succeeded");
                    return Ok(TurnSuccess {
                        reply,
                        attempts: index + 1,
                    });
                }
                Err(error) => error,
            };

            let class = error.classify(self.broker.user_cancelled());
            if self.policy.should_retry(index, class, &error) {
                warn!(
                    turn_id = %turn.id,
                    attempt = index + 1,
                    max_attempts = self.policy.max_attempts,
                    class = %class,
                    error = %error,
                    "Retrying after error"
                );
                analytics::dispatch(
                    &self.analytics,
                    AnalyticsEvent::AttemptFailed {
                        turn_id: turn.id.clone(),
                        attempt: index,
                        class,
                    },
                );
                advance(turn, TurnStatus::Retrying, index)?;
                progress(AttemptProgress::Restart);
                if !self.policy.retry_delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(self.policy.retry_delay) => {}
                        _ = self.broker.stopped() => {}
                    }
                }
                index += 1;
                continue;
            }

            return Err(self.fail(turn, error, class, index + 1));
        }
    }

    fn fail(
        &self,
        turn: &mut Turn,
        error: EngineError,
        class: FailureClass,
        attempts: u32,
    ) -> TurnFailure {
        if class.is_error() {
            warn!(turn_id = %turn.id, attempts, class = %class, error = %error, "turn failed");
        } else {
            info!(turn_id = %turn.id, attempts, "turn cancelled by user");
        }
        turn.status = TurnStatus::Failed;
        turn.failure = Some(class);
        TurnFailure {
            class,
            error,
            attempts,
        }
    }
}

fn advance(turn: &mut Turn, next: TurnStatus, index: u32) -> Result<(), TurnFailure> {
    turn.transition(next).map_err(|error| {
        turn.status = TurnStatus::Failed;
        turn.failure = Some(FailureClass::Generic);
        TurnFailure {
            class: FailureClass::Generic,
            error,
            attempts: index + 1,
        }
    })
}
