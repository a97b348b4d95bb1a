//! The conversation engine: one turn in flight, retried, cancellable and
//! delivered to observers through a watch channel.
//!
//! ```no_run
//! use std::sync::Arc;
//! use turnstream::config::EngineConfig;
//! use turnstream::engine::ConversationEngine;
//! use turnstream::transport::HttpTransport;
//!
//! # async fn example() -> turnstream::error::Result<()> {
//! let config = EngineConfig::from_env()?;
//! let engine = ConversationEngine::builder()
//!     .transport(Arc::new(HttpTransport::from_config(&config)))
//!     .config(config)
//!     .build();
//! let outcome = engine.submit("Gift ideas for my sister?", None).await?;
//! println!("{}", outcome.message.content);
//! # Ok(())
//! # }
//! ```

pub mod attempt;
pub mod retry;

pub use attempt::{AttemptProgress, RawReply, RequestAttemptRunner};
pub use retry::{RetryController, RetryPolicy, TurnFailure, TurnSuccess};

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::info;

use crate::analytics::{self, AnalyticsEvent, AnalyticsSink, NoopAnalytics};
use crate::cancel::{CancellationBroker, StopHandle};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::context::{topic_tags, ContextAssembler};
use crate::error::{EngineError, FailureClass, Result};
use crate::i18n::{StaticTranslator, Translator};
use crate::quota::{InMemoryQuotaStore, QuotaGate, QuotaRejection, QuotaStore, SendProposal};
use crate::resolve::{ResolvedReply, ResultResolver};
use crate::transport::{HttpTransport, Transport};
use crate::types::{
    ImageAttachment, Message, ProfileContext, QuotaState, StructuredExtras, Turn, TurnStatus,
};

/// Result of a turn that was admitted by the gate.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub turn_id: String,
    pub status: TurnStatus,
    /// The assistant message as committed.
    pub message: Message,
    pub failure: Option<FailureClass>,
    pub attempts: u32,
}

impl TurnOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == TurnStatus::Succeeded
    }
}

/// Holds the conversation's active turn; released when dropped, however the
/// turn ends.
struct InFlightGuard<'a>(&'a CancellationBroker);

impl<'a> InFlightGuard<'a> {
    fn claim(broker: &'a CancellationBroker) -> Option<Self> {
        broker.try_begin_turn().then(|| Self(broker))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.end_turn();
    }
}

/// Streaming conversation engine for a single conversation.
pub struct ConversationEngine {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    quota_store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
    translator: Arc<dyn Translator>,
    analytics: Arc<dyn AnalyticsSink>,
    profile: RwLock<ProfileContext>,
    gate: QuotaGate,
    assembler: ContextAssembler,
    resolver: ResultResolver,
    policy: RetryPolicy,
    broker: CancellationBroker,
    last_send_at: Mutex<Option<DateTime<Utc>>>,
    last_failed: Mutex<Option<Turn>>,
    messages: watch::Sender<Vec<Message>>,
}

#[bon::bon]
impl ConversationEngine {
    #[builder]
    pub fn new(
        transport: Arc<dyn Transport>,
        #[builder(default)] config: EngineConfig,
        #[builder(default = Arc::new(SystemClock) as Arc<dyn Clock>)] clock: Arc<dyn Clock>,
        quota_store: Option<Arc<dyn QuotaStore>>,
        #[builder(default = Arc::new(StaticTranslator) as Arc<dyn Translator>)]
        translator: Arc<dyn Translator>,
        #[builder(default = Arc::new(NoopAnalytics) as Arc<dyn AnalyticsSink>)]
        analytics: Arc<dyn AnalyticsSink>,
        #[builder(default)] profile: ProfileContext,
        #[builder(default)] history: Vec<Message>,
    ) -> Self {
        let quota_store = quota_store
            .unwrap_or_else(|| Arc::new(InMemoryQuotaStore::new(Arc::clone(&clock))));
        let (messages, _) = watch::channel(history);
        Self {
            gate: QuotaGate::new(config.send_throttle(), config.max_input_length),
            assembler: ContextAssembler::new(config.history_window),
            resolver: ResultResolver::new(),
            policy: RetryPolicy::from_config(&config),
            broker: CancellationBroker::new(),
            last_send_at: Mutex::new(None),
            last_failed: Mutex::new(None),
            profile: RwLock::new(profile),
            config,
            transport,
            quota_store,
            clock,
            translator,
            analytics,
            messages,
        }
    }
}

impl ConversationEngine {
    /// Engine over the HTTP transport with default collaborators.
    pub fn from_config(config: EngineConfig) -> Self {
        Self::builder()
            .transport(Arc::new(HttpTransport::from_config(&config)))
            .config(config)
            .build()
    }

    /// Send a user turn and drive it to a terminal state.
    ///
    /// Returns `Err(EngineError::Rejected(_))` when the gate refuses the send;
    /// in that case nothing was dispatched and no state changed. Any admitted
    /// turn returns `Ok`, including failed ones.
    pub async fn submit(
        &self,
        text: impl Into<String>,
        image: Option<ImageAttachment>,
    ) -> Result<TurnOutcome> {
        let text = text.into();
        let _guard = self.admit(&text, image.is_some(), false)?;
        *lock(&self.last_failed) = None;

        let now = self.clock.now();
        let mut user = Message::user(text.clone(), now);
        user.topics = topic_tags(&text);
        let assistant = Message::assistant_placeholder(now);
        let turn = Turn::new(text, image, user.id.clone(), assistant.id.clone());
        self.messages.send_modify(|messages| {
            messages.push(user);
            messages.push(assistant);
        });

        Ok(self.run_turn(turn, false).await)
    }

    /// Replay the most recent failed turn without consuming quota.
    pub async fn retry_last_failed(&self) -> Result<TurnOutcome> {
        let failed = lock(&self.last_failed).clone().ok_or_else(|| {
            EngineError::InvalidState("no failed turn to retry".to_string())
        })?;
        let _guard = self.admit(&failed.input, failed.image.is_some(), true)?;
        let Some(failed) = lock(&self.last_failed).take() else {
            return Err(EngineError::InvalidState("no failed turn to retry".to_string()));
        };

        self.update_message(&failed.assistant_message_id, |m| {
            m.content.clear();
            m.is_error = false;
            m.extras = StructuredExtras::default();
            m.topics.clear();
            m.timestamp = self.clock.now();
        });
        let turn = Turn::new(
            failed.input,
            failed.image,
            failed.user_message_id,
            failed.assistant_message_id,
        )
        .quota_neutral();

        Ok(self.run_turn(turn, true).await)
    }

    /// Stop the reply in progress. Returns `false` if nothing was running.
    pub fn stop(&self) -> bool {
        self.broker.stop()
    }

    /// A handle that can stop replies from another task.
    pub fn stop_handle(&self) -> StopHandle {
        self.broker.stop_handle()
    }

    pub fn is_sending(&self) -> bool {
        self.broker.is_active()
    }

    /// Whether a send would currently pass the concurrency and daily checks.
    pub fn can_send(&self) -> bool {
        !self.is_sending() && !self.quota_state().is_exhausted()
    }

    pub fn used_today(&self) -> u32 {
        self.quota_store.used_today()
    }

    pub fn max_per_day(&self) -> u32 {
        self.quota_store.max_for_tier(self.config.tier)
    }

    pub fn quota_state(&self) -> QuotaState {
        QuotaState {
            calls_used_today: self.used_today(),
            max_per_day: self.max_per_day(),
            last_send_at: *lock(&self.last_send_at),
        }
    }

    /// Snapshot of the conversation.
    pub fn messages(&self) -> Vec<Message> {
        self.messages.borrow().clone()
    }

    /// Observe the conversation; updates arrive at most once per stream
    /// throttle interval while a reply streams.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.messages.subscribe()
    }

    pub fn message_stream(&self) -> WatchStream<Vec<Message>> {
        WatchStream::new(self.subscribe())
    }

    pub fn profile(&self) -> ProfileContext {
        self.profile
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_profile(&self, profile: ProfileContext) {
        *self.profile.write().unwrap_or_else(PoisonError::into_inner) = profile;
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Localised hint for a gate rejection.
    pub fn describe_rejection(&self, rejection: &QuotaRejection) -> String {
        self.translator.rejection(rejection, &self.locale())
    }

    fn locale(&self) -> String {
        self.profile
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .locale
            .clone()
            .unwrap_or_else(|| self.config.locale.clone())
    }

    fn admit(&self, text: &str, has_image: bool, quota_neutral: bool) -> Result<InFlightGuard<'_>> {
        let now = self.clock.now();
        let mut state = self.quota_state();
        let proposal = SendProposal {
            text,
            has_image,
            already_sending: self.is_sending(),
            quota_neutral,
        };
        if let Err(rejection) = self.gate.admit(proposal, &mut state, now) {
            info!(reason = %rejection, "send rejected");
            analytics::dispatch(
                &self.analytics,
                AnalyticsEvent::SendRejected {
                    reason: rejection.to_string(),
                },
            );
            return Err(rejection.into());
        }
        let guard = InFlightGuard::claim(&self.broker).ok_or(QuotaRejection::Busy)?;
        *lock(&self.last_send_at) = state.last_send_at;
        Ok(guard)
    }

    async fn run_turn(&self, mut turn: Turn, replay: bool) -> TurnOutcome {
        let history = self.messages.borrow().clone();
        let upto = history
            .iter()
            .position(|m| m.id == turn.assistant_message_id)
            .unwrap_or(history.len());
        let payload = self
            .assembler
            .assemble(&history[..upto], &self.profile(), turn.image.as_ref());

        info!(turn_id = %turn.id, replay, stream = payload.stream, history = payload.history.len(), "turn submitted");
        analytics::dispatch(
            &self.analytics,
            AnalyticsEvent::TurnSubmitted {
                turn_id: turn.id.clone(),
                topics: topic_tags(&turn.input),
                has_image: turn.image.is_some(),
                replay,
            },
        );

        let runner = RequestAttemptRunner::new(
            Arc::clone(&self.transport),
            self.config.attempt_timeout(),
            self.config.stream_throttle(),
            Arc::clone(&self.clock),
        );
        let controller = RetryController::new(
            &runner,
            &self.broker,
            self.policy.clone(),
            Arc::clone(&self.clock),
            Arc::clone(&self.analytics),
        );

        let assistant_id = turn.assistant_message_id.clone();
        let mut on_progress = |progress: AttemptProgress<'_>| match progress {
            AttemptProgress::Flush(text) => {
                self.update_message(&assistant_id, |m| m.content = text.to_string());
            }
            AttemptProgress::Restart => self.update_message(&assistant_id, |m| m.content.clear()),
            AttemptProgress::FirstByte => {}
        };
        let result = controller.run(&mut turn, &payload, &mut on_progress).await;

        match result {
            Ok(success) => {
                let resolved = match success.reply {
                    RawReply::Streamed { text, side } => self.resolver.resolve_streamed(&text, side),
                    RawReply::OneShot(reply) => self.resolver.resolve_one_shot(reply),
                };
                let chars = resolved.text.chars().count();
                let message = self.commit_success(&assistant_id, resolved);
                if !turn.skip_quota_increment {
                    let used = self.quota_store.increment();
                    info!(turn_id = %turn.id, used_today = used, "quota consumed");
                }
                analytics::dispatch(
                    &self.analytics,
                    AnalyticsEvent::TurnSucceeded {
                        turn_id: turn.id.clone(),
                        attempts: success.attempts,
                        chars,
                    },
                );
                TurnOutcome {
                    turn_id: turn.id,
                    status: turn.status,
                    message,
                    failure: None,
                    attempts: success.attempts,
                }
            }
            Err(failure) => {
                let notice = self.translator.localize(failure.class, &self.locale());
                let message = self.commit_failure(&assistant_id, notice);
                let event = if !failure.class.is_error() {
                    AnalyticsEvent::TurnCancelled {
                        turn_id: turn.id.clone(),
                    }
                } else {
                    AnalyticsEvent::TurnFailed {
                        turn_id: turn.id.clone(),
                        class: failure.class,
                    }
                };
                analytics::dispatch(&self.analytics, event);
                let outcome = TurnOutcome {
                    turn_id: turn.id.clone(),
                    status: turn.status,
                    message,
                    failure: Some(failure.class),
                    attempts: failure.attempts,
                };
                *lock(&self.last_failed) = Some(turn);
                outcome
            }
        }
    }

    fn commit_success(&self, id: &str, resolved: ResolvedReply) -> Message {
        self.update_message(id, |m| {
            m.content = resolved.text;
            m.extras = resolved.extras;
            m.topics = resolved.topics;
            m.is_error = false;
        });
        self.find_message(id)
    }

    fn commit_failure(&self, id: &str, notice: String) -> Message {
        self.update_message(id, |m| {
            m.content = notice;
            m.extras = StructuredExtras::default();
            m.is_error = true;
        });
        self.find_message(id)
    }

    fn update_message(&self, id: &str, apply: impl FnOnce(&mut Message)) {
        self.messages.send_modify(|messages| {
            if let Some(message) = messages.iter_mut().rev().find(|m| m.id == id) {
                apply(message);
            }
        });
    }

    fn find_message(&self, id: &str) -> Message {
        self.messages
            .borrow()
            .iter()
            .rev()
            .find(|m| m.id == id)
            .cloned()
            .unwrap_or_else(|| Message::assistant_placeholder(self.clock.now()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
