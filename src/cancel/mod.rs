//! Cooperative cancellation shared by user stop and attempt deadlines.
//!
//! Every attempt gets a fresh [`AttemptToken`]. The first cause to fire is
//! recorded on the token before it is cancelled, so whoever observes the
//! cancellation can tell a user stop from a timeout.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio_util::sync::CancellationToken;

/// Why an attempt was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CancelReason {
    UserStop,
    Timeout,
}

/// Per-attempt cancellation token. Replaced, never reused, on retry.
#[derive(Debug, Clone, Default)]
pub struct AttemptToken {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl AttemptToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `reason` (first writer wins) and fire the token.
    pub fn cancel(&self, reason: CancelReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The cause recorded by whichever party fired first.
    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }

    /// Resolves once the token fires.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

#[derive(Debug, Default)]
struct TurnState {
    active: bool,
    user_cancelled: bool,
    turn: CancellationToken,
    current: Option<AttemptToken>,
}

/// Owns the in-flight flag, the active attempt token and the user-cancel flag
/// for a conversation. All of them change under one lock, so a stop is never
/// observed half-way through a turn starting.
#[derive(Debug, Clone, Default)]
pub struct CancellationBroker {
    inner: Arc<Mutex<TurnState>>,
}

impl CancellationBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the conversation for a new turn. Returns `false` if a turn is
    /// already active; otherwise clears the user-cancel flag.
    pub fn try_begin_turn(&self) -> bool {
        let mut state = self.lock();
        if state.active {
            return false;
        }
        *state = TurnState {
            active: true,
            ..TurnState::default()
        };
        true
    }

    /// Release the conversation once the turn has committed.
    pub fn end_turn(&self) {
        let mut state = self.lock();
        state.active = false;
        state.current = None;
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Resolves once the user stops the current turn, whether or not an
    /// attempt is in flight.
    pub async fn stopped(&self) {
        let turn = self.lock().turn.clone();
        turn.cancelled().await;
    }

    /// Install a fresh token for the next attempt.
    ///
    /// If a stop arrived between attempts the new token is born cancelled.
    pub fn begin_attempt(&self) -> AttemptToken {
        let token = AttemptToken::new();
        let mut state = self.lock();
        if state.user_cancelled {
            token.cancel(CancelReason::UserStop);
        }
        state.current = Some(token.clone());
        token
    }

    /// Drop the token of a finished attempt.
    pub fn end_attempt(&self) {
        self.lock().current = None;
    }

    /// Request a user stop. Returns `false` when no turn is active.
    ///
    /// The flag is set before any token fires so classification never sees a
    /// cancelled token without the user cause recorded.
    pub fn stop(&self) -> bool {
        let mut state = self.lock();
        if !state.active {
            return false;
        }
        state.user_cancelled = true;
        state.turn.cancel();
        if let Some(token) = &state.current {
            token.cancel(CancelReason::UserStop);
        }
        true
    }

    pub fn user_cancelled(&self) -> bool {
        self.lock().user_cancelled
    }

    /// A cloneable handle the caller can use to stop the current reply.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            broker: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TurnState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Caller-facing "stop reply" handle.
#[derive(Debug, Clone)]
pub struct StopHandle {
    broker: CancellationBroker,
}

impl StopHandle {
    pub fn stop(&self) -> bool {
        self.broker.stop()
    }
}
