//! Local pre-flight checks: concurrency guard, daily quota, send throttle and
//! input ceiling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::clock::Clock;
use crate::types::{QuotaState, SubscriptionTier};

/// Why the gate refused a send. No request is dispatched for any of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuotaRejection {
    #[error("a reply is already in progress")]
    Busy,

    #[error("daily limit reached ({used}/{max}); upgrade required")]
    UpgradeRequired { used: u32, max: u32 },

    #[error("sending too fast; wait {wait_ms}ms")]
    Throttled { wait_ms: u64 },

    #[error("input is {len} characters; the limit is {max}")]
    InputTooLong { len: usize, max: usize },

    #[error("nothing to send")]
    EmptyInput,
}

/// Daily call counter collaborator.
pub trait QuotaStore: Send + Sync {
    /// Calls consumed on the current day.
    fn used_today(&self) -> u32;

    /// Consume one call; returns the new count.
    fn increment(&self) -> u32;

    /// Daily allowance for `tier`.
    fn max_for_tier(&self, tier: SubscriptionTier) -> u32 {
        tier.daily_limit()
    }
}

/// In-process quota store keyed by UTC day.
pub struct InMemoryQuotaStore {
    clock: Arc<dyn Clock>,
    counts: Mutex<HashMap<NaiveDate, u32>>,
    limits: HashMap<SubscriptionTier, u32>,
}

impl InMemoryQuotaStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            counts: Mutex::new(HashMap::new()),
            limits: HashMap::new(),
        }
    }

    /// Override the daily allowance of a tier.
    pub fn with_limit(mut self, tier: SubscriptionTier, max: u32) -> Self {
        self.limits.insert(tier, max);
        self
    }

    /// Seed today's counter.
    pub fn with_used_today(self, used: u32) -> Self {
        let today = self.today();
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(today, used);
        self
    }

    fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }
}

impl QuotaStore for InMemoryQuotaStore {
    fn used_today(&self) -> u32 {
        let today = self.today();
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&today)
            .copied()
            .unwrap_or(0)
    }

    fn increment(&self) -> u32 {
        let today = self.today();
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.retain(|day, _| *day == today);
        let count = counts.entry(today).or_insert(0);
        *count += 1;
        *count
    }

    fn max_for_tier(&self, tier: SubscriptionTier) -> u32 {
        self.limits
            .get(&tier)
            .copied()
            .unwrap_or_else(|| tier.daily_limit())
    }
}

/// A proposed send, as seen by the gate.
#[derive(Debug, Clone, Copy)]
pub struct SendProposal<'a> {
    pub text: &'a str,
    pub has_image: bool,
    pub already_sending: bool,
    /// Replays of a failed turn do not count against the daily limit.
    pub quota_neutral: bool,
}

/// Synchronous pre-flight gate.
#[derive(Debug, Clone)]
pub struct QuotaGate {
    send_throttle: Duration,
    max_input_length: usize,
}

impl QuotaGate {
    pub fn new(send_throttle: Duration, max_input_length: usize) -> Self {
        Self {
            send_throttle,
            max_input_length,
        }
    }

    /// Run the checks in order. On acceptance `state.last_send_at` is set to
    /// `now`; nothing else is touched, and a rejection touches nothing.
    pub fn admit(
        &self,
        proposal: SendProposal<'_>,
        state: &mut QuotaState,
        now: DateTime<Utc>,
    ) -> Result<(), QuotaRejection> {
        if proposal.already_sending {
            return Err(QuotaRejection::Busy);
        }
        if !proposal.quota_neutral && state.is_exhausted() {
            return Err(QuotaRejection::UpgradeRequired {
                used: state.calls_used_today,
                max: state.max_per_day,
            });
        }
        if let Some(last) = state.last_send_at {
            let elapsed = (now - last).to_std().unwrap_or_default();
            if elapsed < self.send_throttle {
                let wait = self.send_throttle - elapsed;
                return Err(QuotaRejection::Throttled {
                    wait_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }
        let len = proposal.text.chars().count();
        if len > self.max_input_length {
            return Err(QuotaRejection::InputTooLong {
                len,
                max: self.max_input_length,
            });
        }
        if proposal.text.trim().is_empty() && !proposal.has_image {
            return Err(QuotaRejection::EmptyInput);
        }

        state.last_send_at = Some(now);
        Ok(())
    }
}
