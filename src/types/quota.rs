//! Quota read model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Subscription tier; determines the daily call allowance.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Plus,
    Premium,
}

impl SubscriptionTier {
    /// Default daily allowance for this tier.
    pub fn daily_limit(self) -> u32 {
        match self {
            Self::Free => 20,
            Self::Plus => 100,
            Self::Premium => 500,
        }
    }
}

/// Snapshot of the daily quota as seen by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaState {
    pub calls_used_today: u32,
    pub max_per_day: u32,
    pub last_send_at: Option<DateTime<Utc>>,
}

impl QuotaState {
    pub fn remaining(&self) -> u32 {
        self.max_per_day.saturating_sub(self.calls_used_today)
    }

    pub fn is_exhausted(&self) -> bool {
        self.calls_used_today >= self.max_per_day
    }
}
