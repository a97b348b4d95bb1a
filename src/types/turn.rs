//! Turn lifecycle types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use super::request::ImageAttachment;
use crate::cancel::AttemptToken;
use crate::error::{EngineError, FailureClass, Result};

/// State of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TurnStatus {
    Pending,
    Dispatching,
    Streaming,
    Retrying,
    Succeeded,
    Failed,
}

impl TurnStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Allowed edges of the turn state machine.
    ///
    /// `Retrying -> Dispatching` is the only edge that moves backwards.
    pub fn can_transition_to(self, next: Self) -> bool {
        use TurnStatus::*;
        matches!(
            (self, next),
            (Pending, Dispatching)
                | (Pending, Failed)
                | (Dispatching, Streaming)
                | (Dispatching, Retrying)
                | (Dispatching, Failed)
                | (Streaming, Succeeded)
                | (Streaming, Retrying)
                | (Streaming, Failed)
                | (Retrying, Dispatching)
                | (Retrying, Failed)
        )
    }
}

/// One user request and its resulting assistant response.
#[derive(Debug, Clone)]
pub struct Turn {
    pub id: String,
    pub input: String,
    pub image: Option<ImageAttachment>,
    pub status: TurnStatus,
    pub skip_quota_increment: bool,
    pub user_message_id: String,
    pub assistant_message_id: String,
    pub failure: Option<FailureClass>,
}

impl Turn {
    pub fn new(
        input: impl Into<String>,
        image: Option<ImageAttachment>,
        user_message_id: impl Into<String>,
        assistant_message_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            input: input.into(),
            image,
            status: TurnStatus::Pending,
            skip_quota_increment: false,
            user_message_id: user_message_id.into(),
            assistant_message_id: assistant_message_id.into(),
            failure: None,
        }
    }

    /// Mark this turn as quota-neutral.
    pub fn quota_neutral(mut self) -> Self {
        self.skip_quota_increment = true;
        self
    }

    /// Advance the state machine, rejecting illegal edges.
    pub fn transition(&mut self, next: TurnStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidState(format!(
                "turn {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        tracing::trace!(turn_id = %self.id, from = %self.status, to = %next, "turn transition");
        self.status = next;
        Ok(())
    }
}

/// Bookkeeping for a single network attempt; dropped when the attempt ends.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// 0-based attempt index.
    pub index: u32,
    pub token: AttemptToken,
    pub started_at: DateTime<Utc>,
}
