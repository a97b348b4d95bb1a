//! Convenience re-exports for common use.

pub use crate::cancel::StopHandle;
pub use crate::config::EngineConfig;
pub use crate::engine::{ConversationEngine, TurnOutcome};
pub use crate::error::{EngineError, FailureClass, Result};
pub use crate::quota::QuotaRejection;
pub use crate::transport::{HttpTransport, Transport};
pub use crate::types::{
    ImageAttachment, Message, ProfileContext, Role, StreamEvent, StructuredExtras,
    SubscriptionTier, TurnStatus,
};
