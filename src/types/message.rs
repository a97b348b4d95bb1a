//! Conversation messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message in a conversation.
///
/// Content is mutable while the owning turn streams and is frozen once the
/// turn reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "StructuredExtras::is_empty")]
    pub extras: StructuredExtras,
    #[serde(default)]
    pub is_error: bool,
}

impl Message {
    /// Create a user message.
    pub fn user(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(Role::User, text.into(), timestamp)
    }

    /// Create an empty assistant placeholder awaiting its first delta.
    pub fn assistant_placeholder(timestamp: DateTime<Utc>) -> Self {
        Self::new(Role::Assistant, String::new(), timestamp)
    }

    fn new(role: Role, content: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            timestamp,
            topics: Vec::new(),
            extras: StructuredExtras::default(),
            is_error: false,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// Conversation role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Structured data attached to a finished assistant message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StructuredExtras {
    #[serde(default)]
    pub recommendations: Vec<RecommendedItem>,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(default)]
    pub followups: Vec<String>,
}

impl StructuredExtras {
    pub fn is_empty(&self) -> bool {
        self.recommendations.is_empty() && self.sources.is_empty() && self.followups.is_empty()
    }
}

/// An item recommended inline by the assistant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A citation carried by a `meta` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceRef {
    #[serde(default)]
    pub title: String,
    pub url: String,
}
