//! Outbound request payload and the one-shot (image) response body.

use base64::Engine as _;
use bon::Builder;
use serde::{Deserialize, Serialize};

use super::message::{Message, RecommendedItem, Role, SourceRef};

/// Profile context merged into every request.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferences: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occasion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

/// One history entry as sent on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// An image attached to a user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl ImageAttachment {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
        }
    }

    /// Encode as a `data:` URL for the request body.
    pub fn to_data_url(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.data);
        format!("data:{};base64,{encoded}", self.mime_type)
    }
}

/// Immutable request body for every attempt of a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    pub history: Vec<HistoryEntry>,
    pub profile_context: ProfileContext,
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Body of the non-streaming response used on the image path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OneShotReply {
    pub message: String,
    #[serde(default)]
    pub structured_items: Option<Vec<RecommendedItem>>,
    #[serde(default)]
    pub sources: Option<Vec<SourceRef>>,
    #[serde(default)]
    pub followups: Option<Vec<String>>,
}
