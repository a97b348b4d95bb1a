//! Request assembly: bounded history window, profile merge and topic tags.

use std::sync::OnceLock;

use regex::RegexSet;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::types::{HistoryEntry, ImageAttachment, Message, ProfileContext, RequestPayload};

/// Coarse topic tag derived from message text. Observability only.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Topic {
    Gifts,
    Fashion,
    Food,
    Travel,
    Games,
    Relationships,
}

const TOPIC_PATTERNS: &[(Topic, &str)] = &[
    (Topic::Gifts, r"(?i)\b(gifts?|presents?|birthday|anniversary|surprise)\b"),
    (Topic::Fashion, r"(?i)\b(outfits?|dress(es)?|shoes|wear|style|scarf|jacket)\b"),
    (Topic::Food, r"(?i)\b(food|dinner|lunch|restaurants?|recipes?|cook(ing)?)\b"),
    (Topic::Travel, r"(?i)\b(trips?|travel|flights?|hotels?|vacation|holiday)\b"),
    (Topic::Games, r"(?i)\b(games?|play(ing)?|tournaments?|match(es)?|score)\b"),
    (Topic::Relationships, r"(?i)\b(date|dating|partner|girlfriend|boyfriend|wife|husband)\b"),
];

fn topic_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new(TOPIC_PATTERNS.iter().map(|(_, pattern)| *pattern))
            .unwrap_or_else(|_| RegexSet::empty())
    })
}

/// Derive topic tags from free text by keyword matching, in table order.
pub fn derive_topics(text: &str) -> Vec<Topic> {
    topic_set()
        .matches(text)
        .iter()
        .map(|index| TOPIC_PATTERNS[index].0)
        .collect()
}

/// Topic tags as plain strings, for storing on a [`Message`].
pub fn topic_tags(text: &str) -> Vec<String> {
    derive_topics(text)
        .into_iter()
        .map(|topic| topic.to_string())
        .collect()
}

/// Builds the immutable payload sent on every attempt of a turn.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    history_window: usize,
}

impl ContextAssembler {
    pub fn new(history_window: usize) -> Self {
        Self {
            history_window: history_window.max(1),
        }
    }

    /// Assemble the payload from prior messages (which must already end with
    /// the user message of this turn).
    ///
    /// Error bubbles and empty placeholders are local artefacts and are never
    /// sent. Streaming is disabled when an image is attached.
    pub fn assemble(
        &self,
        messages: &[Message],
        profile: &ProfileContext,
        image: Option<&ImageAttachment>,
    ) -> RequestPayload {
        let sendable: Vec<&Message> = messages
            .iter()
            .filter(|m| !m.is_error && !m.content.is_empty())
            .collect();
        let start = sendable.len().saturating_sub(self.history_window);
        let history: Vec<HistoryEntry> = sendable[start..]
            .iter()
            .map(|m| HistoryEntry::from(*m))
            .collect();

        RequestPayload {
            history,
            profile_context: profile.clone(),
            stream: image.is_none(),
            image: image.map(ImageAttachment::to_data_url),
        }
    }
}
