//! Final-text resolution: inline structured blocks and side-channel data.
//!
//! Recommendation blocks are embedded in the reply as
//! `<recommendations>[{"name": ...}, ...]</recommendations>`. Blocks are
//! always removed from the prose; a block that does not parse contributes no
//! items. Resolution never fails.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::context::topic_tags;
use crate::types::{OneShotReply, RecommendedItem, SourceRef, StructuredExtras};

fn block_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)<recommendations>(.*?)</recommendations>").ok())
        .as_ref()
}

/// Side-channel data collected while decoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SideChannel {
    pub sources: Vec<SourceRef>,
    pub followups: Vec<String>,
}

/// The finished assistant reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedReply {
    pub text: String,
    pub extras: StructuredExtras,
    pub topics: Vec<String>,
}

/// Splits prose from inline structured entities.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultResolver;

impl ResultResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the accumulated text of a streamed reply.
    pub fn resolve_streamed(&self, text: &str, side: SideChannel) -> ResolvedReply {
        let (prose, recommendations) = extract_recommendations(text);
        self.finish(prose, recommendations, side)
    }

    /// Resolve the body of a one-shot (image) reply.
    pub fn resolve_one_shot(&self, reply: OneShotReply) -> ResolvedReply {
        let (prose, mut recommendations) = extract_recommendations(&reply.message);
        if let Some(items) = reply.structured_items {
            recommendations.extend(items);
        }
        let side = SideChannel {
            sources: reply.sources.unwrap_or_default(),
            followups: reply.followups.unwrap_or_default(),
        };
        self.finish(prose, recommendations, side)
    }

    fn finish(
        &self,
        prose: String,
        recommendations: Vec<RecommendedItem>,
        side: SideChannel,
    ) -> ResolvedReply {
        let topics = topic_tags(&prose);
        ResolvedReply {
            text: prose,
            extras: StructuredExtras {
                recommendations,
                sources: side.sources,
                followups: side.followups,
            },
            topics,
        }
    }
}

/// Strip recommendation blocks from `text`, parsing the ones that are valid.
pub fn extract_recommendations(text: &str) -> (String, Vec<RecommendedItem>) {
    let Some(pattern) = block_pattern() else {
        return (text.to_string(), Vec::new());
    };
    let mut items = Vec::new();
    for captures in pattern.captures_iter(text) {
        let body = captures.get(1).map_or("", |m| m.as_str()).trim();
        match serde_json::from_str::<Vec<RecommendedItem>>(body) {
            Ok(parsed) => items.extend(parsed),
            Err(e) => debug!(error = %e, "dropping malformed recommendation block"),
        }
    }
    let prose = pattern.replace_all(text, "");
    (collapse_blank_lines(prose.trim()), items)
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line.trim_end());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_text_passes_through() {
        let reply = ResultResolver::new().resolve_streamed("Hello, world", SideChannel::default());
        assert_eq!(reply.text, "Hello, world");
        assert!(reply.extras.is_empty());
    }

    #[test]
    fn recommendation_block_is_extracted() {
        let text = "Try these:\n\n<recommendations>[{\"name\":\"Silk scarf\",\"price\":\"$40\"}]</recommendations>\n\nEnjoy!";
        let (prose, items) = extract_recommendations(text);
        assert_eq!(prose, "Try these:\n\nEnjoy!");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Silk scarf");
        assert_eq!(items[0].price.as_deref(), Some("$40"));
    }

    #[test]
    fn malformed_block_degrades_to_no_items() {
        let text = "Ideas <recommendations>[{name: oops</recommendations> done";
        let reply = ResultResolver::new().resolve_streamed(text, SideChannel::default());
        assert_eq!(reply.text, "Ideas  done");
        assert!(reply.extras.recommendations.is_empty());
    }

    #[test]
    fn side_channel_is_attached_and_topics_rederived() {
        let side = SideChannel {
            sources: vec![SourceRef {
                title: "Guide".into(),
                url: "https://example.test/guide".into(),
            }],
            followups: vec!["Any budget?".into()],
        };
        let reply = ResultResolver::new().resolve_streamed("A great birthday gift", side.clone());
        assert_eq!(reply.extras.sources, side.sources);
        assert_eq!(reply.extras.followups, side.followups);
        assert_eq!(reply.topics, vec!["gifts".to_string()]);
    }

    #[test]
    fn one_shot_merges_structured_items() {
        let reply = ResultResolver::new().resolve_one_shot(OneShotReply {
            message: "That is a vintage jacket.".into(),
            structured_items: Some(vec![RecommendedItem {
                name: "Denim jacket".into(),
                description: None,
                price: None,
                url: None,
            }]),
            sources: None,
            followups: Some(vec!["Where to buy?".into()]),
        });
        assert_eq!(reply.text, "That is a vintage jacket.");
        assert_eq!(reply.extras.recommendations.len(), 1);
        assert_eq!(reply.extras.followups, vec!["Where to buy?".to_string()]);
        assert_eq!(reply.topics, vec!["fashion".to_string()]);
    }
}
