use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bot_adapter::models::ChatEvent;

pub const CHATTED_ACTION: &str = "chatted";
pub const PAINT_ACTION: &str = "paint";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerceptionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord_event: Option<ChatEvent>,
    /// Discord user id of the bot itself, used to detect at-mentions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord_user_id: Option<String>,
}

/// One observed external event delivered to the soul
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Perception {
    pub action: String,
    pub content: String,
    pub name: String,
    #[serde(rename = "_metadata", default)]
    pub metadata: PerceptionMetadata,
    #[serde(rename = "_timestamp")]
    pub received_at: DateTime<Utc>,
}

impl Perception {
    /// A `chatted` perception for a chat message
    pub fn chatted(event: ChatEvent, content: impl Into<String>, discord_user_id: Option<String>) -> Self {
        Self {
            action: CHATTED_ACTION.to_string(),
            content: content.into(),
            name: event.at_mention_username.clone(),
            metadata: PerceptionMetadata {
                discord_event: Some(event),
                discord_user_id,
            },
            received_at: Utc::now(),
        }
    }

    /// A `paint` perception: the author asked for a picture of `prompt`
    pub fn paint_requested(event: ChatEvent, prompt: impl Into<String>, discord_user_id: Option<String>) -> Self {
        Self {
            action: PAINT_ACTION.to_string(),
            ..Self::chatted(event, prompt, discord_user_id)
        }
    }

    /// The user name this perception is attributed to
    pub fn user_name(&self) -> &str {
        &self.name
    }

    /// Display name of the author, falling back to the user name
    pub fn user_display_name(&self) -> &str {
        self.metadata
            .discord_event
            .as_ref()
            .map(|e| e.user_display_name.as_str())
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.name)
    }

    pub fn discord_event(&self) -> Option<&ChatEvent> {
        self.metadata.discord_event.as_ref()
    }

    #[cfg(test)]
    pub fn chatted_by(user_name: &str, content: &str) -> Self {
        Self {
            action: CHATTED_ACTION.to_string(),
            content: content.to_string(),
            name: user_name.to_string(),
            metadata: PerceptionMetadata::default(),
            received_at: Utc::now(),
        }
    }
}
