use serde::{Deserialize, Serialize};
use std::fmt;

/// Chat event type (only message creation is bridged)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatEventType {
    #[serde(rename = "messageCreate")]
    MessageCreate,
}

impl fmt::Display for ChatEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatEventType::MessageCreate => write!(f, "messageCreate"),
        }
    }
}

/// Normalized chat message, created once per received message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    #[serde(rename = "type")]
    pub event_type: ChatEventType,
    pub message_id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub user_id: String,
    pub user_display_name: String,
    pub at_mention_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replied_to_user_id: Option<String>,
    /// The author is itself an automated agent
    pub is_host: bool,
}

impl ChatEvent {
    pub fn from_discord_message(message: &DiscordMessage) -> Self {
        Self {
            event_type: ChatEventType::MessageCreate,
            message_id: message.id.clone(),
            channel_id: message.channel_id.clone(),
            guild_id: message.guild_id.clone(),
            user_id: message.author.id.clone(),
            user_display_name: message.display_name().to_string(),
            at_mention_username: message.author.username.clone(),
            replied_to_user_id: message.mentions.first().map(|u| u.id.clone()),
            is_host: message.author.bot,
        }
    }
}

/// Discord user object (subset)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

/// Guild member object attached to guild messages (subset)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscordMember {
    #[serde(default)]
    pub nick: Option<String>,
}

/// Discord `MESSAGE_CREATE` payload (subset)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscordMessage {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    pub author: DiscordUser,
    #[serde(default)]
    pub member: Option<DiscordMember>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub mentions: Vec<DiscordUser>,
}

impl DiscordMessage {
    /// Guild display name when the message comes from a guild member, username otherwise
    pub fn display_name(&self) -> &str {
        match &self.member {
            Some(member) => member
                .nick
                .as_deref()
                .or(self.author.global_name.as_deref())
                .unwrap_or(&self.author.username),
            None => &self.author.username,
        }
    }
}
