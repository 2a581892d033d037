use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::util::url_utils::join_url;

/// Discord rejects message content longer than this
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Outbound side of the chat platform
#[async_trait]
pub trait ChatSender: Send + Sync {
    /// Send `content` to a channel, optionally as a reply to `reply_to` (a message id)
    async fn send_message(&self, channel_id: &str, content: &str, reply_to: Option<&str>) -> Result<()>;
}

/// Discord REST client (only what the bridge sends)
pub struct DiscordHttp {
    api_url: String,
    token: String,
    client: Client,
}

impl DiscordHttp {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_url: api_url.into(),
            token: token.into(),
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

/// Split `content` into pieces Discord accepts, preferring line breaks as cut points
pub fn split_message(content: &str, max_chars: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in content.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > max_chars && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > max_chars {
            let chars: Vec<char> = line.chars().collect();
            for chunk in chars.chunks(max_chars) {
                parts.push(chunk.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

#[async_trait]
impl ChatSender for DiscordHttp {
    async fn send_message(&self, channel_id: &str, content: &str, reply_to: Option<&str>) -> Result<()> {
        let url = join_url(&self.api_url, &format!("channels/{}/messages", channel_id));

        for (index, part) in split_message(content, MAX_MESSAGE_CHARS).iter().enumerate() {
            let mut body = json!({ "content": part });
            // Only the first part replies to the triggering message
            if let (0, Some(message_id)) = (index, reply_to) {
                body["message_reference"] = json!({ "message_id": message_id, "fail_if_not_exists": false });
            }

            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("Bot {}", self.token))
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_default();
                error!("[DiscordHttp] create message failed with status {}: {}", status, error_text);
                return Err(Error::Upstream(format!("discord create message failed with status {}", status)));
            }
            debug!("[DiscordHttp] message part {} sent to channel {}", index, channel_id);
        }
        Ok(())
    }
}
