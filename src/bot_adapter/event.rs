use log::info;

use super::adapter::SharedBotAdapter;
use super::models::{ChatEvent, DiscordMessage};
use crate::soul::perception::Perception;

/// Chat command asking the soul for a picture: `!paint <prompt>`
pub const PAINT_COMMAND: &str = "!paint";

fn paint_prompt(content: &str) -> Option<&str> {
    let rest = content.trim().strip_prefix(PAINT_COMMAND)?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim()).filter(|p| !p.is_empty())
}

/// Build the perception for an incoming message, or `None` for the bot's own messages
pub fn perception_for_message(message: &DiscordMessage, bot_user_id: Option<&str>) -> Option<Perception> {
    if bot_user_id.is_some_and(|id| id == message.author.id) {
        info!("Ignoring message from self");
        return None;
    }
    let event = ChatEvent::from_discord_message(message);
    let bot_user_id = bot_user_id.map(|s| s.to_string());
    match paint_prompt(&message.content) {
        Some(prompt) => Some(Perception::paint_requested(event, prompt, bot_user_id)),
        None => Some(Perception::chatted(event, message.content.clone(), bot_user_id)),
    }
}

pub async fn process_message(adapter: SharedBotAdapter, message: DiscordMessage) {
    let icon = if message.author.bot { "🤖" } else { "👤" };
    info!("{} {}: {}", icon, message.author.username, message.content);

    let bot_id = adapter.get_bot_id().await;
    let Some(perception) = perception_for_message(&message, bot_id.as_deref()) else {
        return;
    };

    if let Some(event) = perception.discord_event() {
        adapter.remember_channel_message(event.clone()).await;
    }
    adapter.soul().dispatch(perception).await;
}
