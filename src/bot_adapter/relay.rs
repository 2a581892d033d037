use log::{error, info, warn};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use super::adapter::SharedBotAdapter;
use super::models::ChatEvent;
use super::paint::PaintRequest;
use crate::error::Result;
use crate::llm::ReplyStream;
use crate::soul::SoulEvent;

/// Forward everything the soul emits to Discord until the soul goes away
pub async fn relay_events(adapter: SharedBotAdapter, mut events: UnboundedReceiver<SoulEvent>) {
    while let Some(event) = events.recv().await {
        let result = match event {
            SoulEvent::Says { content, discord_event } => relay_says(&adapter, content, discord_event).await,
            SoulEvent::Paint { metadata } => handle_paint(&adapter, &metadata).await,
        };
        if let Err(e) = result {
            error!("[Relay] {}", e);
        }
    }
    warn!("[Relay] Soul event channel closed");
}

/// Resolve a reply and post it in reply to the message that triggered it.
/// Without a triggering event, the most recent channel message is answered.
pub async fn relay_says(
    adapter: &SharedBotAdapter,
    content: ReplyStream,
    discord_event: Option<ChatEvent>,
) -> Result<()> {
    let text = content.collect_text().await?;

    let target = match discord_event {
        Some(event) => Some(event),
        None => adapter.latest_channel_message().await,
    };
    let Some(target) = target else {
        warn!("[Relay] No channel to reply in, dropping: {}", text);
        return Ok(());
    };

    info!("Host is replying to {}: {}", target.at_mention_username, text);
    adapter
        .sender()
        .send_message(&target.channel_id, &text, Some(&target.message_id))
        .await?;
    adapter.forget_channel(&target.channel_id).await;
    Ok(())
}

/// Generate an image for the request in `metadata` and post the result to its channel
pub async fn handle_paint(adapter: &SharedBotAdapter, metadata: &Value) -> Result<()> {
    let request = PaintRequest::from_metadata(metadata)?;
    let image = adapter.paint_client().paint(&request.prompt).await?;
    adapter.sender().send_message(&request.channel_id, &image, None).await
}
