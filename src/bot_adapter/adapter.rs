use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use super::discord_http::ChatSender;
use super::event;
use super::models::gateway::{
    OP_DISPATCH, OP_HEARTBEAT, OP_HEARTBEAT_ACK, OP_HELLO, OP_INVALID_SESSION, OP_RECONNECT,
};
use super::models::{ChatEvent, DiscordMessage, GatewayPayload};
use super::paint::PaintClient;
use crate::error::Result;
use crate::soul::Soul;
use crate::util::url_utils::extract_host;

const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 41_250;
pub const GREETING: &str = "Hello! I'm now connected and ready to chat.";

/// BotAdapter connects to the Discord gateway, feeds messages to the soul and
/// holds what the relay needs to answer
pub struct BotAdapter {
    gateway_url: String,
    token: String,
    soul: Arc<Soul>,
    sender: Arc<dyn ChatSender>,
    paint_client: PaintClient,
    greeting_channel_id: Option<String>,
    bot_user_id: TokioMutex<Option<String>>,
    /// Most recent message per channel, most recently updated channel last
    last_message_channel: TokioMutex<Vec<ChatEvent>>,
}

pub type SharedBotAdapter = Arc<BotAdapter>;

enum GatewayFlow {
    Continue,
    Reconnect,
}

struct GatewaySession {
    out_tx: UnboundedSender<WsMessage>,
    seq: Arc<TokioMutex<Option<u64>>>,
    heartbeat: Option<JoinHandle<()>>,
}

impl BotAdapter {
    pub fn new(
        gateway_url: impl Into<String>,
        token: impl Into<String>,
        soul: Arc<Soul>,
        sender: Arc<dyn ChatSender>,
        paint_client: PaintClient,
        greeting_channel_id: Option<String>,
    ) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            token: token.into(),
            soul,
            sender,
            paint_client,
            greeting_channel_id,
            bot_user_id: TokioMutex::new(None),
            last_message_channel: TokioMutex::new(Vec::new()),
        }
    }

    pub fn into_shared(self) -> SharedBotAdapter {
        Arc::new(self)
    }

    pub fn soul(&self) -> &Arc<Soul> {
        &self.soul
    }

    pub fn sender(&self) -> &Arc<dyn ChatSender> {
        &self.sender
    }

    pub fn paint_client(&self) -> &PaintClient {
        &self.paint_client
    }

    /// Discord user id of the bot, known once the gateway is READY
    pub async fn get_bot_id(&self) -> Option<String> {
        self.bot_user_id.lock().await.clone()
    }

    pub async fn set_bot_id(&self, id: impl Into<String>) {
        *self.bot_user_id.lock().await = Some(id.into());
    }

    pub async fn remember_channel_message(&self, event: ChatEvent) {
        let mut channels = self.last_message_channel.lock().await;
        channels.retain(|e| e.channel_id != event.channel_id);
        channels.push(event);
    }

    pub async fn latest_channel_message(&self) -> Option<ChatEvent> {
        self.last_message_channel.lock().await.last().cloned()
    }

    pub async fn forget_channel(&self, channel_id: &str) {
        self.last_message_channel.lock().await.retain(|e| e.channel_id != channel_id);
    }

    /// Connect to the gateway and process events until the connection ends
    pub async fn start(adapter: SharedBotAdapter) -> Result<()> {
        let url = adapter.gateway_url.clone();
        info!("Connecting to discord gateway at {}", url);

        let request = http::Request::builder()
            .uri(&url)
            .header("Host", extract_host(&url).unwrap_or("gateway.discord.gg"))
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("User-Agent", "DiscordBot (glandon_bridge, 0.1.0)")
            .body(())?;

        let (ws_stream, _) = connect_async(request).await?;
        info!("Connected to the discord gateway successfully.");

        let (mut write, mut read) = ws_stream.split();

        // Heartbeats and identify are sent from several places; funnel them through one writer
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WsMessage>();
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = write.send(msg).await {
                    error!("Failed to write to gateway: {}", e);
                    break;
                }
            }
        });

        let mut session = GatewaySession {
            out_tx,
            seq: Arc::new(TokioMutex::new(None)),
            heartbeat: None,
        };

        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(WsMessage::Text(text)) => {
                    if let GatewayFlow::Reconnect = BotAdapter::process_event(&adapter, &text, &mut session).await {
                        break;
                    }
                }
                Ok(WsMessage::Binary(_)) => {
                    warn!("Received binary gateway frame, compression is not negotiated; ignoring");
                }
                Ok(WsMessage::Close(frame)) => {
                    info!("WebSocket connection closed: {:?}", frame);
                    break;
                }
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {
                    // Transport-level keepalive, gateway heartbeats are separate
                }
                Ok(WsMessage::Frame(_)) => {
                    // Raw frame, ignore
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
            }
        }

        if let Some(heartbeat) = session.heartbeat.take() {
            heartbeat.abort();
        }
        writer.abort();
        Ok(())
    }

    /// Process a single gateway frame
    async fn process_event(adapter: &SharedBotAdapter, text: &str, session: &mut GatewaySession) -> GatewayFlow {
        let payload: GatewayPayload = match serde_json::from_str(text) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to parse gateway frame as JSON: {}", e);
                return GatewayFlow::Continue;
            }
        };

        if let Some(s) = payload.s {
            *session.seq.lock().await = Some(s);
        }

        match payload.op {
            OP_HELLO => {
                let interval = payload.heartbeat_interval().unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);
                debug!("Gateway hello, heartbeat every {}ms", interval);
                if let Some(old) = session.heartbeat.take() {
                    old.abort();
                }
                session.heartbeat = Some(spawn_heartbeat(session.out_tx.clone(), session.seq.clone(), interval));
                let identify = GatewayPayload::identify(&adapter.token);
                if session.out_tx.send(WsMessage::Text(identify.to_string())).is_err() {
                    error!("Gateway writer is gone, cannot identify");
                    return GatewayFlow::Reconnect;
                }
            }
            OP_HEARTBEAT => {
                let seq = *session.seq.lock().await;
                let _ = session.out_tx.send(WsMessage::Text(GatewayPayload::heartbeat(seq).to_string()));
            }
            OP_HEARTBEAT_ACK => {
                debug!("Heartbeat acknowledged");
            }
            OP_DISPATCH => {
                BotAdapter::process_dispatch(adapter, payload.t.as_deref().unwrap_or_default(), payload.d).await;
            }
            OP_RECONNECT | OP_INVALID_SESSION => {
                warn!("Gateway asked us to reconnect (op {})", payload.op);
                return GatewayFlow::Reconnect;
            }
            other => {
                debug!("Ignoring gateway op {}", other);
            }
        }
        GatewayFlow::Continue
    }

    async fn process_dispatch(adapter: &SharedBotAdapter, event_name: &str, data: Value) {
        match event_name {
            "READY" => {
                let user = &data["user"];
                if let Some(id) = user["id"].as_str() {
                    adapter.set_bot_id(id).await;
                }
                info!("Bot is ready! Logged in as {}", user["username"].as_str().unwrap_or("unknown"));

                info!("Current servers:");
                for guild in data["guilds"].as_array().into_iter().flatten() {
                    info!("- (ID: {})", guild["id"].as_str().unwrap_or("?"));
                }

                if let Some(channel_id) = adapter.greeting_channel_id.clone() {
                    let sender = adapter.sender.clone();
                    tokio::spawn(async move {
                        match sender.send_message(&channel_id, GREETING, None).await {
                            Ok(()) => info!("Successfully sent connection message to channel {}", channel_id),
                            Err(e) => error!("Error sending connection message: {}", e),
                        }
                    });
                }
            }
            "MESSAGE_CREATE" => {
                let message: DiscordMessage = match serde_json::from_value(data) {
                    Ok(m) => m,
                    Err(e) => {
                        error!("Failed to parse message event: {}", e);
                        return;
                    }
                };
                // Inline so messages reach the soul in gateway order
                event::process_message(adapter.clone(), message).await;
            }
            other => {
                debug!("Ignoring dispatch {}", other);
            }
        }
    }
}

fn spawn_heartbeat(
    out_tx: UnboundedSender<WsMessage>,
    seq: Arc<TokioMutex<Option<u64>>>,
    interval_ms: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let current = *seq.lock().await;
            if out_tx.send(WsMessage::Text(GatewayPayload::heartbeat(current).to_string())).is_err() {
                break;
            }
        }
    })
}
