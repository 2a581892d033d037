use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_RECONNECT: u8 = 7;
pub const OP_INVALID_SESSION: u8 = 9;
pub const OP_HELLO: u8 = 10;
pub const OP_HEARTBEAT_ACK: u8 = 11;

const INTENT_GUILDS: u64 = 1 << 0;
const INTENT_GUILD_MEMBERS: u64 = 1 << 1;
const INTENT_GUILD_MESSAGES: u64 = 1 << 9;
const INTENT_MESSAGE_CONTENT: u64 = 1 << 15;

pub const BRIDGE_INTENTS: u64 =
    INTENT_GUILDS | INTENT_GUILD_MEMBERS | INTENT_GUILD_MESSAGES | INTENT_MESSAGE_CONTENT;

/// Envelope of every gateway frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

impl GatewayPayload {
    pub fn heartbeat(seq: Option<u64>) -> Value {
        json!({ "op": OP_HEARTBEAT, "d": seq })
    }

    pub fn identify(token: &str) -> Value {
        json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": token,
                "intents": BRIDGE_INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "glandon_bridge",
                    "device": "glandon_bridge"
                }
            }
        })
    }

    /// Heartbeat interval announced by a Hello frame, in milliseconds
    pub fn heartbeat_interval(&self) -> Option<u64> {
        self.d.get("heartbeat_interval").and_then(|v| v.as_u64())
    }
}
