pub mod event_model;
pub mod gateway;

pub use event_model::{ChatEvent, DiscordMessage};
pub use gateway::GatewayPayload;
