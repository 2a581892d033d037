pub mod adapter;
pub mod discord_http;
pub mod event;
pub mod models;
pub mod paint;
pub mod relay;
