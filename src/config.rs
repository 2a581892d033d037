use std::fs;
use serde::Deserialize;
use log::{info, error, warn};

pub const DEFAULT_AGENT_NAME: &str = "Glandon";
pub const DEFAULT_PAINT_URL: &str = "http://brain.tanaki.app/paint";
pub const DEFAULT_DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
pub const DEFAULT_DISCORD_API_URL: &str = "https://discord.com/api/v10";
pub const DEFAULT_LLM_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_LLM_MODEL_NAME: &str = "gpt-4o";

#[derive(Debug, Default, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "BOT_TOKEN")]
    pub bot_token: Option<String>,
    #[serde(rename = "DISCORD_GATEWAY_URL")]
    pub discord_gateway_url: Option<String>,
    #[serde(rename = "DISCORD_API_URL")]
    pub discord_api_url: Option<String>,
    #[serde(rename = "GREETING_CHANNEL_ID")]
    pub greeting_channel_id: Option<String>,
    #[serde(rename = "SOUL_ORGANIZATION")]
    pub soul_organization: Option<String>,
    #[serde(rename = "SOUL_BLUEPRINT")]
    pub soul_blueprint: Option<String>,
    #[serde(rename = "SOUL_ID")]
    pub soul_id: Option<String>,
    #[serde(rename = "SOUL_ENGINE_API_KEY")]
    pub soul_engine_api_key: Option<String>,
    #[serde(rename = "AGENT_NAME")]
    pub agent_name: Option<String>,
    #[serde(rename = "LLM_API_URL")]
    pub llm_api_url: Option<String>,
    #[serde(rename = "LLM_API_KEY")]
    pub llm_api_key: Option<String>,
    #[serde(rename = "LLM_MODEL_NAME")]
    pub llm_model_name: Option<String>,
    #[serde(rename = "LLM_TIMEOUT_SECS")]
    pub llm_timeout_secs: Option<u64>,
    #[serde(rename = "RETRIEVAL_URL")]
    pub retrieval_url: Option<String>,
    #[serde(rename = "PAINT_URL")]
    pub paint_url: Option<String>,
    #[serde(rename = "REDIS_HOST")]
    pub redis_host: Option<String>,
    #[serde(rename = "REDIS_PORT")]
    pub redis_port: Option<u16>,
    #[serde(rename = "REDIS_DB")]
    pub redis_db: Option<u8>,
    #[serde(rename = "REDIS_PASSWORD")]
    pub redis_password: Option<String>,
    #[serde(rename = "REDIS_URL")]
    pub redis_url: Option<String>,
    #[serde(rename = "REDIS_RECONNECT_MAX_ATTEMPTS")]
    pub redis_reconnect_max_attempts: Option<u32>,
    #[serde(rename = "REDIS_RECONNECT_INTERVAL_SECS")]
    pub redis_reconnect_interval_secs: Option<u64>,
}

/// Load configuration from a yaml file, then fill the gaps from environment variables
pub fn load_config(path: &str) -> Config {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => {
            match serde_yaml::from_str(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path);
                    config
                }
                Err(e) => {
                    error!("Failed to parse {}: {}", path, e);
                    Config::default()
                }
            }
        }
        Err(e) => {
            info!("Could not read {} ({}), using environment variables", path, e);
            Config::default()
        }
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config
}

/// Fill every unset field from `lookup` (normally the process environment)
/// and apply defaults for the fields that must always have a value.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    fn fill(field: &mut Option<String>, value: Option<String>) {
        if field.as_deref().map_or(true, str::is_empty) {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                *field = Some(v);
            }
        }
    }

    fill(&mut config.bot_token, lookup("BOT_TOKEN"));
    fill(&mut config.discord_gateway_url, lookup("DISCORD_GATEWAY_URL"));
    fill(&mut config.discord_api_url, lookup("DISCORD_API_URL"));
    fill(&mut config.greeting_channel_id, lookup("GREETING_CHANNEL_ID"));
    fill(&mut config.soul_organization, lookup("SOUL_ORGANIZATION"));
    fill(&mut config.soul_blueprint, lookup("SOUL_BLUEPRINT"));
    fill(&mut config.soul_id, lookup("SOUL_ID"));
    fill(&mut config.soul_engine_api_key, lookup("SOUL_ENGINE_API_KEY"));
    fill(&mut config.agent_name, lookup("AGENT_NAME"));
    fill(&mut config.llm_api_url, lookup("LLM_API_URL"));
    fill(&mut config.llm_api_key, lookup("LLM_API_KEY"));
    fill(&mut config.llm_model_name, lookup("LLM_MODEL_NAME"));
    fill(&mut config.retrieval_url, lookup("RETRIEVAL_URL"));
    fill(&mut config.paint_url, lookup("PAINT_URL"));
    fill(&mut config.redis_url, lookup("REDIS_URL"));
    fill(&mut config.redis_host, lookup("REDIS_HOST"));
    fill(&mut config.redis_password, lookup("REDIS_PASSWORD"));

    if config.redis_port.is_none() {
        if let Some(val) = lookup("REDIS_PORT") {
            match val.parse() {
                Ok(parsed) => config.redis_port = Some(parsed),
                Err(e) => warn!("Failed to parse REDIS_PORT ({}), ignoring", e),
            }
        }
    }

    if config.redis_db.is_none() {
        if let Some(val) = lookup("REDIS_DB") {
            match val.parse() {
                Ok(parsed) => config.redis_db = Some(parsed),
                Err(e) => warn!("Failed to parse REDIS_DB ({}), using database 0", e),
            }
        }
    }

    // The soul engine key doubles as the LLM key when no dedicated one is set
    if config.llm_api_key.is_none() {
        config.llm_api_key = config.soul_engine_api_key.clone();
    }

    if config.llm_timeout_secs.is_none() {
        if let Some(val) = lookup("LLM_TIMEOUT_SECS") {
            match val.parse() {
                Ok(parsed) => config.llm_timeout_secs = Some(parsed),
                Err(e) => warn!("Failed to parse LLM_TIMEOUT_SECS ({}), using default 120s", e),
            }
        }
    }

    if config.redis_reconnect_max_attempts.is_none() {
        if let Some(val) = lookup("REDIS_RECONNECT_MAX_ATTEMPTS") {
            match val.parse() {
                Ok(parsed) => config.redis_reconnect_max_attempts = Some(parsed),
                Err(e) => warn!("Failed to parse REDIS_RECONNECT_MAX_ATTEMPTS ({}), using default 3", e),
            }
        }
    }

    if config.redis_reconnect_interval_secs.is_none() {
        if let Some(val) = lookup("REDIS_RECONNECT_INTERVAL_SECS") {
            match val.parse() {
                Ok(parsed) => config.redis_reconnect_interval_secs = Some(parsed),
                Err(e) => warn!("Failed to parse REDIS_RECONNECT_INTERVAL_SECS ({}), using default 60s", e),
            }
        }
    }

    config.agent_name.get_or_insert_with(|| DEFAULT_AGENT_NAME.to_string());
    config.paint_url.get_or_insert_with(|| DEFAULT_PAINT_URL.to_string());
    config.discord_gateway_url.get_or_insert_with(|| DEFAULT_DISCORD_GATEWAY_URL.to_string());
    config.discord_api_url.get_or_insert_with(|| DEFAULT_DISCORD_API_URL.to_string());
    config.llm_api_url.get_or_insert_with(|| DEFAULT_LLM_API_URL.to_string());
    config.llm_model_name.get_or_insert_with(|| DEFAULT_LLM_MODEL_NAME.to_string());
    config.llm_timeout_secs.get_or_insert(120);
    config.redis_reconnect_max_attempts.get_or_insert(3);
    config.redis_reconnect_interval_secs.get_or_insert(60);
}

impl Config {
    pub fn agent_name(&self) -> &str {
        self.agent_name.as_deref().unwrap_or(DEFAULT_AGENT_NAME)
    }

    /// Namespace prefix for soul memory keys, derived from the soul identity
    pub fn soul_namespace(&self) -> String {
        format!(
            "soul:{}:{}:{}",
            self.soul_organization.as_deref().unwrap_or("local"),
            self.soul_blueprint.as_deref().unwrap_or("default"),
            self.soul_id.as_deref().unwrap_or("default"),
        )
    }
}

/// Percent-encode a password for safe inclusion in a URL
pub fn pct_encode(input: &str) -> String {
    // Encode everything except unreserved characters per RFC 3986: ALPHA / DIGIT / '-' / '.' / '_' / '~'
    let mut out = String::new();
    for &b in input.as_bytes() {
        let c = b as char;
        if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '~' {
            out.push(c);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// Build Redis URL from configuration
pub fn build_redis_url(config: &Config) -> Option<String> {
    if let Some(url) = config.redis_url.clone() {
        return Some(url);
    }

    if let (Some(host), Some(port)) = (config.redis_host.as_ref(), config.redis_port) {
        let db = config.redis_db.unwrap_or(0);
        let password = config.redis_password.as_deref().unwrap_or("");
        if !password.is_empty() {
            // Percent-encode password to safely include special characters like @ and #
            let enc = pct_encode(password);
            return Some(format!("redis://:{}@{}:{}/{}", enc, host, port, db));
        } else {
            return Some(format!("redis://{}:{}/{}", host, port, db));
        }
    }

    None
}
