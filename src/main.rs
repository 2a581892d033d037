mod bot_adapter;
mod config;
mod error;
mod llm;
mod soul;
mod util;

use std::sync::Arc;
use std::time::Duration;
use log::{info, error, warn};
use log_util::log_util::LogUtil;
use lazy_static::lazy_static;
use clap::Parser;

use bot_adapter::adapter::BotAdapter;
use bot_adapter::discord_http::DiscordHttp;
use bot_adapter::paint::PaintClient;
use bot_adapter::relay::relay_events;
use config::{build_redis_url, load_config};
use error::Result;
use llm::{LLMBase, LLMAPI};
use soul::policy::TurnTakingPolicy;
use soul::rag::{EmptyRetriever, HttpRetriever, Retriever};
use soul::{Soul, DEFAULT_HISTORY_LIMIT};
use util::soul_memory_store::RedisSoulMemoryStore;
use util::{mask_token, mask_url_credentials};

lazy_static! {
    static ref BASE_LOG: LogUtil = LogUtil::new_with_path("glandon_bridge", "logs");
}

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const GATEWAY_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path of the yaml configuration file
    #[arg(short = 'c', long = "config", default_value = "config.yaml")]
    config: String,

    /// Overrides AGENT_NAME
    #[arg(short = 'n', long = "agent-name")]
    agent_name: Option<String>,
}

#[tokio::main]
async fn main() {
    // Initialize logging using LogUtil
    LogUtil::init_with_logger(&BASE_LOG).expect("Failed to initialize logger");

    let args = Args::parse();
    info!("glandon_bridge starting...");

    if let Err(e) = run(args).await {
        error!("glandon_bridge stopped: {}", e);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = load_config(&args.config);
    if let Some(name) = args.agent_name {
        config.agent_name = Some(name);
    }

    let token = match config.bot_token.clone().filter(|t| !t.is_empty()) {
        Some(t) => t,
        None => return Err(crate::string_error!("BOT_TOKEN is not configured")),
    };
    info!("Using bot token {}", mask_token(&token));

    let llm_timeout = Duration::from_secs(config.llm_timeout_secs.unwrap_or(120));
    let llm = LLMAPI::new(
        config.llm_model_name.clone().unwrap_or_default(),
        config.llm_api_url.clone().unwrap_or_default(),
        config.llm_api_key.clone(),
        llm_timeout,
    )?;
    info!("Language model {} at {}", llm.get_model_name(), config.llm_api_url.as_deref().unwrap_or_default());

    let retriever: Arc<dyn Retriever> = match config.retrieval_url.as_deref() {
        Some(url) => {
            info!("Retrieving memories from {}", url);
            Arc::new(HttpRetriever::new(url, HTTP_TIMEOUT)?)
        }
        None => {
            warn!("No RETRIEVAL_URL configured; replies will not be enriched with retrieved memories.");
            Arc::new(EmptyRetriever)
        }
    };

    let redis_url = build_redis_url(&config);
    match redis_url.as_deref() {
        Some(url) => info!("Redis URL configured: {}", mask_url_credentials(url)),
        None => warn!("No REDIS_URL or REDIS_HOST/PORT found; soul memory will not survive a restart."),
    }
    let memory = RedisSoulMemoryStore::new(
        config.soul_namespace(),
        redis_url.as_deref(),
        config.redis_reconnect_max_attempts,
        config.redis_reconnect_interval_secs,
    )
    .await;

    let policy = TurnTakingPolicy::new(config.agent_name(), Arc::new(llm), retriever, Arc::new(memory));
    let soul = Arc::new(Soul::new(policy, DEFAULT_HISTORY_LIMIT));
    let events = match soul.take_events().await {
        Some(events) => events,
        None => return Err(crate::string_error!("soul events were already taken")),
    };

    let sender = Arc::new(DiscordHttp::new(
        config.discord_api_url.clone().unwrap_or_default(),
        token.clone(),
        HTTP_TIMEOUT,
    )?);
    let paint_client = PaintClient::new(config.paint_url.clone().unwrap_or_default(), HTTP_TIMEOUT)?;

    let adapter = BotAdapter::new(
        config.discord_gateway_url.clone().unwrap_or_default(),
        token,
        soul.clone(),
        sender,
        paint_client,
        config.greeting_channel_id.clone(),
    )
    .into_shared();

    tokio::spawn(soul.clone().run());
    tokio::spawn(relay_events(adapter.clone(), events));

    info!("Bot adapter initialized, connecting to discord...");
    loop {
        if let Err(e) = BotAdapter::start(adapter.clone()).await {
            error!("Bot adapter error: {}", e);
        }
        warn!("Gateway connection ended, reconnecting in {}s", GATEWAY_RECONNECT_DELAY.as_secs());
        tokio::time::sleep(GATEWAY_RECONNECT_DELAY).await;
    }
}
