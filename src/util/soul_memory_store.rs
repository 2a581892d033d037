use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use redis::aio::Connection;
use redis::{AsyncCommands, RedisError};
use log::{info, warn, error, debug};

use crate::util::mask_url_credentials;

/// Keyed string store backing the soul's long-lived memories (user notes, last messages).
///
/// Writes are last-write-wins; there is no expiry and no transactional guarantee.
#[async_trait]
pub trait SoulMemoryStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str);
}

/// Process-local store, also used as the fallback of [`RedisSoulMemoryStore`]
#[derive(Default)]
pub struct InMemorySoulMemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemorySoulMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SoulMemoryStore for InMemorySoulMemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: &str) {
        self.entries.lock().await.insert(key.to_string(), value.to_string());
    }
}

/// Where fallback entries go once Redis is back
#[async_trait]
trait FallbackSink: Send {
    async fn put(&mut self, key: &str, value: &str) -> redis::RedisResult<()>;
}

#[async_trait]
impl FallbackSink for Connection {
    async fn put(&mut self, key: &str, value: &str) -> redis::RedisResult<()> {
        self.set(key, value).await
    }
}

/// Move every fallback entry into `sink`. The fallback map is left empty so a later
/// outage cannot serve, or migrate again, values Redis has since overwritten.
async fn flush_fallback(memory_store: &Mutex<HashMap<String, String>>, sink: &mut dyn FallbackSink) -> usize {
    let entries = std::mem::take(&mut *memory_store.lock().await);
    let mut migrated_count = 0;
    for (key, value) in entries.iter() {
        match sink.put(key, value).await {
            Ok(()) => migrated_count += 1,
            Err(e) => error!("[SoulMemory] Failed to migrate {} to Redis: {}", key, e),
        }
    }
    migrated_count
}

struct RedisState {
    conn: Option<Connection>,
    use_memory: bool,
    reconnect_in_progress: bool,
}

/// Redis-backed soul memory with in-memory fallback and background reconnection.
/// Every key is prefixed with the soul namespace so several souls can share one Redis.
pub struct RedisSoulMemoryStore {
    namespace: String,
    redis_state: Arc<Mutex<RedisState>>,
    redis_url: Option<String>,
    reconnect_max_attempts: u32,
    reconnect_interval_secs: u64,
    memory_store: Arc<Mutex<HashMap<String, String>>>,
}

impl RedisSoulMemoryStore {
    /// Initialize the store, try Redis first, fallback to memory
    pub async fn new(
        namespace: impl Into<String>,
        redis_url: Option<&str>,
        max_reconnect_attempts: Option<u32>,
        reconnect_interval_secs: Option<u64>,
    ) -> Self {
        let mut redis_state = RedisState {
            conn: None,
            use_memory: true,
            reconnect_in_progress: false,
        };

        if let Some(url) = redis_url {
            match redis::Client::open(url) {
                Ok(client) => match client.get_tokio_connection().await {
                    Ok(conn) => {
                        info!("[SoulMemory] Connected to Redis at {}", mask_url_credentials(url));
                        redis_state.conn = Some(conn);
                        redis_state.use_memory = false;
                    }
                    Err(e) => {
                        error!("[SoulMemory] Failed to connect to Redis {}: {}", mask_url_credentials(url), e);
                        warn!("[SoulMemory] Falling back to in-memory soul memory due to Redis connection error.");
                    }
                },
                Err(e) => {
                    error!("[SoulMemory] Invalid Redis URL: {}", e);
                    warn!("[SoulMemory] Falling back to in-memory soul memory due to invalid Redis URL.");
                }
            }
        } else {
            warn!("[SoulMemory] No Redis URL provided. Using in-memory soul memory.");
        }

        Self {
            namespace: namespace.into(),
            redis_state: Arc::new(Mutex::new(redis_state)),
            redis_url: redis_url.map(|u| u.to_string()),
            reconnect_max_attempts: max_reconnect_attempts.unwrap_or(3),
            reconnect_interval_secs: reconnect_interval_secs.unwrap_or(60),
            memory_store: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    async fn schedule_reconnect(&self) {
        let redis_url = match &self.redis_url {
            Some(url) => url.clone(),
            None => return,
        };

        {
            let mut state = self.redis_state.lock().await;
            if state.reconnect_in_progress {
                debug!("[SoulMemory] Redis reconnection already in progress, skipping new attempt.");
                return;
            }
            state.reconnect_in_progress = true;
        }

        let state = self.redis_state.clone();
        let max_attempts = self.reconnect_max_attempts;
        let interval_secs = self.reconnect_interval_secs;
        let memory_store = self.memory_store.clone();

        tokio::spawn(async move {
            for attempt in 1..=max_attempts {
                match redis::Client::open(redis_url.as_str()) {
                    Ok(client) => match client.get_tokio_connection().await {
                        Ok(mut conn) => {
                            info!("[SoulMemory] Redis reconnection succeeded on attempt {}", attempt);

                            // Writers fall back to memory under the state lock, so nothing lands mid-migration
                            let mut guard = state.lock().await;
                            let migrated_count = flush_fallback(&memory_store, &mut conn).await;
                            info!("[SoulMemory] Migrated {} entries from memory to Redis", migrated_count);
                            info!("[SoulMemory] Cleared in-memory soul memory after Redis reconnection");

                            guard.conn = Some(conn);
                            guard.use_memory = false;
                            guard.reconnect_in_progress = false;
                            return;
                        }
                        Err(e) => {
                            warn!("[SoulMemory] Redis reconnection attempt {} failed: {}", attempt, e);
                        }
                    },
                    Err(e) => {
                        error!("[SoulMemory] Invalid Redis URL during reconnection: {}", e);
                        break;
                    }
                }

                if attempt < max_attempts {
                    sleep(Duration::from_secs(interval_secs)).await;
                }
            }

            let mut guard = state.lock().await;
            guard.reconnect_in_progress = false;
            warn!(
                "[SoulMemory] Exhausted Redis reconnection attempts ({} tries). Continuing with in-memory storage.",
                max_attempts
            );
        });
    }
}

#[async_trait]
impl SoulMemoryStore for RedisSoulMemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        let key = self.namespaced(key);
        let mut need_reconnect = false;
        let value;

        {
            let mut state = self.redis_state.lock().await;
            if !state.use_memory {
                if let Some(conn) = state.conn.as_mut() {
                    let result: Result<Option<String>, RedisError> = conn.get(&key).await;
                    match result {
                        Ok(val) => return val,
                        Err(e) => {
                            error!("[SoulMemory] Failed to read {} from Redis: {}", key, e);
                            state.use_memory = true;
                            state.conn = None;
                            need_reconnect = true;
                            warn!("[SoulMemory] Switching to in-memory soul memory due to Redis error.");
                        }
                    }
                } else {
                    state.use_memory = true;
                    need_reconnect = true;
                }
            } else if self.redis_url.is_some() && !state.reconnect_in_progress {
                need_reconnect = true;
            }
            value = self.memory_store.lock().await.get(&key).cloned();
        }

        if need_reconnect {
            self.schedule_reconnect().await;
        }
        value
    }

    async fn set(&self, key: &str, value: &str) {
        let key = self.namespaced(key);
        let mut need_reconnect = false;

        {
            let mut state = self.redis_state.lock().await;
            if !state.use_memory {
                if let Some(conn) = state.conn.as_mut() {
                    let result: Result<(), RedisError> = conn.set(&key, value).await;
                    match result {
                        Ok(_) => {
                            debug!("[SoulMemory] Stored {} in Redis", key);
                            return;
                        }
                        Err(e) => {
                            error!("[SoulMemory] Failed to store {} in Redis: {}", key, e);
                            state.use_memory = true;
                            state.conn = None;
                            need_reconnect = true;
                            warn!("[SoulMemory] Switching to in-memory soul memory due to Redis error.");
                        }
                    }
                } else {
                    state.use_memory = true;
                    need_reconnect = true;
                }
            } else if self.redis_url.is_some() && !state.reconnect_in_progress {
                need_reconnect = true;
            }
            self.memory_store.lock().await.insert(key.clone(), value.to_string());
            debug!("[SoulMemory] Stored {} in memory", key);
        }

        if need_reconnect {
            self.schedule_reconnect().await;
        }
    }
}
