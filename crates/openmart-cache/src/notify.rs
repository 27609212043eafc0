//! Cross-instance notifications over Redis pub/sub.
//!
//! The hub owns the set of channel subscriptions instead of leaving them in
//! ambient global state: handlers are registered up front, `start` spawns
//! the single listener task, and `shutdown` tears it down. The listener
//! reconnects with capped exponential backoff when the subscription
//! connection drops, re-subscribing to every registered channel.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::Serialize;
use tokio::task::JoinHandle;

type Handler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

pub struct NotificationHub {
    pool: Pool,
    redis_url: String,
    handlers: Arc<DashMap<String, Handler>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationHub {
    pub fn new(pool: Pool, redis_url: impl Into<String>) -> Self {
        Self {
            pool,
            redis_url: redis_url.into(),
            handlers: Arc::new(DashMap::new()),
            listener: Mutex::new(None),
        }
    }

    /// Register a handler for a channel. Registering the same channel
    /// twice keeps the first handler.
    pub fn subscribe<F>(&self, channel: &str, handler: F)
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        if self.handlers.contains_key(channel) {
            tracing::info!(channel, "already subscribed");
            return;
        }
        self.handlers.insert(channel.to_string(), Arc::new(handler));
    }

    /// Channels with a registered handler.
    pub fn channels(&self) -> Vec<String> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }

    /// Spawn the listener task. Idempotent.
    pub fn start(&self) {
        let mut guard = self.listener.lock().expect("listener mutex poisoned");
        if guard.is_some() {
            return;
        }

        let redis_url = self.redis_url.clone();
        let handlers = Arc::clone(&self.handlers);
        *guard = Some(tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);
            const MAX_BACKOFF: Duration = Duration::from_secs(300);

            loop {
                match Self::run(&redis_url, &handlers).await {
                    Ok(()) => {
                        backoff = Duration::from_secs(1);
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "notification listener error, reconnecting"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        }));
    }

    /// Stop the listener task. Registered handlers survive a later
    /// `start`.
    pub fn shutdown(&self) {
        if let Some(handle) = self.listener.lock().expect("listener mutex poisoned").take() {
            handle.abort();
            tracing::info!("notification listener stopped");
        }
    }

    async fn run(
        redis_url: &str,
        handlers: &DashMap<String, Handler>,
    ) -> Result<(), String> {
        use futures_util::StreamExt;

        // Pub/sub needs a dedicated connection outside the pool.
        let client = redis::Client::open(redis_url)
            .map_err(|e| format!("failed to create Redis client: {e}"))?;
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| format!("failed to get pub/sub connection: {e}"))?;

        let channels: Vec<String> = handlers.iter().map(|e| e.key().clone()).collect();
        for channel in &channels {
            pubsub
                .subscribe(channel)
                .await
                .map_err(|e| format!("failed to subscribe to {channel}: {e}"))?;
        }
        tracing::info!(?channels, "subscribed to notification channels");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let channel = msg.get_channel_name().to_string();
            let Ok(payload) = msg.get_payload::<String>() else {
                tracing::warn!(channel, "failed to read notification payload");
                continue;
            };
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&payload) else {
                tracing::warn!(channel, "failed to parse notification payload");
                continue;
            };
            if let Some(handler) = handlers.get(&channel) {
                handler(value);
            }
        }
        Err("pub/sub connection closed".to_string())
    }

    /// Broadcast an event to all instances. Fail-soft like every other
    /// cache-tier operation.
    pub async fn publish<T: Serialize>(&self, channel: &str, payload: &T) -> bool {
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(channel, error = %e, "failed to serialize notification");
                return false;
            }
        };
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(channel, error = %e, "failed to get Redis connection for publish");
                return false;
            }
        };
        match conn.publish::<_, _, ()>(channel, json).await {
            Ok(()) => {
                tracing::debug!(channel, "notification published");
                true
            }
            Err(e) => {
                tracing::warn!(channel, error = %e, "failed to publish notification");
                false
            }
        }
    }
}

impl Drop for NotificationHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> NotificationHub {
        let config = deadpool_redis::Config::from_url("redis://localhost:6379");
        let pool = config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .expect("pool construction is lazy");
        NotificationHub::new(pool, "redis://localhost:6379")
    }

    #[tokio::test]
    async fn subscribe_registers_each_channel_once() {
        let hub = hub();
        hub.subscribe("order-status-change", |_| {});
        hub.subscribe("inventory-update", |_| {});
        hub.subscribe("order-status-change", |_| {});

        let mut channels = hub.channels();
        channels.sort();
        assert_eq!(channels, vec!["inventory-update", "order-status-change"]);
    }

    #[tokio::test]
    async fn shutdown_without_start_is_a_noop() {
        let hub = hub();
        hub.shutdown();
        hub.start();
        hub.shutdown();
    }
}
