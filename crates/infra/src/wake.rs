//! Wake channel.
//!
//! The runner and the dispatcher are poked through this channel when
//! new work is enqueued, so work starts promptly instead of waiting
//! for the next poll tick. Redis pub/sub is not durable; the periodic
//! poll is the safety net for dropped wakes.

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use edumesh_core::{TaskId, TenantId};

/// What woke up.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WakeSignal {
    /// A task was enqueued.
    #[serde(rename_all = "camelCase")]
    Task { task_id: TaskId },
    /// A sync job was appended to a tenant's journal.
    #[serde(rename_all = "camelCase")]
    Sync { tenant_id: TenantId },
}

/// Wake channel error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WakeError {
    #[error("redis error: {0}")]
    Redis(String),
    #[error("serialize error: {0}")]
    Serialize(String),
}

#[async_trait]
pub trait WakeChannel: Send + Sync {
    async fn publish(&self, signal: WakeSignal) -> Result<(), WakeError>;

    /// New receiver seeing every signal published after this call.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<WakeSignal>;
}

/// In-process wake channel for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct InProcessWake {
    subscribers: std::sync::Mutex<Vec<mpsc::UnboundedSender<WakeSignal>>>,
}

impl InProcessWake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::new())
    }
}

#[async_trait]
impl WakeChannel for InProcessWake {
    async fn publish(&self, signal: WakeSignal) -> Result<(), WakeError> {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(signal).is_ok());
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<WakeSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }
}

/// Redis pub/sub wake channel, one JSON signal per message.
#[derive(Debug, Clone)]
pub struct RedisWake {
    client: redis::Client,
    channel: String,
}

impl RedisWake {
    pub fn new(redis_url: impl AsRef<str>, channel: impl Into<String>) -> Result<Self, WakeError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| WakeError::Redis(e.to_string()))?;
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }
}

#[async_trait]
impl WakeChannel for RedisWake {
    async fn publish(&self, signal: WakeSignal) -> Result<(), WakeError> {
        let payload =
            serde_json::to_string(&signal).map_err(|e| WakeError::Serialize(e.to_string()))?;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| WakeError::Redis(e.to_string()))?;
        let _: i64 = conn
            .publish(&self.channel, payload)
            .await
            .map_err(|e| WakeError::Redis(e.to_string()))?;
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<WakeSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let channel = self.channel.clone();

        // Background task that forwards pub/sub messages. A lost
        // connection ends the task; the poll loop still makes progress.
        tokio::spawn(async move {
            let mut pubsub = match client.get_async_pubsub().await {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "wake channel connect failed");
                    return;
                }
            };
            if let Err(e) = pubsub.subscribe(&channel).await {
                warn!(error = %e, channel, "wake channel subscribe failed");
                return;
            }

            use futures_util::StreamExt as _;
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                let signal: WakeSignal = match serde_json::from_str(&payload) {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                if tx.send(signal).is_err() {
                    return;
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_process_wake_reaches_every_subscriber() {
        let wake = InProcessWake::new();
        let mut a = wake.subscribe();
        let mut b = wake.subscribe();

        let signal = WakeSignal::Sync { tenant_id: TenantId::new() };
        wake.publish(signal).await.unwrap();

        assert_eq!(a.recv().await, Some(signal));
        assert_eq!(b.recv().await, Some(signal));
    }

    #[test]
    fn wake_signal_wire_shape() {
        let signal = WakeSignal::Task { task_id: TaskId::new() };
        let v = serde_json::to_value(signal).unwrap();
        assert_eq!(v["kind"], "task");
        assert!(v["taskId"].is_string());
    }
}
