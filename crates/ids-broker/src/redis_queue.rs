//! Redis-list-backed `BrokerQueue`. Push is `RPUSH`, pop is `BRPOP` with a
//! timeout, mirroring `original_source`'s producer/consumer scripts
//! exactly (`ra_to_redis.py` pushes with `rpush`, `ml_processor.py`
//! consumes with `r.brpop(queue, timeout=1)`).

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use exponential_backoff::Backoff;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

use crate::BrokerQueue;

/// Retries applied to an already-established connection riding out a
/// broker restart (spec.md §4.4's steady-state reconnect requirement).
/// The *initial* connect below is deliberately not covered by this: an
/// unreachable broker at startup is fatal, not retried.
const RECONNECT_RETRIES: u32 = 8;
const RECONNECT_MIN_BACKOFF: Duration = Duration::from_millis(200);
const RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct RedisBroker {
    manager: ConnectionManager,
}

impl RedisBroker {
    /// Connects to `url` once. A failure here is fatal to the process
    /// (spec.md's "cannot reach broker at startup" is an abort, not a
    /// retry case) so this makes a single attempt and propagates the
    /// error immediately.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(RedisBroker { manager })
    }

    /// Runs `op` against a cloned connection handle, retrying with
    /// exponential backoff if the broker connection was lost mid-session.
    async fn with_reconnect_backoff<F, Fut, T>(&self, op_name: &'static str, mut op: F) -> anyhow::Result<T>
    where
        F: FnMut(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let backoff = Backoff::new(RECONNECT_RETRIES, RECONNECT_MIN_BACKOFF, RECONNECT_MAX_BACKOFF);
        let mut last_err = None;
        for duration in &backoff {
            match op(self.manager.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(op_name, error = %e, "broker operation failed, retrying");
                    last_err = Some(e);
                    tokio::time::sleep(duration).await;
                }
            }
        }
        Err(anyhow::anyhow!(
            "exhausted {RECONNECT_RETRIES} retries on broker operation {op_name}: {:?}",
            last_err
        ))
    }
}

#[async_trait]
impl BrokerQueue for RedisBroker {
    async fn push(&self, queue: &str, payload: String) -> anyhow::Result<()> {
        self.with_reconnect_backoff("push", |mut conn| {
            let queue = queue.to_string();
            let payload = payload.clone();
            async move { conn.rpush::<_, _, ()>(queue, payload).await }
        })
        .await
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> anyhow::Result<Option<String>> {
        let reply: Option<(String, String)> = self
            .with_reconnect_backoff("pop", |mut conn| {
                let queue = queue.to_string();
                async move { conn.brpop(queue, timeout.as_secs_f64()).await }
            })
            .await?;
        Ok(reply.map(|(_, payload)| payload))
    }
}
