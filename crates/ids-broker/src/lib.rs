//! Broker queue abstraction, analogous to `rde-io`'s `Source`/`Sink`
//! traits: a narrow async interface with one concrete backend. The
//! original system's ingest/merge/scoring stages all talk to Redis lists
//! (`original_source`'s `ra_to_redis.py`, `zeek_to_redis.py`, and
//! `ml_processor.py`), so that is the only implementation here.

mod redis_queue;

use std::time::Duration;

use async_trait::async_trait;

pub use redis_queue::RedisBroker;

/// A named FIFO-ish queue a producer pushes lines onto and a consumer
/// blocking-pops lines from. Named like the original system's Redis lists
/// rather than "topic" or "channel" since that is the operation this
/// pipeline actually performs (`RPUSH` / `BRPOP`), not pub/sub.
#[async_trait]
pub trait BrokerQueue: Send + Sync {
    /// Appends `payload` to `queue`.
    async fn push(&self, queue: &str, payload: String) -> anyhow::Result<()>;

    /// Blocking-pops one line from `queue`, waiting up to `timeout`.
    /// Returns `None` on timeout (the normal idle case, not an error).
    async fn pop(&self, queue: &str, timeout: Duration) -> anyhow::Result<Option<String>>;
}
