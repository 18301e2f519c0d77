//! Configuration structs shared by the four binaries, in the style of
//! `rde-core`'s `PipelineSpec` family: `Deserialize`-able from YAML, with
//! `serde(default)` filling in the same defaults the CLI flags carry.

use serde::{Deserialize, Serialize};

fn default_broker_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_url")]
    pub url: String,
    pub flow_queue: String,
    pub protocol_queue: String,
    pub scoring_queue: String,
    #[serde(default = "default_lost_queue")]
    pub lost_queue: String,
    #[serde(default = "default_pop_timeout_secs")]
    pub pop_timeout_secs: u64,
}

fn default_lost_queue() -> String {
    "ids:lost".to_string()
}

fn default_pop_timeout_secs() -> u64 {
    1
}

fn default_flow_cache_capacity() -> usize {
    10_000
}

fn default_history_capacity() -> usize {
    100
}

fn default_http_ftp_counter_capacity() -> usize {
    50_000
}

fn default_lost_redump_throttle_ms() -> u64 {
    200
}

/// Tuning for the correlation engine (spec.md §3/§4.2/§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_flow_cache_capacity")]
    pub flow_cache_capacity: usize,
    #[serde(default = "default_flow_cache_capacity")]
    pub protocol_cache_capacity: usize,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// REDESIGN FLAG R6: optional cache time-windowing, disabled by default
    /// (matching the unbounded-by-time behavior of the original system).
    #[serde(default)]
    pub max_age_secs: Option<u64>,
    /// REDESIGN FLAG R4: bounds the per-key HTTP-method / FTP-command maps.
    #[serde(default = "default_http_ftp_counter_capacity")]
    pub http_ftp_counter_capacity: usize,
    pub append_log_path: String,
    pub lost_log_path: String,
    /// REDESIGN FLAG R5: minimum interval between full rewrites of the
    /// lost-record dump.
    #[serde(default = "default_lost_redump_throttle_ms")]
    pub lost_redump_throttle_ms: u64,
}

fn default_batch_size() -> usize {
    64
}

fn default_batch_timeout_ms() -> u64 {
    500
}

fn default_allowlist_refresh_secs() -> u64 {
    86_400
}

fn default_backend() -> InferenceBackendKind {
    InferenceBackendKind::Cpu
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceBackendKind {
    Cpu,
    Threaded,
}

/// Tuning for the scoring consumer (spec.md §4.4/§5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    pub model_path: String,
    pub feature_order_path: String,
    pub categorical_maps_path: String,
    /// Maps a source label (`gcloud`, `aws`, `ggen`, `canonical`, `suse`) to
    /// the URL its CIDR list is fetched from. Sources absent here are
    /// simply never populated.
    #[serde(default)]
    pub allowlist_urls: std::collections::HashMap<String, String>,
    #[serde(default = "default_allowlist_refresh_secs")]
    pub allowlist_refresh_secs: u64,
    #[serde(default = "default_backend")]
    pub backend: InferenceBackendKind,
}

/// Loads a YAML config file, failing with context the way `rde-cli`'s
/// loader does.
pub fn load_yaml<T: for<'de> Deserialize<'de>>(path: &str) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading config file {path}: {e}"))?;
    serde_yaml::from_str(&text).map_err(|e| anyhow::anyhow!("parsing config file {path}: {e}"))
}
