//! Flow adapter: reads line-delimited tabular rows off stdin, maps each row
//! to a JSON object using an out-of-band ordered column list, and pushes
//! it onto the flow queue (spec.md §4.1). CLI/tracing-init/shutdown shape
//! adapted from `rde-cli`'s `main.rs`; the periodic throughput logging and
//! sampled debug printing are grounded on
//! `original_source/.../ra_to_redis.py`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ids_broker::{BrokerQueue, RedisBroker};
use ids_core::telemetry;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "flow-adapter", about = "Argus-style tabular flow ingest")]
struct Args {
    /// Ordered column names, comma-separated, matching the tabular exporter's output.
    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,

    /// Discard the first input line (a header row) instead of decoding it.
    #[arg(long)]
    skip_first: bool,

    #[arg(long, default_value = "redis://127.0.0.1:6379")]
    broker_url: String,

    #[arg(long, default_value = "flow_queue")]
    flow_queue: String,

    /// Print a debug sample of the row every N rows.
    #[arg(long, default_value_t = 100)]
    sample_every: u64,

    /// Print a total-count progress log every N seconds.
    #[arg(long, default_value_t = 10)]
    log_interval_secs: u64,
}

fn row_to_json(fields: &[String], row: &str) -> String {
    let values: Vec<&str> = row.split(',').collect();
    let mut obj = serde_json::Map::new();
    for (i, name) in fields.iter().enumerate() {
        let value = values.get(i).copied().unwrap_or("").trim();
        obj.insert(name.clone(), serde_json::Value::String(value.to_string()));
    }
    serde_json::Value::Object(obj).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init("info");
    let args = Args::parse();

    if args.fields.is_empty() {
        anyhow::bail!("--fields must list the tabular column order");
    }

    let broker = RedisBroker::connect(&args.broker_url)
        .await
        .context("connecting to broker")?;

    let cancel = CancellationToken::new();
    let total = Arc::new(AtomicU64::new(0));

    let progress_cancel = cancel.child_token();
    let progress_total = total.clone();
    let progress_interval = Duration::from_secs(args.log_interval_secs.max(1));
    let progress_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(progress_interval);
        loop {
            tokio::select! {
                _ = progress_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    info!(total = progress_total.load(Ordering::Relaxed), "flow rows sent");
                }
            }
        }
    });

    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_cancel.cancel();
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut is_first = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                if is_first {
                    is_first = false;
                    if args.skip_first {
                        continue;
                    }
                }
                if line.trim().is_empty() {
                    continue;
                }
                let payload = row_to_json(&args.fields, &line);
                if let Err(e) = broker.push(&args.flow_queue, payload.clone()).await {
                    warn!(error = %e, "failed to push flow record, skipping row");
                    continue;
                }
                let count = total.fetch_add(1, Ordering::Relaxed) + 1;
                if count % args.sample_every == 0 {
                    debug!(count, sample = %payload, "flow row sample");
                }
            }
        }
    }

    cancel.cancel();
    progress_handle.await.ok();
    info!(total = total.load(Ordering::Relaxed), "flow adapter stopped");
    Ok(())
}
