//! Protocol adapter: follows the three Zeek-style log files (`conn`,
//! `http`, `ftp`) from their current end, tolerating rotation by reopening
//! on identity change, tags each line with its `log_kind`, and pushes it
//! onto the protocol queue (spec.md §4.1, §9's tail-F semantics). No
//! direct teacher analogue existed for file-tailing; this follows the
//! teacher's CLI/tracing/shutdown idiom from `rde-cli`.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ids_broker::{BrokerQueue, RedisBroker};
use ids_core::telemetry;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader, SeekFrom};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "protocol-adapter", about = "Zeek-style protocol log tailer")]
struct Args {
    /// Directory containing the three per-log-kind files.
    #[arg(long)]
    watch_dir: PathBuf,

    #[arg(long, default_value = "conn.log")]
    conn_file: String,
    #[arg(long, default_value = "http.log")]
    http_file: String,
    #[arg(long, default_value = "ftp.log")]
    ftp_file: String,

    #[arg(long, default_value = "redis://127.0.0.1:6379")]
    broker_url: String,

    #[arg(long, default_value = "protocol_queue")]
    protocol_queue: String,

    #[arg(long, default_value_t = 200)]
    poll_interval_ms: u64,
}

/// `(device, inode, size)` used to detect rotation: a new file at the same
/// path, or a truncated one, both change this tuple.
type FileIdentity = (u64, u64, u64);

fn file_identity(path: &Path) -> Option<FileIdentity> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.dev(), meta.ino(), meta.size()))
}

fn tag_log_kind(line: &str, log_kind: &str) -> Result<String> {
    let mut value: serde_json::Value = serde_json::from_str(line)?;
    let obj = value
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("protocol line is not a JSON object"))?;
    obj.insert("log_kind".to_string(), serde_json::Value::String(log_kind.to_string()));
    Ok(value.to_string())
}

async fn tail_file(
    path: PathBuf,
    log_kind: &'static str,
    queue: String,
    broker: Arc<RedisBroker>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let Ok(file) = tokio::fs::File::open(&path).await else {
            tokio::time::sleep(Duration::from_secs(1)).await;
            continue;
        };
        let mut reader = BufReader::new(file);
        if let Err(e) = reader.seek(SeekFrom::End(0)).await {
            warn!(error = %e, kind = log_kind, "failed to seek to end, retrying");
            tokio::time::sleep(Duration::from_secs(1)).await;
            continue;
        }
        let mut identity = file_identity(&path);
        let mut line = String::new();

        loop {
            if cancel.is_cancelled() {
                return;
            }
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    tokio::time::sleep(poll_interval).await;
                    let current = file_identity(&path);
                    let rotated = match (current, identity) {
                        (Some((dev, ino, size)), Some((prev_dev, prev_ino, prev_size))) => {
                            dev != prev_dev || ino != prev_ino || size < prev_size
                        }
                        (None, Some(_)) => true,
                        _ => false,
                    };
                    if rotated {
                        debug!(kind = log_kind, "log rotated, reopening");
                        break;
                    }
                    identity = current;
                }
                Ok(_) => {
                    let text = line.trim();
                    if text.is_empty() || text.starts_with('#') {
                        continue;
                    }
                    match tag_log_kind(text, log_kind) {
                        Ok(payload) => {
                            if let Err(e) = broker.push(&queue, payload).await {
                                warn!(error = %e, kind = log_kind, "failed to push protocol record");
                            }
                        }
                        Err(e) => debug!(error = %e, kind = log_kind, "malformed protocol line, skipping"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, kind = log_kind, "read error, reopening");
                    break;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init("info");
    let args = Args::parse();

    let broker = Arc::new(
        RedisBroker::connect(&args.broker_url)
            .await
            .context("connecting to broker")?,
    );

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_cancel.cancel();
    });

    let poll_interval = Duration::from_millis(args.poll_interval_ms);
    let followers = [
        (args.watch_dir.join(&args.conn_file), "conn"),
        (args.watch_dir.join(&args.http_file), "http"),
        (args.watch_dir.join(&args.ftp_file), "ftp"),
    ];

    let mut handles = Vec::new();
    for (path, kind) in followers {
        let broker = broker.clone();
        let queue = args.protocol_queue.clone();
        let cancel = cancel.child_token();
        handles.push(tokio::spawn(tail_file(path, kind, queue, broker, poll_interval, cancel)));
    }

    info!(dir = %args.watch_dir.display(), "protocol adapter watching");
    for handle in handles {
        handle.await.ok();
    }
    Ok(())
}
