//! Scoring consumer: a blocking-pop reader task feeds a bounded channel,
//! the main task drains it into batches (by size or by timeout) and runs
//! them through [`BatchProcessor`] (spec.md §4.4/§5). CLI/tracing-init/
//! shutdown shape adapted from `rde-cli`'s `main.rs`; the reader/channel
//! split mirrors how `kafka-producer` keeps ingestion off the hot path.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ids_broker::{BrokerQueue, RedisBroker};
use ids_core::config::{InferenceBackendKind, ScoringConfig};
use ids_core::{config, telemetry};
use ids_scoring::{AllowList, BatchProcessor, CpuBackend, FeatureStore, InferenceBackend, ThreadedBackend, Weights};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const READER_CHANNEL_CAPACITY: usize = 16_384;

#[derive(Parser, Debug)]
#[command(name = "scoring-consumer", about = "Batched inference over fused scoring-queue rows")]
struct Args {
    /// YAML file deserializing into `ScoringConfig`.
    #[arg(long)]
    scoring_config: String,

    #[arg(long, default_value = "redis://127.0.0.1:6379")]
    broker_url: String,
    #[arg(long, default_value = "scoring_queue")]
    scoring_queue: String,

    #[arg(long, default_value = "attacks.log")]
    attack_log_path: String,

    #[arg(long, default_value_t = 4)]
    threads: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init("info");
    let args = Args::parse();

    let scoring_cfg: ScoringConfig =
        config::load_yaml(&args.scoring_config).context("loading scoring config")?;

    let feature_store = FeatureStore::load(&scoring_cfg.feature_order_path, &scoring_cfg.categorical_maps_path)
        .context("loading feature store")?;
    let weights = Weights::load(&scoring_cfg.model_path, feature_store.num_features())
        .context("loading model weights")?;
    let backend: Box<dyn InferenceBackend> = match scoring_cfg.backend {
        InferenceBackendKind::Cpu => Box::new(CpuBackend::new(weights)),
        InferenceBackendKind::Threaded => Box::new(ThreadedBackend::new(weights, args.threads.max(1))),
    };

    let allowlist = AllowList::new(scoring_cfg.allowlist_urls.clone(), Duration::from_secs(scoring_cfg.allowlist_refresh_secs));
    let mut processor = BatchProcessor::new(feature_store, backend, allowlist, args.attack_log_path.clone());

    let broker = RedisBroker::connect(&args.broker_url)
        .await
        .context("connecting to broker")?;

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_cancel.cancel();
    });

    let (tx, mut rx) = mpsc::channel::<String>(READER_CHANNEL_CAPACITY);
    let reader_cancel = cancel.child_token();
    let reader_queue = args.scoring_queue.clone();
    let reader_handle = tokio::spawn(async move {
        let pop_timeout = Duration::from_secs(1);
        while !reader_cancel.is_cancelled() {
            match broker.pop(&reader_queue, pop_timeout).await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "scoring queue pop failed");
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            }
        }
    });

    let batch_size = scoring_cfg.batch_size;
    let batch_timeout = Duration::from_millis(scoring_cfg.batch_timeout_ms);
    let mut buffer: Vec<String> = Vec::with_capacity(batch_size);
    let mut processed: u64 = 0;

    info!(queue = %args.scoring_queue, batch_size, "scoring consumer running");

    loop {
        if cancel.is_cancelled() && buffer.is_empty() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                if buffer.is_empty() {
                    break;
                }
            }
            maybe_line = rx.recv() => {
                match maybe_line {
                    Some(line) => buffer.push(line),
                    None => {
                        if buffer.is_empty() {
                            break;
                        }
                    }
                }
            }
            _ = tokio::time::sleep(batch_timeout), if !buffer.is_empty() => {}
        }

        if buffer.len() >= batch_size || (!buffer.is_empty() && rx.is_empty()) {
            let now = chrono::Utc::now().timestamp();
            match processor.process_batch(&buffer, now).await {
                Ok(verdicts) => {
                    processed += verdicts.len() as u64;
                    for verdict in verdicts {
                        if verdict.to_stderr {
                            eprintln!("{}", verdict.display_line);
                        } else {
                            println!("{}", verdict.display_line);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "batch processing failed"),
            }
            buffer.clear();
        }
    }

    reader_handle.await.ok();
    info!(processed, "scoring consumer stopped");
    Ok(())
}
