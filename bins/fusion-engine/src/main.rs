//! Fusion engine: drains the flow and protocol queues, feeds each line
//! into a [`FusionEngine`], and forwards every fused record onto the
//! scoring queue as a CSV line (spec.md §4.2/§4.3/§5). CLI/tracing-init/
//! shutdown shape adapted from `rde-cli`'s `main.rs`.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ids_broker::{BrokerQueue, RedisBroker};
use ids_core::config::FusionConfig;
use ids_core::{config, telemetry};
use ids_fusion::FusionEngine;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "fusion-engine", about = "Correlates flow and protocol records into fused CSV rows")]
struct Args {
    /// YAML file deserializing into `FusionConfig`.
    #[arg(long)]
    fusion_config: String,

    #[arg(long, default_value = "redis://127.0.0.1:6379")]
    broker_url: String,

    #[arg(long, default_value = "flow_queue")]
    flow_queue: String,
    #[arg(long, default_value = "protocol_queue")]
    protocol_queue: String,
    #[arg(long, default_value = "scoring_queue")]
    scoring_queue: String,

    /// How long to sleep when both queues are empty.
    #[arg(long, default_value_t = 50)]
    idle_sleep_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init("info");
    let args = Args::parse();

    let fusion_cfg: FusionConfig = config::load_yaml(&args.fusion_config).context("loading fusion config")?;
    let mut engine = FusionEngine::new(&fusion_cfg).context("initializing fusion engine")?;

    let broker = RedisBroker::connect(&args.broker_url)
        .await
        .context("connecting to broker")?;

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_cancel.cancel();
    });

    let idle_sleep = Duration::from_millis(args.idle_sleep_ms);
    let pop_timeout = Duration::from_millis(1);
    let mut fused_count: u64 = 0;

    info!(flow_queue = %args.flow_queue, protocol_queue = %args.protocol_queue, "fusion engine running");

    while !cancel.is_cancelled() {
        let flow_line = broker.pop(&args.flow_queue, pop_timeout).await.unwrap_or_else(|e| {
            warn!(error = %e, "flow queue pop failed");
            None
        });
        let protocol_line = if flow_line.is_none() {
            broker.pop(&args.protocol_queue, pop_timeout).await.unwrap_or_else(|e| {
                warn!(error = %e, "protocol queue pop failed");
                None
            })
        } else {
            None
        };

        let now = chrono::Utc::now().timestamp();
        let fused = if let Some(line) = &flow_line {
            engine.handle_flow_line(line, now)
        } else if let Some(line) = &protocol_line {
            engine.handle_protocol_line(line, now)
        } else {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(idle_sleep) => {}
            }
            continue;
        };

        match fused {
            Ok(Some(record)) => {
                let csv_line = record.to_scoring_csv();
                if let Err(e) = broker.push(&args.scoring_queue, csv_line).await {
                    warn!(error = %e, "failed to push fused record to scoring queue");
                } else {
                    fused_count += 1;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "fusion engine failed on record"),
        }
    }

    info!(fused_count, "fusion engine stopped");
    Ok(())
}
