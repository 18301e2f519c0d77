//! Batch processing: vectorize a batch of scoring-queue CSV lines, invoke
//! the inference backend, apply allow-listing, and render the four
//! tagged verdict lines (spec.md §4.4, testable properties 6 and 7, end-
//! to-end scenario S6). The reader-thread/bounded-channel plumbing this
//! feeds lives in the `scoring-consumer` binary, matching how `rde-cli`
//! keeps channel wiring in `main.rs` and business logic in library crates.

use std::fs::OpenOptions;
use std::io::Write;

use ids_core::record::SCORING_CSV_COLUMNS;
use tracing::{error, warn};

use crate::allowlist::AllowList;
use crate::feature_store::FeatureStore;
use crate::inference::InferenceBackend;

const ATTACK_PROBABILITY_THRESHOLD: f32 = 0.5;
const HIGH_CONFIDENCE_THRESHOLD: f32 = 0.70;

#[derive(Debug, Clone)]
pub struct Verdict {
    pub display_line: String,
    pub to_stderr: bool,
    pub is_attack: bool,
    pub probability: f32,
    pub allow_reason: Option<String>,
}

pub struct BatchProcessor {
    feature_store: FeatureStore,
    backend: Box<dyn InferenceBackend>,
    allowlist: AllowList,
    attack_log_path: String,
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(line.as_bytes());
    match reader.records().next() {
        Some(Ok(record)) => record.iter().map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

impl BatchProcessor {
    pub fn new(
        feature_store: FeatureStore,
        backend: Box<dyn InferenceBackend>,
        allowlist: AllowList,
        attack_log_path: String,
    ) -> Self {
        BatchProcessor {
            feature_store,
            backend,
            allowlist,
            attack_log_path,
        }
    }

    fn append_attack_log(&self, line: &str) -> anyhow::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.attack_log_path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Processes one batch of scoring-queue lines, returning one verdict
    /// per line that parsed successfully. `now` is epoch seconds, passed
    /// in rather than read from the clock so this stays deterministically
    /// testable.
    pub async fn process_batch(&mut self, lines: &[String], now: i64) -> anyhow::Result<Vec<Verdict>> {
        self.allowlist.refresh_if_due().await;

        let cols = self.feature_store.num_features();
        let mut parsed: Vec<Vec<String>> = Vec::with_capacity(lines.len());
        let mut matrix = Vec::with_capacity(lines.len() * cols);

        for line in lines {
            let fields = split_csv_line(line);
            if fields.len() != SCORING_CSV_COLUMNS.len() {
                warn!(line, "scoring row has wrong column count, skipping");
                continue;
            }
            let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
            matrix.extend(self.feature_store.vectorize_row(&refs));
            parsed.push(fields);
        }

        if parsed.is_empty() {
            return Ok(Vec::new());
        }

        let probs = match self.backend.predict_proba(&matrix, parsed.len(), cols) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, batch_len = parsed.len(), cols, "inference failed on batch, skipping");
                return Ok(Vec::new());
            }
        };

        let field_index = |name: &str| SCORING_CSV_COLUMNS.iter().position(|c| *c == name).unwrap();
        let saddr_idx = field_index("saddr");
        let sport_idx = field_index("sport");
        let daddr_idx = field_index("daddr");
        let dport_idx = field_index("dport");
        let stime_idx = field_index("stime");

        let mut verdicts = Vec::with_capacity(parsed.len());
        for (fields, probability) in parsed.iter().zip(probs) {
            let saddr = &fields[saddr_idx];
            let sport = &fields[sport_idx];
            let daddr = &fields[daddr_idx];
            let dport = &fields[dport_idx];
            let stime: i64 = fields[stime_idx].parse().unwrap_or(0);
            let latency = (now - stime) as f64;
            let arrow = format!("{saddr}:{sport} -> {daddr}:{dport}");

            let allow_reason = self
                .allowlist
                .reason_for(saddr)
                .or_else(|| self.allowlist.reason_for(daddr));
            let is_attack = probability >= ATTACK_PROBABILITY_THRESHOLD;

            if is_attack && allow_reason.is_none() {
                self.append_attack_log(&arrow)?;
            }

            let (display_line, to_stderr) = match (&allow_reason, is_attack) {
                (Some(reason), true) => (format!("⏩ IGNORED({reason}) {arrow} lat={latency:.3}s"), false),
                (_, true) if probability >= HIGH_CONFIDENCE_THRESHOLD => {
                    (format!("🚨 {arrow} conf={probability:.3} lat={latency:.3}s"), true)
                }
                (_, true) => (format!("⚠️ {arrow} conf={probability:.3} lat={latency:.3}s"), false),
                _ => (format!("✅ Normal conf={probability:.3} lat={latency:.3}s {arrow}"), false),
            };

            verdicts.push(Verdict {
                display_line,
                to_stderr,
                is_attack,
                probability,
                allow_reason,
            });
        }

        Ok(verdicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{CpuBackend, Weights};
    use std::collections::HashMap as Map;

    #[test]
    fn split_csv_line_matches_column_count() {
        let line = (0..SCORING_CSV_COLUMNS.len())
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",");
        assert_eq!(split_csv_line(&line).len(), SCORING_CSV_COLUMNS.len());
    }

    #[tokio::test]
    async fn metadata_ip_is_ignored_despite_high_probability() {
        let feature_store = FeatureStore {
            feature_order: vec!["dport".to_string()],
            categorical_maps: Map::new(),
        };
        let weights = Weights::load("/dev/null", 1).unwrap_or_else(|_| panic!("weights load"));
        let backend: Box<dyn InferenceBackend> = Box::new(CpuBackend::new(weights));
        let mut allow = AllowList::new(Map::new(), std::time::Duration::from_secs(86_400));
        allow.seed("gcloud", vec![]);
        let tmp = std::env::temp_dir().join(format!("attack-{}.log", std::process::id()));
        let mut processor = BatchProcessor::new(feature_store, backend, allow, tmp.to_string_lossy().to_string());

        let mut fields = vec!["0".to_string(); SCORING_CSV_COLUMNS.len()];
        let idx = |name: &str| SCORING_CSV_COLUMNS.iter().position(|c| *c == name).unwrap();
        fields[idx("saddr")] = "169.254.169.254".to_string();
        fields[idx("stime")] = "1000".to_string();
        let line = fields.join(",");

        let verdicts = processor.process_batch(&[line], 1000).await.unwrap();
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].allow_reason.as_deref(), Some("Meta"));
    }
}
