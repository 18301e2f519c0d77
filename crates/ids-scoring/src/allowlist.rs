//! IP allow-lists: the cloud-metadata literal plus five CIDR lists fetched
//! over HTTPS and re-fetched no more than every 24 hours (spec.md §4.4).
//! The periodic-refetch-with-fallback shape is grounded on
//! `bins/market-data/src/main.rs`'s `fetch_market_data`/`run` loop.

use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::{Duration, Instant};

use ipnet::IpNet;
use tracing::warn;

const CLOUD_METADATA_IP: &str = "169.254.169.254";

/// Allow-list source order matters: the first match wins (testable
/// property 7).
const SOURCE_ORDER: [&str; 5] = ["gcloud", "aws", "ggen", "canonical", "suse"];

pub struct AllowList {
    client: reqwest::Client,
    urls: HashMap<String, String>,
    lists: HashMap<String, Vec<IpNet>>,
    last_fetch: Option<Instant>,
    refresh_interval: Duration,
}

impl AllowList {
    pub fn new(urls: HashMap<String, String>, refresh_interval: Duration) -> Self {
        AllowList {
            client: reqwest::Client::new(),
            urls,
            lists: HashMap::new(),
            last_fetch: None,
            refresh_interval,
        }
    }

    /// Pre-seeds a literal CIDR list for `label` (used at startup before
    /// the first fetch succeeds, or in tests).
    pub fn seed(&mut self, label: &str, nets: Vec<IpNet>) {
        self.lists.insert(label.to_string(), nets);
    }

    /// Re-fetches every configured CIDR list if the refresh interval has
    /// elapsed. A fetch failure logs a warning and leaves the previous
    /// list intact (spec.md §7 transient-external handling).
    pub async fn refresh_if_due(&mut self) {
        if let Some(last) = self.last_fetch {
            if last.elapsed() < self.refresh_interval {
                return;
            }
        }
        for label in SOURCE_ORDER {
            let Some(url) = self.urls.get(label).cloned() else {
                continue;
            };
            match self.fetch_one(&url).await {
                Ok(nets) => {
                    self.lists.insert(label.to_string(), nets);
                }
                Err(e) => {
                    warn!(label, error = %e, "allow-list refresh failed, keeping previous list");
                }
            }
        }
        self.last_fetch = Some(Instant::now());
    }

    async fn fetch_one(&self, url: &str) -> anyhow::Result<Vec<IpNet>> {
        let text = self.client.get(url).send().await?.error_for_status()?.text().await?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| IpNet::from_str(l).ok())
            .collect())
    }

    /// Tests `ip` against the metadata literal then each CIDR list in
    /// [`SOURCE_ORDER`], returning the first matching reason. `None` means
    /// no allow-list applies.
    pub fn reason_for(&self, ip: &str) -> Option<String> {
        if ip == CLOUD_METADATA_IP {
            return Some("Meta".to_string());
        }
        let addr = IpAddr::from_str(ip).ok()?;
        for label in SOURCE_ORDER {
            if let Some(nets) = self.lists.get(label) {
                if nets.iter().any(|n| n.contains(&addr)) {
                    return Some(label.to_string());
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_literal_short_circuits() {
        let allow = AllowList::new(HashMap::new(), Duration::from_secs(86_400));
        assert_eq!(allow.reason_for("169.254.169.254"), Some("Meta".to_string()));
    }

    #[test]
    fn first_matching_source_wins() {
        let mut allow = AllowList::new(HashMap::new(), Duration::from_secs(86_400));
        allow.seed("gcloud", vec!["10.0.0.0/8".parse().unwrap()]);
        allow.seed("aws", vec!["10.0.0.0/8".parse().unwrap()]);
        assert_eq!(allow.reason_for("10.1.2.3"), Some("gcloud".to_string()));
    }

    #[test]
    fn no_match_returns_none() {
        let allow = AllowList::new(HashMap::new(), Duration::from_secs(86_400));
        assert_eq!(allow.reason_for("8.8.8.8"), None);
    }
}
