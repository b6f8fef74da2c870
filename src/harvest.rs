//! Harvester driving collectors into the store

use crate::database::MirroredStore;
use crate::proxy::{build_collector, Candidate, Collector, CrawlerConfig, ProxyRecord, SourceSpec};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Default number of sources harvested at once
const DEFAULT_CONCURRENCY: usize = 4;

/// Configuration for the harvester
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Number of sources collected concurrently
    pub concurrency: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl HarvestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// Totals of one harvest run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestSummary {
    pub sources: usize,
    pub skipped_sources: usize,
    pub pages: usize,
    pub failed_pages: usize,
    /// Candidates received from collectors
    pub accepted: usize,
    /// Candidates stored under a key that was not present before
    pub added: usize,
    /// Candidates that could not be written
    pub store_errors: usize,
}

impl HarvestSummary {
    fn merge(&mut self, other: HarvestSummary) {
        self.sources += other.sources;
        self.skipped_sources += other.skipped_sources;
        self.pages += other.pages;
        self.failed_pages += other.failed_pages;
        self.accepted += other.accepted;
        self.added += other.added;
        self.store_errors += other.store_errors;
    }
}

/// Runs collectors concurrently and stores what they find
pub struct Harvester {
    store: Arc<MirroredStore>,
    crawler: CrawlerConfig,
    config: HarvestConfig,
}

impl Harvester {
    pub fn new(store: Arc<MirroredStore>, crawler: CrawlerConfig, config: HarvestConfig) -> Self {
        Self {
            store,
            crawler,
            config,
        }
    }

    /// Harvest every source; broken sources are skipped
    pub async fn run(&self, specs: &[SourceSpec]) -> HarvestSummary {
        let mut summary = HarvestSummary::default();
        let mut collectors = Vec::new();

        for spec in specs {
            match build_collector(spec, &self.crawler) {
                Ok(collector) => collectors.push(collector),
                Err(_) => summary.skipped_sources += 1,
            }
        }

        let results = stream::iter(collectors)
            .map(|collector| self.run_collector(collector))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        for result in results {
            summary.merge(result);
        }

        info!(
            "harvest finished: {} sources ({} skipped), {} pages ({} failed), {} accepted, {} new",
            summary.sources,
            summary.skipped_sources,
            summary.pages,
            summary.failed_pages,
            summary.accepted,
            summary.added
        );
        summary
    }

    /// Walk every page of one collector
    pub async fn run_collector(&self, mut collector: Box<dyn Collector>) -> HarvestSummary {
        let mut summary = HarvestSummary {
            sources: 1,
            ..Default::default()
        };

        while collector.advance() {
            summary.pages += 1;
            let (tx, rx) = mpsc::unbounded_channel();

            let (collected, stored) = tokio::join!(collector.collect(tx), self.store_all(rx));
            summary.merge(stored);

            if let Err(e) = collected {
                warn!("{}: {}", collector.name(), e);
                summary.failed_pages += 1;
            }
        }

        info!(
            "{}: {} pages, {} accepted, {} new",
            collector.name(),
            summary.pages,
            summary.accepted,
            summary.added
        );
        summary
    }

    async fn store_all(&self, mut rx: mpsc::UnboundedReceiver<Candidate>) -> HarvestSummary {
        let mut summary = HarvestSummary::default();

        while let Some(candidate) = rx.recv().await {
            summary.accepted += 1;
            let key = candidate.key();

            match self.store.add_or_update(&key, &ProxyRecord::new(candidate)).await {
                Ok(true) => summary.added += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("failed to store {}: {}", key, e);
                    summary.store_errors += 1;
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::crawler::test_server;
    use crate::proxy::{CollectorType, ValueRule};
    use tempfile::TempDir;

    const PAGE_1: &str = r#"<table>
        <tr><td class="ip">1.1.1.1</td><td class="port">80</td><td class="speed">0.3秒</td></tr>
        <tr><td class="ip">2.2.2.2</td><td class="port">8080</td><td class="speed">4秒</td></tr>
    </table>"#;

    const PAGE_2: &str = r#"<table>
        <tr><td class="ip">1.1.1.1</td><td class="port">80</td><td class="speed">0.2秒</td></tr>
        <tr><td class="ip">3.3.3.3</td><td class="port">3128</td><td class="speed">1秒</td></tr>
    </table>"#;

    fn spec(name: &str, url: &str) -> SourceSpec {
        SourceSpec::new(name, CollectorType::Selector, url)
            .with_rule(ValueRule::new("table", "tr"))
            .with_rule(ValueRule::new("ip", "td.ip"))
            .with_rule(ValueRule::new("port", "td.port"))
            .with_rule(ValueRule::new("speed", "td.speed"))
    }

    #[test]
    fn test_harvest_config_builder() {
        assert_eq!(HarvestConfig::default().concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(HarvestConfig::new().with_concurrency(0).concurrency, 1);
        assert_eq!(HarvestConfig::new().with_concurrency(8).concurrency, 8);
    }

    #[tokio::test]
    async fn test_run_stores_candidates() {
        let first = test_server::serve(test_server::ok("text/html", PAGE_1.as_bytes())).await;
        let second = test_server::serve(test_server::ok("text/html", PAGE_2.as_bytes())).await;
        let down = test_server::closed_port().await;

        let mut broken = spec("broken", &first);
        broken.value_rules.truncate(1);

        let specs = vec![
            spec("first", &first),
            spec("second", &second),
            spec("down", &down),
            broken,
        ];

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("harvest.db");
        let store = Arc::new(
            MirroredStore::open(&path.to_string_lossy(), "proxies")
                .await
                .unwrap(),
        );

        let harvester = Harvester::new(
            Arc::clone(&store),
            CrawlerConfig::default(),
            HarvestConfig::new().with_concurrency(2),
        );
        let summary = harvester.run(&specs).await;

        assert_eq!(summary.sources, 3);
        assert_eq!(summary.skipped_sources, 1);
        assert_eq!(summary.pages, 3);
        assert_eq!(summary.failed_pages, 1);
        assert_eq!(summary.accepted, 3);
        assert_eq!(summary.added, 2);
        assert_eq!(summary.store_errors, 0);

        assert_eq!(store.len(), 2);
        let record: ProxyRecord = store.get_as("3.3.3.3:3128").unwrap().unwrap();
        assert_eq!(record.candidate.latency_secs, 1.0);
        assert_eq!(record.candidate.source_url, second);
        assert!(store.exist("1.1.1.1:80"));
        assert!(!store.exist("2.2.2.2:8080"));
    }
}
