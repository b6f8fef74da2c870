//! Collector abstraction shared by every extraction strategy

use crate::errors::{CollectError, SourceError};
use crate::proxy::crawler::CrawlerConfig;
use crate::proxy::models::Candidate;
use crate::proxy::regex_collector::RegexCollector;
use crate::proxy::selector::SelectorCollector;
use crate::proxy::source::{CollectorType, SourceSpec};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error};

/// A source of candidates walking a fixed list of pages
#[async_trait]
pub trait Collector: Send + Sync {
    /// Move to the next page; false once every page has been visited
    fn advance(&mut self) -> bool;

    /// Name of the source specification
    fn name(&self) -> &str;

    /// Page made current by the last successful `advance`
    fn current_url(&self) -> Option<&str>;

    /// Fetch the current page and send every accepted candidate to `output`
    ///
    /// `output` is consumed, so the channel is closed when this returns, whatever the
    /// outcome. Returns the number of candidates sent.
    async fn collect(&self, output: UnboundedSender<Candidate>) -> Result<usize, CollectError>;
}

/// Build the collector matching the source's type tag
pub fn build_collector(
    spec: &SourceSpec,
    config: &CrawlerConfig,
) -> Result<Box<dyn Collector>, SourceError> {
    let built: Result<Box<dyn Collector>, SourceError> = match spec.collector_type {
        CollectorType::Selector => {
            SelectorCollector::new(spec, config).map(|c| Box::new(c) as Box<dyn Collector>)
        }
        CollectorType::Regex => {
            RegexCollector::new(spec, config).map(|c| Box::new(c) as Box<dyn Collector>)
        }
    };

    if let Err(e) = &built {
        error!("source {} is unavailable, please check its configuration: {}", spec.name, e);
    }
    built
}

/// Cursor over the expanded page list
#[derive(Debug, Clone)]
pub struct UrlCursor {
    urls: Vec<String>,
    next_index: usize,
    current: Option<usize>,
}

impl UrlCursor {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            next_index: 0,
            current: None,
        }
    }

    pub fn advance(&mut self) -> bool {
        if self.next_index >= self.urls.len() {
            return false;
        }

        self.current = Some(self.next_index);
        self.next_index += 1;
        debug!("current url: {}", self.urls[self.next_index - 1]);
        true
    }

    pub fn current(&self) -> Option<&str> {
        self.current.map(|i| self.urls[i].as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::source::ValueRule;

    fn spec(collector_type: CollectorType) -> SourceSpec {
        let (table, ip, port) = match collector_type {
            CollectorType::Selector => ("tr", "td.ip", "td.port"),
            CollectorType::Regex => (r"<tr>.*?</tr>", r"(\d+\.\d+\.\d+\.\d+)", r":(\d+)"),
        };
        SourceSpec::new("demo", collector_type, "http://example.com/{}")
            .with_parameters("1-3")
            .with_rule(ValueRule::new("table", table))
            .with_rule(ValueRule::new("ip", ip))
            .with_rule(ValueRule::new("port", port))
    }

    #[test]
    fn test_cursor_enumerates_once_in_order() {
        let mut cursor = UrlCursor::new(vec!["a".to_string(), "b".to_string()]);
        assert!(cursor.current().is_none());

        assert!(cursor.advance());
        assert_eq!(cursor.current(), Some("a"));
        assert!(cursor.advance());
        assert_eq!(cursor.current(), Some("b"));

        for _ in 0..3 {
            assert!(!cursor.advance());
            assert_eq!(cursor.current(), Some("b"));
        }
    }

    #[test]
    fn test_build_collector_dispatches_on_type() {
        let config = CrawlerConfig::default();
        for collector_type in [CollectorType::Selector, CollectorType::Regex] {
            let mut collector = build_collector(&spec(collector_type), &config).unwrap();
            assert_eq!(collector.name(), "demo");

            let mut visited = Vec::new();
            while collector.advance() {
                visited.push(collector.current_url().unwrap().to_string());
            }
            assert_eq!(
                visited,
                vec![
                    "http://example.com/1",
                    "http://example.com/2",
                    "http://example.com/3"
                ]
            );
            assert!(!collector.advance());
        }
    }

    #[test]
    fn test_build_collector_rejects_incomplete_spec() {
        let mut spec = spec(CollectorType::Selector);
        spec.value_rules.truncate(2);
        assert!(build_collector(&spec, &CrawlerConfig::default()).is_err());
    }
}
