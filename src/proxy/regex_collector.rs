//! Collector extracting rows with regular expressions
//!
//! The `table` rule matches one span of document text per row; every field rule is
//! applied inside that span and yields its first capture group, or the whole match
//! when the pattern has no groups.

use crate::errors::{CollectError, SourceError};
use crate::proxy::collector::{Collector, UrlCursor};
use crate::proxy::crawler::{CrawlerConfig, PageFetcher};
use crate::proxy::models::Candidate;
use crate::proxy::parser::{RowFields, RowParser};
use crate::proxy::source::{CollectorType, SourceSpec};
use async_trait::async_trait;
use regex::Regex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace, warn};

pub struct RegexCollector {
    name: String,
    cursor: UrlCursor,
    rows: Regex,
    fields: Vec<(String, Regex)>,
    fetcher: PageFetcher,
}

impl RegexCollector {
    pub fn new(spec: &SourceSpec, config: &CrawlerConfig) -> Result<Self, SourceError> {
        let rules = spec.rule_set(CollectorType::Regex)?;
        let rows = compile(&spec.name, "table", &rules.table)?;

        let mut fields = Vec::with_capacity(rules.fields.len());
        for rule in &rules.fields {
            if rule.attr.is_some() {
                warn!(
                    "source {} rule {} has an attribute, regex sources ignore it",
                    spec.name, rule.name
                );
            }
            fields.push((rule.name.clone(), compile(&spec.name, &rule.name, &rule.rule)?));
        }

        let charset = spec.needs_decoding().then(|| spec.charset.clone());
        let fetcher = PageFetcher::new(config.clone(), charset)?;

        Ok(Self {
            name: spec.name.clone(),
            cursor: UrlCursor::new(spec.urls()?),
            rows,
            fields,
            fetcher,
        })
    }

    pub fn extract(
        &self,
        document: &str,
        source_url: &str,
        output: &UnboundedSender<Candidate>,
    ) -> usize {
        let mut sent = 0;

        for row in self.rows.find_iter(document) {
            let fields = self.row_fields(row.as_str());
            let Some(candidate) = RowParser::parse_row(&fields, source_url) else {
                trace!("rejected row {:?} from {}", fields, source_url);
                continue;
            };

            if output.send(candidate).is_err() {
                debug!("receiver for {} dropped, stop extracting", source_url);
                break;
            }
            sent += 1;
        }

        sent
    }

    fn row_fields(&self, row: &str) -> RowFields {
        self.fields
            .iter()
            .filter_map(|(name, pattern)| {
                let caps = pattern.captures(row)?;
                let value = caps.get(1).or_else(|| caps.get(0))?.as_str();
                (!value.is_empty()).then(|| (name.clone(), value.to_string()))
            })
            .collect()
    }
}

fn compile(source: &str, rule: &str, pattern: &str) -> Result<Regex, SourceError> {
    Regex::new(pattern).map_err(|e| SourceError::InvalidRule {
        name: source.to_string(),
        rule: rule.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl Collector for RegexCollector {
    fn advance(&mut self) -> bool {
        self.cursor.advance()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn current_url(&self) -> Option<&str> {
        self.cursor.current()
    }

    async fn collect(&self, output: UnboundedSender<Candidate>) -> Result<usize, CollectError> {
        let url = self.current_url().ok_or(CollectError::NoCurrentUrl)?;
        let document = self.fetcher.fetch(url).await?;
        let sent = self.extract(&document, url, &output);

        debug!("finish collect url: {}, {} candidates", url, sent);
        Ok(sent)
    }
}
