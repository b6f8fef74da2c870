//! Collector extracting rows with CSS selectors

use crate::errors::{CollectError, SourceError};
use crate::proxy::collector::{Collector, UrlCursor};
use crate::proxy::crawler::{CrawlerConfig, PageFetcher};
use crate::proxy::models::Candidate;
use crate::proxy::parser::{RowFields, RowParser};
use crate::proxy::source::{CollectorType, SourceSpec};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace};

/// How a field is read from the elements its selector matches
#[derive(Debug, Clone)]
enum FieldTarget {
    /// Concatenated text of every match
    Text,
    /// Attribute of the first match
    Attr(String),
}

#[derive(Debug, Clone)]
struct FieldSelector {
    name: String,
    selector: Selector,
    target: FieldTarget,
}

/// Collector driven by a `table` row selector plus per-field selectors
pub struct SelectorCollector {
    name: String,
    cursor: UrlCursor,
    rows: Selector,
    fields: Vec<FieldSelector>,
    fetcher: PageFetcher,
}

impl SelectorCollector {
    pub fn new(spec: &SourceSpec, config: &CrawlerConfig) -> Result<Self, SourceError> {
        let rules = spec.rule_set(CollectorType::Selector)?;
        let rows = compile(&spec.name, "table", &rules.table)?;

        let fields = rules
            .fields
            .iter()
            .map(|rule| {
                Ok(FieldSelector {
                    name: rule.name.clone(),
                    selector: compile(&spec.name, &rule.name, &rule.rule)?,
                    target: match &rule.attr {
                        Some(attr) if !attr.trim().is_empty() => FieldTarget::Attr(attr.clone()),
                        _ => FieldTarget::Text,
                    },
                })
            })
            .collect::<Result<Vec<_>, SourceError>>()?;

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

    /// Walk `document` and send every accepted row to `output`
    pub fn extract(
        &self,
        document: &str,
        source_url: &str,
        output: &UnboundedSender<Candidate>,
    ) -> usize {
        let html = Html::parse_document(document);
        let mut sent = 0;

        for row in html.select(&self.rows) {
            let fields = self.row_fields(row);
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

    fn row_fields(&self, row: ElementRef<'_>) -> RowFields {
        let mut values = RowFields::new();

        for field in &self.fields {
            let value = match &field.target {
                FieldTarget::Text => row
                    .select(&field.selector)
                    .flat_map(|e| e.text())
                    .collect::<String>(),
                FieldTarget::Attr(attr) => row
                    .select(&field.selector)
                    .next()
                    .and_then(|e| e.value().attr(attr))
                    .unwrap_or_default()
                    .to_string(),
            };

            if !value.is_empty() {
                values.insert(field.name.clone(), value);
            }
        }

        values
    }
}

fn compile(source: &str, rule: &str, selector: &str) -> Result<Selector, SourceError> {
    Selector::parse(selector).map_err(|e| SourceError::InvalidRule {
        name: source.to_string(),
        rule: rule.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl Collector for SelectorCollector {
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
