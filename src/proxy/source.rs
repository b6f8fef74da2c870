//! Source specifications describing where and how to harvest proxies

use crate::errors::SourceError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Name of the mandatory rule selecting one element per candidate row
pub const TABLE_RULE: &str = "table";

/// Placeholder substituted by each expansion parameter
pub const URL_PLACEHOLDER: &str = "{}";

const DEFAULT_CHARSET: &str = "utf-8";

/// Widest `N-M` parameter range accepted in one item
pub const MAX_RANGE_SPAN: u64 = 10_000;

/// Extraction strategy of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CollectorType {
    #[default]
    Selector,
    Regex,
}

impl fmt::Display for CollectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectorType::Selector => write!(f, "selector"),
            CollectorType::Regex => write!(f, "regex"),
        }
    }
}

/// One named extraction rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRule {
    pub name: String,
    /// Selector path (or pattern, for regex sources)
    pub rule: String,
    /// Attribute to read instead of the element text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,
}

impl ValueRule {
    pub fn new(name: &str, rule: &str) -> Self {
        Self {
            name: name.to_string(),
            rule: rule.to_string(),
            attr: None,
        }
    }

    pub fn with_attr(name: &str, rule: &str, attr: &str) -> Self {
        Self {
            name: name.to_string(),
            rule: rule.to_string(),
            attr: Some(attr.to_string()),
        }
    }
}

/// Configuration of one harvested web source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub collector_type: CollectorType,
    /// URL template containing `{}` placeholders
    pub url_format: String,
    /// Comma separated parameters, `N-M` expands to an inclusive range
    #[serde(default)]
    pub url_parameters: String,
    #[serde(default = "default_charset")]
    pub charset: String,
    pub value_rules: Vec<ValueRule>,
}

fn default_charset() -> String {
    DEFAULT_CHARSET.to_string()
}

/// Validated rules of a source: the row rule plus the field rules
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub table: String,
    pub fields: Vec<ValueRule>,
}

impl SourceSpec {
    pub fn new(name: &str, collector_type: CollectorType, url_format: &str) -> Self {
        Self {
            name: name.to_string(),
            collector_type,
            url_format: url_format.to_string(),
            url_parameters: String::new(),
            charset: default_charset(),
            value_rules: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: &str) -> Self {
        self.url_parameters = parameters.to_string();
        self
    }

    pub fn with_charset(mut self, charset: &str) -> Self {
        self.charset = charset.to_string();
        self
    }

    pub fn with_rule(mut self, rule: ValueRule) -> Self {
        self.value_rules.push(rule);
        self
    }

    /// Basic sanity checks independent of the collector type
    pub fn verify(&self) -> bool {
        !self.name.trim().is_empty() && !self.url_format.trim().is_empty()
    }

    /// Expand the URL template into the ordered list of pages to visit
    pub fn urls(&self) -> std::result::Result<Vec<String>, SourceError> {
        expand_urls(&self.url_format, &self.url_parameters)
    }

    /// Check the source against `expected` and split its rules into row and field rules
    pub fn rule_set(&self, expected: CollectorType) -> std::result::Result<RuleSet, SourceError> {
        if !self.verify() {
            return Err(SourceError::Incomplete(self.name.clone()));
        }

        if self.collector_type != expected {
            return Err(SourceError::WrongType {
                name: self.name.clone(),
                expected: expected.to_string(),
                actual: self.collector_type.to_string(),
            });
        }

        if self.value_rules.len() < 3 {
            return Err(SourceError::TooFewRules {
                name: self.name.clone(),
                count: self.value_rules.len(),
            });
        }

        let mut table = None;
        let mut fields: Vec<ValueRule> = Vec::new();
        for rule in &self.value_rules {
            if rule.name.trim().is_empty() || rule.rule.trim().is_empty() {
                warn!(
                    "source {} contains a value rule with empty name or rule, ignoring it",
                    self.name
                );
                continue;
            }

            if rule.name == TABLE_RULE {
                table = Some(rule.rule.clone());
            } else if let Some(existing) = fields.iter_mut().find(|f| f.name == rule.name) {
                *existing = rule.clone();
            } else {
                fields.push(rule.clone());
            }
        }

        let table = table.ok_or_else(|| SourceError::MissingTable(self.name.clone()))?;

        if fields.len() < 2 {
            return Err(SourceError::TooFewFields {
                name: self.name.clone(),
                count: fields.len(),
            });
        }

        Ok(RuleSet { table, fields })
    }

    /// Whether fetched text must be decoded with something other than UTF-8
    pub fn needs_decoding(&self) -> bool {
        let charset = self.charset.trim().to_ascii_lowercase();
        !charset.is_empty() && charset != "utf-8" && charset != "utf8"
    }
}

/// Substitute every expansion parameter into `format`
///
/// Parameters are comma separated; `N-M` expands to `N..=M`. Without parameters, or
/// without a placeholder in the template, the template itself is the only URL.
/// Ranges wider than [`MAX_RANGE_SPAN`] are rejected.
pub fn expand_urls(
    format: &str,
    parameters: &str,
) -> std::result::Result<Vec<String>, SourceError> {
    let params = expand_parameters(parameters)?;
    if params.is_empty() || !format.contains(URL_PLACEHOLDER) {
        return Ok(vec![format.to_string()]);
    }

    Ok(params
        .iter()
        .map(|p| format.replace(URL_PLACEHOLDER, p))
        .collect())
}

fn expand_parameters(parameters: &str) -> std::result::Result<Vec<String>, SourceError> {
    let mut expanded = Vec::new();

    for item in parameters.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match parse_range(item) {
            Some((start, end)) if end - start >= MAX_RANGE_SPAN => {
                return Err(SourceError::RangeTooWide {
                    parameter: item.to_string(),
                    max: MAX_RANGE_SPAN,
                });
            }
            Some((start, end)) => expanded.extend((start..=end).map(|n| n.to_string())),
            None => expanded.push(item.to_string()),
        }
    }

    Ok(expanded)
}

fn parse_range(item: &str) -> Option<(u64, u64)> {
    let (start, end) = item.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    (start <= end).then_some((start, end))
}

/// Load source specifications from a JSON array file
pub fn load_sources<P: AsRef<Path>>(path: P) -> Result<Vec<SourceSpec>> {
    let content = fs::read_to_string(path)?;
    let specs = serde_json::from_str(&content)?;
    Ok(specs)
}
