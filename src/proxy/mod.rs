//! Proxy harvesting module
//!
//! This module provides functionality for:
//! - Describing web sources with declarative extraction rules
//! - Fetching source pages and extracting proxy rows with CSS selectors or regexes
//! - Validating extracted rows into candidates

pub mod collector;
pub mod crawler;
pub mod models;
pub mod parser;
pub mod regex_collector;
pub mod selector;
pub mod source;
pub mod user_agent;

pub use collector::{build_collector, Collector};
pub use crawler::{CrawlerConfig, PageFetcher};
pub use models::{Candidate, ProxyRecord};
pub use parser::RowParser;
pub use regex_collector::RegexCollector;
pub use selector::SelectorCollector;
pub use source::{load_sources, CollectorType, SourceSpec, ValueRule};
