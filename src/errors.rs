//! Error types for source construction, page collection and storage

use thiserror::Error;

/// Reasons a source specification cannot be turned into a collector
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source '{0}' is missing a name or url format")]
    Incomplete(String),

    #[error("source '{name}' has type '{actual}' but '{expected}' was required")]
    WrongType {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("source '{name}' declares {count} value rules, at least 3 are required")]
    TooFewRules { name: String, count: usize },

    #[error("source '{0}' has no usable 'table' rule")]
    MissingTable(String),

    #[error("source '{name}' has {count} usable field rules besides 'table', at least 2 are required")]
    TooFewFields { name: String, count: usize },

    #[error("source '{name}' rule '{rule}' is invalid: {reason}")]
    InvalidRule {
        name: String,
        rule: String,
        reason: String,
    },

    #[error("url parameter '{parameter}' spans more than {max} pages")]
    RangeTooWide { parameter: String, max: u64 },

    #[error("unknown charset '{0}'")]
    UnknownCharset(String),

    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Failures of a single `collect` call
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("collect called before a successful advance")]
    NoCurrentUrl,

    #[error("GET {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("GET {url} failed, status code: {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("parse {url} error: {source}")]
    Parse {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Failures of the mirrored store
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database file name is empty")]
    EmptyFileName,

    #[error("bucket name is empty")]
    EmptyBucket,

    #[error("value is null")]
    NullValue,

    #[error("failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("write task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
