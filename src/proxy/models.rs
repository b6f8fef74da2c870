//! Proxy data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated proxy entry extracted from one row of a source page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// IPv4 address in dotted-quad form
    pub address: String,
    pub port: u16,
    /// Free-text location as published by the source, possibly empty
    pub location: String,
    /// Latency reported by the source, always in `[0, 3)`
    pub latency_secs: f64,
    /// Page the row was extracted from
    pub source_url: String,
}

impl Candidate {
    pub fn new(
        address: String,
        port: u16,
        location: String,
        latency_secs: f64,
        source_url: String,
    ) -> Self {
        Self {
            address,
            port,
            location,
            latency_secs,
            source_url,
        }
    }

    /// Storage key in IP:PORT format
    pub fn key(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Get the proxy URL string, assuming plain http
    pub fn url(&self) -> String {
        format!("http://{}", self.key())
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.2}s", self.key(), self.latency_secs)?;
        if !self.location.is_empty() {
            write!(f, ", {}", self.location)?;
        }
        write!(f, ")")
    }
}

/// The value the harvester persists for every accepted candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRecord {
    #[serde(flatten)]
    pub candidate: Candidate,
    pub collected_at: DateTime<Utc>,
}

impl ProxyRecord {
    pub fn new(candidate: Candidate) -> Self {
        Self {
            candidate,
            collected_at: Utc::now(),
        }
    }

    pub fn key(&self) -> String {
        self.candidate.key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Candidate {
        Candidate::new(
            "127.0.0.1".to_string(),
            8080,
            "Beijing".to_string(),
            0.5,
            "http://example.com/1".to_string(),
        )
    }

    #[test]
    fn test_candidate_key_and_url() {
        let candidate = sample();
        assert_eq!(candidate.key(), "127.0.0.1:8080");
        assert_eq!(candidate.url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_candidate_display() {
        let mut candidate = sample();
        assert_eq!(candidate.to_string(), "127.0.0.1:8080 (0.50s, Beijing)");

        candidate.location.clear();
        assert_eq!(candidate.to_string(), "127.0.0.1:8080 (0.50s)");
    }

    #[test]
    fn test_record_is_flat_json() {
        let record = ProxyRecord::new(sample());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["address"], "127.0.0.1");
        assert_eq!(value["port"], 8080);
        assert!(value.get("collected_at").is_some());
        assert!(value.get("candidate").is_none());

        let decoded: ProxyRecord = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.key(), "127.0.0.1:8080");
    }
}
