//! Row parser turning extracted field text into validated candidates

use crate::proxy::models::Candidate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Upper bound (exclusive) for an accepted latency
pub const MAX_LATENCY_SECS: f64 = 3.0;

/// Unit markers that make a latency cell parseable as seconds
pub const SECONDS_MARKERS: &[&str] = &["秒", "sec"];

/// Leading decimal number in a latency cell
static LATENCY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[1-9]\d*\.*\d*|0\.\d*[1-9]\d*").expect("Invalid latency regex")
});

const ADDRESS_FIELDS: &[&str] = &["ip", "address"];
const PORT_FIELDS: &[&str] = &["port"];
const LATENCY_FIELDS: &[&str] = &["speed", "latency"];
const LOCATION_FIELDS: &[&str] = &["location"];

/// Field values extracted from one row, keyed by rule name
pub type RowFields = HashMap<String, String>;

/// Parser for rows extracted by a collector
pub struct RowParser;

impl RowParser {
    /// Validate a row and build a candidate from it
    ///
    /// Returns `None` when the address is missing or not IPv4, the port is missing or
    /// not in `1..=65535`, or the latency is outside `[0, 3)`.
    pub fn parse_row(fields: &RowFields, source_url: &str) -> Option<Candidate> {
        let address = Self::parse_address(lookup(fields, ADDRESS_FIELDS)?)?;
        let port = Self::parse_port(lookup(fields, PORT_FIELDS)?)?;
        let latency = lookup(fields, LATENCY_FIELDS)
            .map(Self::parse_latency)
            .unwrap_or(0.0);
        let location = lookup(fields, LOCATION_FIELDS)
            .map(|l| l.trim().to_string())
            .unwrap_or_default();

        if !(0.0..MAX_LATENCY_SECS).contains(&latency) {
            return None;
        }

        Some(Candidate::new(
            address,
            port,
            location,
            latency,
            source_url.to_string(),
        ))
    }

    /// Validate a dotted-quad IPv4 address
    pub fn parse_address(text: &str) -> Option<String> {
        let text = text.trim();
        text.parse::<Ipv4Addr>().ok().map(|_| text.to_string())
    }

    /// Parse a port, rejecting zero and anything non-numeric
    pub fn parse_port(text: &str) -> Option<u16> {
        text.trim().parse::<u16>().ok().filter(|port| *port > 0)
    }

    /// Parse a latency cell such as `0.5秒`
    ///
    /// Cells without a seconds marker, and cells whose leading number cannot be read,
    /// yield 0.
    pub fn parse_latency(text: &str) -> f64 {
        if !SECONDS_MARKERS.iter().any(|m| text.contains(m)) {
            return 0.0;
        }

        LATENCY_REGEX
            .find(text.trim())
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0)
    }
}

fn lookup<'a>(fields: &'a RowFields, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| fields.get(*name))
        .map(String::as_str)
        .filter(|value| !value.trim().is_empty())
}
