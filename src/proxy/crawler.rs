//! HTTP fetching shared by all collectors
//!
//! This module provides:
//! - Crawler configuration (request timeout, user agent policy)
//! - A page fetcher returning decoded document text

use crate::errors::{CollectError, SourceError};
use crate::proxy::user_agent::resolve_user_agent;
use encoding_rs::Encoding;
use reqwest::header::USER_AGENT;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{error, warn};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration for page fetching
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Timeout for HTTP requests
    pub timeout: Duration,
    /// Fixed user agent; a random browser agent is sent per request when unset
    pub user_agent: Option<String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: None,
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = Some(user_agent);
        self
    }
}

/// Fetches source pages and decodes them to text
#[derive(Debug, Clone)]
pub struct PageFetcher {
    config: CrawlerConfig,
    client: Client,
    /// Encoding forced onto every body, whatever the response declares
    encoding: Option<&'static Encoding>,
}

impl PageFetcher {
    /// Create a fetcher; `charset` is only needed for non UTF-8 sources
    pub fn new(config: CrawlerConfig, charset: Option<String>) -> Result<Self, SourceError> {
        let encoding = charset
            .map(|label| {
                Encoding::for_label(label.trim().as_bytes())
                    .ok_or(SourceError::UnknownCharset(label))
            })
            .transpose()?;
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            config,
            client,
            encoding,
        })
    }

    /// GET `url` and return the decoded body
    ///
    /// Anything but `200 OK` is an error.
    pub async fn fetch(&self, url: &str) -> Result<String, CollectError> {
        let user_agent = resolve_user_agent(self.config.user_agent.as_deref());

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .send()
            .await
            .map_err(|source| {
                error!("GET {} failed: {}", url, source);
                CollectError::Transport {
                    url: url.to_string(),
                    source,
                }
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            error!("GET {} failed, status code: {}", url, status);
            return Err(CollectError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = match self.encoding {
            Some(encoding) => response.bytes().await.map(|bytes| {
                let (text, _, malformed) = encoding.decode(&bytes);
                if malformed {
                    warn!("{} is not valid {}", url, encoding.name());
                }
                text.into_owned()
            }),
            None => response.text().await,
        };

        body.map_err(|source| {
            error!("parse {} error: {}", url, source);
            CollectError::Parse {
                url: url.to_string(),
                source,
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    //! Minimal one-shot HTTP responder for fetch tests

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve every incoming connection with the raw `response` bytes
    pub async fn serve(response: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let response = response.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(&response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{}", addr)
    }

    pub fn ok(content_type: &str, body: &[u8]) -> Vec<u8> {
        let mut response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            content_type,
            body.len()
        )
        .into_bytes();
        response.extend_from_slice(body);
        response
    }

    pub fn status(code: u16, reason: &str) -> Vec<u8> {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            code, reason
        )
        .into_bytes()
    }

    /// Declares a longer body than it sends, so reading the body fails
    pub fn truncated() -> Vec<u8> {
        b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 1000\r\nConnection: close\r\n\r\n<html>"
            .to_vec()
    }

    /// An address nothing listens on
    pub async fn closed_port() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }
}
