//! Fetch collaborators. The crawl controller only sees [`Transport`] and [`Session`].
//!
//! A session is opened once per source pipeline and closed when the pipeline
//! ends, including after a fatal failure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tracing::debug;

use crate::config::{SourceConfig, TransportKind};
use crate::error::FetchError;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// One page to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: String,
    pub query: String,
    pub page: u32,
}

/// Undecoded response body plus the URL it was served from.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub url: String,
    pub body: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Session>, FetchError>;
}

#[async_trait]
pub trait Session: Send {
    async fn fetch(&mut self, request: &PageRequest) -> Result<RawDocument, FetchError>;

    async fn close(&mut self) {}
}

/// Build the transport a source asks for.
pub fn for_source(source: &SourceConfig) -> Box<dyn Transport> {
    match source.transport {
        TransportKind::Http => Box::new(HttpTransport {
            user_agent: source
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout: Duration::from_secs(source.timeout_secs),
        }),
        TransportKind::Spider => Box::new(SpiderTransport),
    }
}

fn map_reqwest(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if let Some(status) = e.status() {
        FetchError::Status(status.as_u16())
    } else {
        FetchError::Transport(e.to_string())
    }
}

// ── Plain HTTP with a cookie-holding client ──

pub struct HttpTransport {
    user_agent: String,
    timeout: Duration,
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self) -> Result<Box<dyn Session>, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,application/json;q=0.8,*/*;q=0.7",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        let client = reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .default_headers(headers)
            .cookie_store(true)
            .timeout(self.timeout)
            .build()
            .map_err(|e| FetchError::Session(e.to_string()))?;
        Ok(Box::new(HttpSession { client }))
    }
}

struct HttpSession {
    client: reqwest::Client,
}

#[async_trait]
impl Session for HttpSession {
    async fn fetch(&mut self, request: &PageRequest) -> Result<RawDocument, FetchError> {
        let response = self
            .client
            .get(&request.url)
            .send()
            .await
            .map_err(map_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let url = response.url().to_string();
        let body = response.text().await.map_err(map_reqwest)?;
        debug!(url = %url, bytes = body.len(), "fetched");
        Ok(RawDocument { url, body })
    }
}

// ── spider.cloud rendering API ──

pub struct SpiderTransport;

#[async_trait]
impl Transport for SpiderTransport {
    async fn open(&self) -> Result<Box<dyn Session>, FetchError> {
        let api_key = std::env::var("SPIDER_API_KEY")
            .map_err(|_| FetchError::Session("SPIDER_API_KEY environment variable must be set".into()))?;
        let spider = Spider::new(Some(api_key))
            .map_err(|e| FetchError::Session(format!("failed to create Spider client: {e}")))?;
        Ok(Box::new(SpiderSession { spider }))
    }
}

struct SpiderSession {
    spider: Spider,
}

#[async_trait]
impl Session for SpiderSession {
    async fn fetch(&mut self, request: &PageRequest) -> Result<RawDocument, FetchError> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            ..Default::default()
        };
        let response = self
            .spider
            .scrape_url(&request.url, Some(params), "application/json")
            .await
            .map_err(|e| FetchError::Transport(format!("spider scrape failed: {e}")))?;
        let body = spider_content(response)?;
        Ok(RawDocument {
            url: request.url.clone(),
            body,
        })
    }
}

/// Pull the page body out of a spider response: `[{"content": .., "status": ..}]`,
/// possibly delivered as a JSON string.
fn spider_content(response: serde_json::Value) -> Result<String, FetchError> {
    let parsed: serde_json::Value = match response.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
        None => response,
    };
    let first = parsed.as_array().and_then(|arr| arr.first());

    if let Some(status) = first
        .and_then(|obj| obj.get("status"))
        .and_then(|s| s.as_u64())
    {
        if !(200..300).contains(&status) {
            return Err(FetchError::Status(status as u16));
        }
    }
    first
        .and_then(|obj| obj.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| FetchError::Malformed("no content in spider response".into()))
}
