//! Fetcher contract and the dry-run implementation.
//!
//! The real headless-browser fetcher is an external collaborator; this crate
//! defines what it must return. The dry-run fetcher serves canned pages so
//! the whole pipeline is unit-testable without a network.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::source::Source;

/// A captured network response with a JSON body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkResponse {
    pub url: String,
    pub body: serde_json::Value,
}

/// A PDF surfaced by the page, already text-extracted by the PDF adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfDoc {
    pub url: String,
    pub text: String,
}

/// Everything the fetcher captured for one URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageData {
    pub status: Option<u16>,
    pub final_url: String,
    pub title: String,
    pub html: String,
    #[serde(default)]
    pub ldjson_blocks: Vec<serde_json::Value>,
    #[serde(default)]
    pub embedded_state: Option<serde_json::Value>,
    #[serde(default)]
    pub network_responses: Vec<NetworkResponse>,
    #[serde(default)]
    pub pdf_docs: Vec<PdfDoc>,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Transport-level message (timeout text, challenge marker) used by
    /// outcome classification.
    #[serde(default)]
    pub message: String,
}

/// Fetch failure. Distinct from an HTTP error page, which is a `PageData`
/// with a non-2xx status.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("fetch failed: {0}")]
    Transport(String),
}

/// The fetch seam.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &Source, timeout: Duration) -> Result<PageData, FetchError>;
}

/// Canned-page fetcher for tests and dry runs. Unknown URLs return an empty
/// but well-formed page.
#[derive(Debug, Default)]
pub struct DryRunFetcher {
    pages: HashMap<String, PageData>,
}

impl DryRunFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a canned page for a URL.
    pub fn stage(&mut self, url: impl Into<String>, page: PageData) {
        self.pages.insert(url.into(), page);
    }

    /// Convenience: a plain HTML page with a 200 status.
    #[must_use]
    pub fn html_page(url: &str, title: &str, html: &str) -> PageData {
        PageData {
            status: Some(200),
            final_url: url.to_string(),
            title: title.to_string(),
            html: html.to_string(),
            content_type: Some("text/html".to_string()),
            ..PageData::default()
        }
    }
}

#[async_trait]
impl Fetcher for DryRunFetcher {
    async fn fetch(&self, source: &Source, _timeout: Duration) -> Result<PageData, FetchError> {
        Ok(self.pages.get(&source.url).cloned().unwrap_or(PageData {
            status: Some(200),
            final_url: source.url.clone(),
            title: String::new(),
            html: "<html><body></body></html>".repeat(32),
            content_type: Some("text/html".to_string()),
            ..PageData::default()
        }))
    }
}
