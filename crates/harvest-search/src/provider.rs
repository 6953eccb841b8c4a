//! Search providers: paid APIs (Bing, Google CSE), public engines
//! (DuckDuckGo HTML, SearXNG JSON), and the `dual` preference.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::serp::SerpEntry;

/// Provider selector, as configured or chosen per round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Bing,
    Google,
    Searxng,
    Duckduckgo,
    /// Prefer paid when credentials are present, else public.
    Dual,
    #[default]
    None,
}

impl Provider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bing => "bing",
            Self::Google => "google",
            Self::Searxng => "searxng",
            Self::Duckduckgo => "duckduckgo",
            Self::Dual => "dual",
            Self::None => "none",
        }
    }
}

/// Credentials and endpoints for the provider clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub bing_api_key: Option<String>,
    #[serde(default)]
    pub google_api_key: Option<String>,
    #[serde(default)]
    pub google_cx: Option<String>,
    #[serde(default)]
    pub searxng_endpoint: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (compatible; harvester/1.0)".to_string()
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_max_results() -> usize {
    20
}

impl SearchConfig {
    #[must_use]
    pub fn has_bing(&self) -> bool {
        self.bing_api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    #[must_use]
    pub fn has_google(&self) -> bool {
        self.google_api_key.as_deref().is_some_and(|k| !k.is_empty())
            && self.google_cx.as_deref().is_some_and(|c| !c.is_empty())
    }

    #[must_use]
    pub fn has_searxng(&self) -> bool {
        self.searxng_endpoint
            .as_deref()
            .is_some_and(|e| !e.is_empty())
    }

    /// Resolve `dual` to a concrete provider given available credentials.
    #[must_use]
    pub fn resolve_dual(&self) -> Provider {
        if self.has_bing() {
            Provider::Bing
        } else if self.has_google() {
            Provider::Google
        } else if self.has_searxng() {
            Provider::Searxng
        } else {
            Provider::Duckduckgo
        }
    }
}

/// HTTP search client over the configured providers.
pub struct SearchClient {
    config: SearchConfig,
    http: reqwest::Client,
}

impl SearchClient {
    pub fn new(config: SearchConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build search HTTP client")?;
        Ok(Self { config, http })
    }

    /// Run one query against one provider. `Provider::None` returns nothing;
    /// `Provider::Dual` resolves by credentials first.
    pub async fn search(&self, provider: Provider, query: &str) -> Result<Vec<SerpEntry>> {
        let provider = if provider == Provider::Dual {
            self.config.resolve_dual()
        } else {
            provider
        };
        debug!(provider = provider.as_str(), query, "dispatching search");

        match provider {
            Provider::None => Ok(Vec::new()),
            Provider::Bing => self.search_bing(query).await,
            Provider::Google => self.search_google(query).await,
            Provider::Searxng => self.search_searxng(query).await,
            Provider::Duckduckgo => self.search_duckduckgo(query).await,
            Provider::Dual => unreachable!("dual resolved above"),
        }
    }

    async fn search_bing(&self, query: &str) -> Result<Vec<SerpEntry>> {
        let key = self
            .config
            .bing_api_key
            .as_deref()
            .context("bing selected without an API key")?;
        let response: serde_json::Value = self
            .http
            .get("https://api.bing.microsoft.com/v7.0/search")
            .header("Ocp-Apim-Subscription-Key", key)
            .query(&[("q", query), ("count", "20")])
            .send()
            .await
            .context("bing request failed")?
            .json()
            .await
            .context("bing response was not JSON")?;

        let entries = response["webPages"]["value"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .enumerate()
                    .filter_map(|(rank, item)| {
                        Some(SerpEntry {
                            url: item["url"].as_str()?.to_string(),
                            rank: rank as u32,
                            provider: "bing".to_string(),
                            query: query.to_string(),
                            title: item["name"].as_str().unwrap_or_default().to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(entries)
    }

    async fn search_google(&self, query: &str) -> Result<Vec<SerpEntry>> {
        let key = self
            .config
            .google_api_key
            .as_deref()
            .context("google selected without an API key")?;
        let cx = self
            .config
            .google_cx
            .as_deref()
            .context("google selected without a CSE id")?;
        let response: serde_json::Value = self
            .http
            .get("https://www.googleapis.com/customsearch/v1")
            .query(&[("key", key), ("cx", cx), ("q", query)])
            .send()
            .await
            .context("google request failed")?
            .json()
            .await
            .context("google response was not JSON")?;

        let entries = response["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .enumerate()
                    .filter_map(|(rank, item)| {
                        Some(SerpEntry {
                            url: item["link"].as_str()?.to_string(),
                            rank: rank as u32,
                            provider: "google".to_string(),
                            query: query.to_string(),
                            title: item["title"].as_str().unwrap_or_default().to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(entries)
    }

    async fn search_searxng(&self, query: &str) -> Result<Vec<SerpEntry>> {
        let endpoint = self
            .config
            .searxng_endpoint
            .as_deref()
            .context("searxng selected without an endpoint")?;
        let response: serde_json::Value = self
            .http
            .get(format!("{}/search", endpoint.trim_end_matches('/')))
            .query(&[("q", query), ("format", "json")])
            .send()
            .await
            .context("searxng request failed")?
            .json()
            .await
            .context("searxng response was not JSON")?;

        Ok(parse_searxng_results(&response, query, self.config.max_results))
    }

    async fn search_duckduckgo(&self, query: &str) -> Result<Vec<SerpEntry>> {
        let html = self
            .http
            .get("https://html.duckduckgo.com/html/")
            .query(&[("q", query)])
            .send()
            .await
            .context("duckduckgo request failed")?
            .text()
            .await
            .context("duckduckgo response was not text")?;

        Ok(parse_duckduckgo_html(&html, query, self.config.max_results))
    }
}

/// Parse the SearXNG JSON endpoint's `results` array.
#[must_use]
pub fn parse_searxng_results(
    response: &serde_json::Value,
    query: &str,
    max_results: usize,
) -> Vec<SerpEntry> {
    response["results"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .take(max_results)
                .enumerate()
                .filter_map(|(rank, item)| {
                    Some(SerpEntry {
                        url: item["url"].as_str()?.to_string(),
                        rank: rank as u32,
                        provider: "searxng".to_string(),
                        query: query.to_string(),
                        title: item["title"].as_str().unwrap_or_default().to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

static DDG_RESULT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a[^>]+class="[^"]*result__a[^"]*"[^>]+href="([^"]+)"[^>]*>(.*?)</a>"#)
        .expect("static regex")
});
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("static regex"));

/// Parse DuckDuckGo's HTML results page: decode entities, unwrap
/// `duckduckgo.com/l/?uddg=` redirect wrappers, de-duplicate by URL.
#[must_use]
pub fn parse_duckduckgo_html(html: &str, query: &str, max_results: usize) -> Vec<SerpEntry> {
    let mut seen = std::collections::HashSet::new();
    let mut entries = Vec::new();

    for capture in DDG_RESULT_RE.captures_iter(html) {
        let href = decode_entities(&capture[1]);
        let Some(target) = unwrap_ddg_redirect(&href) else {
            continue;
        };
        if !seen.insert(target.clone()) {
            continue;
        }
        let title = decode_entities(&TAG_RE.replace_all(&capture[2], ""))
            .trim()
            .to_string();
        entries.push(SerpEntry {
            url: target,
            rank: entries.len() as u32,
            provider: "duckduckgo".to_string(),
            query: query.to_string(),
            title,
        });
        if entries.len() >= max_results {
            break;
        }
    }
    entries
}

/// Unwrap `duckduckgo.com/l/?uddg=<encoded>` links; plain links pass through.
#[must_use]
pub fn unwrap_ddg_redirect(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    let parsed = Url::parse(&absolute).ok()?;
    let host = parsed.host_str()?;

    if host.ends_with("duckduckgo.com") && parsed.path().starts_with("/l/") {
        let target = parsed
            .query_pairs()
            .find(|(key, _)| key == "uddg")
            .map(|(_, value)| value.into_owned())?;
        return Url::parse(&target).ok().map(|u| u.to_string());
    }
    if matches!(parsed.scheme(), "http" | "https") {
        return Some(parsed.to_string());
    }
    None
}

/// Minimal HTML entity decoding for SERP text and hrefs.
#[must_use]
pub fn decode_entities(text: &str) -> String {
    let mut out = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");
    if out.contains("&#") {
        static NUMERIC_RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"&#(\d+);").expect("static regex"));
        out = NUMERIC_RE
            .replace_all(&out, |caps: &regex::Captures<'_>| {
                caps[1]
                    .parse::<u32>()
                    .ok()
                    .and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_default()
            })
            .into_owned();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ddg_redirect_unwraps() {
        let href = "//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.logitechg.com%2Fpro%2Dx&rut=abc";
        assert_eq!(
            unwrap_ddg_redirect(href).unwrap(),
            "https://www.logitechg.com/pro-x"
        );
        assert_eq!(
            unwrap_ddg_redirect("https://plain.example/page").unwrap(),
            "https://plain.example/page"
        );
        assert!(unwrap_ddg_redirect("javascript:void(0)").is_none());
    }

    #[test]
    fn ddg_html_parses_and_dedupes() {
        let html = r#"
            <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fa.example%2Fspecs">A &amp; Specs</a>
            <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fa.example%2Fspecs">Duplicate</a>
            <a rel="nofollow" class="result__a" href="https://b.example/review">B &#39;Review&#39;</a>
        "#;
        let entries = parse_duckduckgo_html(html, "g pro x", 10);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].url, "https://a.example/specs");
        assert_eq!(entries[0].title, "A & Specs");
        assert_eq!(entries[0].rank, 0);
        assert_eq!(entries[1].title, "B 'Review'");
        assert_eq!(entries[1].rank, 1);
    }

    #[test]
    fn searxng_json_parses() {
        let response = serde_json::json!({
            "results": [
                {"url": "https://a.example/", "title": "A"},
                {"url": "https://b.example/", "title": "B"}
            ]
        });
        let entries = parse_searxng_results(&response, "q", 10);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].provider, "searxng");
        assert_eq!(entries[1].rank, 1);
    }

    #[test]
    fn dual_prefers_paid_then_public() {
        let mut config = SearchConfig::default();
        assert_eq!(config.resolve_dual(), Provider::Duckduckgo);
        config.searxng_endpoint = Some("https://sx.example".into());
        assert_eq!(config.resolve_dual(), Provider::Searxng);
        config.google_api_key = Some("k".into());
        config.google_cx = Some("cx".into());
        assert_eq!(config.resolve_dual(), Provider::Google);
        config.bing_api_key = Some("k".into());
        assert_eq!(config.resolve_dual(), Provider::Bing);
    }

    #[test]
    fn entity_decoding_handles_numeric() {
        assert_eq!(decode_entities("a &#8211; b"), "a – b");
        assert_eq!(decode_entities("x &amp; y"), "x & y");
    }
}
