//! SERP entries, URL canonicalization, and cross-provider de-duplication.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// One raw search result from one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerpEntry {
    pub url: String,
    pub rank: u32,
    pub provider: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub title: String,
}

/// One de-duplicated row across providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerpRow {
    pub canonical_url: String,
    /// Original URL of the best-ranked entry in the class.
    pub url: String,
    pub rank: u32,
    pub title: String,
    pub seen_by_providers: Vec<String>,
    pub seen_in_queries: Vec<String>,
    pub cross_provider_count: usize,
}

/// Query parameters stripped during canonicalization.
fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_")
        || key.starts_with("mc_")
        || matches!(key, "fbclid" | "gclid" | "msclkid" | "ref" | "source")
}

/// Canonicalize a URL for dedup: lowercase host, tracking params removed,
/// trailing slash stripped, fragment dropped.
#[must_use]
pub fn canonicalize_url(raw: &str) -> String {
    let Ok(mut parsed) = Url::parse(raw) else {
        return raw.trim_end_matches('/').to_ascii_lowercase();
    };
    parsed.set_fragment(None);

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let query: String = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&query));
    }

    let mut out = parsed.to_string();
    if parsed.query().is_none() && parsed.fragment().is_none() {
        out = out.trim_end_matches('/').to_string();
    }
    out
}

/// Cross-provider dedup: group by canonical URL, keep the entry with the
/// smallest original rank, merge providers and queries.
#[must_use]
pub fn dedup_serp(entries: &[SerpEntry]) -> Vec<SerpRow> {
    let mut classes: BTreeMap<String, SerpRow> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();

    for entry in entries {
        let canonical = canonicalize_url(&entry.url);
        match classes.get_mut(&canonical) {
            None => {
                order.push(canonical.clone());
                classes.insert(
                    canonical.clone(),
                    SerpRow {
                        canonical_url: canonical,
                        url: entry.url.clone(),
                        rank: entry.rank,
                        title: entry.title.clone(),
                        seen_by_providers: vec![entry.provider.clone()],
                        seen_in_queries: if entry.query.is_empty() {
                            Vec::new()
                        } else {
                            vec![entry.query.clone()]
                        },
                        cross_provider_count: 1,
                    },
                );
            }
            Some(row) => {
                if entry.rank < row.rank {
                    row.rank = entry.rank;
                    row.url = entry.url.clone();
                    if !entry.title.is_empty() {
                        row.title = entry.title.clone();
                    }
                }
                if !row.seen_by_providers.contains(&entry.provider) {
                    row.seen_by_providers.push(entry.provider.clone());
                }
                if !entry.query.is_empty() && !row.seen_in_queries.contains(&entry.query) {
                    row.seen_in_queries.push(entry.query.clone());
                }
                row.cross_provider_count = row.seen_by_providers.len();
            }
        }
    }

    let mut rows: Vec<SerpRow> = order
        .into_iter()
        .filter_map(|key| classes.remove(&key))
        .collect();
    rows.sort_by_key(|r| r.rank);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalization_strips_tracking_and_slash() {
        assert_eq!(canonicalize_url("https://A?utm_source=x"), "https://a");
        assert_eq!(canonicalize_url("https://a/"), "https://a");
        assert_eq!(
            canonicalize_url("https://Example.com/Path/?fbclid=abc&page=2"),
            "https://example.com/Path/?page=2"
        );
        assert_eq!(
            canonicalize_url("https://example.com/p#section"),
            "https://example.com/p"
        );
    }

    #[test]
    fn cross_provider_dedup_keeps_min_rank() {
        let entries = vec![
            SerpEntry {
                url: "https://A?utm_source=x".into(),
                rank: 0,
                provider: "bing".into(),
                query: "g pro x specs".into(),
                title: String::new(),
            },
            SerpEntry {
                url: "https://a/".into(),
                rank: 5,
                provider: "google".into(),
                query: "g pro x weight".into(),
                title: String::new(),
            },
        ];

        let rows = dedup_serp(&entries);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.canonical_url, "https://a");
        assert_eq!(row.rank, 0);
        assert_eq!(row.seen_by_providers, vec!["bing", "google"]);
        assert_eq!(row.cross_provider_count, 2);
        assert_eq!(row.seen_in_queries.len(), 2);
    }

    #[test]
    fn dedup_never_grows_the_list() {
        let entries: Vec<SerpEntry> = (0..20)
            .map(|i| SerpEntry {
                url: format!("https://site{}.example/", i % 7),
                rank: i,
                provider: "duckduckgo".into(),
                query: String::new(),
                title: String::new(),
            })
            .collect();
        let rows = dedup_serp(&entries);
        assert!(rows.len() <= entries.len());
        assert_eq!(rows.len(), 7);
        // Every row carries the minimum rank of its class.
        for row in &rows {
            let min_rank = entries
                .iter()
                .filter(|e| canonicalize_url(&e.url) == row.canonical_url)
                .map(|e| e.rank)
                .min()
                .unwrap();
            assert_eq!(row.rank, min_rank);
        }
    }

    #[test]
    fn rows_are_rank_sorted() {
        let entries = vec![
            SerpEntry {
                url: "https://b.example/".into(),
                rank: 3,
                provider: "bing".into(),
                query: String::new(),
                title: String::new(),
            },
            SerpEntry {
                url: "https://a.example/".into(),
                rank: 1,
                provider: "bing".into(),
                query: String::new(),
                title: String::new(),
            },
        ];
        let rows = dedup_serp(&entries);
        assert_eq!(rows[0].canonical_url, "https://a.example");
    }
}
