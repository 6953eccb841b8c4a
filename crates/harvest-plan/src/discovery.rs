//! Discovery from fetched content: same-domain links, robots sitemaps,
//! sitemap URLs, and manufacturer brand checks.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::source::root_domain;

static HREF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)href\s*=\s*["']([^"'#]+)["']"#).expect("static regex"));
static LOC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<loc>\s*([^<]+?)\s*</loc>").expect("static regex"));

/// Extract same-eTLD+1 links from HTML that match any of the manufacturer
/// path hints. Relative links resolve against `base_url`. Order follows
/// document order, de-duplicated.
#[must_use]
pub fn discover_links(html: &str, base_url: &str, path_hints: &[String]) -> Vec<String> {
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };
    let Some(base_host) = base.host_str() else {
        return Vec::new();
    };
    let base_root = root_domain(&base_host.to_ascii_lowercase());

    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();

    for capture in HREF_RE.captures_iter(html) {
        let raw = capture[1].trim();
        if raw.starts_with("javascript:") || raw.starts_with("mailto:") || raw.starts_with("data:")
        {
            continue;
        }
        let Ok(resolved) = base.join(raw) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        let Some(host) = resolved.host_str() else {
            continue;
        };
        if root_domain(&host.to_ascii_lowercase()) != base_root {
            continue;
        }

        let path = resolved.path().to_ascii_lowercase();
        let hinted =
            path_hints.is_empty() || path_hints.iter().any(|h| path.contains(h.as_str()));
        if !hinted {
            continue;
        }

        let mut url = resolved;
        url.set_fragment(None);
        let url = url.to_string();
        if seen.insert(url.clone()) {
            links.push(url);
        }
    }

    links
}

/// `Sitemap:` directives from a robots.txt body.
#[must_use]
pub fn sitemaps_from_robots(robots: &str) -> Vec<String> {
    robots
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line
                .strip_prefix("Sitemap:")
                .or_else(|| line.strip_prefix("sitemap:"))?;
            let url = rest.trim();
            (!url.is_empty()).then(|| url.to_string())
        })
        .collect()
}

/// `<loc>` URLs from an XML sitemap (urlset or sitemap index).
#[must_use]
pub fn urls_from_sitemap(xml: &str) -> Vec<String> {
    LOC_RE
        .captures_iter(xml)
        .map(|c| c[1].trim().to_string())
        .collect()
}

/// Check whether a manufacturer page plausibly belongs to the expected brand.
/// A mismatch on an approved manufacturer host blocks that host for the rest
/// of the run.
#[must_use]
pub fn brand_matches(page_title: &str, html: &str, brand: &str) -> bool {
    let needle = brand.to_ascii_lowercase();
    if needle.is_empty() {
        return true;
    }
    page_title.to_ascii_lowercase().contains(&needle)
        || html.to_ascii_lowercase().contains(&needle)
}
