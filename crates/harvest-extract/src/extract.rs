//! Per-source candidate extraction: the method dispatch table, dedup, and
//! the per-source best-candidate map.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use regex::Regex;
use tracing::debug;
use url::Url;

use harvest_plan::PageData;
use harvest_rules::model::CompiledTemplate;
use harvest_rules::{RulePack, normalize_field_key};

use crate::candidate::{Candidate, Method};
use crate::json_walk::{JsonLeaf, collect_leaves};
use crate::score::score_candidate;

/// Context shared by all methods for one source.
pub struct ExtractionContext<'a> {
    pub pack: &'a RulePack,
    /// Identity-locked plus anchor-locked field keys. LLM candidates for
    /// these fields are discarded before merging.
    pub locked_fields: &'a BTreeSet<String>,
}

impl<'a> ExtractionContext<'a> {
    /// Map a normalized JSON key to a field key: exact field-key match first,
    /// then normalized display name.
    fn match_field(&self, normalized_key: &'a str) -> Option<&'a str> {
        if self.pack.field_rules.fields.contains_key(normalized_key) {
            return Some(
                self.pack
                    .field_rules
                    .fields
                    .get_key_value(normalized_key)
                    .map(|(k, _)| k.as_str())
                    .unwrap_or(normalized_key),
            );
        }
        self.pack
            .field_rules
            .fields
            .values()
            .find(|rule| normalize_field_key(&rule.display_name) == normalized_key)
            .map(|rule| rule.field_key.as_str())
    }
}

/// Deterministic method dispatch table; order is the documented priority
/// order.
type MethodFn = fn(&PageData, usize, &ExtractionContext) -> Vec<Candidate>;
const METHOD_TABLE: &[(Method, MethodFn)] = &[
    (Method::NetworkJson, extract_network_json),
    (Method::EmbeddedState, extract_embedded_state),
    (Method::Ldjson, extract_ldjson),
    (Method::Pdf, extract_pdf),
    (Method::Dom, extract_dom),
];

/// Run the five deterministic methods over one page. Discovery-only pages
/// (search, sitemap, robots, find) produce zero candidates.
#[must_use]
pub fn extract_candidates(
    page: &PageData,
    source_index: usize,
    ctx: &ExtractionContext,
) -> Vec<Candidate> {
    if is_discovery_url(&page.final_url) {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for (_, method_fn) in METHOD_TABLE {
        for candidate in method_fn(page, source_index, ctx) {
            if seen.insert(candidate.dedupe_key()) {
                out.push(candidate);
            }
        }
    }
    debug!(
        url = %page.final_url,
        candidates = out.len(),
        "extracted candidates"
    );
    out
}

/// Merge LLM-produced candidates into the accumulated candidate list.
/// Candidates targeting locked or unknown fields are silently dropped;
/// survivors are de-duplicated per source (the dedupe key is scoped to one
/// source; identical values quoted from distinct sources are distinct
/// confirmations).
#[must_use]
pub fn merge_llm_candidates(
    mut existing: Vec<Candidate>,
    llm: Vec<Candidate>,
    ctx: &ExtractionContext,
) -> Vec<Candidate> {
    let scoped_key = |c: &Candidate| format!("{}|{}", c.source_index, c.dedupe_key());
    let mut seen: HashSet<String> = existing.iter().map(scoped_key).collect();
    for mut candidate in llm {
        candidate.method = Method::LlmExtract;
        if ctx.locked_fields.contains(&candidate.field) {
            continue;
        }
        if !ctx.pack.field_rules.fields.contains_key(&candidate.field) {
            continue;
        }
        if seen.insert(scoped_key(&candidate)) {
            existing.push(candidate);
        }
    }
    existing
}

/// Top-scoring candidate per field; this map feeds anchor and identity
/// evaluation for the source. Consensus still sees every candidate.
#[must_use]
pub fn best_per_field(candidates: &[Candidate], pack: &RulePack) -> BTreeMap<String, Candidate> {
    let mut best: BTreeMap<String, (i32, Candidate)> = BTreeMap::new();
    for candidate in candidates {
        let rule = pack.field_rules.fields.get(&candidate.field);
        let score = score_candidate(candidate, rule);
        match best.get(&candidate.field) {
            Some((existing, _)) if *existing >= score => {}
            _ => {
                best.insert(candidate.field.clone(), (score, candidate.clone()));
            }
        }
    }
    best.into_iter().map(|(k, (_, c))| (k, c)).collect()
}

/// Search, sitemap, robots, and "find" pages feed the planner, not the
/// extractor.
#[must_use]
pub fn is_discovery_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let path = parsed.path().to_ascii_lowercase();
    let query = parsed.query().unwrap_or("").to_ascii_lowercase();

    path.ends_with("/robots.txt")
        || path.contains("sitemap")
        || path.contains("/search")
        || path.starts_with("/find")
        || path.contains("/find/")
        || query.contains("q=")
        || query.contains("search=")
}

fn candidates_from_leaves(
    leaves: Vec<JsonLeaf>,
    method: Method,
    prefix: &str,
    source_index: usize,
    ctx: &ExtractionContext,
) -> Vec<Candidate> {
    let mut out = Vec::new();
    for leaf in leaves {
        let Some(field) = ctx.match_field(&leaf.key) else {
            continue;
        };
        let key_path = if prefix.is_empty() {
            leaf.key_path
        } else {
            format!("{prefix}.{}", leaf.key_path)
        };
        out.push(Candidate {
            field: field.to_string(),
            value: leaf.value,
            method,
            key_path,
            quote: None,
            source_index,
        });
    }
    out
}

/// Objects shaped `{name, value}` (schema.org additionalProperty and
/// friends) become leaves keyed by the property name.
fn property_pair_leaves(root: &serde_json::Value) -> Vec<JsonLeaf> {
    let mut out = Vec::new();
    collect_pairs(root, String::new(), &mut out);
    out
}

fn collect_pairs(value: &serde_json::Value, path: String, out: &mut Vec<JsonLeaf>) {
    match value {
        serde_json::Value::Object(map) => {
            let name = map.get("name").and_then(|v| v.as_str());
            let pair_value = map.get("value").and_then(crate::json_walk::scalar_to_string);
            if let (Some(name), Some(pair_value)) = (name, pair_value) {
                out.push(JsonLeaf {
                    key_path: if path.is_empty() {
                        format!("[{name}]")
                    } else {
                        format!("{path}[{name}]")
                    },
                    key: normalize_field_key(name),
                    value: pair_value,
                });
            }
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                collect_pairs(child, child_path, out);
            }
        }
        serde_json::Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_pairs(item, format!("{path}.{index}"), out);
            }
        }
        _ => {}
    }
}

fn extract_network_json(
    page: &PageData,
    source_index: usize,
    ctx: &ExtractionContext,
) -> Vec<Candidate> {
    let mut out = Vec::new();
    for (index, response) in page.network_responses.iter().enumerate() {
        let prefix = format!("net:{index}");
        let mut leaves = collect_leaves(&response.body);
        leaves.extend(property_pair_leaves(&response.body));
        out.extend(candidates_from_leaves(
            leaves,
            Method::NetworkJson,
            &prefix,
            source_index,
            ctx,
        ));
    }
    out
}

fn extract_embedded_state(
    page: &PageData,
    source_index: usize,
    ctx: &ExtractionContext,
) -> Vec<Candidate> {
    let Some(state) = &page.embedded_state else {
        return Vec::new();
    };
    let mut leaves = collect_leaves(state);
    leaves.extend(property_pair_leaves(state));
    candidates_from_leaves(leaves, Method::EmbeddedState, "state", source_index, ctx)
}

fn extract_ldjson(page: &PageData, source_index: usize, ctx: &ExtractionContext) -> Vec<Candidate> {
    let mut out = Vec::new();
    for (index, block) in page.ldjson_blocks.iter().enumerate() {
        let prefix = format!("ldjson:{index}");
        let mut leaves = collect_leaves(block);
        leaves.extend(property_pair_leaves(block));
        out.extend(candidates_from_leaves(
            leaves,
            Method::Ldjson,
            &prefix,
            source_index,
            ctx,
        ));
    }
    out
}

fn extract_pdf(page: &PageData, source_index: usize, ctx: &ExtractionContext) -> Vec<Candidate> {
    let mut out = Vec::new();
    for (pdf_index, doc) in page.pdf_docs.iter().enumerate() {
        for (field, template) in &ctx.pack.parse_templates.templates {
            out.extend(apply_template(
                field,
                template,
                &doc.text,
                Method::Pdf,
                &format!("pdf:{pdf_index}"),
                source_index,
            ));
        }
    }
    out
}

fn extract_dom(page: &PageData, source_index: usize, ctx: &ExtractionContext) -> Vec<Candidate> {
    let mut out = Vec::new();
    for (field, template) in &ctx.pack.parse_templates.templates {
        out.extend(apply_template(
            field,
            template,
            &page.html,
            Method::Dom,
            "dom",
            source_index,
        ));
    }
    out
}

/// Window around a match inspected for context and negative keywords, and
/// used as the evidence quote.
const QUOTE_WINDOW: usize = 120;

fn apply_template(
    field: &str,
    template: &CompiledTemplate,
    text: &str,
    method: Method,
    prefix: &str,
    source_index: usize,
) -> Vec<Candidate> {
    let mut out = Vec::new();
    for (pattern_index, pattern) in template.patterns.iter().enumerate() {
        let Ok(regex) = Regex::new(&pattern.regex) else {
            continue;
        };
        let Some(captures) = regex.captures(text) else {
            continue;
        };
        let Some(group) = captures.get(pattern.group) else {
            continue;
        };
        let window = quote_window(text, group.start(), group.end());
        let window_lower = window.to_ascii_lowercase();

        if template
            .negative_keywords
            .iter()
            .any(|kw| window_lower.contains(&kw.to_ascii_lowercase()))
        {
            continue;
        }
        if !template.context_keywords.is_empty()
            && !template
                .context_keywords
                .iter()
                .any(|kw| window_lower.contains(&kw.to_ascii_lowercase()))
        {
            continue;
        }

        let mut value = group.as_str().trim().to_string();
        if let Some(post) = &template.post_process {
            value = post_process(&value, post);
        }
        if value.is_empty() {
            continue;
        }

        out.push(Candidate {
            field: field.to_string(),
            value,
            method,
            key_path: format!("{prefix}:pattern:{pattern_index}"),
            quote: Some(window.trim().to_string()),
            source_index,
        });
        // First matching pattern wins for this template.
        break;
    }
    out
}

fn quote_window(text: &str, start: usize, end: usize) -> &str {
    let from = text
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|i| *i <= start.saturating_sub(QUOTE_WINDOW / 2))
        .last()
        .unwrap_or(0);
    let to = (end + QUOTE_WINDOW / 2).min(text.len());
    let to = text
        .char_indices()
        .map(|(i, _)| i)
        .find(|i| *i >= to)
        .unwrap_or(text.len());
    &text[from..to]
}

fn post_process(value: &str, rule: &str) -> String {
    match rule {
        "strip_commas" => value.replace(',', ""),
        "lowercase" => value.to_ascii_lowercase(),
        "uppercase" => value.to_ascii_uppercase(),
        "first_token" => value
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string(),
        _ => value.to_string(),
    }
}
