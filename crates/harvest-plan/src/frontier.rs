//! De-duplicated, priority-ordered URL frontier with per-host gating.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use url::Url;

use crate::budget::HostBudget;
use crate::outcome::OutcomeClass;
use crate::source::{Source, SourceRegistry};

/// Result of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Added,
    Duplicate,
    Denied,
    Invalid,
}

#[derive(Debug)]
struct FrontierEntry {
    source: Source,
    priority: i64,
    seq: u64,
    consumed: bool,
}

/// Prioritized frontier. Ordering is deterministic given the same inputs and
/// learning state; ties break by insertion order.
#[derive(Debug)]
pub struct Frontier {
    registry: SourceRegistry,
    entries: Vec<FrontierEntry>,
    seen: HashSet<String>,
    budgets: HashMap<String, HostBudget>,
    path_hints: Vec<String>,
    learned_yield: HashMap<String, f64>,
    seq: u64,
}

impl Frontier {
    #[must_use]
    pub fn new(registry: SourceRegistry) -> Self {
        Self {
            registry,
            entries: Vec::new(),
            seen: HashSet::new(),
            budgets: HashMap::new(),
            path_hints: Vec::new(),
            learned_yield: HashMap::new(),
            seq: 0,
        }
    }

    /// Path fragments that signal affinity with this round's critical needs
    /// (e.g. `specs`, `datasheet`).
    pub fn set_path_hints(&mut self, hints: Vec<String>) {
        self.path_hints = hints
            .into_iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();
    }

    /// Learned domain-field yield for a root domain, in `[0,1]`.
    pub fn set_learned_yield(&mut self, root_domain: &str, score: f64) {
        self.learned_yield
            .insert(root_domain.to_ascii_lowercase(), score.clamp(0.0, 1.0));
    }

    /// Add a URL. Denied hosts are dropped; duplicates count as dedupe hits
    /// on the host budget.
    pub fn enqueue(&mut self, url: &str) -> Enqueue {
        let Some(source) = Source::from_url(url, &self.registry) else {
            return Enqueue::Invalid;
        };
        if self.registry.is_denied(&source.host) {
            debug!(host = %source.host, "denied host dropped from frontier");
            return Enqueue::Denied;
        }

        let dedupe_key = dedupe_key(url);
        if !self.seen.insert(dedupe_key) {
            self.budget_mut(&source.host).record_dedupe_hit();
            return Enqueue::Duplicate;
        }

        let priority = self.priority_of(&source);
        self.seq += 1;
        self.entries.push(FrontierEntry {
            source,
            priority,
            seq: self.seq,
            consumed: false,
        });
        Enqueue::Added
    }

    /// Pop the highest-priority URL whose host is not in backoff or blocked.
    /// Marks the host budget as started.
    pub fn next_ready(&mut self, now: DateTime<Utc>) -> Option<Source> {
        let mut best: Option<usize> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.consumed {
                continue;
            }
            let ready = self
                .budgets
                .get(&entry.source.host)
                .is_none_or(|b| b.is_ready(now));
            if !ready {
                continue;
            }
            best = match best {
                None => Some(index),
                Some(current) => {
                    let cur = &self.entries[current];
                    if (entry.priority, std::cmp::Reverse(entry.seq))
                        > (cur.priority, std::cmp::Reverse(cur.seq))
                    {
                        Some(index)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        let index = best?;
        self.entries[index].consumed = true;
        let source = self.entries[index].source.clone();
        self.budget_mut(&source.host).record_started();
        Some(source)
    }

    /// Record a classified fetch outcome for a host.
    pub fn record_outcome(&mut self, host: &str, class: OutcomeClass, now: DateTime<Utc>) {
        self.budget_mut(host).record_outcome(class, now);
    }

    /// Record that this host's evidence survived consensus.
    pub fn record_evidence_used(&mut self, host: &str) {
        self.budget_mut(host).record_evidence_used();
    }

    /// Record a page that fetched fine but yielded nothing.
    pub fn record_parse_fail(&mut self, host: &str) {
        self.budget_mut(host).record_parse_fail();
    }

    /// Block a host for the rest of the run (manufacturer brand mismatch).
    pub fn block_host(&mut self, host: &str) {
        self.budget_mut(host).block();
    }

    #[must_use]
    pub fn budget(&self, host: &str) -> Option<&HostBudget> {
        self.budgets.get(host)
    }

    /// Budgets for observability, sorted by host.
    #[must_use]
    pub fn budgets(&self) -> Vec<&HostBudget> {
        let mut rows: Vec<&HostBudget> = self.budgets.values().collect();
        rows.sort_by(|a, b| a.host.cmp(&b.host));
        rows
    }

    /// URLs not yet handed out whose hosts are ready at `now`.
    #[must_use]
    pub fn pending_count(&self, now: DateTime<Utc>) -> usize {
        self.entries
            .iter()
            .filter(|e| !e.consumed)
            .filter(|e| {
                self.budgets
                    .get(&e.source.host)
                    .is_none_or(|b| b.is_ready(now))
            })
            .count()
    }

    fn budget_mut(&mut self, host: &str) -> &mut HostBudget {
        self.budgets
            .entry(host.to_string())
            .or_insert_with(|| HostBudget::new(host))
    }

    /// Priority composition, descending weight: approved bonus, tier, role,
    /// path affinity with critical needs, learned domain yield.
    fn priority_of(&self, source: &Source) -> i64 {
        let approved = if source.approved_domain { 10_000 } else { 0 };
        let tier = i64::from(source.tier.rank()) * 1_000;
        let role = i64::from(source.role.rank()) * 100;

        let path = source
            .url
            .to_ascii_lowercase();
        let affinity: i64 = self
            .path_hints
            .iter()
            .filter(|hint| path.contains(hint.as_str()))
            .count()
            .min(3) as i64
            * 25;

        let learned = self
            .learned_yield
            .get(&source.root_domain)
            .copied()
            .unwrap_or(0.0);
        let learned = (learned * 20.0) as i64;

        approved + tier + role + affinity + learned
    }
}

fn dedupe_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            let mut s = parsed.to_string();
            if s.ends_with('/') && parsed.path() == "/" {
                s.pop();
            }
            s.to_ascii_lowercase()
        }
        Err(_) => url.to_ascii_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SourceRegistry {
        serde_json::from_str(
            r#"{
                "approved": {
                    "manufacturer": ["logitechg.com"],
                    "lab": ["rtings.com"],
                    "retailer": ["amazon.com"]
                },
                "denylist": ["spam.example"]
            }"#,
        )
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        "2026-08-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn manufacturer_precedes_retailer_and_unknown() {
        let mut frontier = Frontier::new(registry());
        frontier.enqueue("https://random.blog/review");
        frontier.enqueue("https://www.amazon.com/dp/B08X");
        frontier.enqueue("https://www.logitechg.com/pro-x-superlight");

        assert_eq!(
            frontier.next_ready(now()).unwrap().host,
            "www.logitechg.com"
        );
        assert_eq!(frontier.next_ready(now()).unwrap().host, "www.amazon.com");
        assert_eq!(frontier.next_ready(now()).unwrap().host, "random.blog");
        assert!(frontier.next_ready(now()).is_none());
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut frontier = Frontier::new(registry());
        frontier.enqueue("https://a.example/one");
        frontier.enqueue("https://b.example/two");
        assert_eq!(frontier.next_ready(now()).unwrap().host, "a.example");
        assert_eq!(frontier.next_ready(now()).unwrap().host, "b.example");
    }

    #[test]
    fn denied_hosts_are_dropped() {
        let mut frontier = Frontier::new(registry());
        assert_eq!(frontier.enqueue("https://spam.example/deal"), Enqueue::Denied);
        assert!(frontier.next_ready(now()).is_none());
    }

    #[test]
    fn duplicates_count_dedupe_hits() {
        let mut frontier = Frontier::new(registry());
        assert_eq!(
            frontier.enqueue("https://rtings.com/mouse/reviews/g-pro"),
            Enqueue::Added
        );
        assert_eq!(
            frontier.enqueue("https://rtings.com/mouse/reviews/g-pro#specs"),
            Enqueue::Duplicate
        );
        assert_eq!(frontier.budget("rtings.com").unwrap().dedupe_hits, 1);
    }

    #[test]
    fn backoff_host_is_skipped_until_ready() {
        let mut frontier = Frontier::new(registry());
        frontier.enqueue("https://www.logitechg.com/a");
        frontier.enqueue("https://rtings.com/b");
        frontier.record_outcome("www.logitechg.com", OutcomeClass::RateLimited, now());

        // Manufacturer is in backoff; lab pops first.
        assert_eq!(frontier.next_ready(now()).unwrap().host, "rtings.com");
        assert!(frontier.next_ready(now()).is_none());

        // After the backoff window the manufacturer URL is served.
        let later = now() + chrono::Duration::minutes(20);
        assert_eq!(
            frontier.next_ready(later).unwrap().host,
            "www.logitechg.com"
        );
    }

    #[test]
    fn path_hints_raise_priority_within_a_tier() {
        let mut frontier = Frontier::new(registry());
        frontier.set_path_hints(vec!["specs".to_string()]);
        frontier.enqueue("https://www.logitechg.com/pro-x/buy");
        frontier.enqueue("https://www.logitechg.com/pro-x/specs");
        assert!(
            frontier
                .next_ready(now())
                .unwrap()
                .url
                .ends_with("/specs")
        );
    }

    #[test]
    fn learned_yield_orders_unknown_hosts() {
        let mut frontier = Frontier::new(registry());
        frontier.set_learned_yield("good.example", 0.9);
        frontier.enqueue("https://meh.example/page");
        frontier.enqueue("https://good.example/page");
        assert_eq!(frontier.next_ready(now()).unwrap().host, "good.example");
    }

    #[test]
    fn blocked_host_never_serves() {
        let mut frontier = Frontier::new(registry());
        frontier.enqueue("https://www.logitechg.com/a");
        frontier.block_host("www.logitechg.com");
        assert!(frontier.next_ready(now()).is_none());
    }
}
