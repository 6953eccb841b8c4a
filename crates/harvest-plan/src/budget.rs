//! Per-host budgets: outcome counters, backoff, and host-state scoring.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::outcome::OutcomeClass;

/// Host state derived from score and backoff, best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    Active,
    Open,
    Degraded,
    Backoff,
    Blocked,
}

/// Budget row for one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostBudget {
    pub host: String,
    pub started: u32,
    pub completed: u32,
    pub dedupe_hits: u32,
    pub evidence_used: u32,
    pub parse_fail_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_ts: Option<DateTime<Utc>>,
    pub outcome_counts: BTreeMap<String, u32>,
    pub score: i32,
    /// Hard block for the rest of the run (brand mismatch, repeated abuse).
    pub hard_blocked: bool,
}

const SCORE_CAP: i32 = 100;
const SCORE_FLOOR: i32 = -100;
const BLOCK_THRESHOLD: i32 = -50;

impl HostBudget {
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            started: 0,
            completed: 0,
            dedupe_hits: 0,
            evidence_used: 0,
            parse_fail_count: 0,
            next_retry_ts: None,
            outcome_counts: BTreeMap::new(),
            score: 50,
            hard_blocked: false,
        }
    }

    /// Record a fetch start.
    pub fn record_started(&mut self) {
        self.started += 1;
    }

    /// Record a classified outcome. Backoff and score move together;
    /// `next_retry_ts` only ever moves forward.
    pub fn record_outcome(&mut self, class: OutcomeClass, now: DateTime<Utc>) {
        self.completed += 1;
        *self
            .outcome_counts
            .entry(class.as_str().to_string())
            .or_insert(0) += 1;

        self.score = (self.score + score_delta(class)).clamp(SCORE_FLOOR, SCORE_CAP);

        if let Some(backoff) = backoff_for(class) {
            let candidate = now + backoff;
            self.next_retry_ts = Some(match self.next_retry_ts {
                Some(existing) if existing > candidate => existing,
                _ => candidate,
            });
        }
    }

    /// Record that evidence from this host survived into consensus.
    pub fn record_evidence_used(&mut self) {
        self.evidence_used += 1;
        self.score = (self.score + 3).min(SCORE_CAP);
    }

    /// Record a parse failure (page fetched, nothing extracted).
    pub fn record_parse_fail(&mut self) {
        self.parse_fail_count += 1;
    }

    /// Record that a URL on this host was already seen.
    pub fn record_dedupe_hit(&mut self) {
        self.dedupe_hits += 1;
    }

    /// Block for the rest of the run.
    pub fn block(&mut self) {
        self.hard_blocked = true;
    }

    /// Current state at `now`.
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> HostState {
        if self.hard_blocked || self.score <= BLOCK_THRESHOLD {
            return HostState::Blocked;
        }
        if self.next_retry_ts.is_some_and(|ts| ts > now) {
            return HostState::Backoff;
        }
        if self.score >= 75 {
            HostState::Active
        } else if self.score >= 40 {
            HostState::Open
        } else {
            HostState::Degraded
        }
    }

    /// Whether the planner may hand out a URL on this host right now.
    #[must_use]
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        !matches!(self.state(now), HostState::Backoff | HostState::Blocked)
    }
}

fn score_delta(class: OutcomeClass) -> i32 {
    match class {
        OutcomeClass::Ok => 2,
        OutcomeClass::NotFound | OutcomeClass::BadContent => -6,
        OutcomeClass::RateLimited | OutcomeClass::FetchError => -8,
        OutcomeClass::ServerError | OutcomeClass::NetworkTimeout => -10,
        OutcomeClass::LoginWall | OutcomeClass::BotChallenge => -12,
        OutcomeClass::Blocked => -14,
    }
}

fn backoff_for(class: OutcomeClass) -> Option<Duration> {
    match class {
        OutcomeClass::RateLimited => Some(Duration::minutes(15)),
        OutcomeClass::Blocked | OutcomeClass::LoginWall | OutcomeClass::BotChallenge => {
            Some(Duration::minutes(30))
        }
        OutcomeClass::NetworkTimeout | OutcomeClass::ServerError => Some(Duration::hours(6)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-08-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn rate_limit_backs_off_fifteen_minutes() {
        let mut budget = HostBudget::new("example.com");
        budget.record_outcome(OutcomeClass::RateLimited, now());
        let retry = budget.next_retry_ts.unwrap();
        assert_eq!(retry, now() + Duration::minutes(15));
        assert_eq!(budget.state(now()), HostState::Backoff);
        assert!(budget.is_ready(now() + Duration::minutes(16)));
    }

    #[test]
    fn next_retry_only_moves_forward() {
        let mut budget = HostBudget::new("example.com");
        budget.record_outcome(OutcomeClass::NetworkTimeout, now()); // 6h
        let long_retry = budget.next_retry_ts.unwrap();
        budget.record_outcome(OutcomeClass::RateLimited, now()); // 15m, earlier
        assert_eq!(budget.next_retry_ts.unwrap(), long_retry);
    }

    #[test]
    fn score_decays_to_blocked() {
        let mut budget = HostBudget::new("example.com");
        for _ in 0..8 {
            budget.record_outcome(OutcomeClass::Blocked, now());
        }
        assert_eq!(budget.state(now() + Duration::hours(7)), HostState::Blocked);
    }

    #[test]
    fn ok_and_evidence_grow_score_capped() {
        let mut budget = HostBudget::new("example.com");
        for _ in 0..100 {
            budget.record_outcome(OutcomeClass::Ok, now());
            budget.record_evidence_used();
        }
        assert_eq!(budget.score, 100);
        assert_eq!(budget.state(now()), HostState::Active);
    }

    #[test]
    fn outcome_counts_accumulate() {
        let mut budget = HostBudget::new("example.com");
        budget.record_outcome(OutcomeClass::Ok, now());
        budget.record_outcome(OutcomeClass::Ok, now());
        budget.record_outcome(OutcomeClass::NotFound, now());
        assert_eq!(budget.outcome_counts["ok"], 2);
        assert_eq!(budget.outcome_counts["not_found"], 1);
        assert_eq!(budget.completed, 3);
    }

    #[test]
    fn hard_block_is_terminal() {
        let mut budget = HostBudget::new("example.com");
        budget.block();
        for _ in 0..50 {
            budget.record_outcome(OutcomeClass::Ok, now());
        }
        assert_eq!(budget.state(now()), HostState::Blocked);
        assert!(!budget.is_ready(now()));
    }
}
