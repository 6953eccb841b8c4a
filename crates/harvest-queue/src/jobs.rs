//! SQL-backed automation jobs: deduplicated inserts, audited transitions,
//! and a worker with per-domain failure tracking.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use harvest_util::HarvestError;

/// Automation-job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// `queued→running`, `running→{done,failed}`, `failed→queued`.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Queued, Self::Running)
                | (Self::Running, Self::Done | Self::Failed)
                | (Self::Failed, Self::Queued)
        )
    }
}

/// One automation job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationJob {
    pub id: i64,
    pub job_type: String,
    pub dedupe_key: String,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed job store with an audit table of every transition.
pub struct JobStore {
    conn: Connection,
}

impl JobStore {
    /// Open (and migrate) a store at `path`; `:memory:` works for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open automation job store")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_type TEXT NOT NULL,
                dedupe_key TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS job_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL,
                from_status TEXT NOT NULL,
                to_status TEXT NOT NULL,
                at TEXT NOT NULL,
                detail TEXT
            );",
        )
        .context("failed to migrate automation job store")?;
        Ok(Self { conn })
    }

    /// Enqueue a job. If a job with the same `dedupe_key` already exists,
    /// the existing row is returned and nothing is inserted.
    pub fn enqueue(
        &self,
        job_type: &str,
        dedupe_key: &str,
        payload: &serde_json::Value,
    ) -> Result<AutomationJob> {
        if let Some(existing) = self.find_by_dedupe_key(dedupe_key)? {
            debug!(dedupe_key, id = existing.id, "dedupe hit; returning existing job");
            return Ok(existing);
        }

        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO jobs (job_type, dedupe_key, status, payload, created_at, updated_at)
                 VALUES (?1, ?2, 'queued', ?3, ?4, ?4)",
                params![job_type, dedupe_key, payload.to_string(), now],
            )
            .context("failed to insert automation job")?;
        self.find_by_dedupe_key(dedupe_key)?
            .context("inserted job not found")
    }

    /// Fetch by dedupe key.
    pub fn find_by_dedupe_key(&self, dedupe_key: &str) -> Result<Option<AutomationJob>> {
        self.conn
            .query_row(
                "SELECT id, job_type, dedupe_key, status, payload, created_at, updated_at
                 FROM jobs WHERE dedupe_key = ?1",
                params![dedupe_key],
                row_to_job,
            )
            .optional()
            .context("failed to query job by dedupe key")
    }

    /// Fetch by id.
    pub fn get(&self, id: i64) -> Result<Option<AutomationJob>> {
        self.conn
            .query_row(
                "SELECT id, job_type, dedupe_key, status, payload, created_at, updated_at
                 FROM jobs WHERE id = ?1",
                params![id],
                row_to_job,
            )
            .optional()
            .context("failed to query job by id")
    }

    /// Validated transition with an audit row.
    pub fn transition(&self, id: i64, to: JobStatus, detail: Option<&str>) -> Result<()> {
        let job = self
            .get(id)?
            .ok_or_else(|| HarvestError::MissingOrInvalid(format!("unknown job id {id}")))?;
        if !job.status.can_transition_to(to) {
            return Err(HarvestError::QueueTransitionInvalid {
                product_id: format!("job:{id}"),
                from: job.status.as_str().to_string(),
                to: to.as_str().to_string(),
            }
            .into());
        }

        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![to.as_str(), now, id],
            )
            .context("failed to update job status")?;
        self.conn
            .execute(
                "INSERT INTO job_audit (job_id, from_status, to_status, at, detail)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, job.status.as_str(), to.as_str(), now, detail],
            )
            .context("failed to append job audit row")?;
        Ok(())
    }

    /// Oldest queued job, claimed into `running`.
    pub fn claim_next(&self) -> Result<Option<AutomationJob>> {
        let job = self
            .conn
            .query_row(
                "SELECT id, job_type, dedupe_key, status, payload, created_at, updated_at
                 FROM jobs WHERE status = 'queued' ORDER BY id LIMIT 1",
                [],
                row_to_job,
            )
            .optional()
            .context("failed to query next queued job")?;
        let Some(job) = job else {
            return Ok(None);
        };
        self.transition(job.id, JobStatus::Running, Some("claimed"))?;
        self.get(job.id)
    }

    /// Mark queued jobs older than `ttl` as failed.
    pub fn expire_stale(&self, ttl: Duration, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - ttl;
        let ids: Vec<i64> = {
            let mut statement = self
                .conn
                .prepare("SELECT id FROM jobs WHERE status = 'queued' AND created_at < ?1")
                .context("failed to prepare stale query")?;
            let rows = statement
                .query_map(params![cutoff.to_rfc3339()], |row| row.get(0))
                .context("failed to query stale jobs")?;
            rows.collect::<std::result::Result<_, _>>()
                .context("failed to read stale job ids")?
        };
        for id in &ids {
            // TTL'd queued jobs jump straight to failed; the audit row
            // records why.
            let now_str = now.to_rfc3339();
            self.conn
                .execute(
                    "UPDATE jobs SET status = 'failed', updated_at = ?1 WHERE id = ?2",
                    params![now_str, id],
                )
                .context("failed to expire job")?;
            self.conn
                .execute(
                    "INSERT INTO job_audit (job_id, from_status, to_status, at, detail)
                     VALUES (?1, 'queued', 'failed', ?2, 'ttl_expired')",
                    params![id, now_str],
                )
                .context("failed to audit expiry")?;
        }
        Ok(ids.len())
    }

    /// Audit rows for one job, oldest first.
    pub fn audit_trail(&self, id: i64) -> Result<Vec<(String, String, String)>> {
        let mut statement = self
            .conn
            .prepare(
                "SELECT from_status, to_status, COALESCE(detail, '')
                 FROM job_audit WHERE job_id = ?1 ORDER BY id",
            )
            .context("failed to prepare audit query")?;
        let rows = statement
            .query_map(params![id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .context("failed to query audit trail")?;
        rows.collect::<std::result::Result<_, _>>()
            .context("failed to read audit trail")
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<AutomationJob> {
    let status_raw: String = row.get(3)?;
    let payload_raw: String = row.get(4)?;
    let created_raw: String = row.get(5)?;
    let updated_raw: String = row.get(6)?;
    Ok(AutomationJob {
        id: row.get(0)?,
        job_type: row.get(1)?,
        dedupe_key: row.get(2)?,
        status: JobStatus::parse(&status_raw).unwrap_or(JobStatus::Failed),
        payload: serde_json::from_str(&payload_raw).unwrap_or(serde_json::Value::Null),
        created_at: DateTime::parse_from_rfc3339(&created_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: DateTime::parse_from_rfc3339(&updated_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Handler registry for the worker.
pub type JobHandler = Box<dyn Fn(&AutomationJob) -> Result<(), String> + Send + Sync>;

/// Per-domain failure tracking: after `max_failures` a domain is blocked;
/// before that each failure doubles the backoff.
#[derive(Debug)]
pub struct DomainTracker {
    max_failures: u32,
    backoff_base_ms: i64,
    failures: HashMap<String, u32>,
    next_attempt: HashMap<String, DateTime<Utc>>,
}

impl DomainTracker {
    #[must_use]
    pub fn new(max_failures: u32, backoff_base_ms: i64) -> Self {
        Self {
            max_failures,
            backoff_base_ms,
            failures: HashMap::new(),
            next_attempt: HashMap::new(),
        }
    }

    #[must_use]
    pub fn is_blocked(&self, domain: &str) -> bool {
        self.failures
            .get(domain)
            .is_some_and(|f| *f >= self.max_failures)
    }

    #[must_use]
    pub fn is_ready(&self, domain: &str, now: DateTime<Utc>) -> bool {
        !self.is_blocked(domain)
            && self.next_attempt.get(domain).is_none_or(|at| *at <= now)
    }

    pub fn record_failure(&mut self, domain: &str, now: DateTime<Utc>) {
        let count = self.failures.entry(domain.to_string()).or_insert(0);
        *count += 1;
        let backoff_ms = self.backoff_base_ms * 2_i64.pow(count.saturating_sub(1).min(16));
        self.next_attempt
            .insert(domain.to_string(), now + Duration::milliseconds(backoff_ms));
    }

    pub fn record_success(&mut self, domain: &str) {
        self.failures.remove(domain);
        self.next_attempt.remove(domain);
    }
}

/// Consume one queued job: dispatch to its handler, honoring domain
/// blocking/backoff. Returns the processed job id, or `None` when nothing
/// was runnable.
pub fn run_next_job(
    store: &JobStore,
    handlers: &HashMap<String, JobHandler>,
    tracker: &mut DomainTracker,
    now: DateTime<Utc>,
) -> Result<Option<i64>> {
    let Some(job) = store.claim_next()? else {
        return Ok(None);
    };

    let domain = job
        .payload
        .get("domain")
        .and_then(|d| d.as_str())
        .unwrap_or("")
        .to_string();

    if !domain.is_empty() && !tracker.is_ready(&domain, now) {
        warn!(job = job.id, %domain, "domain blocked or backing off; failing job");
        store.transition(job.id, JobStatus::Failed, Some("domain_unavailable"))?;
        return Ok(Some(job.id));
    }

    let Some(handler) = handlers.get(&job.job_type) else {
        warn!(job = job.id, job_type = %job.job_type, "no handler registered");
        store.transition(job.id, JobStatus::Failed, Some("worker_handler_missing"))?;
        return Ok(Some(job.id));
    };

    match handler(&job) {
        Ok(()) => {
            if !domain.is_empty() {
                tracker.record_success(&domain);
            }
            store.transition(job.id, JobStatus::Done, None)?;
        }
        Err(error) => {
            if !domain.is_empty() {
                tracker.record_failure(&domain, now);
            }
            store.transition(job.id, JobStatus::Failed, Some(&error))?;
        }
    }
    Ok(Some(job.id))
}
