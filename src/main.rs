//! Harvester CLI: thin wiring over the library crates.
//!
//! Every command prints a JSON envelope (`{ok, status, errors[], ...}`) and
//! exits 0 iff the envelope carries no errors.

use std::collections::BTreeMap;
use std::process::ExitCode;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use serde_json::json;

use harvester::consensus::Job;
use harvester::engine::{EngineConfig, FsRunStore, Orchestrator, RunOptions, RunStatus};
use harvester::plan::{DryRunFetcher, SourceRegistry};
use harvester::queue::{Batch, LearningFile, QueueFile, QueueProduct, QueueStatus};
use harvester::util::{Envelope, to_canonical_json, write_file_atomic};

#[derive(Parser)]
#[command(name = "harvester", version, about = "Evidence-backed product record extraction")]
struct Cli {
    /// Helper root holding category directories.
    #[arg(long, global = true, default_value = "./helper")]
    helper_root: Utf8PathBuf,

    /// Emit logs as line JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a category's rule pack from its workbook sources.
    Compile {
        category: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a compiled rule pack (files, schemas, manifest).
    Validate { category: String },
    /// Classify what the next compile would change.
    RulesDiff { category: String },
    /// Watch sources and recompile on change.
    WatchCompile {
        category: String,
        #[arg(long, default_value_t = 400)]
        debounce_ms: u64,
        #[arg(long)]
        max_events: Option<u32>,
        #[arg(long)]
        watch_seconds: Option<u64>,
    },
    /// Run one product job through the pipeline (dry-run fetcher).
    Run {
        /// Path to the job JSON.
        job: Utf8PathBuf,
        #[arg(long)]
        seed_url: Vec<String>,
        #[arg(long, default_value = "./runs")]
        out: Utf8PathBuf,
    },
    /// Run a product repeatedly until it completes or exhausts attempts.
    RunUntilComplete {
        job: Utf8PathBuf,
        #[arg(long)]
        seed_url: Vec<String>,
        #[arg(long, default_value = "./runs")]
        out: Utf8PathBuf,
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,
    },
    /// Add a product to a category queue.
    QueueAdd {
        category: String,
        product_id: String,
        #[arg(long, default_value_t = 0)]
        priority: i32,
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,
    },
    /// Show a category queue.
    QueueStatus { category: String },
    /// Pop and run the next pending product in a category queue.
    QueueRun {
        category: String,
        #[arg(long, default_value = "./jobs")]
        jobs_dir: Utf8PathBuf,
        #[arg(long, default_value = "./runs")]
        out: Utf8PathBuf,
    },
    /// Create a batch over a list of product ids.
    BatchCreate {
        batch_id: String,
        #[arg(required = true)]
        product_ids: Vec<String>,
        #[arg(long, default_value_t = 1)]
        max_retries: u32,
    },
    /// Run the next pending product of a batch.
    BatchRun {
        batch_id: String,
        #[arg(long, default_value = "./jobs")]
        jobs_dir: Utf8PathBuf,
        #[arg(long, default_value = "./runs")]
        out: Utf8PathBuf,
    },
    /// Show a batch's progress.
    BatchStatus { batch_id: String },
    /// Scaffold a new category's source directories.
    InitCategory { category: String },
    /// List the fields of a compiled category.
    ListFields { category: String },
    /// Per-field rule report for a compiled category.
    FieldReport { category: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    harvester::util::logging::init_logging(cli.log_json, "info");

    let envelope = match dispatch(&cli).await {
        Ok(envelope) => envelope,
        Err(err) => Envelope::error(json!({}), vec![format!("{err:#}")]),
    };

    match serde_json::to_string_pretty(&envelope) {
        Ok(out) => println!("{out}"),
        Err(err) => {
            eprintln!("failed to render envelope: {err}");
            return ExitCode::FAILURE;
        }
    }
    if envelope.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn dispatch(cli: &Cli) -> Result<Envelope<serde_json::Value>> {
    let root = &cli.helper_root;
    match &cli.command {
        Command::Compile { category, dry_run } => {
            let report = harvester::rules::compile(root, category, *dry_run)?;
            let warnings = report.warnings.clone();
            Ok(Envelope::success(serde_json::to_value(&report)?).with_warnings(warnings))
        }
        Command::Validate { category } => {
            let report = harvester::rules::validate(root, category)?;
            let payload = serde_json::to_value(&report)?;
            if report.is_valid() {
                Ok(Envelope::success(payload).with_warnings(report.warnings))
            } else {
                Ok(Envelope::error(payload, report.errors).with_warnings(report.warnings))
            }
        }
        Command::RulesDiff { category } => {
            let report = harvester::rules::rules_diff(root, category)?;
            Ok(Envelope::success(serde_json::to_value(&report)?))
        }
        Command::WatchCompile {
            category,
            debounce_ms,
            max_events,
            watch_seconds,
        } => {
            let summary = harvester::rules::watch_compile(
                root,
                category,
                &harvester::rules::WatchOptions {
                    debounce_ms: *debounce_ms,
                    max_events: *max_events,
                    watch_seconds: *watch_seconds,
                },
            )?;
            let payload = serde_json::to_value(&summary)?;
            match summary.shutdown_reason.as_str() {
                "compile_failed" | "watcher_error" => {
                    Ok(Envelope::error(payload, vec![summary.shutdown_reason]))
                }
                _ => Ok(Envelope::success(payload)),
            }
        }
        Command::Run { job, seed_url, out } => {
            let outcome = run_job(root, job, seed_url, out, "").await?;
            Ok(run_envelope(&outcome))
        }
        Command::RunUntilComplete {
            job,
            seed_url,
            out,
            max_attempts,
        } => {
            let mut last = None;
            for attempt in 0..*max_attempts {
                let outcome =
                    run_job(root, job, seed_url, out, &format!("attempt-{attempt}")).await?;
                let complete = outcome.status == RunStatus::Complete;
                last = Some(outcome);
                if complete {
                    break;
                }
            }
            let outcome = last.context("no attempts executed")?;
            Ok(run_envelope(&outcome))
        }
        Command::QueueAdd {
            category,
            product_id,
            priority,
            max_attempts,
        } => {
            let queue = QueueFile::new(&state_dir(root), category);
            let product = queue.update(category, |state| {
                let product = QueueProduct {
                    product_id: product_id.clone(),
                    category: category.clone(),
                    s3key: format!("jobs/{product_id}.json"),
                    status: QueueStatus::Pending,
                    priority: *priority,
                    retry_count: 0,
                    max_attempts: *max_attempts,
                    next_retry_at: None,
                    next_action_hint: "queued".to_string(),
                };
                state
                    .products
                    .insert(product_id.clone(), product.clone());
                Ok(product)
            })?;
            Ok(Envelope::success(serde_json::to_value(&product)?))
        }
        Command::QueueStatus { category } => {
            let queue = QueueFile::new(&state_dir(root), category);
            let state = queue.load(category)?;
            Ok(Envelope::success(serde_json::to_value(&state)?))
        }
        Command::QueueRun {
            category,
            jobs_dir,
            out,
        } => {
            let queue = QueueFile::new(&state_dir(root), category);
            let next = queue.update(category, |state| {
                let Some(product) = state.select_next(chrono::Utc::now()).cloned() else {
                    return Ok(None);
                };
                state.transition(&product.product_id, QueueStatus::Running, "running")?;
                Ok(Some(product))
            })?;

            let Some(product) = next else {
                return Ok(Envelope::skipped(json!({"message": "queue empty"})));
            };

            let job_path = jobs_dir.join(format!("{}.json", product.product_id));
            let result = run_job(root, &job_path, &[], out, "").await;

            let envelope = match result {
                Ok(outcome) => {
                    let status = match outcome.status {
                        RunStatus::Complete => QueueStatus::Complete,
                        RunStatus::Exhausted => QueueStatus::Exhausted,
                        RunStatus::NeedsManual => QueueStatus::NeedsManual,
                    };
                    queue.update(category, |state| {
                        state.transition(
                            &product.product_id,
                            status,
                            &outcome.stop_reason.to_string(),
                        )?;
                        Ok(())
                    })?;
                    run_envelope(&outcome)
                }
                Err(err) => {
                    queue.update(category, |state| {
                        state.record_failure(&product.product_id, 60, chrono::Utc::now())?;
                        Ok(())
                    })?;
                    Envelope::error(
                        json!({"productId": product.product_id}),
                        vec![format!("{err:#}")],
                    )
                }
            };
            Ok(envelope)
        }
        Command::BatchCreate {
            batch_id,
            product_ids,
            max_retries,
        } => {
            let batch = Batch::new(batch_id.clone(), product_ids.clone(), *max_retries);
            save_batch(root, &batch)?;
            Ok(Envelope::success(serde_json::to_value(&batch)?))
        }
        Command::BatchRun {
            batch_id,
            jobs_dir,
            out,
        } => {
            let mut batch = load_batch(root, batch_id)?;

            // The injected product runner drives the pipeline per product.
            let mut failures: BTreeMap<String, String> = BTreeMap::new();
            let ran = {
                let handle = tokio::runtime::Handle::current();
                let mut runner = |product_id: &str| -> Result<(), String> {
                    let job_path = jobs_dir.join(format!("{product_id}.json"));
                    let result = tokio::task::block_in_place(|| {
                        handle.block_on(run_job(root, &job_path, &[], out, ""))
                    });
                    match result {
                        Ok(outcome) if outcome.status == RunStatus::Complete => Ok(()),
                        Ok(outcome) => Err(format!("run ended: {}", outcome.stop_reason)),
                        Err(err) => Err(format!("{err:#}")),
                    }
                };
                batch.run_next_product(&mut runner)?
            };
            for product in &batch.products {
                if let Some(error) = &product.last_error {
                    failures.insert(product.product_id.clone(), error.clone());
                }
            }

            save_batch(root, &batch)?;
            Ok(Envelope::success(json!({
                "batch": serde_json::to_value(&batch)?,
                "ran": ran,
                "failures": failures,
            })))
        }
        Command::BatchStatus { batch_id } => {
            let batch = load_batch(root, batch_id)?;
            let (done, skipped, total) = batch.progress();
            Ok(Envelope::success(json!({
                "batch": serde_json::to_value(&batch)?,
                "done": done,
                "skipped": skipped,
                "total": total,
            })))
        }
        Command::InitCategory { category } => {
            init_category(root, category)?;
            Ok(Envelope::success(json!({"category": category})))
        }
        Command::ListFields { category } => {
            let pack = harvester::rules::load_rule_pack(root, category)?;
            Ok(Envelope::success(json!({
                "category": category,
                "fields": harvester::rules::report::list_fields(&pack),
            })))
        }
        Command::FieldReport { category } => {
            let pack = harvester::rules::load_rule_pack(root, category)?;
            Ok(Envelope::success(json!({
                "category": category,
                "fields": harvester::rules::report::field_report(&pack),
            })))
        }
    }
}

fn run_envelope(outcome: &harvester::engine::RunOutcome) -> Envelope<serde_json::Value> {
    Envelope::success(json!({
        "status": outcome.status,
        "stop_reason": outcome.stop_reason.to_string(),
        "cancelled": outcome.cancelled,
        "rounds": outcome.rounds.len(),
        "validated": outcome.record.quality.validated,
        "record": outcome.record,
    }))
}

async fn run_job(
    helper_root: &Utf8Path,
    job_path: &Utf8Path,
    seed_urls: &[String],
    out: &Utf8Path,
    run_id: &str,
) -> Result<harvester::engine::RunOutcome> {
    let raw = std::fs::read_to_string(job_path.as_std_path())
        .with_context(|| format!("failed to read job: {job_path}"))?;
    let mut job: Job =
        serde_json::from_str(&raw).with_context(|| format!("failed to parse job: {job_path}"))?;
    apply_category_config(helper_root, &mut job)?;

    let pack = harvester::rules::load_rule_pack(helper_root, &job.category)?;
    let registry = load_registry(helper_root, &job.category)?;

    let mut config = EngineConfig::default();
    if let Some(templates) =
        read_category_json::<Vec<String>>(helper_root, &job.category, "search_templates.json")?
    {
        if !templates.is_empty() {
            config.search_templates = templates;
        }
    }

    // The production fetcher and LLM transport are injected by their
    // external collaborators through the library API; the CLI ships the
    // dry-run pipeline.
    let fetcher = DryRunFetcher::new();
    let store = FsRunStore::new(out.to_path_buf());

    let learning = LearningFile::new(&state_dir(helper_root), &job.category);
    let learned_state = learning.load()?;
    let learned_yield: std::collections::BTreeMap<String, f64> = learned_state
        .domain_field_yield
        .keys()
        .filter_map(|key| key.split('|').next())
        .map(|domain| (domain.to_string(), learned_state.domain_score(domain)))
        .collect();

    let orchestrator = Orchestrator {
        pack,
        registry,
        fetcher: &fetcher,
        llm: None,
        search: None,
        store: Some(&store),
        config,
    };

    let outcome = orchestrator
        .run(
            &job,
            &RunOptions {
                seed_urls: seed_urls.to_vec(),
                run_id: run_id.to_string(),
                learned_yield,
            },
        )
        .await?;

    // Learning stores pick up the run's feedback signals.
    learning.record(&outcome.learning)?;

    Ok(outcome)
}

/// Fold category-level config into a job: `required_fields.json` fills an
/// absent requirement list, `anchors.json` supplies anchors the job did not
/// set itself.
fn apply_category_config(helper_root: &Utf8Path, job: &mut Job) -> Result<()> {
    if job.requirements.required_fields.is_none() {
        if let Some(required) =
            read_category_json::<Vec<String>>(helper_root, &job.category, "required_fields.json")?
        {
            job.requirements.required_fields = Some(required);
        }
    }
    if let Some(anchors) = read_category_json::<BTreeMap<String, String>>(
        helper_root,
        &job.category,
        "anchors.json",
    )? {
        for (field, value) in anchors {
            job.anchors.entry(field).or_insert(value);
        }
    }
    Ok(())
}

fn read_category_json<T: serde::de::DeserializeOwned>(
    helper_root: &Utf8Path,
    category: &str,
    name: &str,
) -> Result<Option<T>> {
    let path = helper_root.join("categories").join(category).join(name);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path.as_std_path())
        .with_context(|| format!("failed to read category config: {path}"))?;
    let value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse category config: {path}"))?;
    Ok(Some(value))
}

fn load_registry(helper_root: &Utf8Path, category: &str) -> Result<SourceRegistry> {
    let path = helper_root
        .join("categories")
        .join(category)
        .join("sources.json");
    if !path.exists() {
        return Ok(SourceRegistry::default());
    }
    let raw = std::fs::read_to_string(path.as_std_path())
        .with_context(|| format!("failed to read source registry: {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse source registry: {path}"))
}

fn state_dir(helper_root: &Utf8Path) -> Utf8PathBuf {
    helper_root.join("_state")
}

fn batch_path(helper_root: &Utf8Path, batch_id: &str) -> Utf8PathBuf {
    state_dir(helper_root).join(format!("batch-{batch_id}.json"))
}

fn save_batch(helper_root: &Utf8Path, batch: &Batch) -> Result<()> {
    write_file_atomic(
        &batch_path(helper_root, &batch.id),
        &to_canonical_json(batch)?,
    )
}

fn load_batch(helper_root: &Utf8Path, batch_id: &str) -> Result<Batch> {
    let path = batch_path(helper_root, batch_id);
    let raw = std::fs::read_to_string(path.as_std_path())
        .with_context(|| format!("unknown batch: {batch_id}"))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse batch: {path}"))
}

fn init_category(helper_root: &Utf8Path, category: &str) -> Result<()> {
    let category = harvester::rules::paths::normalize_category(category)?;
    let root = helper_root.join(&category);

    let source = root.join("_source");
    std::fs::create_dir_all(source.as_std_path())
        .with_context(|| format!("failed to create {source}"))?;
    for dir in ["_control_plane", "_overrides/components", "_suggestions"] {
        let path = root.join(dir);
        std::fs::create_dir_all(path.as_std_path())
            .with_context(|| format!("failed to create {path}"))?;
    }

    let workbook = source.join("workbook_fields.json");
    if !workbook.exists() {
        write_file_atomic(
            &workbook,
            &to_canonical_json(&json!({
                "fields": [],
                "template_library": {},
                "enums": {},
                "components": {}
            }))?,
        )?;
    }

    let config_dir = helper_root.join("categories").join(&category);
    std::fs::create_dir_all(config_dir.as_std_path())
        .with_context(|| format!("failed to create {config_dir}"))?;
    let sources = config_dir.join("sources.json");
    if !sources.exists() {
        write_file_atomic(
            &sources,
            &to_canonical_json(&json!({
                "approved": {"manufacturer": [], "lab": [], "database": [], "retailer": []},
                "denylist": []
            }))?,
        )?;
    }
    Ok(())
}
