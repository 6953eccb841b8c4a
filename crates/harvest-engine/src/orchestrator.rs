//! The convergence loop: plan → fetch → extract → evidence → consensus →
//! gates, round after round, until a stop condition fires.
//!
//! Each round is a reducer over [`RunState`]; the orchestrator is a plain
//! loop over states, which keeps every stop condition testable by driving
//! rounds manually.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use harvest_consensus::{
    AnchorConflict, ConsensusConfig, ConsensusResult, GateInputs, IdentityObservation, Job,
    NormalizedRecord, SourceSummary, aggregate_confidence, build_record, completeness_required,
    evaluate_anchors, identity_certainty, major_conflict_count, observe_identity, reconcile,
    required_fields, run_gate_stack, sources_identity_matched,
};
use harvest_evidence::{
    AiBudget, FieldState, LlmBackend, LlmError, LlmRequest, SnippetInput, build_evidence_pack,
    render_messages,
};
use harvest_extract::{
    Candidate, ExtractionContext, best_per_field, extract_candidates, is_discovery_url,
    merge_llm_candidates,
};
use harvest_plan::{
    Fetcher, Frontier, OutcomeClass, Source, SourceRegistry, brand_matches,
    classify_fetch_outcome, discover_links, sitemaps_from_robots, urls_from_sitemap,
};
use harvest_rules::RulePack;
use harvest_search::{SearchClient, SearchConfig, SelectionInputs, dedup_serp, select_provider};

use crate::round::{RunMode, derive_round_config, effort_profile};
use crate::stop::{StopPolicy, StopReason, evaluate_stop, expected_retry_fields};
use crate::store::{RunArtifacts, RunStore, SourceLine};
use crate::summary::{
    ConstraintAnalysis, IdentityContext, RoundSummary, improvement_reasons, validate_summary,
};
use crate::target::select_targets;

/// Engine configuration. Every tunable has a typed default; the config is
/// passed through calls, never read from process state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub mode: RunMode,
    pub stop: StopPolicy,
    pub max_run_seconds: u64,
    pub fetch_timeout_secs: u64,
    pub default_ai_max_calls: u32,
    pub consensus: ConsensusConfig,
    pub search: SearchConfig,
    /// Path fragments signalling spec-bearing manufacturer pages.
    pub path_hints: Vec<String>,
    /// Query templates; `{brand}`, `{model}`, `{variant}`, and `{field}`
    /// placeholders are substituted per round.
    pub search_templates: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Balanced,
            stop: StopPolicy::default(),
            max_run_seconds: 600,
            fetch_timeout_secs: 20,
            default_ai_max_calls: 3,
            consensus: ConsensusConfig::default(),
            search: SearchConfig::default(),
            path_hints: vec![
                "spec".to_string(),
                "datasheet".to_string(),
                "support".to_string(),
                "product".to_string(),
            ],
            search_templates: vec![
                "{brand} {model} {variant} specs".to_string(),
                "{brand} {model} {variant} {field}".to_string(),
            ],
        }
    }
}

/// Per-run inputs besides the job.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub seed_urls: Vec<String>,
    pub run_id: String,
    /// Learned domain yield scores in `[0,1]` (root domain → score), fed
    /// into frontier ordering.
    pub learned_yield: BTreeMap<String, f64>,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Exhausted,
    NeedsManual,
}

impl RunStatus {
    fn from_stop(reason: &StopReason) -> Self {
        match reason {
            StopReason::Complete => Self::Complete,
            StopReason::IdentityGateStuck | StopReason::RepeatedLowQuality => Self::NeedsManual,
            _ => Self::Exhausted,
        }
    }
}

/// Feedback signals for the learning stores, emitted at run end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LearningSignal {
    UrlYield {
        url: String,
        field: String,
        category: String,
    },
    DomainFieldYield {
        domain: String,
        field: String,
        used: bool,
    },
    FieldAnchorPhrase {
        field: String,
        category: String,
        phrase: String,
    },
    ComponentAlias {
        component_type: String,
        alias: String,
        canonical: String,
    },
}

/// Everything a finished run reports.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub stop_reason: StopReason,
    pub cancelled: bool,
    pub rounds: Vec<RoundSummary>,
    pub record: NormalizedRecord,
    pub consensus: ConsensusResult,
    pub learning: Vec<LearningSignal>,
}

/// The convergence orchestrator for one product.
pub struct Orchestrator<'a> {
    pub pack: Arc<RulePack>,
    pub registry: SourceRegistry,
    pub fetcher: &'a dyn Fetcher,
    pub llm: Option<&'a dyn LlmBackend>,
    pub search: Option<&'a SearchClient>,
    pub store: Option<&'a dyn RunStore>,
    pub config: EngineConfig,
}

struct RunState {
    frontier: Frontier,
    sources: Vec<Source>,
    outcomes: Vec<OutcomeClass>,
    candidate_counts: Vec<usize>,
    candidates: Vec<Candidate>,
    observations: Vec<IdentityObservation>,
    anchor_conflicts: Vec<AnchorConflict>,
    snippets: Vec<SnippetInput>,
    ai_budget: AiBudget,
    history: Vec<RoundSummary>,
    previous_targets: Vec<String>,
    forced_targets: Option<Vec<String>>,
    expected_retry_fired: bool,
    llm_budget_blocked: bool,
    required_search_iteration: u32,
}

impl<'a> Orchestrator<'a> {
    /// Drive rounds until a stop condition fires, then write artifacts and
    /// emit learning signals.
    pub async fn run(&self, job: &Job, options: &RunOptions) -> Result<RunOutcome> {
        let started = Instant::now();
        let deadline = Duration::from_secs(self.config.max_run_seconds);
        let profile = effort_profile(&self.pack);
        let locked = job.locked_fields();

        let mut frontier = Frontier::new(self.registry.clone());
        frontier.set_path_hints(self.config.path_hints.clone());
        for (domain, score) in &options.learned_yield {
            frontier.set_learned_yield(domain, *score);
        }
        for url in &options.seed_urls {
            frontier.enqueue(url);
        }

        let mut state = RunState {
            frontier,
            sources: Vec::new(),
            outcomes: Vec::new(),
            candidate_counts: Vec::new(),
            candidates: Vec::new(),
            observations: Vec::new(),
            anchor_conflicts: Vec::new(),
            snippets: Vec::new(),
            ai_budget: AiBudget::from_pack(&self.pack, self.config.default_ai_max_calls),
            history: Vec::new(),
            previous_targets: Vec::new(),
            forced_targets: None,
            expected_retry_fired: false,
            llm_budget_blocked: false,
            required_search_iteration: 0,
        };

        let mut cancelled = false;
        let stop_reason;

        loop {
            let round = state.history.len() as u32;
            if started.elapsed() >= deadline {
                warn!(round, "run deadline elapsed; cancelling");
                cancelled = true;
                stop_reason = StopReason::MaxRoundsReached;
                break;
            }

            let targets = match state.forced_targets.take() {
                Some(forced) => {
                    // A forced retry round escalates any field it re-chases.
                    let still_missing: BTreeSet<&str> = state
                        .history
                        .last()
                        .map(|s| {
                            s.missing_required_fields
                                .iter()
                                .chain(&s.critical_fields_below_pass_target)
                                .map(String::as_str)
                                .collect()
                        })
                        .unwrap_or_default();
                    let escalated_fields: Vec<String> = forced
                        .iter()
                        .filter(|f| {
                            state.previous_targets.contains(*f)
                                && still_missing.contains(f.as_str())
                        })
                        .cloned()
                        .collect();
                    crate::target::TargetSelection {
                        targets: forced,
                        escalated_fields,
                    }
                }
                None => select_targets(
                    state.history.last(),
                    &state.previous_targets,
                    &self.pack,
                    self.config.mode,
                    &state.ai_budget,
                    &locked,
                ),
            };
            let escalated = !targets.escalated_fields.is_empty();
            let round_config = derive_round_config(self.config.mode, round, &profile, escalated);

            let summary = self
                .run_round(job, &mut state, &round_config, &targets, started, deadline)
                .await;
            let _ = validate_summary(&summary);
            // Only LLM-backed rounds count as having "targeted" fields for
            // escalation purposes; the fast pass never escalates.
            state.previous_targets = if round_config.llm_enabled {
                targets.targets.clone()
            } else {
                Vec::new()
            };
            state.history.push(summary);

            if !state
                .history
                .last()
                .map(|s| s.missing_required_fields.is_empty())
                .unwrap_or(true)
            {
                state.required_search_iteration += 1;
            }

            match evaluate_stop(&state.history, &self.config.stop, state.llm_budget_blocked) {
                Some(reason) => {
                    let retry = expected_retry_fields(
                        &reason,
                        state.history.last().expect("round just pushed"),
                        &self.pack,
                        state.expected_retry_fired,
                    );
                    if !retry.is_empty() && started.elapsed() < deadline {
                        info!(fields = ?retry, "expected-field retry override: one more round");
                        state.expected_retry_fired = true;
                        state.forced_targets = Some(retry);
                        continue;
                    }
                    stop_reason = reason;
                    break;
                }
                None => continue,
            }
        }

        let final_summary = state.history.last().cloned().unwrap_or_default();
        let consensus = self.final_consensus(job, &state);
        let gates = run_gate_stack(&self.gate_inputs(job, &state, &consensus));

        let required = required_fields(job, &self.pack);
        let confidence = aggregate_confidence(job, &consensus, &required);
        let completeness = completeness_required(&required, |field| {
            job.anchors.contains_key(field)
                || consensus
                    .fields
                    .get(field)
                    .is_some_and(|p| p.value != harvest_consensus::UNK)
        });

        let mut record = build_record(
            job,
            &self.pack,
            &consensus,
            &gates,
            confidence,
            completeness,
            SourceSummary {
                total: state.sources.len(),
                approved: state.sources.iter().filter(|s| s.approved_domain).count(),
                identity_matched: sources_identity_matched(&state.observations),
            },
        );
        if cancelled {
            record.quality.notes.push("status=cancelled".to_string());
        }

        let learning = self.learning_signals(job, &consensus, &state);

        if let Some(store) = self.store {
            let artifacts = RunArtifacts {
                record: record.clone(),
                consensus: consensus.clone(),
                summary: final_summary,
                sources: self.source_lines(&state),
                field_order: self.pack.field_order(),
            };
            let run_id = if options.run_id.is_empty() {
                format!("run-{}", Utc::now().format("%Y%m%d%H%M%S"))
            } else {
                options.run_id.clone()
            };
            store.write_run(
                &job.category,
                &job.identity_lock.brand,
                &job.identity_lock.model,
                &run_id,
                &artifacts,
            )?;
        }

        info!(
            status = ?RunStatus::from_stop(&stop_reason),
            reason = %stop_reason,
            rounds = state.history.len(),
            "run finished"
        );

        Ok(RunOutcome {
            status: RunStatus::from_stop(&stop_reason),
            stop_reason,
            cancelled,
            rounds: state.history,
            record,
            consensus,
            learning,
        })
    }

    async fn run_round(
        &self,
        job: &Job,
        state: &mut RunState,
        round_config: &crate::round::RoundConfig,
        targets: &crate::target::TargetSelection,
        started: Instant,
        deadline: Duration,
    ) -> RoundSummary {
        let locked = job.locked_fields();
        let mut new_urls = 0usize;
        let mut urls_fetched = 0usize;

        // Search-provider decision is recorded every round, even when no
        // client is wired (dry runs).
        let decision = select_provider(
            &SelectionInputs {
                discovery_enabled: round_config.discovery_enabled,
                missing_required_count: state
                    .history
                    .last()
                    .map_or_else(|| self.baseline_missing(job), |s| s.missing_required_fields.len()),
                required_search_iteration: state.required_search_iteration,
                cse_rescue_only_mode: false,
                cse_rescue_required_iteration: 2,
            },
            &self.config.search,
        );

        if let (Some(client), false) = (self.search, decision.provider == harvest_search::Provider::None) {
            for query in self.build_queries(job, &targets.targets) {
                if started.elapsed() >= deadline {
                    break;
                }
                match client.search(decision.provider, &query).await {
                    Ok(entries) => {
                        for row in dedup_serp(&entries) {
                            if state.frontier.enqueue(&row.url) == harvest_plan::Enqueue::Added {
                                new_urls += 1;
                            }
                        }
                    }
                    Err(err) => warn!(%err, query, "search failed"),
                }
            }
        }

        // Fetch up to the round's URL cap.
        let timeout = Duration::from_secs(self.config.fetch_timeout_secs);
        for _ in 0..round_config.max_urls {
            if started.elapsed() >= deadline {
                break;
            }
            let Some(source) = state.frontier.next_ready(Utc::now()) else {
                break;
            };
            urls_fetched += 1;

            let page = match self.fetcher.fetch(&source, timeout).await {
                Ok(page) => page,
                Err(err) => {
                    let class = classify_fetch_outcome(None, &err.to_string(), None, 0);
                    state.frontier.record_outcome(&source.host, class, Utc::now());
                    debug!(url = %source.url, class = class.as_str(), "fetch failed");
                    continue;
                }
            };

            let class = classify_fetch_outcome(
                page.status,
                &page.message,
                page.content_type.as_deref(),
                page.html.len(),
            );
            state
                .frontier
                .record_outcome(&source.host, class, Utc::now());
            if class != OutcomeClass::Ok {
                continue;
            }

            // Discovery feeds, not candidates.
            if is_discovery_url(&page.final_url) {
                if round_config.discovery_enabled {
                    new_urls += self.enqueue_discoveries(state, &page);
                }
                continue;
            }

            let source_index = state.sources.len();
            state.sources.push(source.clone());
            state.outcomes.push(class);

            let ctx = ExtractionContext {
                pack: &self.pack,
                locked_fields: &locked,
            };
            let extracted = extract_candidates(&page, source_index, &ctx);
            state.candidate_counts.push(extracted.len());
            if extracted.is_empty() {
                state.frontier.record_parse_fail(&source.host);
            }

            // Identity and anchors are judged per source, against its best
            // candidate per field.
            let identity_text = format!("{} {}", page.title, truncate(&page.html, 20_000));
            let observation =
                observe_identity(&identity_text, source.approved_domain, &job.identity_lock);
            if source.approved_domain
                && source.role == harvest_plan::Role::Manufacturer
                && !brand_matches(&page.title, &page.html, &job.identity_lock.brand)
            {
                warn!(host = %source.host, "manufacturer brand mismatch; blocking host");
                state.frontier.block_host(&source.host);
            }
            state.observations.push(observation);

            let best = best_per_field(&extracted, &self.pack);
            state
                .anchor_conflicts
                .extend(evaluate_anchors(&job.anchors, &best, source_index));

            for candidate in &extracted {
                if let Some(quote) = &candidate.quote {
                    state.snippets.push(SnippetInput {
                        source: source.clone(),
                        text: quote.clone(),
                    });
                }
            }
            state.candidates.extend(extracted);

            if round_config.discovery_enabled {
                new_urls += self.enqueue_discoveries(state, &page);
            }
        }

        // LLM pass over this round's target fields.
        if round_config.llm_enabled && !targets.targets.is_empty() {
            if let Some(llm) = self.llm {
                if started.elapsed() < deadline {
                    let newly_exhausted = state.ai_budget.consume_round(&targets.targets);
                    if !newly_exhausted.is_empty() {
                        debug!(fields = ?newly_exhausted, "ai budget exhausted");
                    }

                    let field_state = self.repair_state(state);
                    let evidence_pack = build_evidence_pack(
                        &self.pack,
                        &targets.targets,
                        &state.snippets,
                        &field_state,
                    );
                    let request = LlmRequest {
                        model_tier: round_config.model_tier,
                        messages: render_messages(&evidence_pack),
                        max_tokens: 2048,
                        temperature: 0.0,
                    };
                    match llm.invoke(&request).await {
                        Ok(response) => {
                            let llm_candidates: Vec<Candidate> = response
                                .candidates
                                .into_iter()
                                .map(|c| {
                                    let index = self.source_for_quote(state, &c.quote);
                                    c.into_candidate(index)
                                })
                                .collect();
                            let ctx = ExtractionContext {
                                pack: &self.pack,
                                locked_fields: &locked,
                            };
                            state.candidates = merge_llm_candidates(
                                std::mem::take(&mut state.candidates),
                                llm_candidates,
                                &ctx,
                            );
                        }
                        Err(LlmError::BudgetExhausted(reason)) => {
                            warn!(%reason, "llm budget blocked");
                            state.llm_budget_blocked = true;
                        }
                        Err(err) => warn!(%err, "llm invocation failed"),
                    }
                }
            }
        }

        // Fan-in: consensus and gates are single-threaded from here.
        let consensus = self.final_consensus(job, state);
        let gates = run_gate_stack(&self.gate_inputs(job, state, &consensus));

        let required = required_fields(job, &self.pack);
        let confidence = aggregate_confidence(job, &consensus, &required);
        let certainty = identity_certainty(&state.observations);

        let mut summary = RoundSummary {
            round: round_config.round,
            missing_required_fields: consensus.missing_required_fields.clone(),
            critical_fields_below_pass_target: consensus.critical_fields_below_pass_target.clone(),
            fields_below_pass_target: consensus.fields_below_pass_target.clone(),
            confidence,
            validated: gates.validated,
            validated_reason: gates.validated_reason.clone(),
            sources_identity_matched: sources_identity_matched(&state.observations),
            provenance: consensus.fields.clone(),
            field_order: self.pack.field_order(),
            field_reasoning: consensus.field_reasoning.clone(),
            constraint_analysis: ConstraintAnalysis {
                contradictions: consensus.contradictions.clone(),
                uncertain_fields: uncertain_fields(&consensus),
            },
            identity_context: IdentityContext {
                certainty,
                brand: job.identity_lock.brand.clone(),
                model: job.identity_lock.model.clone(),
                variant: job.identity_lock.variant.clone(),
            },
            search_provider: decision.provider.as_str().to_string(),
            search_reason_code: decision.reason_code,
            targeted_fields: targets.targets.clone(),
            escalated_fields: targets.escalated_fields.clone(),
            improvement_reasons: Vec::new(),
            urls_fetched,
            new_urls_discovered: new_urls,
        };
        if let Some(previous) = state.history.last() {
            summary.improvement_reasons = improvement_reasons(previous, &summary);
        }
        summary
    }

    fn enqueue_discoveries(&self, state: &mut RunState, page: &harvest_plan::PageData) -> usize {
        let mut added = 0;
        let urls: Vec<String> = if page.final_url.ends_with("/robots.txt") {
            sitemaps_from_robots(&page.html)
        } else if page.final_url.contains("sitemap") {
            urls_from_sitemap(&page.html)
        } else {
            discover_links(&page.html, &page.final_url, &self.config.path_hints)
        };
        for url in urls {
            if state.frontier.enqueue(&url) == harvest_plan::Enqueue::Added {
                added += 1;
            }
        }
        added
    }

    fn final_consensus(&self, job: &Job, state: &RunState) -> ConsensusResult {
        reconcile(
            &state.candidates,
            &state.sources,
            &self.pack,
            job,
            &self.config.consensus,
            identity_certainty(&state.observations),
        )
    }

    fn gate_inputs(&self, job: &Job, state: &RunState, consensus: &ConsensusResult) -> GateInputs {
        let required = required_fields(job, &self.pack);
        GateInputs {
            identity_certainty: identity_certainty(&state.observations),
            anchor_major_conflicts: major_conflict_count(&state.anchor_conflicts),
            contradictions: consensus.contradictions.clone(),
            completeness_required: completeness_required(&required, |field| {
                job.anchors.contains_key(field)
                    || consensus
                        .fields
                        .get(field)
                        .is_some_and(|p| p.value != harvest_consensus::UNK)
            }),
            target_completeness: job.requirements.target_completeness,
            confidence: aggregate_confidence(job, consensus, &required),
            target_confidence: job.requirements.target_confidence,
            critical_fields_below_pass_target: consensus.critical_fields_below_pass_target.clone(),
            missing_required_fields: consensus.missing_required_fields.clone(),
        }
    }

    fn baseline_missing(&self, job: &Job) -> usize {
        required_fields(job, &self.pack).len()
    }

    fn build_queries(&self, job: &Job, targets: &[String]) -> Vec<String> {
        let substitute = |template: &str, field_terms: &str| {
            template
                .replace("{brand}", &job.identity_lock.brand)
                .replace("{model}", &job.identity_lock.model)
                .replace("{variant}", &job.identity_lock.variant)
                .replace("{field}", field_terms)
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        };

        let mut queries = Vec::new();
        for template in &self.config.search_templates {
            if !template.contains("{field}") {
                queries.push(substitute(template, ""));
                continue;
            }
            for field in targets.iter().take(2) {
                if let Some(rule) = self.pack.field_rules.fields.get(field) {
                    let terms = rule
                        .search_hints
                        .as_ref()
                        .and_then(|h| h.query_terms.first().cloned())
                        .unwrap_or_else(|| rule.display_name.to_ascii_lowercase());
                    queries.push(substitute(template, &terms));
                }
            }
        }
        queries.dedup();
        queries
    }

    /// Current accepted values for repair prompts.
    fn repair_state(&self, state: &RunState) -> BTreeMap<String, FieldState> {
        let Some(last) = state.history.last() else {
            return BTreeMap::new();
        };
        last.provenance
            .iter()
            .filter(|(_, p)| p.value != harvest_consensus::UNK)
            .map(|(field, p)| {
                (
                    field.clone(),
                    FieldState {
                        value: p.value.clone(),
                        confidence: p.confidence,
                        evidence_count: p.confirmations,
                    },
                )
            })
            .collect()
    }

    /// Key an LLM candidate back to the source whose snippet carries its
    /// quote; unattributable quotes fall back to the first source.
    fn source_for_quote(&self, state: &RunState, quote: &str) -> usize {
        if !quote.is_empty() {
            for snippet in &state.snippets {
                if snippet.text.contains(quote) || quote.contains(&snippet.text) {
                    if let Some(index) = state
                        .sources
                        .iter()
                        .position(|s| s.url == snippet.source.url)
                    {
                        return index;
                    }
                }
            }
        }
        0
    }

    fn source_lines(&self, state: &RunState) -> Vec<SourceLine> {
        state
            .sources
            .iter()
            .enumerate()
            .map(|(index, source)| SourceLine {
                index,
                url: source.url.clone(),
                host: source.host.clone(),
                tier: source.tier,
                role: source.role,
                approved: source.approved_domain,
                outcome: state
                    .outcomes
                    .get(index)
                    .map_or("ok", |o| o.as_str())
                    .to_string(),
                candidates: state.candidate_counts.get(index).copied().unwrap_or(0),
            })
            .collect()
    }

    fn learning_signals(
        &self,
        job: &Job,
        consensus: &ConsensusResult,
        state: &RunState,
    ) -> Vec<LearningSignal> {
        let mut signals = Vec::new();
        let used_urls: BTreeSet<&str> = consensus
            .fields
            .values()
            .flat_map(|p| p.evidence.iter().map(|e| e.url.as_str()))
            .collect();

        for (field, provenance) in &consensus.fields {
            if provenance.value == harvest_consensus::UNK {
                continue;
            }
            for row in &provenance.evidence {
                signals.push(LearningSignal::UrlYield {
                    url: row.url.clone(),
                    field: field.clone(),
                    category: job.category.clone(),
                });
                if let Some(source) = state.sources.iter().find(|s| s.url == row.url) {
                    signals.push(LearningSignal::DomainFieldYield {
                        domain: source.root_domain.clone(),
                        field: field.clone(),
                        used: true,
                    });
                }
                if let Some(quote) = &row.quote {
                    signals.push(LearningSignal::FieldAnchorPhrase {
                        field: field.clone(),
                        category: job.category.clone(),
                        phrase: truncate(quote, 80).to_string(),
                    });
                }
            }
            if let Some(component) = self.pack.components.resolve(&provenance.value) {
                if component.component_type == *field {
                    signals.push(LearningSignal::ComponentAlias {
                        component_type: field.clone(),
                        alias: provenance.value.clone(),
                        canonical: component.entry.canonical_name.clone(),
                    });
                }
            }
        }

        // Fetched-but-unused domains get a negative yield signal.
        for source in &state.sources {
            if !used_urls.contains(source.url.as_str()) {
                signals.push(LearningSignal::DomainFieldYield {
                    domain: source.root_domain.clone(),
                    field: "*".to_string(),
                    used: false,
                });
            }
        }
        signals
    }
}

fn uncertain_fields(consensus: &ConsensusResult) -> Vec<String> {
    let mut fields: Vec<String> = consensus
        .contradictions
        .iter()
        .filter_map(|c| c.split(':').next())
        .filter_map(|rule_id| {
            rule_id
                .strip_prefix("range_")
                .map(str::to_string)
                .or_else(|| {
                    // Curated rule ids embed field names; surface the
                    // dependents conservatively.
                    match rule_id {
                        "sensor_dpi_consistency" => Some("dpi".to_string()),
                        "wireless_requires_battery" => Some("battery_life_hours".to_string()),
                        "dimensions_triplet_complete" => None,
                        _ => None,
                    }
                })
        })
        .collect();
    fields.sort();
    fields.dedup();
    fields
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
