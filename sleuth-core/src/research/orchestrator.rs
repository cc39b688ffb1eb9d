//! Iteration state machine driving one research run.
//!
//! A run plans, then cycles through dispatch, merge, scoring and the
//! ordered stop checks until one fires, then composes its report exactly
//! once. Control logic between dispatches is synchronous.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SleuthConfig;
use crate::error::{CollaboratorError, Result};
use crate::guard::{RunResources, SharedGuards, call_with_retry};
use crate::request::{RunRequest, RunResponse, RunSettings};
use crate::research::analytics::{self, HealthMetrics};
use crate::research::collaborators::{BiasHint, Collaborators, PlanRequest, ReportInput};
use crate::research::dispatch::{DispatchOutcome, Dispatcher, SubtopicTask, TokenEstimates};
use crate::research::evaluator::{Evaluation, EvaluationContext, Evaluator, Scoring};
use crate::research::intent::{self, QueryIntent};
use crate::research::memory::ResearchMemory;
use crate::research::plan::{PlanDelta, PlanManager};
use crate::research::report::{ComposedReport, FinalReport, ReportContext};
use crate::research::schema;
use crate::research::temporal;
use crate::research::trace::{ResearchTraceEntry, TerminationReason};
use crate::types::Plan;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    Iterating,
    Converged,
    Exhausted,
    Aborted,
    Finalized,
}

impl RunState {
    pub fn can_transition(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Init, Iterating)
                | (Init, Aborted)
                | (Iterating, Converged)
                | (Iterating, Exhausted)
                | (Iterating, Aborted)
                | (Converged, Finalized)
                | (Exhausted, Finalized)
                | (Aborted, Finalized)
        )
    }

    /// The state a run stopping for `reason` settles in before finalization.
    pub fn for_termination(reason: TerminationReason) -> RunState {
        match reason {
            TerminationReason::ConfidenceThresholdReached => RunState::Converged,
            TerminationReason::MaxIterationsReached
            | TerminationReason::EvidenceStrictnessUnsatisfied
            | TerminationReason::TokenBudgetExceeded
            | TerminationReason::TimeoutExceeded => RunState::Exhausted,
            TerminationReason::ManualInterrupt
            | TerminationReason::ErrorAbort
            | TerminationReason::Unknown => RunState::Aborted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid run state transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: RunState,
    pub to: RunState,
}

/// Tracks the current state and every state visited.
#[derive(Debug, Clone)]
pub struct RunStateMachine {
    state: RunState,
    history: Vec<RunState>,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self {
            state: RunState::Init,
            history: vec![RunState::Init],
        }
    }
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn transition(&mut self, next: RunState) -> std::result::Result<(), InvalidTransition> {
        if !self.state.can_transition(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    fn advance(&mut self, next: RunState) {
        if let Err(e) = self.transition(next) {
            warn!(error = %e, "Ignored run state transition");
        }
    }
}

/// Caller-side control over an executing run.
#[derive(Debug, Clone, Default)]
pub struct RunHandle {
    token: CancellationToken,
}

impl RunHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop. Calls already in flight finish and the report is still written.
    pub fn interrupt(&self) {
        self.token.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub settings: RunSettings,
    /// Subtopic names in the plan before the first iteration.
    pub initial_subtopics: Vec<String>,
    pub plan: Plan,
    pub report: FinalReport,
    pub iterations: u32,
    pub states: Vec<RunState>,
    pub tokens_used: u64,
}

impl RunOutcome {
    pub fn response(&self, include_report: bool) -> RunResponse {
        RunResponse {
            run_id: self.run_id.to_string(),
            confidence_score: self.report.confidence_score,
            iterations: self.iterations,
            report_json: include_report.then(|| self.report.clone()),
        }
    }

    pub fn health(&self) -> HealthMetrics {
        analytics::health(self.initial_subtopics.len(), &self.report.research_trace)
    }

    pub fn termination_reason(&self) -> TerminationReason {
        self.report.termination_reason
    }
}

/// Borrowed per-run state the loop helpers read.
#[derive(Clone, Copy)]
struct RunScope<'a> {
    settings: &'a RunSettings,
    resources: &'a RunResources,
    handle: &'a RunHandle,
    deadline: Instant,
}

/// What the stop checks see when an iteration closes.
#[derive(Clone, Copy)]
struct IterationClose<'a> {
    outcome: &'a DispatchOutcome,
    evaluation: &'a Evaluation,
    iteration: u32,
}

/// Terminal run state handed to the composer.
#[derive(Clone, Copy)]
struct Terminal<'a> {
    memory: &'a ResearchMemory,
    plan: &'a Plan,
    evaluation: Option<&'a Evaluation>,
    reason: TerminationReason,
}

/// Search text each task query starts with.
struct SearchQueries {
    base: String,
    /// Takes over once a factual winner query scores unresolved.
    refinement: Option<String>,
}

impl SearchQueries {
    fn new(query: &str, query_intent: QueryIntent) -> Self {
        Self {
            base: intent::reformulate(query, query_intent).unwrap_or_else(|| query.to_string()),
            refinement: query_intent
                .is_factual_event()
                .then(|| intent::refinement_query(query)),
        }
    }

    fn for_iteration(&self, latest: Option<&Evaluation>) -> &str {
        match (&self.refinement, latest) {
            (Some(refinement), Some(e)) if e.diagnostics.factual_resolved == Some(false) => {
                refinement
            }
            _ => &self.base,
        }
    }
}

struct PlanningFailure {
    reason: TerminationReason,
    message: String,
}

/// Drives research runs against one set of collaborators.
pub struct Orchestrator {
    config: SleuthConfig,
    collaborators: Collaborators,
    scoring: Arc<dyn Scoring>,
    shared_guards: Option<SharedGuards>,
    reference_year: Option<i32>,
}

impl Orchestrator {
    pub fn new(config: SleuthConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            scoring: Arc::new(Evaluator),
            shared_guards: None,
            reference_year: None,
        }
    }

    pub fn with_scoring(mut self, scoring: Arc<dyn Scoring>) -> Self {
        self.scoring = scoring;
        self
    }

    /// Share limiters and caches with other runs against the same providers.
    pub fn with_shared_guards(mut self, guards: SharedGuards) -> Self {
        self.shared_guards = Some(guards);
        self
    }

    /// Fix the year recency is judged against instead of reading the clock.
    pub fn with_reference_year(mut self, year: i32) -> Self {
        self.reference_year = Some(year);
        self
    }

    pub fn config(&self) -> &SleuthConfig {
        &self.config
    }

    /// Validate `request` and run it to completion.
    pub async fn run(&self, request: &RunRequest) -> Result<RunOutcome> {
        self.run_with_handle(request, &RunHandle::new()).await
    }

    pub async fn run_with_handle(
        &self,
        request: &RunRequest,
        handle: &RunHandle,
    ) -> Result<RunOutcome> {
        let settings = request.resolve(&self.config)?;
        Ok(self.execute(settings, handle).await)
    }

    /// Run already-resolved settings. Always produces a report.
    pub async fn execute(&self, settings: RunSettings, handle: &RunHandle) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let resources = match &self.shared_guards {
            Some(guards) => RunResources::with_guards(&self.config, &settings, guards.clone()),
            None => RunResources::new(&self.config, &settings),
        };
        let deadline = Instant::now() + settings.timeout();
        let reference_year = self.reference_year.unwrap_or_else(|| Utc::now().year());
        let temporally_sensitive = temporal::is_temporally_sensitive(&settings.query, reference_year);
        let query_intent = intent::detect(&settings.query);
        let queries = SearchQueries::new(&settings.query, query_intent);

        info!(
            %run_id,
            query = %settings.query,
            depth_mode = %settings.depth_mode,
            threshold = settings.confidence_threshold,
            max_iterations = settings.max_iterations,
            %query_intent,
            "Starting research run"
        );

        let mut machine = RunStateMachine::new();
        let mut memory = ResearchMemory::new();
        let mut warnings = Vec::new();

        let mut manager = match self.plan(&settings, &resources, handle).await {
            Ok(manager) => manager,
            Err(failure) => {
                warn!(%run_id, reason = %failure.reason, message = %failure.message, "Planning failed");
                machine.advance(RunState::Aborted);
                warnings.push(format!("Planning failed: {}", failure.message));
                let plan = Plan {
                    objective: settings.query.clone(),
                    subtopics: Vec::new(),
                };
                let report = ReportContext {
                    query: &settings.query,
                    memory: &memory,
                    plan: &plan,
                    evaluation: None,
                    termination_reason: failure.reason,
                    report_mode: settings.report_mode,
                    confidence_threshold: settings.confidence_threshold,
                    evidence_strictness: settings.evidence_strictness,
                    strictness_penalty: self.config.orchestrator.strictness_confidence_penalty,
                    warnings,
                }
                .finalize(None);
                machine.advance(RunState::Finalized);
                return RunOutcome {
                    run_id,
                    settings,
                    initial_subtopics: Vec::new(),
                    plan,
                    report,
                    iterations: 0,
                    states: machine.history().to_vec(),
                    tokens_used: resources.budget.run_tokens(),
                };
            }
        };
        let initial_subtopics = manager.plan().names();
        let mut setup_notes: Vec<String> = settings.resolution_notes.clone();
        setup_notes.extend(manager.setup_notes().iter().cloned());
        if query_intent != QueryIntent::Other {
            setup_notes.push(format!("Query intent: {query_intent}"));
        }
        if queries.base != settings.query {
            setup_notes.push(format!("Search query reformulated to '{}'", queries.base));
        }

        machine.advance(RunState::Iterating);
        let mut dispatcher = Dispatcher::new(
            Arc::clone(&self.collaborators.retriever),
            Arc::clone(&self.collaborators.analyzer),
            resources.clone(),
            TokenEstimates {
                retrieval: self.config.orchestrator.retrieval_token_cost,
                analysis_floor: self.config.orchestrator.analysis_token_floor,
            },
            settings.max_concurrent_tasks,
            deadline,
            handle.cancellation_token(),
        );
        if query_intent.is_factual_event() {
            dispatcher = dispatcher.with_event_filter(reference_year);
        }

        let run = RunScope {
            settings: &settings,
            resources: &resources,
            handle,
            deadline,
        };
        let mut latest: Option<Evaluation> = None;
        let mut iteration = 0;
        let reason = loop {
            if handle.is_interrupted() {
                break TerminationReason::ManualInterrupt;
            }
            iteration += 1;
            resources.budget.begin_iteration();

            let objective = manager.plan().objective.clone();
            let tasks = build_tasks(
                &manager,
                &settings,
                queries.for_iteration(latest.as_ref()),
                iteration,
                latest.as_ref(),
            );
            let mut outcome = dispatcher.run_iteration(iteration, &objective, tasks).await;
            manager.mark_dispatched(&outcome.dispatched);
            let note = memory.merge(iteration, std::mem::take(&mut outcome.batch));

            let ctx = EvaluationContext {
                evaluator: self.config.evaluator.clone(),
                contradiction_sensitivity: settings.contradiction_sensitivity,
                evidence_strictness: settings.evidence_strictness,
                confidence_threshold: settings.confidence_threshold,
                prune_floor: self.config.plan.prune_floor,
                reference_year,
                temporally_sensitive,
                iteration,
                query_intent,
            };
            let evaluation = self.scoring.score(&memory, manager.plan(), &ctx);
            manager.apply_statuses(&evaluation);

            let stop = self.stop_reason(
                &run,
                &IterationClose {
                    outcome: &outcome,
                    evaluation: &evaluation,
                    iteration,
                },
            );
            let delta = match stop {
                Some(_) => PlanDelta::default(),
                None => manager.adapt(
                    &evaluation.diagnostics,
                    iteration,
                    settings.depth.allow_plan_expansion,
                ),
            };
            collect_warnings(&outcome, &mut warnings);

            let mut annotations = std::mem::take(&mut setup_notes);
            annotations.extend(outcome.annotations);
            annotations.extend(note.dropped.iter().cloned());

            let added = note.added_urls.iter().filter_map(|url| memory.source(url));
            let temporal_distribution = temporal::distribution(
                added,
                reference_year,
                self.config.evaluator.recency_window_years,
            );

            let entry = ResearchTraceEntry {
                iteration,
                subtopic_confidences: evaluation.confidences(),
                global_confidence: evaluation.global_confidence,
                weak_subtopics: evaluation.diagnostics.weak_subtopics.clone(),
                planning_note: planning_note(stop, &delta, &evaluation, &manager),
                plan_updates: delta.plan_updates,
                new_sources_added: note.sources_added,
                subtopics_added: delta.subtopics_added,
                subtopics_removed: delta.subtopics_removed,
                is_temporally_sensitive: temporally_sensitive,
                temporal_distribution,
                depth_mode: settings.depth_mode,
                applied_confidence_threshold: settings.confidence_threshold,
                contradiction_sensitivity: settings.contradiction_sensitivity,
                evidence_strictness: settings.evidence_strictness,
                strictness_satisfied: evaluation.strictness.satisfied,
                strictness_failures: evaluation.strictness.failures.clone(),
                configured_max_iterations: settings.max_iterations,
                iteration_tokens: resources.budget.iteration_tokens(),
                run_tokens_cumulative: resources.budget.run_tokens(),
                annotations,
            };
            info!(
                %run_id,
                iteration,
                global_confidence = entry.global_confidence,
                new_sources = entry.new_sources_added,
                added = entry.subtopics_added.len(),
                removed = entry.subtopics_removed.len(),
                tokens = entry.run_tokens_cumulative,
                "Iteration closed"
            );

            let appended = memory.append_trace(entry);
            latest = Some(evaluation);
            if let Err(e) = appended {
                warn!(%run_id, error = %e, "Trace rejected an iteration entry");
                warnings.push(format!("Trace integrity failure: {e}"));
                break TerminationReason::ErrorAbort;
            }
            if let Some(reason) = stop {
                break reason;
            }
        };

        info!(%run_id, reason = %reason, iterations = memory.trace().len(), "Research run terminated");
        machine.advance(RunState::for_termination(reason));

        let terminal = Terminal {
            memory: &memory,
            plan: manager.plan(),
            evaluation: latest.as_ref(),
            reason,
        };
        let composed = self.compose(&run, terminal, &mut warnings).await;
        let report = ReportContext {
            query: &settings.query,
            memory: &memory,
            plan: manager.plan(),
            evaluation: latest.as_ref(),
            termination_reason: reason,
            report_mode: settings.report_mode,
            confidence_threshold: settings.confidence_threshold,
            evidence_strictness: settings.evidence_strictness,
            strictness_penalty: self.config.orchestrator.strictness_confidence_penalty,
            warnings,
        }
        .finalize(composed);
        if report.degraded {
            warn!(%run_id, "Report is degraded");
        }
        machine.advance(RunState::Finalized);

        RunOutcome {
            run_id,
            iterations: memory.trace().len() as u32,
            settings,
            initial_subtopics,
            plan: manager.plan().clone(),
            report,
            states: machine.history().to_vec(),
            tokens_used: resources.budget.run_tokens(),
        }
    }

    async fn plan(
        &self,
        settings: &RunSettings,
        resources: &RunResources,
        handle: &RunHandle,
    ) -> std::result::Result<PlanManager, PlanningFailure> {
        if handle.is_interrupted() {
            return Err(PlanningFailure {
                reason: TerminationReason::ManualInterrupt,
                message: "interrupted before planning".into(),
            });
        }
        let reservation = resources
            .budget
            .reserve(self.config.orchestrator.analysis_token_floor)
            .map_err(|e| PlanningFailure {
                reason: TerminationReason::TokenBudgetExceeded,
                message: e.to_string(),
            })?;
        let request = PlanRequest {
            query: settings.query.clone(),
            depth_mode: settings.depth_mode,
            max_subtopics: self.config.plan.max_subtopics,
        };
        let planner = &self.collaborators.planner;
        let output = call_with_retry(
            &resources.retry,
            &resources.guards.llm_limiter,
            "plan",
            || planner.plan(&request),
        )
        .await
        .map_err(|e| PlanningFailure {
            reason: TerminationReason::ErrorAbort,
            message: e.to_string(),
        })?;
        reservation.commit(
            output
                .tokens_used
                .unwrap_or(self.config.orchestrator.analysis_token_floor),
        );

        let (plan, rejected) =
            schema::parse_plan(&output.payload, &settings.query).map_err(|e| PlanningFailure {
                reason: TerminationReason::ErrorAbort,
                message: e.to_string(),
            })?;
        let mut manager =
            PlanManager::new(plan, self.config.plan.clone()).map_err(|e| PlanningFailure {
                reason: TerminationReason::ErrorAbort,
                message: e.to_string(),
            })?;
        for e in rejected {
            warn!(item = %e.item, reason = %e.reason, "Dropped malformed plan item");
            manager.note_setup(e.to_string());
        }
        info!(subtopics = manager.plan().len(), "Plan accepted");
        Ok(manager)
    }

    /// The first stop condition that fires, checked in fixed priority order.
    fn stop_reason(&self, run: &RunScope<'_>, close: &IterationClose<'_>) -> Option<TerminationReason> {
        let RunScope {
            settings,
            resources,
            handle,
            deadline,
        } = *run;
        let IterationClose {
            outcome,
            evaluation,
            iteration,
        } = *close;
        if handle.is_interrupted() || outcome.interrupted {
            return Some(TerminationReason::ManualInterrupt);
        }
        if outcome.fatal.is_some() {
            return Some(TerminationReason::ErrorAbort);
        }
        if outcome.run_budget_exhausted() || resources.budget.run_exhausted() {
            return Some(TerminationReason::TokenBudgetExceeded);
        }
        if outcome.deadline_exceeded || Instant::now() >= deadline {
            return Some(TerminationReason::TimeoutExceeded);
        }
        if evaluation.global_confidence >= settings.confidence_threshold {
            return Some(TerminationReason::ConfidenceThresholdReached);
        }
        if iteration >= settings.max_iterations {
            if !evaluation.strictness.satisfied && self.config.orchestrator.strictness_fatal {
                return Some(TerminationReason::EvidenceStrictnessUnsatisfied);
            }
            return Some(TerminationReason::MaxIterationsReached);
        }
        None
    }

    /// Ask the composer for the narrative. `None` means the skeleton is used.
    ///
    /// Draws on the slice of the run ceiling held back for this call and is
    /// never refused by the budget.
    async fn compose(
        &self,
        run: &RunScope<'_>,
        terminal: Terminal<'_>,
        warnings: &mut Vec<String>,
    ) -> Option<ComposedReport> {
        let RunScope {
            settings,
            resources,
            ..
        } = *run;
        let Terminal {
            memory,
            plan,
            evaluation,
            reason,
        } = terminal;
        let reservation = resources
            .budget
            .reserve_final(self.config.orchestrator.analysis_token_floor);
        let estimate = reservation.estimated();
        let input = ReportInput {
            query: &settings.query,
            plan,
            memory,
            evaluation,
            trace: memory.trace(),
            settings,
            termination_reason: reason,
        };
        let composer = &self.collaborators.composer;
        let output = match call_with_retry(
            &resources.retry,
            &resources.guards.llm_limiter,
            "compose",
            || composer.compose(&input),
        )
        .await
        {
            Ok(output) => output,
            Err(e) => {
                drop(reservation);
                warn!(error = %e, "Report composer failed");
                warnings.push(composer_failure(&e));
                return None;
            }
        };
        reservation.commit(output.tokens_used.unwrap_or(estimate));

        match schema::parse_composed_report(&output.payload) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(item = %e.item, reason = %e.reason, "Dropped malformed report narrative");
                warnings.push(format!("Report narrative rejected: {e}"));
                None
            }
        }
    }
}

fn composer_failure(error: &CollaboratorError) -> String {
    format!("Report composer failed: {error}")
}

fn collect_warnings(outcome: &DispatchOutcome, warnings: &mut Vec<String>) {
    if let Some(e) = &outcome.fatal {
        warnings.push(format!("Unrecoverable collaborator failure: {e}"));
    }
    if let Some(e) = &outcome.budget_refusal {
        warnings.push(format!("Token budget refused a call: {e}"));
    }
}

/// One task per open subtopic, carrying what the last evaluation learned about it.
fn build_tasks(
    manager: &PlanManager,
    settings: &RunSettings,
    search_base: &str,
    iteration: u32,
    latest: Option<&Evaluation>,
) -> Vec<SubtopicTask> {
    manager
        .dispatch_order()
        .into_iter()
        .map(|subtopic| {
            let diag = latest.and_then(|e| e.diagnostics.per_subtopic.get(&subtopic.name));
            let bias_hint = BiasHint {
                weakest_component: diag.map(|d| d.lowest_component),
                missing_aspects: latest
                    .map(|e| {
                        e.diagnostics
                            .missing_aspects
                            .iter()
                            .filter(|m| m.subtopic == subtopic.name)
                            .map(|m| m.aspect.clone())
                            .collect()
                    })
                    .unwrap_or_default(),
            };
            let weak = diag.is_some_and(|d| d.weak);
            let max_results = if iteration == 1
                || subtopic.times_addressed == 0
                || (weak && settings.depth.escalate_weak)
            {
                settings.depth.initial_source_count
            } else {
                settings.depth.refinement_source_count
            };
            SubtopicTask {
                query: format!("{search_base} {}", subtopic.name),
                subtopic,
                bias_hint,
                max_results,
            }
        })
        .collect()
}

fn planning_note(
    stop: Option<TerminationReason>,
    delta: &PlanDelta,
    evaluation: &Evaluation,
    manager: &PlanManager,
) -> String {
    if let Some(reason) = stop {
        return format!(
            "Stopping: {reason} at global confidence {:.2}",
            evaluation.global_confidence
        );
    }
    let weak = evaluation.diagnostics.weak_subtopics.len();
    if delta.is_structural() {
        format!(
            "Continuing with {} subtopics ({} added, {} removed, {weak} weak)",
            manager.plan().len(),
            delta.subtopics_added.len(),
            delta.subtopics_removed.len()
        )
    } else {
        format!(
            "Continuing with {} subtopics, refining {weak} weak",
            manager.plan().len()
        )
    }
}
