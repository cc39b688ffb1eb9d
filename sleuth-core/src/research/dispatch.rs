//! Two-phase fan-out of one iteration's collaborator calls.
//!
//! Phase 1 retrieves sources for every scheduled subtopic, bounded by a
//! counting semaphore. Phase 2 analyzes them and starts only after every
//! phase-1 task has finished or been skipped. Each external call is cached,
//! admitted by the token budget before dispatch, and routed through the
//! provider's rate limiter with retry.
//!
//! Stopping is cooperative: once the iteration's stop token is cancelled no
//! new call is dispatched, but calls already in flight run to completion.
//!
//! With the event filter on, analysis output is screened for future-event
//! insights, and an empty analysis falls back to extracting completed
//! results from the source summaries.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BudgetError, BudgetScope, CollaboratorError, ParseError};
use crate::guard::{
    CacheKeyBuilder, RateLimiter, ResponseCache, RunResources, call_with_retry, estimate_tokens,
    normalize_text,
};
use crate::research::collaborators::{
    AnalysisRequest, Analyzer, BiasHint, CollaboratorOutput, RetrievalRequest, Retriever,
};
use crate::research::memory::{EvidenceBatch, ReportedGap, normalize_url};
use crate::research::{events, fallback, schema};
use crate::types::{Insight, Source, Subtopic};

/// One subtopic scheduled for this iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtopicTask {
    pub subtopic: Subtopic,
    pub query: String,
    pub bias_hint: BiasHint,
    pub max_results: usize,
}

/// Token estimates charged before each kind of call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimates {
    pub retrieval: u64,
    pub analysis_floor: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipReason {
    Stopped,
    Interrupted,
    Deadline,
    RunBudget,
}

impl SkipReason {
    fn describe(self) -> &'static str {
        match self {
            SkipReason::Stopped => "dispatch stopped for this iteration",
            SkipReason::Interrupted => "run interrupted",
            SkipReason::Deadline => "run deadline passed",
            SkipReason::RunBudget => "run token ceiling reached",
        }
    }
}

enum CallResult {
    Done {
        output: CollaboratorOutput,
        cached: bool,
    },
    Failed(CollaboratorError),
    Refused(BudgetError),
    Skipped(SkipReason),
}

/// Everything one iteration's dispatch produced, including why it stopped early.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub batch: EvidenceBatch,
    /// Subtopics whose retrieval actually ran (or was served from cache).
    pub dispatched: Vec<String>,
    pub skipped: Vec<String>,
    pub annotations: Vec<String>,
    /// First unrecoverable upstream failure.
    pub fatal: Option<CollaboratorError>,
    /// Budget refusal, run scope preferred over iteration scope.
    pub budget_refusal: Option<BudgetError>,
    pub deadline_exceeded: bool,
    pub interrupted: bool,
    pub cache_hits: usize,
}

impl DispatchOutcome {
    pub fn run_budget_exhausted(&self) -> bool {
        self.budget_refusal
            .as_ref()
            .is_some_and(|e| e.scope() == BudgetScope::Run)
    }

    fn record_refusal(&mut self, error: BudgetError) {
        let replace = match &self.budget_refusal {
            None => true,
            Some(existing) => {
                existing.scope() == BudgetScope::Iteration && error.scope() == BudgetScope::Run
            }
        };
        if replace {
            self.budget_refusal = Some(error);
        }
    }

    fn record_skip(&mut self, subtopic: &str, phase: &str, reason: SkipReason) {
        match reason {
            SkipReason::Deadline => self.deadline_exceeded = true,
            SkipReason::Interrupted => self.interrupted = true,
            SkipReason::Stopped | SkipReason::RunBudget => {}
        }
        self.annotations.push(format!(
            "Skipped {phase} for '{subtopic}': {}",
            reason.describe()
        ));
    }

    fn record_failure(&mut self, subtopic: &str, phase: &str, error: CollaboratorError) {
        match error {
            CollaboratorError::Parse(p) => {
                self.batch
                    .dropped
                    .push(format!("{phase} output for '{subtopic}': {p}"));
            }
            upstream => {
                self.annotations
                    .push(format!("{phase} failed for '{subtopic}': {upstream}"));
                if self.fatal.is_none() {
                    self.fatal = Some(upstream);
                }
            }
        }
    }

    fn record_rejected(&mut self, rejected: Vec<ParseError>) {
        for e in rejected {
            warn!(item = %e.item, reason = %e.reason, "Dropped malformed collaborator item");
            self.batch.dropped.push(e.to_string());
        }
    }
}

/// One cacheable, budgeted call against a provider.
struct GuardedCall<'a> {
    limiter: &'a RateLimiter,
    cache: &'a ResponseCache<CollaboratorOutput>,
    key: String,
    estimate: u64,
    operation: &'static str,
}

/// Dispatches one iteration's retrieval and analysis calls.
#[derive(Clone)]
pub struct Dispatcher {
    retriever: Arc<dyn Retriever>,
    analyzer: Arc<dyn Analyzer>,
    resources: RunResources,
    estimates: TokenEstimates,
    concurrency: usize,
    deadline: Instant,
    interrupt: CancellationToken,
    /// Reference year for future-event screening, when enabled.
    event_year: Option<i32>,
}

impl Dispatcher {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        analyzer: Arc<dyn Analyzer>,
        resources: RunResources,
        estimates: TokenEstimates,
        concurrency: usize,
        deadline: Instant,
        interrupt: CancellationToken,
    ) -> Self {
        Self {
            retriever,
            analyzer,
            resources,
            estimates,
            concurrency: concurrency.max(1),
            deadline,
            interrupt,
            event_year: None,
        }
    }

    /// Screen analysis output for factual winner queries.
    pub fn with_event_filter(mut self, reference_year: i32) -> Self {
        self.event_year = Some(reference_year);
        self
    }

    fn screen_insights(
        &self,
        name: &str,
        insights: Vec<Insight>,
        sources: &[Source],
        outcome: &mut DispatchOutcome,
    ) -> Vec<Insight> {
        let Some(year) = self.event_year else {
            return insights;
        };
        let insights = if insights.is_empty() {
            let extracted = fallback::extract_insights(sources, name, year);
            if !extracted.is_empty() {
                info!(subtopic = %name, count = extracted.len(), "Using fallback insights");
                outcome.annotations.push(format!(
                    "Extracted {} fallback insights for '{name}' from source summaries",
                    extracted.len()
                ));
            }
            extracted
        } else {
            insights
        };
        let (kept, dropped) = events::filter_future_insights(insights, year);
        if dropped > 0 {
            outcome
                .annotations
                .push(format!("Dropped {dropped} future-event insights for '{name}'"));
        }
        kept
    }

    fn admission(&self, stop: &CancellationToken) -> Option<SkipReason> {
        if self.interrupt.is_cancelled() {
            return Some(SkipReason::Interrupted);
        }
        if Instant::now() >= self.deadline {
            stop.cancel();
            return Some(SkipReason::Deadline);
        }
        if self.resources.budget.run_exhausted() {
            stop.cancel();
            return Some(SkipReason::RunBudget);
        }
        if stop.is_cancelled() {
            return Some(SkipReason::Stopped);
        }
        None
    }

    /// Cache lookup, admission, budget reservation, then the rate-limited call.
    async fn guarded_call<F, Fut>(
        &self,
        call: GuardedCall<'_>,
        stop: &CancellationToken,
        op: F,
    ) -> CallResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<CollaboratorOutput, CollaboratorError>>,
    {
        let GuardedCall {
            limiter,
            cache,
            key,
            estimate,
            operation,
        } = call;
        if let Some(reason) = self.admission(stop) {
            return CallResult::Skipped(reason);
        }
        if let Some(output) = cache.get(&key) {
            return CallResult::Done {
                output,
                cached: true,
            };
        }
        let reservation = match self.resources.budget.reserve(estimate) {
            Ok(r) => r,
            Err(e) => {
                stop.cancel();
                return CallResult::Refused(e);
            }
        };
        debug!(operation, tokens = estimate, "Reserved tokens");

        match call_with_retry(&self.resources.retry, limiter, operation, op).await {
            Ok(output) => {
                reservation.commit(output.tokens_used.unwrap_or(estimate));
                cache.insert(key, output.clone());
                CallResult::Done {
                    output,
                    cached: false,
                }
            }
            Err(e) => {
                drop(reservation);
                if !matches!(e, CollaboratorError::Parse(_)) {
                    stop.cancel();
                }
                CallResult::Failed(e)
            }
        }
    }

    async fn retrieve(
        &self,
        request: RetrievalRequest,
        stop: &CancellationToken,
    ) -> CallResult {
        let mut missing = request.bias_hint.missing_aspects.clone();
        missing.sort();
        let key = CacheKeyBuilder::new("search")
            .field("query", normalize_text(&request.query))
            .field("max_results", request.max_results)
            .field(
                "weakest",
                request
                    .bias_hint
                    .weakest_component
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
            )
            .field("missing", missing.join("|"))
            .build();
        let guards = &self.resources.guards;
        let call = GuardedCall {
            limiter: &guards.search_limiter,
            cache: &guards.search_cache,
            key,
            estimate: self.estimates.retrieval,
            operation: "retrieve",
        };
        self.guarded_call(call, stop, || self.retriever.retrieve(&request))
            .await
    }

    async fn analyze(&self, request: AnalysisRequest, stop: &CancellationToken) -> CallResult {
        let mut urls: Vec<String> = request.sources.iter().map(|s| normalize_url(&s.url)).collect();
        urls.sort();
        let key = CacheKeyBuilder::new("analysis")
            .field("subtopic", normalize_text(&request.subtopic.name))
            .field("objective", normalize_text(&request.objective))
            .field("sources", urls.join("|"))
            .build();

        let text: String = request
            .sources
            .iter()
            .map(|s| format!("{} {} ", s.title, s.summary))
            .collect();
        let estimate = estimate_tokens(&format!(
            "{} {} {text}",
            request.objective, request.subtopic.name
        ))
        .max(self.estimates.analysis_floor);

        let guards = &self.resources.guards;
        let call = GuardedCall {
            limiter: &guards.llm_limiter,
            cache: &guards.llm_cache,
            key,
            estimate,
            operation: "analyze",
        };
        self.guarded_call(call, stop, || self.analyzer.analyze(&request))
            .await
    }

    /// Run both phases for `tasks` and collect everything that arrived.
    pub async fn run_iteration(
        &self,
        iteration: u32,
        objective: &str,
        tasks: Vec<SubtopicTask>,
    ) -> DispatchOutcome {
        let stop = self.interrupt.child_token();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut outcome = DispatchOutcome::default();

        // Phase 1: retrieval.
        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let this = self.clone();
            let sem = Arc::clone(&semaphore);
            let stop = stop.clone();
            let name = task.subtopic.name.clone();
            let handle = tokio::spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return (task.subtopic, CallResult::Skipped(SkipReason::Stopped));
                };
                let request = RetrievalRequest {
                    iteration,
                    subtopic: task.subtopic.clone(),
                    query: task.query,
                    bias_hint: task.bias_hint,
                    max_results: task.max_results,
                };
                let result = this.retrieve(request, &stop).await;
                (task.subtopic, result)
            });
            handles.push((name, handle));
        }

        let mut retrieved: Vec<(Subtopic, Vec<Source>)> = Vec::new();
        for (name, handle) in handles {
            let (subtopic, result) = match handle.await {
                Ok(pair) => pair,
                Err(e) => {
                    outcome
                        .annotations
                        .push(format!("Retrieval task for '{name}' did not complete: {e}"));
                    outcome.skipped.push(name);
                    continue;
                }
            };
            match result {
                CallResult::Done { output, cached } => {
                    if cached {
                        outcome.cache_hits += 1;
                    }
                    outcome.dispatched.push(name.clone());
                    let parsed = schema::parse_sources(&output.payload, &name);
                    outcome.record_rejected(parsed.rejected);
                    debug!(iteration, subtopic = %name, sources = parsed.items.len(), cached, "Retrieved sources");
                    retrieved.push((subtopic, parsed.items));
                }
                CallResult::Failed(e) => {
                    outcome.dispatched.push(name.clone());
                    outcome.record_failure(&name, "retrieval", e);
                }
                CallResult::Refused(e) => {
                    outcome
                        .annotations
                        .push(format!("Retrieval for '{name}' refused: {e}"));
                    outcome.record_refusal(e);
                    outcome.skipped.push(name);
                }
                CallResult::Skipped(reason) => {
                    outcome.record_skip(&name, "retrieval", reason);
                    outcome.skipped.push(name);
                }
            }
        }

        // Phase 2: analysis over the settled retrieval results.
        let mut handles = Vec::new();
        for (subtopic, sources) in retrieved {
            if sources.is_empty() {
                outcome.annotations.push(format!(
                    "No usable sources for '{}', analysis skipped",
                    subtopic.name
                ));
                continue;
            }
            outcome.batch.sources.extend(sources.iter().cloned());
            let screened = match self.event_year {
                Some(_) => sources.clone(),
                None => Vec::new(),
            };

            let this = self.clone();
            let sem = Arc::clone(&semaphore);
            let stop = stop.clone();
            let name = subtopic.name.clone();
            let objective = objective.to_string();
            let handle = tokio::spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return CallResult::Skipped(SkipReason::Stopped);
                };
                let request = AnalysisRequest {
                    iteration,
                    objective,
                    subtopic,
                    sources,
                };
                this.analyze(request, &stop).await
            });
            handles.push((name, screened, handle));
        }

        for (name, screened, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    outcome
                        .annotations
                        .push(format!("Analysis task for '{name}' did not complete: {e}"));
                    continue;
                }
            };
            match result {
                CallResult::Done { output, cached } => {
                    if cached {
                        outcome.cache_hits += 1;
                    }
                    let parsed = schema::parse_analysis(&output.payload, &name);
                    outcome.record_rejected(parsed.rejected);
                    let insights =
                        self.screen_insights(&name, parsed.insights, &screened, &mut outcome);
                    outcome.batch.insights.extend(insights);
                    outcome.batch.statistics.extend(parsed.statistics);
                    outcome.batch.contradictions.extend(parsed.contradictions);
                    outcome
                        .batch
                        .gaps
                        .extend(parsed.gaps.into_iter().map(|aspect| ReportedGap {
                            iteration,
                            subtopic: name.clone(),
                            aspect,
                        }));
                }
                CallResult::Failed(e) => outcome.record_failure(&name, "analysis", e),
                CallResult::Refused(e) => {
                    outcome
                        .annotations
                        .push(format!("Analysis for '{name}' refused: {e}"));
                    outcome.record_refusal(e);
                }
                CallResult::Skipped(reason) => outcome.record_skip(&name, "analysis", reason),
            }
        }

        if self.interrupt.is_cancelled() {
            outcome.interrupted = true;
        }
        if Instant::now() >= self.deadline && !outcome.deadline_exceeded {
            outcome.deadline_exceeded = true;
        }

        info!(
            iteration,
            dispatched = outcome.dispatched.len(),
            skipped = outcome.skipped.len(),
            sources = outcome.batch.sources.len(),
            insights = outcome.batch.insights.len(),
            dropped = outcome.batch.dropped.len(),
            cache_hits = outcome.cache_hits,
            "Iteration dispatch settled"
        );
        outcome
    }
}
