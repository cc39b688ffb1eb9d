//! Fixture-driven collaborators.
//!
//! Used by the CLI's `run --fixture` path and by tests. A [`Fixture`] is a
//! JSON document naming the planner payload, per-subtopic retrieval and
//! analysis payloads (optionally varying by iteration), scripted failures,
//! and an optional report narrative.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{CollaboratorError, ParseError, UpstreamError};
use crate::research::collaborators::{
    AnalysisRequest, Analyzer, CollaboratorOutput, Collaborators, PlanRequest, Planner,
    ReportComposer, ReportInput, RetrievalRequest, Retriever,
};
use crate::research::evaluator::{Evaluation, EvaluationContext, Evaluator, Scoring};
use crate::research::memory::ResearchMemory;
use crate::types::Plan;

/// A failure a fixture can script for a collaborator call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptedFailure {
    RateLimited,
    Status { code: u16, message: String },
    Timeout,
    Connection { message: String },
    Parse { reason: String },
}

impl ScriptedFailure {
    fn to_error(&self, item: &str) -> CollaboratorError {
        match self {
            ScriptedFailure::RateLimited => UpstreamError::RateLimited.into(),
            ScriptedFailure::Status { code, message } => UpstreamError::Status {
                code: *code,
                message: message.clone(),
            }
            .into(),
            ScriptedFailure::Timeout => UpstreamError::Timeout { timeout_ms: 0 }.into(),
            ScriptedFailure::Connection { message } => UpstreamError::Connection {
                message: message.clone(),
            }
            .into(),
            ScriptedFailure::Parse { reason } => ParseError::new(item, reason.clone()).into(),
        }
    }
}

impl From<UpstreamError> for ScriptedFailure {
    fn from(error: UpstreamError) -> Self {
        match error {
            UpstreamError::RateLimited => ScriptedFailure::RateLimited,
            UpstreamError::Status { code, message } => ScriptedFailure::Status { code, message },
            UpstreamError::Timeout { .. } => ScriptedFailure::Timeout,
            other => ScriptedFailure::Connection {
                message: other.to_string(),
            },
        }
    }
}

/// Scripted behavior for one subtopic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Payloads keyed by iteration. The latest iteration at or before the
    /// current one is used.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_iteration: BTreeMap<u32, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<ScriptedFailure>,
    /// How many calls fail before payloads are served. Unset means every call fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_times: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    /// Latency added before every answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

impl ScriptEntry {
    fn payload_for(&self, iteration: u32) -> Option<&Value> {
        self.by_iteration
            .range(..=iteration)
            .next_back()
            .map(|(_, v)| v)
            .or(self.default.as_ref())
    }
}

/// Per-subtopic scripts shared by the scripted retriever and analyzer.
#[derive(Debug, Default)]
struct ScriptBook {
    entries: BTreeMap<String, ScriptEntry>,
    attempts: Mutex<HashMap<String, u32>>,
    calls: Arc<AtomicUsize>,
    tokens: Option<u64>,
    cancel_on_call: BTreeMap<String, CancellationToken>,
}

impl ScriptBook {
    fn entry_mut(&mut self, subtopic: &str) -> &mut ScriptEntry {
        self.entries.entry(subtopic.to_string()).or_default()
    }

    async fn answer(
        &self,
        subtopic: &str,
        iteration: u32,
        empty: Value,
    ) -> Result<CollaboratorOutput, CollaboratorError> {
        if let Some(ms) = self.entries.get(subtopic).and_then(|e| e.delay_ms) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        self.respond(subtopic, iteration, empty)
    }

    fn respond(
        &self,
        subtopic: &str,
        iteration: u32,
        empty: Value,
    ) -> Result<CollaboratorOutput, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = self.cancel_on_call.get(subtopic) {
            token.cancel();
        }
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
            let n = attempts.entry(subtopic.to_string()).or_insert(0);
            *n += 1;
            *n
        };

        let Some(entry) = self.entries.get(subtopic) else {
            return Ok(CollaboratorOutput::new(empty));
        };
        if let Some(failure) = &entry.fail
            && entry.fail_times.is_none_or(|times| attempt <= times)
        {
            return Err(failure.to_error(subtopic));
        }
        let payload = entry.payload_for(iteration).cloned().unwrap_or(empty);
        Ok(CollaboratorOutput {
            payload,
            tokens_used: entry.tokens.or(self.tokens),
        })
    }
}

macro_rules! scripted_builders {
    ($ty:ident) => {
        impl $ty {
            pub fn with_response(mut self, subtopic: &str, payload: Value) -> Self {
                self.book.entry_mut(subtopic).default = Some(payload);
                self
            }

            pub fn with_iteration_response(
                mut self,
                subtopic: &str,
                iteration: u32,
                payload: Value,
            ) -> Self {
                self.book
                    .entry_mut(subtopic)
                    .by_iteration
                    .insert(iteration, payload);
                self
            }

            /// Every call for `subtopic` fails with `error`.
            pub fn with_failure(mut self, subtopic: &str, error: UpstreamError) -> Self {
                let entry = self.book.entry_mut(subtopic);
                entry.fail = Some(error.into());
                entry.fail_times = None;
                self
            }

            /// The first `times` calls for `subtopic` fail with `error`.
            pub fn with_transient_failure(
                mut self,
                subtopic: &str,
                error: UpstreamError,
                times: u32,
            ) -> Self {
                let entry = self.book.entry_mut(subtopic);
                entry.fail = Some(error.into());
                entry.fail_times = Some(times);
                self
            }

            /// Reported token usage for every successful call.
            pub fn with_tokens(mut self, tokens: u64) -> Self {
                self.book.tokens = Some(tokens);
                self
            }

            /// Calls for `subtopic` wait `delay` before answering.
            pub fn with_delay(mut self, subtopic: &str, delay: Duration) -> Self {
                self.book.entry_mut(subtopic).delay_ms =
                    Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
                self
            }

            /// Every call for `subtopic` cancels `token` before answering.
            pub fn with_cancel_on_call(mut self, subtopic: &str, token: CancellationToken) -> Self {
                self.book.cancel_on_call.insert(subtopic.to_string(), token);
                self
            }

            /// Counter of calls received, shared with clones taken before use.
            pub fn calls(&self) -> Arc<AtomicUsize> {
                Arc::clone(&self.book.calls)
            }

            fn from_entries(entries: BTreeMap<String, ScriptEntry>) -> Self {
                Self {
                    book: ScriptBook {
                        entries,
                        ..ScriptBook::default()
                    },
                }
            }
        }
    };
}

#[derive(Debug, Default)]
pub struct ScriptedRetriever {
    book: ScriptBook,
}

scripted_builders!(ScriptedRetriever);

#[async_trait]
impl Retriever for ScriptedRetriever {
    async fn retrieve(
        &self,
        request: &RetrievalRequest,
    ) -> Result<CollaboratorOutput, CollaboratorError> {
        self.book
            .answer(&request.subtopic.name, request.iteration, json!([]))
            .await
    }
}

#[derive(Debug, Default)]
pub struct ScriptedAnalyzer {
    book: ScriptBook,
}

scripted_builders!(ScriptedAnalyzer);

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn analyze(
        &self,
        request: &AnalysisRequest,
    ) -> Result<CollaboratorOutput, CollaboratorError> {
        self.book
            .answer(&request.subtopic.name, request.iteration, json!({}))
            .await
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedPlanner {
    payload: Value,
    failure: Option<ScriptedFailure>,
    tokens: Option<u64>,
}

impl ScriptedPlanner {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            failure: None,
            tokens: None,
        }
    }

    pub fn from_plan(plan: &Plan) -> Self {
        Self::new(serde_json::to_value(plan).unwrap_or(Value::Null))
    }

    pub fn failing(error: UpstreamError) -> Self {
        Self {
            payload: Value::Null,
            failure: Some(error.into()),
            tokens: None,
        }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = Some(tokens);
        self
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, _request: &PlanRequest) -> Result<CollaboratorOutput, CollaboratorError> {
        if let Some(failure) = &self.failure {
            return Err(failure.to_error("plan"));
        }
        Ok(CollaboratorOutput {
            payload: self.payload.clone(),
            tokens_used: self.tokens,
        })
    }
}

/// Serves a fixed narrative, or summarizes memory when none is scripted.
#[derive(Debug, Default)]
pub struct ScriptedComposer {
    payload: Option<Value>,
    failure: Option<ScriptedFailure>,
    invocations: Arc<AtomicUsize>,
}

impl ScriptedComposer {
    pub fn new(payload: Option<Value>) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    pub fn failing(error: UpstreamError) -> Self {
        Self {
            failure: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn invocations(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.invocations)
    }
}

fn summarize(memory: &ResearchMemory, plan: &Plan, query: &str) -> Value {
    let sections: Vec<Value> = plan
        .subtopics
        .iter()
        .map(|s| {
            let insights: Vec<&str> = memory
                .insights_for(&s.name)
                .map(|i| i.statement.as_str())
                .collect();
            let sources: Vec<String> = memory.sources_by_subtopic(&s.name).iter().map(|src| src.url.clone()).collect();
            json!({
                "heading": s.name,
                "content": insights.join(" "),
                "supporting_sources": sources,
            })
        })
        .collect();
    json!({
        "executive_summary": format!(
            "Findings on '{query}' from {} sources across {} subtopics.",
            memory.sources().len(),
            plan.len()
        ),
        "structured_sections": sections,
    })
}

#[async_trait]
impl ReportComposer for ScriptedComposer {
    async fn compose(
        &self,
        input: &ReportInput<'_>,
    ) -> Result<CollaboratorOutput, CollaboratorError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = &self.failure {
            return Err(failure.to_error("report"));
        }
        let payload = self
            .payload
            .clone()
            .unwrap_or_else(|| summarize(input.memory, input.plan, input.query));
        Ok(CollaboratorOutput::new(payload))
    }
}

/// Default analysis token charge reported by fixture collaborators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planner: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<u64>,
}

/// A complete scripted run, loadable from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub plan: Value,
    #[serde(default)]
    pub retrieval: BTreeMap<String, ScriptEntry>,
    #[serde(default)]
    pub analysis: BTreeMap<String, ScriptEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<Value>,
    #[serde(default)]
    pub tokens: FixtureTokens,
}

impl Fixture {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn into_collaborators(self) -> Collaborators {
        let mut planner = ScriptedPlanner::new(self.plan);
        planner.tokens = self.tokens.planner;

        let mut retriever = ScriptedRetriever::from_entries(self.retrieval);
        retriever.book.tokens = self.tokens.retrieval;
        let mut analyzer = ScriptedAnalyzer::from_entries(self.analysis);
        analyzer.book.tokens = self.tokens.analysis;

        Collaborators {
            planner: Arc::new(planner),
            retriever: Arc::new(retriever),
            analyzer: Arc::new(analyzer),
            composer: Arc::new(ScriptedComposer::new(self.report)),
        }
    }
}

/// Scorer that computes full diagnostics but reports scripted global
/// confidences, one per iteration. The last value repeats.
#[derive(Debug, Clone)]
pub struct ScriptedScoring {
    confidences: Vec<f64>,
}

impl ScriptedScoring {
    pub fn new(confidences: Vec<f64>) -> Self {
        Self { confidences }
    }
}

impl Scoring for ScriptedScoring {
    fn score(&self, memory: &ResearchMemory, plan: &Plan, ctx: &EvaluationContext) -> Evaluation {
        let mut evaluation = Evaluator.score(memory, plan, ctx);
        let index = (ctx.iteration.max(1) - 1) as usize;
        if let Some(&c) = self
            .confidences
            .get(index)
            .or(self.confidences.last())
        {
            evaluation.global_confidence = c.clamp(0.0, 1.0);
        }
        evaluation
    }
}
