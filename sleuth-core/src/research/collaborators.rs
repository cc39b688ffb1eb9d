//! External collaborator seams consumed by the orchestrator.
//!
//! Collaborators return raw JSON payloads. Nothing they produce reaches
//! memory until it has passed through [`crate::research::schema`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::CollaboratorError;
use crate::presets::{DepthMode, ReportMode};
use crate::request::RunSettings;
use crate::research::evaluator::{Evaluation, ScoreComponent};
use crate::research::memory::ResearchMemory;
use crate::research::trace::{TerminationReason, TraceLog};
use crate::types::{Plan, Source, Subtopic};

/// Raw output of one collaborator call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaboratorOutput {
    pub payload: serde_json::Value,
    /// Tokens the provider reports having consumed, when it reports them.
    #[serde(default)]
    pub tokens_used: Option<u64>,
}

impl CollaboratorOutput {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            tokens_used: None,
        }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = Some(tokens);
        self
    }
}

/// What the evaluator learned about a subtopic, passed to retrieval as
/// context. It describes gaps only and prescribes no query rewriting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BiasHint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weakest_component: Option<ScoreComponent>,
    #[serde(default)]
    pub missing_aspects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub query: String,
    pub depth_mode: DepthMode,
    pub max_subtopics: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub iteration: u32,
    pub subtopic: Subtopic,
    pub query: String,
    pub bias_hint: BiasHint,
    pub max_results: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub iteration: u32,
    pub objective: String,
    pub subtopic: Subtopic,
    pub sources: Vec<Source>,
}

/// Terminal run state handed to the report composer.
pub struct ReportInput<'a> {
    pub query: &'a str,
    pub plan: &'a Plan,
    pub memory: &'a ResearchMemory,
    pub evaluation: Option<&'a Evaluation>,
    pub trace: &'a TraceLog,
    pub settings: &'a RunSettings,
    pub termination_reason: TerminationReason,
}

impl ReportInput<'_> {
    pub fn report_mode(&self) -> ReportMode {
        self.settings.report_mode
    }

    pub fn instructions(&self) -> &'static str {
        self.settings.report_mode.instructions()
    }
}

/// Produces the initial plan for a query.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, request: &PlanRequest) -> Result<CollaboratorOutput, CollaboratorError>;
}

/// Finds sources for one subtopic.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(
        &self,
        request: &RetrievalRequest,
    ) -> Result<CollaboratorOutput, CollaboratorError>;
}

/// Turns retrieved sources into insights, statistics, contradictions, and gaps.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        request: &AnalysisRequest,
    ) -> Result<CollaboratorOutput, CollaboratorError>;
}

/// Writes the narrative parts of the final report. Called once per run.
#[async_trait]
pub trait ReportComposer: Send + Sync {
    async fn compose(
        &self,
        input: &ReportInput<'_>,
    ) -> Result<CollaboratorOutput, CollaboratorError>;
}

/// The four collaborators a run needs.
#[derive(Clone)]
pub struct Collaborators {
    pub planner: Arc<dyn Planner>,
    pub retriever: Arc<dyn Retriever>,
    pub analyzer: Arc<dyn Analyzer>,
    pub composer: Arc<dyn ReportComposer>,
}
