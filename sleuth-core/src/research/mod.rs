//! Research controller: memory, scoring, plan governance, and the run loop.
//!
//! A run moves through planning, then repeated iterations of:
//! 1. **Dispatch** — retrieve and analyze every open subtopic (two phases)
//! 2. **Merge** — fold the iteration's evidence into [`memory::ResearchMemory`]
//! 3. **Score** — evaluate confidence and diagnostics
//! 4. **Decide** — stop, or adapt the plan and continue
//!
//! and ends with a single report composition.

pub mod analytics;
pub mod bias;
pub mod collaborators;
pub mod dispatch;
pub mod evaluator;
pub mod events;
pub mod fallback;
pub mod intent;
pub mod keywords;
pub mod memory;
pub mod orchestrator;
pub mod plan;
pub mod report;
pub mod schema;
pub mod scripted;
pub mod strictness;
pub mod temporal;
pub mod trace;

pub use collaborators::{Analyzer, Collaborators, Planner, ReportComposer, Retriever};
pub use evaluator::{Evaluation, Evaluator, Scoring};
pub use intent::QueryIntent;
pub use memory::ResearchMemory;
pub use orchestrator::{Orchestrator, RunHandle, RunOutcome, RunState};
pub use plan::PlanManager;
pub use report::FinalReport;
pub use trace::{ResearchTraceEntry, TerminationReason};
