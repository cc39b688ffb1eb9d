//! End-to-end runs against scripted collaborators.

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use sleuth_core::research::scripted::{
    ScriptedAnalyzer, ScriptedComposer, ScriptedPlanner, ScriptedRetriever, ScriptedScoring,
};
use sleuth_core::{
    Collaborators, ContradictionSensitivity, DepthMode, EvidenceStrictness, Orchestrator,
    RunHandle, RunRequest, SleuthConfig, TerminationReason,
};

fn sources(prefix: &str) -> Value {
    json!([
        {"url": format!("https://{prefix}.edu/report"), "title": format!("{prefix} report"),
         "summary": "Survey data", "publication_date": "2025-03-01", "opinion_score": 0.1},
        {"url": format!("https://{prefix}.gov/data"), "title": format!("{prefix} data"),
         "summary": "Agency figures", "publication_date": "2024-06-01", "opinion_score": 0.1},
    ])
}

fn insight(prefix: &str) -> Value {
    json!({"insights": [{
        "statement": format!("{prefix} evidence is consistent"),
        "confidence": 0.8,
        "supporting_sources": [format!("https://{prefix}.edu/report"), format!("https://{prefix}.gov/data")]
    }]})
}

fn config() -> SleuthConfig {
    let mut config = SleuthConfig::default();
    config.cache.enabled = false;
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 2;
    config
}

fn collaborators(
    subtopics: &[&str],
    retriever: ScriptedRetriever,
    analyzer: ScriptedAnalyzer,
) -> Collaborators {
    with_composer(subtopics, retriever, analyzer, ScriptedComposer::new(None))
}

fn with_composer(
    subtopics: &[&str],
    retriever: ScriptedRetriever,
    analyzer: ScriptedAnalyzer,
    composer: ScriptedComposer,
) -> Collaborators {
    Collaborators {
        planner: Arc::new(ScriptedPlanner::new(json!({
            "objective": "home battery storage economics",
            "subtopics": subtopics,
        }))),
        retriever: Arc::new(retriever),
        analyzer: Arc::new(analyzer),
        composer: Arc::new(composer),
    }
}

fn sections_with_insights(report: &sleuth_core::FinalReport) -> Vec<&str> {
    report
        .structured_sections
        .iter()
        .filter(|s| s.content.contains("evidence is consistent"))
        .map(|s| s.heading.as_str())
        .collect()
}

fn annotations(outcome: &sleuth_core::RunOutcome) -> Vec<&str> {
    outcome
        .report
        .research_trace
        .iter()
        .flat_map(|e| e.annotations.iter().map(String::as_str))
        .collect()
}

fn standard_request() -> RunRequest {
    let mut request = RunRequest::new("home battery storage economics");
    request.depth_mode = Some(DepthMode::Standard);
    request.confidence_threshold = Some(0.75);
    request
}

#[tokio::test]
async fn scenario_a_threshold_reached_on_second_iteration() {
    let collaborators = collaborators(
        &["costs", "incentives"],
        ScriptedRetriever::default()
            .with_response("costs", sources("costs"))
            .with_response("incentives", sources("incentives")),
        ScriptedAnalyzer::default()
            .with_response("costs", insight("costs"))
            .with_response("incentives", insight("incentives")),
    );
    let orchestrator = Orchestrator::new(config(), collaborators)
        .with_scoring(Arc::new(ScriptedScoring::new(vec![0.62, 0.81])))
        .with_reference_year(2026);

    let outcome = orchestrator.run(&standard_request()).await.unwrap();
    let report = &outcome.report;

    assert_eq!(
        report.termination_reason,
        TerminationReason::ConfidenceThresholdReached
    );
    assert_eq!(outcome.iterations, 2);
    assert_eq!(report.research_trace.len(), 2);
    assert_eq!(report.research_trace[0].global_confidence, 0.62);
    assert_eq!(report.research_trace[1].global_confidence, 0.81);
    assert_eq!(report.research_trace[1].applied_confidence_threshold, 0.75);
    assert_eq!(report.research_trace[1].configured_max_iterations, 2);
    assert!(!report.warnings.iter().any(|w| w.starts_with("Low confidence")));

    let response = outcome.response(true);
    assert_eq!(response.iterations, 2);
    assert!(response.report_json.is_some());
}

#[tokio::test]
async fn scenario_b_exhaustion_warns_and_lists_gaps() {
    let collaborators = collaborators(
        &["costs", "incentives"],
        ScriptedRetriever::default()
            .with_response("costs", sources("costs"))
            .with_response("incentives", sources("incentives")),
        ScriptedAnalyzer::default()
            .with_response("costs", insight("costs"))
            .with_iteration_response(
                "costs",
                2,
                json!({"insights": [], "gaps": ["battery degradation"]}),
            )
            .with_response("incentives", insight("incentives")),
    );
    let orchestrator = Orchestrator::new(config(), collaborators)
        .with_scoring(Arc::new(ScriptedScoring::new(vec![0.62, 0.70])))
        .with_reference_year(2026);

    let outcome = orchestrator.run(&standard_request()).await.unwrap();
    let report = &outcome.report;

    assert_eq!(
        report.termination_reason,
        TerminationReason::MaxIterationsReached
    );
    assert_eq!(outcome.iterations, 2);
    assert!(
        report
            .warnings
            .iter()
            .any(|w| w.starts_with("Low confidence"))
    );
    assert!(
        report
            .knowledge_gaps
            .iter()
            .any(|g| g.contains("battery degradation"))
    );
}

#[tokio::test]
async fn scenario_c_pruned_subtopic_is_not_respawned() {
    let collaborators = collaborators(
        &["costs", "X"],
        ScriptedRetriever::default().with_response("costs", sources("costs")),
        ScriptedAnalyzer::default()
            .with_response("costs", insight("costs"))
            .with_iteration_response(
                "costs",
                2,
                json!({"insights": [], "gaps": ["X"]}),
            ),
    );
    let orchestrator = Orchestrator::new(config(), collaborators)
        .with_scoring(Arc::new(ScriptedScoring::new(vec![0.4])))
        .with_reference_year(2026);

    let mut request = RunRequest::new("home battery storage economics");
    request.depth_mode = Some(DepthMode::DeepInvestigation);
    let outcome = orchestrator.run(&request).await.unwrap();
    let trace = &outcome.report.research_trace;

    assert!(trace.len() >= 2);
    assert_eq!(trace[0].subtopics_removed, vec!["X".to_string()]);
    assert!(!trace[1].subtopics_added.contains(&"X".to_string()));
    assert!(
        trace[1]
            .plan_updates
            .iter()
            .any(|u| u.starts_with("Refused to add 'X'"))
    );
    assert!(outcome.plan.get("X").is_none());
}

#[tokio::test]
async fn scenario_d_run_ceiling_mid_iteration_keeps_merged_evidence() {
    let composer = ScriptedComposer::new(None);
    let invocations = composer.invocations();
    let collaborators = with_composer(
        &["costs", "incentives", "permits"],
        ScriptedRetriever::default()
            .with_response("costs", sources("costs"))
            .with_response("incentives", sources("incentives"))
            .with_response("permits", sources("permits")),
        ScriptedAnalyzer::default()
            .with_response("costs", insight("costs"))
            .with_response("incentives", insight("incentives"))
            .with_response("permits", insight("permits"))
            .with_tokens(200),
        composer,
    );
    let orchestrator = Orchestrator::new(config(), collaborators).with_reference_year(2026);

    let mut request = standard_request();
    request.max_concurrent_tasks = Some(1);
    // 200 of the ceiling is held for the report. Planning and two analyses
    // fit under the rest; the third analysis is refused.
    request.max_tokens_per_run = Some(900);
    let outcome = orchestrator.run(&request).await.unwrap();
    let report = &outcome.report;

    assert_eq!(
        report.termination_reason,
        TerminationReason::TokenBudgetExceeded
    );
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.tokens_used, 800);
    assert!(outcome.tokens_used <= 900);
    assert_eq!(report.references.len(), 6);
    assert_eq!(sections_with_insights(report), vec!["costs", "incentives"]);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert!(!report.degraded);
}

#[tokio::test]
async fn scenario_e_escalating_contradiction_still_stops_at_threshold() {
    let contested = json!({
        "insights": [{
            "statement": "costs evidence is consistent",
            "confidence": 0.8,
            "supporting_sources": ["https://costs.edu/report", "https://costs.gov/data"]
        }],
        "contradictions": [{
            "claim_a": "Installed cost is falling",
            "source_a": "https://costs.edu/report",
            "claim_b": "Installed cost is rising",
            "source_b": "https://costs.gov/data",
            "severity": 0.9
        }]
    });
    let collaborators = collaborators(
        &["costs", "incentives"],
        ScriptedRetriever::default()
            .with_response("costs", sources("costs"))
            .with_response("incentives", sources("incentives")),
        ScriptedAnalyzer::default()
            .with_response("costs", contested)
            .with_response("incentives", insight("incentives")),
    );
    let orchestrator = Orchestrator::new(config(), collaborators)
        .with_scoring(Arc::new(ScriptedScoring::new(vec![0.9])))
        .with_reference_year(2026);

    let mut request = standard_request();
    request.contradiction_sensitivity = ContradictionSensitivity::EscalateOnAny;
    let outcome = orchestrator.run(&request).await.unwrap();

    assert_eq!(
        outcome.termination_reason(),
        TerminationReason::ConfidenceThresholdReached
    );
    assert_eq!(outcome.iterations, 1);
}

#[tokio::test]
async fn scenario_f_deadline_mid_iteration_keeps_partial_memory() {
    let collaborators = collaborators(
        &["costs", "incentives", "permits"],
        ScriptedRetriever::default()
            .with_response("costs", sources("costs"))
            .with_response("incentives", sources("incentives"))
            .with_response("permits", sources("permits")),
        ScriptedAnalyzer::default()
            .with_response("costs", insight("costs"))
            .with_response("incentives", insight("incentives"))
            .with_delay("incentives", Duration::from_millis(1_300))
            .with_response("permits", insight("permits")),
    );
    let orchestrator = Orchestrator::new(config(), collaborators).with_reference_year(2026);

    let mut request = standard_request();
    request.max_concurrent_tasks = Some(1);
    request.max_run_timeout = Some(1);
    let outcome = orchestrator.run(&request).await.unwrap();
    let report = &outcome.report;

    assert_eq!(report.termination_reason, TerminationReason::TimeoutExceeded);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(report.references.len(), 6);
    // The slow call was in flight at the deadline and still landed.
    assert_eq!(sections_with_insights(report), vec!["costs", "incentives"]);
    assert!(
        annotations(&outcome)
            .iter()
            .any(|a| a.starts_with("Skipped analysis for 'permits': run deadline passed"))
    );
}

#[tokio::test]
async fn scenario_g_strict_evidence_unsatisfied_at_cap() {
    let collaborators = collaborators(
        &["costs", "incentives"],
        ScriptedRetriever::default()
            .with_response("costs", sources("costs"))
            .with_response("incentives", sources("incentives")),
        ScriptedAnalyzer::default()
            .with_response("costs", insight("costs"))
            .with_response("incentives", insight("incentives")),
    );
    let mut config = config();
    config.orchestrator.strictness_fatal = true;
    let orchestrator = Orchestrator::new(config, collaborators)
        .with_scoring(Arc::new(ScriptedScoring::new(vec![0.5, 0.6])))
        .with_reference_year(2026);

    let mut request = standard_request();
    request.evidence_strictness = EvidenceStrictness::Strict;
    let outcome = orchestrator.run(&request).await.unwrap();
    let trace = &outcome.report.research_trace;

    assert_eq!(
        outcome.termination_reason(),
        TerminationReason::EvidenceStrictnessUnsatisfied
    );
    assert_eq!(outcome.iterations, 2);
    assert!(!trace[1].strictness_satisfied);
    assert!(!trace[1].strictness_failures.is_empty());
}

#[tokio::test]
async fn scenario_h_interrupt_during_first_iteration_skips_second() {
    let handle = RunHandle::new();
    let composer = ScriptedComposer::new(None);
    let invocations = composer.invocations();
    let collaborators = with_composer(
        &["costs", "incentives"],
        ScriptedRetriever::default()
            .with_response("costs", sources("costs"))
            .with_response("incentives", sources("incentives")),
        ScriptedAnalyzer::default()
            .with_response("costs", insight("costs"))
            .with_response("incentives", insight("incentives"))
            .with_cancel_on_call("incentives", handle.cancellation_token()),
        composer,
    );
    let orchestrator = Orchestrator::new(config(), collaborators)
        .with_scoring(Arc::new(ScriptedScoring::new(vec![0.5])))
        .with_reference_year(2026);

    let mut request = standard_request();
    request.max_concurrent_tasks = Some(1);
    let outcome = orchestrator.run_with_handle(&request, &handle).await.unwrap();

    assert_eq!(outcome.termination_reason(), TerminationReason::ManualInterrupt);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(sections_with_insights(&outcome.report), vec!["costs", "incentives"]);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert!(!outcome.report.degraded);
}

#[tokio::test]
async fn scenario_i_interrupt_outranks_fatal_failure() {
    let handle = RunHandle::new();
    let collaborators = collaborators(
        &["costs", "incentives"],
        ScriptedRetriever::default()
            .with_response("costs", sources("costs"))
            .with_failure(
                "incentives",
                sleuth_core::error::UpstreamError::Status {
                    code: 403,
                    message: "forbidden".into(),
                },
            )
            .with_cancel_on_call("incentives", handle.cancellation_token()),
        ScriptedAnalyzer::default().with_response("costs", insight("costs")),
    );
    let orchestrator = Orchestrator::new(config(), collaborators).with_reference_year(2026);

    let mut request = standard_request();
    request.max_concurrent_tasks = Some(1);
    let outcome = orchestrator.run_with_handle(&request, &handle).await.unwrap();
    let report = &outcome.report;

    assert_eq!(report.termination_reason, TerminationReason::ManualInterrupt);
    assert_eq!(outcome.iterations, 1);
    assert!(
        report
            .warnings
            .iter()
            .any(|w| w.starts_with("Unrecoverable collaborator failure"))
    );
    assert_eq!(report.references.len(), 2);
}

#[tokio::test]
async fn scenario_j_factual_winner_resolves_from_summaries() {
    let collaborators = Collaborators {
        planner: Arc::new(ScriptedPlanner::new(json!({
            "objective": "last FIFA World Cup winner",
            "subtopics": ["winner"],
        }))),
        retriever: Arc::new(ScriptedRetriever::default().with_response(
            "winner",
            json!([{
                "url": "https://news.com/final",
                "title": "World Cup final report",
                "summary": "Argentina won the 2022 FIFA World Cup final in Qatar. The 2030 edition will be held in Spain.",
                "publication_date": "2022-12-19",
                "opinion_score": 0.1
            }]),
        )),
        analyzer: Arc::new(
            ScriptedAnalyzer::default().with_response("winner", json!({"insights": []})),
        ),
        composer: Arc::new(ScriptedComposer::new(None)),
    };
    let orchestrator = Orchestrator::new(config(), collaborators).with_reference_year(2026);

    let mut request = RunRequest::new("Who won the last FIFA World Cup?");
    request.depth_mode = Some(DepthMode::Standard);
    request.confidence_threshold = Some(0.75);
    let outcome = orchestrator.run(&request).await.unwrap();
    let report = &outcome.report;

    assert_eq!(
        report.termination_reason,
        TerminationReason::ConfidenceThresholdReached
    );
    assert_eq!(outcome.iterations, 1);
    assert_eq!(report.research_trace[0].global_confidence, 0.85);
    let notes = annotations(&outcome);
    assert!(notes.contains(&"Query intent: factual_event_winner"));
    assert!(notes.contains(
        &"Search query reformulated to 'FIFA World Cup most recent winner result completed'"
    ));
    assert!(notes.iter().any(|a| a.starts_with("Extracted 1 fallback insights")));
    assert!(
        report
            .structured_sections
            .iter()
            .any(|s| s.content.contains("Argentina won the 2022 FIFA World Cup final"))
    );
}
