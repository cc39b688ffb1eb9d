//! Subcommand definitions and handlers.

use anyhow::Context;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use sleuth_core::persistence::{JsonFileRunStore, RunRecord, RunStore};
use sleuth_core::research::analytics;
use sleuth_core::research::scripted::Fixture;
use sleuth_core::{
    ContradictionSensitivity, DepthMode, EvidenceStrictness, FinalReport, Orchestrator,
    ReportMode, RunHandle, RunRequest, SleuthConfig,
};

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Run a research query against scripted collaborators
    Run(RunArgs),
    /// Validate a run request and print the resolved settings
    Validate {
        /// Path to a request JSON file
        request: PathBuf,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print structural health metrics for a saved report
    Health {
        /// Path to a report JSON file
        report: PathBuf,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Show the effective merged configuration
    Show,
}

/// Parse a snake_case enum value through its serde representation.
fn parse_variant<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_lowercase()))
        .map_err(|_| format!("unknown value '{raw}'"))
}

#[derive(clap::Args, Debug)]
pub(crate) struct RunArgs {
    /// Research question
    query: String,

    /// Fixture JSON supplying planner, retrieval, analysis and report payloads
    #[arg(long)]
    fixture: PathBuf,

    /// quick_scan, standard or deep_investigation
    #[arg(long, value_parser = parse_variant::<DepthMode>)]
    depth_mode: Option<DepthMode>,

    /// Confidence threshold override
    #[arg(long)]
    threshold: Option<f64>,

    #[arg(long)]
    max_iterations: Option<u32>,

    /// ignore_minor, flag_all or escalate_on_any
    #[arg(long, value_parser = parse_variant::<ContradictionSensitivity>)]
    contradiction_sensitivity: Option<ContradictionSensitivity>,

    /// relaxed, moderate or strict
    #[arg(long, value_parser = parse_variant::<EvidenceStrictness>)]
    evidence_strictness: Option<EvidenceStrictness>,

    /// executive_summary, technical_whitepaper, risk_assessment or academic_structured
    #[arg(long, value_parser = parse_variant::<ReportMode>)]
    report_mode: Option<ReportMode>,

    #[arg(long)]
    max_concurrent_tasks: Option<usize>,

    #[arg(long)]
    max_tokens_per_iteration: Option<u64>,

    #[arg(long)]
    max_tokens_per_run: Option<u64>,

    /// Wall-clock limit for the run
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Include the full report in the printed response
    #[arg(long)]
    include_report: bool,

    /// Persist the run record
    #[arg(long)]
    save: bool,
}

impl RunArgs {
    fn to_request(&self) -> RunRequest {
        RunRequest {
            query: self.query.clone(),
            depth_mode: self.depth_mode,
            confidence_threshold: self.threshold,
            contradiction_sensitivity: self.contradiction_sensitivity.unwrap_or_default(),
            evidence_strictness: self.evidence_strictness.unwrap_or_default(),
            max_iterations: self.max_iterations,
            report_mode: self.report_mode,
            max_concurrent_tasks: self.max_concurrent_tasks,
            max_tokens_per_iteration: self.max_tokens_per_iteration,
            max_tokens_per_run: self.max_tokens_per_run,
            max_run_timeout: self.timeout_secs,
        }
    }
}

fn load_config(workspace: &Path) -> anyhow::Result<SleuthConfig> {
    sleuth_core::load_validated(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

fn runs_dir(config: &SleuthConfig, workspace: &Path) -> PathBuf {
    config
        .storage
        .runs_dir
        .clone()
        .unwrap_or_else(|| workspace.join(".sleuth").join("runs"))
}

pub(crate) async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => handle_run(args, workspace).await,
        Commands::Validate { request } => handle_validate(&request, workspace),
        Commands::Config { action } => handle_config(action, workspace),
        Commands::Health { report } => handle_health(&report),
    }
}

async fn handle_run(args: RunArgs, workspace: &Path) -> anyhow::Result<()> {
    let config = load_config(workspace)?;
    let raw = std::fs::read_to_string(&args.fixture)
        .with_context(|| format!("Failed to read fixture {}", args.fixture.display()))?;
    let fixture = Fixture::from_json(&raw).context("Invalid fixture")?;

    let settings = args.to_request().resolve(&config)?;
    let orchestrator = Orchestrator::new(config.clone(), fixture.into_collaborators());

    let handle = RunHandle::new();
    let interrupt = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight calls");
            interrupt.interrupt();
        }
    });

    let outcome = orchestrator.execute(settings, &handle).await;
    info!(
        run_id = %outcome.run_id,
        reason = %outcome.termination_reason(),
        confidence = outcome.report.confidence_score,
        "Run finished"
    );

    if args.save {
        let store = JsonFileRunStore::new(runs_dir(&config, workspace));
        let path = store.save(&RunRecord::from_outcome(&outcome))?;
        info!(path = %path.display(), "Saved run record");
    }

    let response = outcome.response(args.include_report);
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn handle_validate(request: &Path, workspace: &Path) -> anyhow::Result<()> {
    let config = load_config(workspace)?;
    let raw = std::fs::read_to_string(request)
        .with_context(|| format!("Failed to read request {}", request.display()))?;
    let settings = RunRequest::from_json(&raw)?.resolve(&config)?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(workspace)?;
            println!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn handle_health(report: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(report)
        .with_context(|| format!("Failed to read report {}", report.display()))?;
    let report: FinalReport = serde_json::from_str(&raw).context("Invalid report JSON")?;
    let initial = report
        .research_trace
        .first()
        .map_or(0, |e| e.subtopic_confidences.len());
    let health = analytics::health(initial, &report.research_trace);
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(())
}
