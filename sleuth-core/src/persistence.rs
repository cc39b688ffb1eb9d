//! Run records and their JSON file store.
//!
//! Records are written atomically: serialized to a `.tmp` sibling, then
//! renamed over the target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::PersistenceError;
use crate::research::analytics::HealthMetrics;
use crate::research::orchestrator::RunOutcome;
use crate::research::report::FinalReport;
use crate::types::Plan;

/// What is kept about a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub plan: Plan,
    pub report: FinalReport,
    pub confidence_score: f64,
    pub iterations: u32,
    pub health: HealthMetrics,
}

impl RunRecord {
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        Self {
            run_id: outcome.run_id.to_string(),
            query: outcome.settings.query.clone(),
            created_at: Utc::now(),
            plan: outcome.plan.clone(),
            report: outcome.report.clone(),
            confidence_score: outcome.report.confidence_score,
            iterations: outcome.iterations,
            health: outcome.health(),
        }
    }
}

/// Storage for run records.
pub trait RunStore: Send + Sync {
    fn save(&self, record: &RunRecord) -> Result<PathBuf, PersistenceError>;
    fn load(&self, run_id: &str) -> Result<RunRecord, PersistenceError>;
    /// Stored run ids, sorted.
    fn list(&self) -> Result<Vec<String>, PersistenceError>;
}

/// One `<run_id>.json` file per run under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileRunStore {
    dir: PathBuf,
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl JsonFileRunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }
}

impl RunStore for JsonFileRunStore {
    fn save(&self, record: &RunRecord) -> Result<PathBuf, PersistenceError> {
        let path = self.path_for(&record.run_id);
        let json = serde_json::to_string_pretty(record)?;
        std::fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json.as_bytes()).map_err(io_error(&tmp))?;
        std::fs::rename(&tmp, &path).map_err(io_error(&path))?;
        Ok(path)
    }

    fn load(&self, run_id: &str) -> Result<RunRecord, PersistenceError> {
        let path = self.path_for(run_id);
        if !path.exists() {
            return Err(PersistenceError::NotFound {
                run_id: run_id.to_string(),
            });
        }
        let data = std::fs::read_to_string(&path).map_err(io_error(&path))?;
        Ok(serde_json::from_str(&data)?)
    }

    fn list(&self) -> Result<Vec<String>, PersistenceError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(io_error(&self.dir))? {
            let path = entry.map_err(io_error(&self.dir))?.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
