//! # Run store
//!
//! Keeps the task records of past CLI runs so a run can be replayed from any
//! of its tasks. The file backend writes a single `runs.json` under the data
//! directory; the memory backend is for tests.

use crate::pipeline::{PipelineResult, TaskRecord};
use chrono::{DateTime, Utc};
use phoenix_error::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const RUNS_FILE: &str = "runs.json";

/// Oldest runs are dropped past this many
pub const DEFAULT_MAX_RUNS: usize = 50;

/// One recorded pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub inputs: HashMap<String, String>,
    pub tasks: Vec<TaskRecord>,
    pub created_at: DateTime<Utc>,
}

/// Run store backend trait
pub trait RunBackend: Send + Sync {
    fn load(&self) -> Result<Vec<RunRecord>>;
    fn save(&mut self, runs: &[RunRecord]) -> Result<()>;
}

/// In-memory backend (volatile, but useful for testing)
#[derive(Debug, Clone, Default)]
pub struct MemoryRuns {
    runs: Vec<RunRecord>,
}

impl RunBackend for MemoryRuns {
    fn load(&self) -> Result<Vec<RunRecord>> {
        Ok(self.runs.clone())
    }

    fn save(&mut self, runs: &[RunRecord]) -> Result<()> {
        self.runs = runs.to_vec();
        Ok(())
    }
}

/// JSON file backend (persistent)
pub struct FileRuns {
    path: PathBuf,
}

impl FileRuns {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::new(ErrorKind::IoFailed, format!("Failed to create data dir {}: {}", dir.display(), e))
                .with_operation("store::open")
                .set_source(e)
        })?;
        Ok(Self {
            path: dir.join(RUNS_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RunBackend for FileRuns {
    fn load(&self) -> Result<Vec<RunRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::new(ErrorKind::IoFailed, format!("Failed to read {}: {}", self.path.display(), e))
                .with_operation("store::load")
                .set_source(e)
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Error::serialization_failed(format!("Corrupt run store {}: {}", self.path.display(), e))
                .with_operation("store::load")
                .set_source(e)
        })
    }

    fn save(&mut self, runs: &[RunRecord]) -> Result<()> {
        let content = serde_json::to_string_pretty(runs).map_err(|e| {
            Error::serialization_failed(e.to_string())
                .with_operation("store::save")
                .set_source(e)
        })?;
        std::fs::write(&self.path, content).map_err(|e| {
            Error::new(ErrorKind::IoFailed, format!("Failed to write {}: {}", self.path.display(), e))
                .with_operation("store::save")
                .set_source(e)
        })
    }
}

/// Run store - high-level interface
pub struct RunStore {
    backend: Box<dyn RunBackend>,
    max_runs: usize,
}

impl RunStore {
    /// Create a store with the in-memory backend
    pub fn memory() -> Self {
        Self::with_backend(MemoryRuns::default())
    }

    /// Create a store persisted under `dir`
    pub fn file(dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::with_backend(FileRuns::new(dir)?))
    }

    pub fn with_backend(backend: impl RunBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            max_runs: DEFAULT_MAX_RUNS,
        }
    }

    pub fn with_max_runs(mut self, max_runs: usize) -> Self {
        self.max_runs = max_runs.max(1);
        self
    }

    /// Record a finished run
    pub fn record(&mut self, inputs: HashMap<String, String>, result: &PipelineResult) -> Result<RunRecord> {
        let record = RunRecord {
            run_id: Uuid::new_v4(),
            inputs,
            tasks: result.tasks.clone(),
            created_at: Utc::now(),
        };

        let mut runs = self.backend.load()?;
        runs.push(record.clone());
        if runs.len() > self.max_runs {
            let excess = runs.len() - self.max_runs;
            runs.drain(..excess);
        }
        self.backend.save(&runs)?;
        tracing::debug!(run_id = %record.run_id, tasks = record.tasks.len(), "Recorded run");
        Ok(record)
    }

    /// All runs, oldest first
    pub fn runs(&self) -> Result<Vec<RunRecord>> {
        self.backend.load()
    }

    /// Find the run holding a task, by full id or a unique prefix of it
    pub fn find_task(&self, task_id: &str) -> Result<(RunRecord, TaskRecord)> {
        let needle = task_id.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return Err(Error::invalid_argument("task id is empty").with_operation("store::find_task"));
        }

        let mut matches = Vec::new();
        for run in self.backend.load()? {
            for task in &run.tasks {
                if task.task_id.to_string().starts_with(&needle) {
                    matches.push((run.clone(), task.clone()));
                }
            }
        }

        match matches.len() {
            0 => Err(Error::not_found("task", task_id).with_operation("store::find_task")),
            1 => Ok(matches.remove(0)),
            n => Err(Error::invalid_argument(format!(
                "task id '{}' is ambiguous ({} matches), use more characters",
                task_id, n
            ))
            .with_operation("store::find_task")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Stage;
    use std::time::Duration;

    fn result(outputs: &[(Stage, &str)]) -> PipelineResult {
        let tasks: Vec<TaskRecord> = outputs
            .iter()
            .map(|(stage, output)| TaskRecord {
                task_id: Uuid::new_v4(),
                stage: *stage,
                agent: "agent".into(),
                description: "describe".into(),
                output: output.to_string(),
                duration: Duration::from_millis(10),
            })
            .collect();
        PipelineResult {
            raw_text: outputs.last().map(|(_, o)| o.to_string()).unwrap_or_default(),
            execution_time: Duration::from_millis(20),
            tasks,
        }
    }

    fn inputs() -> HashMap<String, String> {
        HashMap::from([("context".to_string(), "print(1)".to_string())])
    }

    #[test]
    fn test_memory_store_find_task() {
        let mut store = RunStore::memory();
        let run = store
            .record(inputs(), &result(&[(Stage::Fixing, "fix"), (Stage::Verifying, "verify")]))
            .unwrap();

        let verify_id = run.tasks[1].task_id.to_string();
        let (found_run, task) = store.find_task(&verify_id).unwrap();
        assert_eq!(found_run.run_id, run.run_id);
        assert_eq!(task.stage, Stage::Verifying);

        let (_, by_prefix) = store.find_task(&verify_id[..13].to_uppercase()).unwrap();
        assert_eq!(by_prefix.task_id, run.tasks[1].task_id);
    }

    #[test]
    fn test_unknown_task() {
        let store = RunStore::memory();
        let err = store.find_task("0000").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = store.find_task("  ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let run_id = {
            let mut store = RunStore::file(dir.path()).unwrap();
            store.record(inputs(), &result(&[(Stage::Fixing, "fix")])).unwrap().run_id
        };

        assert!(dir.path().join(RUNS_FILE).exists());
        let store = RunStore::file(dir.path()).unwrap();
        let runs = store.runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, run_id);
        assert_eq!(runs[0].inputs["context"], "print(1)");
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RUNS_FILE), "not json").unwrap();
        let store = RunStore::file(dir.path()).unwrap();
        assert_eq!(store.runs().unwrap_err().kind(), ErrorKind::SerializationFailed);
    }

    #[test]
    fn test_oldest_runs_dropped() {
        let mut store = RunStore::memory().with_max_runs(2);
        for output in ["a", "b", "c"] {
            store.record(inputs(), &result(&[(Stage::Fixing, output)])).unwrap();
        }
        let runs = store.runs().unwrap();
        let outputs: Vec<&str> = runs.iter().map(|r| r.tasks[0].output.as_str()).collect();
        assert_eq!(outputs, vec!["b", "c"]);
    }
}
