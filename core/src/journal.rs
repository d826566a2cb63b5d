use crate::RunStage;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RunEntry {
    pub timestamp: u64,
    pub event: RunEvent,
    pub attempt: u32,
    pub stage: Option<RunStage>,
    pub error: Option<String>,
    pub candidates_generated: Option<usize>,
    pub candidates_succeeded: Option<usize>,
    pub judged: Option<bool>,
    pub transition: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunEvent {
    AttemptFailed,
    Completed,
    Failed,
}

/// Summary of a completed run, as recorded in the journal
#[derive(Debug, Clone, Copy)]
pub struct CompletedRun {
    pub attempts: u32,
    pub candidates_generated: usize,
    pub candidates_succeeded: usize,
    pub judged: bool,
    pub transition: bool,
}

#[derive(Debug, Serialize, Clone)]
pub struct Statistics {
    pub total_runs: u32,
    pub completed: u32,
    pub failed: u32,
    pub success_rate: f32,
    pub mean_attempts: f32,
    pub judged: u32,
    pub missing_transition: u32,
    pub failures_by_stage: Vec<(RunStage, u32)>,
}

/// Append-only JSONL record of synthesis runs
pub struct RunJournal {
    log_path: PathBuf,
}

impl RunJournal {
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_log_path()?)
    }

    pub fn with_path(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create journal directory")?;
        }
        Ok(Self { log_path: path })
    }

    fn default_log_path() -> Result<PathBuf> {
        let data = dirs::data_dir().context("Could not determine data directory")?;
        Ok(data.join("restyle").join("runs.jsonl"))
    }

    fn current_timestamp() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn entry(event: RunEvent, attempt: u32) -> RunEntry {
        RunEntry {
            timestamp: Self::current_timestamp(),
            event,
            attempt,
            stage: None,
            error: None,
            candidates_generated: None,
            candidates_succeeded: None,
            judged: None,
            transition: None,
        }
    }

    fn append_entry(&self, entry: &RunEntry) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .context("Failed to open run journal")?;

        let json = serde_json::to_string(entry)?;
        writeln!(file, "{json}")?;

        Ok(())
    }

    /// Record a failed attempt that will be retried or reported
    pub fn log_attempt_failure(&self, attempt: u32, stage: RunStage, error: &str) -> Result<()> {
        self.append_entry(&RunEntry {
            stage: Some(stage),
            error: Some(error.to_string()),
            ..Self::entry(RunEvent::AttemptFailed, attempt)
        })
    }

    pub fn log_completed(&self, run: &CompletedRun) -> Result<()> {
        self.append_entry(&RunEntry {
            candidates_generated: Some(run.candidates_generated),
            candidates_succeeded: Some(run.candidates_succeeded),
            judged: Some(run.judged),
            transition: Some(run.transition),
            ..Self::entry(RunEvent::Completed, run.attempts)
        })
    }

    pub fn log_failed(&self, attempts: u32, stage: RunStage, error: &str) -> Result<()> {
        self.append_entry(&RunEntry {
            stage: Some(stage),
            error: Some(error.to_string()),
            ..Self::entry(RunEvent::Failed, attempts)
        })
    }

    fn read_entries(&self) -> Result<Vec<RunEntry>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file = std::fs::File::open(&self.log_path)?;
        let reader = BufReader::new(file);

        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(entry) = serde_json::from_str::<RunEntry>(&line) {
                entries.push(entry);
            } else {
                log::warn!("Failed to parse journal entry: {}", line);
            }
        }

        Ok(entries)
    }

    pub fn get_stats(&self) -> Result<Statistics> {
        let entries = self.read_entries()?;

        let mut completed = 0u32;
        let mut failed = 0u32;
        let mut judged = 0u32;
        let mut missing_transition = 0u32;
        let mut completed_attempts = 0u32;
        let mut stage_counts: HashMap<RunStage, u32> = HashMap::new();

        for entry in entries {
            match entry.event {
                RunEvent::Completed => {
                    completed += 1;
                    completed_attempts += entry.attempt;
                    if entry.judged == Some(true) {
                        judged += 1;
                    }
                    if entry.transition == Some(false) {
                        missing_transition += 1;
                    }
                }
                RunEvent::Failed => failed += 1,
                RunEvent::AttemptFailed => {
                    if let Some(stage) = entry.stage {
                        *stage_counts.entry(stage).or_insert(0) += 1;
                    }
                }
            }
        }

        let total_runs = completed + failed;
        let success_rate = if total_runs > 0 {
            completed as f32 / total_runs as f32
        } else {
            0.0
        };
        let mean_attempts = if completed > 0 {
            completed_attempts as f32 / completed as f32
        } else {
            0.0
        };

        let mut failures_by_stage: Vec<(RunStage, u32)> = stage_counts.into_iter().collect();
        failures_by_stage.sort_by(|a, b| b.1.cmp(&a.1));

        Ok(Statistics {
            total_runs,
            completed,
            failed,
            success_rate,
            mean_attempts,
            judged,
            missing_transition,
            failures_by_stage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_log_and_read() {
        let dir = tempdir().unwrap();
        let journal = RunJournal::with_path(dir.path().join("runs.jsonl")).unwrap();

        journal
            .log_attempt_failure(1, RunStage::Generating, "all failed")
            .unwrap();
        journal
            .log_completed(&CompletedRun {
                attempts: 2,
                candidates_generated: 5,
                candidates_succeeded: 3,
                judged: true,
                transition: false,
            })
            .unwrap();
        journal
            .log_attempt_failure(1, RunStage::Preprocessing, "503")
            .unwrap();
        journal
            .log_attempt_failure(2, RunStage::Generating, "all failed")
            .unwrap();
        journal.log_failed(2, RunStage::Generating, "all failed").unwrap();

        let stats = journal.get_stats().unwrap();
        assert_eq!(stats.total_runs, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate - 0.5).abs() < 0.01);
        assert!((stats.mean_attempts - 2.0).abs() < 0.01);
        assert_eq!(stats.judged, 1);
        assert_eq!(stats.missing_transition, 1);
        assert_eq!(stats.failures_by_stage[0], (RunStage::Generating, 2));
    }

    #[test]
    fn test_skips_garbage_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");
        std::fs::write(&path, "not json\n\n").unwrap();
        let journal = RunJournal::with_path(path).unwrap();

        journal.log_failed(1, RunStage::Judging, "bad index").unwrap();

        let stats = journal.get_stats().unwrap();
        assert_eq!(stats.total_runs, 1);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_empty_journal() {
        let dir = tempdir().unwrap();
        let journal = RunJournal::with_path(dir.path().join("nested").join("runs.jsonl")).unwrap();

        let stats = journal.get_stats().unwrap();
        assert_eq!(stats.total_runs, 0);
        assert!(stats.success_rate.abs() < f32::EPSILON);
    }
}
