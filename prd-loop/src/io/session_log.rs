//! Session audit logs under `.prd/logs/session_<stamp>/`.
//!
//! Layout of one session directory:
//!
//! ```text
//! config.json         effective configuration for the run
//! prd_snapshot.json   PRD as it was when the run started
//! loop_001.jsonl      raw agent stream for loop 1, byte for byte
//! loop_002.jsonl      ...
//! summary.json        per-loop records and totals, written at the end
//! ```
//!
//! These are product artifacts: they are always written, independent of
//! `RUST_LOG`.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::core::types::ExitReason;
use crate::io::config::LoopConfig;
use crate::prd::{Prd, Story, format_timestamp};

/// Record of one loop iteration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoopRecord {
    pub loop_num: u32,
    pub story_id: String,
    pub story_title: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_seconds: f64,
    pub api_duration_seconds: f64,
    pub success: bool,
    pub story_passed: bool,
    pub timeout: bool,
    pub error: String,
    /// File name of the raw stream log, relative to the session directory.
    pub log_file: String,
}

/// Final report written to `summary.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub session_id: String,
    pub start_time: String,
    pub end_time: String,
    pub total_duration_seconds: f64,
    pub exit_reason: String,
    pub project: String,
    pub prd_file: String,
    pub total_stories: usize,
    pub stories_completed: usize,
    pub stories_completed_this_session: usize,
    pub total_loops: u32,
    pub successful_loops: u32,
    pub failed_loops: u32,
    pub total_api_calls: u64,
    pub total_api_time_seconds: f64,
    pub avg_loop_duration_seconds: f64,
    pub config: Value,
    pub loops: Vec<LoopRecord>,
}

/// How a loop iteration ended, as recorded in the summary.
#[derive(Debug, Clone, Default)]
pub struct LoopOutcome {
    pub success: bool,
    pub story_passed: bool,
    pub timeout: bool,
    pub error: String,
    pub api_duration: Duration,
}

/// An open loop: its record so far and the raw stream file.
pub struct LoopLog {
    record: LoopRecord,
    file: File,
    started: Instant,
}

impl LoopLog {
    /// Sink for the raw agent stream.
    pub fn sink(&mut self) -> &mut File {
        &mut self.file
    }
}

/// Inputs for the final summary.
#[derive(Debug, Clone)]
pub struct SessionTotals<'a> {
    pub exit_reason: ExitReason,
    pub total_api_calls: u64,
    pub prd: &'a Prd,
    pub prd_file: &'a Path,
}

pub struct SessionLog {
    dir: PathBuf,
    started: Instant,
    summary: SessionSummary,
}

impl SessionLog {
    /// Create a new session directory in `logs_dir`, named after `at`.
    ///
    /// Two sessions started within the same second get distinct directories.
    pub fn create(logs_dir: &Path, at: DateTime<Local>) -> Result<Self> {
        let stamp = at.format("%Y%m%d_%H%M%S").to_string();
        let mut session_id = stamp.clone();
        let mut suffix = 1;
        while logs_dir.join(format!("session_{session_id}")).exists() {
            suffix += 1;
            session_id = format!("{stamp}_{suffix}");
        }
        let dir = logs_dir.join(format!("session_{session_id}"));
        fs::create_dir_all(&dir)
            .with_context(|| format!("create session log dir {}", dir.display()))?;
        info!(dir = %dir.display(), "session log started");
        Ok(Self {
            dir,
            started: Instant::now(),
            summary: SessionSummary {
                session_id,
                start_time: format_timestamp(at),
                ..SessionSummary::default()
            },
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn session_id(&self) -> &str {
        &self.summary.session_id
    }

    pub fn save_config(&mut self, config: &LoopConfig) -> Result<()> {
        let value = serde_json::to_value(config).context("serialize config snapshot")?;
        write_json(&self.dir.join("config.json"), &value)?;
        self.summary.config = value;
        Ok(())
    }

    pub fn save_prd_snapshot(&mut self, prd: &Prd) -> Result<()> {
        write_json(&self.dir.join("prd_snapshot.json"), prd)?;
        let (completed, total) = prd.progress();
        self.summary.project = prd.project.clone();
        self.summary.stories_completed = completed;
        self.summary.total_stories = total;
        Ok(())
    }

    /// Open `loop_NNN.jsonl` for `loop_num` working on `story`.
    pub fn start_loop(&self, loop_num: u32, story: &Story) -> Result<LoopLog> {
        let log_file = format!("loop_{loop_num:03}.jsonl");
        let path = self.dir.join(&log_file);
        let file =
            File::create(&path).with_context(|| format!("create loop log {}", path.display()))?;
        debug!(loop_num, story_id = %story.id, path = %path.display(), "loop log opened");
        Ok(LoopLog {
            record: LoopRecord {
                loop_num,
                story_id: story.id.clone(),
                story_title: story.title.clone(),
                start_time: format_timestamp(Local::now()),
                end_time: String::new(),
                duration_seconds: 0.0,
                api_duration_seconds: 0.0,
                success: false,
                story_passed: false,
                timeout: false,
                error: String::new(),
                log_file,
            },
            file,
            started: Instant::now(),
        })
    }

    /// Close the loop log and fold its outcome into the running totals.
    pub fn end_loop(&mut self, log: LoopLog, outcome: &LoopOutcome) -> LoopRecord {
        let LoopLog {
            mut record,
            file,
            started,
        } = log;
        drop(file);

        record.end_time = format_timestamp(Local::now());
        record.duration_seconds = started.elapsed().as_secs_f64();
        record.api_duration_seconds = outcome.api_duration.as_secs_f64();
        record.success = outcome.success;
        record.story_passed = outcome.story_passed;
        record.timeout = outcome.timeout;
        record.error = outcome.error.clone();

        let summary = &mut self.summary;
        summary.total_loops += 1;
        if outcome.success {
            summary.successful_loops += 1;
        } else {
            summary.failed_loops += 1;
        }
        if outcome.story_passed {
            summary.stories_completed_this_session += 1;
        }
        summary.total_api_time_seconds += record.api_duration_seconds;
        summary.loops.push(record.clone());
        record
    }

    /// Write `summary.json` and return the summary.
    pub fn finalize(mut self, totals: &SessionTotals<'_>) -> Result<SessionSummary> {
        let (completed, total) = totals.prd.progress();
        let summary = &mut self.summary;
        summary.end_time = format_timestamp(Local::now());
        summary.total_duration_seconds = self.started.elapsed().as_secs_f64();
        summary.exit_reason = totals.exit_reason.as_str().to_string();
        summary.total_api_calls = totals.total_api_calls;
        summary.stories_completed = completed;
        summary.total_stories = total;
        summary.prd_file = totals.prd_file.display().to_string();
        if summary.project.is_empty() {
            summary.project = totals.prd.project.clone();
        }
        if !summary.loops.is_empty() {
            let total_loop_secs: f64 = summary.loops.iter().map(|l| l.duration_seconds).sum();
            summary.avg_loop_duration_seconds = total_loop_secs / summary.loops.len() as f64;
        }

        let path = self.dir.join("summary.json");
        write_json(&path, &self.summary)?;
        info!(path = %path.display(), exit_reason = %totals.exit_reason, "session summary written");
        Ok(self.summary)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{prd_with, story};
    use chrono::TimeZone;
    use std::io::Write;

    fn at(h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 2, 1, h, mi, s)
            .single()
            .expect("unambiguous time")
    }

    #[test]
    fn session_dir_is_named_after_start_time() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = SessionLog::create(temp.path(), at(9, 8, 7)).expect("create");
        assert!(first.dir().ends_with("session_20260201_090807"));

        let second = SessionLog::create(temp.path(), at(9, 8, 7)).expect("create");
        assert_eq!(second.session_id(), "20260201_090807_2");
        assert_ne!(first.dir(), second.dir());
    }

    #[test]
    fn records_loops_and_writes_summary() {
        let temp = tempfile::tempdir().expect("tempdir");
        let prd = prd_with(vec![story("US-001", 1, false), story("US-002", 2, false)]);
        let mut session = SessionLog::create(temp.path(), at(10, 0, 0)).expect("create");
        session
            .save_config(&LoopConfig::default())
            .expect("save config");
        session.save_prd_snapshot(&prd).expect("save snapshot");

        let mut first = session.start_loop(1, &prd.user_stories[0]).expect("start");
        first
            .sink()
            .write_all(b"{\"type\":\"system\"}\n")
            .expect("write raw");
        session.end_loop(
            first,
            &LoopOutcome {
                success: true,
                story_passed: true,
                api_duration: Duration::from_millis(1500),
                ..LoopOutcome::default()
            },
        );

        let second = session.start_loop(2, &prd.user_stories[1]).expect("start");
        let record = session.end_loop(
            second,
            &LoopOutcome {
                timeout: true,
                error: "timeout".to_string(),
                ..LoopOutcome::default()
            },
        );
        assert_eq!(record.log_file, "loop_002.jsonl");
        assert!(!record.success);

        let dir = session.dir().to_path_buf();
        let summary = session
            .finalize(&SessionTotals {
                exit_reason: ExitReason::CircuitBreaker,
                total_api_calls: 2,
                prd: &prd,
                prd_file: Path::new(".prd/prds/demo.json"),
            })
            .expect("finalize");

        assert_eq!(summary.total_loops, 2);
        assert_eq!(summary.successful_loops, 1);
        assert_eq!(summary.failed_loops, 1);
        assert_eq!(summary.stories_completed_this_session, 1);
        assert_eq!(summary.exit_reason, "circuit_breaker");
        assert_eq!(summary.total_stories, 2);
        assert!((summary.total_api_time_seconds - 1.5).abs() < 1e-9);

        assert_eq!(
            fs::read_to_string(dir.join("loop_001.jsonl")).expect("read"),
            "{\"type\":\"system\"}\n"
        );
        assert!(dir.join("config.json").is_file());
        assert!(dir.join("prd_snapshot.json").is_file());
        let stored: SessionSummary =
            serde_json::from_str(&fs::read_to_string(dir.join("summary.json")).expect("read"))
                .expect("parse summary");
        assert_eq!(stored.session_id, summary.session_id);
        assert_eq!(stored.loops.len(), 2);
        assert_eq!(stored.loops[0].story_id, "US-001");
        assert_eq!(stored.prd_file, ".prd/prds/demo.json");
        assert_eq!(stored.config["max_iterations"], 50);
    }
}
