//! Test-only helpers: PRD fixtures, a settable clock, a scripted agent and a
//! scratch project directory.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Map;
use tempfile::TempDir;

use crate::core::types::TimeoutReason;
use crate::io::agent::{AgentRequest, AgentRunner};
use crate::io::config::{LoopConfig, write_config};
use crate::io::paths::{PrdPaths, init_project};
use crate::io::prd_store::{load_prd, write_prd};
use crate::io::process::{ExecutionResult, StreamTaps};
use crate::io::rate_limiter::Clock;
use crate::prd::{Prd, Story};

const FIXED_TIMESTAMP: &str = "2026-01-01T00:00:00+00:00";

/// Create a deterministic story with explicit `priority` and `passes`.
pub fn story(id: &str, priority: i64, passes: bool) -> Story {
    Story {
        id: id.to_string(),
        title: format!("{id} title"),
        description: format!("{id} description"),
        acceptance_criteria: vec![format!("{id} works")],
        priority,
        passes,
        notes: String::new(),
        completed_at: None,
        extra: Map::new(),
    }
}

/// Create a PRD for project `demo` holding `stories`.
pub fn prd_with(stories: Vec<Story>) -> Prd {
    Prd {
        project: "demo".to_string(),
        branch_name: "feature/demo".to_string(),
        description: "demo project".to_string(),
        source_spec: String::new(),
        created_at: FIXED_TIMESTAMP.to_string(),
        updated_at: FIXED_TIMESTAMP.to_string(),
        user_stories: stories,
        extra: Map::new(),
    }
}

/// Default config without the pause between iterations.
pub fn fast_config() -> LoopConfig {
    LoopConfig {
        iteration_pause_secs: 0,
        ..LoopConfig::default()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<Mutex<NaiveDateTime>>);

impl ManualClock {
    pub fn at(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Self(Arc::new(Mutex::new(naive(year, month, day, hour, min, sec))))
    }

    pub fn set(&self, year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) {
        *self.0.lock().expect("clock lock") = naive(year, month, day, hour, min, sec);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock().expect("clock lock")
    }
}

fn naive(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, min, sec))
        .expect("valid test time")
}

/// What a scripted agent call does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedCall {
    /// Mark the story passing in the PRD file, then exit zero.
    Complete(String),
    /// Exit zero without touching the PRD.
    NoProgress,
    /// Exit with the given non-zero code.
    Exit(i32),
    /// Report an idle timeout.
    Timeout,
    /// Mark the story passing, then report an idle timeout as if the agent
    /// hung after editing the PRD.
    CompleteThenTimeout(String),
    /// Replace the PRD file with raw contents, then exit zero.
    CorruptPrd(String),
}

/// Agent that plays back a fixed script against a PRD file.
///
/// Each call writes one JSON line to the raw sink and one line of text to
/// the live callback. Once the script runs out every call is
/// [`ScriptedCall::NoProgress`].
pub struct ScriptedAgent {
    prd_path: PathBuf,
    script: RefCell<VecDeque<ScriptedCall>>,
    calls: Cell<usize>,
    last_request: RefCell<Option<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(prd_path: &Path, script: Vec<ScriptedCall>) -> Self {
        Self {
            prd_path: prd_path.to_path_buf(),
            script: RefCell::new(script.into()),
            calls: Cell::new(0),
            last_request: RefCell::new(None),
        }
    }

    /// Number of invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    pub fn last_request(&self) -> Option<AgentRequest> {
        self.last_request.borrow().clone()
    }
}

impl ScriptedAgent {
    fn complete(&self, story_id: &str) {
        let mut prd = load_prd(&self.prd_path).expect("scripted agent loads PRD");
        assert!(
            prd.mark_complete(story_id, Some("implemented by scripted agent")),
            "scripted story {story_id} missing"
        );
        write_prd(&self.prd_path, &prd).expect("scripted agent writes PRD");
    }
}

fn mark_timed_out(result: &mut ExecutionResult) {
    result.success = false;
    result.exit_code = -1;
    result.timeout = true;
    result.timeout_reason = Some(TimeoutReason::OutputTimeout);
}

impl AgentRunner for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest, taps: StreamTaps<'_>) -> ExecutionResult {
        let call = self.calls.get() + 1;
        self.calls.set(call);
        *self.last_request.borrow_mut() = Some(request.clone());
        let step = self
            .script
            .borrow_mut()
            .pop_front()
            .unwrap_or(ScriptedCall::NoProgress);

        let session_id = format!("scripted-{call}");
        let text = format!("scripted call {call}\n");
        let StreamTaps { raw, on_text } = taps;
        if let Some(sink) = raw {
            let line = format!("{{\"type\":\"result\",\"session_id\":\"{session_id}\"}}\n");
            sink.write_all(line.as_bytes()).expect("write raw sink");
        }
        if let Some(callback) = on_text {
            callback(&text);
        }

        let mut result = ExecutionResult {
            success: true,
            output: text,
            session_id,
            duration: Duration::from_millis(10),
            exit_code: 0,
            timeout: false,
            timeout_reason: None,
        };
        match step {
            ScriptedCall::Complete(story_id) => self.complete(&story_id),
            ScriptedCall::NoProgress => {}
            ScriptedCall::Exit(code) => {
                result.success = false;
                result.exit_code = code;
            }
            ScriptedCall::Timeout => mark_timed_out(&mut result),
            ScriptedCall::CompleteThenTimeout(story_id) => {
                self.complete(&story_id);
                mark_timed_out(&mut result);
            }
            ScriptedCall::CorruptPrd(contents) => {
                fs::write(&self.prd_path, contents).expect("scripted agent corrupts PRD");
            }
        }
        result
    }
}

/// Scratch project with an initialized `.prd/` layout.
pub struct TestProject {
    // Held for its Drop; the directory lives as long as the project.
    _temp: TempDir,
    paths: PrdPaths,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let paths = init_project(temp.path())?;
        Ok(Self { _temp: temp, paths })
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn paths(&self) -> &PrdPaths {
        &self.paths
    }

    /// Write `prd` to `.prd/prds/<name>` and return its path.
    pub fn write_prd(&self, name: &str, prd: &Prd) -> Result<PathBuf> {
        let path = self.paths.prds_dir.join(name);
        write_prd(&path, prd)?;
        Ok(path)
    }

    pub fn write_config(&self, config: &LoopConfig) -> Result<()> {
        write_config(&self.paths.config_path, config)
    }
}
