//! Loop state storage for iteration bookkeeping.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::LoopStatus;

/// Persisted bookkeeping for the loop (`.prd/state.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopState {
    /// PRD file the loop is (or was last) working on.
    pub current_prd: String,
    /// Story selected by the most recent iteration.
    pub current_story_id: String,
    /// Iterations started, carried across resumed runs.
    pub loop_count: u32,
    /// Agent invocations made, carried across resumed runs.
    pub total_api_calls: u64,
    /// When the last iteration finished.
    pub last_run: Option<String>,
    /// Session id reported by the most recent agent call.
    pub session_id: String,
    pub status: LoopStatus,
    /// Mirror of the in-memory circuit breaker counter. Informational only.
    pub consecutive_failures: u32,
}

/// Load loop state from disk. A missing file yields the default state.
pub fn load_loop_state(path: &Path) -> Result<LoopState> {
    if !path.exists() {
        debug!(path = %path.display(), "no loop state, using default");
        return Ok(LoopState::default());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read loop state {}", path.display()))?;
    let state: LoopState = serde_json::from_str(&contents)
        .with_context(|| format!("parse loop state {}", path.display()))?;
    debug!(status = %state.status, loop_count = state.loop_count, "loop state loaded");
    Ok(state)
}

/// Atomically write loop state to disk (temp file + rename).
pub fn write_loop_state(path: &Path, state: &LoopState) -> Result<()> {
    debug!(
        path = %path.display(),
        status = %state.status,
        loop_count = state.loop_count,
        "writing loop state"
    );
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies write → read preserves all fields.
    #[test]
    fn loop_state_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");

        let state = LoopState {
            current_prd: ".prd/prds/feature.json".to_string(),
            current_story_id: "US-002".to_string(),
            loop_count: 7,
            total_api_calls: 9,
            last_run: Some("2026-01-01T10:00:00+00:00".to_string()),
            session_id: "abc".to_string(),
            status: LoopStatus::Paused,
            consecutive_failures: 2,
        };

        write_loop_state(&path, &state).expect("write");
        let loaded = load_loop_state(&path).expect("load");
        assert_eq!(loaded, state);
    }

    #[test]
    fn missing_file_is_default_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = load_loop_state(&temp.path().join("state.json")).expect("load");
        assert_eq!(state, LoopState::default());
        assert_eq!(state.status, LoopStatus::Idle);
    }

    /// Older state files carry only a subset of fields.
    #[test]
    fn partial_state_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        fs::write(&path, r#"{"loop_count": 4, "status": "running"}"#).expect("write");

        let state = load_loop_state(&path).expect("load");
        assert_eq!(state.loop_count, 4);
        assert_eq!(state.status, LoopStatus::Running);
        assert_eq!(state.total_api_calls, 0);
        assert_eq!(state.last_run, None);
    }

    /// Ensures default state serializes to a known, stable JSON format.
    #[test]
    fn loop_state_defaults_are_deterministic() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");

        write_loop_state(&path, &LoopState::default()).expect("write");
        let contents = fs::read_to_string(&path).expect("read");
        let expected = "{\n  \"current_prd\": \"\",\n  \"current_story_id\": \"\",\n  \"loop_count\": 0,\n  \"total_api_calls\": 0,\n  \"last_run\": null,\n  \"session_id\": \"\",\n  \"status\": \"idle\",\n  \"consecutive_failures\": 0\n}\n";
        assert_eq!(contents, expected);
    }
}
