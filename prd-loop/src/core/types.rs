//! Shared deterministic types for loop control.
//!
//! These types define stable contracts between the controller, persisted
//! state and session logs. Their serialized spellings are part of the file
//! formats under `.prd/`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status persisted in loop state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
}

impl LoopStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopStatus::Idle => "idle",
            LoopStatus::Running => "running",
            LoopStatus::Paused => "paused",
            LoopStatus::Completed => "completed",
            LoopStatus::Failed => "failed",
            LoopStatus::Stopped => "stopped",
        }
    }

    /// Statuses that indicate another loop may still own the document.
    pub fn is_active(self) -> bool {
        matches!(self, LoopStatus::Running | LoopStatus::Paused)
    }
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the loop stopped. Each reason maps to exactly one terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Complete,
    CircuitBreaker,
    MaxIterations,
    UserInterrupt,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::Complete => "complete",
            ExitReason::CircuitBreaker => "circuit_breaker",
            ExitReason::MaxIterations => "max_iterations",
            ExitReason::UserInterrupt => "user_interrupt",
        }
    }

    pub fn terminal_status(self) -> LoopStatus {
        match self {
            ExitReason::Complete => LoopStatus::Completed,
            ExitReason::CircuitBreaker => LoopStatus::Failed,
            ExitReason::MaxIterations => LoopStatus::Stopped,
            ExitReason::UserInterrupt => LoopStatus::Paused,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Iteration failure recorded into the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The agent produced no output for longer than the idle timeout.
    Timeout,
    /// The agent exited non-zero or could not be spawned.
    ExitCode(i32),
    /// The agent exited zero without flipping the target story.
    NoProgress,
    /// The PRD could not be reloaded after the agent ran.
    InvalidPrd,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => f.write_str("timeout"),
            FailureReason::ExitCode(code) => write!(f, "exit_code_{code}"),
            FailureReason::NoProgress => f.write_str("no_progress"),
            FailureReason::InvalidPrd => f.write_str("invalid_prd"),
        }
    }
}

/// Why a monitored agent call was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutReason {
    /// No output arrived within the idle timeout.
    OutputTimeout,
}

impl TimeoutReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeoutReason::OutputTimeout => "output_timeout",
        }
    }
}

impl fmt::Display for TimeoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
