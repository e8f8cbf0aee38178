//! Agent abstraction for story implementation calls.
//!
//! The [`AgentRunner`] trait decouples the loop controller from the actual
//! agent backend (the `claude` CLI in stream-json mode). Tests use scripted
//! runners that edit the PRD and return canned results without spawning
//! processes.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use wait_timeout::ChildExt;

use super::process::{ExecutionResult, MonitorOptions, StreamTaps, run_monitored};

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    /// Working directory for the agent process. Inherited when `None`.
    pub workdir: Option<PathBuf>,
    /// Kill the agent after this long without output.
    pub idle_timeout: Duration,
    /// Tool allow-list forwarded to the agent.
    pub allowed_tools: Vec<String>,
    pub model: Option<String>,
}

/// Abstraction over agent execution backends.
pub trait AgentRunner {
    /// Run the agent to completion or idle timeout. Failures to start are
    /// reported through the result, never as errors.
    fn invoke(&self, request: &AgentRequest, taps: StreamTaps<'_>) -> ExecutionResult;
}

/// Runner that spawns the `claude` CLI with stream-json output.
#[derive(Debug, Clone)]
pub struct ClaudeAgent {
    program: String,
}

impl ClaudeAgent {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Build the full command line for `request`.
    pub fn command(&self, request: &AgentRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            // The loop runs unattended; there is nobody to answer prompts.
            .arg("--dangerously-skip-permissions");
        if let Some(model) = request.model.as_deref().filter(|m| !m.is_empty()) {
            cmd.arg("--model").arg(model);
        }
        if !request.allowed_tools.is_empty() {
            cmd.arg("--allowedTools").args(&request.allowed_tools);
        }
        cmd.arg("-p").arg(&request.prompt);
        if let Some(workdir) = &request.workdir {
            cmd.current_dir(workdir);
        }
        cmd
    }

    /// True when `<program> --version` exits zero within ten seconds.
    pub fn check_installed(&self) -> bool {
        let spawned = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                debug!(program = %self.program, err = %err, "agent version check failed to spawn");
                return false;
            }
        };
        match child.wait_timeout(VERSION_CHECK_TIMEOUT) {
            Ok(Some(status)) => status.success(),
            Ok(None) => {
                warn!(program = %self.program, "agent version check timed out");
                let _ = child.kill();
                let _ = child.wait();
                false
            }
            Err(err) => {
                warn!(program = %self.program, err = %err, "agent version check failed");
                false
            }
        }
    }
}

impl AgentRunner for ClaudeAgent {
    #[instrument(skip_all, fields(program = %self.program, model = ?request.model))]
    fn invoke(&self, request: &AgentRequest, taps: StreamTaps<'_>) -> ExecutionResult {
        info!(
            idle_timeout_secs = request.idle_timeout.as_secs(),
            prompt_bytes = request.prompt.len(),
            "starting agent"
        );
        let result = run_monitored(
            self.command(request),
            &MonitorOptions::new(request.idle_timeout),
            taps,
        );
        info!(
            success = result.success,
            exit_code = result.exit_code,
            timeout = result.timeout,
            duration_secs = result.duration.as_secs(),
            "agent finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AgentRequest {
        AgentRequest {
            prompt: "implement US-001".to_string(),
            workdir: None,
            idle_timeout: Duration::from_secs(60),
            allowed_tools: vec!["Read".to_string(), "Bash(git *)".to_string()],
            model: Some("opus".to_string()),
        }
    }

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn command_line_is_stream_json_with_prompt_last() {
        let cmd = ClaudeAgent::new("claude").command(&request());
        assert_eq!(cmd.get_program(), "claude");
        assert_eq!(
            args_of(&cmd),
            vec![
                "--output-format",
                "stream-json",
                "--verbose",
                "--dangerously-skip-permissions",
                "--model",
                "opus",
                "--allowedTools",
                "Read",
                "Bash(git *)",
                "-p",
                "implement US-001",
            ]
        );
    }

    #[test]
    fn optional_flags_are_omitted() {
        let mut req = request();
        req.model = None;
        req.allowed_tools.clear();
        let args = args_of(&ClaudeAgent::new("claude").command(&req));
        assert!(!args.iter().any(|arg| arg == "--model"));
        assert!(!args.iter().any(|arg| arg == "--allowedTools"));
    }

    #[test]
    fn missing_program_is_not_installed() {
        assert!(!ClaudeAgent::new("prd-loop-definitely-missing-agent").check_installed());
    }

    #[cfg(unix)]
    #[test]
    fn invoke_reports_missing_program_as_failed_result() {
        let agent = ClaudeAgent::new("prd-loop-definitely-missing-agent");
        let result = agent.invoke(&request(), StreamTaps::default());
        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert!(result.output.contains("prd-loop-definitely-missing-agent"));
    }
}
