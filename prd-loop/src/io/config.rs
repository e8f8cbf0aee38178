//! Loop configuration stored under `.prd/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Loop configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults, and
/// command-line flags override individual values for a single run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    /// Agent invocations allowed per calendar hour.
    pub max_calls_per_hour: u32,

    /// Upper bound on loop iterations, counted across resumed runs.
    pub max_iterations: u32,

    /// Kill the agent after this many minutes without output.
    pub timeout_minutes: u64,

    /// Consecutive failed iterations before the circuit breaker trips.
    pub max_consecutive_failures: u32,

    /// Pause between iterations, in seconds.
    pub iteration_pause_secs: u64,

    /// Model selector passed to the agent.
    pub model: String,

    /// Tool allow-list passed to the agent.
    pub allowed_tools: Vec<String>,

    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Executable used to run the agent.
    pub program: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_calls_per_hour: 100,
            max_iterations: 50,
            timeout_minutes: 15,
            max_consecutive_failures: 3,
            iteration_pause_secs: 2,
            model: "sonnet".to_string(),
            allowed_tools: [
                "Write",
                "Read",
                "Edit",
                "Bash(git *)",
                "Bash(npm *)",
                "Bash(pytest)",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            agent: AgentConfig::default(),
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_calls_per_hour == 0 {
            return Err(anyhow!("max_calls_per_hour must be > 0"));
        }
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.timeout_minutes == 0 {
            return Err(anyhow!("timeout_minutes must be > 0"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(anyhow!("max_consecutive_failures must be > 0"));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }
        if self.agent.program.trim().is_empty() {
            return Err(anyhow!("agent.program must not be empty"));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }

    pub fn iteration_pause(&self) -> Duration {
        Duration::from_secs(self.iteration_pause_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LoopConfig::default()`.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    if !path.exists() {
        let cfg = LoopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &LoopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
