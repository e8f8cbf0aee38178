//! Setup for `prd-loop run`: everything that must succeed before the first
//! iteration.
//!
//! Failures here are setup errors. Nothing has been invoked yet, so the CLI
//! reports them and exits without touching loop state.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info};

use crate::io::agent::ClaudeAgent;
use crate::io::config::{LoopConfig, load_config};
use crate::io::paths::{PRD_DIR_NAME, PrdPaths, find_project_root};
use crate::io::prd_store::load_prd;

/// Per-run overrides from the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOverrides {
    pub max_iterations: Option<u32>,
    pub timeout_minutes: Option<u64>,
    pub model: Option<String>,
    pub no_progress_threshold: Option<u32>,
}

impl RunOverrides {
    pub fn apply(&self, config: &mut LoopConfig) {
        if let Some(max_iterations) = self.max_iterations {
            config.max_iterations = max_iterations;
        }
        if let Some(timeout_minutes) = self.timeout_minutes {
            config.timeout_minutes = timeout_minutes;
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(threshold) = self.no_progress_threshold {
            config.max_consecutive_failures = threshold;
        }
    }
}

/// A run that passed setup checks.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub paths: PrdPaths,
    pub config: LoopConfig,
    pub prd_path: PathBuf,
    /// Stories not yet passing when setup ran.
    pub pending_stories: usize,
}

/// Find the project containing `cwd`.
pub fn locate_project(cwd: &Path) -> Result<PrdPaths> {
    let root = find_project_root(cwd).ok_or_else(|| {
        anyhow!(
            "no {PRD_DIR_NAME}/ directory found in {} or any parent (run `prd-loop init` first)",
            cwd.display()
        )
    })?;
    Ok(PrdPaths::new(root))
}

/// Resolve the project, effective config and PRD for a run.
///
/// `prd` may be a path or a bare file name in `.prd/prds/`. When absent the
/// most recently modified PRD is used. The PRD must load and hold at least
/// one story.
pub fn prepare_run(cwd: &Path, prd: Option<&Path>, overrides: &RunOverrides) -> Result<PreparedRun> {
    let paths = locate_project(cwd)?;
    debug!(root = %paths.root.display(), "project located");

    let mut config = load_config(&paths.config_path)?;
    overrides.apply(&mut config);
    config
        .validate()
        .context("invalid command-line overrides")?;

    let prd_path = match prd {
        Some(requested) => paths.resolve_prd(requested)?,
        None => paths.latest_prd()?.ok_or_else(|| {
            anyhow!(
                "no PRD files in {} (create one or pass --prd)",
                paths.prds_dir.display()
            )
        })?,
    };
    let prd = load_prd(&prd_path)?;
    if prd.user_stories.is_empty() {
        bail!("PRD {} has no user stories", prd_path.display());
    }
    let pending_stories = prd.pending_stories().count();
    info!(prd = %prd_path.display(), pending_stories, "PRD selected");

    Ok(PreparedRun {
        paths,
        config,
        prd_path,
        pending_stories,
    })
}

/// Refuse to start when the agent CLI is not usable.
pub fn ensure_agent_installed(agent: &ClaudeAgent) -> Result<()> {
    if !agent.check_installed() {
        bail!(
            "agent CLI '{}' is not installed or not working (`{} --version` failed)",
            agent.program(),
            agent.program()
        );
    }
    Ok(())
}
