//! `prd-loop status` and `prd-loop reset`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::io::config::load_config;
use crate::io::loop_state::{LoopState, load_loop_state, write_loop_state};
use crate::io::paths::PrdPaths;
use crate::io::prd_store::load_prd;
use crate::io::rate_limiter::{Clock, RateLimitStatus, RateLimiter};

/// PRD progress as shown by `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrdProgress {
    pub path: PathBuf,
    pub project: String,
    pub completed: usize,
    pub total: usize,
    /// `(id, title)` of the story the loop would pick next.
    pub next_story: Option<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub state: LoopState,
    pub rate_limit: RateLimitStatus,
    /// `None` when no PRD can be found. An unreadable PRD is an error.
    pub prd: Option<PrdProgress>,
}

/// Collect loop state, hourly budget and PRD progress for `paths`.
///
/// The PRD shown is the one recorded in loop state, or the latest PRD when
/// no loop has run yet.
pub fn collect_status<C: Clock>(paths: &PrdPaths, clock: C) -> Result<StatusReport> {
    let state = load_loop_state(&paths.state_path)?;
    let config = load_config(&paths.config_path)?;
    let rate_limit =
        RateLimiter::with_clock(&paths.rate_limit_path, config.max_calls_per_hour, clock)?
            .status()?;

    let recorded = Some(PathBuf::from(&state.current_prd))
        .filter(|path| !state.current_prd.is_empty() && path.is_file());
    if recorded.is_none() && !state.current_prd.is_empty() {
        warn!(prd = %state.current_prd, "PRD from loop state no longer exists");
    }
    let prd_path = match recorded {
        Some(path) => Some(path),
        None => paths.latest_prd()?,
    };

    let prd = match prd_path {
        Some(path) => {
            let prd = load_prd(&path)?;
            let (completed, total) = prd.progress();
            Some(PrdProgress {
                project: prd.project.clone(),
                completed,
                total,
                next_story: prd
                    .next_pending_story()
                    .map(|story| (story.id.clone(), story.title.clone())),
                path,
            })
        }
        None => None,
    };

    Ok(StatusReport {
        state,
        rate_limit,
        prd,
    })
}

/// Overwrite loop state with the default (idle, zero counters).
///
/// The PRD and the hourly window are left alone.
pub fn reset_state(paths: &PrdPaths) -> Result<()> {
    write_loop_state(&paths.state_path, &LoopState::default())
        .with_context(|| format!("reset {}", paths.state_path.display()))?;
    info!(path = %paths.state_path.display(), "loop state reset");
    Ok(())
}
