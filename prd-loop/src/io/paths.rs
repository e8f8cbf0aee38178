//! Project layout under `.prd/` and discovery of the project root.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use super::config::{LoopConfig, write_config};

pub const PRD_DIR_NAME: &str = ".prd";

/// All canonical paths within `.prd/` for a project root.
#[derive(Debug, Clone)]
pub struct PrdPaths {
    pub root: PathBuf,
    pub prd_dir: PathBuf,
    pub specs_dir: PathBuf,
    pub prds_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub config_path: PathBuf,
    pub state_path: PathBuf,
    pub rate_limit_path: PathBuf,
}

impl PrdPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let prd_dir = root.join(PRD_DIR_NAME);
        Self {
            root: root.clone(),
            prd_dir: prd_dir.clone(),
            specs_dir: prd_dir.join("specs"),
            prds_dir: prd_dir.join("prds"),
            logs_dir: prd_dir.join("logs"),
            config_path: prd_dir.join("config.toml"),
            state_path: prd_dir.join("state.json"),
            rate_limit_path: prd_dir.join("rate_limit.json"),
        }
    }

    /// Most recently modified `*.json` file in `.prd/prds/`.
    pub fn latest_prd(&self) -> Result<Option<PathBuf>> {
        if !self.prds_dir.is_dir() {
            return Ok(None);
        }
        let mut latest: Option<(SystemTime, PathBuf)> = None;
        let entries = fs::read_dir(&self.prds_dir)
            .with_context(|| format!("read {}", self.prds_dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("read {}", self.prds_dir.display()))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") || !path.is_file() {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .with_context(|| format!("stat {}", path.display()))?;
            if latest.as_ref().is_none_or(|(best, _)| modified > *best) {
                latest = Some((modified, path));
            }
        }
        Ok(latest.map(|(_, path)| path))
    }

    /// Resolve a user-supplied PRD reference.
    ///
    /// Accepts a path (absolute or relative to the working directory) or a
    /// bare file name inside `.prd/prds/`.
    pub fn resolve_prd(&self, requested: &Path) -> Result<PathBuf> {
        if requested.is_file() {
            return Ok(requested.to_path_buf());
        }
        let in_prds = self.prds_dir.join(requested);
        if in_prds.is_file() {
            return Ok(in_prds);
        }
        Err(anyhow!("PRD file not found: {}", requested.display()))
    }
}

/// Search `start` and its ancestors for a directory containing `.prd/`.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let found = start
        .ancestors()
        .find(|dir| dir.join(PRD_DIR_NAME).is_dir())
        .map(Path::to_path_buf);
    debug!(start = %start.display(), found = ?found, "project root lookup");
    found
}

/// Create the `.prd/` layout in `root`, writing a default config if missing.
pub fn init_project(root: &Path) -> Result<PrdPaths> {
    let paths = PrdPaths::new(root);
    for dir in [&paths.specs_dir, &paths.prds_dir, &paths.logs_dir] {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    if !paths.config_path.exists() {
        write_config(&paths.config_path, &LoopConfig::default())?;
    }
    Ok(paths)
}
