//! I/O helpers for loop commands.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub mod agent;
pub mod config;
pub mod loop_state;
pub mod paths;
pub mod prd_store;
pub mod process;
pub mod prompt;
pub mod rate_limiter;
pub mod session_log;

/// Replace `path` with `contents` via a sibling temp file and rename, so a
/// crash never leaves a half-written file behind.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
