//! PRD load/save helpers with schema + invariant validation.
//!
//! The agent edits the same file the loop reads, so every load goes back to
//! disk. There is no cached copy to invalidate.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::core::invariants::validate_invariants;
use crate::prd::Prd;

const PRD_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/prd.schema.json"
));

/// Load and validate a PRD from disk (schema + invariants).
pub fn load_prd(path: &Path) -> Result<Prd> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read PRD {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse PRD {}", path.display()))?;
    validate_schema(&value).with_context(|| format!("validate PRD {}", path.display()))?;
    let prd: Prd = serde_json::from_value(value)
        .with_context(|| format!("deserialize PRD {}", path.display()))?;
    validate_prd_invariants(&prd).with_context(|| format!("validate PRD {}", path.display()))?;
    debug!(
        path = %path.display(),
        stories = prd.user_stories.len(),
        "PRD loaded"
    );
    Ok(prd)
}

/// Atomically write a PRD as pretty JSON with a trailing newline.
pub fn write_prd(path: &Path, prd: &Prd) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(prd).context("serialize PRD")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

fn validate_schema(prd: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(PRD_SCHEMA).context("parse bundled PRD schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(prd) {
        let messages = compiled
            .iter_errors(prd)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "PRD schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

fn validate_prd_invariants(prd: &Prd) -> Result<()> {
    let errors = validate_invariants(prd);
    if errors.is_empty() {
        return Ok(());
    }
    Err(anyhow!("PRD invariants failed: {}", errors.join("; ")))
}
