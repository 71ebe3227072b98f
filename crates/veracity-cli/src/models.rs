//! `veracity verify-models`: check the landmark helper's model files against `SHA256SUMS`.

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Verify every model listed in the directory's manifest and print the result.
pub fn run(model_dir: Option<PathBuf>) -> Result<()> {
    let dir = model_dir.unwrap_or_else(veracity_models::default_model_dir);
    println!("Model directory: {}", dir.display());

    let entries = veracity_models::verify_models_dir(&dir)
        .with_context(|| format!("model verification failed in {}", dir.display()))?;

    for entry in &entries {
        println!("  {}  ok", entry.name);
    }
    println!();
    println!("{} model(s) verified.", entries.len());
    Ok(())
}
