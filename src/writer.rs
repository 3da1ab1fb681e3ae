//! Writes an artefact bundle to disk.
//!
//! Layout: `<base_dir>/<run_id>/` containing every artefact plus
//! `index.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::domain::ArtefactBundle;

/// Machine-readable index file name
pub const INDEX_JSON: &str = "index.json";

/// Write the bundle and return the run directory
pub async fn write_bundle(bundle: &ArtefactBundle, base_dir: &Path) -> Result<PathBuf> {
    let run_dir = base_dir.join(&bundle.index.run_id);
    tokio::fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("Failed to create output directory: {}", run_dir.display()))?;

    for artefact in &bundle.artefacts {
        let path = run_dir.join(&artefact.name);
        tokio::fs::write(&path, artefact.content.as_bytes())
            .await
            .with_context(|| format!("Failed to write artefact: {}", path.display()))?;
    }

    let index_json = bundle
        .index_json()
        .context("Failed to serialize run index")?;
    let index_path = run_dir.join(INDEX_JSON);
    tokio::fs::write(&index_path, index_json)
        .await
        .with_context(|| format!("Failed to write index: {}", index_path.display()))?;

    info!(dir = %run_dir.display(), artefacts = bundle.artefacts.len(), "Bundle written");
    Ok(run_dir)
}
