//! Reading and writing archive bundles on disk.
//!
//! Bundles are pretty-printed JSON. Reading validates the manifest and
//! checksum before handing the bundle to the caller, so a truncated or
//! edited file is rejected up front.

use std::path::Path;

use anyhow::{Context, Result};

use spiral_core::archive::ArchiveBundle;

pub fn write_archive(path: &Path, bundle: &ArchiveBundle) -> Result<()> {
    let json = serde_json::to_string_pretty(bundle)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write archive: {}", path.display()))?;
    Ok(())
}

pub fn read_archive(path: &Path) -> Result<ArchiveBundle> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read archive: {}", path.display()))?;
    let bundle: ArchiveBundle =
        serde_json::from_str(&content).with_context(|| "Failed to parse archive file")?;
    bundle.validate()?;
    Ok(bundle)
}
