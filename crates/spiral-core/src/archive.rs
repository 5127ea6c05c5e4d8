//! Portable archive bundles.
//!
//! An archive is a self-describing JSON document: a manifest with counts
//! and a SHA-256 payload checksum, plus the full node and edge lists.
//! Validation happens before any import touches the store, so a corrupt
//! or truncated bundle never mutates state.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{ContextNode, Edge};

/// Bumped on any incompatible change to the bundle layout.
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub format_version: u32,
    pub node_count: usize,
    pub edge_count: usize,
    /// SHA-256 hex digest over the serialized node list followed by the
    /// serialized edge list.
    pub checksum: String,
    /// Unix seconds at export time.
    pub created_at: i64,
}

/// A complete exported store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveBundle {
    pub manifest: ArchiveManifest,
    pub nodes: Vec<ContextNode>,
    pub edges: Vec<Edge>,
}

/// Checksum over the payload as it will be serialized.
pub fn payload_checksum(nodes: &[ContextNode], edges: &[Edge]) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(nodes)?);
    hasher.update(serde_json::to_vec(edges)?);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Build a bundle whose manifest matches its payload.
pub fn build_bundle(nodes: Vec<ContextNode>, edges: Vec<Edge>, now: i64) -> Result<ArchiveBundle> {
    let checksum = payload_checksum(&nodes, &edges)?;
    Ok(ArchiveBundle {
        manifest: ArchiveManifest {
            format_version: ARCHIVE_FORMAT_VERSION,
            node_count: nodes.len(),
            edge_count: edges.len(),
            checksum,
            created_at: now,
        },
        nodes,
        edges,
    })
}

impl ArchiveBundle {
    /// Reject unknown versions, count mismatches, and checksum failures.
    pub fn validate(&self) -> Result<()> {
        if self.manifest.format_version != ARCHIVE_FORMAT_VERSION {
            bail!(
                "unsupported archive format version {} (expected {})",
                self.manifest.format_version,
                ARCHIVE_FORMAT_VERSION
            );
        }
        if self.manifest.node_count != self.nodes.len() {
            bail!(
                "archive manifest claims {} nodes but payload has {}",
                self.manifest.node_count,
                self.nodes.len()
            );
        }
        if self.manifest.edge_count != self.edges.len() {
            bail!(
                "archive manifest claims {} edges but payload has {}",
                self.manifest.edge_count,
                self.edges.len()
            );
        }
        let actual = payload_checksum(&self.nodes, &self.edges)?;
        if actual != self.manifest.checksum {
            bail!("archive checksum mismatch: payload is corrupt");
        }
        Ok(())
    }
}
