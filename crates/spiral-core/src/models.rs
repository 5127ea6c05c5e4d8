//! Core data models used throughout Spiral.
//!
//! These types represent the context nodes and typed edges that flow through
//! the storage, evolution, and assembly pipeline. Node kinds and edge
//! relations are open string tags — callers may introduce new ones without
//! a schema change.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Number of memory tiers. Tier 1 is Focus, tier 5 is Deep Archive.
pub const TIER_COUNT: usize = 5;

/// Inclusive range of valid tier numbers.
pub const TIER_MIN: i64 = 1;
/// See [`TIER_MIN`].
pub const TIER_MAX: i64 = 5;

/// A stored context artifact.
///
/// `level` and `relevance` are consistent with each other only as of the
/// last evolution pass; between passes they may be transiently stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextNode {
    /// Node UUID.
    pub id: String,
    /// Open type tag: `code`, `error`, `decision`, `architecture`,
    /// `pattern`, `conversation`, ...
    pub kind: String,
    /// Full original text.
    pub content: String,
    /// SHA-256 hex digest of `content`; the dedup key.
    pub content_hash: String,
    /// Shorter derived text, populated on first demotion into tier 3+.
    pub summary: Option<String>,
    /// Tier 1..=5.
    pub level: i64,
    /// Composite relevance in `[0.0, 1.0]`.
    pub relevance: f64,
    /// Estimated token count of `content`.
    pub token_count: i64,
    /// Open caller metadata (JSON object).
    pub metadata: serde_json::Value,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds; bumped by any field mutation.
    pub updated_at: i64,
    /// Unix seconds; bumped by any read.
    pub accessed_at: i64,
}

impl ContextNode {
    /// Create a fresh tier-1 node at full relevance.
    pub fn new(content: &str, kind: &str, metadata: serde_json::Value, now: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_lowercase(),
            content: content.to_string(),
            content_hash: content_hash(content),
            summary: None,
            level: TIER_MIN,
            relevance: 1.0,
            token_count: estimate_tokens(content),
            metadata,
            created_at: now,
            updated_at: now,
            accessed_at: now,
        }
    }

    /// Hours elapsed since the node was last read, never negative.
    pub fn hours_since_access(&self, now: i64) -> f64 {
        ((now - self.accessed_at).max(0) as f64) / 3600.0
    }
}

/// A typed, weighted edge between two nodes.
///
/// `(source_id, target_id, relation)` is unique; a duplicate creation
/// attempt is a silent no-op. Deleting either endpoint deletes the edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Edge UUID.
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    /// Open relation tag: `related`, `references`, `caused_by`, ...
    pub relation: String,
    pub weight: f64,
    /// Open caller metadata (JSON object).
    pub metadata: serde_json::Value,
    /// Unix seconds.
    pub created_at: i64,
}

impl Edge {
    pub fn new(source_id: &str, target_id: &str, relation: &str, weight: f64, now: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            relation: relation.to_lowercase(),
            weight,
            metadata: serde_json::json!({}),
            created_at: now,
        }
    }
}

/// SHA-256 hex digest of a content string.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Estimate the token count of a text.
///
/// Uses the common ~4 characters per token heuristic; good enough for
/// budget accounting, which never needs exact tokenizer output.
pub fn estimate_tokens(text: &str) -> i64 {
    (text.chars().count() as i64 + 3) / 4
}
