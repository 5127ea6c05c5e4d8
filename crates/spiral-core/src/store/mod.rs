//! Storage abstraction for Spiral.
//!
//! Three traits cover the durable state: [`NodeStore`] for context nodes,
//! [`EdgeStore`] for the typed adjacency between them, and [`VectorIndex`]
//! for nearest-neighbor search over node embeddings. The in-memory
//! implementations in [`memory`] back unit tests and double as the
//! accelerated in-process vector index; the application crate provides the
//! SQLite-backed implementations.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ContextNode, Edge};

/// A nearest-neighbor hit from a [`VectorIndex`] search.
///
/// `distance` is cosine distance (`1 - cos`), so lower is closer; results
/// are returned in ascending distance order.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub distance: f64,
}

/// Durable table of context nodes.
///
/// Single-read operations (`get`, `get_many`) touch `accessed_at`; batch
/// scans (`all`, `by_level`, `recent`) do not — evolution and decay read
/// through them without resetting recency.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](NodeStore::insert) | Create a node |
/// | [`get`](NodeStore::get) / [`get_many`](NodeStore::get_many) | Read + touch `accessed_at` |
/// | [`all`](NodeStore::all) / [`by_level`](NodeStore::by_level) / [`recent`](NodeStore::recent) | Batch scans, no touch |
/// | [`by_content_hash`](NodeStore::by_content_hash) | Dedup lookup, no touch |
/// | [`set_level`](NodeStore::set_level) / [`set_relevance`](NodeStore::set_relevance) / [`set_summary`](NodeStore::set_summary) | Single-field atomic mutations |
/// | [`delete`](NodeStore::delete) | Delete a node and cascade its edges |
#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn insert(&self, node: &ContextNode) -> Result<()>;

    /// Fetch a node by id, bumping `accessed_at` to `now`.
    async fn get(&self, id: &str, now: i64) -> Result<Option<ContextNode>>;

    /// Batch fetch, bumping `accessed_at` on every hit. Missing ids are
    /// silently absent from the result.
    async fn get_many(&self, ids: &[String], now: i64) -> Result<Vec<ContextNode>>;

    /// Every node. Scan — does not touch `accessed_at`.
    async fn all(&self) -> Result<Vec<ContextNode>>;

    /// Nodes at one tier. Scan — does not touch `accessed_at`.
    async fn by_level(&self, level: i64) -> Result<Vec<ContextNode>>;

    /// The `limit` most-recently-accessed nodes, newest first. Scan —
    /// does not touch `accessed_at`.
    async fn recent(&self, limit: usize) -> Result<Vec<ContextNode>>;

    /// Dedup lookup by content hash. Does not touch `accessed_at`.
    async fn by_content_hash(&self, hash: &str) -> Result<Option<ContextNode>>;

    /// Full-row update by id. Unknown ids are a no-op.
    async fn update(&self, node: &ContextNode) -> Result<()>;

    async fn set_level(&self, id: &str, level: i64, now: i64) -> Result<()>;
    async fn set_relevance(&self, id: &str, relevance: f64, now: i64) -> Result<()>;
    async fn set_summary(&self, id: &str, summary: &str, now: i64) -> Result<()>;

    async fn count(&self) -> Result<i64>;

    /// `(level, count)` pairs for non-empty tiers.
    async fn count_by_level(&self) -> Result<Vec<(i64, i64)>>;

    /// Delete a node. Implementations must cascade-delete every edge
    /// touching it; the vector entry is the caller's responsibility.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Oldest and newest `created_at`, or `None` when the store is empty.
    async fn timestamp_range(&self) -> Result<Option<(i64, i64)>>;

    /// Remove every node (and, by cascade, every edge).
    async fn clear(&self) -> Result<()>;
}

/// Durable typed, weighted adjacency between nodes.
#[async_trait]
pub trait EdgeStore: Send + Sync {
    /// Create an edge. Returns `false` (a silent no-op, never an error)
    /// when the `(source, target, relation)` triple already exists.
    async fn link(&self, edge: &Edge) -> Result<bool>;

    async fn by_source(&self, node_id: &str) -> Result<Vec<Edge>>;
    async fn by_target(&self, node_id: &str) -> Result<Vec<Edge>>;

    /// Edges touching the node in either direction.
    async fn connected(&self, node_id: &str) -> Result<Vec<Edge>>;

    /// The 1-hop neighbor id set (both directions, deduplicated).
    async fn neighbor_ids(&self, node_id: &str) -> Result<HashSet<String>>;

    async fn count(&self) -> Result<i64>;
    async fn unlink(&self, edge_id: &str) -> Result<()>;

    /// Every edge, for export.
    async fn all(&self) -> Result<Vec<Edge>>;
}

/// Nearest-neighbor search over node embeddings.
///
/// Two implementations share this contract: an accelerated in-process
/// index and a brute-force scan fallback. Callers observe no functional
/// difference, only performance.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn insert(&self, id: &str, vector: &[f32]) -> Result<()>;

    /// The `k` nearest entries by cosine distance, ascending.
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<VectorHit>>;

    async fn remove(&self, id: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}
