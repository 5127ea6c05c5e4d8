//! The engine facade.
//!
//! [`SpiralEngine`] owns the pool, stores, vector index, embedding
//! service, and evolution service, and exposes the operations
//! collaborators call: store, query, status, evolve, decay, compact,
//! relate, import/export, save_state, clear_all, close.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sqlx::SqlitePool;

use spiral_core::archive::{build_bundle, ArchiveBundle};
use spiral_core::assembly::{assemble, AssemblyParams, AssemblyRequest, ContextPayload};
use spiral_core::models::{content_hash, ContextNode, Edge};
use spiral_core::relevance::RelevanceParams;
use spiral_core::store::memory::MemoryVectorIndex;
use spiral_core::store::{EdgeStore, NodeStore, VectorIndex};

use crate::config::Config;
use crate::db;
use crate::embedding::EmbeddingService;
use crate::evolution::{CompactReport, DecayReport, Evolution, EvolveReport};
use crate::migrate;
use crate::sqlite_store::{SqliteStore, SqliteVectorIndex};

/// Auto-detected relations require at least this similarity
/// (cosine distance ≤ 0.25) to the freshly stored node.
pub const AUTO_RELATE_MAX_DISTANCE: f64 = 0.25;

/// Neighbors considered for auto-relation on store.
pub const AUTO_RELATE_K: usize = 5;

/// Conversation turns kept by `save_state`.
pub const SAVE_STATE_MAX_MESSAGES: usize = 10;

/// In-memory index write-through-backed by the durable SQLite table.
///
/// Searches hit the memory copy; every mutation lands in both, so a
/// restart can rehydrate. When hydration fails the engine skips this
/// wrapper and searches the SQLite table directly.
struct CachedVectorIndex {
    memory: MemoryVectorIndex,
    durable: Arc<SqliteVectorIndex>,
}

#[async_trait::async_trait]
impl VectorIndex for CachedVectorIndex {
    async fn insert(&self, id: &str, vector: &[f32]) -> Result<()> {
        self.durable.insert(id, vector).await?;
        self.memory.insert(id, vector).await
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<spiral_core::store::VectorHit>> {
        self.memory.search(vector, k).await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.durable.remove(id).await?;
        self.memory.remove(id).await
    }

    async fn clear(&self) -> Result<()> {
        self.durable.clear().await?;
        self.memory.clear().await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreOutcome {
    pub id: String,
    /// `false` when content-hash dedup returned an existing node.
    pub created: bool,
    pub embedded: bool,
    pub auto_relations: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub node_count: i64,
    pub edge_count: i64,
    pub nodes_by_level: Vec<(i64, i64)>,
    pub embedding_state: String,
    pub db_size_bytes: u64,
    pub oldest_created_at: Option<i64>,
    pub newest_created_at: Option<i64>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ImportReport {
    pub imported_nodes: usize,
    pub skipped_nodes: usize,
    pub imported_edges: usize,
    pub skipped_edges: usize,
}

pub struct SpiralEngine {
    config: Config,
    pool: SqlitePool,
    store: Arc<SqliteStore>,
    index: Arc<dyn VectorIndex>,
    embedder: EmbeddingService,
    relevance: RelevanceParams,
    evolution: Evolution,
}

impl SpiralEngine {
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config.db.path).await?;
        migrate::run_migrations(&pool).await?;

        let store = Arc::new(SqliteStore::new(pool.clone()));
        let model = config
            .embedding
            .model
            .clone()
            .unwrap_or_else(|| config.embedding.provider.clone());
        let durable = Arc::new(SqliteVectorIndex::new(pool.clone(), model));

        let index: Arc<dyn VectorIndex> = match durable.load_all().await {
            Ok(vectors) => {
                let memory = MemoryVectorIndex::new();
                for (id, vec) in &vectors {
                    memory.insert(id, vec).await?;
                }
                tracing::debug!(count = vectors.len(), "hydrated in-memory vector index");
                Arc::new(CachedVectorIndex {
                    memory,
                    durable: durable.clone(),
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "vector index hydration failed, using table scan");
                durable.clone()
            }
        };

        let relevance = config.relevance.to_params()?;
        let evolution = Evolution::new(
            store.clone() as Arc<dyn NodeStore>,
            index.clone(),
            relevance.thresholds,
            config.evolution.decay_rate,
        );
        let embedder = EmbeddingService::new(config.embedding.clone());

        Ok(Self {
            config,
            pool,
            store,
            index,
            embedder,
            relevance,
            evolution,
        })
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Store a new context node.
    ///
    /// Dedups on content hash, validates explicit relation targets before
    /// anything is written, embeds and indexes the content when a vector
    /// is available, and best-effort auto-relates the node to its nearest
    /// existing neighbors.
    pub async fn store(
        &self,
        content: &str,
        kind: &str,
        metadata: serde_json::Value,
        relations: &[(String, String)],
    ) -> Result<StoreOutcome> {
        let now = Self::now();

        if let Some(existing) = self.store.by_content_hash(&content_hash(content)).await? {
            // Refresh recency on the duplicate.
            self.store.get(&existing.id, now).await?;
            return Ok(StoreOutcome {
                id: existing.id,
                created: false,
                embedded: false,
                auto_relations: 0,
            });
        }

        // Validate targets before the node exists so a bad relation
        // leaves no partial state behind.
        for (target, _) in relations {
            if self.store.get(target, now).await?.is_none() {
                bail!("relation target not found: {target}");
            }
        }

        let node = ContextNode::new(content, kind, metadata, now);
        self.store.insert(&node).await?;

        for (target, relation) in relations {
            self.store
                .link(&Edge::new(&node.id, target, relation, 1.0, now))
                .await?;
        }

        let mut embedded = false;
        let mut auto_relations = 0;
        if let Some(vector) = self.embedder.embed(content).await {
            // Search before indexing so the node does not match itself.
            let neighbors = self.index.search(&vector, AUTO_RELATE_K).await?;
            self.index.insert(&node.id, &vector).await?;
            embedded = true;

            for hit in neighbors {
                if hit.distance > AUTO_RELATE_MAX_DISTANCE {
                    break;
                }
                let edge = Edge::new(&node.id, &hit.id, "related", 1.0 - hit.distance, now);
                // Best effort: a duplicate pair is a silent no-op and any
                // other failure loses an optimization, not data.
                match self.store.link(&edge).await {
                    Ok(true) => auto_relations += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "auto-relation skipped");
                    }
                }
            }
        }

        tracing::debug!(node_id = %node.id, kind, embedded, auto_relations, "stored node");
        Ok(StoreOutcome {
            id: node.id,
            created: true,
            embedded,
            auto_relations,
        })
    }

    /// Assemble a tiered context payload for a query.
    pub async fn query(
        &self,
        text: &str,
        max_tokens: Option<i64>,
        levels: Option<Vec<i64>>,
    ) -> Result<ContextPayload> {
        let req = AssemblyRequest {
            query: text.to_string(),
            query_vec: self.embedder.embed(text).await,
            max_tokens: max_tokens.unwrap_or(self.config.assembly.default_max_tokens),
            levels,
        };
        let params = AssemblyParams {
            candidate_k: self.config.assembly.candidate_k,
            budget_split: self.config.assembly.budget_split,
            ..AssemblyParams::default()
        };
        assemble(
            self.store.as_ref(),
            self.store.as_ref(),
            self.index.as_ref(),
            &req,
            &params,
            &self.relevance,
            Self::now(),
        )
        .await
    }

    pub async fn status(&self) -> Result<Status> {
        let range = self.store.timestamp_range().await?;
        Ok(Status {
            node_count: NodeStore::count(self.store.as_ref()).await?,
            edge_count: EdgeStore::count(self.store.as_ref()).await?,
            nodes_by_level: self.store.count_by_level().await?,
            embedding_state: self.embedder.state().to_string(),
            db_size_bytes: db::db_file_size(&self.config.db.path),
            oldest_created_at: range.map(|(lo, _)| lo),
            newest_created_at: range.map(|(_, hi)| hi),
        })
    }

    pub async fn evolve(&self) -> Result<EvolveReport> {
        self.evolution.evolve(Self::now()).await
    }

    pub async fn decay(&self) -> Result<DecayReport> {
        self.evolution.decay(Self::now()).await
    }

    pub async fn compact(&self, aggressive: bool) -> Result<CompactReport> {
        self.evolution.compact(Self::now(), aggressive).await
    }

    /// Manual edge creation. Both endpoints must exist.
    pub async fn relate(
        &self,
        source: &str,
        target: &str,
        relation: &str,
        weight: f64,
    ) -> Result<bool> {
        let now = Self::now();
        if self.store.get(source, now).await?.is_none() {
            bail!("relation source not found: {source}");
        }
        if self.store.get(target, now).await?.is_none() {
            bail!("relation target not found: {target}");
        }
        self.store
            .link(&Edge::new(source, target, relation, weight, now))
            .await
    }

    /// Bulk-load a single externally produced node, keeping its tier and
    /// score. Content-hash duplicates are skipped.
    pub async fn import_node(&self, node: ContextNode) -> Result<bool> {
        if self.store.by_content_hash(&node.content_hash).await?.is_some() {
            return Ok(false);
        }
        self.store.insert(&node).await?;
        if let Some(vector) = self.embedder.embed(&node.content).await {
            self.index.insert(&node.id, &vector).await?;
        }
        Ok(true)
    }

    /// Archive the trailing slice of a conversation as tier-1 nodes
    /// tagged by role, then run an evolve pass. Returns the number of
    /// nodes stored.
    pub async fn save_state(&self, messages: &[(String, String)]) -> Result<usize> {
        let start = messages.len().saturating_sub(SAVE_STATE_MAX_MESSAGES);
        let mut stored = 0;
        for (role, content) in &messages[start..] {
            let outcome = self
                .store(content, "conversation", serde_json::json!({ "role": role }), &[])
                .await?;
            if outcome.created {
                stored += 1;
            }
        }
        self.evolve().await?;
        Ok(stored)
    }

    /// Remove every node, edge, and vector.
    pub async fn clear_all(&self) -> Result<()> {
        NodeStore::clear(self.store.as_ref()).await?;
        self.index.clear().await?;
        Ok(())
    }

    /// Graph snapshot for external visualization tools.
    pub async fn export_for_visualization(&self) -> Result<serde_json::Value> {
        let nodes = NodeStore::all(self.store.as_ref()).await?;
        let edges = EdgeStore::all(self.store.as_ref()).await?;
        Ok(serde_json::json!({
            "nodes": nodes.iter().map(|n| serde_json::json!({
                "id": n.id,
                "kind": n.kind,
                "level": n.level,
                "relevance": n.relevance,
                "label": n.summary.clone().unwrap_or_else(|| {
                    spiral_core::summarize::cap_chars(&n.content, 80)
                }),
            })).collect::<Vec<_>>(),
            "edges": edges.iter().map(|e| serde_json::json!({
                "source": e.source_id,
                "target": e.target_id,
                "relation": e.relation,
                "weight": e.weight,
            })).collect::<Vec<_>>(),
        }))
    }

    /// Export the full store as a validated archive bundle.
    pub async fn export_archive(&self) -> Result<ArchiveBundle> {
        let nodes = NodeStore::all(self.store.as_ref()).await?;
        let edges = EdgeStore::all(self.store.as_ref()).await?;
        build_bundle(nodes, edges, Self::now())
    }

    /// Import an archive bundle. Validation happens before any write;
    /// `replace` wipes the store first, merge mode dedups nodes by
    /// content hash and remaps their edges onto the surviving ids.
    pub async fn import_archive(&self, bundle: &ArchiveBundle, replace: bool) -> Result<ImportReport> {
        bundle.validate().context("archive rejected")?;

        if replace {
            self.clear_all().await?;
        }

        let mut report = ImportReport::default();
        // incoming id -> id actually present in the store
        let mut id_map: HashMap<String, String> = HashMap::new();

        for node in &bundle.nodes {
            if let Some(existing) = self.store.by_content_hash(&node.content_hash).await? {
                id_map.insert(node.id.clone(), existing.id);
                report.skipped_nodes += 1;
                continue;
            }
            self.store.insert(node).await?;
            if let Some(vector) = self.embedder.embed(&node.content).await {
                self.index.insert(&node.id, &vector).await?;
            }
            id_map.insert(node.id.clone(), node.id.clone());
            report.imported_nodes += 1;
        }

        for edge in &bundle.edges {
            let (Some(source), Some(target)) =
                (id_map.get(&edge.source_id), id_map.get(&edge.target_id))
            else {
                report.skipped_edges += 1;
                continue;
            };
            let mut mapped = edge.clone();
            mapped.source_id = source.clone();
            mapped.target_id = target.clone();
            if self.store.link(&mapped).await? {
                report.imported_edges += 1;
            } else {
                report.skipped_edges += 1;
            }
        }

        tracing::info!(?report, replace, "archive import complete");
        Ok(report)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
