//! In-memory store and vector index.
//!
//! [`MemoryStore`] implements [`NodeStore`] and [`EdgeStore`] over plain
//! collections behind an `RwLock`; [`MemoryVectorIndex`] does brute-force
//! cosine search over a `HashMap`. Both are used directly in unit tests,
//! and the vector index also serves as the accelerated in-process index
//! the engine hydrates from SQLite at startup.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::models::{ContextNode, Edge};
use crate::store::{EdgeStore, NodeStore, VectorHit, VectorIndex};

#[derive(Default)]
struct MemoryInner {
    nodes: HashMap<String, ContextNode>,
    edges: Vec<Edge>,
}

/// Node and edge storage backed by in-process collections.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn insert(&self, node: &ContextNode) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.nodes.insert(node.id.clone(), node.clone());
        Ok(())
    }

    async fn get(&self, id: &str, now: i64) -> Result<Option<ContextNode>> {
        let mut inner = self.inner.write().unwrap();
        Ok(inner.nodes.get_mut(id).map(|node| {
            node.accessed_at = now;
            node.clone()
        }))
    }

    async fn get_many(&self, ids: &[String], now: i64) -> Result<Vec<ContextNode>> {
        let mut inner = self.inner.write().unwrap();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = inner.nodes.get_mut(id) {
                node.accessed_at = now;
                out.push(node.clone());
            }
        }
        Ok(out)
    }

    async fn all(&self) -> Result<Vec<ContextNode>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.nodes.values().cloned().collect())
    }

    async fn by_level(&self, level: i64) -> Result<Vec<ContextNode>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .nodes
            .values()
            .filter(|n| n.level == level)
            .cloned()
            .collect())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ContextNode>> {
        let inner = self.inner.read().unwrap();
        let mut nodes: Vec<ContextNode> = inner.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| b.accessed_at.cmp(&a.accessed_at));
        nodes.truncate(limit);
        Ok(nodes)
    }

    async fn by_content_hash(&self, hash: &str) -> Result<Option<ContextNode>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .nodes
            .values()
            .find(|n| n.content_hash == hash)
            .cloned())
    }

    async fn update(&self, node: &ContextNode) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if inner.nodes.contains_key(&node.id) {
            inner.nodes.insert(node.id.clone(), node.clone());
        }
        Ok(())
    }

    async fn set_level(&self, id: &str, level: i64, now: i64) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if let Some(node) = inner.nodes.get_mut(id) {
            node.level = level;
            node.updated_at = now;
        }
        Ok(())
    }

    async fn set_relevance(&self, id: &str, relevance: f64, now: i64) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if let Some(node) = inner.nodes.get_mut(id) {
            node.relevance = relevance;
            node.updated_at = now;
        }
        Ok(())
    }

    async fn set_summary(&self, id: &str, summary: &str, now: i64) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if let Some(node) = inner.nodes.get_mut(id) {
            node.summary = Some(summary.to_string());
            node.updated_at = now;
        }
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let inner = self.inner.read().unwrap();
        Ok(inner.nodes.len() as i64)
    }

    async fn count_by_level(&self) -> Result<Vec<(i64, i64)>> {
        let inner = self.inner.read().unwrap();
        let mut counts: HashMap<i64, i64> = HashMap::new();
        for node in inner.nodes.values() {
            *counts.entry(node.level).or_insert(0) += 1;
        }
        let mut out: Vec<(i64, i64)> = counts.into_iter().collect();
        out.sort_by_key(|(level, _)| *level);
        Ok(out)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.nodes.remove(id);
        inner
            .edges
            .retain(|e| e.source_id != id && e.target_id != id);
        Ok(())
    }

    async fn timestamp_range(&self) -> Result<Option<(i64, i64)>> {
        let inner = self.inner.read().unwrap();
        let min = inner.nodes.values().map(|n| n.created_at).min();
        let max = inner.nodes.values().map(|n| n.created_at).max();
        Ok(min.zip(max))
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.nodes.clear();
        inner.edges.clear();
        Ok(())
    }
}

#[async_trait]
impl EdgeStore for MemoryStore {
    async fn link(&self, edge: &Edge) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        let exists = inner.edges.iter().any(|e| {
            e.source_id == edge.source_id
                && e.target_id == edge.target_id
                && e.relation == edge.relation
        });
        if exists {
            return Ok(false);
        }
        inner.edges.push(edge.clone());
        Ok(true)
    }

    async fn by_source(&self, node_id: &str) -> Result<Vec<Edge>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .edges
            .iter()
            .filter(|e| e.source_id == node_id)
            .cloned()
            .collect())
    }

    async fn by_target(&self, node_id: &str) -> Result<Vec<Edge>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .edges
            .iter()
            .filter(|e| e.target_id == node_id)
            .cloned()
            .collect())
    }

    async fn connected(&self, node_id: &str) -> Result<Vec<Edge>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .edges
            .iter()
            .filter(|e| e.source_id == node_id || e.target_id == node_id)
            .cloned()
            .collect())
    }

    async fn neighbor_ids(&self, node_id: &str) -> Result<HashSet<String>> {
        let inner = self.inner.read().unwrap();
        let mut ids = HashSet::new();
        for e in &inner.edges {
            if e.source_id == node_id {
                ids.insert(e.target_id.clone());
            } else if e.target_id == node_id {
                ids.insert(e.source_id.clone());
            }
        }
        Ok(ids)
    }

    async fn count(&self) -> Result<i64> {
        let inner = self.inner.read().unwrap();
        Ok(inner.edges.len() as i64)
    }

    async fn unlink(&self, edge_id: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.edges.retain(|e| e.id != edge_id);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<Edge>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.edges.clone())
    }
}

/// Brute-force vector index over an in-process map.
#[derive(Default)]
pub struct MemoryVectorIndex {
    vectors: RwLock<HashMap<String, Vec<f32>>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vectors.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn insert(&self, id: &str, vector: &[f32]) -> Result<()> {
        let mut vectors = self.vectors.write().unwrap();
        vectors.insert(id.to_string(), vector.to_vec());
        Ok(())
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        let vectors = self.vectors.read().unwrap();
        let mut hits: Vec<VectorHit> = vectors
            .iter()
            .map(|(id, v)| VectorHit {
                id: id.clone(),
                distance: cosine_distance(vector, v),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
        hits.truncate(k);
        Ok(hits)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut vectors = self.vectors.write().unwrap();
        vectors.remove(id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut vectors = self.vectors.write().unwrap();
        vectors.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContextNode;

    fn node(content: &str, now: i64) -> ContextNode {
        ContextNode::new(content, "note", serde_json::json!({}), now)
    }

    #[tokio::test]
    async fn test_insert_get_touches_access() {
        let store = MemoryStore::new();
        let n = node("alpha", 100);
        store.insert(&n).await.unwrap();

        let got = store.get(&n.id, 500).await.unwrap().unwrap();
        assert_eq!(got.content, "alpha");
        assert_eq!(got.accessed_at, 500);
    }

    #[tokio::test]
    async fn test_batch_scans_do_not_touch() {
        let store = MemoryStore::new();
        let n = node("alpha", 100);
        store.insert(&n).await.unwrap();

        let all = NodeStore::all(&store).await.unwrap();
        assert_eq!(all[0].accessed_at, 100);
        let by_level = store.by_level(1).await.unwrap();
        assert_eq!(by_level[0].accessed_at, 100);
    }

    #[tokio::test]
    async fn test_recent_orders_by_access() {
        let store = MemoryStore::new();
        let a = node("a", 100);
        let b = node("b", 200);
        let c = node("c", 300);
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();
        store.insert(&c).await.unwrap();

        let recent = store.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, c.id);
        assert_eq!(recent[1].id, b.id);
    }

    #[tokio::test]
    async fn test_content_hash_lookup() {
        let store = MemoryStore::new();
        let n = node("dedup me", 100);
        store.insert(&n).await.unwrap();

        let found = store.by_content_hash(&n.content_hash).await.unwrap();
        assert_eq!(found.unwrap().id, n.id);
        assert!(store.by_content_hash("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_cascades_edges() {
        let store = MemoryStore::new();
        let a = node("a", 100);
        let b = node("b", 100);
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();
        let e = Edge::new(&a.id, &b.id, "related", 1.0, 100);
        assert!(store.link(&e).await.unwrap());

        store.delete(&a.id).await.unwrap();
        assert_eq!(EdgeStore::count(&store).await.unwrap(), 0);
        assert!(store.get(&a.id, 200).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_link_is_noop() {
        let store = MemoryStore::new();
        let a = node("a", 100);
        let b = node("b", 100);
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();

        let e1 = Edge::new(&a.id, &b.id, "related", 1.0, 100);
        let e2 = Edge::new(&a.id, &b.id, "related", 0.5, 200);
        assert!(store.link(&e1).await.unwrap());
        assert!(!store.link(&e2).await.unwrap());
        assert_eq!(EdgeStore::count(&store).await.unwrap(), 1);

        // Same pair under a different relation is a distinct edge.
        let e3 = Edge::new(&a.id, &b.id, "references", 1.0, 300);
        assert!(store.link(&e3).await.unwrap());
    }

    #[tokio::test]
    async fn test_neighbor_ids_both_directions() {
        let store = MemoryStore::new();
        let a = node("a", 100);
        let b = node("b", 100);
        let c = node("c", 100);
        for n in [&a, &b, &c] {
            store.insert(n).await.unwrap();
        }
        store
            .link(&Edge::new(&a.id, &b.id, "related", 1.0, 100))
            .await
            .unwrap();
        store
            .link(&Edge::new(&c.id, &a.id, "references", 1.0, 100))
            .await
            .unwrap();

        let neighbors = store.neighbor_ids(&a.id).await.unwrap();
        assert_eq!(neighbors.len(), 2);
        assert!(neighbors.contains(&b.id));
        assert!(neighbors.contains(&c.id));
    }

    #[tokio::test]
    async fn test_count_by_level() {
        let store = MemoryStore::new();
        let mut a = node("a", 100);
        a.level = 2;
        let b = node("b", 100);
        let c = node("c", 100);
        for n in [&a, &b, &c] {
            store.insert(n).await.unwrap();
        }
        let counts = store.count_by_level().await.unwrap();
        assert_eq!(counts, vec![(1, 2), (2, 1)]);
    }

    #[tokio::test]
    async fn test_vector_search_orders_by_distance() {
        let index = MemoryVectorIndex::new();
        index.insert("x", &[1.0, 0.0]).await.unwrap();
        index.insert("y", &[0.7, 0.7]).await.unwrap();
        index.insert("z", &[0.0, 1.0]).await.unwrap();

        let hits = index.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "x");
        assert_eq!(hits[1].id, "y");
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn test_vector_remove_and_clear() {
        let index = MemoryVectorIndex::new();
        index.insert("x", &[1.0]).await.unwrap();
        index.insert("y", &[0.5]).await.unwrap();
        index.remove("x").await.unwrap();
        assert_eq!(index.len(), 1);
        index.clear().await.unwrap();
        assert!(index.is_empty());
    }
}
