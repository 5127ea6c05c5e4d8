//! SQLite-backed store and vector index.
//!
//! [`SqliteStore`] maps every [`NodeStore`] and [`EdgeStore`] operation
//! onto the `nodes` and `edges` tables. [`SqliteVectorIndex`] keeps
//! embeddings in the `node_vectors` table as little-endian f32 BLOBs and
//! searches them with a brute-force scan; the engine normally fronts it
//! with an in-memory index hydrated at startup and uses the scan only as
//! a fallback.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use spiral_core::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use spiral_core::models::{ContextNode, Edge};
use spiral_core::store::{EdgeStore, NodeStore, VectorHit, VectorIndex};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn node_from_row(row: &sqlx::sqlite::SqliteRow) -> ContextNode {
    let metadata_json: String = row.get("metadata_json");
    ContextNode {
        id: row.get("id"),
        kind: row.get("kind"),
        content: row.get("content"),
        content_hash: row.get("content_hash"),
        summary: row.get("summary"),
        level: row.get("level"),
        relevance: row.get("relevance"),
        token_count: row.get("token_count"),
        metadata: serde_json::from_str(&metadata_json).unwrap_or_else(|_| serde_json::json!({})),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        accessed_at: row.get("accessed_at"),
    }
}

fn edge_from_row(row: &sqlx::sqlite::SqliteRow) -> Edge {
    let metadata_json: String = row.get("metadata_json");
    Edge {
        id: row.get("id"),
        source_id: row.get("source_id"),
        target_id: row.get("target_id"),
        relation: row.get("relation"),
        weight: row.get("weight"),
        metadata: serde_json::from_str(&metadata_json).unwrap_or_else(|_| serde_json::json!({})),
        created_at: row.get("created_at"),
    }
}

const NODE_COLUMNS: &str = "id, kind, content, content_hash, summary, level, relevance, \
     token_count, metadata_json, created_at, updated_at, accessed_at";

#[async_trait]
impl NodeStore for SqliteStore {
    async fn insert(&self, node: &ContextNode) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nodes (id, kind, content, content_hash, summary, level, relevance,
                               token_count, metadata_json, created_at, updated_at, accessed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&node.id)
        .bind(&node.kind)
        .bind(&node.content)
        .bind(&node.content_hash)
        .bind(&node.summary)
        .bind(node.level)
        .bind(node.relevance)
        .bind(node.token_count)
        .bind(node.metadata.to_string())
        .bind(node.created_at)
        .bind(node.updated_at)
        .bind(node.accessed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str, now: i64) -> Result<Option<ContextNode>> {
        sqlx::query("UPDATE nodes SET accessed_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;

        let row = sqlx::query(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(node_from_row))
    }

    async fn get_many(&self, ids: &[String], now: i64) -> Result<Vec<ContextNode>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = self.get(id, now).await? {
                out.push(node);
            }
        }
        Ok(out)
    }

    async fn all(&self) -> Result<Vec<ContextNode>> {
        let rows = sqlx::query(&format!("SELECT {NODE_COLUMNS} FROM nodes"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(node_from_row).collect())
    }

    async fn by_level(&self, level: i64) -> Result<Vec<ContextNode>> {
        let rows = sqlx::query(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE level = ?"))
            .bind(level)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(node_from_row).collect())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ContextNode>> {
        let rows = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes ORDER BY accessed_at DESC LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(node_from_row).collect())
    }

    async fn by_content_hash(&self, hash: &str) -> Result<Option<ContextNode>> {
        let row = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE content_hash = ? LIMIT 1"
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(node_from_row))
    }

    async fn update(&self, node: &ContextNode) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE nodes SET kind = ?, content = ?, content_hash = ?, summary = ?,
                             level = ?, relevance = ?, token_count = ?, metadata_json = ?,
                             created_at = ?, updated_at = ?, accessed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&node.kind)
        .bind(&node.content)
        .bind(&node.content_hash)
        .bind(&node.summary)
        .bind(node.level)
        .bind(node.relevance)
        .bind(node.token_count)
        .bind(node.metadata.to_string())
        .bind(node.created_at)
        .bind(node.updated_at)
        .bind(node.accessed_at)
        .bind(&node.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_level(&self, id: &str, level: i64, now: i64) -> Result<()> {
        sqlx::query("UPDATE nodes SET level = ?, updated_at = ? WHERE id = ?")
            .bind(level)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_relevance(&self, id: &str, relevance: f64, now: i64) -> Result<()> {
        sqlx::query("UPDATE nodes SET relevance = ?, updated_at = ? WHERE id = ?")
            .bind(relevance)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_summary(&self, id: &str, summary: &str, now: i64) -> Result<()> {
        sqlx::query("UPDATE nodes SET summary = ?, updated_at = ? WHERE id = ?")
            .bind(summary)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM nodes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_by_level(&self) -> Result<Vec<(i64, i64)>> {
        let rows = sqlx::query("SELECT level, COUNT(*) as n FROM nodes GROUP BY level ORDER BY level")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get::<i64, _>("level"), row.get::<i64, _>("n")))
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM edges WHERE source_id = ? OR target_id = ?")
            .bind(id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM nodes WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn timestamp_range(&self) -> Result<Option<(i64, i64)>> {
        let row = sqlx::query("SELECT MIN(created_at) as lo, MAX(created_at) as hi FROM nodes")
            .fetch_one(&self.pool)
            .await?;
        let lo: Option<i64> = row.get("lo");
        let hi: Option<i64> = row.get("hi");
        Ok(lo.zip(hi))
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM edges").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM nodes").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl EdgeStore for SqliteStore {
    async fn link(&self, edge: &Edge) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO edges (id, source_id, target_id, relation, weight, metadata_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id, target_id, relation) DO NOTHING
            "#,
        )
        .bind(&edge.id)
        .bind(&edge.source_id)
        .bind(&edge.target_id)
        .bind(&edge.relation)
        .bind(edge.weight)
        .bind(edge.metadata.to_string())
        .bind(edge.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn by_source(&self, node_id: &str) -> Result<Vec<Edge>> {
        let rows = sqlx::query("SELECT * FROM edges WHERE source_id = ?")
            .bind(node_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(edge_from_row).collect())
    }

    async fn by_target(&self, node_id: &str) -> Result<Vec<Edge>> {
        let rows = sqlx::query("SELECT * FROM edges WHERE target_id = ?")
            .bind(node_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(edge_from_row).collect())
    }

    async fn connected(&self, node_id: &str) -> Result<Vec<Edge>> {
        let rows = sqlx::query("SELECT * FROM edges WHERE source_id = ? OR target_id = ?")
            .bind(node_id)
            .bind(node_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(edge_from_row).collect())
    }

    async fn neighbor_ids(&self, node_id: &str) -> Result<HashSet<String>> {
        let rows = sqlx::query(
            r#"
            SELECT target_id AS neighbor FROM edges WHERE source_id = ?
            UNION
            SELECT source_id AS neighbor FROM edges WHERE target_id = ?
            "#,
        )
        .bind(node_id)
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|row| row.get("neighbor")).collect())
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM edges")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn unlink(&self, edge_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM edges WHERE id = ?")
            .bind(edge_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<Edge>> {
        let rows = sqlx::query("SELECT * FROM edges")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(edge_from_row).collect())
    }
}

/// Brute-force vector search directly over the `node_vectors` table.
pub struct SqliteVectorIndex {
    pool: SqlitePool,
    model: String,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool, model: impl Into<String>) -> Self {
        Self {
            pool,
            model: model.into(),
        }
    }

    /// All stored `(node_id, vector)` pairs, for hydrating an in-memory
    /// index at startup.
    pub async fn load_all(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let rows = sqlx::query("SELECT node_id, embedding FROM node_vectors")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (row.get("node_id"), blob_to_vec(&blob))
            })
            .collect())
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn insert(&self, id: &str, vector: &[f32]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO node_vectors (node_id, embedding, dims, model, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(node_id) DO UPDATE SET
                embedding = excluded.embedding,
                dims = excluded.dims,
                model = excluded.model,
                created_at = excluded.created_at
            "#,
        )
        .bind(id)
        .bind(vec_to_blob(vector))
        .bind(vector.len() as i64)
        .bind(&self.model)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        let rows = sqlx::query("SELECT node_id, embedding FROM node_vectors")
            .fetch_all(&self.pool)
            .await?;
        let mut hits: Vec<VectorHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                VectorHit {
                    id: row.get("node_id"),
                    distance: cosine_distance(vector, &blob_to_vec(&blob)),
                }
            })
            .collect();
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
        hits.truncate(k);
        Ok(hits)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM node_vectors WHERE node_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM node_vectors")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;

    async fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::connect(&dir.path().join("test.db")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (dir, SqliteStore::new(pool))
    }

    fn node(content: &str, now: i64) -> ContextNode {
        ContextNode::new(content, "note", serde_json::json!({"k": "v"}), now)
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_fields() {
        let (_dir, store) = open_store().await;
        let n = node("roundtrip", 100);
        store.insert(&n).await.unwrap();

        let got = store.get(&n.id, 200).await.unwrap().unwrap();
        assert_eq!(got.content, n.content);
        assert_eq!(got.content_hash, n.content_hash);
        assert_eq!(got.metadata["k"], "v");
        assert_eq!(got.accessed_at, 200);
    }

    #[tokio::test]
    async fn test_duplicate_link_silent() {
        let (_dir, store) = open_store().await;
        let a = node("a", 1);
        let b = node("b", 1);
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();

        let e1 = Edge::new(&a.id, &b.id, "related", 1.0, 1);
        let e2 = Edge::new(&a.id, &b.id, "related", 1.0, 2);
        assert!(store.link(&e1).await.unwrap());
        assert!(!store.link(&e2).await.unwrap());
        assert_eq!(EdgeStore::count(&store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (_dir, store) = open_store().await;
        let a = node("a", 1);
        let b = node("b", 1);
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();
        store
            .link(&Edge::new(&a.id, &b.id, "related", 1.0, 1))
            .await
            .unwrap();

        store.delete(&b.id).await.unwrap();
        assert_eq!(EdgeStore::count(&store).await.unwrap(), 0);
        assert_eq!(NodeStore::count(&store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_vector_index_roundtrip() {
        let (_dir, store) = open_store().await;
        let index = SqliteVectorIndex::new(store.pool().clone(), "test-model");
        index.insert("a", &[1.0, 0.0]).await.unwrap();
        index.insert("b", &[0.0, 1.0]).await.unwrap();

        let hits = index.search(&[1.0, 0.1], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");

        let all = index.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
