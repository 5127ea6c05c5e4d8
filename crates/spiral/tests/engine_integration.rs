//! Library-level integration tests for the engine facade.
//!
//! These exercise the full stack (SQLite stores, sim embedding provider,
//! evolution service, assembly) through `SpiralEngine` without going
//! through the CLI.

use tempfile::TempDir;

use spiral::config::Config;
use spiral::engine::SpiralEngine;
use spiral_core::models::ContextNode;
use spiral_core::store::VectorIndex;

async fn open_engine(tmp: &TempDir) -> SpiralEngine {
    let mut config = Config::with_db_path(tmp.path().join("spiral.db"));
    config.embedding.provider = "sim".to_string();
    SpiralEngine::open(config).await.unwrap()
}

#[tokio::test]
async fn test_bad_relation_target_leaves_no_node() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp).await;

    let err = engine
        .store(
            "orphan",
            "note",
            serde_json::json!({}),
            &[("missing-id".to_string(), "related".to_string())],
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"));

    let status = engine.status().await.unwrap();
    assert_eq!(status.node_count, 0);
    assert_eq!(status.edge_count, 0);
}

#[tokio::test]
async fn test_auto_relation_links_near_duplicates() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp).await;

    // Same word bag, different order: identical sim embedding but a
    // different content hash, so the second store is a new node.
    engine
        .store("alpha beta gamma delta", "note", serde_json::json!({}), &[])
        .await
        .unwrap();
    let second = engine
        .store("delta gamma beta alpha", "note", serde_json::json!({}), &[])
        .await
        .unwrap();

    assert!(second.created);
    assert_eq!(second.auto_relations, 1);
    let status = engine.status().await.unwrap();
    assert_eq!(status.node_count, 2);
    assert_eq!(status.edge_count, 1);
}

#[tokio::test]
async fn test_query_places_linked_neighbor_in_tier2() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp).await;

    // Five fresh nodes; the query text is the focus node's exact content
    // (18 tokens), the rest are 15 tokens each. A 70-token budget gives
    // tier 1 a 24-token reserve: the focus fits alone and every other
    // node is too large for the 6 leftover tokens, so they all cascade.
    let focus_text = "harbor tide ".repeat(6);
    let focus = engine
        .store(&focus_text, "note", serde_json::json!({}), &[])
        .await
        .unwrap();
    let linked = engine
        .store(
            &"meadow lark ".repeat(5),
            "note",
            serde_json::json!({}),
            &[(focus.id.clone(), "related".to_string())],
        )
        .await
        .unwrap();
    for words in ["quartz dial ", "copper pipe ", "violet lamp "] {
        engine
            .store(&words.repeat(5), "note", serde_json::json!({}), &[])
            .await
            .unwrap();
    }

    let payload = engine.query(&focus_text, Some(70), None).await.unwrap();

    let tier1 = &payload.tiers[0];
    assert_eq!(tier1.level, 1);
    assert_eq!(tier1.nodes.len(), 1);
    assert_eq!(tier1.nodes[0].id, focus.id);

    // Tier 2 fits one 15-token node out of its 23-token budget, and the
    // explicitly linked companion wins that slot over the disconnected
    // candidates.
    let tier2 = &payload.tiers[1];
    assert_eq!(tier2.level, 2);
    assert_eq!(tier2.nodes.len(), 1);
    assert_eq!(tier2.nodes[0].id, linked.id);
    assert!(payload.total_tokens <= 70);
}

#[tokio::test]
async fn test_query_respects_budget_and_ranks_by_similarity() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp).await;

    for i in 0..10 {
        engine
            .store(
                &format!("note number {i} about deployment pipelines and rollouts"),
                "note",
                serde_json::json!({}),
                &[],
            )
            .await
            .unwrap();
    }
    engine
        .store(
            "the authentication token refresh bug in the login flow",
            "error",
            serde_json::json!({}),
            &[],
        )
        .await
        .unwrap();

    let payload = engine
        .query("authentication token refresh bug login", Some(60), None)
        .await
        .unwrap();
    assert!(payload.total_tokens <= 60);
    let tier1 = &payload.tiers[0];
    assert!(!tier1.nodes.is_empty());
    assert!(tier1.nodes[0].text.contains("authentication token"));
}

#[tokio::test]
async fn test_decay_then_evolve_is_stable() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp).await;

    for i in 0..5 {
        engine
            .store(&format!("fact {i}"), "note", serde_json::json!({}), &[])
            .await
            .unwrap();
    }

    // Decay reclassifies; an immediate evolve has nothing left to move.
    engine.decay().await.unwrap();
    let report = engine.evolve().await.unwrap();
    assert_eq!(report.scanned, 5);
    assert_eq!(report.promoted, 0);
    assert_eq!(report.demoted, 0);
}

#[tokio::test]
async fn test_save_state_keeps_trailing_slice() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp).await;

    let messages: Vec<(String, String)> = (0..15)
        .map(|i| ("user".to_string(), format!("conversation turn number {i}")))
        .collect();
    let stored = engine.save_state(&messages).await.unwrap();
    assert_eq!(stored, 10);

    let status = engine.status().await.unwrap();
    assert_eq!(status.node_count, 10);

    // Turns 0..4 were dropped, the newest survived.
    let payload = engine
        .query("conversation turn number 14", Some(4000), None)
        .await
        .unwrap();
    let texts: Vec<&str> = payload
        .tiers
        .iter()
        .flat_map(|t| t.nodes.iter().map(|n| n.text.as_str()))
        .collect();
    assert!(texts.iter().any(|t| t.contains("number 14")));
    assert!(!texts.iter().any(|t| t.ends_with("number 0")));
}

#[tokio::test]
async fn test_import_node_preserves_tier_and_score() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp).await;

    let mut node = ContextNode::new("imported archive entry", "note", serde_json::json!({}), 100);
    node.level = 4;
    node.relevance = 0.25;
    assert!(engine.import_node(node.clone()).await.unwrap());
    // Duplicate content is skipped.
    let dup = ContextNode::new("imported archive entry", "note", serde_json::json!({}), 200);
    assert!(!engine.import_node(dup).await.unwrap());

    let status = engine.status().await.unwrap();
    assert_eq!(status.node_count, 1);
    assert_eq!(status.nodes_by_level, vec![(4, 1)]);
}

#[tokio::test]
async fn test_archive_roundtrip_merges_and_replaces() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp).await;

    let a = engine
        .store("first archived fact", "note", serde_json::json!({}), &[])
        .await
        .unwrap();
    engine
        .store(
            "second archived fact",
            "note",
            serde_json::json!({}),
            &[(a.id.clone(), "references".to_string())],
        )
        .await
        .unwrap();

    let bundle = engine.export_archive().await.unwrap();
    assert_eq!(bundle.manifest.node_count, 2);

    // Merge into the same store: everything dedups.
    let report = engine.import_archive(&bundle, false).await.unwrap();
    assert_eq!(report.imported_nodes, 0);
    assert_eq!(report.skipped_nodes, 2);

    // Replace restores identical counts from scratch.
    let report = engine.import_archive(&bundle, true).await.unwrap();
    assert_eq!(report.imported_nodes, 2);
    assert_eq!(report.imported_edges, 1);
    let status = engine.status().await.unwrap();
    assert_eq!(status.node_count, 2);
    assert_eq!(status.edge_count, 1);
}

#[tokio::test]
async fn test_corrupt_bundle_imports_nothing() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp).await;

    engine
        .store("good data", "note", serde_json::json!({}), &[])
        .await
        .unwrap();
    let mut bundle = engine.export_archive().await.unwrap();
    engine.clear_all().await.unwrap();

    bundle.nodes[0].content = "flipped".to_string();
    assert!(engine.import_archive(&bundle, false).await.is_err());

    let status = engine.status().await.unwrap();
    assert_eq!(status.node_count, 0);
}

#[tokio::test]
async fn test_vector_index_survives_restart() {
    let tmp = TempDir::new().unwrap();
    {
        let engine = open_engine(&tmp).await;
        engine
            .store("durable vector entry", "note", serde_json::json!({}), &[])
            .await
            .unwrap();
        engine.close().await;
    }

    // Re-open: the in-memory index rehydrates from node_vectors and the
    // old entry is still searchable.
    let engine = open_engine(&tmp).await;
    let payload = engine
        .query("durable vector entry", Some(500), None)
        .await
        .unwrap();
    assert!(payload.tiers[0]
        .nodes
        .iter()
        .any(|n| n.text.contains("durable vector entry")));
}

#[tokio::test]
async fn test_clear_all_empties_vectors_too() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp).await;
    engine
        .store("to be cleared", "note", serde_json::json!({}), &[])
        .await
        .unwrap();
    engine.clear_all().await.unwrap();

    let status = engine.status().await.unwrap();
    assert_eq!(status.node_count, 0);

    // Nothing left for the vector path to return.
    let pool_path = tmp.path().join("spiral.db");
    let pool = spiral::db::connect(&pool_path).await.unwrap();
    let index = spiral::sqlite_store::SqliteVectorIndex::new(pool, "sim");
    assert!(index.search(&[1.0; 64], 5).await.unwrap().is_empty());
}
