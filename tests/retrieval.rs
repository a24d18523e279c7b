//! Retrieval invariants across the embedder and vector store.

mod common;

use common::{build_stack, seed_chunk, test_settings};
use safetydesk::clients::EmbeddingClient;
use safetydesk::vector::VectorStore;

#[tokio::test]
async fn sole_chunk_is_its_own_best_match() {
    let stack = build_stack(test_settings(), None).await;
    seed_chunk(
        &stack,
        "only-chunk",
        "Scaffolding must be inspected by a competent person before each shift.",
        "Scaffolding Safety",
    )
    .await;

    let query = stack
        .embedder
        .embed("Scaffolding must be inspected by a competent person before each shift.")
        .await
        .unwrap();
    let hits = stack.store.search(&query, 1, 0.0).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.id, "only-chunk");
    assert!((hits[0].score - 1.0).abs() < 1e-4);
}

#[tokio::test]
async fn search_respects_top_k_across_many_chunks() {
    let stack = build_stack(test_settings(), None).await;
    for i in 0..8 {
        seed_chunk(
            &stack,
            &format!("chunk-{i}"),
            &format!("ladder inspection rule number {i} for portable ladders"),
            "Ladder Safety",
        )
        .await;
    }
    let query = stack.embedder.embed("portable ladder inspection").await.unwrap();
    let hits = stack.store.search(&query, 3, 0.0).await.unwrap();
    assert_eq!(hits.len(), 3);
    for window in hits.windows(2) {
        assert!(window[0].score >= window[1].score);
    }
}

#[tokio::test]
async fn delete_removes_chunk_from_results() {
    let stack = build_stack(test_settings(), None).await;
    seed_chunk(&stack, "gone", "confined space entry permit rules", "Permits").await;
    assert!(stack.store.delete("gone").await.unwrap());
    assert!(!stack.store.delete("gone").await.unwrap());

    let query = stack.embedder.embed("confined space entry").await.unwrap();
    assert!(stack.store.search(&query, 5, 0.0).await.unwrap().is_empty());
    assert_eq!(stack.store.count().await.unwrap(), 0);
}
