//! HTTP adapter behavior against mocked endpoints.

use httpmock::prelude::*;
use serde_json::json;

use safetydesk::moderation::{
    ContentSafetyModerator, ModerationAction, Moderator, SeverityLevel,
};
use safetydesk::vector::{QdrantVectorStore, VectorStore};

#[tokio::test]
async fn qdrant_initialize_creates_missing_collection() {
    let server = MockServer::start_async().await;
    let exists = server
        .mock_async(|when, then| {
            when.method(GET).path("/collections/ohs_chunks");
            then.status(404);
        })
        .await;
    let create = server
        .mock_async(|when, then| {
            when.method(PUT).path("/collections/ohs_chunks");
            then.status(200).json_body(json!({ "result": true }));
        })
        .await;

    let store = QdrantVectorStore::new(server.base_url(), "ohs_chunks", 4);
    store.initialize().await.unwrap();

    exists.assert_async().await;
    create.assert_async().await;
}

#[tokio::test]
async fn qdrant_search_maps_payloads_to_hits() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/collections/ohs_chunks");
            then.status(200).json_body(json!({ "result": {} }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/collections/ohs_chunks/points/search");
            then.status(200).json_body(json!({
                "result": [{
                    "id": "7a7a7a7a-0000-0000-0000-000000000000",
                    "score": 0.92,
                    "payload": {
                        "id": "chunk-1",
                        "text": "Hard hats are required.",
                        "title": "PPE",
                        "section": "Head",
                        "source_path": "ppe.md",
                        "hash": "abc",
                        "created_at": "2025-06-01T00:00:00Z",
                        "metadata": {}
                    }
                }]
            }));
        })
        .await;

    let store = QdrantVectorStore::new(server.base_url(), "ohs_chunks", 4);
    store.initialize().await.unwrap();
    let hits = store.search(&[0.1, 0.2, 0.3, 0.4], 5, 0.1).await.unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.id, "chunk-1");
    assert!((hits[0].score - 0.92).abs() < 1e-6);
}

#[tokio::test]
async fn qdrant_rejects_wrong_dimension_before_calling_out() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/collections/ohs_chunks");
            then.status(200).json_body(json!({ "result": {} }));
        })
        .await;

    let store = QdrantVectorStore::new(server.base_url(), "ohs_chunks", 4);
    store.initialize().await.unwrap();
    assert!(store.search(&[0.1, 0.2], 5, 0.1).await.is_err());
}

#[tokio::test]
async fn content_safety_blocks_on_high_severity() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/contentsafety/text:analyze");
            then.status(200).json_body(json!({
                "categoriesAnalysis": [
                    { "category": "Violence", "severity": 6 },
                    { "category": "Hate", "severity": 0 }
                ]
            }));
        })
        .await;

    let moderator =
        ContentSafetyModerator::new(server.base_url(), "key", SeverityLevel::Medium);
    let result = moderator.moderate("some text").await.unwrap();
    assert!(result.flagged);
    assert_eq!(result.action, ModerationAction::Block);
    assert_eq!(result.overall_severity, 6);
}

#[tokio::test]
async fn content_safety_provider_errors_surface_to_caller() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/contentsafety/text:analyze");
            then.status(500);
        })
        .await;

    let moderator =
        ContentSafetyModerator::new(server.base_url(), "key", SeverityLevel::Medium);
    assert!(moderator.moderate("some text").await.is_err());
}
