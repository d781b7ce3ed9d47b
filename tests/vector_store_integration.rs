/// Vector store integration tests: persistence, deletion, filtering, reconciliation
mod common;

use common::{random_vector, DIMS};
use docseek::chunk::Chunk;
use docseek::store::{EmbeddedChunk, Filters, StoreConfig, VectorStore};
use docseek::DocseekError;
use serde_json::json;
use std::path::Path;
use tempfile::TempDir;

const MODEL: &str = "all-MiniLM-L6-v2";

fn embedded(id: &str, file_id: &str, seed: u64) -> EmbeddedChunk {
    EmbeddedChunk::new(
        Chunk::new(id, file_id, format!("content of {}", id)),
        MODEL,
        random_vector(seed, DIMS),
    )
}

async fn open(dir: &Path, auto_save: bool) -> VectorStore {
    let mut config = StoreConfig::new(dir, DIMS);
    config.auto_save = auto_save;
    let store = VectorStore::new(config);
    store.init().await.unwrap();
    store
}

#[tokio::test]
async fn test_self_similarity() {
    let temp = TempDir::new().unwrap();
    let store = open(temp.path(), true).await;

    store.add("A", vec![embedded("c1", "A", 1)]).await.unwrap();

    let results = store
        .search(&random_vector(1, DIMS), 1, None, None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk_id, "c1");
    assert!(results[0].score >= 0.999);
}

#[tokio::test]
async fn test_exact_threshold_returns_only_matching_chunk() {
    let temp = TempDir::new().unwrap();
    let store = open(temp.path(), true).await;

    store
        .add(
            "A",
            vec![
                embedded("a1", "A", 10),
                embedded("a2", "A", 11),
                embedded("a3", "A", 12),
            ],
        )
        .await
        .unwrap();

    let results = store
        .search(&random_vector(11, DIMS), 3, Some(0.99), None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk_id, "a2");
}

#[tokio::test]
async fn test_results_sorted_and_bounded() {
    let temp = TempDir::new().unwrap();
    let store = open(temp.path(), false).await;

    let chunks = (0..20)
        .map(|i| embedded(&format!("c{}", i), "A", i))
        .collect();
    store.add("A", chunks).await.unwrap();

    let results = store
        .search(&random_vector(3, DIMS), 5, Some(0.0), None)
        .await
        .unwrap();
    assert!(results.len() <= 5);
    assert_eq!(results[0].chunk_id, "c3");
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
}

#[tokio::test]
async fn test_remove_by_file_id_is_complete() {
    let temp = TempDir::new().unwrap();
    let store = open(temp.path(), true).await;

    store
        .add(
            "A",
            vec![
                embedded("a1", "A", 1),
                embedded("a2", "A", 2),
                embedded("a3", "A", 3),
            ],
        )
        .await
        .unwrap();
    store.add("B", vec![embedded("b1", "B", 4)]).await.unwrap();

    assert_eq!(store.remove_by_file_id("A").await.unwrap(), 3);
    assert_eq!(store.remove_by_file_id("A").await.unwrap(), 0);

    for seed in 1..=3 {
        let results = store
            .search(&random_vector(seed, DIMS), 10, Some(0.0), None)
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.file_id != "A"));
    }

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.vector_count, 1);
    assert_eq!(stats.file_count, 1);
    assert_eq!(stats.dangling_count, 3);
    assert_eq!(store.file_ids().await.unwrap(), vec!["B".to_string()]);

    assert_eq!(store.optimize().await.unwrap(), 3);
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.dangling_count, 0);
    assert_eq!(stats.index_points, 1);

    let results = store
        .search(&random_vector(4, DIMS), 1, None, None)
        .await
        .unwrap();
    assert_eq!(results[0].chunk_id, "b1");
}

#[tokio::test]
async fn test_filters_are_exact_match() {
    let temp = TempDir::new().unwrap();
    let store = open(temp.path(), false).await;

    let mut pdf = embedded("p1", "A", 1);
    pdf.chunk = pdf.chunk.with_metadata("type", json!("pdf"));
    let mut doc = embedded("d1", "A", 2);
    doc.chunk = doc.chunk.with_metadata("type", json!("docx"));
    let untyped = embedded("u1", "A", 3);
    store.add("A", vec![pdf, doc, untyped]).await.unwrap();

    let mut filters = Filters::new();
    filters.insert("type".to_string(), json!("pdf"));

    for seed in 1..=3 {
        let results = store
            .search(&random_vector(seed, DIMS), 10, Some(0.0), Some(&filters))
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.metadata.get("type") == Some(&json!("pdf"))));
    }

    let mut missing = Filters::new();
    missing.insert("language".to_string(), json!("en"));
    let results = store
        .search(&random_vector(1, DIMS), 10, Some(0.0), Some(&missing))
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_upsert_replaces_chunk() {
    let temp = TempDir::new().unwrap();
    let store = open(temp.path(), true).await;

    store.add("A", vec![embedded("c1", "A", 1)]).await.unwrap();

    let mut replacement = embedded("c1", "A", 2);
    replacement.chunk.content = "rewritten".to_string();
    store.add("A", vec![replacement]).await.unwrap();

    assert_eq!(store.len().await.unwrap(), 1);
    assert_eq!(store.get("c1").await.unwrap().unwrap().content, "rewritten");

    let results = store
        .search(&random_vector(2, DIMS), 5, None, None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "rewritten");

    let stale = store
        .search(&random_vector(1, DIMS), 5, Some(0.99), None)
        .await
        .unwrap();
    assert!(stale.is_empty());
}

#[tokio::test]
async fn test_find_similar_excludes_reference() {
    let temp = TempDir::new().unwrap();
    let store = open(temp.path(), false).await;

    let base = random_vector(1, DIMS);
    let mut near = base.clone();
    for v in near.iter_mut().take(20) {
        *v += 0.05;
    }
    store
        .add(
            "A",
            vec![
                EmbeddedChunk::new(Chunk::new("ref", "A", "reference"), MODEL, base),
                EmbeddedChunk::new(Chunk::new("near", "A", "neighbour"), MODEL, near),
                embedded("far", "A", 99),
            ],
        )
        .await
        .unwrap();

    let similar = store.find_similar(Some("A"), Some("ref"), 2).await.unwrap();
    assert!(!similar.is_empty());
    assert_eq!(similar[0].chunk_id, "near");
    assert!(similar.iter().all(|r| r.chunk_id != "ref"));
    assert!(similar.len() <= 2);
}

#[tokio::test]
async fn test_dimension_mismatch() {
    let temp = TempDir::new().unwrap();
    let store = open(temp.path(), false).await;

    let result = store.search(&random_vector(1, 768), 5, None, None).await;
    assert!(matches!(
        result,
        Err(DocseekError::DimensionMismatch { expected: 384, actual: 768 })
    ));

    let bad = EmbeddedChunk::new(Chunk::new("c1", "A", "x"), MODEL, random_vector(1, 128));
    assert!(store.add("A", vec![bad]).await.is_err());
    assert_eq!(store.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_persistence_across_reopen() {
    let temp = TempDir::new().unwrap();

    {
        let store = open(temp.path(), true).await;
        store
            .add("A", vec![embedded("a1", "A", 1), embedded("a2", "A", 2)])
            .await
            .unwrap();
    }

    let store = open(temp.path(), true).await;
    assert_eq!(store.len().await.unwrap(), 2);

    let results = store
        .search(&random_vector(2, DIMS), 1, None, None)
        .await
        .unwrap();
    assert_eq!(results[0].chunk_id, "a2");

    let ids = store.add("B", vec![embedded("b1", "B", 3)]).await.unwrap();
    assert_eq!(ids, vec![2]);
}

#[tokio::test]
async fn test_rebuilds_missing_index_from_metadata() {
    let temp = TempDir::new().unwrap();

    {
        let store = open(temp.path(), false).await;
        store.add("A", vec![embedded("a1", "A", 1)]).await.unwrap();
    }

    let store = open(temp.path(), false).await;
    let results = store
        .search(&random_vector(1, DIMS), 1, None, None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk_id, "a1");
}

#[tokio::test]
async fn test_rebuilds_stale_index_from_metadata() {
    let temp = TempDir::new().unwrap();

    {
        let store = open(temp.path(), true).await;
        store.add("A", vec![embedded("a1", "A", 1)]).await.unwrap();
    }
    {
        // Rows written after the last index dump
        let store = open(temp.path(), false).await;
        store.add("B", vec![embedded("b1", "B", 2)]).await.unwrap();
    }

    let store = open(temp.path(), false).await;
    for (seed, expected) in [(1, "a1"), (2, "b1")] {
        let results = store
            .search(&random_vector(seed, DIMS), 1, None, None)
            .await
            .unwrap();
        assert_eq!(results[0].chunk_id, expected);
    }
}

#[tokio::test]
async fn test_clear_resets_everything() {
    let temp = TempDir::new().unwrap();

    {
        let store = open(temp.path(), true).await;
        store
            .add("A", vec![embedded("a1", "A", 1), embedded("a2", "A", 2)])
            .await
            .unwrap();
        store
            .search(&random_vector(1, DIMS), 1, None, None)
            .await
            .unwrap();

        store.clear().await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.vector_count, 0);
        assert_eq!(stats.index_points, 0);
        assert_eq!(stats.search_count, 0);
        assert!(store
            .search(&random_vector(1, DIMS), 5, Some(0.0), None)
            .await
            .unwrap()
            .is_empty());

        let ids = store.add("A", vec![embedded("a3", "A", 3)]).await.unwrap();
        assert_eq!(ids, vec![0]);
        store.clear().await.unwrap();
    }

    let store = open(temp.path(), true).await;
    assert_eq!(store.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_optimize_after_removing_everything() {
    let temp = TempDir::new().unwrap();

    {
        let store = open(temp.path(), true).await;
        store
            .add("A", vec![embedded("a1", "A", 1), embedded("a2", "A", 2)])
            .await
            .unwrap();
        store.remove_by_file_id("A").await.unwrap();

        assert_eq!(store.optimize().await.unwrap(), 2);
        store.save().await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.index_points, 0);
        assert_eq!(stats.dangling_count, 0);
    }

    let store = open(temp.path(), true).await;
    assert_eq!(store.len().await.unwrap(), 0);
    assert!(store
        .search(&random_vector(1, DIMS), 5, Some(0.0), None)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        store.add("B", vec![embedded("b1", "B", 3)]).await.unwrap(),
        vec![0]
    );
}

#[tokio::test]
async fn test_save_after_clear() {
    let temp = TempDir::new().unwrap();

    {
        let store = open(temp.path(), true).await;
        store.add("A", vec![embedded("a1", "A", 1)]).await.unwrap();
        store.clear().await.unwrap();
        store.save().await.unwrap();
    }

    let store = open(temp.path(), true).await;
    assert_eq!(store.len().await.unwrap(), 0);

    let ids = store.add("A", vec![embedded("a2", "A", 2)]).await.unwrap();
    assert_eq!(ids, vec![0]);
    let results = store
        .search(&random_vector(2, DIMS), 1, None, None)
        .await
        .unwrap();
    assert_eq!(results[0].chunk_id, "a2");
}

#[tokio::test]
async fn test_add_survives_failed_index_dump() {
    let temp = TempDir::new().unwrap();
    let store = open(temp.path(), true).await;

    // A plain file where the index directory should be makes every dump fail
    let index_dir = temp.path().join("index");
    std::fs::remove_dir_all(&index_dir).unwrap();
    std::fs::write(&index_dir, b"not a directory").unwrap();

    let ids = store.add("A", vec![embedded("a1", "A", 1)]).await.unwrap();
    assert_eq!(ids, vec![0]);
    assert!(store.save().await.is_err());

    let results = store
        .search(&random_vector(1, DIMS), 1, None, None)
        .await
        .unwrap();
    assert_eq!(results[0].chunk_id, "a1");

    store.remove_by_file_id("A").await.unwrap();
    assert_eq!(store.optimize().await.unwrap(), 1);
}

#[tokio::test]
async fn test_model_survives_reopen() {
    let temp = TempDir::new().unwrap();

    {
        let store = open(temp.path(), true).await;
        store
            .add(
                "A",
                vec![
                    embedded("a1", "A", 1),
                    EmbeddedChunk::new(
                        Chunk::new("a2", "A", "code"),
                        "bge-small-en-v1.5",
                        random_vector(2, DIMS),
                    ),
                ],
            )
            .await
            .unwrap();
    }

    let store = open(temp.path(), true).await;
    assert_eq!(
        store.models().await.unwrap(),
        vec![MODEL.to_string(), "bge-small-en-v1.5".to_string()]
    );
    assert_eq!(store.get("a2").await.unwrap().unwrap().model, "bge-small-en-v1.5");

    let results = store
        .search_model(&random_vector(2, DIMS), MODEL, 5, Some(0.99), None)
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_concurrent_searches() {
    let temp = TempDir::new().unwrap();
    let store = open(temp.path(), false).await;

    let chunks = (0..10)
        .map(|i| embedded(&format!("c{}", i), "A", i))
        .collect();
    store.add("A", chunks).await.unwrap();

    let queries: Vec<Vec<f32>> = (0..10).map(|i| random_vector(i, DIMS)).collect();
    let searches = queries
        .iter()
        .map(|q| store.search(q, 1, None, None));
    let results = futures::future::try_join_all(searches).await.unwrap();

    for (i, result) in results.iter().enumerate() {
        assert_eq!(result[0].chunk_id, format!("c{}", i));
    }
    assert_eq!(store.stats().await.unwrap().search_count, 10);
}
