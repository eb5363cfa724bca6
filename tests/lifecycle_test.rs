mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{
    fabric_builder, ready_fabric, FailingEmbedder, MisreportingEmbedder, SlowEmbedder, DIM,
};
use memfabric::embedding::hash::HashEmbedder;
use memfabric::error::{EmbeddingError, FabricError, StorageError};
use memfabric::fabric::{FabricState, MemoryFabric};
use memfabric::store::sqlite::SqliteStore;
use memfabric::store::{SearchFilter, VectorStore};
use memfabric::types::Role;

#[tokio::test]
async fn operations_before_init_are_rejected() {
    let fabric = fabric_builder().build().unwrap();
    assert_eq!(fabric.state(), FabricState::Uninitialized);

    assert!(matches!(
        fabric.add_memory("x", Role::User).await,
        Err(FabricError::NotInitialized)
    ));
    assert!(matches!(
        fabric.search("x", 5).await,
        Err(FabricError::NotInitialized)
    ));
    assert!(matches!(
        fabric.retrieve_context("x").await,
        Err(FabricError::NotInitialized)
    ));
    assert!(matches!(fabric.forget(1).await, Err(FabricError::NotInitialized)));
}

#[tokio::test]
async fn concurrent_init_readies_the_fabric_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("memory.db"), DIM).unwrap());
    let fabric = MemoryFabric::builder(store, Arc::new(HashEmbedder::new(DIM).unwrap()))
        .build()
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let fabric = fabric.clone();
            tokio::spawn(async move { fabric.init().await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(fabric.state(), FabricState::Ready);

    let id = fabric.add_memory("window seat", Role::User).await.unwrap();
    let results = fabric.search("window seat", 1).await.unwrap();
    assert_eq!(results[0].id, id);
    fabric.close().await.unwrap();
}

#[tokio::test]
async fn closed_fabric_is_terminal() {
    let fabric = ready_fabric().await;
    fabric.close().await.unwrap();
    assert_eq!(fabric.state(), FabricState::Closed);

    assert!(matches!(
        fabric.add_memory("x", Role::User).await,
        Err(FabricError::Closed)
    ));
    assert!(matches!(
        fabric.retrieve_context("x").await,
        Err(FabricError::Closed)
    ));
    assert!(matches!(fabric.init().await, Err(FabricError::Closed)));
    assert!(matches!(fabric.close().await, Err(FabricError::Closed)));
    assert!(!fabric.queue_memory("late", Role::User));
}

#[tokio::test]
async fn close_drains_queued_writes_before_closing_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.db");

    let store = Arc::new(SqliteStore::open(&path, DIM).unwrap());
    let fabric = MemoryFabric::builder(store, Arc::new(HashEmbedder::new(DIM).unwrap()))
        .build()
        .unwrap();
    fabric.init().await.unwrap();
    for i in 0..8 {
        fabric.queue_memory(format!("note {i}"), Role::Assistant);
    }
    fabric.close().await.unwrap();

    let reopened = SqliteStore::open(&path, DIM).unwrap();
    reopened.init().await.unwrap();
    assert_eq!(reopened.count(&SearchFilter::default()).await.unwrap(), 8);
}

#[tokio::test]
async fn close_during_wait_still_persists_every_queued_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.db");

    let store = Arc::new(SqliteStore::open(&path, DIM).unwrap());
    let embedder = Arc::new(SlowEmbedder::new(DIM, Duration::from_millis(100)));
    let fabric = MemoryFabric::builder(store, embedder).build().unwrap();
    fabric.init().await.unwrap();
    for i in 0..5 {
        assert!(fabric.queue_memory(format!("slow note {i}"), Role::User));
    }

    let waiter = {
        let fabric = fabric.clone();
        tokio::spawn(async move { fabric.wait().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    fabric.close().await.unwrap();
    assert_eq!(fabric.pending(), 0);
    waiter.await.unwrap();

    let reopened = SqliteStore::open(&path, DIM).unwrap();
    reopened.init().await.unwrap();
    assert_eq!(reopened.count(&SearchFilter::default()).await.unwrap(), 5);
}

#[tokio::test]
async fn abandoned_wait_leaves_queued_writes_running() {
    let store = Arc::new(SqliteStore::in_memory(DIM).unwrap());
    let embedder = Arc::new(SlowEmbedder::new(DIM, Duration::from_millis(100)));
    let fabric = MemoryFabric::builder(store, embedder).build().unwrap();
    fabric.init().await.unwrap();
    for i in 0..5 {
        assert!(fabric.queue_memory(format!("slow note {i}"), Role::User));
    }

    let timed_out = tokio::time::timeout(Duration::from_millis(10), fabric.wait()).await;
    assert!(timed_out.is_err());
    assert_eq!(fabric.pending(), 5);

    assert_eq!(fabric.wait().await, 5);
    assert_eq!(fabric.count().await.unwrap(), 5);
}

#[tokio::test]
async fn forget_removes_from_search() {
    let fabric = ready_fabric().await;
    let id = fabric.add_memory("temporary", Role::User).await.unwrap();
    fabric.forget(id).await.unwrap();

    assert!(fabric
        .search("temporary", 5)
        .await
        .unwrap()
        .iter()
        .all(|r| r.id != id));
    assert!(matches!(
        fabric.forget(id).await,
        Err(FabricError::Storage(StorageError::NotFound(_)))
    ));
}

#[tokio::test]
async fn embedding_failures_propagate_from_writes_and_searches() {
    let store = Arc::new(SqliteStore::in_memory(DIM).unwrap());
    let fabric = MemoryFabric::builder(store, Arc::new(FailingEmbedder { dimensions: DIM }))
        .build()
        .unwrap();
    fabric.init().await.unwrap();

    assert!(matches!(
        fabric.add_memory("x", Role::User).await,
        Err(FabricError::Embedding(EmbeddingError::Model(_)))
    ));
    assert!(matches!(
        fabric.search("x", 1).await,
        Err(FabricError::Embedding(_))
    ));
}

#[tokio::test]
async fn retrieve_context_degrades_to_empty() {
    let store = Arc::new(SqliteStore::in_memory(DIM).unwrap());
    let fabric = MemoryFabric::builder(store, Arc::new(FailingEmbedder { dimensions: DIM }))
        .build()
        .unwrap();
    fabric.init().await.unwrap();

    let context = fabric.retrieve_context("anything").await.unwrap();
    assert_eq!(context, "");
    let stats = fabric.last_run().unwrap();
    assert_eq!(stats.context_chunks, 0);
    assert_eq!(stats.used_query, "anything");
}

#[tokio::test]
async fn wrong_width_embedding_is_a_dimension_error() {
    let store = Arc::new(SqliteStore::in_memory(DIM).unwrap());
    let embedder = MisreportingEmbedder {
        declared: DIM,
        actual: DIM / 2,
    };
    let fabric = MemoryFabric::builder(store, Arc::new(embedder))
        .build()
        .unwrap();
    fabric.init().await.unwrap();

    let err = fabric.add_memory("x", Role::User).await.unwrap_err();
    assert!(matches!(
        err,
        FabricError::Embedding(EmbeddingError::DimensionMismatch { expected: DIM, actual })
            if actual == DIM / 2
    ));
}

#[tokio::test]
async fn default_attribution_scopes_reads() {
    let fabric = ready_fabric().await;
    fabric.attribution("user-1", "chat");
    fabric.add_memory("user one likes tea", Role::User).await.unwrap();
    fabric.attribution("user-2", "chat");
    fabric.add_memory("user two likes tea", Role::User).await.unwrap();

    let results = fabric.search("likes tea", 10).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "user two likes tea");
    assert_eq!(fabric.count().await.unwrap(), 1);
    assert_eq!(fabric.count_all().await.unwrap(), 2);
}
