#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use memfabric::clara::REASONING_MARKER;
use memfabric::embedding::hash::HashEmbedder;
use memfabric::embedding::Embedder;
use memfabric::error::{EmbeddingError, GenerationError};
use memfabric::fabric::{FabricBuilder, MemoryFabric};
use memfabric::generation::TextGenerator;
use memfabric::store::sqlite::SqliteStore;
use memfabric::store::VectorStore;

/// Width used by the fabric-level tests.
pub const DIM: usize = 64;

pub const COMPRESSED_CONTENT: &str = "COMPRESSED_CONTENT";
pub const REASONED_QUERY: &str = "REASONED_QUERY";

/// Fresh in-memory store with schema created.
pub async fn test_store(dimension: usize) -> Arc<SqliteStore> {
    let store = Arc::new(SqliteStore::in_memory(dimension).unwrap());
    store.init().await.unwrap();
    store
}

/// Deterministic unit vector with a spike at `seed`.
/// Distinct seeds give orthogonal vectors.
pub fn spike(dimension: usize, seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dimension];
    v[seed % dimension] = 1.0;
    v
}

/// Builder over an uninitialized in-memory store and the hashing embedder.
pub fn fabric_builder() -> FabricBuilder {
    let store = Arc::new(SqliteStore::in_memory(DIM).unwrap());
    MemoryFabric::builder(store, Arc::new(HashEmbedder::new(DIM).unwrap()))
}

/// Initialized fabric with both optimization stages off.
pub async fn ready_fabric() -> MemoryFabric {
    let fabric = fabric_builder().build().unwrap();
    fabric.init().await.unwrap();
    fabric
}

/// Answers compression and reasoning prompts with fixed text and fails
/// everything else.
#[derive(Default)]
pub struct ScriptedGenerator {
    pub calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.contains("Compress") {
            Ok(COMPRESSED_CONTENT.to_string())
        } else if prompt.contains(REASONING_MARKER) {
            Ok(REASONED_QUERY.to_string())
        } else {
            Err(GenerationError::Other("unexpected prompt".into()))
        }
    }
}

/// Always fails.
pub struct FailingGenerator;

#[async_trait]
impl TextGenerator for FailingGenerator {
    fn name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        Err(GenerationError::Provider {
            status: 503,
            body: "overloaded".into(),
        })
    }
}

/// Embedder whose every call fails.
pub struct FailingEmbedder {
    pub dimensions: usize,
}

#[async_trait]
impl Embedder for FailingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "failing"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Model("embedding backend offline".into()))
    }
}

/// Declares one width and returns vectors of another.
pub struct MisreportingEmbedder {
    pub declared: usize,
    pub actual: usize,
}

#[async_trait]
impl Embedder for MisreportingEmbedder {
    fn dimensions(&self) -> usize {
        self.declared
    }

    fn model_name(&self) -> &str {
        "misreporting"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(vec![0.5; self.actual])
    }
}

/// Hashing embedder that sleeps before every call.
pub struct SlowEmbedder {
    inner: HashEmbedder,
    delay: Duration,
}

impl SlowEmbedder {
    pub fn new(dimensions: usize, delay: Duration) -> Self {
        Self {
            inner: HashEmbedder::new(dimensions).unwrap(),
            delay,
        }
    }
}

#[async_trait]
impl Embedder for SlowEmbedder {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_name(&self) -> &str {
        "slow"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        tokio::time::sleep(self.delay).await;
        self.inner.embed(text).await
    }
}
