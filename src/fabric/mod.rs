//! The memory fabric orchestrator.
//!
//! [`MemoryFabric`] ties a [`VectorStore`], an [`Embedder`] and the optional
//! [`Clara`] stages together:
//!
//! - **write**: `add_memory` → compression → embed → `insert`
//! - **read**: `search` → embed → `search`; `retrieve_context` additionally
//!   rewrites the query first and formats the hits as a context block
//! - **background**: `queue_memory` spawns writes on the runtime; `wait`
//!   awaits the writes queued before it; `close` awaits every write, even
//!   ones a concurrent `wait` is watching, and then shuts the store down
//!
//! Every operation is attributed to an [`Attribution`]. The `_with` variants
//! take it explicitly, [`ScopedFabric`] binds one, and the plain variants use
//! the fabric's default, snapshotted once per call.

pub mod attribution;
pub mod queue;

pub use attribution::Attribution;
pub use queue::WriteQueue;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clara::{Clara, CompressionStage, ReasoningStage};
use crate::config::FabricConfig;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{EmbeddingError, FabricError, FabricResult, StorageError};
use crate::generation::{create_generator, TextGenerator};
use crate::store::{create_store, SearchFilter, VectorStore};
use crate::types::{MemoryMetadata, MemoryResult, RecordId, Role};

/// Number of results `retrieve_context` puts in the context block.
pub const CONTEXT_TOP_K: usize = 5;

const UNINITIALIZED: u8 = 0;
const READY: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle of a fabric. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FabricState {
    Uninitialized,
    Ready,
    Closed,
}

/// What the last `retrieve_context` call did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub context_chunks: usize,
    pub processing_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    /// The search key actually embedded: the rewritten query, or the raw one.
    pub used_query: String,
}

/// Cheaply cloneable handle; clones share the store, queue and state.
#[derive(Clone)]
pub struct MemoryFabric {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    clara: Clara,
    queue: WriteQueue,
    default_attribution: RwLock<Attribution>,
    /// Stamped on writes whose attribution has no session of its own.
    session_id: String,
    last_run: Mutex<Option<ExecutionStats>>,
    state: AtomicU8,
    closing: AtomicBool,
    init_lock: tokio::sync::Mutex<()>,
}

impl MemoryFabric {
    pub fn builder(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> FabricBuilder {
        FabricBuilder::new(store, embedder)
    }

    /// Build store, embedder and generators from configuration.
    ///
    /// The returned fabric is still uninitialized.
    pub fn from_config(config: &FabricConfig) -> FabricResult<Self> {
        config.validate()?;

        let embedder = create_embedder(&config.embedding)?;
        let store = create_store(&config.storage, config.embedding.dimensions)?;
        let generator = create_generator(&config.generation)?;

        let optimization = &config.optimization;
        let compressor = match &optimization.compressor {
            Some(section) if optimization.compression => create_generator(section)?,
            _ => None,
        };
        let reasoner = match &optimization.reasoner {
            Some(section) if optimization.reasoning => create_generator(section)?,
            _ => None,
        };

        let defaults = Attribution::default();
        let attribution = Attribution::new(
            config
                .attribution
                .entity_id
                .clone()
                .unwrap_or_else(|| defaults.entity_id().to_string()),
            config
                .attribution
                .process_id
                .clone()
                .unwrap_or_else(|| defaults.process_id().to_string()),
        );

        let mut builder = FabricBuilder::new(store, embedder)
            .attribution(attribution)
            .compression(optimization.compression)
            .reasoning(optimization.reasoning);
        builder.generator = generator;
        builder.compressor = compressor;
        builder.reasoner = reasoner;
        builder.compression_prompt = optimization.compression_prompt.clone();
        builder.reasoning_prompt = optimization.reasoning_prompt.clone();
        builder.session_id = config.attribution.session_id.clone();
        builder.build()
    }

    /// Prepare the store. Idempotent once Ready.
    pub async fn init(&self) -> FabricResult<()> {
        let _guard = self.inner.init_lock.lock().await;
        match self.state() {
            FabricState::Ready => return Ok(()),
            FabricState::Closed => return Err(FabricError::Closed),
            FabricState::Uninitialized => {}
        }
        if self.inner.closing.load(Ordering::SeqCst) {
            return Err(FabricError::Closed);
        }

        let store = &self.inner.store;
        store.init().await?;
        store
            .check_embedding_model(self.inner.embedder.model_name())
            .await?;
        self.inner.state.store(READY, Ordering::SeqCst);
        info!(
            backend = store.backend(),
            dimension = store.dimension(),
            model = self.inner.embedder.model_name(),
            compression = self.inner.clara.compression.is_enabled(),
            reasoning = self.inner.clara.reasoning.is_enabled(),
            "memory fabric ready"
        );
        Ok(())
    }

    pub fn state(&self) -> FabricState {
        match self.inner.state.load(Ordering::SeqCst) {
            READY => FabricState::Ready,
            CLOSED => FabricState::Closed,
            _ => FabricState::Uninitialized,
        }
    }

    /// Replace the default attribution used by the non-`_with` calls.
    ///
    /// Calls already in flight keep the attribution they started with.
    pub fn attribution(&self, entity_id: impl Into<String>, process_id: impl Into<String>) {
        self.set_attribution(Attribution::new(entity_id, process_id));
    }

    pub fn set_attribution(&self, attribution: Attribution) {
        *self
            .inner
            .default_attribution
            .write()
            .unwrap_or_else(|p| p.into_inner()) = attribution;
    }

    /// Snapshot of the default attribution.
    pub fn current_attribution(&self) -> Attribution {
        self.inner
            .default_attribution
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// A handle bound to one attribution for its lifetime.
    pub fn scoped(&self, attribution: Attribution) -> ScopedFabric {
        ScopedFabric {
            fabric: self.clone(),
            attribution,
        }
    }

    pub async fn add_memory(&self, content: &str, role: Role) -> FabricResult<RecordId> {
        let attribution = self.current_attribution();
        self.add_memory_with(&attribution, content, role).await
    }

    /// Store `content` for `attribution`, compressing first when enabled.
    ///
    /// Embedding and storage failures are returned; compression failures
    /// fall back to the raw content.
    pub async fn add_memory_with(
        &self,
        attribution: &Attribution,
        content: &str,
        role: Role,
    ) -> FabricResult<RecordId> {
        self.ensure_ready()?;
        self.inner.write(attribution, content, role).await
    }

    pub async fn search(&self, query: &str, limit: usize) -> FabricResult<Vec<MemoryResult>> {
        let attribution = self.current_attribution();
        self.search_with(&attribution, query, limit).await
    }

    /// Nearest records to the raw `query` within `attribution`. No query
    /// rewriting happens here.
    pub async fn search_with(
        &self,
        attribution: &Attribution,
        query: &str,
        limit: usize,
    ) -> FabricResult<Vec<MemoryResult>> {
        self.ensure_ready()?;
        self.inner.search(&attribution.filter(), query, limit).await
    }

    pub async fn retrieve_context(&self, query: &str) -> FabricResult<String> {
        let attribution = self.current_attribution();
        self.retrieve_context_with(&attribution, query).await
    }

    /// Context block for an LLM turn: one `- <content> (score: <distance>)`
    /// line per hit, best first.
    ///
    /// Search failures are logged and yield an empty block; only lifecycle
    /// violations are returned as errors.
    pub async fn retrieve_context_with(
        &self,
        attribution: &Attribution,
        query: &str,
    ) -> FabricResult<String> {
        self.ensure_ready()?;
        let started = Instant::now();

        let used_query = self.inner.clara.reasoning.reason(query).await;
        let results = match self
            .inner
            .search(&attribution.filter(), &used_query, CONTEXT_TOP_K)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                if let Some(lifecycle) = lifecycle_error(&e) {
                    return Err(lifecycle);
                }
                warn!(
                    entity = attribution.entity_id(),
                    error = %e,
                    "context retrieval failed, returning empty context"
                );
                Vec::new()
            }
        };

        let context = format_context(&results);
        let stats = ExecutionStats {
            context_chunks: results.len(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
            used_query,
        };
        debug!(
            chunks = stats.context_chunks,
            ms = stats.processing_time_ms,
            "context retrieved"
        );
        *self.inner.last_run.lock().unwrap_or_else(|p| p.into_inner()) = Some(stats);
        Ok(context)
    }

    /// Stats of the most recent `retrieve_context` call.
    pub fn last_run(&self) -> Option<ExecutionStats> {
        self.inner
            .last_run
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Fire-and-forget `add_memory` under the current default attribution.
    pub fn queue_memory(&self, content: impl Into<String>, role: Role) -> bool {
        let attribution = self.current_attribution();
        self.queue_memory_with(attribution, content, role)
    }

    /// Spawn a write without waiting for it. Failures are logged only.
    ///
    /// Returns whether the write was accepted; writes before `init` or after
    /// `close` are dropped.
    pub fn queue_memory_with(
        &self,
        attribution: Attribution,
        content: impl Into<String>,
        role: Role,
    ) -> bool {
        if let Err(e) = self.ensure_ready() {
            warn!(error = %e, "queued write dropped");
            return false;
        }
        let content = content.into();
        let inner = Arc::clone(&self.inner);
        let accepted = self.inner.queue.submit(async move {
            if let Err(e) = inner.write(&attribution, &content, role).await {
                warn!(
                    entity = attribution.entity_id(),
                    process = attribution.process_id(),
                    error = %e,
                    "queued write failed"
                );
            }
        });
        if !accepted {
            warn!("write queue closed, queued write dropped");
        }
        accepted
    }

    /// Await the queued writes submitted before this call and return how many
    /// settled. Writes queued meanwhile belong to the next call. Dropping the
    /// returned future leaves the writes running.
    pub async fn wait(&self) -> usize {
        self.inner.queue.drain().await
    }

    /// Queued writes still running.
    pub fn pending(&self) -> usize {
        self.inner.queue.pending()
    }

    /// Delete one record.
    pub async fn forget(&self, id: RecordId) -> FabricResult<()> {
        self.ensure_ready()?;
        self.inner.store.delete(id).await?;
        debug!(id, "memory forgotten");
        Ok(())
    }

    pub async fn count(&self) -> FabricResult<u64> {
        let attribution = self.current_attribution();
        self.count_with(&attribution).await
    }

    pub async fn count_with(&self, attribution: &Attribution) -> FabricResult<u64> {
        self.ensure_ready()?;
        Ok(self.inner.store.count(&attribution.filter()).await?)
    }

    /// Records across every tenant.
    pub async fn count_all(&self) -> FabricResult<u64> {
        self.ensure_ready()?;
        Ok(self.inner.store.count(&SearchFilter::default()).await?)
    }

    /// Stop accepting queued writes, drain all of them, then close the store.
    ///
    /// A second call returns [`FabricError::Closed`].
    pub async fn close(&self) -> FabricResult<()> {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return Err(FabricError::Closed);
        }
        let drained = self.inner.queue.close().await;
        let result = self.inner.store.close().await;
        self.inner.state.store(CLOSED, Ordering::SeqCst);
        info!(drained, "memory fabric closed");
        Ok(result?)
    }

    fn ensure_ready(&self) -> FabricResult<()> {
        if self.inner.closing.load(Ordering::SeqCst) {
            return Err(FabricError::Closed);
        }
        match self.state() {
            FabricState::Ready => Ok(()),
            FabricState::Closed => Err(FabricError::Closed),
            FabricState::Uninitialized => Err(FabricError::NotInitialized),
        }
    }
}

impl Inner {
    /// The write path, without lifecycle checks so queued writes can finish
    /// while the fabric is closing.
    async fn write(
        &self,
        attribution: &Attribution,
        content: &str,
        role: Role,
    ) -> FabricResult<RecordId> {
        if content.trim().is_empty() {
            return Err(FabricError::InvalidInput("memory content is empty".into()));
        }

        let mut metadata = MemoryMetadata {
            role: Some(role),
            created_at: Some(Utc::now().to_rfc3339()),
            ..Default::default()
        };
        attribution.stamp(&mut metadata, &self.session_id);

        let indexed = match self.clara.compression.compress(content).await {
            Some(compressed) => {
                metadata.original_content = Some(content.to_string());
                metadata.is_compressed = Some(true);
                compressed
            }
            None => content.to_string(),
        };

        let vector = self.embed(&indexed).await?;
        let id = self.store.insert(&indexed, &vector, &metadata).await?;
        debug!(
            id,
            entity = attribution.entity_id(),
            process = attribution.process_id(),
            compressed = metadata.is_compressed.unwrap_or(false),
            "memory added"
        );
        Ok(id)
    }

    async fn search(
        &self,
        filter: &SearchFilter,
        query: &str,
        limit: usize,
    ) -> FabricResult<Vec<MemoryResult>> {
        let vector = self.embed(query).await?;
        let results = self.store.search(&vector, limit, filter).await?;
        debug!(limit, hits = results.len(), "search complete");
        Ok(results)
    }

    async fn embed(&self, text: &str) -> FabricResult<Vec<f32>> {
        let vector = self.embedder.embed(text).await?;
        let expected = self.store.dimension();
        if vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            }
            .into());
        }
        Ok(vector)
    }
}

/// Lifecycle failures that must not be degraded to an empty context.
fn lifecycle_error(e: &FabricError) -> Option<FabricError> {
    match e {
        FabricError::Closed | FabricError::Storage(StorageError::Closed) => {
            Some(FabricError::Closed)
        }
        FabricError::NotInitialized | FabricError::Storage(StorageError::NotInitialized) => {
            Some(FabricError::NotInitialized)
        }
        _ => None,
    }
}

fn format_context(results: &[MemoryResult]) -> String {
    results
        .iter()
        .map(|r| format!("- {} (score: {:.4})", r.content, r.distance))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A [`MemoryFabric`] handle bound to one [`Attribution`].
///
/// Lets concurrent tenants share one fabric without touching its default
/// attribution.
#[derive(Clone)]
pub struct ScopedFabric {
    fabric: MemoryFabric,
    attribution: Attribution,
}

impl ScopedFabric {
    pub fn attribution(&self) -> &Attribution {
        &self.attribution
    }

    pub async fn add_memory(&self, content: &str, role: Role) -> FabricResult<RecordId> {
        self.fabric
            .add_memory_with(&self.attribution, content, role)
            .await
    }

    pub async fn search(&self, query: &str, limit: usize) -> FabricResult<Vec<MemoryResult>> {
        self.fabric.search_with(&self.attribution, query, limit).await
    }

    pub async fn retrieve_context(&self, query: &str) -> FabricResult<String> {
        self.fabric
            .retrieve_context_with(&self.attribution, query)
            .await
    }

    pub fn queue_memory(&self, content: impl Into<String>, role: Role) -> bool {
        self.fabric
            .queue_memory_with(self.attribution.clone(), content, role)
    }

    pub async fn count(&self) -> FabricResult<u64> {
        self.fabric.count_with(&self.attribution).await
    }
}

/// Assembles a [`MemoryFabric`] from already-built collaborators.
pub struct FabricBuilder {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    generator: Option<Arc<dyn TextGenerator>>,
    compressor: Option<Arc<dyn TextGenerator>>,
    reasoner: Option<Arc<dyn TextGenerator>>,
    compression: bool,
    reasoning: bool,
    compression_prompt: Option<String>,
    reasoning_prompt: Option<String>,
    attribution: Attribution,
    session_id: Option<String>,
}

impl FabricBuilder {
    fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            generator: None,
            compressor: None,
            reasoner: None,
            compression: false,
            reasoning: false,
            compression_prompt: None,
            reasoning_prompt: None,
            attribution: Attribution::default(),
            session_id: None,
        }
    }

    /// Primary generator, used by any stage without its own.
    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn compressor(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.compressor = Some(generator);
        self
    }

    pub fn reasoner(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.reasoner = Some(generator);
        self
    }

    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    pub fn reasoning(mut self, enabled: bool) -> Self {
        self.reasoning = enabled;
        self
    }

    pub fn compression_prompt(mut self, instruction: impl Into<String>) -> Self {
        self.compression_prompt = Some(instruction.into());
        self
    }

    pub fn reasoning_prompt(mut self, instruction: impl Into<String>) -> Self {
        self.reasoning_prompt = Some(instruction.into());
        self
    }

    /// Initial default attribution.
    pub fn attribution(mut self, attribution: Attribution) -> Self {
        self.attribution = attribution;
        self
    }

    /// Session stamped on writes whose attribution has none. Defaults to a
    /// fresh UUIDv7 per fabric.
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn build(self) -> FabricResult<MemoryFabric> {
        let (embedded, stored) = (self.embedder.dimensions(), self.store.dimension());
        if embedded != stored {
            return Err(FabricError::config(format!(
                "embedder produces {embedded}-dimensional vectors but the store expects {stored}"
            )));
        }

        let compression = CompressionStage::new(
            self.compression,
            self.compression_prompt,
            self.compressor.or_else(|| self.generator.clone()),
        );
        let reasoning = ReasoningStage::new(
            self.reasoning,
            self.reasoning_prompt,
            self.reasoner.or(self.generator),
        );

        Ok(MemoryFabric {
            inner: Arc::new(Inner {
                store: self.store,
                embedder: self.embedder,
                clara: Clara::new(compression, reasoning),
                queue: WriteQueue::new(),
                default_attribution: RwLock::new(self.attribution),
                session_id: self
                    .session_id
                    .unwrap_or_else(|| uuid::Uuid::now_v7().to_string()),
                last_run: Mutex::new(None),
                state: AtomicU8::new(UNINITIALIZED),
                closing: AtomicBool::new(false),
                init_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }
}
