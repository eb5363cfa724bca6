//! Text-to-vector embedding collaborators.
//!
//! Provides the [`Embedder`] trait and three implementations: a local ONNX
//! model ([`local`]), an OpenAI-compatible HTTP endpoint ([`openai`]), and a
//! deterministic hashing embedder ([`hash`]). The provider is created via
//! [`create_embedder`] from configuration.

pub mod hash;
pub mod local;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::error::{EmbeddingError, FabricError};

/// Trait for embedding text into vectors.
///
/// Every vector an implementation returns has exactly [`dimensions`](Embedder::dimensions)
/// elements.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Number of dimensions this provider produces.
    fn dimensions(&self) -> usize;

    /// Model identifier, recorded by stores that can keep it.
    fn model_name(&self) -> &str;

    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch of text strings. Implementations may override for batched inference.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Create an embedding provider from config.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, FabricError> {
    match config.provider {
        EmbeddingProviderKind::Local => {
            let embedder = local::LocalEmbedder::new(config)?;
            Ok(Arc::new(embedder))
        }
        EmbeddingProviderKind::OpenAi => {
            let embedder = openai::OpenAiEmbedder::from_config(config)?;
            Ok(Arc::new(embedder))
        }
        EmbeddingProviderKind::Hash => {
            let embedder = hash::HashEmbedder::new(config.dimensions)?;
            Ok(Arc::new(embedder))
        }
    }
}

/// L2-normalize a vector. Returns the input unchanged if its norm is zero.
pub(crate) fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}
