//! Deterministic hashing embedder.
//!
//! Each whitespace token is hashed into a bucket of the output vector
//! (feature hashing), then the vector is L2-normalized. Texts sharing words
//! land close together; identical texts produce identical vectors. No model
//! files and no network, which makes it the embedder of choice for tests and
//! air-gapped installs.

use async_trait::async_trait;

use super::{l2_normalize, Embedder};
use crate::error::{EmbeddingError, FabricError};

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Result<Self, FabricError> {
        if dimensions == 0 {
            return Err(FabricError::config("embedding dimension must be positive"));
        }
        Ok(Self { dimensions })
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for token in text.split_whitespace() {
            let token = token.to_lowercase();
            let h = fnv1a(token.as_bytes());
            let bucket = (h % self.dimensions as u64) as usize;
            // One hash bit picks the sign so unrelated tokens tend to cancel.
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        l2_normalize(&v)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "feature-hash"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}
