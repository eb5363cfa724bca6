//! Local ONNX Runtime embedding provider.
//!
//! Loads a sentence-transformers ONNX export (`model.onnx` + `tokenizer.json`)
//! from the configured cache directory. Inference is mean pooling over the
//! attention mask followed by L2 normalization, and runs on the blocking
//! pool so it never stalls the async runtime.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{l2_normalize, Embedder};
use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, FabricError};

/// Maximum sequence length fed to the model.
const MAX_SEQ_LEN: usize = 256;

pub struct LocalEmbedder {
    inner: Arc<Inner>,
    model: String,
    dimensions: usize,
}

struct Inner {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimensions: usize,
}

impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, FabricError> {
        let cache_dir = crate::config::expand_tilde(&config.cache_dir);
        let model_path = cache_dir.join("model.onnx");
        let tokenizer_path = cache_dir.join("tokenizer.json");

        if !model_path.exists() || !tokenizer_path.exists() {
            return Err(FabricError::config(format!(
                "ONNX model or tokenizer missing under {}. Run `memfabric model download` first.",
                cache_dir.display()
            )));
        }

        let load_err = |e: &dyn std::fmt::Display| {
            FabricError::config(format!("failed to load ONNX model: {e}"))
        };
        let session = Session::builder()
            .map_err(|e| load_err(&e))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| load_err(&e))?
            .with_intra_threads(4)
            .map_err(|e| load_err(&e))?
            .commit_from_file(&model_path)
            .map_err(|e| load_err(&e))?;
        tracing::info!(model = %model_path.display(), "ONNX model loaded");

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| FabricError::config(format!("failed to load tokenizer: {e}")))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| FabricError::config(format!("failed to set truncation: {e}")))?;
        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        Ok(Self {
            inner: Arc::new(Inner {
                session: Mutex::new(session),
                tokenizer,
                dimensions: config.dimensions,
            }),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text])
            .await?
            .pop()
            .ok_or_else(|| EmbeddingError::Model("model returned no embedding".into()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let inner = Arc::clone(&self.inner);
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        tokio::task::spawn_blocking(move || inner.run(owned))
            .await
            .map_err(|e| EmbeddingError::Task(e.to_string()))?
    }
}

impl Inner {
    fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model_err = |e: &dyn std::fmt::Display| EmbeddingError::Model(e.to_string());

        let encodings = self
            .tokenizer
            .encode_batch(texts, true)
            .map_err(|e| EmbeddingError::Model(format!("tokenization failed: {e}")))?;

        let batch_size = encodings.len();
        let seq_len = encodings[0].get_ids().len();

        let mut input_ids = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask = Vec::with_capacity(batch_size * seq_len);
        for encoding in &encodings {
            input_ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }

        let shape = vec![batch_size as i64, seq_len as i64];
        let ids_tensor = Tensor::from_array((shape.clone(), input_ids.into_boxed_slice()))
            .map_err(|e| model_err(&e))?;
        let mask_tensor =
            Tensor::from_array((shape.clone(), attention_mask.clone().into_boxed_slice()))
                .map_err(|e| model_err(&e))?;
        // Single-segment input: token types are all zero.
        let type_tensor =
            Tensor::from_array((shape, vec![0i64; batch_size * seq_len].into_boxed_slice()))
                .map_err(|e| model_err(&e))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbeddingError::Model(format!("session lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs! {
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor,
                "token_type_ids" => type_tensor,
            })
            .map_err(|e| model_err(&e))?;

        // Output name varies by export.
        let token_embeddings = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);
        let (out_shape, data) = token_embeddings
            .try_extract_tensor::<f32>()
            .map_err(|e| model_err(&e))?;

        let dims: &[i64] = &out_shape;
        if dims.len() != 3 {
            return Err(EmbeddingError::Model(format!(
                "unexpected token_embeddings shape {dims:?}"
            )));
        }
        let hidden = dims[2] as usize;
        if hidden != self.dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions,
                actual: hidden,
            });
        }
        let out_seq = dims[1] as usize;

        Ok((0..batch_size)
            .map(|b| {
                let mut sum = vec![0.0f32; hidden];
                let mut count = 0.0f32;
                for s in 0..out_seq {
                    let mask = attention_mask[b * seq_len + s] as f32;
                    if mask > 0.0 {
                        let offset = (b * out_seq + s) * hidden;
                        for (d, acc) in sum.iter_mut().enumerate() {
                            *acc += data[offset + d] * mask;
                        }
                        count += mask;
                    }
                }
                if count > 0.0 {
                    sum.iter_mut().for_each(|x| *x /= count);
                }
                l2_normalize(&sum)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> EmbeddingConfig {
        EmbeddingConfig::default()
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        dot / (norm_a * norm_b)
    }

    #[tokio::test]
    #[ignore] // Requires model files: run `memfabric model download`, then `cargo test -- --ignored`
    async fn embed_produces_configured_dims() {
        let embedder = LocalEmbedder::new(&test_config()).unwrap();
        let v = embedder.embed("Hello world").await.unwrap();
        assert_eq!(v.len(), 384);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    #[ignore]
    async fn similar_texts_are_closer() {
        let embedder = LocalEmbedder::new(&test_config()).unwrap();
        let batch = embedder
            .embed_batch(&[
                "The cat sat on the mat",
                "A cat was sitting on a mat",
                "Quantum computing uses qubits",
            ])
            .await
            .unwrap();
        assert!(cosine_similarity(&batch[0], &batch[1]) > cosine_similarity(&batch[0], &batch[2]));
    }
}
