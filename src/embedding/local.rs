//! Local ONNX Runtime embedding provider.
//!
//! Implements [`EmbeddingProvider`] using the multilingual-e5-small model via `ort`.
//! Handles tokenization, inference, mean pooling, and L2 normalization.

use std::sync::Mutex;

use anyhow::{Context, Result};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{l2_normalize, EmbeddingProvider, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;

/// Maximum sequence length for multilingual-e5-small.
const MAX_SEQ_LEN: usize = 512;

/// Local ONNX-based embedding provider.
///
/// The session sits behind a mutex: concurrent callers are serialized through
/// one forward pass at a time.
pub struct LocalEmbeddingProvider {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

impl LocalEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let cache_dir = crate::config::expand_tilde(&config.cache_dir);
        let model_path = cache_dir.join("model.onnx");
        let tokenizer_path = cache_dir.join("tokenizer.json");

        anyhow::ensure!(
            model_path.exists(),
            "ONNX model not found at {}. Run `hsknn model download` first.",
            model_path.display()
        );
        anyhow::ensure!(
            tokenizer_path.exists(),
            "Tokenizer not found at {}. Run `hsknn model download` first.",
            tokenizer_path.display()
        );

        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&model_path)
            .context("failed to load ONNX model")?;

        tracing::info!(model = %model_path.display(), "ONNX model loaded");

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;

        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        tracing::info!(tokenizer = %tokenizer_path.display(), "tokenizer loaded");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }
}

impl EmbeddingProvider for LocalEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .context("embedding batch returned no vectors")
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

        let batch_size = encodings.len();
        let seq_len = encodings[0].get_ids().len();

        let mut input_ids_flat = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask_flat = Vec::with_capacity(batch_size * seq_len);

        for encoding in &encodings {
            input_ids_flat.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask_flat.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }

        let shape = vec![batch_size as i64, seq_len as i64];
        let input_ids_tensor =
            Tensor::from_array((shape.clone(), input_ids_flat.into_boxed_slice()))?;
        let attention_mask_tensor =
            Tensor::from_array((shape.clone(), attention_mask_flat.clone().into_boxed_slice()))?;
        // token_type_ids: all zeros (single segment)
        let token_type_ids = vec![0i64; batch_size * seq_len];
        let token_type_ids_tensor =
            Tensor::from_array((shape, token_type_ids.into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;

        let outputs = session.run(ort::inputs! {
            "input_ids" => input_ids_tensor,
            "attention_mask" => attention_mask_tensor,
            "token_type_ids" => token_type_ids_tensor,
        })?;

        // Output name varies by export; fall back to the first output.
        let token_emb_value = outputs
            .get("last_hidden_state")
            .or_else(|| outputs.get("token_embeddings"))
            .unwrap_or_else(|| &outputs[0]);

        let (shape, data) = token_emb_value
            .try_extract_tensor::<f32>()
            .context("failed to extract last_hidden_state tensor")?;

        let dims: &[i64] = &shape;
        anyhow::ensure!(
            dims.len() == 3 && dims[2] == EMBEDDING_DIM as i64,
            "unexpected hidden state shape: {dims:?}, expected [batch, seq, {EMBEDDING_DIM}]"
        );
        let hidden_dim = dims[2] as usize;
        let actual_seq_len = dims[1] as usize;

        Ok((0..batch_size)
            .map(|b| {
                mean_pool(
                    &data[b * actual_seq_len * hidden_dim..(b + 1) * actual_seq_len * hidden_dim],
                    &attention_mask_flat[b * seq_len..(b + 1) * seq_len],
                    hidden_dim,
                )
            })
            .map(|pooled| l2_normalize(&pooled))
            .collect())
    }
}

/// Average the token vectors whose attention mask is set.
fn mean_pool(tokens: &[f32], mask: &[i64], hidden_dim: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; hidden_dim];
    let mut count = 0.0f32;

    for (s, &m) in mask.iter().enumerate() {
        let offset = s * hidden_dim;
        if m > 0 && offset + hidden_dim <= tokens.len() {
            for (acc, x) in sum.iter_mut().zip(&tokens[offset..offset + hidden_dim]) {
                *acc += x;
            }
            count += 1.0;
        }
    }

    if count > 0.0 {
        for x in &mut sum {
            *x /= count;
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_pool_skips_padding() {
        // two tokens of dim 2, second one is padding
        let tokens = vec![1.0, 3.0, 100.0, 100.0];
        let pooled = mean_pool(&tokens, &[1, 0], 2);
        assert_eq!(pooled, vec![1.0, 3.0]);
    }

    #[test]
    fn mean_pool_all_masked_is_zero() {
        let pooled = mean_pool(&[5.0, 5.0], &[0], 2);
        assert_eq!(pooled, vec![0.0, 0.0]);
    }

    fn test_config() -> EmbeddingConfig {
        EmbeddingConfig {
            cache_dir: dirs::home_dir()
                .expect("home dir")
                .join(".hsknn/models")
                .to_string_lossy()
                .into_owned(),
            ..Default::default()
        }
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

    #[test]
    #[ignore] // Requires model files: cargo test -- --ignored
    fn test_embed_produces_384_dims() {
        let provider = LocalEmbeddingProvider::new(&test_config()).unwrap();
        let embedding = provider.embed("query: frozen shrimp").unwrap();
        assert_eq!(embedding.len(), EMBEDDING_DIM);
    }

    #[test]
    #[ignore]
    fn test_embed_is_l2_normalized() {
        let provider = LocalEmbeddingProvider::new(&test_config()).unwrap();
        let embedding = provider.embed("passage: Refined white sugar 50kg bags").unwrap();
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4, "L2 norm should be ~1.0, got {norm}");
    }

    #[test]
    #[ignore]
    fn test_embed_consistency() {
        let provider = LocalEmbeddingProvider::new(&test_config()).unwrap();
        let emb1 = provider.embed("query: Lithium battery for electric car").unwrap();
        let emb2 = provider.embed("query: Lithium battery for electric car").unwrap();
        assert_eq!(emb1, emb2, "same input must produce identical output");
    }

    #[test]
    #[ignore]
    fn test_multilingual_neighbors() {
        let provider = LocalEmbeddingProvider::new(&test_config()).unwrap();
        let shrimp_en = provider.embed("query: frozen shrimp").unwrap();
        let shrimp_vi = provider.embed("query: Tôm đông lạnh xuất khẩu").unwrap();
        let laptop = provider.embed("query: Laptop computer 14 inch").unwrap();

        assert!(
            cosine_similarity(&shrimp_en, &shrimp_vi) > cosine_similarity(&shrimp_en, &laptop),
            "translations should sit closer than unrelated goods"
        );
    }

    #[test]
    #[ignore]
    fn test_empty_batch() {
        let provider = LocalEmbeddingProvider::new(&test_config()).unwrap();
        assert!(provider.embed_batch(&[]).unwrap().is_empty());
    }
}
