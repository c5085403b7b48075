//! One unit-length vector per corpus record, indexable by `row_index`.

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array2, ArrayView1, Axis};

use super::matrix::{decode_matrix, encode_matrix};
use crate::corpus::Corpus;
use crate::db::ArtifactStore;
use crate::embedding::{l2_normalize, EmbeddingProvider, Framing};
use crate::error::{EngineError, Result};

pub const VECTORS_KEY: &str = "vectors";

#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    vectors: Array2<f32>,
}

/// A corpus row scored against a query over the whole store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowSimilarity {
    pub row_index: usize,
    pub similarity: f32,
}

impl EmbeddingStore {
    pub fn from_matrix(vectors: Array2<f32>) -> Self {
        Self { vectors }
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.vectors.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.nrows() == 0
    }

    pub fn dim(&self) -> usize {
        self.vectors.ncols()
    }

    pub fn matrix(&self) -> &Array2<f32> {
        &self.vectors
    }

    /// Vector for `row_index`. Never substitutes a neighbor or a stale row.
    pub fn vector_for(&self, row_index: usize) -> Result<ArrayView1<'_, f32>> {
        if row_index >= self.len() {
            return Err(EngineError::IndexOutOfRange {
                what: "embedding row",
                index: row_index,
                len: self.len(),
            });
        }
        Ok(self.vectors.row(row_index))
    }

    /// Copy the listed rows, in order, into a new matrix.
    pub fn select_rows(&self, rows: &[usize]) -> Result<Array2<f32>> {
        if let Some(&bad) = rows.iter().find(|&&r| r >= self.len()) {
            return Err(EngineError::IndexOutOfRange {
                what: "embedding row",
                index: bad,
                len: self.len(),
            });
        }
        Ok(self.vectors.select(Axis(0), rows))
    }

    /// The `n` rows most similar to `query` by dot product, highest first
    /// (ties: lower `row_index`).
    pub fn most_similar(&self, query: ArrayView1<f32>, n: usize) -> Result<Vec<RowSimilarity>> {
        if query.len() != self.dim() {
            return Err(EngineError::Other(anyhow::anyhow!(
                "query has {} dimensions, store holds {}",
                query.len(),
                self.dim()
            )));
        }

        let sims = self.vectors.dot(&query);
        let mut scored: Vec<RowSimilarity> = sims
            .iter()
            .enumerate()
            .map(|(row_index, &similarity)| RowSimilarity {
                row_index,
                similarity,
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.row_index.cmp(&b.row_index))
        });
        scored.truncate(n);
        Ok(scored)
    }

    /// Check the store against the corpus and the embedding model.
    pub fn validate(&self, corpus: &Corpus, dimensions: usize) -> Result<()> {
        if self.len() != corpus.len() {
            return Err(EngineError::ArtifactInvalid(format!(
                "{} stored vectors, corpus has {} rows",
                self.len(),
                corpus.len()
            )));
        }
        if !self.is_empty() && self.dim() != dimensions {
            return Err(EngineError::ArtifactInvalid(format!(
                "stored vectors have {} dimensions, model produces {dimensions}",
                self.dim()
            )));
        }
        Ok(())
    }

    /// Embed every corpus record with passage framing. O(corpus) model calls.
    pub fn compute(
        corpus: &Corpus,
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Self> {
        let total = corpus.len();
        let dim = provider.dimensions();
        tracing::warn!(rows = total, "recomputing embeddings for the whole corpus");

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {bar:40.cyan/blue} {pos}/{len} ({eta})")
                .map_err(anyhow::Error::from)?
                .progress_chars("##-"),
        );

        let started = std::time::Instant::now();
        let mut vectors = Array2::<f32>::zeros((total, dim));

        for (chunk_no, chunk) in corpus.records().chunks(batch_size.max(1)).enumerate() {
            let texts: Vec<String> = chunk
                .iter()
                .map(|r| Framing::Passage.apply(&r.text))
                .collect();
            let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();

            let embeddings = provider
                .embed_batch(&text_refs)
                .map_err(EngineError::Embedding)?;
            if embeddings.len() != chunk.len() {
                return Err(EngineError::Embedding(anyhow::anyhow!(
                    "batch {chunk_no}: {} vectors for {} texts",
                    embeddings.len(),
                    chunk.len()
                )));
            }

            for (record, emb) in chunk.iter().zip(embeddings) {
                if emb.len() != dim {
                    return Err(EngineError::Embedding(anyhow::anyhow!(
                        "row {}: {} dimensions, expected {dim}",
                        record.row_index,
                        emb.len()
                    )));
                }
                let unit = l2_normalize(&emb);
                vectors
                    .row_mut(record.row_index)
                    .assign(&ArrayView1::from(unit.as_slice()));
            }

            pb.inc(chunk.len() as u64);
        }

        pb.finish_and_clear();
        tracing::info!(
            rows = total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "embeddings computed"
        );

        Ok(Self { vectors })
    }

    pub fn persist(&self, artifacts: &ArtifactStore) -> Result<()> {
        artifacts.put(VECTORS_KEY, &encode_matrix(&self.vectors))?;
        tracing::info!(rows = self.len(), dim = self.dim(), "embeddings persisted");
        Ok(())
    }

    /// Read persisted vectors. Absent is [`EngineError::ArtifactMissing`].
    pub fn load(artifacts: &ArtifactStore) -> Result<Self> {
        let bytes = artifacts
            .get(VECTORS_KEY)?
            .ok_or_else(|| EngineError::ArtifactMissing(VECTORS_KEY.to_string()))?;
        Ok(Self {
            vectors: decode_matrix(VECTORS_KEY, &bytes)?,
        })
    }
}
