//! Brute-force k-nearest-neighbor model with cosine distance and distance-weighted votes.
//!
//! Positions returned by [`KnnModel::kneighbors`] are *fit indexes*: rows of the
//! sample matrix the model was fit on. They say nothing about corpus identity.

use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Fit-time parameters, persisted next to the sample matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnParams {
    pub k: usize,
    pub n_classes: usize,
    /// Encoded class id of each fitted sample, in fit order.
    pub targets: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct KnnModel {
    params: KnnParams,
    samples: Array2<f32>,
    norms: Vec<f32>,
}

/// One fitted sample near a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitNeighbor {
    pub fit_index: usize,
    /// Cosine distance in `[0, 2]`.
    pub distance: f32,
}

impl KnnModel {
    /// Fit on `samples` (one row per sample) with class ids `targets`.
    ///
    /// `k` is clamped to the sample count.
    pub fn fit(samples: Array2<f32>, targets: Vec<usize>, n_classes: usize, k: usize) -> Result<Self> {
        let n = samples.nrows();
        if n == 0 {
            return Err(EngineError::ClassifierUnfit("no samples to fit".into()));
        }
        if targets.len() != n {
            return Err(EngineError::Other(anyhow::anyhow!(
                "{} targets for {n} samples",
                targets.len()
            )));
        }
        if let Some(&bad) = targets.iter().find(|&&t| t >= n_classes) {
            return Err(EngineError::IndexOutOfRange {
                what: "class id",
                index: bad,
                len: n_classes,
            });
        }

        let params = KnnParams {
            k: k.clamp(1, n),
            n_classes,
            targets,
        };
        Self::from_parts(params, samples)
    }

    /// Reassemble a persisted model, checking that its pieces agree.
    pub fn from_parts(params: KnnParams, samples: Array2<f32>) -> Result<Self> {
        let n = samples.nrows();
        if params.targets.len() != n {
            return Err(EngineError::ArtifactInvalid(format!(
                "classifier has {} targets for {n} samples",
                params.targets.len()
            )));
        }
        if params.k == 0 || params.k > n {
            return Err(EngineError::ArtifactInvalid(format!(
                "classifier k={} with {n} samples",
                params.k
            )));
        }
        if params.targets.iter().any(|&t| t >= params.n_classes) {
            return Err(EngineError::ArtifactInvalid(
                "classifier target outside its class range".into(),
            ));
        }

        let norms = samples
            .axis_iter(Axis(0))
            .map(|row| row.dot(&row).sqrt())
            .collect();

        Ok(Self {
            params,
            samples,
            norms,
        })
    }

    pub fn params(&self) -> &KnnParams {
        &self.params
    }

    pub fn samples(&self) -> &Array2<f32> {
        &self.samples
    }

    /// Number of samples the model was fit on.
    pub fn fit_size(&self) -> usize {
        self.samples.nrows()
    }

    pub fn k(&self) -> usize {
        self.params.k
    }

    pub fn n_classes(&self) -> usize {
        self.params.n_classes
    }

    pub fn dim(&self) -> usize {
        self.samples.ncols()
    }

    /// Class id of a fitted sample.
    pub fn target(&self, fit_index: usize) -> Result<usize> {
        self.params
            .targets
            .get(fit_index)
            .copied()
            .ok_or(EngineError::IndexOutOfRange {
                what: "classifier sample",
                index: fit_index,
                len: self.params.targets.len(),
            })
    }

    /// The `n` nearest fitted samples, nearest first. Equal distances keep fit order.
    pub fn kneighbors(&self, query: ArrayView1<f32>, n: usize) -> Result<Vec<FitNeighbor>> {
        if query.len() != self.dim() {
            return Err(EngineError::Other(anyhow::anyhow!(
                "query has {} dimensions, classifier expects {}",
                query.len(),
                self.dim()
            )));
        }

        let query_norm = query.dot(&query).sqrt();
        let dots = self.samples.dot(&query);

        let mut neighbors: Vec<FitNeighbor> = dots
            .iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(fit_index, (&dot, &norm))| FitNeighbor {
                fit_index,
                distance: cosine_distance(dot, norm * query_norm),
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.fit_index.cmp(&b.fit_index))
        });
        neighbors.truncate(n.min(self.fit_size()));
        Ok(neighbors)
    }

    /// Distance-weighted vote share per class over the `k` nearest samples.
    ///
    /// Weights are `1 / distance`. If any neighbor sits at distance zero, only the
    /// zero-distance neighbors vote, each with weight one.
    pub fn predict_proba(&self, query: ArrayView1<f32>) -> Result<Vec<f32>> {
        let neighbors = self.kneighbors(query, self.params.k)?;
        let exact = neighbors.iter().any(|n| n.distance == 0.0);

        let mut votes = vec![0.0f64; self.params.n_classes];
        for neighbor in &neighbors {
            let weight = if exact {
                if neighbor.distance == 0.0 { 1.0 } else { 0.0 }
            } else {
                1.0 / neighbor.distance as f64
            };
            votes[self.target(neighbor.fit_index)?] += weight;
        }

        let total: f64 = votes.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return Err(EngineError::Other(anyhow::anyhow!(
                "degenerate neighbor weights (total {total})"
            )));
        }
        Ok(votes.into_iter().map(|v| (v / total) as f32).collect())
    }
}

/// `1 - cos`, clipped to `[0, 2]`. A zero-norm side counts as orthogonal.
fn cosine_distance(dot: f32, norm_product: f32) -> f32 {
    if norm_product <= 0.0 {
        return 1.0;
    }
    (1.0 - dot / norm_product).clamp(0.0, 2.0)
}
