//! Precomputed 2-D layout of the corpus and query placement within it.
//!
//! The layout itself comes from an external dimensionality-reduction run; this
//! module only loads it and places new queries by inverse-distance weighting over
//! their nearest fitted neighbors.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::classifier::RowNeighbor;
use crate::error::EngineError;

/// Guards the weight of an exact (zero-distance) match.
pub const DISTANCE_EPSILON: f64 = 1e-6;

/// One projected corpus row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatentPoint {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hs_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hs_desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Coordinates keyed by `row_index` (position in the table).
#[derive(Debug, Clone, Default)]
pub struct ProjectionTable {
    points: Vec<LatentPoint>,
}

impl ProjectionTable {
    pub fn new(points: Vec<LatentPoint>) -> Self {
        Self { points }
    }

    pub fn from_json(input: &str) -> Result<Self> {
        let points: Vec<LatentPoint> =
            serde_json::from_str(input).context("failed to parse projection JSON")?;
        Ok(Self { points })
    }

    /// Load the table if the file exists. A missing file means no latent data.
    pub fn load_optional(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "no projection table, latent lookup disabled");
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read projection: {}", path.display()))?;
        let table = Self::from_json(&contents)?;
        tracing::info!(points = table.len(), path = %path.display(), "projection table loaded");
        Ok(Some(table))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[LatentPoint] {
        &self.points
    }

    pub fn point(&self, row_index: usize) -> std::result::Result<&LatentPoint, EngineError> {
        self.points
            .get(row_index)
            .ok_or(EngineError::IndexOutOfRange {
                what: "projection row",
                index: row_index,
                len: self.points.len(),
            })
    }
}

/// A neighbor of the query, placed in the layout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatentNeighbor {
    pub row_index: usize,
    pub distance: f32,
    /// `clamp(1 - distance, 0, 1)`.
    pub similarity: f32,
    #[serde(flatten)]
    pub point: LatentPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatentLocation {
    pub x: f64,
    pub y: f64,
    pub neighbors: Vec<LatentNeighbor>,
}

/// Outcome of a latent-space lookup. Missing layout data is an expected answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LatentLookup {
    Located(LatentLocation),
    NoLatentData,
}

/// Place a query at the inverse-distance-weighted mean of its neighbors' coordinates.
pub fn locate(
    table: &ProjectionTable,
    neighbors: &[RowNeighbor],
) -> std::result::Result<LatentLookup, EngineError> {
    if neighbors.is_empty() || table.is_empty() {
        return Ok(LatentLookup::NoLatentData);
    }

    let raw: Vec<f64> = neighbors
        .iter()
        .map(|n| 1.0 / (n.distance as f64 + DISTANCE_EPSILON))
        .collect();
    let total: f64 = raw.iter().sum();

    let mut x = 0.0;
    let mut y = 0.0;
    let mut placed = Vec::with_capacity(neighbors.len());

    for (neighbor, w) in neighbors.iter().zip(&raw) {
        let point = table.point(neighbor.row_index)?;
        let weight = w / total;
        x += point.x * weight;
        y += point.y * weight;
        placed.push(LatentNeighbor {
            row_index: neighbor.row_index,
            distance: neighbor.distance,
            similarity: (1.0 - neighbor.distance).clamp(0.0, 1.0),
            point: point.clone(),
        });
    }

    Ok(LatentLookup::Located(LatentLocation {
        x,
        y,
        neighbors: placed,
    }))
}
