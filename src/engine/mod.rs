//! Classification engine: embedding store, label-space k-NN classifier, latent
//! placement, and the [`QueryService`] that ties them to the artifact store.
//!
//! Corpus identity is the `row_index`. The classifier is fit on a subset of rows,
//! so its own positions (fit indexes) are translated through a fit-index map before
//! they reach anything outside [`classifier`].

pub mod cell;
pub mod classifier;
pub mod knn;
pub mod latent;
pub mod matrix;
pub mod service;
pub mod store;

pub use cell::{ArtifactCell, ArtifactState};
pub use classifier::{FitIndexMap, LabelEncoding, LabelScore, LabelSpaceClassifier, RowNeighbor};
pub use latent::{LatentLocation, LatentLookup, LatentNeighbor, LatentPoint, ProjectionTable};
pub use service::{
    ClassifyResponse, ContextFields, DeclaredValue, HealthReport, Prediction, QueryService,
    ServiceParts, SimilarExample,
};
pub use store::{EmbeddingStore, RowSimilarity};
