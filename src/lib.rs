//! Harmonized System code suggestion by nearest-neighbor search over a labeled corpus.
//!
//! hsknn embeds free-text product descriptions with a multilingual sentence encoder,
//! ranks candidate six-digit HS codes with a distance-weighted k-NN vote over a
//! curated subset of the corpus, and places queries in a precomputed 2-D layout of
//! that corpus.
//!
//! | Artifact | Built from | Invalidated when |
//! |----------|-----------|------------------|
//! | **Vectors** | every corpus row | row count or dimension changes |
//! | **Classifier bundle** | curated rows + vectors | curated set, labels, or vectors change |
//! | **Projection** | external reduction run | never rebuilt here; ignored if stale |
//!
//! # Architecture
//!
//! - **Storage**: SQLite artifact table (one BLOB per key) plus schema metadata
//! - **Embeddings**: Local ONNX Runtime with multilingual-e5-small (384 dimensions)
//! - **Classification**: brute-force cosine k-NN, `k = min(5, fit size)`, `1/d` weights
//! - **Recovery**: missing or stale artifacts are rebuilt on first use, never served
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`corpus`]: Corpus records and the curated code reference
//! - [`db`]: SQLite artifact store, schema, and health checks
//! - [`embedding`]: Text-to-vector embedding pipeline via ONNX Runtime
//! - [`engine`]: Embedding store, classifier bundle, latent placement, query service
//! - [`error`]: Engine error taxonomy

pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
