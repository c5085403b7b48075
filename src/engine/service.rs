//! Query service: the explicit context object handed to every request.
//!
//! Built once at startup, shared by reference (`Arc<QueryService>`), and read-only
//! afterwards apart from the two [`ArtifactCell`]s, which only change through a
//! locked rebuild.

use std::sync::Arc;
use std::time::Instant;

use ndarray::ArrayView1;
use serde::Serialize;

use super::cell::{ArtifactCell, ArtifactState};
use super::classifier::LabelSpaceClassifier;
use super::latent::{self, LatentLookup, LatentPoint, ProjectionTable};
use super::store::EmbeddingStore;
use crate::config::{ClassifierConfig, HsknnConfig};
use crate::corpus::{Corpus, CuratedLabels};
use crate::db::ArtifactStore;
use crate::embedding::{self, EmbeddingProvider, Framing};
use crate::error::{EngineError, Result};

/// Structured fields that sharpen a product description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextFields {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub value: Option<DeclaredValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredValue {
    pub amount: f64,
    pub currency: String,
}

impl ContextFields {
    /// Append the supplied fields as `"key: value"` parts in a fixed order
    /// (origin, destination, value).
    pub fn enrich(&self, text: &str) -> String {
        let mut parts = Vec::new();
        if let Some(origin) = self.origin.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            parts.push(format!("origin: {origin}"));
        }
        if let Some(dest) = self.destination.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            parts.push(format!("destination: {dest}"));
        }
        if let Some(value) = self.value.as_ref().filter(|v| !v.currency.trim().is_empty()) {
            parts.push(format!("value: {} {}", value.currency.trim(), value.amount));
        }

        if parts.is_empty() {
            text.to_string()
        } else {
            format!("{text} ({})", parts.join(", "))
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub code: String,
    pub confidence: f32,
    pub description: String,
    pub chapter: String,
    pub chapter_code: String,
    pub heading_code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarExample {
    pub row_index: usize,
    pub text: String,
    pub code: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassifyResponse {
    pub query: String,
    pub enriched_query: String,
    pub predictions: Vec<Prediction>,
    pub similar_examples: Vec<SimilarExample>,
    pub inference_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub loaded: bool,
    pub classifier_fit_size: usize,
    pub classifier_state: ArtifactState,
    pub embeddings_state: ArtifactState,
    pub corpus_size: usize,
    pub class_count: usize,
    pub curated_size: usize,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    pub latent_points: usize,
}

/// Everything a [`QueryService`] is assembled from.
pub struct ServiceParts {
    pub corpus: Corpus,
    pub curated: CuratedLabels,
    pub provider: Arc<dyn EmbeddingProvider>,
    pub artifacts: ArtifactStore,
    pub projection: Option<ProjectionTable>,
    pub settings: ClassifierConfig,
    pub batch_size: usize,
    /// Identifier recorded next to freshly computed vectors.
    pub model_name: String,
}

pub struct QueryService {
    corpus: Corpus,
    curated: CuratedLabels,
    provider: Arc<dyn EmbeddingProvider>,
    artifacts: ArtifactStore,
    projection: Option<ProjectionTable>,
    settings: ClassifierConfig,
    batch_size: usize,
    model_name: String,
    embeddings: ArtifactCell<EmbeddingStore>,
    classifier: ArtifactCell<LabelSpaceClassifier>,
}

impl QueryService {
    /// Assemble the service and bring every artifact to a valid state.
    ///
    /// Persisted artifacts are loaded and validated; anything missing or invalid is
    /// rebuilt before this returns. An unfit classifier is fatal here.
    pub fn open(parts: ServiceParts) -> Result<Self> {
        let projection = parts.projection.and_then(|table| {
            if table.len() == parts.corpus.len() {
                Some(table)
            } else {
                tracing::warn!(
                    points = table.len(),
                    corpus_rows = parts.corpus.len(),
                    "projection table does not match the corpus, ignoring it"
                );
                None
            }
        });

        let service = Self {
            corpus: parts.corpus,
            curated: parts.curated,
            provider: parts.provider,
            artifacts: parts.artifacts,
            projection,
            settings: parts.settings,
            batch_size: parts.batch_size,
            model_name: parts.model_name,
            embeddings: ArtifactCell::new("embeddings"),
            classifier: ArtifactCell::new("classifier"),
        };

        service.check_model_identity();
        service.offer_persisted();
        service.warm()?;
        Ok(service)
    }

    /// Build the service from configuration: load inputs, open the artifact
    /// database, and create the embedding provider.
    pub fn from_config(config: &HsknnConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let corpus = Corpus::load(crate::config::expand_tilde(&config.data.corpus_path))?;
        let curated = CuratedLabels::load(crate::config::expand_tilde(&config.data.reference_path))?;
        let projection = ProjectionTable::load_optional(crate::config::expand_tilde(
            &config.data.projection_path,
        ))?;
        let artifacts = ArtifactStore::open(config.resolved_db_path())?;
        let provider: Arc<dyn EmbeddingProvider> = Arc::from(
            embedding::create_provider(&config.embedding)
                .context("failed to create embedding provider")?,
        );

        Ok(Self::open(ServiceParts {
            corpus,
            curated,
            provider,
            artifacts,
            projection,
            settings: config.classifier.clone(),
            batch_size: config.embedding.batch_size,
            model_name: config.embedding.model.clone(),
        })?)
    }

    fn check_model_identity(&self) {
        match self.artifacts.embedding_model() {
            Ok(Some(stored)) if stored != self.model_name => tracing::warn!(
                stored = %stored,
                configured = %self.model_name,
                "embedding model changed, run `hsknn build --force` to recompute vectors"
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "could not read stored embedding model"),
        }
    }

    /// Seed the cells with whatever the artifact store holds.
    fn offer_persisted(&self) {
        match EmbeddingStore::load(&self.artifacts) {
            Ok(store) => self.embeddings.offer(store),
            Err(EngineError::ArtifactMissing(key)) => {
                tracing::debug!(key = %key, "no persisted vectors");
            }
            Err(e) => tracing::warn!(error = %e, "persisted vectors unreadable, will rebuild"),
        }

        match LabelSpaceClassifier::load(&self.artifacts) {
            Ok(bundle) => self.classifier.offer(bundle),
            Err(EngineError::ArtifactMissing(key)) => {
                tracing::debug!(key = %key, "no persisted classifier bundle");
            }
            Err(e) => tracing::warn!(error = %e, "persisted classifier unreadable, will rebuild"),
        }
    }

    /// Validate or rebuild both artifacts. Idempotent once they are valid.
    pub fn warm(&self) -> Result<()> {
        self.classifier_bundle().map(|_| ())
    }

    /// Drop every persisted artifact and rebuild from scratch.
    pub fn rebuild(&self) -> Result<()> {
        self.artifacts.clear()?;
        self.embeddings.invalidate();
        self.classifier.invalidate();
        self.warm()
    }

    fn embedding_store(&self) -> Result<Arc<EmbeddingStore>> {
        let dims = self.provider.dimensions();
        self.embeddings.get_or_build(
            |store| store.validate(&self.corpus, dims),
            || {
                let store =
                    EmbeddingStore::compute(&self.corpus, self.provider.as_ref(), self.batch_size)?;
                store.persist(&self.artifacts)?;
                self.artifacts.set_embedding_model(&self.model_name)?;
                // The bundle was fit on the old vectors.
                self.classifier.invalidate();
                Ok(store)
            },
        )
    }

    fn classifier_bundle(&self) -> Result<Arc<LabelSpaceClassifier>> {
        let store = self.embedding_store()?;
        self.classifier.get_or_build(
            |bundle| {
                bundle.validate(&self.corpus, &self.curated)?;
                if bundle.dim() != store.dim() {
                    return Err(EngineError::ArtifactInvalid(format!(
                        "classifier fit in {} dimensions, vectors have {}",
                        bundle.dim(),
                        store.dim()
                    )));
                }
                Ok(())
            },
            || {
                let bundle = LabelSpaceClassifier::build(
                    &self.corpus,
                    &self.curated,
                    &store,
                    self.settings.neighbors,
                )?;
                bundle.persist(&self.artifacts)?;
                Ok(bundle)
            },
        )
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self
            .provider
            .embed(&Framing::Query.apply(text))
            .map_err(EngineError::Embedding)?;
        Ok(embedding::l2_normalize(&vector))
    }

    /// Top codes for a description plus the most similar corpus examples.
    pub fn classify(&self, text: &str, context: &ContextFields) -> Result<ClassifyResponse> {
        let query = text.trim();
        if query.is_empty() {
            return Err(EngineError::EmptyQuery);
        }

        let started = Instant::now();
        let bundle = self.classifier_bundle()?;
        let store = self.embedding_store()?;

        let enriched_query = context.enrich(query);
        let vector = self.embed_query(&enriched_query)?;
        let view = ArrayView1::from(vector.as_slice());

        let predictions: Vec<Prediction> = bundle
            .predict_topk(view, self.settings.top_k, self.settings.min_confidence)?
            .into_iter()
            .map(|score| self.describe(score.label, score.confidence))
            .collect();

        // Similar examples come from the whole store, curated or not.
        let similar_examples = store
            .most_similar(view, self.settings.similar_examples)?
            .into_iter()
            .map(|hit| {
                let record = self.corpus.get(hit.row_index)?;
                Ok(SimilarExample {
                    row_index: hit.row_index,
                    text: record.text.clone(),
                    code: record.label.clone(),
                    similarity: hit.similarity,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let inference_time_ms = (started.elapsed().as_secs_f64() * 10_000.0).round() / 10.0;
        tracing::debug!(
            query_len = query.len(),
            predictions = %summarize(&predictions),
            inference_time_ms,
            "classified"
        );

        Ok(ClassifyResponse {
            query: query.to_string(),
            enriched_query,
            predictions,
            similar_examples,
            inference_time_ms,
        })
    }

    fn describe(&self, code: String, confidence: f32) -> Prediction {
        let info = self.curated.info(&code);
        let description = info
            .map(|i| i.desc.clone())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| "No description available".to_string());
        let chapter = info
            .map(|i| i.chapter.clone())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());

        Prediction {
            chapter_code: code.chars().take(2).collect(),
            heading_code: code.chars().take(4).collect(),
            code,
            confidence,
            description,
            chapter,
        }
    }

    /// Place a description in the precomputed 2-D layout.
    pub fn locate_in_latent_space(&self, text: &str) -> Result<LatentLookup> {
        let query = text.trim();
        if query.is_empty() {
            return Err(EngineError::EmptyQuery);
        }
        let Some(table) = self.projection.as_ref() else {
            return Ok(LatentLookup::NoLatentData);
        };

        let bundle = self.classifier_bundle()?;
        let vector = self.embed_query(query)?;
        let n = self.settings.latent_neighbors.min(bundle.fit_size());
        let neighbors = bundle.neighbors(ArrayView1::from(vector.as_slice()), n)?;

        latent::locate(table, &neighbors)
    }

    /// The full projected layout, empty when none is loaded.
    pub fn visualization_points(&self) -> &[LatentPoint] {
        self.projection
            .as_ref()
            .map(ProjectionTable::points)
            .unwrap_or(&[])
    }

    pub fn health(&self) -> HealthReport {
        let bundle = self.classifier.current();
        HealthReport {
            loaded: bundle.is_some(),
            classifier_fit_size: bundle.as_ref().map_or(0, |b| b.fit_size()),
            classifier_state: self.classifier.state(),
            embeddings_state: self.embeddings.state(),
            corpus_size: self.corpus.len(),
            class_count: bundle.as_ref().map_or(0, |b| b.labels().len()),
            curated_size: self.curated.len(),
            degraded: bundle.as_ref().is_some_and(|b| b.is_degraded()),
            bundle_id: bundle.as_ref().map(|b| b.bundle_id().to_string()),
            latent_points: self.projection.as_ref().map_or(0, ProjectionTable::len),
        }
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// The published classifier bundle, if any.
    pub fn classifier(&self) -> Option<Arc<LabelSpaceClassifier>> {
        self.classifier.current()
    }

    /// The published embedding store, if any.
    pub fn embeddings(&self) -> Option<Arc<EmbeddingStore>> {
        self.embeddings.current()
    }
}

fn summarize(predictions: &[Prediction]) -> String {
    predictions
        .iter()
        .map(|p| format!("{}:{:.3}", p.code, p.confidence))
        .collect::<Vec<_>>()
        .join(",")
}

// Shared across request handlers.
const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<QueryService>();
};
