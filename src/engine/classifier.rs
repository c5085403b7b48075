//! Label-space classifier: a k-NN model fit on the curated subset of the corpus,
//! the label encoding it predicts in, and the fit-index map back to corpus rows.
//!
//! The three parts are built, validated, persisted, and replaced together as one
//! bundle. Nothing outside this module sees a fit index; [`LabelSpaceClassifier::neighbors`]
//! translates every position to a corpus `row_index` before returning it.

use std::collections::BTreeSet;

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use super::knn::{KnnModel, KnnParams};
use super::matrix::{decode_matrix, encode_matrix};
use super::store::EmbeddingStore;
use crate::corpus::{Corpus, CuratedLabels};
use crate::db::ArtifactStore;
use crate::error::{EngineError, Result};

pub const CLASSIFIER_KEY: &str = "classifier";
pub const SAMPLES_KEY: &str = "classifier.samples";
pub const LABELS_KEY: &str = "label_encoding";
pub const FIT_INDEX_KEY: &str = "fit_index";

/// Bijection between code strings and contiguous class ids, ordered by code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoding {
    classes: Vec<String>,
}

impl LabelEncoding {
    /// Encode the distinct labels, sorted lexicographically.
    pub fn fit<'a>(labels: impl IntoIterator<Item = &'a str>) -> Self {
        let classes: BTreeSet<&str> = labels.into_iter().collect();
        Self {
            classes: classes.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn encode(&self, label: &str) -> Option<usize> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(label))
            .ok()
    }

    pub fn decode(&self, class_id: usize) -> Result<&str> {
        self.classes
            .get(class_id)
            .map(String::as_str)
            .ok_or(EngineError::IndexOutOfRange {
                what: "class id",
                index: class_id,
                len: self.classes.len(),
            })
    }
}

/// Fit index → corpus `row_index`, in the exact order the model was fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitIndexMap {
    rows: Vec<usize>,
}

impl FitIndexMap {
    pub fn new(rows: Vec<usize>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    pub fn row_index(&self, fit_index: usize) -> Result<usize> {
        self.rows
            .get(fit_index)
            .copied()
            .ok_or(EngineError::IndexOutOfRange {
                what: "fit-index map",
                index: fit_index,
                len: self.rows.len(),
            })
    }
}

/// A predicted code with its vote share.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelScore {
    pub label: String,
    pub confidence: f32,
}

/// A fitted corpus row near a query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RowNeighbor {
    pub row_index: usize,
    pub distance: f32,
}

/// Bundle header persisted under [`CLASSIFIER_KEY`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BundleHeader {
    bundle_id: String,
    built_at: String,
    degraded: bool,
    metric: String,
    weights: String,
    #[serde(flatten)]
    params: KnnParams,
}

#[derive(Debug)]
pub struct LabelSpaceClassifier {
    bundle_id: String,
    built_at: String,
    degraded: bool,
    model: KnnModel,
    labels: LabelEncoding,
    fit_index: FitIndexMap,
}

impl LabelSpaceClassifier {
    /// Fit on the corpus rows whose label is curated.
    ///
    /// Falls back to the full corpus (degraded mode) when no row carries a curated
    /// label. Fails with [`EngineError::ClassifierUnfit`] on an empty corpus.
    pub fn build(
        corpus: &Corpus,
        curated: &CuratedLabels,
        store: &EmbeddingStore,
        max_neighbors: usize,
    ) -> Result<Self> {
        if corpus.is_empty() {
            return Err(EngineError::ClassifierUnfit("corpus is empty".into()));
        }

        let mut rows: Vec<usize> = corpus
            .records()
            .iter()
            .filter(|r| curated.contains(&r.label))
            .map(|r| r.row_index)
            .collect();

        let degraded = rows.is_empty();
        if degraded {
            tracing::warn!(
                corpus_rows = corpus.len(),
                curated_codes = curated.len(),
                "no corpus row carries a curated label, fitting on the full corpus (degraded)"
            );
            rows = (0..corpus.len()).collect();
        }

        let row_labels = rows
            .iter()
            .map(|&row| corpus.get(row).map(|r| r.label.as_str()))
            .collect::<Result<Vec<_>>>()?;

        let labels = LabelEncoding::fit(row_labels.iter().copied());
        let targets = row_labels
            .iter()
            .map(|label| {
                labels.encode(label).ok_or_else(|| {
                    EngineError::Other(anyhow::anyhow!("label {label} missing from its own encoding"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let samples = store.select_rows(&rows)?;
        let k = max_neighbors.min(rows.len());
        let model = KnnModel::fit(samples, targets, labels.len(), k)?;

        tracing::info!(
            fit_size = model.fit_size(),
            classes = labels.len(),
            k = model.k(),
            degraded,
            "classifier fitted"
        );

        Ok(Self {
            bundle_id: uuid::Uuid::now_v7().to_string(),
            built_at: chrono::Utc::now().to_rfc3339(),
            degraded,
            model,
            labels,
            fit_index: FitIndexMap::new(rows),
        })
    }

    /// Check the bundle against the current corpus and curated set.
    pub fn validate(&self, corpus: &Corpus, curated: &CuratedLabels) -> Result<()> {
        let invalid = |why: String| Err(EngineError::ArtifactInvalid(why));

        if self.labels.is_empty() {
            return invalid("label encoding has no classes".into());
        }
        if self.fit_index.len() != self.model.fit_size() {
            return invalid(format!(
                "fit-index map has {} rows, classifier reports {} samples",
                self.fit_index.len(),
                self.model.fit_size()
            ));
        }
        if self.labels.len() != self.model.n_classes() {
            return invalid(format!(
                "label encoding has {} classes, classifier was fit on {}",
                self.labels.len(),
                self.model.n_classes()
            ));
        }

        let curated_rows = corpus
            .records()
            .iter()
            .any(|r| curated.contains(&r.label));
        if self.degraded {
            if curated_rows {
                return invalid("degraded bundle but the corpus now has curated rows".into());
            }
        } else {
            if self.labels.len() > curated.len() {
                return invalid(format!(
                    "{} classes exceed the {} curated codes",
                    self.labels.len(),
                    curated.len()
                ));
            }
            if let Some(stray) = self.labels.classes().iter().find(|c| !curated.contains(c)) {
                return invalid(format!("class {stray} is not in the curated set"));
            }
        }

        // The fitted rows must be exactly the rows a fresh build would select.
        let expected: Vec<usize> = if self.degraded {
            (0..corpus.len()).collect()
        } else {
            corpus
                .records()
                .iter()
                .filter(|r| curated.contains(&r.label))
                .map(|r| r.row_index)
                .collect()
        };
        if self.fit_index.rows() != expected.as_slice() {
            return invalid(format!(
                "bundle was fit on {} rows, current inputs select {}",
                self.fit_index.len(),
                expected.len()
            ));
        }

        // Every fitted row must still exist and still carry the label it was fit with.
        for (fit, &row) in self.fit_index.rows().iter().enumerate() {
            let Ok(record) = corpus.get(row) else {
                return invalid(format!("fit row {fit} maps to missing corpus row {row}"));
            };
            let fitted = self.labels.decode(self.model.target(fit)?)?;
            if record.label != fitted {
                return invalid(format!(
                    "corpus row {row} is labeled {}, classifier was fit with {fitted}",
                    record.label
                ));
            }
        }

        Ok(())
    }

    /// Up to `k` labels by vote share, highest first (ties: lower class id), with
    /// entries below `min_confidence` dropped.
    pub fn predict_topk(
        &self,
        query: ArrayView1<f32>,
        k: usize,
        min_confidence: f32,
    ) -> Result<Vec<LabelScore>> {
        let proba = self.model.predict_proba(query)?;

        let mut ranked: Vec<(usize, f32)> = proba.into_iter().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        ranked
            .into_iter()
            .take(k)
            .filter(|&(_, confidence)| confidence >= min_confidence)
            .map(|(class_id, confidence)| {
                Ok(LabelScore {
                    label: self.labels.decode(class_id)?.to_string(),
                    confidence,
                })
            })
            .collect()
    }

    /// The `n` nearest fitted rows, identified by corpus `row_index`.
    pub fn neighbors(&self, query: ArrayView1<f32>, n: usize) -> Result<Vec<RowNeighbor>> {
        self.model
            .kneighbors(query, n)?
            .into_iter()
            .map(|neighbor| {
                Ok(RowNeighbor {
                    row_index: self.fit_index.row_index(neighbor.fit_index)?,
                    distance: neighbor.distance,
                })
            })
            .collect()
    }

    pub fn fit_size(&self) -> usize {
        self.model.fit_size()
    }

    pub fn k(&self) -> usize {
        self.model.k()
    }

    pub fn labels(&self) -> &LabelEncoding {
        &self.labels
    }

    pub fn fit_index(&self) -> &FitIndexMap {
        &self.fit_index
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn bundle_id(&self) -> &str {
        &self.bundle_id
    }

    pub fn built_at(&self) -> &str {
        &self.built_at
    }

    /// Write classifier, samples, label encoding, and fit-index map in one transaction.
    pub fn persist(&self, artifacts: &ArtifactStore) -> Result<()> {
        let header = BundleHeader {
            bundle_id: self.bundle_id.clone(),
            built_at: self.built_at.clone(),
            degraded: self.degraded,
            metric: "cosine".into(),
            weights: "distance".into(),
            params: self.model.params().clone(),
        };
        let header = serde_json::to_vec(&header).map_err(anyhow::Error::from)?;
        let samples = encode_matrix(self.model.samples());
        let labels = serde_json::to_vec(&self.labels).map_err(anyhow::Error::from)?;
        let fit_index = serde_json::to_vec(&self.fit_index).map_err(anyhow::Error::from)?;

        artifacts.put_all(&[
            (CLASSIFIER_KEY, header.as_slice()),
            (SAMPLES_KEY, samples.as_slice()),
            (LABELS_KEY, labels.as_slice()),
            (FIT_INDEX_KEY, fit_index.as_slice()),
        ])?;

        tracing::info!(bundle_id = %self.bundle_id, "classifier bundle persisted");
        Ok(())
    }

    /// Read a persisted bundle. Any missing part is [`EngineError::ArtifactMissing`];
    /// any undecodable or inconsistent part is [`EngineError::ArtifactInvalid`].
    pub fn load(artifacts: &ArtifactStore) -> Result<Self> {
        let fetch = |key: &str| -> Result<Vec<u8>> {
            artifacts
                .get(key)?
                .ok_or_else(|| EngineError::ArtifactMissing(key.to_string()))
        };
        let decode_err =
            |key: &str, e: serde_json::Error| EngineError::ArtifactInvalid(format!("{key}: {e}"));

        let header: BundleHeader = serde_json::from_slice(&fetch(CLASSIFIER_KEY)?)
            .map_err(|e| decode_err(CLASSIFIER_KEY, e))?;
        let samples = decode_matrix(SAMPLES_KEY, &fetch(SAMPLES_KEY)?)?;
        let labels: LabelEncoding = serde_json::from_slice(&fetch(LABELS_KEY)?)
            .map_err(|e| decode_err(LABELS_KEY, e))?;
        let fit_index: FitIndexMap = serde_json::from_slice(&fetch(FIT_INDEX_KEY)?)
            .map_err(|e| decode_err(FIT_INDEX_KEY, e))?;

        if header.metric != "cosine" || header.weights != "distance" {
            return Err(EngineError::ArtifactInvalid(format!(
                "unsupported classifier ({} metric, {} weights)",
                header.metric, header.weights
            )));
        }
        let model = KnnModel::from_parts(header.params, samples)?;

        Ok(Self {
            bundle_id: header.bundle_id,
            built_at: header.built_at,
            degraded: header.degraded,
            model,
            labels,
            fit_index,
        })
    }

    /// Vector dimension the model was fit in.
    pub fn dim(&self) -> usize {
        self.model.dim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusRecord;
    use ndarray::{arr1, array};

    fn record(text: &str, label: &str) -> CorpusRecord {
        CorpusRecord {
            row_index: 0,
            text: text.into(),
            label: label.into(),
            language: "en".into(),
            chapter: label[..2].into(),
            chapter_name: None,
        }
    }

    fn fixture() -> (Corpus, CuratedLabels, EmbeddingStore) {
        let corpus = Corpus::from_records(vec![
            record("a", "010110"),
            record("x", "999999"),
            record("b", "010110"),
            record("c", "020130"),
        ]);
        let curated = CuratedLabels::from_codes(["010110", "020130"]);
        let store = EmbeddingStore::from_matrix(array![
            [1.0f32, 0.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.8, 0.6, 0.0],
            [0.0, 1.0, 0.0],
        ]);
        (corpus, curated, store)
    }

    #[test]
    fn label_encoding_is_sorted_and_distinct() {
        let enc = LabelEncoding::fit(["020130", "010110", "020130"]);
        assert_eq!(enc.classes(), &["010110".to_string(), "020130".to_string()]);
        assert_eq!(enc.encode("020130"), Some(1));
        assert_eq!(enc.encode("999999"), None);
        assert_eq!(enc.decode(0).unwrap(), "010110");
        assert!(enc.decode(2).is_err());
    }

    #[test]
    fn build_skips_uncurated_rows_and_maps_positions() {
        let (corpus, curated, store) = fixture();
        let clf = LabelSpaceClassifier::build(&corpus, &curated, &store, 5).unwrap();

        assert_eq!(clf.fit_size(), 3);
        assert_eq!(clf.k(), 3);
        assert_eq!(clf.fit_index().rows(), &[0, 2, 3]);
        assert!(!clf.is_degraded());
        clf.validate(&corpus, &curated).unwrap();
    }

    #[test]
    fn neighbors_report_corpus_rows_not_fit_positions() {
        let (corpus, curated, store) = fixture();
        let clf = LabelSpaceClassifier::build(&corpus, &curated, &store, 5).unwrap();

        // Nearest to the "c" row, which is fit position 2 but corpus row 3.
        let n = clf.neighbors(arr1(&[0.0f32, 1.0, 0.0]).view(), 1).unwrap();
        assert_eq!(n[0].row_index, 3);
        assert_eq!(corpus.get(n[0].row_index).unwrap().text, "c");
    }

    #[test]
    fn predictions_are_sorted_and_filtered() {
        let (corpus, curated, store) = fixture();
        let clf = LabelSpaceClassifier::build(&corpus, &curated, &store, 5).unwrap();

        let preds = clf
            .predict_topk(arr1(&[0.9f32, 0.3, 0.0]).view(), 5, 0.01)
            .unwrap();
        assert_eq!(preds[0].label, "010110");
        assert!(preds.windows(2).all(|w| w[0].confidence >= w[1].confidence));
        assert!(preds.iter().all(|p| p.confidence >= 0.01));

        let top1 = clf
            .predict_topk(arr1(&[0.9f32, 0.3, 0.0]).view(), 1, 0.0)
            .unwrap();
        assert_eq!(top1.len(), 1);
    }

    #[test]
    fn tied_confidences_prefer_lower_class_id() {
        let corpus = Corpus::from_records(vec![record("a", "020130"), record("b", "010110")]);
        let curated = CuratedLabels::from_codes(["010110", "020130"]);
        let store = EmbeddingStore::from_matrix(array![[1.0f32, 0.0], [0.0, 1.0]]);
        let clf = LabelSpaceClassifier::build(&corpus, &curated, &store, 5).unwrap();

        let q = crate::embedding::l2_normalize(&[1.0, 1.0]);
        let preds = clf.predict_topk(arr1(&q).view(), 2, 0.0).unwrap();
        assert_eq!(preds[0].label, "010110");
        assert_eq!(preds[1].label, "020130");
    }

    #[test]
    fn empty_curated_subset_falls_back_to_full_corpus() {
        let (corpus, _, store) = fixture();
        let curated = CuratedLabels::from_codes(["870321"]);
        let clf = LabelSpaceClassifier::build(&corpus, &curated, &store, 5).unwrap();

        assert!(clf.is_degraded());
        assert_eq!(clf.fit_size(), 4);
        clf.validate(&corpus, &curated).unwrap();

        // Once curated rows exist, the degraded bundle is stale.
        let curated = CuratedLabels::from_codes(["010110"]);
        assert!(clf.validate(&corpus, &curated).is_err());
    }

    #[test]
    fn empty_corpus_is_unfit() {
        let err = LabelSpaceClassifier::build(
            &Corpus::default(),
            &CuratedLabels::from_codes(["010110"]),
            &EmbeddingStore::from_matrix(ndarray::Array2::zeros((0, 3))),
            5,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::ClassifierUnfit(_)));
    }

    #[test]
    fn validation_rejects_shrunken_curated_set() {
        let (corpus, curated, store) = fixture();
        let clf = LabelSpaceClassifier::build(&corpus, &curated, &store, 5).unwrap();

        let smaller = CuratedLabels::from_codes(["010110"]);
        let err = clf.validate(&corpus, &smaller).unwrap_err();
        assert!(matches!(err, EngineError::ArtifactInvalid(_)));
    }

    #[test]
    fn validation_rejects_grown_curated_set() {
        let (corpus, curated, store) = fixture();
        let clf = LabelSpaceClassifier::build(&corpus, &curated, &store, 5).unwrap();

        let grown = CuratedLabels::from_codes(["010110", "020130", "999999"]);
        let err = clf.validate(&corpus, &grown).unwrap_err();
        assert!(matches!(err, EngineError::ArtifactInvalid(_)));
    }

    #[test]
    fn validation_rejects_appended_curated_rows() {
        let (corpus, curated, store) = fixture();
        let clf = LabelSpaceClassifier::build(&corpus, &curated, &store, 5).unwrap();

        let mut records = corpus.records().to_vec();
        records.push(record("d", "020130"));
        let grown = Corpus::from_records(records);
        assert!(clf.validate(&grown, &curated).is_err());
    }

    #[test]
    fn validation_rejects_relabeled_rows() {
        let (corpus, curated, store) = fixture();
        let clf = LabelSpaceClassifier::build(&corpus, &curated, &store, 5).unwrap();

        let mut records = corpus.records().to_vec();
        records.swap(2, 3);
        let reordered = Corpus::from_records(records);
        assert!(clf.validate(&reordered, &curated).is_err());
    }

    #[test]
    fn persisted_bundle_loads_back() {
        let (corpus, curated, store) = fixture();
        let clf = LabelSpaceClassifier::build(&corpus, &curated, &store, 5).unwrap();
        let artifacts = ArtifactStore::open_in_memory().unwrap();
        clf.persist(&artifacts).unwrap();

        let loaded = LabelSpaceClassifier::load(&artifacts).unwrap();
        assert_eq!(loaded.bundle_id(), clf.bundle_id());
        assert_eq!(loaded.fit_index(), clf.fit_index());
        assert_eq!(loaded.labels(), clf.labels());
        loaded.validate(&corpus, &curated).unwrap();
    }

    #[test]
    fn missing_bundle_part_is_reported() {
        let artifacts = ArtifactStore::open_in_memory().unwrap();
        let err = LabelSpaceClassifier::load(&artifacts).unwrap_err();
        assert!(matches!(err, EngineError::ArtifactMissing(ref key) if key == CLASSIFIER_KEY));
    }
}
