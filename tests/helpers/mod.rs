#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hsknn::config::ClassifierConfig;
use hsknn::corpus::{Corpus, CorpusRecord, CuratedLabels};
use hsknn::db::ArtifactStore;
use hsknn::embedding::{EmbeddingProvider, EMBEDDING_DIM};
use hsknn::engine::{LatentPoint, ProjectionTable, QueryService, ServiceParts};

/// Deterministic bag-of-words embedder: each word lands on one of 384 axes.
///
/// Texts sharing words get high cosine similarity. Counts passage and query calls
/// separately so tests can tell a full recompute from a cache hit.
#[derive(Default)]
pub struct BagOfWordsEmbedder {
    passages: AtomicUsize,
    queries: AtomicUsize,
}

impl BagOfWordsEmbedder {
    pub fn passages(&self) -> usize {
        self.passages.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for BagOfWordsEmbedder {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let body = if let Some(rest) = text.strip_prefix("passage: ") {
            self.passages.fetch_add(1, Ordering::SeqCst);
            rest
        } else if let Some(rest) = text.strip_prefix("query: ") {
            self.queries.fetch_add(1, Ordering::SeqCst);
            rest
        } else {
            anyhow::bail!("unframed text: {text}");
        };

        let mut v = vec![0.0f32; EMBEDDING_DIM];
        for word in body.split_whitespace() {
            let word = word
                .trim_matches(|c: char| c.is_ascii_punctuation() && c != '-')
                .to_lowercase();
            if !word.is_empty() {
                v[word_axis(&word)] += 1.0;
            }
        }
        Ok(v)
    }
}

/// FNV-1a over the word's bytes, folded onto the embedding axes.
pub fn word_axis(word: &str) -> usize {
    let mut h: u32 = 0x811c_9dc5;
    for b in word.bytes() {
        h ^= b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h as usize % EMBEDDING_DIM
}

pub fn record(text: &str, label: &str) -> CorpusRecord {
    CorpusRecord {
        row_index: 0,
        text: text.to_string(),
        label: label.to_string(),
        language: "en".to_string(),
        chapter: label.get(..2).unwrap_or_default().to_string(),
        chapter_name: None,
    }
}

pub fn corpus(rows: &[(&str, &str)]) -> Corpus {
    Corpus::from_records(rows.iter().map(|(text, label)| record(text, label)))
}

/// Five products, one of them under a code outside the curated set.
pub fn trade_corpus() -> Corpus {
    corpus(&[
        ("frozen shrimp peeled", "030617"),
        ("frozen shrimp raw", "030617"),
        ("laptop computer portable", "847130"),
        ("cotton t-shirt knitted", "610910"),
        ("live horses breeding", "010121"),
    ])
}

pub fn trade_curated() -> CuratedLabels {
    CuratedLabels::from_json(
        r#"{
            "030617": {"desc": "Frozen shrimps and prawns", "chapter": "Fish and crustaceans"},
            "847130": {"desc": "Portable automatic data processing machines", "chapter": "Machinery"},
            "610910": {"desc": "T-shirts of cotton, knitted", "chapter": ""}
        }"#,
    )
    .unwrap()
}

/// One layout point per row of [`trade_corpus`].
pub fn trade_projection() -> ProjectionTable {
    let coords = [(0.0, 0.0), (1.0, 0.0), (10.0, 10.0), (-5.0, 3.0), (4.0, -4.0)];
    ProjectionTable::new(
        coords
            .iter()
            .map(|&(x, y)| LatentPoint {
                x,
                y,
                text: None,
                hs_code: None,
                chapter: None,
                chapter_name: None,
                hs_desc: None,
                language: None,
            })
            .collect(),
    )
}

pub struct Fixture {
    pub corpus: Corpus,
    pub curated: CuratedLabels,
    pub projection: Option<ProjectionTable>,
    pub artifacts: ArtifactStore,
    pub embedder: Arc<BagOfWordsEmbedder>,
}

impl Fixture {
    pub fn new(corpus: Corpus, curated: CuratedLabels) -> Self {
        Self {
            corpus,
            curated,
            projection: None,
            artifacts: ArtifactStore::open_in_memory().unwrap(),
            embedder: Arc::new(BagOfWordsEmbedder::default()),
        }
    }

    pub fn trade() -> Self {
        Self::new(trade_corpus(), trade_curated())
    }

    pub fn with_projection(mut self, projection: ProjectionTable) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_db(mut self, path: &Path) -> Self {
        self.artifacts = ArtifactStore::open(path).unwrap();
        self
    }

    pub fn open(self) -> hsknn::error::Result<QueryService> {
        let provider: Arc<dyn EmbeddingProvider> = self.embedder;
        QueryService::open(ServiceParts {
            corpus: self.corpus,
            curated: self.curated,
            provider,
            artifacts: self.artifacts,
            projection: self.projection,
            settings: ClassifierConfig::default(),
            batch_size: 16,
            model_name: "bag-of-words".to_string(),
        })
    }
}

/// Open a service over the trade corpus, returning the embedder for call counts.
pub fn trade_service() -> (QueryService, Arc<BagOfWordsEmbedder>) {
    let fixture = Fixture::trade().with_projection(trade_projection());
    let embedder = Arc::clone(&fixture.embedder);
    (fixture.open().unwrap(), embedder)
}
