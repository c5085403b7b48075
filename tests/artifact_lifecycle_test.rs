mod helpers;

use std::sync::Arc;

use helpers::{corpus, trade_corpus, trade_curated, Fixture};
use hsknn::corpus::{Corpus, CuratedLabels};
use hsknn::db::ArtifactStore;
use hsknn::engine::classifier::{CLASSIFIER_KEY, FIT_INDEX_KEY, SAMPLES_KEY};
use hsknn::engine::store::VECTORS_KEY;
use hsknn::engine::ContextFields;

fn widget_corpus(rows: usize) -> Corpus {
    let texts: Vec<String> = (0..rows).map(|i| format!("widget model{i}")).collect();
    let rows: Vec<(&str, &str)> = texts
        .iter()
        .enumerate()
        .map(|(i, t)| (t.as_str(), if i % 2 == 0 { "030617" } else { "847130" }))
        .collect();
    corpus(&rows)
}

#[test]
fn first_open_persists_every_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("artifacts.db");

    let fixture = Fixture::trade().with_db(&db_path);
    let embedder = Arc::clone(&fixture.embedder);
    let service = fixture.open().unwrap();
    assert_eq!(embedder.passages(), 5);

    let artifacts = service.artifacts();
    for key in [VECTORS_KEY, CLASSIFIER_KEY, FIT_INDEX_KEY, "classifier.samples", "label_encoding"] {
        assert!(artifacts.get(key).unwrap().is_some(), "{key} not persisted");
    }
    assert_eq!(
        artifacts.embedding_model().unwrap().as_deref(),
        Some("bag-of-words")
    );
}

#[test]
fn unchanged_inputs_reuse_persisted_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("artifacts.db");

    let first_id = {
        let service = Fixture::trade().with_db(&db_path).open().unwrap();
        service.health().bundle_id.unwrap()
    };

    let fixture = Fixture::trade().with_db(&db_path);
    let embedder = Arc::clone(&fixture.embedder);
    let service = fixture.open().unwrap();

    assert_eq!(embedder.passages(), 0, "vectors should load, not recompute");
    assert_eq!(service.health().bundle_id.unwrap(), first_id);
}

#[test]
fn grown_corpus_recomputes_every_vector() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("artifacts.db");
    let curated = CuratedLabels::from_codes(["030617", "847130"]);

    let first_id = {
        let fixture = Fixture::new(widget_corpus(100), curated.clone()).with_db(&db_path);
        let embedder = Arc::clone(&fixture.embedder);
        let service = fixture.open().unwrap();
        assert_eq!(embedder.passages(), 100);
        assert_eq!(service.health().classifier_fit_size, 100);
        service.health().bundle_id.unwrap()
    };

    let fixture = Fixture::new(widget_corpus(150), curated).with_db(&db_path);
    let embedder = Arc::clone(&fixture.embedder);
    let service = fixture.open().unwrap();

    assert_eq!(embedder.passages(), 150, "all rows re-embedded, not just the new ones");
    assert_eq!(service.embeddings().unwrap().len(), 150);

    let health = service.health();
    assert_eq!(health.corpus_size, 150);
    assert_eq!(health.classifier_fit_size, 150);
    assert_ne!(health.bundle_id.unwrap(), first_id, "classifier rebuilt with the vectors");

    let persisted = ArtifactStore::open(&db_path).unwrap();
    let bundle = hsknn::engine::LabelSpaceClassifier::load(&persisted).unwrap();
    assert_eq!(bundle.fit_size(), 150);
}

#[test]
fn curated_set_change_rebuilds_only_the_classifier() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("artifacts.db");

    {
        Fixture::trade().with_db(&db_path).open().unwrap();
    }

    let fixture = Fixture::new(trade_corpus(), CuratedLabels::from_codes(["030617"]))
        .with_db(&db_path);
    let embedder = Arc::clone(&fixture.embedder);
    let service = fixture.open().unwrap();

    assert_eq!(embedder.passages(), 0);
    let bundle = service.classifier().unwrap();
    assert_eq!(bundle.fit_size(), 2);
    assert_eq!(bundle.labels().classes(), &["030617".to_string()]);

    let response = service.classify("laptop", &ContextFields::default()).unwrap();
    assert!(response.predictions.iter().all(|p| p.code == "030617"));
}

#[test]
fn grown_curated_set_refits_the_classifier() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("artifacts.db");

    let first_id = {
        let service = Fixture::trade().with_db(&db_path).open().unwrap();
        assert_eq!(service.health().classifier_fit_size, 4);
        service.health().bundle_id.unwrap()
    };

    let curated = CuratedLabels::from_codes(["030617", "847130", "610910", "010121"]);
    let fixture = Fixture::new(trade_corpus(), curated).with_db(&db_path);
    let embedder = Arc::clone(&fixture.embedder);
    let service = fixture.open().unwrap();

    assert_eq!(embedder.passages(), 0);
    let health = service.health();
    assert_eq!(health.classifier_fit_size, 5);
    assert_eq!(health.class_count, 4);
    assert_ne!(health.bundle_id.unwrap(), first_id);

    let response = service
        .classify("live horses breeding", &ContextFields::default())
        .unwrap();
    assert_eq!(response.predictions[0].code, "010121");
}

#[test]
fn corrupt_bundle_parts_are_rebuilt() {
    for key in [FIT_INDEX_KEY, SAMPLES_KEY] {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("artifacts.db");

        let first_id = {
            let service = Fixture::trade().with_db(&db_path).open().unwrap();
            service.artifacts().put(key, b"garbage").unwrap();
            service.health().bundle_id.unwrap()
        };

        let fixture = Fixture::trade().with_db(&db_path);
        let embedder = Arc::clone(&fixture.embedder);
        let service = fixture.open().unwrap();

        assert_eq!(embedder.passages(), 0, "{key}: vectors were intact");
        let health = service.health();
        assert!(health.loaded);
        assert_eq!(health.classifier_fit_size, 4);
        assert_ne!(health.bundle_id.unwrap(), first_id, "{key}: bundle not rebuilt");

        let persisted = ArtifactStore::open(&db_path).unwrap();
        assert!(hsknn::engine::LabelSpaceClassifier::load(&persisted).is_ok());
    }
}

#[test]
fn relabeled_row_invalidates_the_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("artifacts.db");

    let first_id = {
        let service = Fixture::trade().with_db(&db_path).open().unwrap();
        service.health().bundle_id.unwrap()
    };

    let relabeled = corpus(&[
        ("frozen shrimp peeled", "030617"),
        ("frozen shrimp raw", "030617"),
        ("laptop computer portable", "610910"),
        ("cotton t-shirt knitted", "847130"),
        ("live horses breeding", "010121"),
    ]);
    let service = Fixture::new(relabeled, trade_curated())
        .with_db(&db_path)
        .open()
        .unwrap();

    assert_ne!(service.health().bundle_id.unwrap(), first_id);
    let response = service.classify("laptop", &ContextFields::default()).unwrap();
    assert_eq!(response.predictions[0].code, "610910");
}

#[test]
fn corrupt_vectors_are_rebuilt() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("artifacts.db");

    {
        let service = Fixture::trade().with_db(&db_path).open().unwrap();
        service.artifacts().put(VECTORS_KEY, b"garbage").unwrap();
    }

    let fixture = Fixture::trade().with_db(&db_path);
    let embedder = Arc::clone(&fixture.embedder);
    let service = fixture.open().unwrap();

    assert_eq!(embedder.passages(), 5);
    assert_eq!(service.embeddings().unwrap().len(), 5);
}

#[test]
fn forced_rebuild_recomputes_and_republishes() {
    let fixture = Fixture::trade();
    let embedder = Arc::clone(&fixture.embedder);
    let service = fixture.open().unwrap();
    let first_id = service.health().bundle_id.unwrap();

    service.rebuild().unwrap();

    assert_eq!(embedder.passages(), 10);
    let health = service.health();
    assert!(health.loaded);
    assert_ne!(health.bundle_id.unwrap(), first_id);
}
