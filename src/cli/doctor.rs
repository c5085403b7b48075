//! CLI `doctor` command: inspect the artifact database and input files.

use anyhow::{Context, Result};

use hsknn::config::{expand_tilde, HsknnConfig};
use hsknn::db::ArtifactStore;
use hsknn::engine::LabelSpaceClassifier;

/// Run diagnostics and print a health report. Never rebuilds anything; bundles are
/// reported as persisted, before validation against the current inputs.
pub fn doctor(config: &HsknnConfig) -> Result<()> {
    println!("hsknn Health Report");
    println!("===================");
    println!();
    println!("Inputs:");
    for (name, path) in [
        ("Corpus", &config.data.corpus_path),
        ("Reference", &config.data.reference_path),
        ("Projection", &config.data.projection_path),
    ] {
        let path = expand_tilde(path);
        let status = if path.exists() { "ok" } else { "missing" };
        println!("  {name:<16} {status:<8} {}", path.display());
    }
    println!();

    let db_path = config.resolved_db_path();
    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `hsknn build` to create it.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path)
        .map(|m| m.len())
        .unwrap_or(0);

    let store = ArtifactStore::open(&db_path)
        .context("failed to open database (may be corrupt)")?;

    let report = store.health().context("failed to run health check")?;

    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!();
    println!("Embedding model:");
    println!("  Stored:          {}", report.embedding_model.as_deref().unwrap_or("(not set)"));
    println!("  Configured:      {}", config.embedding.model);
    if let Some(ref stored) = report.embedding_model {
        if stored != &config.embedding.model {
            println!("  WARNING: model mismatch! Run `hsknn build --force` to recompute vectors.");
        } else {
            println!("  Status:          OK (match)");
        }
    }
    println!();
    println!("Artifacts:");
    if report.artifacts.is_empty() {
        println!("  (none persisted)");
    }
    for (key, bytes, updated_at) in &report.artifacts {
        println!("  {key:<20} {:>10}  {updated_at}", format_bytes(*bytes));
    }
    println!();
    println!("Classifier bundle:");
    match LabelSpaceClassifier::load(&store) {
        Ok(bundle) => {
            println!("  Bundle:          {}", bundle.bundle_id());
            println!("  Built at:        {}", bundle.built_at());
            println!("  Fit size:        {} (k = {})", bundle.fit_size(), bundle.k());
            println!("  Classes:         {}", bundle.labels().len());
            if bundle.is_degraded() {
                println!("  WARNING: degraded bundle, fit on the full corpus.");
            }
        }
        Err(e) => println!("  {e}"),
    }
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery: delete {} and run `hsknn build`.", db_path.display());
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
