//! CLI `build` command: bring persisted artifacts in line with the current inputs.

use anyhow::{Context, Result};

use hsknn::config::HsknnConfig;

pub async fn build(config: HsknnConfig, force: bool) -> Result<()> {
    if force {
        let db_path = config.resolved_db_path();
        if db_path.exists() {
            let store = hsknn::db::ArtifactStore::open(&db_path)?;
            let removed = store.clear().context("failed to clear artifacts")?;
            println!("Cleared {removed} persisted artifact(s).");
        }
    }

    let service = super::open_service(config).await?;
    let health = service.health();

    println!("Artifacts ready.");
    println!("  Corpus rows:     {}", health.corpus_size);
    println!("  Curated codes:   {}", health.curated_size);
    println!("  Fit size:        {}", health.classifier_fit_size);
    println!("  Classes:         {}", health.class_count);
    if let Some(id) = &health.bundle_id {
        println!("  Bundle:          {id}");
    }
    if health.degraded {
        println!("  WARNING: no corpus row carries a curated code; classifier fit on the full corpus.");
    }
    println!("  Latent points:   {}", health.latent_points);

    Ok(())
}
