use anyhow::Result;
use std::sync::Arc;

use hsknn::config::HsknnConfig;
use hsknn::engine::LatentLookup;

/// Place one description in the 2-D corpus layout.
pub async fn locate(config: HsknnConfig, text: String, json: bool) -> Result<()> {
    let service = Arc::new(super::open_service(config).await?);

    let svc = Arc::clone(&service);
    let lookup = tokio::task::spawn_blocking(move || svc.locate_in_latent_space(&text)).await??;

    if json {
        println!("{}", serde_json::to_string_pretty(&lookup)?);
        return Ok(());
    }

    match lookup {
        LatentLookup::NoLatentData => {
            println!("No latent layout loaded. Provide a projection file matching the corpus.");
        }
        LatentLookup::Located(loc) => {
            println!("Position: ({:.4}, {:.4})\n", loc.x, loc.y);
            println!("Nearest curated rows:");
            for n in &loc.neighbors {
                println!(
                    "  - #{} {} (distance: {:.4}, similarity: {:.3}) at ({:.3}, {:.3})",
                    n.row_index,
                    n.point.hs_code.as_deref().unwrap_or("?"),
                    n.distance,
                    n.similarity,
                    n.point.x,
                    n.point.y,
                );
            }
        }
    }

    Ok(())
}
