use anyhow::Result;
use std::sync::Arc;

use hsknn::config::HsknnConfig;
use hsknn::engine::{ContextFields, DeclaredValue};

use crate::ClassifyArgs;

/// Classify one description from the terminal.
pub async fn classify(config: HsknnConfig, args: ClassifyArgs) -> Result<()> {
    let service = Arc::new(super::open_service(config).await?);

    let context = ContextFields {
        origin: args.origin,
        destination: args.destination,
        value: args
            .value
            .zip(args.currency)
            .map(|(amount, currency)| DeclaredValue { amount, currency }),
    };

    let text = args.text;
    let svc = Arc::clone(&service);
    let response = tokio::task::spawn_blocking(move || svc.classify(&text, &context)).await??;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.enriched_query != response.query {
        println!("Query: {}", response.enriched_query);
    }

    if response.predictions.is_empty() {
        println!("No code reached the confidence floor.");
    } else {
        println!("Predictions ({:.1} ms):\n", response.inference_time_ms);
        for (i, p) in response.predictions.iter().enumerate() {
            println!(
                "  {}. {} ({:.1}%) [ch. {}, heading {}]",
                i + 1,
                p.code,
                p.confidence * 100.0,
                p.chapter_code,
                p.heading_code,
            );
            println!("     {}", preview(&p.description, 100));
        }
    }

    if !response.similar_examples.is_empty() {
        println!("\nSimilar examples:");
        for ex in &response.similar_examples {
            println!(
                "  - #{} {} (similarity: {:.3}) {}",
                ex.row_index,
                ex.code,
                ex.similarity,
                preview(&ex.text, 80)
            );
        }
    }

    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}
