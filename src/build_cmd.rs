use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::embedding;
use crate::index::{self, IndexSnapshot};
use crate::retrieve::{Retriever, SearchFilter, SearchMode};

const SMOKE_QUERY: &str = "Which patients are high risk?";

/// Rebuild the index from the configured notes file, then run one query
/// against the fresh index to confirm it loads and returns hits.
pub async fn run_build(config: &Config) -> Result<()> {
    let embedder = embedding::create_embedder(&config.embedding)?;
    println!(
        "Building index from {} with {} ...",
        config.data.notes_path.display(),
        embedder.model_name()
    );

    let report = index::build_index(config, embedder.as_ref())
        .await
        .context("Index build failed")?;

    println!("build ok");
    println!("  index:   {}", report.path.display());
    println!("  notes:   {}", report.meta.note_count);
    println!("  chunks:  {}", report.meta.chunk_count);
    println!("  model:   {} ({} dims)", report.meta.model, report.meta.dims);
    println!(
        "  chunking: {} chars, {} overlap",
        report.meta.chunk_size, report.meta.chunk_overlap
    );
    println!("  elapsed: {} ms", report.elapsed_ms);

    let snapshot = IndexSnapshot::load(&report.path).await?;
    let retriever = Retriever::new(Arc::new(snapshot), embedder)?;
    let hits = retriever
        .search(
            SMOKE_QUERY,
            config.retrieval.top_k,
            &SearchFilter::default(),
            SearchMode::Similarity,
        )
        .await
        .context("Smoke query against the new index failed")?;

    println!();
    println!("smoke query: \"{}\"", SMOKE_QUERY);
    for hit in &hits {
        println!(
            "  [{:.3}] {} ({})",
            hit.score, hit.chunk.patient_id, hit.chunk.risk_level
        );
    }
    tracing::info!(hits = hits.len(), "smoke query complete");

    Ok(())
}
