use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding;
use crate::index::IndexSnapshot;
use crate::models::RiskLevel;
use crate::pipeline::normalize_patient_id;
use crate::retrieve::{Retriever, ScoredChunk, SearchFilter, SearchMode};

/// Command-line overrides for a single search.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub k: Option<usize>,
    pub mode: Option<String>,
    pub lambda: Option<f32>,
    pub risk: Option<RiskLevel>,
    pub patient: Option<String>,
}

impl SearchOptions {
    /// Merge with `[retrieval]` defaults.
    fn resolve(&self, config: &Config) -> Result<(usize, SearchMode, SearchFilter)> {
        let retrieval = &config.retrieval;
        let k = self.k.unwrap_or(retrieval.top_k);
        let mode = SearchMode::parse(
            self.mode.as_deref().unwrap_or(&retrieval.mode),
            self.lambda.unwrap_or(retrieval.mmr_lambda),
            retrieval.fetch_k,
        )?;
        let patient_ids = match &self.patient {
            Some(raw) => vec![normalize_patient_id(raw)?],
            None => Vec::new(),
        };
        let filter = SearchFilter {
            risk_level: self.risk,
            patient_ids,
        };
        Ok((k, mode, filter))
    }
}

/// Retrieve chunks for `query` and print them ranked, without calling the LLM.
pub async fn run_search(config: &Config, query: &str, options: &SearchOptions) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    let (k, mode, filter) = options.resolve(config)?;

    let index = IndexSnapshot::load(&config.index.path).await?;
    let embedder = embedding::create_embedder(&config.embedding)?;
    let retriever = Retriever::new(Arc::new(index), embedder)?;

    let hits = retriever.search(query, k, &filter, mode).await?;
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    print_hits(&hits, mode);
    Ok(())
}

fn print_hits(hits: &[ScoredChunk], mode: SearchMode) {
    println!("{} result(s), mode: {}", hits.len(), mode.name());
    println!();
    for (i, hit) in hits.iter().enumerate() {
        let c = &hit.chunk;
        println!(
            "{}. [{:.3}] {} / {} / chunk {}",
            i + 1,
            hit.score,
            c.patient_id,
            c.risk_level,
            c.chunk_index
        );
        println!("    excerpt: \"{}\"", excerpt(&c.text, 200));
        println!("    id: {}", c.id);
        println!();
    }
}

/// Single-line excerpt of at most `max_chars` characters.
fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_flattens_and_truncates() {
        assert_eq!(excerpt("a\n  b\tc", 10), "a b c");
        assert_eq!(excerpt("abcdef ghij", 7), "abcdef...");
    }

    #[test]
    fn test_options_fall_back_to_config() {
        let config = Config::minimal();
        let (k, mode, filter) = SearchOptions::default().resolve(&config).unwrap();
        assert_eq!(k, 4);
        assert_eq!(mode, SearchMode::Diverse { lambda: 0.5, fetch_k: 20 });
        assert_eq!(filter, SearchFilter::default());
    }

    #[test]
    fn test_options_override() {
        let options = SearchOptions {
            k: Some(2),
            mode: Some("similarity".into()),
            lambda: None,
            risk: Some(RiskLevel::High),
            patient: Some(" p004".into()),
        };
        let (k, mode, filter) = options.resolve(&Config::minimal()).unwrap();
        assert_eq!(k, 2);
        assert_eq!(mode, SearchMode::Similarity);
        assert_eq!(filter.risk_level, Some(RiskLevel::High));
        assert_eq!(filter.patient_ids, vec!["P004"]);
    }

    #[test]
    fn test_options_reject_bad_lambda_and_patient() {
        let bad_lambda = SearchOptions {
            lambda: Some(2.0),
            ..Default::default()
        };
        assert!(bad_lambda.resolve(&Config::minimal()).is_err());

        let bad_patient = SearchOptions {
            patient: Some("nobody".into()),
            ..Default::default()
        };
        assert!(bad_patient.resolve(&Config::minimal()).is_err());
    }
}
