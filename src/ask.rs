use anyhow::Result;

use crate::config::Config;
use crate::pipeline::ClinicalRag;

/// Answer one question from the command line and print it with its sources.
pub async fn run_ask(config: &Config, question: &str) -> Result<()> {
    let rag = ClinicalRag::from_config(config).await?;
    let answer = rag.ask(question).await?;

    println!("{}", answer.answer);
    println!();
    println!(
        "template: {}  model: {}  latency: {:.0} ms",
        answer.template, answer.model, answer.latency_ms
    );
    println!("sources:");
    for source in &answer.sources {
        let score = source
            .score
            .map(|s| format!("{:.3}", s))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  [{}] {} ({}) {}",
            score, source.patient_id, source.risk_level, source.chunk_id
        );
    }
    Ok(())
}
