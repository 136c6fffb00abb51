//! Request orchestration: validate → retrieve → route → generate.
//!
//! [`ClinicalRag`] is built once at startup and shared by every request.
//! It holds no mutable state; conversation history is supplied by the
//! caller on each call.

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::generate::{
    generate, ChatCompletionsProvider, GenerationError, GenerationParams, LlmProvider,
};
use crate::index::IndexSnapshot;
use crate::models::{Answer, Chunk, ConversationTurn, RiskLevel, Role, SourceRef};
use crate::notes::is_valid_patient_id;
use crate::prompt::{format_context, TemplateId};
use crate::retrieve::{Retriever, RiskDistribution, SearchFilter, SearchMode};
use crate::routing::route;

pub const MIN_QUESTION_CHARS: usize = 3;
pub const MAX_QUESTION_CHARS: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),
    #[error("patient {0} not found")]
    PatientNotFound(String),
    #[error("retrieval failed: {0:#}")]
    Retrieval(anyhow::Error),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// Chart-review result for a single patient.
#[derive(Debug, Clone, Serialize)]
pub struct PatientSummary {
    pub patient_id: String,
    pub risk_level: RiskLevel,
    pub summary: String,
    pub model: String,
    pub sources: Vec<SourceRef>,
    pub latency_ms: f64,
}

pub struct ClinicalRag {
    retriever: Retriever,
    llm: Arc<dyn LlmProvider>,
    params: GenerationParams,
    top_k: usize,
    mode: SearchMode,
}

impl ClinicalRag {
    pub fn new(retriever: Retriever, llm: Arc<dyn LlmProvider>, config: &Config) -> Result<Self> {
        Ok(Self {
            retriever,
            llm,
            params: GenerationParams::from(&config.llm),
            top_k: config.retrieval.top_k,
            mode: config.retrieval.search_mode()?,
        })
    }

    /// Load the persisted index, the query embedder and the LLM client.
    ///
    /// Order matters for error reporting: a missing index is reported before
    /// a missing API key.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let index = IndexSnapshot::load(&config.index.path).await?;
        let embedder = create_embedder(&config.embedding)?;
        let retriever = Retriever::new(Arc::new(index), embedder)?;

        let llm = ChatCompletionsProvider::from_config(&config.llm)?;
        tracing::info!(
            notes = retriever.index().notes.len(),
            chunks = retriever.index().chunks.len(),
            embedding_model = %retriever.index().meta.model,
            llm_model = %config.llm.model,
            "pipeline ready"
        );
        Self::new(retriever, Arc::new(llm), config)
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// One-shot question.
    pub async fn ask(&self, question: &str) -> Result<Answer, PipelineError> {
        self.answer(question, &[]).await
    }

    /// Question with client-held history, oldest turn first.
    pub async fn chat(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<Answer, PipelineError> {
        self.answer(question, history).await
    }

    async fn answer(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<Answer, PipelineError> {
        let started = Instant::now();
        let question = validate_question(question)?;

        let filter = SearchFilter {
            risk_level: None,
            patient_ids: mentioned_patients(question)
                .into_iter()
                .filter(|id| self.retriever.has_patient(id))
                .collect(),
        };
        let retrieval_query = enrich_query(question, history, self.params.history_turns);

        let hits = self
            .retriever
            .search(&retrieval_query, self.top_k, &filter, self.mode)
            .await
            .map_err(PipelineError::Retrieval)?;

        let template = route(question, history);
        let chunks: Vec<Chunk> = hits.iter().map(|h| h.chunk.clone()).collect();

        let text = generate(
            self.llm.as_ref(),
            self.params,
            template,
            &chunks,
            question,
            history,
        )
        .await
        .inspect_err(|e| tracing::warn!(error = %e, template = %template, "generation failed"))?;

        let latency_ms = elapsed_ms(started);
        tracing::info!(
            template = %template,
            chunks = chunks.len(),
            patients = filter.patient_ids.len(),
            latency_ms,
            "answered question"
        );

        Ok(Answer {
            question: question.to_string(),
            answer: text,
            template: template.to_string(),
            model: self.llm.model_name().to_string(),
            sources: hits
                .iter()
                .map(|h| SourceRef::from_chunk(&h.chunk, Some(h.score)))
                .collect(),
            context: format_context(&chunks),
            latency_ms,
        })
    }

    /// Risk distribution from chunk metadata; never calls the LLM.
    pub fn risk_summary(&self, filter: Option<RiskLevel>) -> RiskDistribution {
        self.retriever.risk_distribution(filter)
    }

    /// Summarize every chunk of one patient with the patient-summary template.
    pub async fn patient_summary(&self, patient_id: &str) -> Result<PatientSummary, PipelineError> {
        let started = Instant::now();
        let patient_id = normalize_patient_id(patient_id)?;

        let chunks = self.retriever.chunks_for_patient(&patient_id);
        if chunks.is_empty() {
            return Err(PipelineError::PatientNotFound(patient_id));
        }
        let risk_level = chunks
            .iter()
            .map(|c| c.risk_level)
            .max()
            .unwrap_or(RiskLevel::Low);

        let query = format!(
            "Please provide a comprehensive clinical summary for patient {}.",
            patient_id
        );
        let summary = generate(
            self.llm.as_ref(),
            self.params,
            TemplateId::PatientSummary,
            &chunks,
            &query,
            &[],
        )
        .await?;

        let latency_ms = elapsed_ms(started);
        tracing::info!(patient = %patient_id, chunks = chunks.len(), latency_ms, "patient summary");

        Ok(PatientSummary {
            patient_id,
            risk_level,
            summary,
            model: self.llm.model_name().to_string(),
            sources: chunks.iter().map(|c| SourceRef::from_chunk(c, None)).collect(),
            latency_ms,
        })
    }
}

/// Trim and length-check a question.
pub fn validate_question(question: &str) -> Result<&str, PipelineError> {
    let trimmed = question.trim();
    let len = trimmed.chars().count();
    if len < MIN_QUESTION_CHARS || len > MAX_QUESTION_CHARS {
        return Err(PipelineError::Validation(format!(
            "question must be between {} and {} characters, got {}",
            MIN_QUESTION_CHARS, MAX_QUESTION_CHARS, len
        )));
    }
    Ok(trimmed)
}

/// Trim and upper-case, then require `P<digits>`.
pub fn normalize_patient_id(raw: &str) -> Result<String, PipelineError> {
    let id = raw.trim().to_ascii_uppercase();
    if !is_valid_patient_id(&id) {
        return Err(PipelineError::Validation(format!(
            "invalid patient id '{}': expected P followed by digits",
            raw.trim()
        )));
    }
    Ok(id)
}

fn patient_mention_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bP[0-9]+\b").expect("static regex"))
}

/// Patient ids mentioned in `text`, upper-cased, first occurrence order.
pub fn mentioned_patients(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for m in patient_mention_re().find_iter(text) {
        let id = m.as_str().to_ascii_uppercase();
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// Retrieval text for a chat turn: recent history lines plus the question.
fn enrich_query(question: &str, history: &[ConversationTurn], limit: usize) -> String {
    if history.is_empty() {
        return question.to_string();
    }
    let start = history.len().saturating_sub(limit);
    let mut out = String::new();
    for turn in &history[start..] {
        let speaker = match turn.role {
            Role::User => "User",
            Role::Assistant => "ClinicalBot",
        };
        out.push_str(&format!("{}: {}\n", speaker, turn.content.trim()));
    }
    out.push_str(&format!("Current Question: {}", question));
    out
}

fn elapsed_ms(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 100_000.0).round() / 100.0
}
