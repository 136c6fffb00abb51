//! Core data models used throughout the clinical RAG pipeline.
//!
//! These types represent the notes, chunks, conversation turns and answers
//! that flow from ingestion through retrieval and generation. All of them
//! are immutable once created; the index is rebuilt rather than updated.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Acuity classification attached to every note and denormalized onto its chunks.
///
/// Ordering follows acuity, so `RiskLevel::High > RiskLevel::Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [RiskLevel::High, RiskLevel::Medium, RiskLevel::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "HIGH" => Ok(RiskLevel::High),
            other => anyhow::bail!("invalid risk level '{}': expected LOW, MEDIUM or HIGH", other),
        }
    }
}

/// Structured sections parsed out of a note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteFields {
    pub chief_complaint: String,
    pub history: String,
    pub vitals: String,
    pub assessment: String,
    pub plan: String,
}

/// A single clinical note as loaded from the notes file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicalNote {
    /// `<patient_id>#<n>`, unique within a dataset.
    pub id: String,
    pub patient_id: String,
    pub risk_level: RiskLevel,
    /// Full free text of the record, used for chunking.
    pub content: String,
    pub fields: NoteFields,
}

/// A bounded window of a note's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub id: String,
    pub note_id: String,
    pub patient_id: String,
    pub risk_level: RiskLevel,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// Who said a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One chronological entry of client-held conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A chunk that was supplied to the model as context, for traceability.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub chunk_id: String,
    pub patient_id: String,
    pub risk_level: RiskLevel,
    pub chunk_index: i64,
    /// Query similarity; absent for direct patient lookups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    pub text: String,
}

impl SourceRef {
    pub fn from_chunk(chunk: &Chunk, score: Option<f32>) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            patient_id: chunk.patient_id.clone(),
            risk_level: chunk.risk_level,
            chunk_index: chunk.chunk_index,
            score,
            text: chunk.text.clone(),
        }
    }
}

/// Generated answer plus the context it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question: String,
    pub answer: String,
    pub template: String,
    pub model: String,
    pub sources: Vec<SourceRef>,
    /// Formatted context block sent to the model.
    pub context: String,
    pub latency_ms: f64,
}
