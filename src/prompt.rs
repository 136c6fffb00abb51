//! Prompt templates and rendering.
//!
//! Every completion is two messages: the shared [`SYSTEM_PROMPT`] with the
//! retrieved context filled in, and a per-template user message carrying
//! the question and (optionally) recent conversation history.
//!
//! Slots are written `{name}`. [`render`] substitutes the slots it is given
//! and leaves any other braces untouched.

use serde::Serialize;
use std::fmt;

use crate::models::{Chunk, ConversationTurn, Role};

/// Identifies one of the fixed prompt templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateId {
    GeneralQa,
    RiskAssessment,
    PatientSummary,
    TreatmentPlan,
}

impl TemplateId {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateId::GeneralQa => "general_qa",
            TemplateId::RiskAssessment => "risk_assessment",
            TemplateId::PatientSummary => "patient_summary",
            TemplateId::TreatmentPlan => "treatment_plan",
        }
    }

    /// User-message template for this id.
    pub fn user_template(&self) -> &'static str {
        match self {
            TemplateId::GeneralQa => GENERAL_QA_TEMPLATE,
            TemplateId::RiskAssessment => RISK_ASSESSMENT_TEMPLATE,
            TemplateId::PatientSummary => PATIENT_SUMMARY_TEMPLATE,
            TemplateId::TreatmentPlan => TREATMENT_PLAN_TEMPLATE,
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const SYSTEM_PROMPT: &str = "You are ClinicalBot, an AI assistant specialized in analyzing clinical notes and patient records.

STRICT RULES:
1. Answer ONLY based on the provided clinical context below.
2. If the answer is NOT in the context, say: \"I don't have enough information in the provided records to answer that.\"
3. NEVER fabricate patient data, diagnoses, or medical facts.
4. Always cite the Patient ID (e.g., P001) when referencing a specific patient.
5. For HIGH risk patients, explicitly highlight the risk level.
6. You are a decision-support tool. Always recommend physician verification.

CONTEXT FROM CLINICAL RECORDS:
{context}
";

const GENERAL_QA_TEMPLATE: &str = "{history}Clinical Question: {query}

Provide a concise, accurate answer:";

const RISK_ASSESSMENT_TEMPLATE: &str = "{history}Perform a risk assessment for the following query: {query}

Structure your response as:
HIGH RISK PATIENTS: [list patient IDs and primary concern]
MEDIUM RISK PATIENTS: [list patient IDs and primary concern]
LOW RISK PATIENTS: [list patient IDs and primary concern]

RECOMMENDATION: [immediate action required?]";

const PATIENT_SUMMARY_TEMPLATE: &str = "{history}Summarize the clinical details for: {query}

Structure your response as:
PATIENT: [ID]
CHIEF COMPLAINT:
VITALS: [key abnormals only]
ASSESSMENT:
PLAN: [key interventions]
RISK LEVEL:";

const TREATMENT_PLAN_TEMPLATE: &str = "{history}Based on the clinical records, answer this treatment question: {query}

List:
- Medications prescribed (with dosages if available)
- Procedures ordered
- Consults requested
- Follow-up actions

Reminder: This is AI-assisted decision support. Always verify with the attending physician.";

/// Substitute `{name}` slots. Slots without a value are left as-is.
///
/// The template is scanned once, so braces inside substituted values are
/// never expanded.
pub fn render(template: &str, slots: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            slots
                .iter()
                .find(|(slot, _)| *slot == name)
                .map(|(_, value)| (*value, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Context block: one `[Source: P001 | Risk: HIGH]` header per chunk.
pub fn format_context<'a>(chunks: impl IntoIterator<Item = &'a Chunk>) -> String {
    chunks
        .into_iter()
        .map(|c| format!("[Source: {} | Risk: {}]\n{}", c.patient_id, c.risk_level, c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Last `limit` turns as `User:` / `ClinicalBot:` lines. Empty when there is no history.
pub fn format_history(history: &[ConversationTurn], limit: usize) -> String {
    let start = history.len().saturating_sub(limit);
    let lines: Vec<String> = history[start..]
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                Role::User => "User",
                Role::Assistant => "ClinicalBot",
            };
            format!("{}: {}", speaker, turn.content.trim())
        })
        .collect();

    if lines.is_empty() {
        String::new()
    } else {
        format!("Conversation so far:\n{}\n\n", lines.join("\n"))
    }
}

/// Rendered (system, user) message pair ready for a completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

pub fn build_prompt(template: TemplateId, context: &str, query: &str, history: &str) -> RenderedPrompt {
    RenderedPrompt {
        system: render(SYSTEM_PROMPT, &[("context", context)]),
        user: render(template.user_template(), &[("query", query), ("history", history)]),
    }
}
