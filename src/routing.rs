//! Keyword routing from a question to a prompt template.
//!
//! Rules are an ordered table evaluated top to bottom; the first rule with
//! any keyword contained in the lower-cased text wins.

use crate::models::{ConversationTurn, Role};
use crate::prompt::TemplateId;

/// One routing rule: any keyword selects `template`.
#[derive(Debug, Clone, Copy)]
pub struct RoutingRule {
    pub template: TemplateId,
    pub keywords: &'static [&'static str],
}

impl RoutingRule {
    pub fn matches(&self, lowered: &str) -> bool {
        self.keywords.iter().any(|k| lowered.contains(k))
    }
}

pub const RULES: &[RoutingRule] = &[
    RoutingRule {
        template: TemplateId::RiskAssessment,
        keywords: &["risk", "triage", "urgent", "critical", "priority"],
    },
    RoutingRule {
        template: TemplateId::PatientSummary,
        keywords: &["summarize", "summary", "overview", "tell me about patient"],
    },
    RoutingRule {
        template: TemplateId::TreatmentPlan,
        keywords: &["medication", "drug", "treatment", "prescribed", "plan", "dosage"],
    },
];

pub const DEFAULT_TEMPLATE: TemplateId = TemplateId::GeneralQa;

/// First matching rule for `text`, if any.
pub fn match_rules(text: &str) -> Option<TemplateId> {
    let lowered = text.to_lowercase();
    RULES.iter().find(|r| r.matches(&lowered)).map(|r| r.template)
}

/// Pick a template for `query`. A query with no keyword falls back to the
/// most recent user turn, then to [`DEFAULT_TEMPLATE`].
pub fn route(query: &str, history: &[ConversationTurn]) -> TemplateId {
    if let Some(template) = match_rules(query) {
        return template;
    }
    history
        .iter()
        .rev()
        .find(|t| t.role == Role::User)
        .and_then(|t| match_rules(&t.content))
        .unwrap_or(DEFAULT_TEMPLATE)
}
