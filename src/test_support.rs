//! Shared fixtures for unit tests: a small in-memory index and a scripted LLM.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::chunk::chunk_notes;
use crate::embedding::{Embedder, HashingEmbedder};
use crate::generate::{CompletionRequest, GenerationError, LlmProvider};
use crate::index::IndexSnapshot;
use crate::notes::parse_notes;

pub const SAMPLE_NOTES: &str = "\
PATIENT_ID: P001
RISK_LEVEL: HIGH
CHIEF_COMPLAINT: Crushing chest pain radiating to the left arm for 40 minutes.
VITALS: BP 92/60, HR 118, SpO2 91% on room air.
ASSESSMENT: Acute coronary syndrome, suspected NSTEMI. Troponin elevated.
PLAN: Aspirin 325 mg, heparin drip, urgent cardiology consult.
---
PATIENT_ID: P002
RISK_LEVEL: LOW
CHIEF_COMPLAINT: Sore throat and nasal congestion for four days.
VITALS: BP 118/76, HR 72, Temp 37.4 C.
ASSESSMENT: Viral upper respiratory infection.
PLAN: Supportive care, fluids, acetaminophen as needed.
---
PATIENT_ID: P003
RISK_LEVEL: MEDIUM
CHIEF_COMPLAINT: Worsening shortness of breath and wheeze over three days.
HISTORY: COPD on home inhaler therapy.
ASSESSMENT: COPD exacerbation without respiratory failure.
PLAN: Nebulized albuterol, prednisone 40 mg for 5 days.
---
PATIENT_ID: P004
RISK_LEVEL: HIGH
CHIEF_COMPLAINT: Fever, rigors and confusion for one day.
ASSESSMENT: Sepsis with suspected pulmonary source. Lactate 4.1.
PLAN: Blood cultures, broad-spectrum antibiotics, fluid bolus.
";

pub const TEST_DIMS: usize = 128;

/// Index over [`SAMPLE_NOTES`] embedded with the hashing embedder.
pub fn sample_index() -> (Arc<IndexSnapshot>, Arc<dyn Embedder>) {
    let notes = parse_notes(SAMPLE_NOTES).expect("sample notes parse");
    let embedder = HashingEmbedder::new(TEST_DIMS).expect("dims > 0");
    let embedded = chunk_notes(&notes, 300, 50)
        .into_iter()
        .map(|c| {
            let v = embedder.embed_one(&c.text);
            (c, v)
        })
        .collect();
    let snapshot = IndexSnapshot::from_parts(embedder.model_name(), TEST_DIMS, notes, embedded);
    (Arc::new(snapshot), Arc::new(embedder))
}

#[derive(Debug, Clone)]
pub enum MockReply {
    Fixed(String),
    Timeout,
    RateLimited,
    Unauthorized,
}

/// LLM stand-in that records every request.
pub struct MockLlm {
    reply: MockReply,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlm {
    pub fn new(reply: MockReply) -> Self {
        Self {
            reply,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn answering(text: &str) -> Self {
        Self::new(MockReply::Fixed(text.to_string()))
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    fn model_name(&self) -> &str {
        "mock-llm"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.reply {
            MockReply::Fixed(text) => Ok(text.clone()),
            MockReply::Timeout => Err(GenerationError::Timeout(30)),
            MockReply::RateLimited => Err(GenerationError::RateLimited("slow down".into())),
            MockReply::Unauthorized => Err(GenerationError::Unauthorized { status: 401 }),
        }
    }
}
