//! Vector retrieval over an [`IndexSnapshot`].
//!
//! Two ranking modes are supported:
//!
//! - **Similarity**: cosine similarity between the query vector and each
//!   candidate chunk, descending.
//! - **Diverse**: maximal marginal relevance over the top `fetch_k`
//!   candidates. The most relevant candidate is picked first; every later
//!   pick maximizes
//!
//!   ```text
//!   λ · sim(q, c) − (1 − λ) · max_{s ∈ selected} sim(c, s)
//!   ```
//!
//!   so `λ = 1.0` reproduces similarity order and `λ = 0.0` only cares
//!   about redundancy.
//!
//! In both modes ties go to the chunk inserted first. A [`SearchFilter`]
//! restricts candidates before ranking; asking for more results than
//! match returns every match.

use anyhow::{bail, Result};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::embedding::{cosine_similarity, embed_query, Embedder};
use crate::index::{IndexSnapshot, IndexedChunk};
use crate::models::{Chunk, RiskLevel};

/// Ranking strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchMode {
    Similarity,
    Diverse { lambda: f32, fetch_k: usize },
}

impl SearchMode {
    /// Parse `similarity` or `diverse` (alias `mmr`).
    pub fn parse(mode: &str, lambda: f32, fetch_k: usize) -> Result<Self> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "similarity" => Ok(SearchMode::Similarity),
            "diverse" | "mmr" => {
                if !(0.0..=1.0).contains(&lambda) {
                    bail!("lambda must be in [0.0, 1.0], got {}", lambda);
                }
                Ok(SearchMode::Diverse { lambda, fetch_k })
            }
            other => bail!(
                "Unknown search mode: {}. Use similarity or diverse.",
                other
            ),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SearchMode::Similarity => "similarity",
            SearchMode::Diverse { .. } => "diverse",
        }
    }
}

/// Metadata restrictions applied before ranking. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub risk_level: Option<RiskLevel>,
    pub patient_ids: Vec<String>,
}

impl SearchFilter {
    pub fn risk(level: RiskLevel) -> Self {
        Self {
            risk_level: Some(level),
            patient_ids: Vec::new(),
        }
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(level) = self.risk_level {
            if chunk.risk_level != level {
                return false;
            }
        }
        self.patient_ids.is_empty() || self.patient_ids.iter().any(|p| *p == chunk.patient_id)
    }
}

/// A retrieved chunk with its cosine similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub seq: i64,
    pub score: f32,
    pub chunk: Chunk,
}

/// Patients grouped under one risk level.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RiskBucket {
    pub risk_level: RiskLevel,
    pub patient_count: usize,
    pub patient_ids: Vec<String>,
}

/// Aggregate risk across indexed patients. No generation involved.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RiskDistribution {
    /// Number of distinct patients across `levels`.
    pub total_patients: usize,
    pub filter: Option<RiskLevel>,
    /// Highest acuity first.
    pub levels: Vec<RiskBucket>,
}

/// Read-only query interface shared by every request.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<IndexSnapshot>,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    /// Fails if the index was built with a different model or dimensionality.
    pub fn new(index: Arc<IndexSnapshot>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        index.ensure_compatible(embedder.as_ref())?;
        Ok(Self { index, embedder })
    }

    pub fn index(&self) -> &IndexSnapshot {
        &self.index
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Embed `query` and rank up to `k` chunks.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
        mode: SearchMode,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = embed_query(self.embedder.as_ref(), query).await?;
        let results = self.search_by_vector(&query_vec, k, filter, mode);
        tracing::debug!(
            query_len = query.len(),
            k,
            mode = mode.name(),
            hits = results.len(),
            "retrieval complete"
        );
        Ok(results)
    }

    /// Rank up to `k` chunks against an already-embedded query.
    pub fn search_by_vector(
        &self,
        query_vec: &[f32],
        k: usize,
        filter: &SearchFilter,
        mode: SearchMode,
    ) -> Vec<ScoredChunk> {
        if k == 0 {
            return Vec::new();
        }

        let mut candidates: Vec<(&IndexedChunk, f32)> = self
            .index
            .chunks
            .iter()
            .filter(|c| filter.matches(&c.chunk))
            .map(|c| (c, cosine_similarity(query_vec, &c.embedding)))
            .collect();
        candidates.sort_by(|a, b| by_score_then_seq(a.1, a.0.seq, b.1, b.0.seq));

        let picked: Vec<(&IndexedChunk, f32)> = match mode {
            SearchMode::Similarity => candidates.into_iter().take(k).collect(),
            SearchMode::Diverse { lambda, fetch_k } => {
                candidates.truncate(fetch_k.max(k));
                mmr_select(candidates, k, lambda)
            }
        };

        picked
            .into_iter()
            .map(|(c, score)| ScoredChunk {
                seq: c.seq,
                score,
                chunk: c.chunk.clone(),
            })
            .collect()
    }

    /// Every chunk of one patient, in insertion order.
    pub fn chunks_for_patient(&self, patient_id: &str) -> Vec<Chunk> {
        self.index
            .chunks
            .iter()
            .filter(|c| c.chunk.patient_id == patient_id)
            .map(|c| c.chunk.clone())
            .collect()
    }

    /// Distinct patients with the highest risk tag seen on any of their chunks.
    pub fn patients(&self) -> BTreeMap<String, RiskLevel> {
        patient_risk(&self.index)
    }

    pub fn has_patient(&self, patient_id: &str) -> bool {
        self.index
            .chunks
            .iter()
            .any(|c| c.chunk.patient_id == patient_id)
    }

    pub fn risk_distribution(&self, filter: Option<RiskLevel>) -> RiskDistribution {
        risk_distribution(&self.index, filter)
    }
}

/// Highest risk tag per patient across all of its chunks.
pub fn patient_risk(index: &IndexSnapshot) -> BTreeMap<String, RiskLevel> {
    let mut out: BTreeMap<String, RiskLevel> = BTreeMap::new();
    for c in &index.chunks {
        out.entry(c.chunk.patient_id.clone())
            .and_modify(|level| *level = (*level).max(c.chunk.risk_level))
            .or_insert(c.chunk.risk_level);
    }
    out
}

/// Group patients by risk level, optionally keeping a single level.
pub fn risk_distribution(index: &IndexSnapshot, filter: Option<RiskLevel>) -> RiskDistribution {
    let patients = patient_risk(index);
    let levels: Vec<RiskBucket> = RiskLevel::ALL
        .iter()
        .copied()
        .filter(|level| filter.map_or(true, |f| f == *level))
        .map(|level| {
            let patient_ids: Vec<String> = patients
                .iter()
                .filter(|(_, l)| **l == level)
                .map(|(id, _)| id.clone())
                .collect();
            RiskBucket {
                risk_level: level,
                patient_count: patient_ids.len(),
                patient_ids,
            }
        })
        .collect();

    RiskDistribution {
        total_patients: levels.iter().map(|b| b.patient_count).sum(),
        filter,
        levels,
    }
}

fn by_score_then_seq(a_score: f32, a_seq: i64, b_score: f32, b_seq: i64) -> Ordering {
    b_score.total_cmp(&a_score).then(a_seq.cmp(&b_seq))
}

/// Greedy MMR over `pool`, which must already be sorted by relevance.
fn mmr_select(
    pool: Vec<(&IndexedChunk, f32)>,
    k: usize,
    lambda: f32,
) -> Vec<(&IndexedChunk, f32)> {
    let k = k.min(pool.len());
    let mut remaining = pool;
    let mut selected: Vec<(&IndexedChunk, f32)> = Vec::with_capacity(k);

    while selected.len() < k && !remaining.is_empty() {
        let best_idx = if selected.is_empty() {
            0
        } else {
            let mut best_idx = 0;
            let mut best: Option<(f32, i64)> = None;
            for (idx, (cand, relevance)) in remaining.iter().enumerate() {
                let redundancy = selected
                    .iter()
                    .map(|(s, _)| cosine_similarity(&cand.embedding, &s.embedding))
                    .fold(f32::NEG_INFINITY, f32::max);
                let score = lambda * relevance - (1.0 - lambda) * redundancy;
                let better = match best {
                    None => true,
                    Some((best_score, best_seq)) => {
                        by_score_then_seq(score, cand.seq, best_score, best_seq) == Ordering::Less
                    }
                };
                if better {
                    best = Some((score, cand.seq));
                    best_idx = idx;
                }
            }
            best_idx
        };
        selected.push(remaining.remove(best_idx));
    }

    selected
}
