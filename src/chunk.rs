//! Overlapping character-window chunker.
//!
//! Splits note text into [`Chunk`]s of at most `chunk_size` characters.
//! Consecutive windows of the same note share exactly `chunk_overlap`
//! characters, so concatenating every window minus its leading overlap
//! reproduces the original text.
//!
//! A window prefers to end just before a whitespace character; when no
//! whitespace falls past `start + overlap` the window is cut hard at
//! `chunk_size`. Sizes are measured in `char`s, never bytes, so multi-byte
//! text is never split inside a code point.

use sha2::{Digest, Sha256};

use crate::models::{Chunk, ClinicalNote};

/// Split a note into overlapping windows. Indices are contiguous from 0.
///
/// Callers must ensure `chunk_overlap < chunk_size` (enforced by config
/// validation); a degenerate pair is clamped so the loop always advances.
pub fn chunk_note(note: &ClinicalNote, chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    split_windows(&note.content, chunk_size, chunk_overlap)
        .into_iter()
        .enumerate()
        .map(|(i, text)| make_chunk(note, i as i64, &text))
        .collect()
}

/// Chunk every note, preserving note order.
pub fn chunk_notes(notes: &[ClinicalNote], chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    notes
        .iter()
        .flat_map(|n| chunk_note(n, chunk_size, chunk_overlap))
        .collect()
}

fn split_windows(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    if n == 0 {
        return Vec::new();
    }

    let size = chunk_size.max(1);
    let overlap = chunk_overlap.min(size - 1);

    let mut windows = Vec::new();
    let mut start = 0usize;
    loop {
        let hard_end = (start + size).min(n);
        if hard_end == n {
            windows.push(chars[start..n].iter().collect());
            break;
        }

        // Cut before the last whitespace in range, keeping end > start + overlap.
        let end = (start + overlap + 1..=hard_end)
            .rev()
            .find(|&e| chars[e].is_whitespace())
            .unwrap_or(hard_end);

        windows.push(chars[start..end].iter().collect());
        start = end - overlap;
    }

    windows
}

fn make_chunk(note: &ClinicalNote, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{}:{}", note.id, index),
        note_id: note.id.clone(),
        patient_id: note.patient_id.clone(),
        risk_level: note.risk_level,
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
