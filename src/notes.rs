//! Clinical notes file loading and serialization.
//!
//! A notes file is plain text: records are separated by a line containing
//! only `---`, and each record is a list of `KEY: value` lines. Lines that
//! do not start with a recognized key continue the previous field.
//!
//! ```text
//! PATIENT_ID: P001
//! RISK_LEVEL: HIGH
//! CHIEF_COMPLAINT: Crushing chest pain radiating to the left arm.
//! VITALS: BP 92/60, HR 118, SpO2 91% on room air.
//! ---
//! PATIENT_ID: P002
//! ...
//! ```
//!
//! Any malformed record aborts the whole load; a partially loaded dataset
//! is never indexed.

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use crate::models::{ClinicalNote, NoteFields, RiskLevel};

const RECORD_SEPARATOR: &str = "---";

fn patient_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^P[0-9]+$").expect("static regex"))
}

/// Returns true if `id` has the `P<digits>` shape used for patient ids.
pub fn is_valid_patient_id(id: &str) -> bool {
    patient_id_re().is_match(id)
}

/// Read and parse every note in `path`.
pub fn load_notes(path: &Path) -> Result<Vec<ClinicalNote>> {
    if !path.exists() {
        bail!("Notes file not found: {}", path.display());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read notes file: {}", path.display()))?;
    let notes =
        parse_notes(&raw).with_context(|| format!("Malformed notes file: {}", path.display()))?;
    tracing::info!(count = notes.len(), path = %path.display(), "loaded clinical notes");
    Ok(notes)
}

/// Parse notes from the `---`-separated text format.
pub fn parse_notes(raw: &str) -> Result<Vec<ClinicalNote>> {
    let mut notes = Vec::new();
    let mut per_patient: HashMap<String, usize> = HashMap::new();

    for (i, record) in split_records(raw).into_iter().enumerate() {
        let record_no = i + 1;
        let parsed =
            parse_record(&record).with_context(|| format!("record {} is invalid", record_no))?;

        let ordinal = per_patient.entry(parsed.patient_id.clone()).or_insert(0);
        *ordinal += 1;

        notes.push(ClinicalNote {
            id: format!("{}#{}", parsed.patient_id, ordinal),
            patient_id: parsed.patient_id,
            risk_level: parsed.risk_level,
            content: record,
            fields: parsed.fields,
        });
    }

    Ok(notes)
}

fn split_records(raw: &str) -> Vec<String> {
    let mut records = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in raw.lines() {
        if line.trim() == RECORD_SEPARATOR {
            push_record(&mut records, &current);
            current.clear();
        } else {
            current.push(line);
        }
    }
    push_record(&mut records, &current);

    records
}

fn push_record(records: &mut Vec<String>, lines: &[&str]) {
    let text = lines.join("\n");
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        records.push(trimmed.to_string());
    }
}

struct ParsedRecord {
    patient_id: String,
    risk_level: RiskLevel,
    fields: NoteFields,
}

#[derive(Clone, Copy)]
enum Field {
    PatientId,
    RiskLevel,
    ChiefComplaint,
    History,
    Vitals,
    Assessment,
    Plan,
    Other,
}

fn field_for_key(key: &str) -> Option<Field> {
    match key {
        "PATIENT_ID" => Some(Field::PatientId),
        "RISK_LEVEL" => Some(Field::RiskLevel),
        "CHIEF_COMPLAINT" => Some(Field::ChiefComplaint),
        "HISTORY" => Some(Field::History),
        "VITALS" => Some(Field::Vitals),
        "ASSESSMENT" => Some(Field::Assessment),
        "PLAN" => Some(Field::Plan),
        _ => None,
    }
}

fn parse_record(record: &str) -> Result<ParsedRecord> {
    let mut patient_id: Option<String> = None;
    let mut risk_raw: Option<String> = None;
    let mut fields = NoteFields::default();
    let mut current = Field::Other;

    for line in record.lines() {
        let keyed = split_key(line).and_then(|(key, value)| field_for_key(key).map(|f| (f, value)));
        let (field, value) = match keyed {
            Some(pair) => pair,
            // Continuation of the previous section; single-line keys take none.
            None => match current {
                Field::PatientId | Field::RiskLevel => (Field::Other, line.trim()),
                f => (f, line.trim()),
            },
        };
        current = field;

        match field {
            Field::PatientId => patient_id = Some(value.to_ascii_uppercase()),
            Field::RiskLevel => risk_raw = Some(value.to_string()),
            Field::ChiefComplaint => append(&mut fields.chief_complaint, value),
            Field::History => append(&mut fields.history, value),
            Field::Vitals => append(&mut fields.vitals, value),
            Field::Assessment => append(&mut fields.assessment, value),
            Field::Plan => append(&mut fields.plan, value),
            Field::Other => {}
        }
    }

    let patient_id = match patient_id {
        Some(id) if is_valid_patient_id(&id) => id,
        Some(id) => bail!("PATIENT_ID '{}' does not match P<digits>", id),
        None => bail!("missing PATIENT_ID"),
    };
    let risk_level = match risk_raw {
        Some(raw) => raw.parse::<RiskLevel>()?,
        None => bail!("missing RISK_LEVEL for {}", patient_id),
    };

    Ok(ParsedRecord {
        patient_id,
        risk_level,
        fields,
    })
}

/// Split `KEY: value` where KEY is upper-case letters and underscores.
fn split_key(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
        return None;
    }
    Some((key, value.trim()))
}

fn append(target: &mut String, value: &str) {
    if value.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(value);
}

/// Render a note back into the notes-file record format.
pub fn format_note(note: &ClinicalNote) -> String {
    let mut out = String::new();
    out.push_str(&format!("PATIENT_ID: {}\n", note.patient_id));
    out.push_str(&format!("RISK_LEVEL: {}\n", note.risk_level));
    let sections = [
        ("CHIEF_COMPLAINT", &note.fields.chief_complaint),
        ("HISTORY", &note.fields.history),
        ("VITALS", &note.fields.vitals),
        ("ASSESSMENT", &note.fields.assessment),
        ("PLAN", &note.fields.plan),
    ];
    for (key, value) in sections {
        if !value.is_empty() {
            out.push_str(&format!("{}: {}\n", key, value));
        }
    }
    out
}

/// Write notes to `path` in the `---`-separated format, creating parent dirs.
pub fn write_notes(path: &Path, notes: &[ClinicalNote]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let body = notes
        .iter()
        .map(format_note)
        .collect::<Vec<_>>()
        .join(&format!("{}\n", RECORD_SEPARATOR));
    std::fs::write(path, body)
        .with_context(|| format!("Failed to write notes file: {}", path.display()))?;
    Ok(())
}
