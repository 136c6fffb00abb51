//! Synthetic clinical note generation.
//!
//! Produces reproducible demo datasets: a fixed catalog of presentations,
//! each with a fixed risk level, combined with randomized vitals drawn from
//! a seeded [`StdRng`]. The same `(count, seed)` always yields the same notes.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::Path;

use crate::config::Config;
use crate::models::{ClinicalNote, NoteFields, RiskLevel};
use crate::notes::{format_note, write_notes};

struct Presentation {
    risk: RiskLevel,
    complaints: &'static [&'static str],
    history: &'static [&'static str],
    assessment: &'static str,
    plan: &'static str,
    /// (systolic range, heart rate range, SpO2 range)
    vitals: ((u32, u32), (u32, u32), (u32, u32)),
}

const CATALOG: &[Presentation] = &[
    Presentation {
        risk: RiskLevel::High,
        complaints: &[
            "Crushing chest pain radiating to the left arm for 40 minutes.",
            "Substernal chest pressure with diaphoresis since this morning.",
        ],
        history: &["Hypertension, hyperlipidemia, 30 pack-year smoker.", "Type 2 diabetes, prior PCI in 2019."],
        assessment: "Acute coronary syndrome, suspected NSTEMI. Troponin elevated.",
        plan: "Aspirin 325 mg, heparin drip, nitroglycerin SL, urgent cardiology consult for catheterization.",
        vitals: ((85, 110), (105, 130), (89, 94)),
    },
    Presentation {
        risk: RiskLevel::High,
        complaints: &[
            "Sudden right-sided weakness and slurred speech, onset 90 minutes ago.",
            "Facial droop and left arm numbness noticed by family at breakfast.",
        ],
        history: &["Atrial fibrillation, not anticoagulated.", "Hypertension, prior TIA."],
        assessment: "Acute ischemic stroke, NIHSS 9. CT negative for hemorrhage.",
        plan: "IV tPA within window, neurology consult, admit to stroke unit, repeat CT in 24 hours.",
        vitals: ((165, 195), (80, 110), (94, 98)),
    },
    Presentation {
        risk: RiskLevel::High,
        complaints: &[
            "Fever, rigors and confusion for one day.",
            "Productive cough with fever and new hypotension.",
        ],
        history: &["Chronic kidney disease stage 3.", "Recent urinary tract infection."],
        assessment: "Sepsis with suspected pulmonary source. Lactate 4.1.",
        plan: "Blood cultures, broad-spectrum antibiotics (piperacillin-tazobactam), 30 mL/kg fluid bolus, ICU evaluation.",
        vitals: ((78, 95), (112, 135), (88, 93)),
    },
    Presentation {
        risk: RiskLevel::Medium,
        complaints: &[
            "Worsening shortness of breath and wheeze over three days.",
            "Increased sputum production and dyspnea on exertion.",
        ],
        history: &["COPD on home inhaler therapy, 45 pack-year history.", "COPD with two exacerbations this year."],
        assessment: "COPD exacerbation without respiratory failure.",
        plan: "Nebulized albuterol-ipratropium, prednisone 40 mg for 5 days, doxycycline, pulmonary follow-up.",
        vitals: ((125, 145), (92, 108), (90, 94)),
    },
    Presentation {
        risk: RiskLevel::Medium,
        complaints: &[
            "Polyuria and fatigue, glucose readings above 300 at home.",
            "Routine diabetic follow-up with poor glycemic control.",
        ],
        history: &["Type 2 diabetes for 12 years, HbA1c 9.8%.", "Type 2 diabetes with peripheral neuropathy."],
        assessment: "Uncontrolled type 2 diabetes without ketoacidosis.",
        plan: "Increase metformin to 1000 mg BID, start basal insulin glargine 10 units nightly, dietitian referral.",
        vitals: ((130, 150), (76, 92), (96, 99)),
    },
    Presentation {
        risk: RiskLevel::Medium,
        complaints: &[
            "Bilateral leg swelling and orthopnea for one week.",
            "Weight gain of 4 kg with dyspnea when lying flat.",
        ],
        history: &["Heart failure with reduced ejection fraction, EF 30%.", "Ischemic cardiomyopathy."],
        assessment: "Acute on chronic heart failure exacerbation, volume overloaded.",
        plan: "IV furosemide 40 mg BID, daily weights, fluid restriction, continue carvedilol and lisinopril.",
        vitals: ((135, 160), (88, 104), (91, 95)),
    },
    Presentation {
        risk: RiskLevel::Low,
        complaints: &[
            "Routine blood pressure check, asymptomatic.",
            "Follow-up after starting antihypertensive medication.",
        ],
        history: &["Essential hypertension diagnosed last year.", "Family history of hypertension."],
        assessment: "Essential hypertension, improving on therapy.",
        plan: "Continue amlodipine 5 mg daily, low-sodium diet, recheck in 3 months.",
        vitals: ((128, 142), (64, 80), (97, 100)),
    },
    Presentation {
        risk: RiskLevel::Low,
        complaints: &[
            "Mild wheeze after exercise.",
            "Seasonal asthma symptoms, requesting inhaler refill.",
        ],
        history: &["Mild intermittent asthma since childhood.", "Allergic rhinitis."],
        assessment: "Mild intermittent asthma, well controlled.",
        plan: "Refill albuterol inhaler as needed, asthma action plan reviewed.",
        vitals: ((110, 125), (68, 84), (97, 100)),
    },
    Presentation {
        risk: RiskLevel::Low,
        complaints: &[
            "Sore throat, nasal congestion and mild cough for four days.",
            "Runny nose and low-grade fever for two days.",
        ],
        history: &["No significant past medical history.", "Seasonal allergies."],
        assessment: "Viral upper respiratory infection.",
        plan: "Supportive care, fluids, acetaminophen as needed, return if symptoms worsen.",
        vitals: ((108, 124), (70, 88), (97, 100)),
    },
    Presentation {
        risk: RiskLevel::Low,
        complaints: &[
            "Right ankle pain after inversion injury playing football.",
            "Ankle swelling after a fall on stairs, able to bear weight.",
        ],
        history: &["Healthy, no chronic conditions.", "Previous ankle sprain two years ago."],
        assessment: "Grade I lateral ankle sprain, Ottawa rules negative.",
        plan: "RICE, ibuprofen 400 mg as needed, ankle brace, physiotherapy referral.",
        vitals: ((112, 128), (66, 82), (98, 100)),
    },
];

/// Generate `count` synthetic notes with patient ids `P001`, `P002`, ...
pub fn generate_notes(count: usize, seed: u64) -> Vec<ClinicalNote> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut notes = Vec::with_capacity(count);

    for i in 0..count {
        let patient_id = format!("P{:03}", i + 1);
        let presentation = &CATALOG[rng.gen_range(0..CATALOG.len())];

        let complaint = pick(&mut rng, presentation.complaints);
        let history = pick(&mut rng, presentation.history);
        let ((sys_lo, sys_hi), (hr_lo, hr_hi), (spo2_lo, spo2_hi)) = presentation.vitals;
        let systolic = rng.gen_range(sys_lo..=sys_hi);
        let diastolic = systolic * 6 / 10 + rng.gen_range(0..=8);
        let heart_rate = rng.gen_range(hr_lo..=hr_hi);
        let spo2 = rng.gen_range(spo2_lo..=spo2_hi);
        let temp = 36.4 + rng.gen_range(0..=25) as f32 / 10.0;
        let age = rng.gen_range(24..=88);

        let fields = NoteFields {
            chief_complaint: complaint.to_string(),
            history: format!("{}-year-old. {}", age, history),
            vitals: format!(
                "BP {}/{}, HR {}, Temp {:.1} C, SpO2 {}% on room air.",
                systolic, diastolic, heart_rate, temp, spo2
            ),
            assessment: presentation.assessment.to_string(),
            plan: presentation.plan.to_string(),
        };

        let mut note = ClinicalNote {
            id: format!("{}#1", patient_id),
            patient_id,
            risk_level: presentation.risk,
            content: String::new(),
            fields,
        };
        note.content = format_note(&note).trim().to_string();
        notes.push(note);
    }

    notes
}

/// Write `count` synthetic notes to `out` (default `[data].notes_path`).
pub fn run_generate(config: &Config, count: usize, seed: u64, out: Option<&Path>) -> Result<()> {
    if count == 0 {
        anyhow::bail!("--count must be at least 1");
    }
    let path = out.unwrap_or(&config.data.notes_path);
    let notes = generate_notes(count, seed);
    write_notes(path, &notes)?;

    let high = notes.iter().filter(|n| n.risk_level == RiskLevel::High).count();
    tracing::info!(count, seed, path = %path.display(), "synthetic notes written");
    println!("generate ok");
    println!("  notes: {} ({} HIGH risk)", notes.len(), high);
    println!("  seed:  {}", seed);
    println!("  file:  {}", path.display());
    Ok(())
}

fn pick<'a>(rng: &mut StdRng, options: &[&'a str]) -> &'a str {
    options.choose(rng).copied().unwrap_or_default()
}
