//! Index statistics.
//!
//! Summarizes what `build` produced: embedding model and dimensionality,
//! chunking parameters, note and chunk counts, file size, build age, and the
//! risk distribution across indexed patients. Used by `clinrag stats`.

use anyhow::Result;

use crate::config::Config;
use crate::index::IndexSnapshot;
use crate::retrieve::risk_distribution;

/// Run the stats command: load the index and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let path = &config.index.path;
    let index = IndexSnapshot::load(path).await?;
    let meta = &index.meta;

    let file_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    println!("Clinical RAG - Index Stats");
    println!("==========================");
    println!();
    println!("  Index:       {}", path.display());
    println!("  Size:        {}", format_bytes(file_size));
    println!("  Built:       {}", format_ts_relative(meta.built_at));
    println!();
    println!("  Model:       {} ({} dims)", meta.model, meta.dims);
    println!(
        "  Chunking:    {} chars, {} overlap",
        meta.chunk_size, meta.chunk_overlap
    );
    println!("  Notes:       {}", meta.note_count);
    println!(
        "  Chunks:      {} ({:.1} per note)",
        meta.chunk_count,
        if meta.note_count > 0 {
            meta.chunk_count as f64 / meta.note_count as f64
        } else {
            0.0
        }
    );

    let dist = risk_distribution(&index, None);
    println!();
    println!("  By risk level ({} patients):", dist.total_patients);
    println!("  {:<8} {:>8}   {}", "LEVEL", "PATIENTS", "IDS");
    println!("  {}", "-".repeat(60));
    for bucket in &dist.levels {
        println!(
            "  {:<8} {:>8}   {}",
            bucket.risk_level.as_str(),
            bucket.patient_count,
            bucket.patient_ids.join(", ")
        );
    }
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
pub fn format_ts_relative(ts: i64) -> String {
    format_ts_relative_to(ts, chrono::Utc::now().timestamp())
}

fn format_ts_relative_to(ts: i64, now: i64) -> String {
    let delta = now - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    let plural = |n: i64| if n == 1 { "" } else { "s" };
    match delta {
        d if d < 60 => "just now".to_string(),
        d if d < 3600 => format!("{} min{} ago", d / 60, plural(d / 60)),
        d if d < 86400 => format!("{} hour{} ago", d / 3600, plural(d / 3600)),
        d if d < 86400 * 30 => format!("{} day{} ago", d / 86400, plural(d / 86400)),
        _ => format_ts_iso(ts),
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = 1_700_000_000;
        assert_eq!(format_ts_relative_to(now - 5, now), "just now");
        assert_eq!(format_ts_relative_to(now - 60, now), "1 min ago");
        assert_eq!(format_ts_relative_to(now - 7200, now), "2 hours ago");
        assert_eq!(format_ts_relative_to(now - 86400 * 3, now), "3 days ago");
        assert_eq!(format_ts_relative_to(0, now), "1970-01-01 00:00");
    }
}
