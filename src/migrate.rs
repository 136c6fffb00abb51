use anyhow::Result;
use sqlx::SqlitePool;

/// Create the index schema on a fresh database.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Build metadata, one row per index file
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            chunk_size INTEGER NOT NULL,
            chunk_overlap INTEGER NOT NULL,
            built_at INTEGER NOT NULL,
            note_count INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notes (
            id TEXT PRIMARY KEY,
            ordinal INTEGER NOT NULL,
            patient_id TEXT NOT NULL,
            risk_level TEXT NOT NULL,
            content TEXT NOT NULL,
            chief_complaint TEXT NOT NULL DEFAULT '',
            history TEXT NOT NULL DEFAULT '',
            vitals TEXT NOT NULL DEFAULT '',
            assessment TEXT NOT NULL DEFAULT '',
            plan TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    // seq is the insertion order used for tie-breaking at query time
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            seq INTEGER PRIMARY KEY,
            id TEXT NOT NULL UNIQUE,
            note_id TEXT NOT NULL,
            patient_id TEXT NOT NULL,
            risk_level TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            UNIQUE(note_id, chunk_index),
            FOREIGN KEY (note_id) REFERENCES notes(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_patient_id ON chunks(patient_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_notes_patient_id ON notes(patient_id)")
        .execute(pool)
        .await?;

    Ok(())
}
