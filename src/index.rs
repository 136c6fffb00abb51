//! Index building and loading.
//!
//! `build` turns the notes file into a fresh SQLite index: every note is
//! chunked, every chunk embedded, and the rows are written in a single
//! transaction together with the build metadata. The index is never
//! updated in place; an existing file is removed first, and a failed build
//! leaves no file behind.
//!
//! At serve time the whole index is read once into an [`IndexSnapshot`],
//! an immutable in-memory copy shared behind `Arc` by every request.

use anyhow::{bail, Context, Result};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::chunk::chunk_notes;
use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob, Embedder};
use crate::migrate;
use crate::models::{Chunk, ClinicalNote, NoteFields, RiskLevel};
use crate::notes::load_notes;

/// Metadata stored alongside every index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMeta {
    pub model: String,
    pub dims: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Unix seconds.
    pub built_at: i64,
    pub note_count: usize,
    pub chunk_count: usize,
}

/// Summary returned by a successful build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub path: PathBuf,
    pub meta: IndexMeta,
    pub elapsed_ms: u128,
}

/// A chunk together with its vector and insertion sequence.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub seq: i64,
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Build the index configured in `config` from its notes file.
pub async fn build_index(config: &Config, embedder: &dyn Embedder) -> Result<BuildReport> {
    let notes = load_notes(&config.data.notes_path)?;
    build_index_from_notes(
        &notes,
        &config.index.path,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
        config.embedding.batch_size,
        embedder,
    )
    .await
}

/// Build an index at `path` from already-parsed notes.
pub async fn build_index_from_notes(
    notes: &[ClinicalNote],
    path: &Path,
    chunk_size: usize,
    chunk_overlap: usize,
    batch_size: usize,
    embedder: &dyn Embedder,
) -> Result<BuildReport> {
    if notes.is_empty() {
        bail!("No notes to index");
    }

    let started = Instant::now();
    remove_index_files(path)?;

    let result = write_index(notes, path, chunk_size, chunk_overlap, batch_size, embedder).await;
    match result {
        Ok(meta) => {
            let elapsed_ms = started.elapsed().as_millis();
            tracing::info!(
                notes = meta.note_count,
                chunks = meta.chunk_count,
                model = %meta.model,
                elapsed_ms = elapsed_ms as u64,
                path = %path.display(),
                "index built"
            );
            Ok(BuildReport {
                path: path.to_path_buf(),
                meta,
                elapsed_ms,
            })
        }
        Err(e) => {
            if let Err(cleanup) = remove_index_files(path) {
                tracing::warn!(error = %cleanup, "failed to remove partial index");
            }
            Err(e)
        }
    }
}

async fn write_index(
    notes: &[ClinicalNote],
    path: &Path,
    chunk_size: usize,
    chunk_overlap: usize,
    batch_size: usize,
    embedder: &dyn Embedder,
) -> Result<IndexMeta> {
    let chunks = chunk_notes(notes, chunk_size, chunk_overlap);
    tracing::info!(notes = notes.len(), chunks = chunks.len(), "chunked notes");

    let vectors = embed_all(&chunks, batch_size, embedder).await?;

    let meta = IndexMeta {
        model: embedder.model_name().to_string(),
        dims: embedder.dims(),
        chunk_size,
        chunk_overlap,
        built_at: chrono::Utc::now().timestamp(),
        note_count: notes.len(),
        chunk_count: chunks.len(),
    };

    let pool = db::connect_for_build(path).await?;
    migrate::create_schema(&pool).await?;
    let written = insert_all(&pool, &meta, notes, &chunks, &vectors).await;
    pool.close().await;
    written?;

    Ok(meta)
}

async fn embed_all(
    chunks: &[Chunk],
    batch_size: usize,
    embedder: &dyn Embedder,
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(chunks.len());
    let batch_size = batch_size.max(1);
    let total_batches = chunks.len().div_ceil(batch_size);

    for (i, batch) in chunks.chunks(batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let batch_vectors = embedder
            .embed(&texts)
            .await
            .with_context(|| format!("Embedding batch {}/{} failed", i + 1, total_batches))?;

        if batch_vectors.len() != batch.len() {
            bail!(
                "Embedder returned {} vectors for a batch of {}",
                batch_vectors.len(),
                batch.len()
            );
        }
        if let Some(v) = batch_vectors.iter().find(|v| v.len() != embedder.dims()) {
            bail!(
                "Embedder returned a {}-dim vector, expected {}",
                v.len(),
                embedder.dims()
            );
        }

        tracing::debug!(batch = i + 1, total = total_batches, "embedded batch");
        vectors.extend(batch_vectors);
    }

    Ok(vectors)
}

async fn insert_all(
    pool: &SqlitePool,
    meta: &IndexMeta,
    notes: &[ClinicalNote],
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO index_meta (id, model, dims, chunk_size, chunk_overlap, built_at, note_count, chunk_count) \
         VALUES (1, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&meta.model)
    .bind(meta.dims as i64)
    .bind(meta.chunk_size as i64)
    .bind(meta.chunk_overlap as i64)
    .bind(meta.built_at)
    .bind(meta.note_count as i64)
    .bind(meta.chunk_count as i64)
    .execute(&mut *tx)
    .await?;

    for (ordinal, note) in notes.iter().enumerate() {
        sqlx::query(
            "INSERT INTO notes (id, ordinal, patient_id, risk_level, content, chief_complaint, history, vitals, assessment, plan) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&note.id)
        .bind(ordinal as i64)
        .bind(&note.patient_id)
        .bind(note.risk_level.as_str())
        .bind(&note.content)
        .bind(&note.fields.chief_complaint)
        .bind(&note.fields.history)
        .bind(&note.fields.vitals)
        .bind(&note.fields.assessment)
        .bind(&note.fields.plan)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to insert note {}", note.id))?;
    }

    for (chunk, vector) in chunks.iter().zip(vectors) {
        sqlx::query(
            "INSERT INTO chunks (id, note_id, patient_id, risk_level, chunk_index, text, hash, embedding) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.note_id)
        .bind(&chunk.patient_id)
        .bind(chunk.risk_level.as_str())
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .bind(vec_to_blob(vector))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to insert chunk {}", chunk.id))?;
    }

    tx.commit().await?;
    Ok(())
}

/// Remove an index file and its SQLite `-wal`/`-shm` siblings if present.
pub fn remove_index_files(path: &Path) -> Result<()> {
    let mut targets = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        targets.push(PathBuf::from(name));
    }
    for target in targets {
        if target.exists() {
            std::fs::remove_file(&target)
                .with_context(|| format!("Failed to remove {}", target.display()))?;
        }
    }
    Ok(())
}

/// Immutable in-memory copy of a built index.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    pub meta: IndexMeta,
    pub notes: Vec<ClinicalNote>,
    /// Ordered by insertion sequence.
    pub chunks: Vec<IndexedChunk>,
}

impl IndexSnapshot {
    /// Read the whole index at `path`.
    pub async fn load(path: &Path) -> Result<Self> {
        let pool = db::connect_read_only(path).await?;
        let loaded = Self::read_all(&pool).await;
        pool.close().await;
        let snapshot = loaded.with_context(|| format!("Failed to load index {}", path.display()))?;

        tracing::info!(
            notes = snapshot.notes.len(),
            chunks = snapshot.chunks.len(),
            model = %snapshot.meta.model,
            "index loaded"
        );
        Ok(snapshot)
    }

    async fn read_all(pool: &SqlitePool) -> Result<Self> {
        let meta_row = sqlx::query(
            "SELECT model, dims, chunk_size, chunk_overlap, built_at, note_count, chunk_count \
             FROM index_meta WHERE id = 1",
        )
        .fetch_optional(pool)
        .await
        .context("index has no metadata table; rebuild it")?;

        let Some(row) = meta_row else {
            bail!("index has no build metadata; rebuild it");
        };
        let meta = IndexMeta {
            model: row.get("model"),
            dims: row.get::<i64, _>("dims") as usize,
            chunk_size: row.get::<i64, _>("chunk_size") as usize,
            chunk_overlap: row.get::<i64, _>("chunk_overlap") as usize,
            built_at: row.get("built_at"),
            note_count: row.get::<i64, _>("note_count") as usize,
            chunk_count: row.get::<i64, _>("chunk_count") as usize,
        };

        let note_rows = sqlx::query(
            "SELECT id, patient_id, risk_level, content, chief_complaint, history, vitals, assessment, plan \
             FROM notes ORDER BY ordinal",
        )
        .fetch_all(pool)
        .await?;

        let mut notes = Vec::with_capacity(note_rows.len());
        for row in &note_rows {
            let risk: String = row.get("risk_level");
            notes.push(ClinicalNote {
                id: row.get("id"),
                patient_id: row.get("patient_id"),
                risk_level: risk.parse::<RiskLevel>()?,
                content: row.get("content"),
                fields: NoteFields {
                    chief_complaint: row.get("chief_complaint"),
                    history: row.get("history"),
                    vitals: row.get("vitals"),
                    assessment: row.get("assessment"),
                    plan: row.get("plan"),
                },
            });
        }

        let chunk_rows = sqlx::query(
            "SELECT seq, id, note_id, patient_id, risk_level, chunk_index, text, hash, embedding \
             FROM chunks ORDER BY seq",
        )
        .fetch_all(pool)
        .await?;

        let mut chunks = Vec::with_capacity(chunk_rows.len());
        for row in &chunk_rows {
            let risk: String = row.get("risk_level");
            let blob: Vec<u8> = row.get("embedding");
            let embedding = blob_to_vec(&blob);
            let id: String = row.get("id");
            if embedding.len() != meta.dims {
                bail!(
                    "chunk {} has a {}-dim vector but the index records {} dims",
                    id,
                    embedding.len(),
                    meta.dims
                );
            }
            chunks.push(IndexedChunk {
                seq: row.get("seq"),
                chunk: Chunk {
                    id,
                    note_id: row.get("note_id"),
                    patient_id: row.get("patient_id"),
                    risk_level: risk.parse::<RiskLevel>()?,
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    hash: row.get("hash"),
                },
                embedding,
            });
        }

        Ok(Self {
            meta,
            notes,
            chunks,
        })
    }

    /// Assemble a snapshot directly from notes and embedded chunks.
    /// Sequence numbers follow the order of `embedded`, starting at 1.
    pub fn from_parts(
        model: &str,
        dims: usize,
        notes: Vec<ClinicalNote>,
        embedded: Vec<(Chunk, Vec<f32>)>,
    ) -> Self {
        let chunks: Vec<IndexedChunk> = embedded
            .into_iter()
            .enumerate()
            .map(|(i, (chunk, embedding))| IndexedChunk {
                seq: i as i64 + 1,
                chunk,
                embedding,
            })
            .collect();
        Self {
            meta: IndexMeta {
                model: model.to_string(),
                dims,
                chunk_size: 0,
                chunk_overlap: 0,
                built_at: chrono::Utc::now().timestamp(),
                note_count: notes.len(),
                chunk_count: chunks.len(),
            },
            notes,
            chunks,
        }
    }

    /// Fail unless the index was built with the same model and dims as `embedder`.
    pub fn ensure_compatible(&self, embedder: &dyn Embedder) -> Result<()> {
        if self.meta.model != embedder.model_name() || self.meta.dims != embedder.dims() {
            bail!(
                "Index was built with model '{}' ({} dims) but the configured embedder is '{}' ({} dims). \
                 Rebuild with `clinrag build`.",
                self.meta.model,
                self.meta.dims,
                embedder.model_name(),
                embedder.dims()
            );
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::notes::parse_notes;
    use async_trait::async_trait;

    const NOTES: &str = "PATIENT_ID: P001\nRISK_LEVEL: HIGH\nCHIEF_COMPLAINT: Crushing chest pain.\n---\nPATIENT_ID: P002\nRISK_LEVEL: LOW\nCHIEF_COMPLAINT: Sore throat for three days.\n";

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("provider unreachable")
        }
    }

    #[tokio::test]
    async fn test_build_then_load() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index/clinical.sqlite");
        let notes = parse_notes(NOTES).unwrap();
        let embedder = HashingEmbedder::new(32).unwrap();

        let report = build_index_from_notes(&notes, &path, 300, 50, 8, &embedder)
            .await
            .unwrap();
        assert_eq!(report.meta.note_count, 2);
        assert_eq!(report.meta.chunk_count, 2);

        let snapshot = IndexSnapshot::load(&path).await.unwrap();
        assert_eq!(snapshot.meta.model, "hashing-v1");
        assert_eq!(snapshot.meta.dims, 32);
        assert_eq!(snapshot.notes, notes);
        assert_eq!(snapshot.chunks.len(), 2);
        assert!(snapshot.chunks[0].seq < snapshot.chunks[1].seq);
        assert_eq!(snapshot.chunks[0].chunk.patient_id, "P001");
        assert_eq!(snapshot.chunks[1].chunk.risk_level, RiskLevel::Low);
        snapshot.ensure_compatible(&embedder).unwrap();
    }

    #[tokio::test]
    async fn test_rebuild_replaces_previous_index() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("clinical.sqlite");
        let embedder = HashingEmbedder::new(16).unwrap();
        let notes = parse_notes(NOTES).unwrap();

        build_index_from_notes(&notes, &path, 300, 50, 8, &embedder)
            .await
            .unwrap();
        build_index_from_notes(&notes[..1], &path, 300, 50, 8, &embedder)
            .await
            .unwrap();

        let snapshot = IndexSnapshot::load(&path).await.unwrap();
        assert_eq!(snapshot.notes.len(), 1);
        assert_eq!(snapshot.chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_embedding_leaves_no_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("clinical.sqlite");
        let notes = parse_notes(NOTES).unwrap();

        let err = build_index_from_notes(&notes, &path, 300, 50, 8, &FailingEmbedder)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("provider unreachable"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_load_missing_index_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = IndexSnapshot::load(&tmp.path().join("absent.sqlite"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("clinrag build"));
    }

    #[tokio::test]
    async fn test_incompatible_embedder_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("clinical.sqlite");
        let notes = parse_notes(NOTES).unwrap();
        build_index_from_notes(&notes, &path, 300, 50, 8, &HashingEmbedder::new(16).unwrap())
            .await
            .unwrap();

        let snapshot = IndexSnapshot::load(&path).await.unwrap();
        let err = snapshot
            .ensure_compatible(&HashingEmbedder::new(32).unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("Rebuild"));
    }

    #[tokio::test]
    async fn test_empty_notes_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("clinical.sqlite");
        let embedder = HashingEmbedder::new(16).unwrap();
        assert!(build_index_from_notes(&[], &path, 300, 50, 8, &embedder)
            .await
            .is_err());
    }
}
