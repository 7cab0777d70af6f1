//! Relational store: audio records, transcripts, and classifications.
//!
//! Backed by Postgres: rows are written concurrently by independent GPU
//! Worker processes across hosts, which a local single-file database
//! cannot support (see DESIGN.md).

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::model::{AudioStatus, ClassificationResult, TranscriptionResult};
use crate::retry::with_backoff;

pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect to Postgres and ensure the core tables exist.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        info!("connecting to relational store");
        let pool = with_backoff("postgres_connect", || async {
            PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
        })
        .await?;

        let store = Store { pool };
        store.create_tables().await?;
        Ok(store)
    }

    async fn create_tables(&self) -> Result<(), sqlx::Error> {
        with_backoff("postgres_create_tables", || self.create_tables_inner()).await
    }

    async fn create_tables_inner(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audio_records (
                id BIGSERIAL PRIMARY KEY,
                original_filename TEXT NOT NULL,
                opus_key TEXT,
                archive_source TEXT NOT NULL,
                duration_seconds DOUBLE PRECISION,
                byte_size BIGINT,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                processed_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transcripts (
                id BIGSERIAL PRIMARY KEY,
                audio_id BIGINT NOT NULL REFERENCES audio_records(id),
                text TEXT NOT NULL,
                language TEXT NOT NULL,
                confidence DOUBLE PRECISION NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS classifications (
                id BIGSERIAL PRIMARY KEY,
                audio_id BIGINT NOT NULL REFERENCES audio_records(id),
                flagged BOOLEAN NOT NULL,
                score DOUBLE PRECISION NOT NULL,
                category TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_audio_records_archive_source ON audio_records(archive_source)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_audio_records_status ON audio_records(status)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a new `AudioRecord` row with `status = pending`. Returns the
    /// surrogate id.
    pub async fn insert_audio_record(
        &self,
        original_filename: &str,
        archive_source: &str,
        byte_size: Option<i64>,
        duration_seconds: Option<f64>,
    ) -> Result<i64, sqlx::Error> {
        let row = with_backoff("postgres_insert_audio_record", || async {
            sqlx::query(
                r#"
                INSERT INTO audio_records
                    (original_filename, archive_source, byte_size, duration_seconds, status)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id
                "#,
            )
            .bind(original_filename)
            .bind(archive_source)
            .bind(byte_size)
            .bind(duration_seconds)
            .bind(AudioStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await
        })
        .await?;

        Ok(row.get("id"))
    }

    pub async fn set_status(&self, audio_id: i64, status: AudioStatus) -> Result<(), sqlx::Error> {
        with_backoff("postgres_set_status", || async {
            sqlx::query("UPDATE audio_records SET status = $1, processed_at = now() WHERE id = $2")
                .bind(status.as_str())
                .bind(audio_id)
                .execute(&self.pool)
                .await
        })
        .await?;
        Ok(())
    }

    pub async fn set_opus_key(&self, audio_id: i64, opus_key: &str) -> Result<(), sqlx::Error> {
        with_backoff("postgres_set_opus_key", || async {
            sqlx::query("UPDATE audio_records SET opus_key = $1 WHERE id = $2")
                .bind(opus_key)
                .bind(audio_id)
                .execute(&self.pool)
                .await
        })
        .await?;
        Ok(())
    }

    pub async fn insert_transcript(
        &self,
        audio_id: i64,
        transcript: &TranscriptionResult,
    ) -> Result<(), sqlx::Error> {
        with_backoff("postgres_insert_transcript", || async {
            sqlx::query(
                "INSERT INTO transcripts (audio_id, text, language, confidence) VALUES ($1, $2, $3, $4)",
            )
            .bind(audio_id)
            .bind(&transcript.text)
            .bind(&transcript.language)
            .bind(transcript.confidence)
            .execute(&self.pool)
            .await
        })
        .await?;
        Ok(())
    }

    pub async fn insert_classification(
        &self,
        audio_id: i64,
        classification: &ClassificationResult,
    ) -> Result<(), sqlx::Error> {
        with_backoff("postgres_insert_classification", || async {
            sqlx::query(
                "INSERT INTO classifications (audio_id, flagged, score, category) VALUES ($1, $2, $3, $4)",
            )
            .bind(audio_id)
            .bind(classification.flagged)
            .bind(classification.score)
            .bind(&classification.category)
            .execute(&self.pool)
            .await
        })
        .await?;
        Ok(())
    }

    /// Flagged-items view consumed by the review UI (out of this repo's
    /// scope, but the query itself is part of the core's contract).
    pub async fn flagged_audio_ids(&self) -> Result<Vec<i64>, sqlx::Error> {
        let rows = with_backoff("postgres_flagged_audio_ids", || async {
            sqlx::query("SELECT id FROM audio_records WHERE status = 'flagged' ORDER BY id")
                .fetch_all(&self.pool)
                .await
        })
        .await?;
        Ok(rows.iter().map(|row| row.get("id")).collect())
    }
}
