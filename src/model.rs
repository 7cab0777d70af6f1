//! Domain types shared by the unpack and GPU workers: queue payloads, the
//! audio record status enum, and the batch ID format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const AUDIO_STATUS_PENDING: &str = "pending";
pub const AUDIO_STATUS_TRANSCRIBED: &str = "transcribed";
pub const AUDIO_STATUS_FLAGGED: &str = "flagged";
pub const AUDIO_STATUS_FAILED: &str = "failed";

/// Lifecycle status of an `AudioRecord`. Mutated only by the GPU worker that
/// created the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum AudioStatus {
    Pending,
    Transcribed,
    Flagged,
    Failed,
}

impl AudioStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioStatus::Pending => AUDIO_STATUS_PENDING,
            AudioStatus::Transcribed => AUDIO_STATUS_TRANSCRIBED,
            AudioStatus::Flagged => AUDIO_STATUS_FLAGGED,
            AudioStatus::Failed => AUDIO_STATUS_FAILED,
        }
    }
}

/// Generates a batch ID of the form `YYYYMMDD-HHMMSS-{6-hex}`.
pub fn new_batch_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%d-%H%M%S"), &suffix[..6])
}

/// Job popped from the `unpack` queue. Produced by the Transfer stage once
/// the archive has been fully persisted in the blob store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnpackJob {
    pub batch_id: String,
    pub s3_key: String,
    pub original_filename: String,
    pub transferred_at: DateTime<Utc>,
}

/// Job popped from the `transcribe` queue. Carries a host-local path: the
/// GPU worker that dequeues it must be co-located with the Unpack worker
/// that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeJob {
    pub batch_id: String,
    pub opus_path: String,
    pub original_filename: String,
}

/// Entry pushed to the `failed` queue when a batch or clip fails fatally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedJob {
    pub original_job: serde_json::Value,
    pub error: String,
    pub worker: WorkerKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    Unpack,
    Gpu,
}

/// Output of the black-box transcription function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub language: String,
    pub confidence: f64,
}

/// Output of the black-box classification function, after defensive parsing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationResult {
    pub flagged: bool,
    pub score: f64,
    pub category: Option<String>,
}

impl Default for ClassificationResult {
    fn default() -> Self {
        ClassificationResult {
            flagged: false,
            score: 0.0,
            category: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_id_has_expected_shape() {
        let now = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let id = new_batch_id(now);
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "20250101");
        assert_eq!(parts[1], "000000");
        assert_eq!(parts[2].len(), 6);
    }

    #[test]
    fn audio_status_round_trips_as_str() {
        assert_eq!(AudioStatus::Flagged.as_str(), "flagged");
        assert_eq!(AudioStatus::Failed.as_str(), "failed");
    }
}
