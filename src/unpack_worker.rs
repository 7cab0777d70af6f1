//! Unpack Worker: downloads an archive, extracts it safely, transcodes
//! clips to opus in parallel, seeds the batch ledger, and fans out
//! transcribe jobs.
//!
//! Structured as a download/extract stage feeding a `buffer_unordered`-bounded
//! transform stage, followed by a persist/fan-out stage.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::archive::{self, ArchiveError};
use crate::blob_store::{BlobStore, BlobStoreError};
use crate::ledger;
use crate::model::{FailedJob, TranscribeJob, UnpackJob, WorkerKind};
use crate::queue::{QueueClient, QueueError};
use crate::transcode::CodecPool;

#[derive(Error, Debug)]
pub enum UnpackError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("blob store error: {0}")]
    Blob(#[from] BlobStoreError),
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("empty batch: no audio clips extracted")]
    EmptyBatch,
}

pub struct UnpackWorker {
    queue: Arc<dyn QueueClient>,
    blob: Arc<dyn BlobStore>,
    codec_pool: CodecPool,
    scratch_root: PathBuf,
    audio_extensions: Vec<String>,
}

impl UnpackWorker {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        blob: Arc<dyn BlobStore>,
        codec_pool: CodecPool,
        scratch_root: PathBuf,
        audio_extensions: Vec<String>,
    ) -> Self {
        UnpackWorker {
            queue,
            blob,
            codec_pool,
            scratch_root,
            audio_extensions,
        }
    }

    /// Pops and processes `unpack` jobs forever. Returns only on a fatal
    /// queue-connectivity error.
    pub async fn run(&self) -> Result<(), UnpackError> {
        loop {
            let popped = self
                .queue
                .pop_blocking(&["unpack"], Duration::from_secs(5))
                .await?;

            let Some(popped) = popped else {
                continue;
            };

            let job: UnpackJob = match serde_json::from_slice(&popped.payload) {
                Ok(job) => job,
                Err(e) => {
                    error!(error = %e, "failed to deserialize unpack job, dropping");
                    continue;
                }
            };

            let batch_id = job.batch_id.clone();
            if let Err(e) = self.process_job(&job).await {
                error!(batch_id = %batch_id, error = %e, "unpack job failed fatally");
                self.push_failed(&job, &e).await;
                let scratch_dir = self.scratch_root.join(&batch_id);
                let _ = tokio::fs::remove_dir_all(&scratch_dir).await;
            }
        }
    }

    async fn push_failed(&self, job: &UnpackJob, error: &UnpackError) {
        let failed = FailedJob {
            original_job: serde_json::to_value(job).unwrap_or(serde_json::Value::Null),
            error: error.to_string(),
            worker: WorkerKind::Unpack,
            timestamp: Utc::now(),
        };
        if let Ok(payload) = serde_json::to_vec(&failed) {
            if let Err(e) = self.queue.push("failed", &payload).await {
                error!(error = %e, "failed to push to failed queue");
            }
        }
    }

    /// Runs the full unpack pipeline for one job: download, detect, extract,
    /// transcode, seed the ledger, fan out transcribe jobs. Exposed
    /// standalone for testing with fake dependencies.
    pub async fn process_job(&self, job: &UnpackJob) -> Result<(), UnpackError> {
        let scratch_dir = self.scratch_root.join(&job.batch_id);
        tokio::fs::create_dir_all(&self.scratch_root).await?;
        // A non-recursive create here means a repeat `batch_id` (duplicate
        // delivery, or a producer collision) fails fatally on the existing
        // directory rather than silently reusing someone else's scratch.
        tokio::fs::create_dir(&scratch_dir).await?;

        let archive_path = scratch_dir.join("archive.tar");
        self.blob.get(&job.s3_key, &archive_path).await?;
        info!(batch_id = %job.batch_id, "downloaded archive");

        let kind = archive::detect_kind(&archive_path)?;
        info!(batch_id = %job.batch_id, ?kind, "detected archive type");

        let extracted = archive::extract(&archive_path, kind, &scratch_dir)?;

        let audio_files: Vec<PathBuf> = extracted
            .into_iter()
            .filter(|p| self.is_audio_file(p))
            .collect();

        info!(
            batch_id = %job.batch_id,
            candidates = audio_files.len(),
            "enumerated audio clips"
        );

        let codec_pool = self.codec_pool.clone();
        let opus_files: Vec<(PathBuf, PathBuf)> = stream::iter(audio_files.into_iter())
            .map(|source| {
                let codec_pool = codec_pool.clone();
                async move {
                    match codec_pool.transcode_clip(&source).await {
                        Ok(opus_path) => Some((source, opus_path)),
                        Err(e) => {
                            warn!(source = %source.display(), error = %e, "transcode failed, skipping clip");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(8)
            .filter_map(|result| async move { result })
            .collect()
            .await;

        let n = opus_files.len();
        info!(batch_id = %job.batch_id, fan_out = n, "transcode fan-out complete");

        if n == 0 {
            return Err(UnpackError::EmptyBatch);
        }

        ledger::seed(self.queue.as_ref(), &job.batch_id, n as i64, &job.s3_key).await?;

        for (source, opus_path) in &opus_files {
            let original_filename = source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let transcribe_job = TranscribeJob {
                batch_id: job.batch_id.clone(),
                opus_path: opus_path.display().to_string(),
                original_filename,
            };
            let payload = serde_json::to_vec(&transcribe_job).expect("serializable");
            self.queue.push("transcribe", &payload).await?;
        }

        info!(batch_id = %job.batch_id, "ledger seeded and transcribe jobs fanned out");

        let _ = tokio::fs::remove_file(&archive_path).await;

        Ok(())
    }

    fn is_audio_file(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().map(|e| e.to_string_lossy().to_lowercase()) else {
            return false;
        };
        let ext_with_dot = format!(".{}", ext);
        self.audio_extensions.iter().any(|e| *e == ext_with_dot)
    }
}
