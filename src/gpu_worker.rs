//! GPU Worker: consumes transcribe jobs in micro-batches, invokes
//! transcription and classification, persists results, uploads the
//! processed clip, increments the batch counter, and finalizes the batch
//! exactly once.

use chrono::Utc;
use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::blob_store::{processed_key, BlobStore, BlobStoreError};
use crate::classify::{Classifier, ParsedClassification};
use crate::ledger;
use crate::model::{AudioStatus, TranscribeJob};
use crate::queue::{QueueClient, QueueError};
use crate::store::Store;
use crate::transcode;
use crate::transcribe::Transcriber;

#[derive(Error, Debug)]
pub enum GpuWorkerError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

pub struct GpuWorker {
    queue: Arc<dyn QueueClient>,
    blob: Arc<dyn BlobStore>,
    store: Arc<Store>,
    transcriber: Arc<dyn Transcriber>,
    classifier: Arc<dyn Classifier>,
    micro_batch_size: usize,
    scratch_root: std::path::PathBuf,
    delete_source_archive_on_finalize: bool,
}

impl GpuWorker {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        blob: Arc<dyn BlobStore>,
        store: Arc<Store>,
        transcriber: Arc<dyn Transcriber>,
        classifier: Arc<dyn Classifier>,
        micro_batch_size: usize,
        scratch_root: std::path::PathBuf,
        delete_source_archive_on_finalize: bool,
    ) -> Self {
        GpuWorker {
            queue,
            blob,
            store,
            transcriber,
            classifier,
            micro_batch_size,
            scratch_root,
            delete_source_archive_on_finalize,
        }
    }

    /// Assembles and processes micro-batches forever. Returns only on a
    /// fatal queue-connectivity error.
    pub async fn run(&self) -> Result<(), GpuWorkerError> {
        loop {
            let batch = self.assemble_micro_batch().await?;
            if batch.is_empty() {
                continue;
            }
            info!(size = batch.len(), "assembled micro-batch");

            let futures = batch.into_iter().map(|job| self.process_item(job));
            join_all(futures).await;
        }
    }

    /// Pops transcribe jobs until `micro_batch_size` is reached or a ~5s
    /// bounded wait elapses with no new job.
    async fn assemble_micro_batch(&self) -> Result<Vec<TranscribeJob>, GpuWorkerError> {
        let mut items = Vec::new();
        while items.len() < self.micro_batch_size {
            let popped = self
                .queue
                .pop_blocking(&["transcribe"], Duration::from_secs(5))
                .await?;
            match popped {
                Some(item) => match serde_json::from_slice::<TranscribeJob>(&item.payload) {
                    Ok(job) => items.push(job),
                    Err(e) => {
                        error!(error = %e, "failed to deserialize transcribe job, dropping");
                    }
                },
                None => break,
            }
        }
        Ok(items)
    }

    /// Processes one transcribe job end to end: persist, transcribe,
    /// classify, upload. Independent of sibling items in the same
    /// micro-batch.
    async fn process_item(&self, job: TranscribeJob) {
        let batch_id = job.batch_id.clone();

        match self.process_item_inner(&job).await {
            Ok(()) => {}
            Err(e) => {
                warn!(batch_id = %batch_id, opus_path = %job.opus_path, error = %e, "item processing failed");
            }
        }

        match ledger::increment_processed(self.queue.as_ref(), &batch_id).await {
            Ok(Some((processed, total))) => {
                info!(batch_id = %batch_id, processed, total, "counter incremented");
                if processed > total {
                    warn!(batch_id = %batch_id, processed, total, "processed exceeds total; possible double delivery");
                }
                if processed >= total {
                    self.finalize_batch(&batch_id).await;
                }
            }
            Ok(None) => {
                warn!(batch_id = %batch_id, "ledger missing for batch; orphan item, skipping increment and finalization");
            }
            Err(e) => {
                error!(batch_id = %batch_id, error = %e, "failed to increment batch counter");
            }
        }
    }

    async fn process_item_inner(&self, job: &TranscribeJob) -> Result<(), anyhow::Error> {
        let opus_path = Path::new(&job.opus_path);

        let byte_size = tokio::fs::metadata(opus_path)
            .await
            .map(|m| m.len() as i64)
            .ok();
        let duration_seconds = transcode::probe_duration_seconds(opus_path).await;

        let audio_id = self
            .store
            .insert_audio_record(
                &job.original_filename,
                &job.batch_id,
                byte_size,
                duration_seconds,
            )
            .await?;

        let transcript = match self.transcriber.transcribe(opus_path).await {
            Ok(result) => result,
            Err(e) => {
                self.store.set_status(audio_id, AudioStatus::Failed).await?;
                return Err(anyhow::anyhow!("transcription failed: {}", e));
            }
        };
        self.store.insert_transcript(audio_id, &transcript).await?;

        let raw_classification = match self.classifier.classify(&transcript.text).await {
            Ok(result) => result,
            Err(e) => {
                self.store.set_status(audio_id, AudioStatus::Failed).await?;
                return Err(anyhow::anyhow!("classification failed: {}", e));
            }
        };

        let classification = match raw_classification {
            ParsedClassification::Valid(result) => result,
            ParsedClassification::Invalid(raw) => {
                warn!(audio_id, raw = %raw, "classifier returned unparseable output");
                self.store.set_status(audio_id, AudioStatus::Failed).await?;
                return Err(anyhow::anyhow!("classification output malformed"));
            }
        };

        self.store
            .insert_classification(audio_id, &classification)
            .await?;

        let status = if classification.flagged {
            AudioStatus::Flagged
        } else {
            AudioStatus::Transcribed
        };
        self.store.set_status(audio_id, status).await?;

        let date = Utc::now().date_naive();
        let key = processed_key(date, audio_id);
        if let Err(e) = self.blob.put(&key, opus_path).await {
            warn!(audio_id, error = %e, "opus upload failed, record retained with status failed");
            self.store.set_status(audio_id, AudioStatus::Failed).await?;
            return Err(anyhow::anyhow!("opus upload failed: {}", e));
        }
        self.store.set_opus_key(audio_id, &key).await?;

        Ok(())
    }

    /// Performed by the single worker that observes `processed >= total`.
    /// Idempotent: already-missing scratch/ledger is not an error.
    async fn finalize_batch(&self, batch_id: &str) {
        info!(batch_id, "finalizing batch");

        let scratch_dir = self.scratch_root.join(batch_id);
        if let Err(e) = tokio::fs::remove_dir_all(&scratch_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(batch_id, error = %e, "failed to remove scratch directory");
            }
        }

        if self.delete_source_archive_on_finalize {
            if let Ok(Some(s3_key)) = ledger::source_s3_key(self.queue.as_ref(), batch_id).await {
                if let Err(e) = self.blob.delete(&s3_key).await {
                    warn!(batch_id, error = %e, "failed to delete source archive");
                }
            }
        }

        if let Err(e) = ledger::delete(self.queue.as_ref(), batch_id).await {
            error!(batch_id, error = %e, "failed to delete ledger keys");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::fake::FakeQueueClient;

    // These tests exercise the ledger/counter race logic that backs
    // `process_item`'s finalization decision; full end-to-end coverage of
    // `process_item_inner` (which needs a live Postgres store) belongs to
    // integration tests run against a real database, not this unit module.

    #[test]
    fn missing_score_defaults_to_flagged_true_zero_score() {
        // Covered directly in classify.rs; re-asserted here as the GPU
        // worker's relevant contract boundary.
        use crate::classify::parse_classification;
        use crate::model::ClassificationResult;

        let parsed = parse_classification(r#"{"flagged": true}"#);
        assert_eq!(
            parsed,
            crate::classify::ParsedClassification::Valid(ClassificationResult {
                flagged: true,
                score: 0.0,
                category: None,
            })
        );
    }

    #[tokio::test]
    async fn concurrent_finalizers_only_one_wins_the_race() {
        let queue = Arc::new(FakeQueueClient::new());
        ledger::seed(queue.as_ref(), "B3", 2, "archives/B3.tar")
            .await
            .unwrap();

        let (p1, t1) = ledger::increment_processed(queue.as_ref(), "B3").await.unwrap().unwrap();
        let (p2, t2) = ledger::increment_processed(queue.as_ref(), "B3").await.unwrap().unwrap();

        assert_eq!((p1, t1), (1, 2));
        assert_eq!((p2, t2), (2, 2));

        // Only the second increment's observer should finalize (p2 >= t2).
        assert!(p1 < t1);
        assert!(p2 >= t2);
    }

    #[tokio::test]
    async fn orphan_item_does_not_create_a_processed_counter() {
        let queue = Arc::new(FakeQueueClient::new());

        // No ledger was ever seeded for this batch_id (e.g. a stale
        // transcribe job delivered after finalization already ran).
        let result = ledger::increment_processed(queue.as_ref(), "ghost").await.unwrap();
        assert_eq!(result, None);
    }
}
