//! The per-batch ledger: three keys in the Queue & Counter Service that
//! track a batch's clip count, progress, and source archive.

use crate::queue::{QueueClient, QueueError};

fn total_key(batch_id: &str) -> String {
    format!("batch:{}:total", batch_id)
}

fn processed_key(batch_id: &str) -> String {
    format!("batch:{}:processed", batch_id)
}

fn s3_key_key(batch_id: &str) -> String {
    format!("batch:{}:s3_key", batch_id)
}

/// Seeds the ledger for a freshly-unpacked batch. Must be called, in this
/// order, before any transcribe job for the batch is pushed, so a GPU
/// worker can never observe a transcribe job ahead of its batch total.
pub async fn seed(
    queue: &dyn QueueClient,
    batch_id: &str,
    total: i64,
    s3_key: &str,
) -> Result<(), QueueError> {
    queue.counter_set(&total_key(batch_id), total).await?;
    queue.counter_set(&processed_key(batch_id), 0).await?;
    queue.string_set(&s3_key_key(batch_id), s3_key).await?;
    Ok(())
}

/// Atomically increments the processed counter and reports both the new
/// value and the batch total, so the caller can decide whether it is the
/// sole finalizer. Reads `total` first: if the ledger is missing (orphan
/// item, e.g. a stale transcribe job after the batch was already finalized),
/// returns `Ok(None)` without ever incrementing `processed` — incrementing
/// first would create a `processed` key for a batch whose ledger no longer
/// exists, and that key would never get cleaned up.
pub async fn increment_processed(
    queue: &dyn QueueClient,
    batch_id: &str,
) -> Result<Option<(i64, i64)>, QueueError> {
    let total = match queue.counter_get(&total_key(batch_id)).await? {
        Some(total) => total,
        None => return Ok(None),
    };
    let processed = queue.counter_increment(&processed_key(batch_id)).await?;
    Ok(Some((processed, total)))
}

/// Deletes all three ledger keys for a batch. Idempotent: deleting
/// already-absent keys is not an error.
pub async fn delete(queue: &dyn QueueClient, batch_id: &str) -> Result<(), QueueError> {
    queue
        .delete(&[
            &total_key(batch_id),
            &processed_key(batch_id),
            &s3_key_key(batch_id),
        ])
        .await
}

pub async fn source_s3_key(
    queue: &dyn QueueClient,
    batch_id: &str,
) -> Result<Option<String>, QueueError> {
    queue.string_get(&s3_key_key(batch_id)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::fake::FakeQueueClient;

    #[tokio::test]
    async fn seed_then_increment_reaches_total() {
        let queue = FakeQueueClient::new();
        seed(&queue, "B1", 3, "archives/B1.tar").await.unwrap();

        let (p1, t1) = increment_processed(&queue, "B1").await.unwrap().unwrap();
        assert_eq!(p1, 1);
        assert_eq!(t1, 3);

        increment_processed(&queue, "B1").await.unwrap();
        let (p3, t3) = increment_processed(&queue, "B1").await.unwrap().unwrap();
        assert_eq!(p3, 3);
        assert_eq!(t3, 3);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let queue = FakeQueueClient::new();
        seed(&queue, "B1", 1, "archives/B1.tar").await.unwrap();
        delete(&queue, "B1").await.unwrap();
        delete(&queue, "B1").await.unwrap();
        assert_eq!(source_s3_key(&queue, "B1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn increment_on_missing_ledger_does_not_create_a_counter() {
        let queue = FakeQueueClient::new();

        let result = increment_processed(&queue, "ghost").await.unwrap();
        assert_eq!(result, None);
        assert_eq!(queue.counter_get(&processed_key("ghost")).await.unwrap(), None);
    }
}
