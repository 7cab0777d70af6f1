//! The Queue & Counter Service client: FIFO lists with blocking pop, and
//! atomic integer counters plus string keys, backed by Redis.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use thiserror::Error;

use crate::retry::with_backoff;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("timeout waiting for queue item")]
    Timeout,
}

/// A single popped item: which queue it came from, and its raw payload.
#[derive(Debug, Clone)]
pub struct PoppedItem {
    pub queue: String,
    pub payload: Vec<u8>,
}

/// Contract for the Queue & Counter Service. Implemented against Redis in
/// production and an in-memory fake in tests.
#[async_trait]
pub trait QueueClient: Send + Sync {
    async fn push(&self, queue: &str, payload: &[u8]) -> Result<(), QueueError>;

    /// Blocking pop across one or more queues, honoring FIFO order per
    /// producer. Returns `Ok(None)` if `timeout` elapses with nothing to pop.
    async fn pop_blocking(
        &self,
        queues: &[&str],
        timeout: Duration,
    ) -> Result<Option<PoppedItem>, QueueError>;

    async fn counter_set(&self, key: &str, value: i64) -> Result<(), QueueError>;
    async fn counter_get(&self, key: &str) -> Result<Option<i64>, QueueError>;
    async fn counter_increment(&self, key: &str) -> Result<i64, QueueError>;
    async fn string_set(&self, key: &str, value: &str) -> Result<(), QueueError>;
    async fn string_get(&self, key: &str) -> Result<Option<String>, QueueError>;
    async fn delete(&self, keys: &[&str]) -> Result<(), QueueError>;
}

/// Redis-backed `QueueClient`. Lists back the FIFO queues (`LPUSH`/`BRPOP`
/// give right-to-left FIFO ordering), strings/integers back the ledger.
#[derive(Clone)]
pub struct RedisQueueClient {
    conn: ConnectionManager,
}

impl RedisQueueClient {
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(RedisQueueClient { conn })
    }
}

#[async_trait]
impl QueueClient for RedisQueueClient {
    async fn push(&self, queue: &str, payload: &[u8]) -> Result<(), QueueError> {
        with_backoff("redis_push", || async {
            let mut conn = self.conn.clone();
            let _: () = conn.lpush(queue, payload).await?;
            Ok(())
        })
        .await
    }

    async fn pop_blocking(
        &self,
        queues: &[&str],
        timeout: Duration,
    ) -> Result<Option<PoppedItem>, QueueError> {
        let timeout_secs = timeout.as_secs_f64().max(0.01);
        with_backoff("redis_pop_blocking", || async {
            let mut conn = self.conn.clone();
            let result: Option<(String, Vec<u8>)> = conn.brpop(queues, timeout_secs).await?;
            Ok(result.map(|(queue, payload)| PoppedItem { queue, payload }))
        })
        .await
    }

    async fn counter_set(&self, key: &str, value: i64) -> Result<(), QueueError> {
        with_backoff("redis_counter_set", || async {
            let mut conn = self.conn.clone();
            let _: () = conn.set(key, value).await?;
            Ok(())
        })
        .await
    }

    async fn counter_get(&self, key: &str) -> Result<Option<i64>, QueueError> {
        with_backoff("redis_counter_get", || async {
            let mut conn = self.conn.clone();
            let value: Option<i64> = conn.get(key).await?;
            Ok(value)
        })
        .await
    }

    async fn counter_increment(&self, key: &str) -> Result<i64, QueueError> {
        with_backoff("redis_counter_increment", || async {
            let mut conn = self.conn.clone();
            let value: i64 = conn.incr(key, 1).await?;
            Ok(value)
        })
        .await
    }

    async fn string_set(&self, key: &str, value: &str) -> Result<(), QueueError> {
        with_backoff("redis_string_set", || async {
            let mut conn = self.conn.clone();
            let _: () = conn.set(key, value).await?;
            Ok(())
        })
        .await
    }

    async fn string_get(&self, key: &str) -> Result<Option<String>, QueueError> {
        with_backoff("redis_string_get", || async {
            let mut conn = self.conn.clone();
            let value: Option<String> = conn.get(key).await?;
            Ok(value)
        })
        .await
    }

    async fn delete(&self, keys: &[&str]) -> Result<(), QueueError> {
        if keys.is_empty() {
            return Ok(());
        }
        with_backoff("redis_delete", || async {
            let mut conn = self.conn.clone();
            let _: () = conn.del(keys).await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
pub mod fake {
    //! In-memory fake `QueueClient` for unit tests: lists, counters, and
    //! strings backed by plain `HashMap`s behind a mutex.

    use super::*;
    use std::collections::{HashMap, VecDeque};
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct FakeQueueClient {
        lists: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
        counters: Mutex<HashMap<String, i64>>,
        strings: Mutex<HashMap<String, String>>,
    }

    impl FakeQueueClient {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl QueueClient for FakeQueueClient {
        async fn push(&self, queue: &str, payload: &[u8]) -> Result<(), QueueError> {
            let mut lists = self.lists.lock().await;
            lists
                .entry(queue.to_string())
                .or_default()
                .push_back(payload.to_vec());
            Ok(())
        }

        async fn pop_blocking(
            &self,
            queues: &[&str],
            _timeout: Duration,
        ) -> Result<Option<PoppedItem>, QueueError> {
            let mut lists = self.lists.lock().await;
            for &queue in queues {
                if let Some(list) = lists.get_mut(queue) {
                    if let Some(payload) = list.pop_front() {
                        return Ok(Some(PoppedItem {
                            queue: queue.to_string(),
                            payload,
                        }));
                    }
                }
            }
            Ok(None)
        }

        async fn counter_set(&self, key: &str, value: i64) -> Result<(), QueueError> {
            self.counters.lock().await.insert(key.to_string(), value);
            Ok(())
        }

        async fn counter_get(&self, key: &str) -> Result<Option<i64>, QueueError> {
            Ok(self.counters.lock().await.get(key).copied())
        }

        async fn counter_increment(&self, key: &str) -> Result<i64, QueueError> {
            let mut counters = self.counters.lock().await;
            let entry = counters.entry(key.to_string()).or_insert(0);
            *entry += 1;
            Ok(*entry)
        }

        async fn string_set(&self, key: &str, value: &str) -> Result<(), QueueError> {
            self.strings
                .lock()
                .await
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn string_get(&self, key: &str) -> Result<Option<String>, QueueError> {
            Ok(self.strings.lock().await.get(key).cloned())
        }

        async fn delete(&self, keys: &[&str]) -> Result<(), QueueError> {
            let mut counters = self.counters.lock().await;
            let mut strings = self.strings.lock().await;
            for key in keys {
                counters.remove(*key);
                strings.remove(*key);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn counter_increment_is_sequential() {
        let client = FakeQueueClient::new();
        assert_eq!(client.counter_increment("k").await.unwrap(), 1);
        assert_eq!(client.counter_increment("k").await.unwrap(), 2);
        assert_eq!(client.counter_get("k").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn pop_blocking_returns_none_on_empty_queues() {
        let client = FakeQueueClient::new();
        let result = client
            .pop_blocking(&["unpack"], Duration::from_millis(10))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn push_then_pop_preserves_fifo_order() {
        let client = FakeQueueClient::new();
        client.push("q", b"first").await.unwrap();
        client.push("q", b"second").await.unwrap();
        let first = client
            .pop_blocking(&["q"], Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.payload, b"first");
    }
}
