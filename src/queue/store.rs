//! Durable at-least-once request queue with a dead-letter queue.
//!
//! Backed by fjall partitions:
//! - `messages` partition: u64 (big-endian) -> Envelope (JSON)
//! - `dlq` partition:      u64 (big-endian) -> DeadLetter (JSON)
//! - `meta` partition:     "next_seq" -> u64 (atomic counter)
//!
//! Sequential u64 keys keep delivery in enqueue order. A received message
//! becomes invisible for the configured visibility timeout; not acking it
//! makes it visible again. A message that has already been delivered
//! `max_receive_count` times moves to the DLQ instead of being delivered
//! again.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::keys::{ControlKey, FrameworkKey};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Intent to run one mapping workflow. Message identity is the job id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingMessage {
    pub job_id: Uuid,
    pub source_control_key: ControlKey,
    pub target_framework_key: FrameworkKey,
    pub target_control_ids: Option<Vec<String>>,
    pub enqueued_at: DateTime<Utc>,
}

/// Stored per-message delivery state
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    message: MappingMessage,
    receive_count: u32,
    /// Epoch milliseconds before which the message is invisible
    visible_at_ms: i64,
}

/// One delivery handed to a worker. `seq` doubles as the ack token.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub seq: u64,
    pub receive_count: u32,
    pub message: MappingMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub message: MappingMessage,
    pub failure_code: String,
    pub failure_message: String,
    pub receive_count: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

pub struct RequestQueue {
    keyspace: Keyspace,
    messages: PartitionHandle,
    dlq: PartitionHandle,
    meta: PartitionHandle,
    seq_counter: AtomicU64,
    receive_lock: Mutex<()>,
    visibility_timeout: Duration,
    max_receive_count: u32,
    retention: Duration,
    dlq_retention: Duration,
}

impl RequestQueue {
    /// Open or create a queue at the specified path
    pub fn open<P: AsRef<Path>>(path: P, config: &QueueConfig) -> Result<Arc<Self>> {
        let path = path.as_ref();
        info!("Opening request queue at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let messages = keyspace.open_partition("messages", PartitionCreateOptions::default())?;
        let dlq = keyspace.open_partition("dlq", PartitionCreateOptions::default())?;
        let meta = keyspace.open_partition("meta", PartitionCreateOptions::default())?;

        let current_seq = meta
            .get(b"next_seq")?
            .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
            .unwrap_or(0);

        info!(current_seq, "Request queue opened");

        Ok(Arc::new(Self {
            keyspace,
            messages,
            dlq,
            meta,
            seq_counter: AtomicU64::new(current_seq),
            receive_lock: Mutex::new(()),
            visibility_timeout: config.visibility_timeout(),
            max_receive_count: config.max_receive_count,
            retention: Duration::from_secs(config.retention_days as u64 * 86_400),
            dlq_retention: Duration::from_secs(config.dlq_retention_days as u64 * 86_400),
        }))
    }

    /// Enqueue a message; returns once it is durably committed.
    pub fn enqueue(&self, message: &MappingMessage) -> Result<u64> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);

        let envelope = Envelope {
            message: message.clone(),
            receive_count: 0,
            visible_at_ms: 0,
        };
        self.messages
            .insert(seq.to_be_bytes(), serde_json::to_vec(&envelope)?)?;

        // Persist the counter for crash recovery
        self.meta.insert(b"next_seq", (seq + 1).to_be_bytes())?;
        self.keyspace.persist(fjall::PersistMode::Buffer)?;

        debug!(seq, job_id = %message.job_id, "Message enqueued");
        Ok(seq)
    }

    /// Receive up to `max_count` visible messages. Each delivered message is
    /// invisible until its visibility timeout lapses; messages past the
    /// redelivery cap move to the DLQ instead of being delivered.
    pub fn receive(&self, max_count: usize) -> Result<Vec<Delivery>> {
        let _guard = self.receive_lock.lock().expect("queue lock poisoned");
        let now_ms = Utc::now().timestamp_millis();
        let mut deliveries = Vec::new();

        let mut visible = Vec::new();
        for item in self.messages.iter() {
            if visible.len() >= max_count {
                break;
            }
            let (key, value) = item?;
            let seq = u64::from_be_bytes(key.as_ref().try_into().unwrap_or([0u8; 8]));
            let envelope: Envelope = serde_json::from_slice(&value)?;
            if envelope.visible_at_ms <= now_ms {
                visible.push((seq, envelope));
            }
        }

        for (seq, mut envelope) in visible {
            if envelope.receive_count >= self.max_receive_count {
                self.dead_letter(seq, &envelope, "MAX_RECEIVES_EXCEEDED")?;
                continue;
            }

            envelope.receive_count += 1;
            envelope.visible_at_ms = now_ms + self.visibility_timeout.as_millis() as i64;
            self.messages
                .insert(seq.to_be_bytes(), serde_json::to_vec(&envelope)?)?;

            debug!(
                seq,
                job_id = %envelope.message.job_id,
                receive_count = envelope.receive_count,
                "Message delivered"
            );
            deliveries.push(Delivery {
                seq,
                receive_count: envelope.receive_count,
                message: envelope.message,
            });
        }

        Ok(deliveries)
    }

    /// Permanently delete a delivered message.
    pub fn ack(&self, seq: u64) -> Result<()> {
        self.messages.remove(seq.to_be_bytes())?;
        debug!(seq, "Message acked");
        Ok(())
    }

    fn dead_letter(&self, seq: u64, envelope: &Envelope, failure_code: &str) -> Result<()> {
        let dead = DeadLetter {
            message: envelope.message.clone(),
            failure_code: failure_code.to_string(),
            failure_message: format!(
                "delivered {} times without ack",
                envelope.receive_count
            ),
            receive_count: envelope.receive_count,
            dead_lettered_at: Utc::now(),
        };
        self.dlq.insert(seq.to_be_bytes(), serde_json::to_vec(&dead)?)?;
        self.messages.remove(seq.to_be_bytes())?;
        warn!(seq, job_id = %envelope.message.job_id, "Message moved to DLQ");
        Ok(())
    }

    pub fn dlq_count(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.dlq.iter() {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// List DLQ entries in sequence order
    pub fn list_dlq(&self, limit: usize) -> Result<Vec<(u64, DeadLetter)>> {
        let mut results = Vec::new();
        for item in self.dlq.iter().take(limit) {
            let (key, value) = item?;
            let seq = u64::from_be_bytes(key.as_ref().try_into().unwrap_or([0u8; 8]));
            let dead: DeadLetter = serde_json::from_slice(&value)?;
            results.push((seq, dead));
        }
        Ok(results)
    }

    pub fn delete_dlq(&self, seq: u64) -> Result<()> {
        self.dlq.remove(seq.to_be_bytes())?;
        Ok(())
    }

    /// Approximate number of visible-or-inflight messages
    pub fn depth(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.messages.iter() {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Drop messages past retention: 7 days on the main queue, 14 on the DLQ
    /// by default. Returns (messages_pruned, dlq_pruned).
    pub fn prune_expired(&self) -> Result<(usize, usize)> {
        let now = Utc::now();

        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let dlq_retention = chrono::Duration::from_std(self.dlq_retention)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));

        let mut expired = Vec::new();
        for item in self.messages.iter() {
            let (key, value) = item?;
            let envelope: Envelope = serde_json::from_slice(&value)?;
            if now - envelope.message.enqueued_at > retention {
                expired.push(key);
            }
        }
        let messages_pruned = expired.len();
        for key in expired {
            self.messages.remove(key)?;
        }

        let mut expired = Vec::new();
        for item in self.dlq.iter() {
            let (key, value) = item?;
            let dead: DeadLetter = serde_json::from_slice(&value)?;
            if now - dead.dead_lettered_at > dlq_retention {
                expired.push(key);
            }
        }
        let dlq_pruned = expired.len();
        for key in expired {
            self.dlq.remove(key)?;
        }

        if messages_pruned > 0 || dlq_pruned > 0 {
            info!(messages_pruned, dlq_pruned, "Queue retention pruning completed");
        }
        Ok((messages_pruned, dlq_pruned))
    }

    /// Health check - verify the store is accessible
    pub fn health_check(&self) -> Result<()> {
        let _ = self.meta.get(b"next_seq")?;
        Ok(())
    }

    /// Flush all writes to disk
    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_message(job_id: Uuid) -> MappingMessage {
    MappingMessage {
        job_id,
        source_control_key: "AWS.EC2#1.0#PR.1".parse().unwrap(),
        target_framework_key: "NIST-SP-800-53#R5".parse().unwrap(),
        target_control_ids: None,
        enqueued_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn short_visibility_config() -> QueueConfig {
        QueueConfig {
            visibility_timeout_secs: 0,
            ..QueueConfig::default()
        }
    }

    fn open_queue(config: &QueueConfig) -> (Arc<RequestQueue>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let queue = RequestQueue::open(temp_dir.path().join("queue"), config).unwrap();
        (queue, temp_dir)
    }

    #[test]
    fn enqueue_then_receive_then_ack() {
        let (queue, _temp) = open_queue(&QueueConfig::default());
        let job_id = Uuid::new_v4();
        let seq = queue.enqueue(&test_message(job_id)).unwrap();
        assert_eq!(seq, 0);

        let deliveries = queue.receive(10).unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].message.job_id, job_id);
        assert_eq!(deliveries[0].receive_count, 1);

        queue.ack(deliveries[0].seq).unwrap();
        assert!(queue.receive(10).unwrap().is_empty());
        assert_eq!(queue.depth().unwrap(), 0);
    }

    #[test]
    fn inflight_message_is_invisible() {
        let (queue, _temp) = open_queue(&QueueConfig::default());
        queue.enqueue(&test_message(Uuid::new_v4())).unwrap();

        assert_eq!(queue.receive(10).unwrap().len(), 1);
        // Still in flight under the 360s default visibility timeout
        assert!(queue.receive(10).unwrap().is_empty());
    }

    #[test]
    fn unacked_message_is_redelivered_after_visibility() {
        let (queue, _temp) = open_queue(&short_visibility_config());
        queue.enqueue(&test_message(Uuid::new_v4())).unwrap();

        let first = queue.receive(10).unwrap();
        assert_eq!(first[0].receive_count, 1);

        let second = queue.receive(10).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].receive_count, 2);
        assert_eq!(first[0].seq, second[0].seq);
    }

    #[test]
    fn exhausted_message_moves_to_dlq() {
        let (queue, _temp) = open_queue(&short_visibility_config());
        let job_id = Uuid::new_v4();
        queue.enqueue(&test_message(job_id)).unwrap();

        for _ in 0..3 {
            assert_eq!(queue.receive(10).unwrap().len(), 1);
        }

        // Fourth attempt dead-letters instead of delivering
        assert!(queue.receive(10).unwrap().is_empty());
        assert_eq!(queue.dlq_count().unwrap(), 1);
        assert_eq!(queue.depth().unwrap(), 0);

        let dlq = queue.list_dlq(10).unwrap();
        assert_eq!(dlq[0].1.message.job_id, job_id);
        assert_eq!(dlq[0].1.receive_count, 3);
        assert_eq!(dlq[0].1.failure_code, "MAX_RECEIVES_EXCEEDED");
    }

    #[test]
    fn receive_respects_max_count_and_order() {
        let (queue, _temp) = open_queue(&QueueConfig::default());
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.enqueue(&test_message(*id)).unwrap();
        }

        let first = queue.receive(2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].message.job_id, ids[0]);
        assert_eq!(first[1].message.job_id, ids[1]);

        let rest = queue.receive(2).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].message.job_id, ids[2]);
    }

    #[test]
    fn sequence_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("queue");
        let config = QueueConfig::default();

        {
            let queue = RequestQueue::open(&path, &config).unwrap();
            assert_eq!(queue.enqueue(&test_message(Uuid::new_v4())).unwrap(), 0);
            queue.flush().unwrap();
        }

        let queue = RequestQueue::open(&path, &config).unwrap();
        assert_eq!(queue.enqueue(&test_message(Uuid::new_v4())).unwrap(), 1);
        assert_eq!(queue.depth().unwrap(), 2);
    }

    #[test]
    fn prune_drops_old_messages() {
        let config = QueueConfig {
            retention_days: 0,
            dlq_retention_days: 0,
            ..QueueConfig::default()
        };
        let (queue, _temp) = open_queue(&config);

        let mut message = test_message(Uuid::new_v4());
        message.enqueued_at = Utc::now() - chrono::Duration::days(1);
        queue.enqueue(&message).unwrap();

        let (messages_pruned, _) = queue.prune_expired().unwrap();
        assert_eq!(messages_pruned, 1);
        assert_eq!(queue.depth().unwrap(), 0);
    }
}
