//! Operator-triggered DLQ redrive.
//!
//! Each entry is sent to the main queue first and only then deleted from
//! the DLQ. If the delete fails the entry stays in the DLQ and is re-sent
//! by the next redrive; the duplicate run is absorbed downstream by the job
//! store's conditional terminal writes.

use serde::Serialize;
use tracing::{info, warn};

use super::store::{RequestQueue, Result};

/// Hard cap on messages handled per invocation
pub const MAX_REDRIVE_MESSAGES: usize = 1000;

#[derive(Debug, Clone, Copy)]
pub struct RedriveRequest {
    pub dry_run: bool,
    pub max_messages: usize,
}

impl Default for RedriveRequest {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_messages: MAX_REDRIVE_MESSAGES,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RedriveReport {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub messages_redriven: usize,
    pub dlq_message_count_before: usize,
    pub message: String,
}

/// Move up to `max_messages` DLQ entries back onto the main queue.
pub fn redrive(queue: &RequestQueue, request: RedriveRequest) -> Result<RedriveReport> {
    let max_messages = request.max_messages.min(MAX_REDRIVE_MESSAGES);
    let dlq_message_count_before = queue.dlq_count()?;

    if request.dry_run {
        let would_move = dlq_message_count_before.min(max_messages);
        info!(dlq_message_count_before, would_move, "Redrive dry run");
        return Ok(RedriveReport {
            status_code: 200,
            messages_redriven: 0,
            dlq_message_count_before,
            message: format!("dry run: {would_move} message(s) would be redriven"),
        });
    }

    let entries = queue.list_dlq(max_messages)?;
    let mut messages_redriven = 0;

    for (seq, dead) in entries {
        // Send before delete: a failed delete leaves the entry for the next
        // pass rather than losing the message.
        queue.enqueue(&dead.message)?;
        if let Err(error) = queue.delete_dlq(seq) {
            warn!(seq, %error, "Redriven message could not be deleted from DLQ");
            continue;
        }
        messages_redriven += 1;
        info!(seq, job_id = %dead.message.job_id, "Message redriven");
    }

    Ok(RedriveReport {
        status_code: 200,
        messages_redriven,
        dlq_message_count_before,
        message: format!("{messages_redriven} message(s) redriven"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::queue::store::test_message;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn queue_with_dead_letters(count: usize) -> (std::sync::Arc<RequestQueue>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = QueueConfig {
            visibility_timeout_secs: 0,
            ..QueueConfig::default()
        };
        let queue = RequestQueue::open(temp_dir.path().join("queue"), &config).unwrap();

        for _ in 0..count {
            queue.enqueue(&test_message(Uuid::new_v4())).unwrap();
        }
        // Exhaust the redelivery cap, then trip the DLQ move
        for _ in 0..3 {
            queue.receive(count).unwrap();
        }
        assert!(queue.receive(count).unwrap().is_empty());
        assert_eq!(queue.dlq_count().unwrap(), count);

        (queue, temp_dir)
    }

    #[test]
    fn dry_run_reports_without_moving() {
        let (queue, _temp) = queue_with_dead_letters(2);

        let report = redrive(
            &queue,
            RedriveRequest {
                dry_run: true,
                max_messages: 1000,
            },
        )
        .unwrap();

        assert_eq!(report.status_code, 200);
        assert_eq!(report.messages_redriven, 0);
        assert_eq!(report.dlq_message_count_before, 2);
        assert_eq!(queue.dlq_count().unwrap(), 2);
        assert_eq!(queue.depth().unwrap(), 0);
    }

    #[test]
    fn redrive_moves_messages_back_to_main_queue() {
        let (queue, _temp) = queue_with_dead_letters(2);

        let report = redrive(&queue, RedriveRequest::default()).unwrap();
        assert_eq!(report.messages_redriven, 2);
        assert_eq!(report.dlq_message_count_before, 2);
        assert_eq!(queue.dlq_count().unwrap(), 0);
        assert_eq!(queue.depth().unwrap(), 2);

        // Redriven messages start a fresh redelivery budget
        let deliveries = queue.receive(10).unwrap();
        assert_eq!(deliveries.len(), 2);
        assert!(deliveries.iter().all(|d| d.receive_count == 1));
    }

    #[test]
    fn redrive_respects_max_messages() {
        let (queue, _temp) = queue_with_dead_letters(3);

        let report = redrive(
            &queue,
            RedriveRequest {
                dry_run: false,
                max_messages: 2,
            },
        )
        .unwrap();
        assert_eq!(report.messages_redriven, 2);
        assert_eq!(queue.dlq_count().unwrap(), 1);
    }

    #[test]
    fn second_redrive_over_empty_dlq_is_noop() {
        let (queue, _temp) = queue_with_dead_letters(1);

        redrive(&queue, RedriveRequest::default()).unwrap();
        let report = redrive(&queue, RedriveRequest::default()).unwrap();
        assert_eq!(report.messages_redriven, 0);
        assert_eq!(report.dlq_message_count_before, 0);
        assert_eq!(queue.depth().unwrap(), 1);
    }

    #[test]
    fn report_serializes_with_mixed_casing() {
        let report = RedriveReport {
            status_code: 200,
            messages_redriven: 2,
            dlq_message_count_before: 2,
            message: "2 message(s) redriven".to_string(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["messages_redriven"], 2);
        assert_eq!(json["dlq_message_count_before"], 2);
    }
}
