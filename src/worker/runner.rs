//! Queue consumer driving the orchestrator, one message at a time.
//!
//! Strict batch-size-1 semantics keep partial-failure reporting per message;
//! concurrency comes from running several workers. A message is acked only
//! after the orchestrator has performed (or absorbed) the terminal write;
//! anything else leaves it for redelivery and, eventually, the DLQ.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ledger::{JobStore, LedgerError};
use crate::pipeline::Orchestrator;
use crate::queue::{Delivery, RequestQueue};

pub struct Worker {
    id: usize,
    queue: Arc<RequestQueue>,
    jobs: JobStore,
    orchestrator: Arc<Orchestrator>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        id: usize,
        queue: Arc<RequestQueue>,
        jobs: JobStore,
        orchestrator: Arc<Orchestrator>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id,
            queue,
            jobs,
            orchestrator,
            poll_interval,
        }
    }

    /// Poll loop; runs until the task is aborted at shutdown.
    pub async fn run(self) {
        info!(worker = self.id, "Worker started");
        loop {
            let deliveries = match self.queue.receive(1) {
                Ok(deliveries) => deliveries,
                Err(error) => {
                    error!(worker = self.id, %error, "Queue receive failed");
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };

            match deliveries.into_iter().next() {
                Some(delivery) => self.handle(delivery).await,
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    async fn handle(&self, delivery: Delivery) {
        let job_id = delivery.message.job_id;
        let execution_handle = Uuid::new_v4().to_string();
        debug!(worker = self.id, %job_id, seq = delivery.seq, "Handling delivery");

        match self.jobs.mark_running(&job_id, &execution_handle) {
            Ok(_) => {}
            Err(LedgerError::Conflict { status, .. }) if status.is_terminal() => {
                // A prior run finished; nothing to do but drop the message.
                debug!(%job_id, ?status, "Job already terminal, acking");
                self.ack(delivery.seq);
                return;
            }
            Err(LedgerError::Conflict { status, .. }) => {
                // Stale RUNNING from a crashed or still-overlapping attempt.
                // Proceed: terminal writes stay single-winner.
                warn!(%job_id, ?status, "Taking over a stale run");
            }
            Err(LedgerError::JobNotFound(_)) => {
                warn!(%job_id, "Message references unknown job, acking");
                self.ack(delivery.seq);
                return;
            }
            Err(error) => {
                error!(%job_id, %error, "markRunning failed, leaving message for redelivery");
                return;
            }
        }

        match self.orchestrator.run(&delivery.message).await {
            Ok(()) => self.ack(delivery.seq),
            Err(error) => {
                error!(%job_id, %error, "Terminal write failed, leaving message for redelivery");
            }
        }
    }

    fn ack(&self, seq: u64) {
        if let Err(error) = self.queue.ack(seq) {
            error!(seq, %error, "Ack failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ledger::{JobRecord, JobStatus, Ledger};
    use crate::observability::Metrics;
    use crate::queue::MappingMessage;
    use crate::rpc::{AgentClient, ScienceClient};
    use chrono::Utc;
    use tempfile::TempDir;

    // Clients point at closed ports; these tests only exercise paths that
    // settle before any RPC (S1 lookup misses on an empty catalog).
    fn build_worker(temp_dir: &TempDir) -> (Worker, Arc<RequestQueue>, Ledger) {
        let config = Config::default();
        let ledger = Ledger::open(temp_dir.path().join("ledger")).unwrap();
        let queue = RequestQueue::open(temp_dir.path().join("queue"), &config.queue).unwrap();
        let orchestrator = Arc::new(Orchestrator::new(
            ledger.clone(),
            ScienceClient::new(&config.science).unwrap(),
            AgentClient::new(&config.agent).unwrap(),
            config.pipeline.clone(),
            config.retention.cache_ttl_secs,
            Arc::new(Metrics::new()),
        ));
        let worker = Worker::new(
            0,
            queue.clone(),
            ledger.jobs().clone(),
            orchestrator,
            Duration::from_millis(10),
        );
        (worker, queue, ledger)
    }

    fn message(job_id: Uuid) -> MappingMessage {
        MappingMessage {
            job_id,
            source_control_key: "AWS.EC2#1.0#PR.1".parse().unwrap(),
            target_framework_key: "NIST#R5".parse().unwrap(),
            target_control_ids: None,
            enqueued_at: Utc::now(),
        }
    }

    fn pending_job(job_id: Uuid) -> JobRecord {
        JobRecord::new(
            job_id,
            "AWS.EC2#1.0#PR.1".parse().unwrap(),
            "NIST#R5".parse().unwrap(),
            None,
            604_800,
        )
    }

    #[tokio::test]
    async fn failed_workflow_writes_terminal_state_and_acks() {
        let temp_dir = TempDir::new().unwrap();
        let (worker, queue, ledger) = build_worker(&temp_dir);

        let job_id = Uuid::new_v4();
        ledger.jobs().create(pending_job(job_id)).unwrap();
        queue.enqueue(&message(job_id)).unwrap();

        let delivery = queue.receive(1).unwrap().into_iter().next().unwrap();
        worker.handle(delivery).await;

        // Source control is not in the catalog, so the run fails cleanly
        let record = ledger.jobs().get(&job_id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(queue.depth().unwrap(), 0);
    }

    #[tokio::test]
    async fn terminal_job_is_acked_without_a_run() {
        let temp_dir = TempDir::new().unwrap();
        let (worker, queue, ledger) = build_worker(&temp_dir);

        let job_id = Uuid::new_v4();
        ledger.jobs().create(pending_job(job_id)).unwrap();
        ledger.jobs().mark_running(&job_id, "prior-run").unwrap();
        ledger.jobs().mark_completed(&job_id, vec![]).unwrap();

        queue.enqueue(&message(job_id)).unwrap();
        let delivery = queue.receive(1).unwrap().into_iter().next().unwrap();
        worker.handle(delivery).await;

        let record = ledger.jobs().get(&job_id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(queue.depth().unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_job_message_is_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let (worker, queue, _ledger) = build_worker(&temp_dir);

        queue.enqueue(&message(Uuid::new_v4())).unwrap();
        let delivery = queue.receive(1).unwrap().into_iter().next().unwrap();
        worker.handle(delivery).await;

        assert_eq!(queue.depth().unwrap(), 0);
    }
}
