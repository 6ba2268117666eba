use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get, routing::post};
use chrono::Utc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use super::{
    services::{get_mapping, health, redrive_dlq, submit_mapping},
    state::AppState,
};
use crate::config::Config;
use crate::ledger::{JobStatus, Ledger};
use crate::observability::Metrics;
use crate::pipeline::Orchestrator;
use crate::queue::{MappingMessage, RequestQueue};
use crate::rpc::{AgentClient, ScienceClient};
use crate::worker::Worker;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Build the full route table over shared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/mappings", post(submit_mapping))
        .route("/mappings/{mapping_id}", get(get_mapping))
        .route("/operators/jobs/{mapping_id}", get(get_mapping))
        .route("/operators/redrive", post(redrive_dlq))
        .route("/operators/health", get(health))
        .route("/health", get(health))
        .with_state(state)
}

/// Run the API server with the in-process worker pool and maintenance loop.
pub async fn run(address: Option<SocketAddr>) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config = Config::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let address = address.unwrap_or(config.server.bind_addr);

    let ledger_path = config.server.data_path.join("ledger");
    info!(path = %ledger_path.display(), "Opening ledger");
    let ledger =
        Ledger::open(&ledger_path).map_err(|e| format!("Failed to open ledger: {e}"))?;

    let queue_path = config.server.data_path.join("queue");
    info!(path = %queue_path.display(), "Opening request queue");
    let queue = RequestQueue::open(&queue_path, &config.queue)
        .map_err(|e| format!("Failed to open queue: {e}"))?;

    let science =
        ScienceClient::new(&config.science).map_err(|e| format!("science client: {e}"))?;
    let agent = AgentClient::new(&config.agent).map_err(|e| format!("agent client: {e}"))?;

    let metrics = Arc::new(Metrics::new());
    let orchestrator = Arc::new(Orchestrator::new(
        ledger.clone(),
        science,
        agent,
        config.pipeline.clone(),
        config.retention.cache_ttl_secs,
        metrics.clone(),
    ));

    let mut background = Vec::new();
    for worker_id in 0..config.workers.count {
        let worker = Worker::new(
            worker_id,
            queue.clone(),
            ledger.jobs().clone(),
            orchestrator.clone(),
            config.workers.poll_interval(),
        );
        background.push(tokio::spawn(worker.run()));
    }
    info!(count = config.workers.count, "Worker pool started");

    background.push(tokio::spawn(maintenance_loop(
        ledger.clone(),
        queue.clone(),
        config.retention.sweep_interval(),
        config.queue.visibility_timeout() * 2,
    )));

    let state = AppState {
        config: Arc::new(config),
        ledger,
        queue,
        metrics,
    };
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "Crosswalk API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for task in background {
        task.abort();
    }

    Ok(())
}

/// Periodic sweep of stuck PENDING jobs plus retention pruning.
async fn maintenance_loop(
    ledger: Ledger,
    queue: Arc<RequestQueue>,
    interval: Duration,
    pending_age: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;

        match sweep_pending(&ledger, &queue, pending_age) {
            Ok(0) => {}
            Ok(reissued) => info!(reissued, "Pending jobs re-enqueued"),
            Err(error) => error!(%error, "Pending sweep failed"),
        }

        if let Err(error) = ledger.prune_expired() {
            error!(%error, "Ledger pruning failed");
        }
        if let Err(error) = queue.prune_expired() {
            error!(%error, "Queue pruning failed");
        }
    }
}

/// Re-enqueue PENDING jobs older than `older_than` whose original enqueue
/// may have been lost. Duplicate deliveries are absorbed by the job store's
/// conditional writes.
pub(crate) fn sweep_pending(
    ledger: &Ledger,
    queue: &RequestQueue,
    older_than: Duration,
) -> Result<usize, AnyError> {
    let threshold = Utc::now()
        - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
    let mut reissued = 0;

    for job_id in ledger.jobs().list_by_status(JobStatus::Pending)? {
        let Some(record) = ledger.jobs().get(&job_id)? else {
            continue;
        };
        if record.updated_at > threshold {
            continue;
        }
        warn!(%job_id, "Re-enqueueing stuck pending job");
        queue.enqueue(&MappingMessage {
            job_id,
            source_control_key: record.source_control_key,
            target_framework_key: record.target_framework_key,
            target_control_ids: record.target_control_ids,
            enqueued_at: Utc::now(),
        })?;
        reissued += 1;
    }

    Ok(reissued)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ledger::JobRecord;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[test]
    fn sweep_reissues_only_stale_pending_jobs() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::default();
        let ledger = Ledger::open(temp_dir.path().join("ledger")).unwrap();
        let queue = RequestQueue::open(temp_dir.path().join("queue"), &config.queue).unwrap();

        let stale = Uuid::new_v4();
        ledger
            .jobs()
            .create(JobRecord::new(
                stale,
                "AWS.EC2#1.0#PR.1".parse().unwrap(),
                "NIST#R5".parse().unwrap(),
                None,
                604_800,
            ))
            .unwrap();

        let running = Uuid::new_v4();
        ledger
            .jobs()
            .create(JobRecord::new(
                running,
                "AWS.EC2#1.0#PR.2".parse().unwrap(),
                "NIST#R5".parse().unwrap(),
                None,
                604_800,
            ))
            .unwrap();
        ledger.jobs().mark_running(&running, "run-1").unwrap();

        // Zero age: every PENDING job counts as stale
        let reissued = sweep_pending(&ledger, &queue, Duration::ZERO).unwrap();
        assert_eq!(reissued, 1);

        let deliveries = queue.receive(10).unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].message.job_id, stale);
    }
}
