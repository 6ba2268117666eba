//! Observability stubs (metrics, tracing)

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_accepted: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    enrichment_degraded: AtomicU64,
    candidates_dropped: AtomicU64,
    reasoning_failures: AtomicU64,
    messages_redriven: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_accepted(&self) {
        self.jobs_accepted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_accepted", "Metric incremented");
    }

    pub fn job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_completed", "Metric incremented");
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_failed", "Metric incremented");
    }

    pub fn enrichment_degraded(&self) {
        self.enrichment_degraded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "enrichment_degraded", "Metric incremented");
    }

    pub fn candidate_dropped(&self) {
        self.candidates_dropped.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "candidates_dropped", "Metric incremented");
    }

    pub fn reasoning_failure(&self) {
        self.reasoning_failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "reasoning_failures", "Metric incremented");
    }

    pub fn message_redriven(&self) {
        self.messages_redriven.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "messages_redriven", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_accepted: self.jobs_accepted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            enrichment_degraded: self.enrichment_degraded.load(Ordering::Relaxed),
            candidates_dropped: self.candidates_dropped.load(Ordering::Relaxed),
            reasoning_failures: self.reasoning_failures.load(Ordering::Relaxed),
            messages_redriven: self.messages_redriven.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_accepted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub enrichment_degraded: u64,
    pub candidates_dropped: u64,
    pub reasoning_failures: u64,
    pub messages_redriven: u64,
}
