use std::sync::Arc;

use crate::config::Config;
use crate::ledger::Ledger;
use crate::observability::Metrics;
use crate::queue::RequestQueue;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ledger: Ledger,
    pub queue: Arc<RequestQueue>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(config: Config, ledger: Ledger, queue: Arc<RequestQueue>) -> Self {
        Self {
            config: Arc::new(config),
            ledger,
            queue,
            metrics: Arc::new(Metrics::new()),
        }
    }
}
