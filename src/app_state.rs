use std::sync::Arc;

use crate::services::{
    collaborators::ArtifactStore, dispatcher::Dispatcher, ledger::JobLedger, queue::JobQueue,
    worker::PoolMonitor,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<JobLedger>,
    pub queue: Arc<JobQueue>,
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<dyn ArtifactStore>,
    pub workers: PoolMonitor,
}

impl AppState {
    pub fn new(
        ledger: Arc<JobLedger>,
        queue: Arc<JobQueue>,
        store: Arc<dyn ArtifactStore>,
        workers: PoolMonitor,
    ) -> Self {
        let dispatcher = Dispatcher::new(Arc::clone(&ledger), Arc::clone(&queue));
        Self {
            ledger,
            queue,
            dispatcher: Arc::new(dispatcher),
            store,
            workers,
        }
    }
}
