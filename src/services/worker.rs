//! Fixed-size worker pool.
//!
//! Each worker owns one [`Toolkit`] and runs at most one job at a time. Its
//! lifecycle is `Idle -> Busy -> Recycling -> Idle`: after serving
//! `max_jobs_per_worker` jobs the toolkit is released and rebuilt before the
//! worker claims anything else. A toolkit is always built before a claim, so a
//! worker that cannot build one never takes a job off the queue.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::services::collaborators::{ArtifactStore, Toolkit, ToolkitFactory};
use crate::services::ledger::JobLedger;
use crate::services::pipeline::{JobOutcome, PipelineExecutor, PipelineSettings};
use crate::services::queue::{JobQueue, QueuedJob};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Idle,
    Busy { job_id: Uuid },
    Recycling,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    /// Jobs served before the toolkit is rebuilt; 0 disables recycling.
    pub max_jobs_per_worker: usize,
    pub rebuild_backoff: Duration,
}

/// Shared dependencies every worker runs jobs against.
#[derive(Clone)]
pub struct WorkerDeps {
    pub queue: Arc<JobQueue>,
    pub ledger: Arc<JobLedger>,
    pub store: Arc<dyn ArtifactStore>,
    pub factory: Arc<dyn ToolkitFactory>,
    pub settings: Arc<PipelineSettings>,
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    states: Vec<watch::Receiver<WorkerState>>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    pub fn spawn(config: PoolConfig, deps: WorkerDeps) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(config.workers);
        let mut states = Vec::with_capacity(config.workers);

        for index in 0..config.workers {
            let (state, state_rx) = watch::channel(WorkerState::Starting);
            let worker = Worker {
                index,
                deps: deps.clone(),
                max_jobs: config.max_jobs_per_worker,
                backoff: config.rebuild_backoff,
                state,
                shutdown: shutdown_rx.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
            states.push(state_rx);
        }

        tracing::info!(
            workers = config.workers,
            max_jobs_per_worker = config.max_jobs_per_worker,
            "Worker pool started"
        );
        Self {
            handles,
            states,
            shutdown,
        }
    }

    pub fn states(&self) -> Vec<WorkerState> {
        self.states.iter().map(|rx| *rx.borrow()).collect()
    }

    pub fn monitor(&self) -> PoolMonitor {
        PoolMonitor {
            states: self.states.clone(),
        }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Workers whose task is still running.
    pub fn alive(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    /// Stop claiming new jobs and wait for in-progress jobs to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task ended abnormally");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

/// Read-only view of worker states for request handlers.
#[derive(Clone)]
pub struct PoolMonitor {
    states: Vec<watch::Receiver<WorkerState>>,
}

impl PoolMonitor {
    pub fn states(&self) -> Vec<WorkerState> {
        self.states.iter().map(|rx| *rx.borrow()).collect()
    }

    pub fn size(&self) -> usize {
        self.states.len()
    }

    /// Workers that have neither stopped nor died.
    pub fn alive(&self) -> usize {
        self.states
            .iter()
            .filter(|rx| rx.has_changed().is_ok() && *rx.borrow() != WorkerState::Stopped)
            .count()
    }
}

struct Worker {
    index: usize,
    deps: WorkerDeps,
    max_jobs: usize,
    backoff: Duration,
    state: watch::Sender<WorkerState>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        let Some(mut toolkit) = self.prepare().await else {
            self.set(WorkerState::Stopped);
            return;
        };
        let mut served = 0;

        loop {
            self.set(WorkerState::Idle);
            let job = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => break,
                job = self.deps.queue.claim() => job,
            };

            self.set(WorkerState::Busy { job_id: job.job_id });
            self.process(&toolkit, job).await;
            served += 1;

            if self.max_jobs > 0 && served >= self.max_jobs {
                self.set(WorkerState::Recycling);
                tracing::debug!(worker = self.index, served, "Recycling worker toolkit");
                toolkit.release().await;
                drop(toolkit);
                metrics::counter!("worker_recycles_total").increment(1);

                toolkit = match self.prepare().await {
                    Some(fresh) => fresh,
                    None => break,
                };
                served = 0;
            }
        }

        self.set(WorkerState::Stopped);
        tracing::info!(worker = self.index, "Worker stopped");
    }

    /// Build a toolkit, retrying with backoff. `None` means shutdown was requested.
    async fn prepare(&mut self) -> Option<Toolkit> {
        loop {
            if *self.shutdown.borrow() {
                return None;
            }
            match self.deps.factory.build().await {
                Ok(toolkit) => return Some(toolkit),
                Err(e) => {
                    tracing::error!(worker = self.index, error = %e, "Failed to build toolkit, retrying");
                    self.set(WorkerState::Recycling);
                    tokio::select! {
                        _ = shutdown_requested(&mut self.shutdown) => return None,
                        _ = tokio::time::sleep(self.backoff) => {}
                    }
                }
            }
        }
    }

    async fn process(&self, toolkit: &Toolkit, job: QueuedJob) {
        let job_id = job.job_id;
        let executor = PipelineExecutor::new(
            Arc::clone(&self.deps.ledger),
            Arc::clone(&self.deps.store),
            toolkit,
            Arc::clone(&self.deps.settings),
        );

        match executor.run(job).await {
            Ok(JobOutcome::Completed { artifacts }) => {
                tracing::info!(worker = self.index, job_id = %job_id, artifacts, "Job finished");
            }
            Ok(JobOutcome::Failed { error }) => {
                tracing::warn!(worker = self.index, job_id = %job_id, error = %error, "Job finished with failure");
            }
            Err(e) => {
                tracing::error!(worker = self.index, job_id = %job_id, error = %e, "Job abandoned");
            }
        }
        self.deps.queue.complete(job_id);
    }

    fn set(&self, state: WorkerState) {
        let _ = self.state.send(state);
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
