use std::sync::Arc;
use uuid::Uuid;

use crate::models::job::JobInput;
use crate::services::ledger::{JobLedger, LedgerError};
use crate::services::queue::{JobQueue, QueuedJob};

/// Front door for new work: records the job, then offers it to the pool.
pub struct Dispatcher {
    ledger: Arc<JobLedger>,
    queue: Arc<JobQueue>,
}

impl Dispatcher {
    pub fn new(ledger: Arc<JobLedger>, queue: Arc<JobQueue>) -> Self {
        Self { ledger, queue }
    }

    /// Create the ledger record and enqueue the job. Returns the new job id.
    pub fn accept(&self, input: JobInput, image: Arc<[u8]>) -> Result<Uuid, LedgerError> {
        let job_id = self.ledger.create(input.clone())?;
        self.submit(job_id, input, image);
        Ok(job_id)
    }

    /// Offer an already-recorded job to the workers.
    pub fn submit(&self, job_id: Uuid, input: JobInput, image: Arc<[u8]>) {
        self.queue.enqueue(QueuedJob {
            job_id,
            image,
            input,
        });
        metrics::counter!("ad_jobs_submitted_total").increment(1);
        tracing::info!(job_id = %job_id, queue_depth = self.queue.queue_depth(), "Job queued");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobStatus;
    use crate::testing::sample_input;

    #[test]
    fn test_accept_records_and_enqueues() {
        let ledger = Arc::new(JobLedger::new(10));
        let queue = Arc::new(JobQueue::new());
        let dispatcher = Dispatcher::new(Arc::clone(&ledger), Arc::clone(&queue));

        let id = dispatcher.accept(sample_input(), Arc::from(&b"img"[..])).unwrap();
        assert_eq!(ledger.get(id).unwrap().status, JobStatus::Queued);
        assert_eq!(queue.queue_depth(), 1);
        assert_eq!(queue.dequeue().unwrap().job_id, id);
    }

    #[test]
    fn test_full_ledger_enqueues_nothing() {
        let ledger = Arc::new(JobLedger::new(0));
        let queue = Arc::new(JobQueue::new());
        let dispatcher = Dispatcher::new(ledger, Arc::clone(&queue));

        assert!(dispatcher.accept(sample_input(), Arc::from(&b"img"[..])).is_err());
        assert_eq!(queue.queue_depth(), 0);
    }
}
