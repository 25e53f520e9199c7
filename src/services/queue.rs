use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::models::job::JobInput;

/// Work item handed from the dispatcher to a worker.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub image: Arc<[u8]>,
    pub input: JobInput,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedJob>,
    processing: HashSet<Uuid>,
}

/// Volatile FIFO job queue with late acknowledgement.
///
/// A job leaves `pending` only when a worker claims it, and the claim moves it
/// into the in-flight set in the same critical section. Completion removes it
/// from the in-flight set. Nothing is ever re-queued: a job whose worker dies
/// after claiming stays in flight.
#[derive(Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    available: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, job: QueuedJob) {
        let depth = {
            let mut state = self.state.lock();
            state.pending.push_back(job);
            state.pending.len()
        };
        metrics::gauge!("ad_queue_depth").set(depth as f64);
        self.available.notify_one();
    }

    /// Claim the oldest pending job, if any.
    pub fn dequeue(&self) -> Option<QueuedJob> {
        let mut state = self.state.lock();
        let job = state.pending.pop_front()?;
        state.processing.insert(job.job_id);
        metrics::gauge!("ad_queue_depth").set(state.pending.len() as f64);
        Some(job)
    }

    /// Wait until a job can be claimed.
    pub async fn claim(&self) -> QueuedJob {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(job) = self.dequeue() {
                return job;
            }
            notified.await;
        }
    }

    /// Acknowledge a claimed job as finished.
    pub fn complete(&self, job_id: Uuid) -> bool {
        self.state.lock().processing.remove(&job_id)
    }

    pub fn queue_depth(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().processing.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_input;
    use std::time::Duration;

    fn job() -> QueuedJob {
        QueuedJob {
            job_id: Uuid::new_v4(),
            image: Arc::from(&b"jpeg"[..]),
            input: sample_input(),
        }
    }

    #[test]
    fn test_fifo_claim_moves_to_in_flight() {
        let queue = JobQueue::new();
        let first = job();
        let second = job();
        queue.enqueue(first.clone());
        queue.enqueue(second.clone());
        assert_eq!(queue.queue_depth(), 2);

        let claimed = queue.dequeue().unwrap();
        assert_eq!(claimed.job_id, first.job_id);
        assert_eq!(queue.queue_depth(), 1);
        assert_eq!(queue.in_flight(), 1);
        assert!(!queue.complete(second.job_id));

        assert!(queue.complete(first.job_id));
        assert!(!queue.complete(first.job_id));
        assert_eq!(queue.in_flight(), 0);
    }

    #[test]
    fn test_empty_queue_yields_nothing() {
        let queue = JobQueue::new();
        assert!(queue.dequeue().is_none());
    }

    #[tokio::test]
    async fn test_claim_wakes_on_enqueue() {
        let queue = Arc::new(JobQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.claim().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let pushed = job();
        queue.enqueue(pushed.clone());
        let claimed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("claim should wake")
            .unwrap();
        assert_eq!(claimed.job_id, pushed.job_id);
    }

    #[tokio::test]
    async fn test_each_job_claimed_once() {
        let queue = Arc::new(JobQueue::new());
        for _ in 0..20 {
            queue.enqueue(job());
        }
        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                while let Some(job) = queue.dequeue() {
                    ids.push(job.job_id);
                }
                ids
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "job claimed twice");
            }
        }
        assert_eq!(seen.len(), 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_burst_of_jobs_wakes_every_waiting_claimer() {
        let queue = Arc::new(JobQueue::new());
        for _ in 0..50 {
            let waiters: Vec<_> = (0..4)
                .map(|_| {
                    let queue = Arc::clone(&queue);
                    tokio::spawn(async move { queue.claim().await.job_id })
                })
                .collect();
            tokio::task::yield_now().await;
            for _ in 0..4 {
                queue.enqueue(job());
            }

            let claimed = tokio::time::timeout(
                Duration::from_secs(2),
                futures::future::join_all(waiters),
            )
            .await
            .expect("a claimer missed its wakeup");
            let ids: HashSet<_> = claimed.into_iter().map(|r| r.unwrap()).collect();
            assert_eq!(ids.len(), 4);
            assert_eq!(queue.queue_depth(), 0);
            for id in ids {
                queue.complete(id);
            }
        }
    }
}
