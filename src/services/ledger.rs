use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::job::{JobInput, JobRecord, JobStatus};

const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// In-memory authoritative store of job records.
///
/// Records live in a sharded map so concurrent updates to different jobs only
/// contend when they hash to the same shard. Every accepted update is checked
/// against the record invariants (monotone status, non-decreasing progress,
/// append-only artifacts) and rolled back if it breaks one.
pub struct JobLedger {
    records: DashMap<Uuid, JobRecord>,
    capacity: usize,
    /// Slots taken by live records; claimed before insert so `create` never overshoots.
    reserved: AtomicUsize,
    updates: broadcast::Sender<JobRecord>,
}

impl JobLedger {
    pub fn new(capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            records: DashMap::new(),
            capacity,
            reserved: AtomicUsize::new(0),
            updates,
        }
    }

    /// Insert a new QUEUED record for `input` and return its id.
    pub fn create(&self, input: JobInput) -> Result<Uuid, LedgerError> {
        self.reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |taken| {
                (taken < self.capacity).then_some(taken + 1)
            })
            .map_err(|_| LedgerError::Full(self.capacity))?;
        let record = JobRecord::new(input);
        let id = record.id;
        let _ = self.updates.send(record.clone());
        self.records.insert(id, record);
        tracing::debug!(job_id = %id, "Job record created");
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Result<JobRecord, LedgerError> {
        self.records
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(LedgerError::NotFound(id))
    }

    /// Apply `mutate` to the record atomically and return the new snapshot.
    pub fn update<F>(&self, id: Uuid, mutate: F) -> Result<JobRecord, LedgerError>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut entry = self.records.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
        let before = entry.value().clone();
        mutate(entry.value_mut());

        if let Err(violation) = check_invariants(&before, entry.value()) {
            *entry.value_mut() = before;
            tracing::error!(job_id = %id, %violation, "Rejected ledger update");
            return Err(LedgerError::Invariant { id, violation });
        }

        let snapshot = entry.value().clone();
        drop(entry);
        let _ = self.updates.send(snapshot.clone());
        Ok(snapshot)
    }

    /// Remove terminal records completed before `cutoff`. Live jobs are never touched.
    pub fn sweep_terminal(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.records.retain(|_, record| {
            let expired = record.status.is_terminal()
                && record.completed_at.is_some_and(|done| done < cutoff);
            removed += usize::from(expired);
            !expired
        });
        self.reserved.fetch_sub(removed, Ordering::SeqCst);
        removed
    }

    /// Every accepted create/update, in the order it was applied per job.
    pub fn subscribe(&self) -> broadcast::Receiver<JobRecord> {
        self.updates.subscribe()
    }

    pub fn counts(&self) -> HashMap<JobStatus, usize> {
        let mut counts = HashMap::new();
        for entry in self.records.iter() {
            *counts.entry(entry.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn check_invariants(before: &JobRecord, after: &JobRecord) -> Result<(), String> {
    if after.id != before.id {
        return Err("job id is immutable".to_string());
    }
    if after.input != before.input {
        return Err("job input is immutable".to_string());
    }
    if !before.status.can_transition_to(after.status) {
        return Err(format!("illegal transition {} -> {}", before.status, after.status));
    }
    if after.progress_percent < before.progress_percent || after.progress_percent > 100 {
        return Err(format!(
            "progress moved from {} to {}",
            before.progress_percent, after.progress_percent
        ));
    }
    if after.artifacts.len() < before.artifacts.len()
        || after.artifacts[..before.artifacts.len()] != before.artifacts[..]
    {
        return Err("recorded artifacts may only be appended".to_string());
    }
    if after.status == JobStatus::Failed && after.error.is_none() {
        return Err("failed job without error".to_string());
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job ledger is full ({0} records)")]
    Full(usize),

    #[error("Update to job {id} rejected: {violation}")]
    Invariant { id: Uuid, violation: String },
}
