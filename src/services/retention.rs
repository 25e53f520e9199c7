use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::services::collaborators::ArtifactStore;
use crate::services::ledger::JobLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub records: usize,
    pub files: usize,
}

/// Drop terminal job records and stored videos older than `retention`.
pub async fn sweep_once(
    ledger: &JobLedger,
    store: &dyn ArtifactStore,
    retention: Duration,
) -> SweepReport {
    let cutoff = chrono::Duration::from_std(retention)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

    let records = ledger.sweep_terminal(cutoff);
    let files = match store.purge_older_than(retention).await {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(error = %e, "Artifact purge failed");
            0
        }
    };

    if records > 0 || files > 0 {
        tracing::info!(records, files, "Retention sweep removed expired data");
    }
    SweepReport { records, files }
}

/// Run [`sweep_once`] every `interval` until `shutdown` flips to true.
pub fn spawn_sweeper(
    ledger: Arc<JobLedger>,
    store: Arc<dyn ArtifactStore>,
    retention: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep_once(&ledger, store.as_ref(), retention).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Retention sweeper stopped");
    })
}
