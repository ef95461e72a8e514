//! Periodic snapshot persistence
//!
//! [`PersistencePipeline`] samples the [`StateAggregator`] on its own cadence
//! and appends each sample to the history store. Saving is best effort: a
//! failed save is logged, reported on the status line, and the next tick
//! proceeds as usual. Nothing is retried.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::StateAggregator;
use crate::connection::ConnectionStatus;
use crate::error::{MonitorError, MonitorResult};
use crate::events::EventBus;
use crate::store::{HistoryRecord, HistoryStatistics, HistoryStore};

/// Save counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistenceStats {
    pub saved: u64,
    pub failed: u64,
}

pub struct PersistencePipeline {
    aggregator: Arc<StateAggregator>,
    history: Arc<dyn HistoryStore>,
    events: EventBus,
    recent_limit: usize,
    recent: watch::Sender<Arc<Vec<HistoryRecord>>>,
    saved: AtomicU64,
    failed: AtomicU64,
}

impl PersistencePipeline {
    pub fn new(
        aggregator: Arc<StateAggregator>,
        history: Arc<dyn HistoryStore>,
        events: EventBus,
        recent_limit: usize,
    ) -> Self {
        let (recent, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            aggregator,
            history,
            events,
            recent_limit,
            recent,
            saved: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    /// Take one snapshot and append it. Returns whether the save succeeded.
    ///
    /// After a successful save the recent-records view is refreshed.
    pub async fn save_tick(&self) -> bool {
        let snapshot = self.aggregator.take_snapshot();
        match self.history.insert(&snapshot).await {
            Ok(id) => {
                self.saved.fetch_add(1, Ordering::Relaxed);
                debug!(id, timestamp = %snapshot.timestamp, "snapshot saved");
                self.refresh_recent().await;
                true
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "snapshot save failed");
                self.events.set_status(format!("Data save failed: {}", e));
                false
            }
        }
    }

    async fn refresh_recent(&self) {
        match self.history.latest(self.recent_limit).await {
            Ok(records) => {
                self.recent.send_replace(Arc::new(records));
            }
            Err(e) => warn!(error = %e, "recent history refresh failed"),
        }
    }

    /// Run [`save_tick`](Self::save_tick) every `period` while `state` reports
    /// a connected link, until `cancel` fires. The first save happens one
    /// period after the call.
    pub fn spawn(
        self: &Arc<Self>,
        period: Duration,
        mut state: watch::Receiver<ConnectionStatus>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period_ms = period.as_millis() as u64, "persistence started");

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if !state.borrow_and_update().state.is_connected() {
                    continue;
                }
                pipeline.save_tick().await;
            }
            info!("persistence stopped");
        })
    }

    /// Prune records older than `retention` every `sweep`, starting now.
    pub fn spawn_retention(
        self: &Arc<Self>,
        retention: chrono::Duration,
        sweep: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match pipeline.prune(retention).await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "retention sweep pruned history"),
                    Err(e) => warn!(error = %e, "retention sweep failed"),
                }
            }
        })
    }

    /// Delete records older than `now - retention`.
    pub async fn prune(&self, retention: chrono::Duration) -> MonitorResult<usize> {
        if retention <= chrono::Duration::zero() {
            return Err(MonitorError::configuration("retention must be positive"));
        }
        self.history.delete_before(Utc::now() - retention).await
    }

    /// Most recent records as of the last successful save, newest first.
    pub fn recent(&self) -> Arc<Vec<HistoryRecord>> {
        self.recent.borrow().clone()
    }

    pub fn subscribe_recent(&self) -> watch::Receiver<Arc<Vec<HistoryRecord>>> {
        self.recent.subscribe()
    }

    pub fn stats(&self) -> PersistenceStats {
        PersistenceStats {
            saved: self.saved.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    // ============================================================================
    // Queries
    // ============================================================================

    pub async fn latest(&self, limit: usize) -> MonitorResult<Vec<HistoryRecord>> {
        self.history.latest(limit).await
    }

    pub async fn range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MonitorResult<Vec<HistoryRecord>> {
        self.history.range(start, end).await
    }

    pub async fn delete_before(&self, cutoff: DateTime<Utc>) -> MonitorResult<usize> {
        self.history.delete_before(cutoff).await
    }

    pub async fn statistics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MonitorResult<HistoryStatistics> {
        self.history.statistics(start, end).await
    }
}
