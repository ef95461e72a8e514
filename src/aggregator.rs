//! Live state aggregation
//!
//! [`StateAggregator`] owns the current [`Snapshot`]. Every poll result is
//! applied under one short exclusive section, and readers copy the whole
//! snapshot under the same lock, so a reader never sees a half-applied write.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::snapshot::{Field, Snapshot};
use crate::value::RegisterValue;

#[derive(Debug, Default)]
struct Inner {
    snapshot: Snapshot,
    last_taken: Option<DateTime<Utc>>,
}

/// Single owner of the live cell state.
#[derive(Debug, Default)]
pub struct StateAggregator {
    inner: Mutex<Inner>,
}

impl StateAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one field. Safe to call from any number of tasks.
    #[inline]
    pub fn apply_field(&self, field: Field, value: RegisterValue) {
        self.inner.lock().snapshot.set(field, value);
    }

    /// Copy the current state, stamped with the time of the copy.
    ///
    /// Timestamps never go backwards across calls, even if the wall clock does.
    pub fn take_snapshot(&self) -> Snapshot {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let timestamp = match inner.last_taken {
            Some(last) if last > now => last,
            _ => now,
        };
        inner.last_taken = Some(timestamp);

        let mut snapshot = inner.snapshot.clone();
        snapshot.timestamp = timestamp;
        snapshot
    }

    /// Reset every field to zero/false.
    pub fn reset(&self) {
        self.inner.lock().snapshot = Snapshot::default();
    }
}
