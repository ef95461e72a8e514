//! In-process controller simulation
//!
//! [`SimulatedTransport`] implements [`RegisterTransport`] over an in-memory
//! register map. It backs the CLI's `--simulate` mode and the test suites, and
//! supports fault injection (refused connects, failing points, latency).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::address::{Address, RegisterLocation};
use crate::error::{MonitorError, MonitorResult};
use crate::transport::{RegisterTransport, TransportStats};

/// Simulated controller reachable through the [`RegisterTransport`] API.
#[derive(Debug, Default)]
pub struct SimulatedTransport {
    words: Mutex<HashMap<RegisterLocation, u16>>,
    failing: Mutex<HashSet<RegisterLocation>>,
    read_counts: Mutex<HashMap<RegisterLocation, u64>>,
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    drop_on_failure: AtomicBool,
    latency: Mutex<Duration>,
    // One exchange at a time, like a real link.
    link: tokio::sync::Mutex<()>,
    requests: AtomicU64,
    responses: AtomicU64,
    errors: AtomicU64,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the word stored at `address`.
    pub fn set(&self, address: &Address, value: i16) {
        self.words.lock().insert(address.location(), value as u16);
    }

    /// Set a flag; stored as 1 or 0.
    pub fn set_bool(&self, address: &Address, value: bool) {
        self.set(address, i16::from(value));
    }

    /// Current word at `address` (0 when never set).
    pub fn get(&self, address: &Address) -> i16 {
        self.words
            .lock()
            .get(&address.location())
            .copied()
            .unwrap_or(0) as i16
    }

    /// Make reads of `address` fail until cleared.
    pub fn fail_reads(&self, address: &Address, fail: bool) {
        let mut failing = self.failing.lock();
        if fail {
            failing.insert(address.location());
        } else {
            failing.remove(&address.location());
        }
    }

    /// Make subsequent connect attempts fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Take the link down whenever an injected read failure fires, the way a
    /// TCP link is dropped after a failed exchange.
    pub fn drop_link_on_failure(&self, drop: bool) {
        self.drop_on_failure.store(drop, Ordering::SeqCst);
    }

    /// Delay applied to every exchange.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Number of read requests served for `address`, successful or not.
    pub fn read_count(&self, address: &Address) -> u64 {
        self.read_counts
            .lock()
            .get(&address.location())
            .copied()
            .unwrap_or(0)
    }

    /// Simulate the controller dropping the link.
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl RegisterTransport for SimulatedTransport {
    async fn connect(&self) -> MonitorResult<()> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(MonitorError::connection("simulated controller refused connection"));
        }
        self.connected.store(true, Ordering::SeqCst);
        debug!("simulated controller connected");
        Ok(())
    }

    async fn close(&self) -> MonitorResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn read(&self, location: RegisterLocation) -> MonitorResult<u16> {
        let _link = self.link.lock().await;
        self.requests.fetch_add(1, Ordering::Relaxed);
        *self.read_counts.lock().entry(location).or_insert(0) += 1;

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if !self.is_connected() {
            self.errors.fetch_add(1, Ordering::Relaxed);
            return Err(MonitorError::NotConnected);
        }
        if self.failing.lock().contains(&location) {
            self.errors.fetch_add(1, Ordering::Relaxed);
            if self.drop_on_failure.load(Ordering::SeqCst) {
                self.connected.store(false, Ordering::SeqCst);
            }
            return Err(MonitorError::timeout(
                format!("read {:?} {}", location.area, location.offset),
                latency.as_millis() as u64,
            ));
        }

        self.responses.fetch_add(1, Ordering::Relaxed);
        Ok(self.words.lock().get(&location).copied().unwrap_or(0))
    }

    fn get_stats(&self) -> TransportStats {
        TransportStats {
            requests_sent: self.requests.load(Ordering::Relaxed),
            responses_received: self.responses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timeouts: 0,
        }
    }
}
