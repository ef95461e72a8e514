//! Per-address cyclic polling
//!
//! Each polled address owns one spawned task driven by its own
//! [`tokio::time::interval`]. The first read happens immediately, then once per
//! period. Tasks for different addresses are independent; they share only the
//! client, whose transport serializes the actual exchanges.
//!
//! Stopping is cooperative: the task observes its [`CancellationToken`]
//! between ticks, and a read already on the wire is allowed to finish but its
//! result is discarded. [`PollScheduler::stop`] waits for the task to exit, so
//! once it returns the handler will not be invoked again for that address.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::address::Address;
use crate::client::RegisterClient;
use crate::transport::RegisterTransport;

/// Callback receiving every poll result for one address.
pub type PollHandler = Arc<dyn Fn(Option<i16>) + Send + Sync>;

struct PollTask {
    interval: Duration,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollTask {
    async fn shutdown(self, address: &Address) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(address = %address, error = %e, "poll task ended abnormally");
        }
    }
}

/// Registry of running poll tasks keyed by address.
pub struct PollScheduler<T: RegisterTransport> {
    client: Arc<RegisterClient<T>>,
    root: CancellationToken,
    tasks: Mutex<HashMap<Address, PollTask>>,
}

impl<T: RegisterTransport> PollScheduler<T> {
    pub fn new(client: Arc<RegisterClient<T>>) -> Self {
        Self::with_cancellation(client, CancellationToken::new())
    }

    /// Tasks are cancelled when `parent` is.
    pub fn with_cancellation(client: Arc<RegisterClient<T>>, parent: CancellationToken) -> Self {
        Self {
            client,
            root: parent.child_token(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Start polling `address` every `interval`, replacing any existing task
    /// for it. The previous task has fully stopped before the new one starts.
    ///
    /// A zero interval performs a single read. The registry stays available to
    /// other addresses while a replaced task winds down.
    pub async fn start<F>(&self, address: Address, interval: Duration, handler: F)
    where
        F: Fn(Option<i16>) + Send + Sync + 'static,
    {
        let handler: PollHandler = Arc::new(handler);

        let previous = self.tasks.lock().await.remove(&address);
        if let Some(previous) = previous {
            debug!(address = %address, "replacing poll task");
            previous.shutdown(&address).await;
        }

        let cancel = self.root.child_token();
        let handle = tokio::spawn(run_poll(
            Arc::clone(&self.client),
            address.clone(),
            interval,
            handler,
            cancel.clone(),
        ));
        debug!(address = %address, interval_ms = interval.as_millis() as u64, "poll task started");

        let task = PollTask {
            interval,
            cancel,
            handle,
        };
        let raced = self.tasks.lock().await.insert(address.clone(), task);
        // A concurrent start for the same address registered first; last one wins.
        if let Some(raced) = raced {
            raced.shutdown(&address).await;
        }
    }

    /// Stop polling `address`. Returns `false` if it was not being polled.
    pub async fn stop(&self, address: &Address) -> bool {
        let task = self.tasks.lock().await.remove(address);
        match task {
            Some(task) => {
                task.shutdown(address).await;
                debug!(address = %address, "poll task stopped");
                true
            }
            None => false,
        }
    }

    /// Stop every task and wait for all of them to exit.
    pub async fn stop_all(&self) {
        let drained: Vec<_> = self.tasks.lock().await.drain().collect();
        if drained.is_empty() {
            return;
        }
        for (_, task) in &drained {
            task.cancel.cancel();
        }
        let count = drained.len();
        for (address, task) in drained {
            task.shutdown(&address).await;
        }
        debug!(count, "all poll tasks stopped");
    }

    pub async fn is_polling(&self, address: &Address) -> bool {
        self.tasks.lock().await.contains_key(address)
    }

    /// Addresses currently polled, with their intervals.
    pub async fn active(&self) -> Vec<(Address, Duration)> {
        let tasks = self.tasks.lock().await;
        let mut active: Vec<_> = tasks
            .iter()
            .map(|(address, task)| (address.clone(), task.interval))
            .collect();
        active.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        active
    }
}

impl<T: RegisterTransport> Drop for PollScheduler<T> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

async fn run_poll<T: RegisterTransport>(
    client: Arc<RegisterClient<T>>,
    address: Address,
    period: Duration,
    handler: PollHandler,
    cancel: CancellationToken,
) {
    if period.is_zero() {
        if !cancel.is_cancelled() {
            let value = client.read_i16(&address).await;
            if !cancel.is_cancelled() {
                deliver(&handler, &address, value);
            }
        }
        return;
    }

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let value = client.read_i16(&address).await;
        if cancel.is_cancelled() {
            break;
        }
        deliver(&handler, &address, value);
    }
}

fn deliver(handler: &PollHandler, address: &Address, value: Option<i16>) {
    if catch_unwind(AssertUnwindSafe(|| handler(value))).is_err() {
        warn!(address = %address, "poll handler panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::simulator::SimulatedTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn connected_client() -> Arc<RegisterClient<SimulatedTransport>> {
        let client = Arc::new(RegisterClient::new(
            SimulatedTransport::new(),
            EventBus::new(64),
        ));
        client.connect().await;
        client
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(Option<i16>) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_is_immediate_then_periodic() {
        let client = connected_client().await;
        let scheduler = PollScheduler::new(Arc::clone(&client));
        let addr = Address::parse("D100").unwrap();
        let (count, handler) = counter();

        scheduler.start(addr.clone(), Duration::from_millis(100), handler).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
        scheduler.stop(&addr).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_receives_values_and_absence() {
        let client = connected_client().await;
        let addr = Address::parse("D5").unwrap();
        client.transport().set(&addr, 77);
        let scheduler = PollScheduler::new(Arc::clone(&client));

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        scheduler
            .start(addr.clone(), Duration::from_millis(100), move |v| {
                sink.lock().push(v)
            })
            .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        client.transport().fail_reads(&addr, true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop(&addr).await;

        let seen = seen.lock();
        assert_eq!(seen.as_slice(), &[Some(77), None]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_other_address_does_not_affect_polling() {
        let client = connected_client().await;
        let scheduler = PollScheduler::new(Arc::clone(&client));
        let a = Address::parse("D1").unwrap();
        let b = Address::parse("D2").unwrap();
        let (count, handler) = counter();

        scheduler.start(a.clone(), Duration::from_millis(100), handler).await;
        assert!(!scheduler.stop(&b).await);
        assert!(!scheduler.stop(&b).await);

        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(count.load(Ordering::SeqCst), 5);
        assert!(scheduler.is_polling(&a).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_delivery_after_stop() {
        let client = connected_client().await;
        client.transport().set_latency(Duration::from_millis(30));
        let scheduler = PollScheduler::new(Arc::clone(&client));
        let addr = Address::parse("M100").unwrap();
        let (count, handler) = counter();

        scheduler.start(addr.clone(), Duration::from_millis(50), handler).await;
        // stop while the first read is still in flight
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(scheduler.stop(&addr).await);
        let after_stop = count.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(after_stop, 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!scheduler.stop(&addr).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_task() {
        let client = connected_client().await;
        let scheduler = PollScheduler::new(Arc::clone(&client));
        let addr = Address::parse("D9").unwrap();
        let (old_count, old_handler) = counter();
        let (new_count, new_handler) = counter();

        scheduler.start(addr.clone(), Duration::from_millis(100), old_handler).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        let old_ticks = old_count.load(Ordering::SeqCst);
        assert_eq!(old_ticks, 2);

        scheduler.start(addr.clone(), Duration::from_millis(200), new_handler).await;
        tokio::time::sleep(Duration::from_millis(450)).await;

        assert_eq!(old_count.load(Ordering::SeqCst), old_ticks);
        assert_eq!(new_count.load(Ordering::SeqCst), 3);
        assert_eq!(
            scheduler.active().await,
            vec![(addr.clone(), Duration::from_millis(200))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacement_does_not_block_other_addresses() {
        let client = connected_client().await;
        client.transport().set_latency(Duration::from_millis(500));
        let scheduler = Arc::new(PollScheduler::new(Arc::clone(&client)));
        let slow = Address::parse("D1").unwrap();
        let other = Address::parse("D2").unwrap();

        let (_, handler) = counter();
        scheduler.start(slow.clone(), Duration::from_secs(1), handler).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The replaced task is mid-read for another ~490 ms.
        let replacing = {
            let scheduler = Arc::clone(&scheduler);
            let slow = slow.clone();
            tokio::spawn(async move {
                let (_, handler) = counter();
                scheduler.start(slow, Duration::from_secs(1), handler).await;
            })
        };
        let began = tokio::time::Instant::now();
        while scheduler.is_polling(&slow).await && began.elapsed() < Duration::from_secs(1) {
            tokio::task::yield_now().await;
        }
        assert!(!scheduler.stop(&other).await);
        assert!(scheduler.active().await.is_empty());
        assert!(began.elapsed() < Duration::from_millis(100));

        replacing.await.unwrap();
        assert!(scheduler.is_polling(&slow).await);
        scheduler.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_reads_once() {
        let client = connected_client().await;
        let scheduler = PollScheduler::new(Arc::clone(&client));
        let addr = Address::parse("D3").unwrap();
        let (count, handler) = counter();

        scheduler.start(addr.clone(), Duration::ZERO, handler).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(client.transport().read_count(&addr), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_handler_keeps_polling() {
        let client = connected_client().await;
        let scheduler = PollScheduler::new(Arc::clone(&client));
        let addr = Address::parse("D4").unwrap();

        scheduler
            .start(addr.clone(), Duration::from_millis(100), |_| panic!("boom"))
            .await;
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(client.transport().read_count(&addr), 3);
        assert!(scheduler.stop(&addr).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all() {
        let client = connected_client().await;
        let scheduler = PollScheduler::new(Arc::clone(&client));
        for name in ["D1", "D2", "M1"] {
            scheduler
                .start(Address::parse(name).unwrap(), Duration::from_millis(100), |_| {})
                .await;
        }
        assert_eq!(scheduler.active().await.len(), 3);

        scheduler.stop_all().await;
        assert!(scheduler.active().await.is_empty());
    }
}
