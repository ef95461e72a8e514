//! Cell monitor
//!
//! [`CellMonitor`] wires the pipeline together:
//!
//! ```text
//! ConnectionManager ──connect──▶ PollScheduler ──values──▶ StateAggregator
//!                                                               │
//!                                   PersistencePipeline ◀──snapshots
//! ```
//!
//! A connected *session* consists of one poll task per configured point, the
//! persistence task, and (when configured) the retention task. Sessions start
//! on a successful [`connect`](CellMonitor::connect) and end on
//! [`disconnect`](CellMonitor::disconnect) or when a read failure is escalated
//! to a lost link.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::StateAggregator;
use crate::client::{ConnectOutcome, RegisterClient};
use crate::config::MonitorConfig;
use crate::connection::{ConnectionManager, ConnectionState, ConnectionStatus};
use crate::constants::RETENTION_SWEEP_INTERVAL_SECS;
use crate::error::MonitorResult;
use crate::events::{ErrorEvent, ErrorSource, EventBus};
use crate::persistence::PersistencePipeline;
use crate::scheduler::PollScheduler;
use crate::snapshot::Snapshot;
use crate::store::Stores;
use crate::transport::{RegisterTransport, TcpTransport};
use crate::value::RegisterValue;

struct Session {
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Acquisition and persistence for one controller.
pub struct CellMonitor<T: RegisterTransport> {
    config: MonitorConfig,
    events: EventBus,
    connection: ConnectionManager<T>,
    scheduler: PollScheduler<T>,
    aggregator: Arc<StateAggregator>,
    persistence: Arc<PersistencePipeline>,
    stores: Stores,
    root: CancellationToken,
    lifecycle: Mutex<()>,
    session: parking_lot::Mutex<Option<Session>>,
}

impl CellMonitor<TcpTransport> {
    /// Monitor reaching the controller over Modbus TCP as configured in `[plc]`.
    pub fn tcp(config: MonitorConfig, stores: Stores) -> MonitorResult<Arc<Self>> {
        let transport = TcpTransport::new(
            config.plc.endpoint(),
            config.plc.unit_id,
            config.plc.connect_timeout(),
            config.plc.receive_timeout(),
        );
        Self::new(config, transport, stores)
    }
}

impl<T: RegisterTransport> CellMonitor<T> {
    /// Build the monitor and start its error supervisor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: MonitorConfig, transport: T, stores: Stores) -> MonitorResult<Arc<Self>> {
        config.validate()?;

        let events = EventBus::new(config.events.capacity);
        let client = Arc::new(RegisterClient::new(transport, events.clone()));
        let root = CancellationToken::new();
        let aggregator = Arc::new(StateAggregator::new());
        let persistence = Arc::new(PersistencePipeline::new(
            Arc::clone(&aggregator),
            Arc::clone(&stores.history),
            events.clone(),
            config.history.recent_limit,
        ));

        Ok(Arc::new_cyclic(|weak: &Weak<Self>| {
            tokio::spawn(supervise(
                weak.clone(),
                events.subscribe_errors(),
                root.clone(),
            ));
            Self {
                connection: ConnectionManager::new(Arc::clone(&client)),
                scheduler: PollScheduler::with_cancellation(client, root.clone()),
                config,
                events,
                aggregator,
                persistence,
                stores,
                root,
                lifecycle: Mutex::new(()),
                session: parking_lot::Mutex::new(None),
            }
        }))
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn client(&self) -> &Arc<RegisterClient<T>> {
        self.connection.client()
    }

    pub fn scheduler(&self) -> &PollScheduler<T> {
        &self.scheduler
    }

    pub fn aggregator(&self) -> &Arc<StateAggregator> {
        &self.aggregator
    }

    pub fn persistence(&self) -> &Arc<PersistencePipeline> {
        &self.persistence
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.subscribe_state()
    }

    /// Current live state.
    pub fn snapshot(&self) -> Snapshot {
        self.aggregator.take_snapshot()
    }

    /// Connect and start a session. A session already running is left alone.
    pub async fn connect(&self) -> ConnectOutcome {
        let _guard = self.lifecycle.lock().await;

        let outcome = self.connection.connect().await;
        if !outcome.success || self.session.lock().is_some() {
            return outcome;
        }

        let started_at = Utc::now();
        let cancel = self.root.child_token();
        self.start_polling().await;

        let mut tasks = vec![self.persistence.spawn(
            self.config.history.save_interval(),
            self.connection.subscribe_state(),
            cancel.clone(),
        )];
        if let Some(retention) = self.config.history.retention() {
            tasks.push(self.persistence.spawn_retention(
                retention,
                Duration::from_secs(RETENTION_SWEEP_INTERVAL_SECS),
                cancel.clone(),
            ));
        }

        *self.session.lock() = Some(Session {
            started_at,
            cancel,
            tasks,
        });
        info!(points = self.config.polling.points.len(), "monitoring session started");
        outcome
    }

    /// Stop the session and close the link.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;
        self.stop_session().await;
        self.connection.disconnect().await;
    }

    /// Stop the session and close the link, publishing `reason`.
    pub async fn halt(&self, reason: impl Into<String>) {
        let _guard = self.lifecycle.lock().await;
        self.stop_session().await;
        self.connection.disconnect_with_reason(reason).await;
    }

    /// Disconnect and stop every background task, including the supervisor.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.root.cancel();
    }

    /// Read every configured point once and return the resulting state.
    ///
    /// Requires a connected link; unreadable points keep their previous value.
    pub async fn poll_once(&self) -> Snapshot {
        let client = self.connection.client();
        for point in &self.config.polling.points {
            if let Some(value) = client.read_value(&point.address).await {
                self.aggregator.apply_field(point.field, value);
            }
        }
        self.aggregator.take_snapshot()
    }

    /// Re-dial every `period` while disconnected, until shutdown.
    pub fn spawn_reconnect(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let cancel = self.root.child_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(monitor) = weak.upgrade() else { break };
                if monitor.connection_state() == ConnectionState::Disconnected {
                    debug!("attempting reconnect");
                    let outcome = monitor.connect().await;
                    if outcome.success {
                        info!("reconnected to controller");
                    }
                }
            }
        })
    }

    async fn start_polling(&self) {
        for point in &self.config.polling.points {
            let aggregator = Arc::clone(&self.aggregator);
            let field = point.field;
            let is_coil = point.address.is_coil();
            self.scheduler
                .start(
                    point.address.clone(),
                    self.config.polling.interval_for(point),
                    move |value| {
                        if let Some(word) = value {
                            let value = if is_coil {
                                RegisterValue::Bool(word > 0)
                            } else {
                                RegisterValue::I16(word)
                            };
                            aggregator.apply_field(field, value);
                        }
                    },
                )
                .await;
        }
    }

    async fn stop_session(&self) {
        let session = self.session.lock().take();
        let Some(session) = session else {
            return;
        };

        self.scheduler.stop_all().await;
        session.cancel.cancel();
        for task in session.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "session task ended abnormally");
            }
        }
        info!("monitoring session stopped");
    }

    /// React to a failed read. A transport that lost its link always ends the
    /// session; a failure on a live link does so only when escalation is on.
    async fn handle_error(&self, event: ErrorEvent) {
        if !matches!(event.source, ErrorSource::Read(_)) {
            return;
        }

        let _guard = self.lifecycle.lock().await;
        let link_lost = !self.connection.client().is_connected();
        if !link_lost && !self.config.polling.escalate_read_failures {
            return;
        }

        // Failures queued before the current session belong to an old link.
        let current = self
            .session
            .lock()
            .as_ref()
            .is_some_and(|s| link_lost || event.timestamp >= s.started_at);
        if !current {
            return;
        }

        if link_lost {
            warn!(message = %event.message, cause = %event.cause, "controller link dropped");
        } else {
            warn!(
                message = %event.message,
                cause = %event.cause,
                "read failure, treating link as lost"
            );
        }
        self.stop_session().await;
        self.connection
            .disconnect_with_reason(format!("Connection lost: {}", event.message))
            .await;
    }
}

impl<T: RegisterTransport> Drop for CellMonitor<T> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

async fn supervise<T: RegisterTransport>(
    monitor: Weak<CellMonitor<T>>,
    mut errors: broadcast::Receiver<ErrorEvent>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = errors.recv() => received,
        };

        match received {
            Ok(event) => {
                if !event.is_connection_fatal() {
                    continue;
                }
                let Some(monitor) = monitor.upgrade() else { break };
                monitor.handle_error(event).await;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "error supervisor lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("error supervisor stopped");
}
