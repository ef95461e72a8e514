//! Request/response transport to the controller
//!
//! [`RegisterTransport`] is the primitive the rest of the crate is written
//! against: open, close, and read one point. [`TcpTransport`] implements it
//! over a `tokio-modbus` TCP client context. Exchanges on one transport are
//! serialized by an internal lock, so the transport can be shared between any
//! number of poll tasks.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

use crate::address::{RegisterArea, RegisterLocation};
use crate::error::{MonitorError, MonitorResult};

/// Counters describing the traffic seen by a transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
}

/// Transport able to read single points from the controller.
///
/// All methods take `&self`: implementations serialize exchanges internally so
/// that concurrent callers never interleave a request with another caller's
/// response.
///
/// A failed read may take the link down with it; [`is_connected`] reports
/// that afterwards.
///
/// [`is_connected`]: RegisterTransport::is_connected
pub trait RegisterTransport: Send + Sync + 'static {
    /// Open the connection. Returns immediately if it is already open.
    fn connect(&self) -> impl Future<Output = MonitorResult<()>> + Send;

    /// Close the connection. Closing a closed transport is not an error.
    fn close(&self) -> impl Future<Output = MonitorResult<()>> + Send;

    fn is_connected(&self) -> bool;

    /// Read one point and return its raw 16-bit word (coils read as 0 or 1).
    fn read(&self, location: RegisterLocation)
        -> impl Future<Output = MonitorResult<u16>> + Send;

    fn get_stats(&self) -> TransportStats;
}

#[derive(Debug, Default)]
struct StatsCounters {
    requests_sent: AtomicU64,
    responses_received: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> TransportStats {
        TransportStats {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Modbus TCP transport.
#[derive(Debug)]
pub struct TcpTransport {
    endpoint: String,
    unit_id: u8,
    connect_timeout: Duration,
    receive_timeout: Duration,
    context: Mutex<Option<Context>>,
    connected: AtomicBool,
    stats: StatsCounters,
}

impl TcpTransport {
    /// Create a transport for `endpoint` (`host:port`). No I/O happens until
    /// [`connect`](RegisterTransport::connect).
    pub fn new(
        endpoint: impl Into<String>,
        unit_id: u8,
        connect_timeout: Duration,
        receive_timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            unit_id,
            connect_timeout,
            receive_timeout,
            context: Mutex::new(None),
            connected: AtomicBool::new(false),
            stats: StatsCounters::default(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn exchange(context: &mut Context, location: RegisterLocation) -> MonitorResult<u16> {
        let function = location.area.read_function();
        let response = match location.area {
            RegisterArea::Coil => context
                .read_coils(location.offset, 1)
                .await
                .map(|reply| reply.map(|bits| bits.first().map(|bit| u16::from(*bit)))),
            RegisterArea::DataRegister => context
                .read_holding_registers(location.offset, 1)
                .await
                .map(|reply| reply.map(|words| words.first().copied())),
        };

        match response {
            Ok(Ok(Some(word))) => Ok(word),
            Ok(Ok(None)) => Err(MonitorError::protocol(format!(
                "empty response to function {:#04X}",
                function
            ))),
            Ok(Err(exception)) => Err(MonitorError::Exception {
                function,
                exception: format!("{:?}", exception),
            }),
            Err(tokio_modbus::Error::Transport(e)) => Err(MonitorError::Io(e)),
            Err(other) => Err(MonitorError::protocol(other.to_string())),
        }
    }

    fn record_failure(&self, error: &MonitorError) {
        match error {
            MonitorError::Timeout { .. } => self.stats.timeouts.fetch_add(1, Ordering::Relaxed),
            _ => self.stats.errors.fetch_add(1, Ordering::Relaxed),
        };
    }
}

impl RegisterTransport for TcpTransport {
    async fn connect(&self) -> MonitorResult<()> {
        let mut guard = self.context.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let timeout_ms = self.connect_timeout.as_millis() as u64;
        let dial = TcpStream::connect(&self.endpoint);
        let stream = tokio::time::timeout(self.connect_timeout, dial)
            .await
            .map_err(|_| {
                MonitorError::timeout(format!("connect to {}", self.endpoint), timeout_ms)
            })?
            .map_err(|e| {
                MonitorError::connection(format!("connect to {} failed: {}", self.endpoint, e))
            })?;
        stream.set_nodelay(true)?;

        info!(endpoint = %self.endpoint, unit_id = self.unit_id, "controller connected");
        *guard = Some(tcp::attach_slave(stream, Slave(self.unit_id)));
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> MonitorResult<()> {
        let mut guard = self.context.lock().await;
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut context) = guard.take() {
            if let Err(e) = context.disconnect().await {
                debug!(endpoint = %self.endpoint, error = %e, "disconnect after close failed");
            }
            info!(endpoint = %self.endpoint, "controller connection closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn read(&self, location: RegisterLocation) -> MonitorResult<u16> {
        // Held for the whole request/response pair.
        let mut guard = self.context.lock().await;
        let context = guard.as_mut().ok_or(MonitorError::NotConnected)?;

        self.stats.requests_sent.fetch_add(1, Ordering::Relaxed);
        let timeout_ms = self.receive_timeout.as_millis() as u64;
        let outcome =
            match tokio::time::timeout(self.receive_timeout, Self::exchange(context, location))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(MonitorError::timeout(
                    format!("read {:?} {}", location.area, location.offset),
                    timeout_ms,
                )),
            };

        match outcome {
            Ok(raw) => {
                self.stats.responses_received.fetch_add(1, Ordering::Relaxed);
                Ok(raw)
            }
            Err(e) => {
                self.record_failure(&e);
                // A controller exception leaves the stream aligned; anything
                // else may leave a partial frame behind, so the link is dropped.
                if !matches!(e, MonitorError::Exception { .. }) {
                    warn!(
                        endpoint = %self.endpoint,
                        error = %e,
                        "dropping controller link after failed exchange"
                    );
                    *guard = None;
                    self.connected.store(false, Ordering::SeqCst);
                }
                Err(e)
            }
        }
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.snapshot()
    }
}
