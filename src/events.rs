//! Notification channels
//!
//! The core publishes three kinds of notifications, each on its own bounded
//! [`broadcast`] channel:
//!
//! | Channel | Payload | Emitted by |
//! |---------|---------|------------|
//! | data | [`DataChanged`] | every successful point read |
//! | connection | [`ConnectionEvent`] | every connection state transition |
//! | errors | [`ErrorEvent`] | every transport failure |
//!
//! Publishing never blocks and never fails. A receiver that falls more than
//! `capacity` events behind loses the oldest ones and observes
//! [`broadcast::error::RecvError::Lagged`] on its next receive. Events sent
//! while nobody is subscribed are dropped.
//!
//! The latest human-readable status line (connection progress, save failures)
//! is kept in a [`watch`] channel so late subscribers always see it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::address::Address;
use crate::error::MonitorError;
use crate::value::RegisterValue;

/// A point was read successfully.
#[derive(Debug, Clone, Serialize)]
pub struct DataChanged {
    pub address: Address,
    pub value: RegisterValue,
    pub timestamp: DateTime<Utc>,
}

/// The controller link changed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionEvent {
    pub is_connected: bool,
    pub message: String,
}

/// Operation that produced an [`ErrorEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorSource {
    Connect,
    Disconnect,
    Read(Address),
}

impl ErrorSource {
    /// Connect and read failures are treated as loss of the controller link.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::Connect | Self::Read(_))
    }
}

/// A transport operation failed.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub message: String,
    pub source: ErrorSource,
    pub cause: Arc<MonitorError>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEvent {
    pub fn new(message: impl Into<String>, source: ErrorSource, cause: MonitorError) -> Self {
        Self {
            message: message.into(),
            source,
            cause: Arc::new(cause),
            timestamp: Utc::now(),
        }
    }

    #[inline]
    pub fn is_connection_fatal(&self) -> bool {
        self.source.is_connection_fatal()
    }
}

/// Senders for every notification kind. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    data: broadcast::Sender<DataChanged>,
    connection: broadcast::Sender<ConnectionEvent>,
    errors: broadcast::Sender<ErrorEvent>,
    status: Arc<watch::Sender<String>>,
}

impl EventBus {
    /// Create a bus whose channels each buffer `capacity` events.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        let (data, _) = broadcast::channel(capacity);
        let (connection, _) = broadcast::channel(capacity);
        let (errors, _) = broadcast::channel(capacity);
        let (status, _) = watch::channel(String::from("Disconnected"));
        Self {
            data,
            connection,
            errors,
            status: Arc::new(status),
        }
    }

    pub fn subscribe_data(&self) -> broadcast::Receiver<DataChanged> {
        self.data.subscribe()
    }

    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<ErrorEvent> {
        self.errors.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<String> {
        self.status.subscribe()
    }

    /// Latest status line.
    pub fn status(&self) -> String {
        self.status.borrow().clone()
    }

    pub fn emit_data(&self, address: Address, value: RegisterValue) {
        let _ = self.data.send(DataChanged {
            address,
            value,
            timestamp: Utc::now(),
        });
    }

    /// Publish a connection transition; the message also becomes the status line.
    pub fn emit_connection(&self, is_connected: bool, message: impl Into<String>) {
        let message = message.into();
        self.set_status(message.clone());
        let _ = self.connection.send(ConnectionEvent {
            is_connected,
            message,
        });
    }

    /// Publish a failure; the status line becomes `"Error: <message>"`.
    pub fn emit_error(&self, event: ErrorEvent) {
        self.set_status(format!("Error: {}", event.message));
        let _ = self.errors.send(event);
    }

    pub fn set_status(&self, message: impl Into<String>) {
        self.status.send_replace(message.into());
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    #[tokio::test]
    async fn test_data_event_delivery() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe_data();

        bus.emit_data(Address::parse("D100").unwrap(), RegisterValue::I16(42));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.address.as_str(), "D100");
        assert_eq!(event.value, RegisterValue::I16(42));
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new(2);
        bus.emit_connection(true, "Connected");
        bus.emit_error(ErrorEvent::new(
            "Connect failed",
            ErrorSource::Connect,
            MonitorError::connection("refused"),
        ));
        assert_eq!(bus.status(), "Error: Connect failed");
    }

    #[tokio::test]
    async fn test_slow_receiver_lags() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe_connection();

        for i in 0..5 {
            bus.emit_connection(i % 2 == 0, format!("event {}", i));
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        assert_eq!(rx.recv().await.unwrap().message, "event 3");
        assert_eq!(rx.recv().await.unwrap().message, "event 4");
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_status_tracks_latest_message() {
        let bus = EventBus::default();
        let rx = bus.subscribe_status();
        assert_eq!(*rx.borrow(), "Disconnected");

        bus.emit_connection(false, "Connecting...");
        bus.set_status("Save failed: disk full");
        assert_eq!(*rx.borrow(), "Save failed: disk full");
    }

    #[test]
    fn test_fatal_sources() {
        let addr = Address::parse("M100").unwrap();
        assert!(ErrorSource::Connect.is_connection_fatal());
        assert!(ErrorSource::Read(addr).is_connection_fatal());
        assert!(!ErrorSource::Disconnect.is_connection_fatal());
    }
}
