//! Register client
//!
//! [`RegisterClient`] is the boundary between the network and everything
//! above it. Transport failures stop here: connect reports a
//! [`ConnectOutcome`], reads return `None`, and the underlying
//! [`MonitorError`](crate::error::MonitorError) is published on the error
//! channel of the [`EventBus`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use furnace_monitor::{Address, EventBus, RegisterClient, TcpTransport};
//!
//! # async fn example() -> furnace_monitor::MonitorResult<()> {
//! let transport = TcpTransport::new(
//!     "127.0.0.1:502",
//!     1,
//!     Duration::from_secs(2),
//!     Duration::from_secs(1),
//! );
//! let client = RegisterClient::new(transport, EventBus::default());
//!
//! let outcome = client.connect().await;
//! println!("{}", outcome.message);
//!
//! let door = Address::parse("M100")?;
//! if let Some(locked) = client.read_bool(&door).await {
//!     println!("door 1 locked: {}", locked);
//! }
//!
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

use tracing::{debug, warn};

use crate::address::Address;
use crate::error::MonitorError;
use crate::events::{ErrorEvent, ErrorSource, EventBus};
use crate::transport::{RegisterTransport, TransportStats};
use crate::value::RegisterValue;

/// Result of a connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOutcome {
    pub success: bool,
    /// Human-readable description, suitable for display as-is.
    pub message: String,
}

impl ConnectOutcome {
    fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Reads typed point values over a shared transport.
pub struct RegisterClient<T: RegisterTransport> {
    transport: T,
    events: EventBus,
}

impl<T: RegisterTransport> RegisterClient<T> {
    pub fn new(transport: T, events: EventBus) -> Self {
        Self { transport, events }
    }

    /// Get a reference to the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn get_stats(&self) -> TransportStats {
        self.transport.get_stats()
    }

    /// Open the link. Succeeds immediately when already connected.
    pub async fn connect(&self) -> ConnectOutcome {
        if self.transport.is_connected() {
            return ConnectOutcome::success("Already connected");
        }

        match self.transport.connect().await {
            Ok(()) => ConnectOutcome::success("Connected"),
            Err(e) => {
                warn!(error = %e, "controller connect failed");
                let message = format!("Connection failed: {}", e);
                self.events.emit_error(ErrorEvent::new(
                    "Connection failed",
                    ErrorSource::Connect,
                    e,
                ));
                ConnectOutcome::failure(message)
            }
        }
    }

    /// Close the link. Safe to call when not connected.
    pub async fn disconnect(&self) {
        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "controller disconnect failed");
            self.events.emit_error(ErrorEvent::new(
                "Disconnect failed",
                ErrorSource::Disconnect,
                e,
            ));
        }
    }

    /// Read one point as a signed word.
    ///
    /// Returns `None` when the link is down or the exchange fails; failures
    /// are published on the error channel, successes on the data channel.
    pub async fn read_i16(&self, address: &Address) -> Option<i16> {
        if !self.transport.is_connected() {
            debug!(address = %address, "skipping read while disconnected");
            return None;
        }

        match self.transport.read(address.location()).await {
            Ok(raw) => {
                let word = raw as i16;
                let value = if address.is_coil() {
                    RegisterValue::Bool(word > 0)
                } else {
                    RegisterValue::I16(word)
                };
                self.events.emit_data(address.clone(), value);
                Some(word)
            }
            // The link went down while this read waited for its turn.
            Err(MonitorError::NotConnected) => {
                debug!(address = %address, "read dropped after disconnect");
                None
            }
            Err(e) => {
                warn!(address = %address, error = %e, "point read failed");
                self.events.emit_error(ErrorEvent::new(
                    format!("Failed to read address {}", address),
                    ErrorSource::Read(address.clone()),
                    e,
                ));
                None
            }
        }
    }

    /// Read one point as a flag (`word > 0`).
    pub async fn read_bool(&self, address: &Address) -> Option<bool> {
        self.read_i16(address).await.map(|word| word > 0)
    }

    /// Read one point typed by its area: coils as booleans, registers as words.
    pub async fn read_value(&self, address: &Address) -> Option<RegisterValue> {
        let word = self.read_i16(address).await?;
        Some(if address.is_coil() {
            RegisterValue::Bool(word > 0)
        } else {
            RegisterValue::I16(word)
        })
    }
}
