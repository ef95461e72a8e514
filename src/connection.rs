//! Connection lifecycle
//!
//! ```text
//! Disconnected --connect()--> Connecting --success--> Connected
//!                             Connecting --failure--> Disconnected
//! Connected --disconnect()--> Disconnected
//! ```
//!
//! Transitions are serialized by a lock held for the whole transition, so
//! concurrent `connect`/`disconnect` callers observe them one at a time. Each
//! transition is published as a [`ConnectionEvent`](crate::events::ConnectionEvent)
//! and mirrored into a [`watch`] channel for late subscribers.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::info;

use crate::client::{ConnectOutcome, RegisterClient};
use crate::transport::RegisterTransport;

/// Connection state of the controller link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    #[inline]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
        };
        write!(f, "{}", s)
    }
}

/// State plus the message that accompanied the last transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub message: String,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            message: "Disconnected".to_string(),
        }
    }
}

/// Owns the transition logic around a shared [`RegisterClient`].
pub struct ConnectionManager<T: RegisterTransport> {
    client: Arc<RegisterClient<T>>,
    transition: Mutex<()>,
    status: watch::Sender<ConnectionStatus>,
}

impl<T: RegisterTransport> ConnectionManager<T> {
    pub fn new(client: Arc<RegisterClient<T>>) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        Self {
            client,
            transition: Mutex::new(()),
            status,
        }
    }

    pub fn client(&self) -> &Arc<RegisterClient<T>> {
        &self.client
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Connect to the controller.
    ///
    /// When the link is already up this returns success without dialing and
    /// without publishing a transition.
    pub async fn connect(&self) -> ConnectOutcome {
        let _guard = self.transition.lock().await;

        if self.state().is_connected() && self.client.is_connected() {
            return ConnectOutcome {
                success: true,
                message: "Already connected".to_string(),
            };
        }

        self.transition_to(ConnectionState::Connecting, "Connecting...");
        let outcome = self.client.connect().await;

        if outcome.success {
            info!("controller link established");
            self.transition_to(ConnectionState::Connected, "Connected");
        } else {
            self.transition_to(ConnectionState::Disconnected, outcome.message.clone());
        }
        outcome
    }

    /// Disconnect with the default message. No-op when already disconnected.
    pub async fn disconnect(&self) {
        self.disconnect_with_reason("Disconnected").await
    }

    /// Disconnect, publishing `reason` as the transition message.
    pub async fn disconnect_with_reason(&self, reason: impl Into<String>) {
        let _guard = self.transition.lock().await;

        if self.state() == ConnectionState::Disconnected && !self.client.is_connected() {
            return;
        }

        self.client.disconnect().await;
        let reason = reason.into();
        info!(reason = %reason, "controller link closed");
        self.transition_to(ConnectionState::Disconnected, reason);
    }

    fn transition_to(&self, state: ConnectionState, message: impl Into<String>) {
        let message = message.into();
        self.status.send_replace(ConnectionStatus {
            state,
            message: message.clone(),
        });
        self.client
            .events()
            .emit_connection(state.is_connected(), message);
    }
}
