//! # Furnace Monitor - Acquisition and Persistence for a Furnace Cell
//!
//! Polls the programmable controller of a furnace / robot-arm cell over
//! Modbus TCP, keeps a live snapshot of the cell state, and persists that
//! snapshot to a time-indexed history store.
//!
//! ## Features
//!
//! - **Per-point polling**: one independent timer per address, start/stop at will
//! - **Shared link**: every poll task reads through one serialized transport
//! - **Consistent state**: poll results merge into a single locked snapshot
//! - **Best-effort history**: periodic saves, range queries, statistics, retention
//! - **Notifications**: data, connection, and error channels for consumers
//!
//! ## Address Scheme
//!
//! | Prefix | Area | Function | Value |
//! |--------|------|----------|-------|
//! | `M` | Coil | 0x01 Read Coils | `bool` |
//! | `D` | Data register | 0x03 Read Holding Registers | `i16` |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use furnace_monitor::{open_store, CellMonitor, MonitorConfig, MonitorResult};
//!
//! #[tokio::main]
//! async fn main() -> MonitorResult<()> {
//!     let config = MonitorConfig::from_file("monitor.toml")?;
//!     let stores = open_store(&config.history.connection).await?;
//!     let monitor = CellMonitor::tcp(config, stores)?;
//!
//!     let outcome = monitor.connect().await;
//!     println!("{}", outcome.message);
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     let snapshot = monitor.snapshot();
//!     println!("furnace temperature: {}", snapshot.furnace.temperature);
//!
//!     monitor.shutdown().await;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Protocol limits and operational defaults
pub mod constants;

/// Controller address parsing
pub mod address;

/// Point value type
pub mod value;

/// Request/response transport to the controller
pub mod transport;

/// In-process controller for tests and dry runs
pub mod simulator;

// ============================================================================
// Acquisition pipeline
// ============================================================================

/// Notification channels
pub mod events;

/// Typed point reads with failure containment
pub mod client;

/// Connection state machine
pub mod connection;

/// Per-address cyclic polling
pub mod scheduler;

/// Cell state model
pub mod snapshot;

/// Live state owner
pub mod aggregator;

// ============================================================================
// Persistence
// ============================================================================

/// Work parameter records
pub mod parameters;

/// History and parameter storage backends
pub mod store;

/// Periodic snapshot persistence
pub mod persistence;

// ============================================================================
// Application
// ============================================================================

/// TOML configuration
pub mod config;

/// Subscriber setup
pub mod logging;

/// Pipeline orchestration
pub mod monitor;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime ===
pub use tokio;

// === Error handling ===
pub use error::{MonitorError, MonitorResult};

// === Core types ===
pub use address::{Address, RegisterArea, RegisterLocation};
pub use value::RegisterValue;

// === Transport ===
pub use simulator::SimulatedTransport;
pub use transport::{RegisterTransport, TcpTransport, TransportStats};

// === Pipeline ===
pub use aggregator::StateAggregator;
pub use client::{ConnectOutcome, RegisterClient};
pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus};
pub use events::{ConnectionEvent, DataChanged, ErrorEvent, ErrorSource, EventBus};
pub use scheduler::PollScheduler;
pub use snapshot::{AxisState, Field, FieldValue, FurnaceState, Snapshot};

// === Persistence ===
pub use parameters::{ParameterSet, WorkParameter};
pub use persistence::PersistencePipeline;
pub use store::{open_store, HistoryRecord, HistoryStatistics, HistoryStore, ParameterStore, Stores};

// === Application ===
pub use config::MonitorConfig;
pub use logging::init_logging;
pub use monitor::CellMonitor;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Furnace Monitor v{} - furnace cell acquisition and persistence", VERSION)
}
