//! Protocol constants and runtime defaults
//!
//! Addressing limits and function codes follow the Modbus application protocol;
//! the remaining values are the defaults the cell has been commissioned with and
//! can be overridden in [`MonitorConfig`](crate::config::MonitorConfig).

// ============================================================================
// Addressing
// ============================================================================

/// Highest register/coil offset reachable with a 16-bit address
pub const MAX_REGISTER_OFFSET: u32 = u16::MAX as u32;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Coils (FC01)
pub const FC_READ_COILS: u8 = 0x01;

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

// ============================================================================
// Connection Defaults
// ============================================================================

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Default unit identifier addressed on the controller
pub const DEFAULT_UNIT_ID: u8 = 1;

/// Connect timeout (milliseconds)
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;

/// Receive timeout for a single request/response exchange (milliseconds)
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 1000;

// ============================================================================
// Pipeline Defaults
// ============================================================================

/// Poll interval applied to every point without its own interval (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 300;

/// Persistence cadence (milliseconds)
pub const DEFAULT_SAVE_INTERVAL_MS: u64 = 1000;

/// Number of history records kept in the pipeline's recent view
pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// Capacity of each notification channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// How often the retention task prunes history (seconds)
pub const RETENTION_SWEEP_INTERVAL_SECS: u64 = 3600;
