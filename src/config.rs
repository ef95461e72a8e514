//! Monitor configuration
//!
//! Loaded from TOML. Every section and field has a default, so an empty file
//! is a valid configuration that polls the cell's full register map on
//! `127.0.0.1:502` and keeps history in memory.
//!
//! ```toml
//! [plc]
//! host = "192.168.1.10"
//! port = 502
//!
//! [polling]
//! default_interval_ms = 300
//!
//! [[polling.points]]
//! address = "M100"
//! field = "door1_lock"
//!
//! [[polling.points]]
//! address = "D200"
//! field = "furnace_temperature"
//! interval_ms = 1000
//!
//! [history]
//! connection = "file:///var/lib/furnace-monitor"
//! retention_hours = 720
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_EVENT_CAPACITY, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_RECEIVE_TIMEOUT_MS, DEFAULT_RECENT_LIMIT, DEFAULT_SAVE_INTERVAL_MS, DEFAULT_TCP_PORT,
    DEFAULT_UNIT_ID,
};
use crate::error::{MonitorError, MonitorResult};
use crate::snapshot::{Axis, AxisMember, Field};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub plc: PlcConfig,
    pub polling: PollingConfig,
    pub history: HistoryConfig,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
}

/// Controller endpoint and link timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlcConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub connect_timeout_ms: u64,
    pub receive_timeout_ms: u64,
    /// Retry period after the link is lost; `None` disables reconnecting.
    pub reconnect_interval_ms: Option<u64>,
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_TCP_PORT,
            unit_id: DEFAULT_UNIT_ID,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            receive_timeout_ms: DEFAULT_RECEIVE_TIMEOUT_MS,
            reconnect_interval_ms: None,
        }
    }
}

impl PlcConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Option<Duration> {
        self.reconnect_interval_ms.map(Duration::from_millis)
    }
}

/// One polled address and the snapshot field it feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointConfig {
    pub address: Address,
    pub field: Field,
    /// Overrides `polling.default_interval_ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
}

impl PointConfig {
    pub fn new(address: Address, field: Field) -> Self {
        Self {
            address,
            field,
            interval_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub default_interval_ms: u64,
    /// Treat any failed read as a lost link: stop polling and disconnect.
    pub escalate_read_failures: bool,
    pub points: Vec<PointConfig>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            escalate_read_failures: true,
            points: default_points(),
        }
    }
}

impl PollingConfig {
    pub fn interval_for(&self, point: &PointConfig) -> Duration {
        Duration::from_millis(point.interval_ms.unwrap_or(self.default_interval_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// `memory://` or `file://<dir>`.
    pub connection: String,
    pub save_interval_ms: u64,
    /// Records older than this are pruned hourly; `None` keeps everything.
    pub retention_hours: Option<u64>,
    pub recent_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            connection: "memory://".to_string(),
            save_interval_ms: DEFAULT_SAVE_INTERVAL_MS,
            retention_hours: None,
            recent_limit: DEFAULT_RECENT_LIMIT,
        }
    }
}

impl HistoryConfig {
    pub fn save_interval(&self) -> Duration {
        Duration::from_millis(self.save_interval_ms)
    }

    pub fn retention(&self) -> Option<chrono::Duration> {
        self.retention_hours
            .map(|hours| chrono::Duration::hours(hours as i64))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Per-channel buffer; slower subscribers lose the oldest events.
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `furnace_monitor=debug`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl MonitorConfig {
    /// Read and validate a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> MonitorResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MonitorError::configuration(format!(
                "Failed to read configuration from {:?}: {}",
                path, e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> MonitorResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| MonitorError::configuration(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> MonitorResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| MonitorError::configuration(format!("Cannot render configuration: {}", e)))
    }

    pub fn validate(&self) -> MonitorResult<()> {
        if self.plc.host.trim().is_empty() {
            return Err(MonitorError::configuration("plc.host must not be empty"));
        }
        if self.plc.connect_timeout_ms == 0 || self.plc.receive_timeout_ms == 0 {
            return Err(MonitorError::configuration("plc timeouts must be greater than zero"));
        }
        if self.plc.reconnect_interval_ms == Some(0) {
            return Err(MonitorError::configuration(
                "plc.reconnect_interval_ms must be greater than zero",
            ));
        }
        if self.history.save_interval_ms == 0 {
            return Err(MonitorError::configuration(
                "history.save_interval_ms must be greater than zero",
            ));
        }
        if self.history.retention_hours == Some(0) {
            return Err(MonitorError::configuration(
                "history.retention_hours must be greater than zero",
            ));
        }
        if self.events.capacity == 0 {
            return Err(MonitorError::configuration(
                "events.capacity must be greater than zero",
            ));
        }

        let mut seen = HashSet::new();
        for point in &self.polling.points {
            if !seen.insert(point.address.location()) {
                return Err(MonitorError::configuration(format!(
                    "address {} is polled more than once",
                    point.address
                )));
            }
        }
        Ok(())
    }
}

/// The cell's register map: every snapshot field bound to one address.
pub fn default_points() -> Vec<PointConfig> {
    let mut points = Vec::new();
    let mut coil = 100u16;
    let mut add_coil = |points: &mut Vec<PointConfig>, field: Field| {
        points.push(PointConfig::new(Address::coil(coil), field));
        coil += 1;
    };

    for field in [
        Field::Door1Lock,
        Field::Door2Lock,
        Field::FurnaceVerticalCylinder,
        Field::FurnaceHorizontalCylinder,
        Field::SmallCarHasMaterial,
        Field::Buffer1HasMaterial,
        Field::Buffer2HasMaterial,
        Field::ClampHasMaterial,
    ] {
        add_coil(&mut points, field);
    }
    for axis in Axis::ALL {
        for member in [
            AxisMember::ForwardLimit,
            AxisMember::BackwardLimit,
            AxisMember::OriginLimit,
        ] {
            add_coil(&mut points, Field::Axis(axis, member));
        }
    }
    add_coil(&mut points, Field::FurnaceStatus);

    for (block, axis) in Axis::ALL.iter().enumerate() {
        let base = 100 + 10 * block as u16;
        for (offset, member) in [
            AxisMember::UpperBound,
            AxisMember::LowerBound,
            AxisMember::OriginPosition,
            AxisMember::CurrentPosition,
            AxisMember::CurrentSpeed,
        ]
        .into_iter()
        .enumerate()
        {
            points.push(PointConfig::new(
                Address::register(base + offset as u16),
                Field::Axis(*axis, member),
            ));
        }
    }
    points.push(PointConfig::new(Address::register(200), Field::FurnaceTemperature));
    points.push(PointConfig::new(Address::register(201), Field::FurnacePressure));
    points
}
