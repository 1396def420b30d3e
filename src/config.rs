//! # Simulator Configuration
//!
//! Runtime settings of a simulator instance: where it listens, how many
//! masters it serves at once, how fast the physics loop ticks.
//!
//! ## Defaults
//!
//! - **Listen address**: `0.0.0.0:502`, the standard Modbus TCP port
//! - **Tick interval**: 500 ms
//! - **Connections**: at most 32 concurrent masters
//! - **Idle timeout**: 300 s without a request closes the session

use std::time::Duration;

use crate::error::{ModbusError, ModbusResult};
use crate::physics::{PhysicsProfile, DEFAULT_TICK_INTERVAL};

/// Default listen host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listen port (Modbus TCP).
pub const DEFAULT_PORT: u16 = 502;

/// Unprivileged port suggested when 502 cannot be bound.
pub const FALLBACK_PORT: u16 = 5020;

/// Default maximum concurrent connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 32;

/// Default idle timeout per session.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Simulator settings.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use hru_modbus_sim::SimulatorConfig;
///
/// let config = SimulatorConfig::new()
///     .with_port(5020)
///     .with_tick_interval(Duration::from_millis(100));
///
/// assert_eq!(config.bind_address(), "0.0.0.0:5020");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Listen host or IP.
    pub host: String,
    /// Listen port; 0 picks an ephemeral port.
    pub port: u16,
    /// Physics tick period.
    pub tick_interval: Duration,
    /// Maximum concurrent sessions.
    pub max_connections: usize,
    /// Session idle timeout.
    pub idle_timeout: Duration,
    /// Ramp and snap rules of the physics loop.
    pub profile: PhysicsProfile,
}

impl SimulatorConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for local test runs: loopback, ephemeral port.
    pub fn local() -> Self {
        Self::default().with_host("127.0.0.1").with_port(0)
    }

    /// Set the listen host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the listen port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the physics tick period.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the connection limit.
    pub fn with_max_connections(mut self, count: usize) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the physics profile.
    pub fn with_profile(mut self, profile: PhysicsProfile) -> Self {
        self.profile = profile;
        self
    }

    /// `host:port` string to bind.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Reject settings the simulator cannot run with.
    pub fn validate(&self) -> ModbusResult<()> {
        if self.host.trim().is_empty() {
            return Err(ModbusError::configuration("host must not be empty"));
        }
        if self.tick_interval.is_zero() {
            return Err(ModbusError::configuration("tick interval must be positive"));
        }
        if self.max_connections == 0 {
            return Err(ModbusError::configuration("max connections must be at least 1"));
        }
        if self.idle_timeout.is_zero() {
            return Err(ModbusError::configuration("idle timeout must be positive"));
        }
        Ok(())
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            profile: PhysicsProfile::default(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
