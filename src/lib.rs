//! # HRU Modbus Simulator - Heat-Recovery Unit Modbus TCP Slave
//!
//! **Version:** 0.3.0
//! **License:** MIT
//!
//! A Modbus TCP slave that behaves like an HVAC heat-recovery unit, for
//! integration testing of Modbus masters without hardware.
//!
//! Masters read and write registers exactly as they would on a real unit.
//! The simulator works out what a burst of register writes meant (a new
//! setpoint, a mode change, a front-panel command), lets the affected values
//! drift toward their targets the way a physical unit would, and writes the
//! results back into the registers the master polls.
//!
//! ## Features
//!
//! - **Unit definitions as data**: register layouts and command sequences are
//!   JSON scripts in a small expression language
//! - **Intent reconciliation**: trigger/setpoint handshakes and direct writes
//! - **Physics loop**: ramped temperatures and fan power, synthetic outdoor and
//!   supply sensors
//! - **Robust framing**: partial and pipelined MBAP frames, bounded sessions
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Served |
//! |------|----------|--------|
//! | 0x01 | Read Coils | ✅ |
//! | 0x03 | Read Holding Registers | ✅ |
//! | 0x04 | Read Input Registers | ✅ (same store as 0x03) |
//! | 0x05 | Write Single Coil | ✅ |
//! | 0x06 | Write Single Register | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hru_modbus_sim::{Simulator, SimulatorConfig, UnitDefinition};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let unit = UnitDefinition::from_json_str(&std::fs::read_to_string("units/atrea-rd5-cf.json")?)?;
//!     let simulator = Simulator::new(unit, SimulatorConfig::new().with_port(5020))?;
//!
//!     // Serve until Ctrl+C
//!     simulator
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Protocol modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants
pub mod constants;

/// Stack-allocated PDU and response builder
pub mod pdu;

/// Coil packing and register conversions
pub mod codec;

/// MBAP framing over a byte stream
pub mod frame;

/// Request decoding
pub mod protocol;

// ============================================================================
// Simulation modules
// ============================================================================

/// Register and coil storage with the dirty set
pub mod register_bank;

/// Named variables and their targets
pub mod variables;

/// Values produced by the expression language
pub mod value;

/// Unit definitions and the expression tree
pub mod unit;

/// Script interpreter
pub mod evaluator;

/// Packed front-panel register
pub mod front_panel;

/// Shared device state
pub mod state;

/// Client write intent reconciliation
pub mod reconcile;

/// Periodic state evolution
pub mod physics;

// ============================================================================
// Runtime modules
// ============================================================================

/// TCP responder
pub mod server;

/// Simulator configuration
pub mod config;

/// Simulator facade
pub mod simulator;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use hru_modbus_sim::tokio) ===
pub use tokio;

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Core types ===
pub use protocol::{ModbusFunction, ModbusRequest};
pub use register_bank::RegisterBank;
pub use state::{DeviceState, SharedState};
pub use value::Value;
pub use variables::VariableTable;

// === Unit definitions ===
pub use evaluator::Evaluator;
pub use unit::{load_unit, CommandGroup, Expr, Function, ReconciliationMode, Statement, UnitDefinition};

// === Simulation ===
pub use physics::{PhysicsEngine, PhysicsProfile};
pub use reconcile::Reconciler;

// === Runtime ===
pub use config::SimulatorConfig;
pub use server::{ModbusTcpServer, Session};
pub use simulator::Simulator;

// === Protocol limits ===
pub use constants::{MAX_PDU_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS};

// === PDU (advanced usage) ===
pub use pdu::{ModbusPdu, PduBuilder};

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = config::DEFAULT_PORT;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("HRU Modbus Simulator v{} - heat-recovery unit Modbus TCP slave", VERSION)
}
