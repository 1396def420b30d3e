//! Shared device state
//!
//! The register bank and the variable table live together behind one mutex.
//! Protocol sessions hold the lock for a single request and the physics loop
//! holds it for a whole tick; neither holds it across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::front_panel::{FrontPanel, FRONT_PANEL_ADDRESS};
use crate::reconcile::mirror_destination;
use crate::register_bank::RegisterBank;
use crate::variables::VariableTable;

/// Outdoor temperature register, tenths of a degree
pub const OUTDOOR_TEMPERATURE_REGISTER: u16 = 10300;

/// Supply air temperature register, tenths of a degree
pub const SUPPLY_TEMPERATURE_REGISTER: u16 = 10301;

/// Registers, coils and variables of one simulated unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    /// Register file served to clients
    pub registers: RegisterBank,
    /// Internal state
    pub variables: VariableTable,
}

/// State shared between sessions and the physics task
pub type SharedState = Arc<Mutex<DeviceState>>;

impl DeviceState {
    /// State of a freshly powered unit: 22.5 °C, mode 2, fans off
    pub fn new() -> Self {
        let mut state = Self::default();
        state.variables.set("$power", 0.0);
        state.variables.set("$temperature", 22.5);
        state.variables.set("$mode", 2.0);
        state.variables.set("$rawTemp", 225.0);
        state.registers.set_register(OUTDOOR_TEMPERATURE_REGISTER, 120);
        state.registers.set_register(SUPPLY_TEMPERATURE_REGISTER, 220);
        state
    }

    /// Wrap into a [`SharedState`]
    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    /// Apply a client register write: store, mark dirty, mirror, unpack
    pub fn write_register(&mut self, address: u16, value: u16) {
        client_write(&mut self.registers, &mut self.variables, address, value);
    }

    /// Apply a client block write starting at `start`; addresses wrap
    pub fn write_registers(&mut self, start: u16, values: &[u16]) {
        for (offset, &value) in values.iter().enumerate() {
            self.write_register(start.wrapping_add(offset as u16), value);
        }
    }
}

/// Lock the shared state, recovering from poisoning.
pub fn lock_state(state: &SharedState) -> MutexGuard<'_, DeviceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Register write as performed by a Modbus master.
///
/// Callers hold the state lock across the whole call.
pub fn client_write(bank: &mut RegisterBank, vars: &mut VariableTable, address: u16, value: u16) {
    bank.set_register(address, value);
    bank.mark_dirty(address);

    if let Some(destination) = mirror_destination(address) {
        debug!("Mirror {} -> {}: {}", address, destination, value);
        bank.set_register(destination, value);
    }

    if address == FRONT_PANEL_ADDRESS {
        FrontPanel::unpack(value).apply(vars);
    }
}
