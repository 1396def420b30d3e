//! # Reconciliation Engine
//!
//! Infers what a Modbus master meant from the raw registers it wrote since the
//! last tick and folds that intent into the variable table.
//!
//! The engine relies on two facts extracted once from the unit definition:
//!
//! - the [`AddressMap`]: which variable each register of the read script
//!   feeds, and at what scale
//! - the mode of each write group ([`ReconciliationMode`])
//!
//! ## Trigger mode
//!
//! Some units only accept a setpoint after a control register is written to
//! zero. For a group writing `[trigger, ..., setpoint]`, a dirty trigger
//! holding 0 arms the setpoint: its scaled value becomes the variable's
//! target, and the trigger register is reset to 1.
//!
//! ## Direct mode
//!
//! Every dirty mapped register is applied at once to both current and target.
//!
//! Both modes are followed by the mirror pass and the dirty set is always
//! cleared at the end of a pass.
//!
//! ## Mirror pass
//!
//! A dirty setpoint register listed in [`MIRROR_TABLE`] is copied into its
//! readback register and applied to the readback's variable, current and
//! target. Masters that arm the trigger first and write the setpoint after a
//! delay therefore land on the mirror pass, not the trigger pass.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::front_panel::FRONT_PANEL_ADDRESS;
use crate::register_bank::RegisterBank;
use crate::state::DeviceState;
use crate::unit::{Expr, Function, ReconciliationMode, Statement, UnitDefinition};
use crate::variables::VariableTable;

/// Setpoint registers whose value is copied into their readback register
pub const MIRROR_TABLE: [(u16, u16); 3] = [(10708, 10704), (10710, 10706), (10709, 10705)];

/// Readback register mirrored from `source`, if any
#[inline]
pub fn mirror_destination(source: u16) -> Option<u16> {
    MIRROR_TABLE
        .iter()
        .find(|(src, _)| *src == source)
        .map(|(_, dest)| *dest)
}

/// Variable fed by a register, with `variable = raw × scale`
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    /// Variable name
    pub variable: String,
    /// Scale factor
    pub scale: f64,
}

impl Binding {
    /// Variable value for a raw register value
    pub fn to_variable(&self, raw: u16) -> f64 {
        let raw = f64::from(raw);
        let reciprocal = 1.0 / self.scale;
        // decimal scales such as 0.1 divide by 10 to stay exact
        if self.scale.abs() < 1.0 && (reciprocal - reciprocal.round()).abs() < 1e-9 {
            raw / reciprocal.round()
        } else {
            raw * self.scale
        }
    }
}

/// Register address → [`Binding`], built from the read script
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressMap {
    entries: BTreeMap<u16, Binding>,
}

impl AddressMap {
    /// Trace every assignment of `read` down to the registers it reads
    pub fn from_read_script(read: &[Statement]) -> Self {
        let mut map = Self::default();
        for statement in read {
            if let Statement::Assignment { variable, value } = statement {
                map.collect(value, variable, 1.0);
            }
        }
        map
    }

    fn collect(&mut self, expr: &Expr, variable: &str, scale: f64) {
        let Expr::Call { function, args } = expr else {
            return;
        };

        match function {
            Function::ModbusReadHolding | Function::ModbusReadInput => {
                let Some(address) = args.first().and_then(Expr::literal_address) else {
                    return;
                };
                if address == FRONT_PANEL_ADDRESS {
                    return;
                }
                self.entries.insert(
                    address,
                    Binding {
                        variable: variable.to_string(),
                        scale,
                    },
                );
            }
            Function::Multiply | Function::Divide => {
                let factor = args.get(1).and_then(Expr::literal_number);
                match (function, factor) {
                    (Function::Multiply, Some(k)) => self.collect(&args[0], variable, scale * k),
                    (Function::Divide, Some(k)) if k != 0.0 => {
                        self.collect(&args[0], variable, scale / k)
                    }
                    _ => {
                        for arg in args {
                            self.collect(arg, variable, scale);
                        }
                    }
                }
            }
            Function::BitAnd
            | Function::BitOr
            | Function::BitLshift
            | Function::BitRshift
            | Function::NonZero => {
                for arg in args {
                    self.collect(arg, variable, scale);
                }
            }
            _ => {}
        }
    }

    /// Binding of `address`
    pub fn get(&self, address: u16) -> Option<&Binding> {
        self.entries.get(&address)
    }

    /// Binding of `address`, or else of its mirror destination
    pub fn resolve(&self, address: u16) -> Option<&Binding> {
        self.get(address)
            .or_else(|| mirror_destination(address).and_then(|dest| self.get(dest)))
    }

    /// Mapped addresses, ascending
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Binding)> {
        self.entries.iter().map(|(address, binding)| (*address, binding))
    }

    /// Number of mapped registers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is mapped
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Control/setpoint registers of one trigger-mode write group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerPair {
    /// Write group name
    pub group: String,
    /// First register written; 0 arms the setpoint
    pub trigger: u16,
    /// Last register written
    pub setpoint: u16,
}

/// Per-unit reconciliation plan
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciler {
    address_map: AddressMap,
    triggers: Vec<TriggerPair>,
    direct: bool,
}

impl Reconciler {
    /// Build the plan for `unit`
    pub fn new(unit: &UnitDefinition) -> Self {
        let address_map = AddressMap::from_read_script(unit.read_script());
        let mut triggers = Vec::new();
        let mut direct = unit.write_groups().is_empty();

        for group in unit.write_groups() {
            let mode = match unit.reconciliation {
                Some(mode) => mode,
                None => {
                    let inferred = if group.has_delay_marker() {
                        ReconciliationMode::Trigger
                    } else {
                        ReconciliationMode::Direct
                    };
                    debug!(
                        "Write group '{}' has no declared reconciliation, inferred {} from delay markers",
                        group.name, inferred
                    );
                    inferred
                }
            };

            match mode {
                ReconciliationMode::Direct => direct = true,
                ReconciliationMode::Trigger => {
                    let addresses: Vec<u16> = group
                        .write_addresses()
                        .into_iter()
                        .filter(|&address| address != FRONT_PANEL_ADDRESS)
                        .collect();
                    if let (Some(&trigger), Some(&setpoint)) = (addresses.first(), addresses.last()) {
                        if trigger != setpoint {
                            triggers.push(TriggerPair {
                                group: group.name.clone(),
                                trigger,
                                setpoint,
                            });
                        }
                    }
                }
            }
        }

        Self {
            address_map,
            triggers,
            direct,
        }
    }

    /// Register-to-variable map
    pub fn address_map(&self) -> &AddressMap {
        &self.address_map
    }

    /// Trigger pairs, in write-group order
    pub fn triggers(&self) -> &[TriggerPair] {
        &self.triggers
    }

    /// Whether the direct pass runs
    pub fn has_direct(&self) -> bool {
        self.direct
    }

    /// Fold pending client writes into `state`. Returns whether anything
    /// was pending.
    pub fn run(&self, state: &mut DeviceState) -> bool {
        if !state.registers.has_dirty() {
            return false;
        }
        let DeviceState {
            registers,
            variables,
        } = state;

        self.trigger_pass(registers, variables);
        if self.direct {
            self.direct_pass(registers, variables);
        }
        self.mirror_pass(registers, variables);

        let drained = registers.drain_dirty();
        debug!("Reconciled {} dirty registers", drained.len());
        true
    }

    fn trigger_pass(&self, bank: &mut RegisterBank, vars: &mut VariableTable) {
        for pair in &self.triggers {
            if !bank.is_dirty(pair.trigger) || bank.get_register(pair.trigger) != 0 {
                continue;
            }
            let raw = bank.get_register(pair.setpoint);
            if let Some(binding) = self.address_map.resolve(pair.setpoint) {
                let target = binding.to_variable(raw);
                vars.set_target(&binding.variable, target);
                info!("{} setpoint -> {} (group '{}')", binding.variable, target, pair.group);
            }
            bank.set_register(pair.trigger, 1);
        }
    }

    fn direct_pass(&self, bank: &RegisterBank, vars: &mut VariableTable) {
        for address in bank.dirty_addresses() {
            if let Some(binding) = self.address_map.get(address) {
                let value = binding.to_variable(bank.get_register(address));
                vars.set_both(&binding.variable, value);
                info!("{} changed via master: {}", binding.variable, value);
            }
        }
    }

    fn mirror_pass(&self, bank: &mut RegisterBank, vars: &mut VariableTable) {
        for (source, destination) in MIRROR_TABLE {
            if !bank.is_dirty(source) {
                continue;
            }
            let raw = bank.get_register(source);
            bank.set_register(destination, raw);
            if let Some(binding) = self.address_map.get(destination) {
                let value = binding.to_variable(raw);
                vars.set_both(&binding.variable, value);
                info!("{} setpoint -> {} (mirror {})", binding.variable, value, source);
            }
            debug!("Mirror write {} -> {} value {}", source, destination, raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::CommandGroup;
    use crate::value::Value;

    fn read(address: i64) -> Expr {
        Expr::call(Function::ModbusReadHolding, vec![Expr::int(address)])
    }

    fn assign(variable: &str, value: Expr) -> Statement {
        Statement::Assignment {
            variable: variable.to_string(),
            value,
        }
    }

    fn write(address: i64, value: Expr) -> Statement {
        Statement::Action {
            expression: Expr::call(Function::ModbusWriteHolding, vec![Expr::int(address), value]),
        }
    }

    fn delay() -> Statement {
        Statement::Action {
            expression: Expr::call(Function::Delay, vec![Expr::int(500)]),
        }
    }

    fn read_script() -> Vec<Statement> {
        vec![
            assign("$power", read(10704)),
            assign("$mode", read(10705)),
            assign(
                "$temperature",
                Expr::call(
                    Function::Multiply,
                    vec![read(10706), Expr::Literal(Value::Float(0.1))],
                ),
            ),
            assign(
                "$boost",
                Expr::call(
                    Function::NonZero,
                    vec![Expr::call(
                        Function::BitAnd,
                        vec![read(0x9C40), Expr::int(0x10)],
                    )],
                ),
            ),
        ]
    }

    fn trigger_unit() -> UnitDefinition {
        let temperature = CommandGroup {
            name: "temperature".to_string(),
            statements: vec![
                write(10702, Expr::int(0)),
                delay(),
                write(
                    10710,
                    Expr::call(
                        Function::Multiply,
                        vec![Expr::Variable("$temperature".into()), Expr::int(10)],
                    ),
                ),
            ],
        };
        UnitDefinition::new("Atrea", "atrea", read_script(), vec![temperature])
    }

    fn direct_unit() -> UnitDefinition {
        let group = CommandGroup {
            name: "default".to_string(),
            statements: vec![write(10706, Expr::int(0))],
        };
        UnitDefinition::new("Plain", "plain", read_script(), vec![group])
    }

    #[test]
    fn test_address_map_scales() {
        let map = AddressMap::from_read_script(&read_script());
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(10704).unwrap().scale, 1.0);
        assert_eq!(map.get(10706).unwrap().variable, "$temperature");
        assert_eq!(map.get(10706).unwrap().to_variable(225), 22.5);
        assert!(map.get(0x9C40).is_none());
        assert_eq!(map.resolve(10710).unwrap().variable, "$temperature");

        let divided = vec![assign(
            "$temperature",
            Expr::call(Function::Divide, vec![read(10706), Expr::int(10)]),
        )];
        let map = AddressMap::from_read_script(&divided);
        assert_eq!(map.get(10706).unwrap().to_variable(300), 30.0);
    }

    #[test]
    fn test_mode_resolution() {
        let reconciler = Reconciler::new(&trigger_unit());
        assert!(!reconciler.has_direct());
        assert_eq!(
            reconciler.triggers(),
            &[TriggerPair {
                group: "temperature".to_string(),
                trigger: 10702,
                setpoint: 10710
            }]
        );

        let declared = Reconciler::new(&trigger_unit().with_reconciliation(ReconciliationMode::Direct));
        assert!(declared.has_direct());
        assert!(declared.triggers().is_empty());

        let declared = Reconciler::new(&direct_unit().with_reconciliation(ReconciliationMode::Trigger));
        assert!(!declared.has_direct());
        assert!(declared.triggers().is_empty());

        let bare = UnitDefinition::new("Bare", "bare", read_script(), Vec::new());
        assert!(Reconciler::new(&bare).has_direct());
    }

    #[test]
    fn test_direct_write_sets_current_and_target() {
        let reconciler = Reconciler::new(&direct_unit());
        let mut state = DeviceState::new();
        state.write_register(10706, 225);

        assert!(reconciler.run(&mut state));
        assert_eq!(state.variables.get("$temperature"), 22.5);
        assert_eq!(state.variables.target("$temperature"), 22.5);
        assert!(!state.registers.has_dirty());
        assert!(!reconciler.run(&mut state));
    }

    #[test]
    fn test_trigger_fires_only_on_zero() {
        let reconciler = Reconciler::new(&trigger_unit());
        let mut state = DeviceState::new();
        state.variables.set_both("$temperature", 22.5);
        state.registers.set_register(10710, 300);

        state.write_register(10702, 5);
        reconciler.run(&mut state);
        assert_eq!(state.variables.target("$temperature"), 22.5);
        assert_eq!(state.registers.get_register(10702), 5);

        state.write_register(10702, 0);
        reconciler.run(&mut state);
        assert_eq!(state.variables.target("$temperature"), 30.0);
        assert_eq!(state.registers.get_register(10702), 1);
        assert_eq!(state.variables.get("$temperature"), 22.5);
        assert!(!state.registers.has_dirty());
    }

    #[test]
    fn test_mirror_pass_updates_readback_and_current() {
        let reconciler = Reconciler::new(&trigger_unit());
        let mut state = DeviceState::new();
        state.write_register(10710, 245);
        state.registers.set_register(10706, 0);

        reconciler.run(&mut state);
        assert_eq!(state.registers.get_register(10706), 245);
        assert_eq!(state.variables.get("$temperature"), 24.5);
        assert_eq!(state.variables.target("$temperature"), 24.5);
    }

    #[test]
    fn test_setpoint_written_after_armed_trigger() {
        let reconciler = Reconciler::new(&trigger_unit());
        let mut state = DeviceState::new();
        state.variables.set_both("$temperature", 22.5);
        state.registers.set_register(10710, 225);

        state.write_register(10702, 0);
        reconciler.run(&mut state);
        assert_eq!(state.variables.target("$temperature"), 22.5);
        assert_eq!(state.registers.get_register(10702), 1);

        state.write_register(10710, 300);
        reconciler.run(&mut state);
        assert_eq!(state.variables.get("$temperature"), 30.0);
        assert_eq!(state.variables.target("$temperature"), 30.0);
        assert_eq!(state.registers.get_register(10706), 300);
    }

    #[test]
    fn test_unmapped_dirty_registers_are_drained() {
        let reconciler = Reconciler::new(&direct_unit());
        let mut state = DeviceState::new();
        state.write_register(1, 42);
        let before = state.variables.clone();

        reconciler.run(&mut state);
        assert_eq!(state.variables, before);
        assert!(!state.registers.has_dirty());
    }
}
