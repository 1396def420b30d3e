//! # Physics Loop
//!
//! Every tick, under the state lock:
//!
//! 1. reconcile pending client writes
//! 2. move the outdoor temperature along a slow sinusoid
//! 3. ramp continuous variables toward their targets
//! 4. snap discrete variables to their targets
//! 5. derive the supply temperature from `$temperature` with a little jitter
//! 6. write every variable back through the read script so clients see it
//!
//! Write-back inverts only the shapes a read script can be undone through:
//! a plain register read, and `multiply`/`divide` by a numeric literal.
//! Setpoint registers that mirror a mapped readback register hold the
//! readback value between client writes, so a trigger armed before its
//! setpoint is written applies the current value.

use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::codec::{round_to_register, truncate_to_register};
use crate::evaluator::Evaluator;
use crate::front_panel::FRONT_PANEL_ADDRESS;
use crate::reconcile::{Reconciler, MIRROR_TABLE};
use crate::register_bank::RegisterBank;
use crate::state::{lock_state, DeviceState, SharedState, OUTDOOR_TEMPERATURE_REGISTER, SUPPLY_TEMPERATURE_REGISTER};
use crate::unit::{Expr, Function, Statement, UnitDefinition};
use crate::variables::{target_name, VariableTable};

/// Default tick period
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Period of the outdoor temperature swing
const OUTDOOR_PERIOD_SECS: f64 = 60.0;

/// Ticks between status snapshots in the log
const STATUS_EVERY_TICKS: u64 = 20;

/// Temperature assumed for the supply register when the unit has none
const FALLBACK_TEMPERATURE: f64 = 22.0;

/// How each variable evolves toward its target
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicsProfile {
    /// Variable → maximum change per tick
    pub ramps: Vec<(String, f64)>,
    /// Variables that jump straight to their target
    pub discrete: Vec<String>,
}

impl Default for PhysicsProfile {
    fn default() -> Self {
        Self {
            ramps: vec![("$power".to_string(), 0.5), ("$temperature".to_string(), 0.1)],
            discrete: vec!["$mode".to_string()],
        }
    }
}

impl PhysicsProfile {
    /// Default profile
    pub fn new() -> Self {
        Self::default()
    }

    /// Ramp `variable` by at most `step` per tick, replacing any earlier rule
    pub fn with_ramp(mut self, variable: impl Into<String>, step: f64) -> Self {
        let variable = variable.into();
        self.ramps.retain(|(name, _)| *name != variable);
        self.discrete.retain(|name| *name != variable);
        self.ramps.push((variable, step.abs()));
        self
    }

    /// Snap `variable` to its target every tick
    pub fn with_discrete(mut self, variable: impl Into<String>) -> Self {
        let variable = variable.into();
        self.ramps.retain(|(name, _)| *name != variable);
        if !self.discrete.contains(&variable) {
            self.discrete.push(variable);
        }
        self
    }
}

/// Move `current` toward `target` by at most `step`, never past it
#[inline]
pub fn approach(current: f64, target: f64, step: f64) -> f64 {
    let delta = target - current;
    if delta.abs() <= step {
        target
    } else {
        current + step.copysign(delta)
    }
}

/// Outdoor register value `elapsed` into the run
pub fn outdoor_register(elapsed: Duration) -> u16 {
    let phase = TAU * elapsed.as_secs_f64() / OUTDOOR_PERIOD_SECS;
    truncate_to_register(120.0 + 20.0 * phase.sin())
}

/// Supply register value for a room temperature at wall-clock second `t`
pub fn supply_register(temperature: f64, t: f64) -> u16 {
    truncate_to_register(temperature * 10.0 + 2.0 * (t / 10.0).sin())
}

/// Wall-clock seconds since the Unix epoch.
///
/// The supply jitter phase follows the wall clock, not the time since start.
fn wall_clock_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Tick logic for one unit
#[derive(Debug, Clone)]
pub struct PhysicsEngine {
    unit: Arc<UnitDefinition>,
    reconciler: Reconciler,
    profile: PhysicsProfile,
}

impl PhysicsEngine {
    /// Engine for `unit`
    pub fn new(unit: Arc<UnitDefinition>, profile: PhysicsProfile) -> Self {
        let reconciler = Reconciler::new(&unit);
        Self {
            unit,
            reconciler,
            profile,
        }
    }

    /// Reconciliation plan in use
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Create every read-script variable, align its target with it and
    /// write the initial values back into the registers
    pub fn prepare(&self, state: &mut DeviceState) {
        for name in self.unit.read_variables() {
            state.variables.track(name);
        }
        self.write_back(state);
        debug!(
            "Tracking {} variables, {} mapped registers",
            self.unit.read_variables().len(),
            self.reconciler.address_map().len()
        );
    }

    /// One tick at the current wall-clock time
    pub fn tick(&self, state: &mut DeviceState, elapsed: Duration) {
        self.tick_at(state, elapsed, wall_clock_secs());
    }

    /// One tick with an explicit wall-clock second for the supply jitter
    pub fn tick_at(&self, state: &mut DeviceState, elapsed: Duration, wall_secs: f64) {
        self.reconciler.run(state);

        state
            .registers
            .set_register(OUTDOOR_TEMPERATURE_REGISTER, outdoor_register(elapsed));

        self.evolve(&mut state.variables);

        let temperature = if state.variables.contains("$temperature") {
            state.variables.get("$temperature")
        } else {
            FALLBACK_TEMPERATURE
        };
        state
            .registers
            .set_register(SUPPLY_TEMPERATURE_REGISTER, supply_register(temperature, wall_secs));

        self.write_back(state);
    }

    /// Ramp and snap variables per the profile
    pub fn evolve(&self, vars: &mut VariableTable) {
        for (name, step) in &self.profile.ramps {
            if !vars.contains(name) || !vars.contains(&target_name(name)) {
                continue;
            }
            let next = approach(vars.get(name), vars.target(name), *step);
            vars.set(name, next);
        }
        for name in &self.profile.discrete {
            if vars.contains(name) && vars.contains(&target_name(name)) {
                let target = vars.target(name);
                vars.set(name, target);
            }
        }
    }

    /// Write every known variable back into the registers it is read from
    pub fn write_back(&self, state: &mut DeviceState) {
        for statement in self.unit.read_script() {
            let Statement::Assignment { variable, value } = statement else {
                continue;
            };
            if !variable.starts_with('$') || !state.variables.contains(variable) {
                continue;
            }
            write_back_expr(value, state.variables.get(variable), &mut state.registers);
        }

        let map = self.reconciler.address_map();
        for (source, destination) in MIRROR_TABLE {
            if map.get(destination).is_none() || state.registers.is_dirty(source) {
                continue;
            }
            let raw = state.registers.get_register(destination);
            state.registers.set_register(source, raw);
        }
    }

    /// Variables as a client would decode them from the current registers
    pub fn snapshot(&self, state: &DeviceState) -> VariableTable {
        let mut registers = state.registers.clone();
        let mut variables = VariableTable::new();
        Evaluator::new(&mut registers, &mut variables).execute(self.unit.read_script());
        variables
    }
}

fn write_back_expr(expr: &Expr, value: f64, bank: &mut RegisterBank) {
    let Expr::Call { function, args } = expr else {
        return;
    };
    let factor = || args.get(1).and_then(Expr::literal_number).filter(|k| *k != 0.0);

    match function {
        Function::ModbusReadHolding | Function::ModbusReadInput => {
            let Some(address) = args.first().and_then(Expr::literal_address) else {
                return;
            };
            if address == FRONT_PANEL_ADDRESS || bank.is_dirty(address) {
                return;
            }
            bank.set_register(address, round_to_register(value));
        }
        Function::Multiply => {
            if let (Some(inner), Some(k)) = (args.first(), factor()) {
                write_back_expr(inner, value / k, bank);
            }
        }
        Function::Divide => {
            if let (Some(inner), Some(k)) = (args.first(), factor()) {
                write_back_expr(inner, value * k, bank);
            }
        }
        _ => {}
    }
}

/// Run the physics loop on `state` forever, one tick per `period`.
///
/// `state` is expected to have gone through [`PhysicsEngine::prepare`].
pub async fn run(engine: Arc<PhysicsEngine>, state: SharedState, period: Duration) {
    let started = Instant::now();

    let mut ticker = interval_at(started + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Physics loop running every {} ms", period.as_millis());

    let mut ticks: u64 = 0;
    loop {
        ticker.tick().await;
        ticks += 1;

        let snapshot = {
            let mut guard = lock_state(&state);
            engine.tick(&mut guard, started.elapsed());
            (ticks % STATUS_EVERY_TICKS == 0).then(|| (*guard).clone())
        };

        if let Some(state) = snapshot {
            let decoded = engine.snapshot(&state);
            let summary: Vec<String> = decoded
                .iter()
                .map(|(name, value)| format!("{name}={value:.1}"))
                .collect();
            info!(
                "Status: {} | outdoor={} supply={}",
                summary.join(" "),
                state.registers.get_register(OUTDOOR_TEMPERATURE_REGISTER),
                state.registers.get_register(SUPPLY_TEMPERATURE_REGISTER)
            );
        }
    }
}
