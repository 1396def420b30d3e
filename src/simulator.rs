//! # Simulator
//!
//! Ties one unit definition, its shared state, the physics task and the TCP
//! server together.
//!
//! ```rust,no_run
//! use std::path::Path;
//! use hru_modbus_sim::{load_unit, Simulator, SimulatorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let unit = load_unit(Path::new("definitions"), "atrea-rd5-cf")?;
//!     let simulator = Simulator::new(unit, SimulatorConfig::new().with_port(5020))?;
//!     simulator.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::io::ErrorKind;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{SimulatorConfig, DEFAULT_PORT, FALLBACK_PORT};
use crate::error::{ModbusError, ModbusResult};
use crate::evaluator::Evaluator;
use crate::front_panel::{FrontPanel, FRONT_PANEL_ADDRESS};
use crate::physics::{self, PhysicsEngine};
use crate::server::ModbusTcpServer;
use crate::state::{lock_state, DeviceState, SharedState};
use crate::unit::UnitDefinition;

/// A simulated heat-recovery unit
pub struct Simulator {
    unit: Arc<UnitDefinition>,
    config: SimulatorConfig,
    state: SharedState,
    engine: Arc<PhysicsEngine>,
}

impl Simulator {
    /// Create a simulator in its power-on state
    pub fn new(unit: UnitDefinition, config: SimulatorConfig) -> ModbusResult<Self> {
        config.validate()?;
        let unit = Arc::new(unit);
        let engine = Arc::new(PhysicsEngine::new(Arc::clone(&unit), config.profile.clone()));
        let reconciler = engine.reconciler();
        info!(
            "Unit '{}' ({}): {} mapped registers, {} trigger groups, direct={}",
            unit.name,
            unit.code,
            reconciler.address_map().len(),
            reconciler.triggers().len(),
            reconciler.has_direct()
        );
        let mut state = DeviceState::new();
        engine.prepare(&mut state);
        Ok(Self {
            unit,
            config,
            state: state.into_shared(),
            engine,
        })
    }

    /// Unit being simulated
    pub fn unit(&self) -> &UnitDefinition {
        &self.unit
    }

    /// Active configuration
    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Handle to the shared state
    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    /// Tick logic
    pub fn engine(&self) -> &PhysicsEngine {
        &self.engine
    }

    /// Run write group `name` as a master would, with `values` bound to the
    /// variables the script references.
    ///
    /// Register writes are dirty-marked and picked up by the next tick.
    pub fn execute_write_group(&self, name: &str, values: &[(&str, f64)]) -> ModbusResult<()> {
        let group = self.unit.write_group(name).ok_or_else(|| {
            ModbusError::unit_definition(format!("unit '{}' has no write group '{}'", self.unit.code, name))
        })?;

        let mut guard = lock_state(&self.state);
        let state = &mut *guard;
        let mut command = state.variables.clone();
        for (variable, value) in values {
            command.set(variable, *value);
        }
        Evaluator::new(&mut state.registers, &mut command)
            .as_client()
            .execute(&group.statements);

        if state.registers.is_dirty(FRONT_PANEL_ADDRESS) {
            FrontPanel::unpack(state.registers.get_register(FRONT_PANEL_ADDRESS)).apply(&mut state.variables);
        }
        info!("Executed write group '{}'", name);
        Ok(())
    }

    /// Bind the listener configured for this simulator
    pub async fn bind(&self) -> ModbusResult<ModbusTcpServer> {
        let address = self.config.bind_address();
        let bound = ModbusTcpServer::bind(
            &address,
            Arc::clone(&self.state),
            self.config.max_connections,
            self.config.idle_timeout,
        )
        .await;

        if let Err(ModbusError::Io(e)) = &bound {
            if self.config.port == DEFAULT_PORT
                && matches!(e.kind(), ErrorKind::PermissionDenied | ErrorKind::AddrInUse)
            {
                warn!(
                    "Cannot bind {}: {}. Port {} usually needs elevated privileges, try --port {}",
                    address, e, DEFAULT_PORT, FALLBACK_PORT
                );
            }
        }
        bound
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(self, server: ModbusTcpServer, shutdown: F) -> ModbusResult<()>
    where
        F: Future<Output = ()>,
    {
        let physics = tokio::spawn(physics::run(
            Arc::clone(&self.engine),
            Arc::clone(&self.state),
            self.config.tick_interval,
        ));
        let result = server.run(shutdown).await;
        physics.abort();
        result
    }

    /// Bind, then serve until `shutdown` resolves
    pub async fn run_until<F>(self, shutdown: F) -> ModbusResult<()>
    where
        F: Future<Output = ()>,
    {
        let server = self.bind().await?;
        self.serve(server, shutdown).await
    }
}
