//! HRU Modbus simulator
//!
//! Serves a simulated heat-recovery unit over Modbus TCP.
//!
//! Usage: hru_simulator [--unit CODE] [--host HOST] [--port PORT] [--definitions DIR]
//! Example: hru_simulator --unit atrea-rd5-cf --port 5020
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hru_modbus_sim::config::{DEFAULT_HOST, DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT};
use hru_modbus_sim::{load_unit, Simulator, SimulatorConfig};

#[derive(Parser, Debug)]
#[command(name = "hru_simulator")]
#[command(about = "Modbus TCP slave emulating an HVAC heat-recovery unit")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "atrea-rd5-cf", help = "Unit code to simulate")]
    unit: String,

    #[arg(long, default_value = DEFAULT_HOST, help = "Address to listen on")]
    host: String,

    #[arg(long, default_value_t = DEFAULT_PORT, help = "TCP port to listen on")]
    port: u16,

    #[arg(
        long,
        env = "HRU_DEFINITIONS_PATH",
        default_value = "definitions",
        help = "Directory containing units/*.json"
    )]
    definitions: PathBuf,

    #[arg(long, default_value_t = 500, help = "Physics tick period in milliseconds")]
    tick_ms: u64,

    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS, help = "Maximum concurrent masters")]
    max_connections: usize,

    #[arg(long, default_value_t = 300, help = "Seconds of silence before a session is closed")]
    idle_timeout_secs: u64,
}

impl Cli {
    fn config(&self) -> SimulatorConfig {
        SimulatorConfig::new()
            .with_host(self.host.clone())
            .with_port(self.port)
            .with_tick_interval(Duration::from_millis(self.tick_ms))
            .with_max_connections(self.max_connections)
            .with_idle_timeout(Duration::from_secs(self.idle_timeout_secs))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    info!("{}", hru_modbus_sim::info());

    let unit = match load_unit(&cli.definitions, &cli.unit) {
        Ok(unit) => unit,
        Err(e) => {
            error!("Cannot load unit '{}': {}", cli.unit, e);
            return Err(e.into());
        }
    };
    info!("Simulating '{}' ({})", unit.name, unit.code);

    let simulator = Simulator::new(unit, cli.config())?;
    simulator
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Ctrl+C received, stopping");
        })
        .await?;

    Ok(())
}
