//! Futura poller
//!
//! Polls one Futura unit and logs every snapshot until Ctrl-C.
//! With `--once`, runs a single cycle and prints every key.
//!
//! Usage: futura-poll --host 192.168.1.40 [--config futura.toml] [--once]

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use futura_modbus::{Coordinator, FuturaConfig, FuturaResult};

#[derive(Parser, Debug)]
#[command(name = "futura-poll", version, about = "Poll a Futura ventilation unit over Modbus TCP")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device hostname or IP
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    unit_id: Option<u8>,

    /// Poll interval in seconds
    #[arg(long)]
    interval: Option<u64>,

    /// Run one cycle, print it and exit
    #[arg(long)]
    once: bool,
}

impl Args {
    /// Loaded configuration with explicit flags applied on top
    fn resolve(&self) -> FuturaResult<FuturaConfig> {
        let mut config = FuturaConfig::extract(self.config.as_deref())?;

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(unit_id) = self.unit_id {
            config.unit_id = unit_id;
        }
        if let Some(interval) = self.interval {
            config.poll_interval_secs = interval;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let args = Args::parse();
    let config = args.resolve()?;
    info!(
        "Futura at {}:{} (unit {}), {}",
        config.host,
        config.port,
        config.unit_id,
        futura_modbus::info()
    );

    let coordinator = Coordinator::from_config(&config)?;

    if args.once {
        let snapshot = coordinator.poll().await?;
        for (key, value) in snapshot.fields() {
            println!("{:<28} {}", key, value);
        }
        coordinator.close().await?;
        return Ok(());
    }

    let mut updates = coordinator.subscribe();
    let reporter = async {
        while updates.changed().await.is_ok() {
            let latest = updates.borrow_and_update().clone();
            if let Some(snapshot) = latest {
                info!(
                    "mode {} | outdoor {:.1} °C | supply {:.1} °C | extract {:.1} °C | {} m³/h | {} W | {} satellite(s)",
                    snapshot.mode_text,
                    snapshot.telemetry.temp_outdoor,
                    snapshot.telemetry.temp_supply,
                    snapshot.telemetry.temp_extract,
                    snapshot.telemetry.air_flow,
                    snapshot.telemetry.power,
                    snapshot.satellite_count()
                );
                if snapshot.has_errors() {
                    warn!("Unit reports errors: {:#010x}", snapshot.telemetry.errors_bits);
                }
            }
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
    };

    tokio::select! {
        _ = coordinator.run(shutdown) => {}
        _ = reporter => {}
    }

    let stats = coordinator.stats().await;
    info!(
        "{} request(s), {} fault(s), {} connect(s)",
        stats.requests_sent, stats.faults, stats.connects
    );
    Ok(())
}
