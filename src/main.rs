//! crowdmap - crowd positioning from three BLE anchors
//!
//! # Usage
//!
//! ```bash
//! # Simulated anchors, payloads as JSON lines on stdout
//! crowdmap run --devices 20
//!
//! # Solve one position for the configured anchor layout
//! crowdmap triangulate --distances 40.2,55.0,47.9
//!
//! # Validate a configuration file, or write the defaults
//! crowdmap check-config crowdmap.json
//! crowdmap init-config crowdmap.json
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crowdmap::api::{run_publish_loop, JsonLinesSink, PublishSchedule, TrackingContext};
use crowdmap::hardware::{AnchorTransport, MockTransport};
use crowdmap::utils::config::SystemConfig;
use crowdmap::utils::simulate::{self, CrowdSimulator, SimulationConfig};
use crowdmap::{logging, TriangulationEngine};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Crowd positioning from three fixed BLE anchors
#[derive(Parser, Debug)]
#[command(name = "crowdmap")]
#[command(version)]
struct Cli {
    /// JSON configuration file (built-in defaults when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the tracker against simulated anchors, printing payloads to stdout
    Run {
        /// Number of simulated devices
        #[arg(long, default_value = "12")]
        devices: usize,

        /// Simulated report period in milliseconds
        #[arg(long, default_value = "1000", value_parser = clap::value_parser!(u64).range(1..))]
        report_ms: u64,

        /// Report body bytes per fragment
        #[arg(long, default_value = "180")]
        chunk_size: usize,

        /// Seed for a reproducible crowd
        #[arg(long)]
        seed: Option<u64>,

        /// Stop after this many publish cycles
        #[arg(long)]
        cycles: Option<u64>,
    },

    /// Solve one position from three distances
    Triangulate {
        /// Distances to the three anchors, comma separated
        #[arg(long, value_delimiter = ',', required = true, allow_hyphen_values = true)]
        distances: Vec<f64>,
    },

    /// Validate a configuration file
    CheckConfig {
        path: PathBuf,
    },

    /// Write the default configuration to a file
    InitConfig {
        path: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Result<SystemConfig> {
    match path {
        Some(path) => SystemConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(SystemConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    logging::init_logging(level).context("initializing logging")?;

    match cli.command {
        Command::Run {
            devices,
            report_ms,
            chunk_size,
            seed,
            cycles,
        } => {
            let simulation = SimulationConfig {
                device_count: devices,
                chunk_size,
                seed,
                ..SimulationConfig::default()
            };
            run(config, simulation, Duration::from_millis(report_ms), cycles).await
        }
        Command::Triangulate { distances } => triangulate(&config, &distances),
        Command::CheckConfig { path } => check_config(&path),
        Command::InitConfig { path } => {
            SystemConfig::default()
                .save_to_file(&path)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

async fn run(
    config: SystemConfig,
    simulation: SimulationConfig,
    report_period: Duration,
    cycles: Option<u64>,
) -> Result<()> {
    for warning in config.validate()?.warnings {
        warn!("{}", warning);
    }

    let shutdown = CancellationToken::new();
    let anchors = config.anchor_array()?;
    let mocks = anchors.each_ref().map(|a| Arc::new(MockTransport::new(a.transport_name.clone())));
    let transports = mocks.each_ref().map(|m| Arc::clone(m) as Arc<dyn AnchorTransport>);

    let context = TrackingContext::start(&config, transports, &shutdown)?;
    let connected = context.connect_all().await;
    if connected == 0 {
        warn!("No anchor connected; publishing empty payloads");
    }

    let simulator = CrowdSimulator::new(anchors.map(|a| a.position), simulation);
    let feeder = tokio::spawn(simulate::run_feeder(simulator, mocks, report_period, shutdown.child_token()));

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            signal_token.cancel();
        }
    });

    let schedule = PublishSchedule {
        interval: config.publish_interval(),
        startup_delay: config.startup_delay(),
        max_cycles: cycles,
    };
    let mut sink = JsonLinesSink::new(io::stdout());
    run_publish_loop(&context, &mut sink, schedule, shutdown.clone()).await;

    shutdown.cancel();
    context.shutdown().await;
    if let Err(e) = feeder.await {
        warn!(error = %e, "Simulator task ended abnormally");
    }
    Ok(())
}

fn triangulate(config: &SystemConfig, distances: &[f64]) -> Result<()> {
    let [d1, d2, d3] = distances else {
        bail!("expected exactly three distances, got {}", distances.len());
    };

    let engine = TriangulationEngine::new(config.anchor_positions()?);
    let position = engine
        .solve([*d1, *d2, *d3])
        .context("no position for these distances")?;

    println!("{}", serde_json::to_string(&position)?);
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = SystemConfig::from_file(path).with_context(|| format!("checking {}", path.display()))?;
    let report = config.validate()?;

    println!("{}: ok ({} anchors, publish every {} ms)", path.display(), config.anchors.len(), config.publish_interval_ms);
    for warning in &report.warnings {
        println!("warning: {}", warning);
    }
    Ok(())
}
