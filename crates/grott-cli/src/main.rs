//! Command-line host for the Grott inverter bridge.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use grott_devices::{
    DriverResult, GrottDevice, GrottDriver, PairingForm, PairingSession, RumqttConnector,
};

mod config;
mod sink;

use config::{BrokerArgs, CliConfig, LOG_JSON_ENV};
use sink::ConsoleSink;

/// Grott bridge - map Growatt inverter telemetry from MQTT onto device capabilities.
#[derive(Parser, Debug)]
#[command(name = "grott")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and keep capabilities updated until interrupted.
    Run {
        #[command(flatten)]
        broker: BrokerArgs,
    },
    /// Test the broker settings the way pairing does.
    Probe {
        #[command(flatten)]
        broker: BrokerArgs,
    },
    /// Wait for a packet, then republish it with the daily energy counter zeroed.
    ResetToday {
        #[command(flatten)]
        broker: BrokerArgs,
        /// Seconds to wait for the first packet.
        #[arg(long, default_value_t = 120)]
        wait_secs: u64,
    },
    /// Print the field mapping table.
    Mappings,
}

const DEFAULT_CONFIG: &str = "grott.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let explicit = args.config.is_some();

    match args.command {
        Command::Run { broker } => run(CliConfig::load(&config_path, explicit, &broker)?).await,
        Command::Probe { broker } => probe(CliConfig::load(&config_path, explicit, &broker)?).await,
        Command::ResetToday { broker, wait_secs } => {
            reset_today(CliConfig::load(&config_path, explicit, &broker)?, wait_secs).await
        }
        Command::Mappings => print_mappings(),
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var(LOG_JSON_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let fallback = if verbose { "grott=debug" } else { "grott=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

fn new_device(config: &CliConfig) -> (GrottDevice, Arc<ConsoleSink>) {
    let sink = Arc::new(ConsoleSink::new());
    let device = GrottDevice::new(
        config.name.clone(),
        config.settings.clone(),
        sink.clone(),
        Arc::new(RumqttConnector::new()),
    );
    (device, sink)
}

async fn run(config: CliConfig) -> Result<()> {
    let (device, sink) = new_device(&config);
    device.init().await.context("failed to start device")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    device.shutdown().await;

    let values = sink.store().snapshot().await;
    println!("{}", serde_json::to_string_pretty(&values)?);
    Ok(())
}

/// Pairing session that reports progress on the terminal.
struct ConsoleSession;

#[async_trait]
impl PairingSession for ConsoleSession {
    async fn next_view(&self) -> DriverResult<()> {
        eprintln!("Connection test passed");
        Ok(())
    }
}

async fn probe(config: CliConfig) -> Result<()> {
    let settings = &config.settings;
    let form = PairingForm {
        host: Some(settings.host.clone()),
        port: Some(settings.port.into()),
        topic: Some(settings.topic.clone()),
        username: settings.username.clone(),
        password: settings.password.clone(),
        protocol: Some(settings.protocol.to_string()),
        validate_certificate: Some(settings.validate_certificate),
    };

    let driver = GrottDriver::new(Arc::new(RumqttConnector::new()));
    let result = driver.test_pairing(&form, &ConsoleSession).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        std::process::exit(1);
    }

    let devices = driver.list_devices().await;
    println!("{}", serde_json::to_string_pretty(&devices)?);
    Ok(())
}

async fn reset_today(config: CliConfig, wait_secs: u64) -> Result<()> {
    let (device, _sink) = new_device(&config);
    device.init().await.context("failed to start device")?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(wait_secs);
    while device.last_packet().await.is_none() {
        if tokio::time::Instant::now() >= deadline {
            device.shutdown().await;
            anyhow::bail!("no packet received on {} within {}s", config.settings.topic, wait_secs);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let republished = device.reset_energy_today().await;
    device.shutdown().await;

    if republished.context("failed to republish packet")? {
        println!("Energy today reset on {}", config.settings.topic);
    }
    Ok(())
}

fn print_mappings() -> Result<()> {
    println!("{:<24} {:<16} scale", "capability", "field");
    for entry in grott_devices::grott_mappings() {
        println!(
            "{:<24} {:<16} {}",
            entry.capability,
            entry.source_field,
            if entry.scale { "/10" } else { "-" }
        );
    }
    Ok(())
}
