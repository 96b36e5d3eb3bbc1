//! regulink-monitor - watch and command a regulator from the terminal
//!
//! Connects to a regulator (or the built-in simulator), logs every event
//! and optionally sends one-shot setpoints.

use anyhow::{bail, Context, Result};
use clap::Parser;
use regulink_core::prelude::*;
use regulink_core::protocol::list_ports;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Monitor a diesel-engine regulator over a serial line.
///
/// Environment variables:
///   REGULINK_PORT  - Default serial port
///   RUST_LOG       - Log filter (overrides -v)
#[derive(Parser, Debug)]
#[command(name = "regulink-monitor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Serial port to use (overrides the config file)
    #[arg(short, long, env = "REGULINK_PORT")]
    port: Option<String>,

    /// Path to a JSON connection config
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// Write the effective config back to the config path
    #[arg(long)]
    save_config: bool,

    /// Talk to the built-in simulated regulator instead of a serial port
    #[arg(long)]
    simulate: bool,

    /// Stop after this many seconds (runs until Ctrl-C when omitted)
    #[arg(short, long, value_name = "SECS")]
    duration: Option<u64>,

    /// Send a target engine speed (rpm) after connecting
    #[arg(long, value_name = "RPM")]
    set_speed: Option<u16>,

    /// Send a fuel rack position (mm) after connecting
    #[arg(long, value_name = "MM")]
    set_rack: Option<f64>,

    /// Reset latched protections after connecting
    #[arg(long)]
    reset: bool,

    /// Verbose output level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("regulink")
        .join("config.json")
}

fn load_config(cli: &Cli) -> Result<(ConnectionConfig, PathBuf)> {
    let path = cli.config_path.clone().unwrap_or_else(default_config_path);
    let mut config = if path.exists() {
        ConnectionConfig::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?
    } else {
        if cli.config_path.is_some() {
            bail!("config file {} does not exist", path.display());
        }
        ConnectionConfig::default()
    };

    if let Some(port) = &cli.port {
        config.port.port_name = port.clone();
    }
    if cli.simulate && config.port.port_name.is_empty() {
        config.port.port_name = "simulator".to_string();
    }
    Ok((config, path))
}

fn print_ports() -> Result<()> {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  [{:04x}:{:04x}] {}",
                port.name,
                vid,
                pid,
                port.product.or(port.manufacturer).unwrap_or_default()
            ),
            _ => println!("{}", port.name),
        }
    }
    Ok(())
}

fn log_event(event: &RegulatorEvent) {
    match event {
        RegulatorEvent::ConnectionStatusChanged(true) => info!("connected"),
        RegulatorEvent::ConnectionStatusChanged(false) => warn!("disconnected"),
        RegulatorEvent::DataReceived(p) => {
            info!(
                "rpm={} turbo={} oil={:.2}bar boost={:.2}bar oil_t={:.1}C rack={:.2}mm",
                p.engine_speed(),
                p.turbo_speed(),
                p.oil_pressure(),
                p.boost_pressure(),
                p.oil_temperature(),
                p.rack_position()
            );
            if p.critical().any() {
                warn!("critical values: {:?}", p.critical());
            }
        }
        RegulatorEvent::ProtectionStatusUpdated(status) => {
            if status.any_tripped() {
                warn!("protection tripped: {:?}", status);
            } else {
                info!("protections clear (armed: {})", status.all_enabled);
            }
        }
        RegulatorEvent::ErrorOccurred(message) => error!("{}", message),
        RegulatorEvent::CommandReceived(command) => info!("simulator received {:?}", command),
        RegulatorEvent::CommandAcknowledged {
            command,
            accepted,
            code,
        } => {
            if *accepted {
                info!("{:?} accepted", command);
            } else {
                warn!("{:?} rejected (code {:#04x})", command, code);
            }
        }
    }
}

async fn send_one_shots(conn: &Connection, cli: &Cli) {
    let mut commands = Vec::new();
    if cli.reset {
        commands.push(Command::ResetProtection);
    }
    if let Some(rpm) = cli.set_speed {
        commands.push(Command::SetEngineSpeed(rpm));
    }
    if let Some(mm) = cli.set_rack {
        commands.push(Command::SetRackPosition(mm));
    }
    for command in commands {
        if !conn.send(command).await {
            warn!("{:?} did not complete", command);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.list_ports {
        return print_ports();
    }

    let (config, config_path) = load_config(&cli)?;
    if cli.save_config {
        config
            .save(&config_path)
            .with_context(|| format!("failed to save config to {}", config_path.display()))?;
        info!("config saved to {}", config_path.display());
    }

    let events = EventBus::default();
    let conn = if cli.simulate {
        let simulator = SimulatedRegulator::new().with_events(events.clone());
        Connection::with_events(config, simulator, events)
    } else {
        if config.port.port_name.is_empty() {
            bail!("no serial port given (use --port, REGULINK_PORT or --simulate)");
        }
        Connection::with_events(config, regulink_core::protocol::SerialTransport::new(), events)
    };

    let mut rx = conn.subscribe();
    conn.connect()
        .await
        .with_context(|| format!("failed to connect to {}", conn.settings().port_name))?;

    send_one_shots(&conn, &cli).await;

    let deadline = async {
        match cli.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            event = rx.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(n)) => warn!("{} events dropped", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    conn.disconnect().await;
    Ok(())
}
