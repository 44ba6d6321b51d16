use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use ash_core::config::DongleConfig;
use ash_core::events::DongleEvent;
use ash_core::session::DongleSession;
use ash_core::transport::list_ports;
use clap::{Parser, Subcommand};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "ASH/EZSP Zigbee dongle tool (Pure Rust)", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port (overrides the configuration file)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate (overrides the configuration file)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Use RTS/CTS hardware flow control
    #[arg(long)]
    rtscts: bool,

    /// Seconds to wait for the adapter
    #[arg(long, default_value_t = 15)]
    timeout: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports
    Ports,
    /// Bring up the ASH link and report what answered
    Probe,
    /// Query the EZSP version
    Version,
    /// Put the adapter into the bootloader, ready for an X-modem upload
    Bootloader,
    /// Leave the bootloader and start the EZSP application
    RunApp,
}

fn load_config(args: &Args) -> Result<DongleConfig> {
    let mut config = match &args.config {
        Some(path) => DongleConfig::load_from_file(path)?,
        None => DongleConfig::default(),
    };
    if let Some(port) = &args.port {
        config.port = port.clone();
    }
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
    if args.rtscts {
        config.hardware_flow_control = true;
    }
    Ok(config)
}

fn run(args: &Args) -> Result<()> {
    let mut config = load_config(args)?;
    let timeout = Duration::from_secs(args.timeout);

    match args.command {
        Command::Ports => {
            for port in list_ports()? {
                println!("{}", port);
            }
        }
        Command::Probe => {
            let mut conn = DongleSession::new(config).connect()?;
            match conn.wait_ready(timeout)? {
                Some(version) => println!("EZSP adapter ready (left bootloader {})", version),
                None => println!("EZSP adapter ready"),
            }
            let stats = conn.dongle().stats();
            info!(
                resets = stats.resets_sent,
                crc_errors = stats.crc_errors,
                ack_mismatches = stats.ack_mismatches,
                "Link statistics"
            );
        }
        Command::Version => {
            let mut conn = DongleSession::new(config).connect()?;
            conn.wait_ready(timeout)?;
            let version = conn.query_version(timeout)?;
            println!(
                "EZSP protocol v{}, stack type {}, stack {}",
                version.protocol_version,
                version.stack_type,
                version.stack_version_string()
            );
        }
        Command::Bootloader => {
            // An adapter already sitting in the bootloader goes straight to upload.
            config.force_firmware_upgrade_on_init_timeout = true;
            let mut conn = DongleSession::new(config).connect()?;
            let ready = conn.wait_for(timeout, |event| match event {
                DongleEvent::AdapterReady => Some(false),
                DongleEvent::FirmwareTransferReady => Some(true),
                _ => None,
            })?;
            if !ready {
                conn.enter_firmware_upgrade(timeout)?;
            }
            println!("Bootloader waiting for X-modem upload");
        }
        Command::RunApp => {
            let mut conn = DongleSession::new(config).connect()?;
            match conn.wait_ready(timeout)? {
                Some(version) => println!("Left bootloader {}, EZSP application running", version),
                None => println!("EZSP application already running"),
            }
        }
    }

    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting ashctl (serialport backend)...");

    if let Err(e) = run(&args) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}
