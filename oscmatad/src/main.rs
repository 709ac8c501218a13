//! oscmata daemon
//!
//! Bridges Open Sound Control messages to servo and stepper actuators over
//! a Firmata-style serial link.
//!
//! Startup order matters: the configuration is read first, then the serial
//! board is brought up, then the listener binds the WLAN (or, on request,
//! LAN) address discovered via the router. Any failure along that path is
//! fatal with no retry. Once serving, the loop runs until an interrupt
//! signal, at which point the calibration state is flushed back to
//! `config.json` exactly once.

mod server;

use anyhow::{Context, Result};
use clap::Parser;
use oscmata_core::{AddressPair, ConfigStore, Interface, MappingEngine};
use oscmata_hardware::{FirmataClient, SerialDriver};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::signal;
use tracing::{error, info};

use server::BridgeServer;

/// Serial device the microcontroller is attached to.
const SERIAL_DEVICE: &str = "/dev/ttyATH0";

/// Timeout for serial writes, in milliseconds.
const SERIAL_TIMEOUT_MS: u64 = 1000;

/// OSC-to-Firmata actuator bridge
#[derive(Parser, Debug)]
#[command(name = "oscmatad")]
#[command(version, about = "OSC to Firmata servo/stepper bridge", long_about = None)]
struct Args {
    /// Bind the LAN address when the literal `LAN` is given; WLAN otherwise
    network: Option<String>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args = Args::parse();

    // Exit status stays 0 on startup failure as well as on graceful exit;
    // the launch scripts treat any exit as final.
    if let Err(e) = run(args).await {
        error!("Fatal: {:#}", e);
    }
}

async fn run(args: Args) -> Result<()> {
    info!("oscmata bridge starting...");

    let store = ConfigStore::at_executable()?;
    let config = store.load()?;
    info!(
        "Configuration loaded: {} servo(s), OSC port {}",
        config.servo.len(),
        config.port
    );

    info!("Initializing board on {} ...", SERIAL_DEVICE);
    let driver = SerialDriver::new(SERIAL_DEVICE, SERIAL_TIMEOUT_MS)
        .context("serial connection failed")?;
    let mut client = FirmataClient::new(driver);
    server::initialize_board(&mut client, &config)
        .await
        .context("board initialization failed")?;

    info!("Initializing server ...");
    let pair = AddressPair::discover(&config.router_ip)
        .context("local address discovery failed")?;
    let interface = Interface::from_cli_arg(args.network.as_deref());
    let bind_addr = SocketAddr::from((pair.select(interface), config.port));

    let socket = UdpSocket::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind OSC listener on {}", bind_addr))?;
    info!("OSC listener bound on {} ({:?})", bind_addr, interface);

    let mut bridge = BridgeServer::new(MappingEngine::new(config), client);

    info!("Serving ...");
    tokio::select! {
        _ = bridge.run(&socket) => {}
        _ = shutdown_signal() => {}
    }

    // Flushed exactly once; the serial connection closes when the client
    // drops.
    store.flush(bridge.engine().config())?;
    info!("Configuration flushed to {}", store.path().display());
    info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

/// Initialize tracing subscriber for logging
fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
