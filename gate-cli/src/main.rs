//! Command line controller for Gate BT gates
//!
//! Connects to the gate controller over BLE, sends open/close and rekey
//! commands, and manages the locally stored secure key.

mod logging;
mod shell;

use clap::{Parser, Subcommand};
use gate_controller::ble::{self, BleTransport};
use gate_controller::{
    ConnectionState, EventReceiver, GateConfig, GateSession, JsonFileStore, KeyStore, Motion,
    Notification, event_channel,
};
use std::path::PathBuf;
use std::time::Duration;

type BleSession = GateSession<BleTransport, JsonFileStore>;
type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "gate")]
#[command(about = "Open and close a Gate BT gate over Bluetooth LE")]
struct Cli {
    /// Directory holding config.json and keys.json (default: $GATE_HOME or ~/.gate)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Controller address, overrides config.json
    #[arg(short, long, global = true)]
    address: Option<String>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby BLE devices
    Scan {
        /// Scan duration in seconds (default: scan_secs from config)
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Open the gate
    Open,
    /// Close the gate
    Close,
    /// Replace the stored secure key without talking to the controller
    ChangeKey {
        /// New secure key (1-9 characters, no ':')
        key: String,
    },
    /// Set a new secure key on the controller, authorised by the master key
    ResetKey {
        /// Master key of the controller
        #[arg(short, long)]
        master: String,
        /// New secure key (1-9 characters, no ':')
        #[arg(short, long = "new")]
        new_key: String,
    },
    /// Print the stored secure key
    ShowKey,
    /// Keep a connection open and read commands from stdin
    Shell,
}

/// Loaded settings shared by every subcommand
struct Context {
    home: PathBuf,
    config: GateConfig,
}

impl Context {
    fn load(cli: &Cli) -> CliResult<Self> {
        let home = match &cli.home {
            Some(dir) => {
                gate_controller::ensure_dir(dir)?;
                dir.clone()
            }
            None => gate_controller::gate_home()?,
        };

        let mut config = GateConfig::load_or_create(&home)?;
        if let Some(address) = &cli.address {
            config.device.address = address.clone();
        }
        tracing::debug!(home = %home.display(), address = %config.device.address, "loaded config");

        Ok(Self { home, config })
    }

    fn key_store(&self) -> CliResult<KeyStore<JsonFileStore>> {
        let store = JsonFileStore::open(GateConfig::keys_path(&self.home))?;
        Ok(KeyStore::load(store)?)
    }

    /// Session over a freshly spawned BLE driver. Must run inside the runtime.
    fn session(&self) -> CliResult<(BleSession, EventReceiver)> {
        let (tx, events) = event_channel();
        let transport = BleTransport::spawn(&self.config.device, self.scan_duration(), tx)?;
        let session = GateSession::new(transport, self.key_store()?, self.config.session_config());
        Ok((session, events))
    }

    fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.config.scan_secs)
    }

    fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.config.reply_timeout_secs)
    }

    /// Upper bound for scan plus GATT connect and discovery
    fn connect_timeout(&self) -> Duration {
        self.scan_duration() + Duration::from_secs(20)
    }
}

#[tokio::main]
async fn main() -> CliResult {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose)?;

    let ctx = Context::load(&cli)?;

    match cli.command {
        Commands::Scan { duration } => {
            let duration = duration.map(Duration::from_secs).unwrap_or(ctx.scan_duration());
            scan_devices(&ctx, duration).await?;
        }
        Commands::Open => {
            run_once(&ctx, |s| s.open()).await?;
        }
        Commands::Close => {
            run_once(&ctx, |s| s.close()).await?;
        }
        Commands::ChangeKey { key } => {
            let mut keys = ctx.key_store()?;
            keys.set(&key)?;
            println!("Secure key updated");
        }
        Commands::ResetKey { master, new_key } => {
            run_once(&ctx, |s| s.reset_remote_key(&master, &new_key)).await?;
        }
        Commands::ShowKey => {
            println!("{}", ctx.key_store()?.get());
        }
        Commands::Shell => {
            shell::run(&ctx).await?;
        }
    }

    Ok(())
}

async fn scan_devices(ctx: &Context, duration: Duration) -> CliResult {
    println!("Scanning for BLE devices ({} seconds)...", duration.as_secs());

    let devices = ble::scan(duration, &ctx.config.device.name).await?;

    println!("\nFound {} devices:", devices.len());
    for device in devices {
        let rssi = device
            .rssi
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "N/A".to_string());
        let marker = if device.is_gate { " [GATE]" } else { "" };
        println!("  {} ({}) RSSI: {}{}", device.name, device.address, rssi, marker);
    }

    Ok(())
}

/// Connect, send one command, wait for the controller's answer, disconnect
async fn run_once<F>(ctx: &Context, send: F) -> CliResult
where
    F: FnOnce(&mut BleSession) -> Result<(), gate_controller::SessionError>,
{
    let (mut session, mut events) = ctx.session()?;

    println!("Connecting to {}...", ctx.config.device.address);
    session.start()?;

    let result = match tokio::time::timeout(
        ctx.connect_timeout(),
        wait_connected(&mut session, &mut events),
    )
    .await
    {
        Ok(Ok(())) => {
            println!("Connected");
            match send(&mut session) {
                Ok(()) => tokio::time::timeout(
                    ctx.reply_timeout(),
                    wait_answer(&mut session, &mut events),
                )
                .await
                .unwrap_or_else(|_| Err("no answer from the gate".into())),
                Err(e) => Err(e.into()),
            }
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err("timed out connecting to the gate".into()),
    };

    let stopped = session.stop();
    shutdown(session).await;
    stopped?;
    result
}

/// Let the BLE driver finish the queued disconnect before the runtime exits
async fn shutdown(session: BleSession) {
    let transport = session.into_transport();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, transport.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("BLE driver did not stop in time");
    }
}

/// Drive the session until the link is up
async fn wait_connected(session: &mut BleSession, events: &mut EventReceiver) -> CliResult {
    while let Some(notification) = session.next_notification(events).await {
        match notification? {
            Notification::StateChanged(ConnectionState::Connected) => return Ok(()),
            Notification::StateChanged(ConnectionState::Connecting) => {}
            Notification::StateChanged(ConnectionState::Disconnected) => {
                return Err("connection failed".into());
            }
            Notification::DeviceNotFound => return Err("gate not found".into()),
            Notification::LinkError(reason) => {
                return Err(format!("bluetooth error: {}", reason).into());
            }
            other => tracing::debug!(?other, "ignored while connecting"),
        }
    }
    Err("transport stopped".into())
}

/// Drive the session until the controller answers the command just sent
async fn wait_answer(session: &mut BleSession, events: &mut EventReceiver) -> CliResult {
    while let Some(notification) = session.next_notification(events).await {
        match notification? {
            Notification::GateMoving(Motion::Open) => {
                println!("Opening gate");
                return Ok(());
            }
            Notification::GateMoving(Motion::Close) => {
                println!("Closing gate");
                return Ok(());
            }
            Notification::KeyChanged(_) => {
                println!("Secure key changed");
                return Ok(());
            }
            Notification::Rejected(error) => {
                return Err(format!("gate refused the command: {}", error).into());
            }
            Notification::StateChanged(ConnectionState::Disconnected)
            | Notification::LinkError(_) => {
                return Err("link lost before the gate answered".into());
            }
            other => tracing::debug!(?other, "ignored while waiting for answer"),
        }
    }
    Err("transport stopped".into())
}
