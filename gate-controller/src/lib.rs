//! Gate BT Controller
//!
//! Host side of the Gate BT protocol: connection state, secure key
//! management and the BLE transport used to reach the gate controller.
//!
//! # Example
//!
//! ```ignore
//! use gate_controller::{GateConfig, GateSession, JsonFileStore, KeyStore, Notification};
//! use gate_controller::ble::BleTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let home = gate_controller::gate_home()?;
//!     let config = GateConfig::load_or_create(&home)?;
//!     let keys = KeyStore::load(JsonFileStore::open(GateConfig::keys_path(&home))?)?;
//!
//!     let (tx, mut events) = gate_controller::event_channel();
//!     let transport = BleTransport::spawn(&config.device, std::time::Duration::from_secs(5), tx)?;
//!     let mut session = GateSession::new(transport, keys, config.session_config());
//!
//!     session.start()?;
//!     while let Some(n) = session.next_notification(&mut events).await {
//!         if n? == Notification::StateChanged(gate_controller::ConnectionState::Connected) {
//!             session.open()?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod ble;
mod config;
mod key_store;
mod session;
mod state;
mod storage;
mod transport;

pub use config::{
    CONFIG_FILE, ConfigError, DeviceIdentity, GateConfig, KEYS_FILE, ensure_dir, gate_home,
};
pub use key_store::{KeyStore, KeyStoreError, SECURE_KEY_ENTRY};
pub use session::{GateSession, Notification, PendingCommand, SessionConfig, SessionError};
pub use state::{ConnectionState, ConnectionStateMachine, LinkEvent};
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore, StoreError};
pub use transport::{
    EventReceiver, EventSender, Transport, TransportError, TransportEvent, event_channel,
};

pub use gate_proto::{DeviceError, KeyError, MasterKey, Motion, SecureKey};
