//! Gate session - ties link state, key store and codec together
//!
//! The session is driven from one place: the caller feeds it transport events
//! in the order they arrive and calls the intent methods (`open`, `close`,
//! ...) in between. Nothing here blocks or spawns.
//!
//! The wire protocol carries no request ids. An answer is attributed to
//! whatever was sent last, so the session remembers that one command until a
//! matching acknowledgement or a device error arrives, or the link drops. With
//! [`SessionConfig::single_in_flight`] set, a second command is refused while
//! the first is still outstanding. A command that never gets an answer stays
//! outstanding until the link goes down.

use gate_proto::{
    Command, DeviceError, EncodeError, KeyError, MasterKey, Motion, Response, SecureKey, decode,
    encode,
};

use crate::key_store::{KeyStore, KeyStoreError};
use crate::state::{ConnectionState, ConnectionStateMachine, LinkEvent};
use crate::storage::KeyValueStore;
use crate::transport::{EventReceiver, Transport, TransportError, TransportEvent};

/// Session settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Address handed to the transport on connect
    pub address: String,
    /// Refuse a new command while the previous one is unanswered
    pub single_in_flight: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: gate_proto::ble::MAC_ADDRESS.to_string(),
            single_in_flight: true,
        }
    }
}

/// Command written to the controller and not yet answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingCommand {
    Motion(Motion),
    ChangeKey,
}

impl std::fmt::Display for PendingCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingCommand::Motion(m) => write!(f, "{m}"),
            PendingCommand::ChangeKey => f.write_str("change key"),
        }
    }
}

/// Something the caller should show the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    StateChanged(ConnectionState),
    DeviceNotFound,
    LinkError(String),
    /// Controller confirmed the motion
    GateMoving(Motion),
    /// Controller confirmed the rekey and the new key is stored
    KeyChanged(SecureKey),
    /// Controller refused the last command
    Rejected(DeviceError),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid key: {0}")]
    Validation(#[from] KeyError),
    #[error("not connected (link is {0})")]
    NotConnected(ConnectionState),
    #[error("previous {0} command is still awaiting an answer")]
    CommandInFlight(PendingCommand),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    KeyStore(KeyStoreError),
    #[error("session already started")]
    AlreadyStarted,
    #[error("session not started")]
    NotStarted,
}

impl SessionError {
    /// Input was rejected before anything reached the transport; re-prompt
    pub fn is_validation(&self) -> bool {
        matches!(self, SessionError::Validation(_))
    }
}

impl From<KeyStoreError> for SessionError {
    fn from(e: KeyStoreError) -> Self {
        match e {
            KeyStoreError::Invalid(e) => SessionError::Validation(e),
            e => SessionError::KeyStore(e),
        }
    }
}

/// One session with the gate controller
pub struct GateSession<T: Transport, S: KeyValueStore> {
    transport: T,
    link: ConnectionStateMachine,
    keys: KeyStore<S>,
    config: SessionConfig,
    in_flight: Option<PendingCommand>,
    started: bool,
}

impl<T: Transport, S: KeyValueStore> GateSession<T, S> {
    pub fn new(transport: T, keys: KeyStore<S>, config: SessionConfig) -> Self {
        Self {
            transport,
            link: ConnectionStateMachine::new(),
            keys,
            config,
            in_flight: None,
            started: false,
        }
    }

    /// Begin the session by connecting to the configured device
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.started {
            return Err(SessionError::AlreadyStarted);
        }
        self.connect()?;
        self.started = true;
        Ok(())
    }

    /// End the session, dropping the link
    pub fn stop(&mut self) -> Result<(), SessionError> {
        if !self.started {
            return Err(SessionError::NotStarted);
        }
        self.started = false;
        self.disconnect()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Ask the transport to (re)connect to the configured device
    pub fn connect(&mut self) -> Result<(), SessionError> {
        self.transport.connect(&self.config.address)?;
        self.apply(LinkEvent::ConnectRequested);
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<(), SessionError> {
        let result = self.transport.disconnect();
        self.apply(LinkEvent::DisconnectRequested);
        result.map_err(Into::into)
    }

    pub fn state(&self) -> ConnectionState {
        self.link.current_state()
    }

    pub fn can_send_command(&self) -> bool {
        self.link.can_send_command()
    }

    pub fn secure_key(&self) -> &SecureKey {
        self.keys.get()
    }

    pub fn in_flight(&self) -> Option<PendingCommand> {
        self.in_flight
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Give up the session, keeping the transport for shutdown
    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn key_store(&self) -> &KeyStore<S> {
        &self.keys
    }

    /// Send the open command. The answer arrives later as an event.
    pub fn open(&mut self) -> Result<(), SessionError> {
        self.send_motion(Motion::Open)
    }

    /// Send the close command. The answer arrives later as an event.
    pub fn close(&mut self) -> Result<(), SessionError> {
        self.send_motion(Motion::Close)
    }

    /// Change the key this host sends, without telling the controller.
    ///
    /// Works in any link state.
    pub fn change_key_locally(&mut self, new_key: &str) -> Result<(), SessionError> {
        if new_key.is_empty() {
            return Err(KeyError::Empty.into());
        }
        self.keys.set(new_key)?;
        Ok(())
    }

    /// Ask the controller to replace its secure key, authorized by the
    /// master key. The local key changes only once the controller confirms.
    pub fn reset_remote_key(
        &mut self,
        master_key: &str,
        new_secure_key: &str,
    ) -> Result<(), SessionError> {
        if new_secure_key.is_empty() {
            return Err(KeyError::Empty.into());
        }
        let master_key = MasterKey::new(master_key)?;
        let new_secure_key = SecureKey::new(new_secure_key)?;

        self.ensure_can_send()?;
        let command = Command::change_secure_key(&master_key, &new_secure_key);
        self.send(&command, PendingCommand::ChangeKey)
    }

    /// Apply one transport event
    pub fn on_transport_event(
        &mut self,
        event: TransportEvent,
    ) -> Result<Option<Notification>, SessionError> {
        let notification = match event {
            TransportEvent::Connecting => self.apply(LinkEvent::ConnectRequested),
            TransportEvent::Connected => self.apply(LinkEvent::LinkEstablished),
            TransportEvent::Disconnected => {
                let link_event = if self.state() == ConnectionState::Connecting {
                    LinkEvent::LinkFailed
                } else {
                    LinkEvent::LinkLost
                };
                self.apply(link_event)
            }
            TransportEvent::NoDeviceFound => {
                self.apply(LinkEvent::NoDeviceFound);
                Some(Notification::DeviceNotFound)
            }
            TransportEvent::Error(reason) => {
                tracing::warn!(%reason, "transport error");
                self.apply(LinkEvent::TransportError);
                Some(Notification::LinkError(reason))
            }
            TransportEvent::DataAvailable(payload) => return self.on_response_received(&payload),
        };
        Ok(notification)
    }

    /// Decode a controller answer and apply its effect
    pub fn on_response_received(
        &mut self,
        wire: &str,
    ) -> Result<Option<Notification>, SessionError> {
        match decode(wire) {
            Response::MotionAck { value } => {
                match self.in_flight {
                    Some(PendingCommand::Motion(_)) => self.in_flight = None,
                    pending => {
                        tracing::warn!(?pending, "motion acknowledged without a pending motion")
                    }
                }
                tracing::info!(%value, "controller acknowledged motion");
                Ok(Some(Notification::GateMoving(value)))
            }
            Response::ChangeKeyAck { new_secure_key } => {
                match self.in_flight {
                    Some(PendingCommand::ChangeKey) => self.in_flight = None,
                    pending => tracing::warn!(
                        ?pending,
                        "key change acknowledged without a pending request, adopting it"
                    ),
                }
                self.keys.set(&new_secure_key)?;
                Ok(Some(Notification::KeyChanged(self.keys.get().clone())))
            }
            Response::Error { kind } => {
                let pending = self.in_flight.take();
                tracing::warn!(%kind, ?pending, "controller rejected command");
                Ok(Some(Notification::Rejected(kind)))
            }
            Response::Unrecognized { raw } => {
                tracing::debug!(len = raw.len(), "dropping unrecognized response");
                Ok(None)
            }
        }
    }

    /// Wait for the next event that produces a notification.
    ///
    /// Returns `None` once the transport's event channel is closed.
    pub async fn next_notification(
        &mut self,
        events: &mut EventReceiver,
    ) -> Option<Result<Notification, SessionError>> {
        while let Some(event) = events.recv().await {
            match self.on_transport_event(event) {
                Ok(Some(n)) => return Some(Ok(n)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }

    fn send_motion(&mut self, value: Motion) -> Result<(), SessionError> {
        self.ensure_can_send()?;
        let command = Command::motion(self.keys.get(), value);
        self.send(&command, PendingCommand::Motion(value))
    }

    fn ensure_can_send(&self) -> Result<(), SessionError> {
        if !self.link.can_send_command() {
            return Err(SessionError::NotConnected(self.state()));
        }
        if self.config.single_in_flight {
            if let Some(pending) = self.in_flight {
                return Err(SessionError::CommandInFlight(pending));
            }
        }
        Ok(())
    }

    fn send(&mut self, command: &Command, pending: PendingCommand) -> Result<(), SessionError> {
        let wire = encode(command)?;
        self.transport.write_characteristic(&wire)?;
        tracing::debug!(command = %pending, "command written");
        self.in_flight = Some(pending);
        Ok(())
    }

    fn apply(&mut self, event: LinkEvent) -> Option<Notification> {
        let before = self.link.current_state();
        let after = self.link.on_transport_event(event);

        if after == ConnectionState::Disconnected {
            if let Some(pending) = self.in_flight.take() {
                tracing::debug!(command = %pending, "link down, abandoning unanswered command");
            }
        }

        (before != after).then_some(Notification::StateChanged(after))
    }
}
