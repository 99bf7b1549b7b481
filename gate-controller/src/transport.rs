//! Transport seam between the session and the wireless link
//!
//! Outbound calls hand work to the transport and return immediately. Results
//! come back later as [`TransportEvent`]s on a channel, in the order the
//! transport observed them.

use tokio::sync::mpsc;

/// Event reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connecting,
    Connected,
    Disconnected,
    NoDeviceFound,
    DataAvailable(String),
    Error(String),
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Create the channel a transport reports its events on
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport is shut down")]
    Closed,
    #[error("not connected to a device")]
    NotConnected,
    #[error("{0}")]
    Other(String),
}

/// Outbound half of the link
pub trait Transport {
    /// Start connecting to the device at `address`
    fn connect(&mut self, address: &str) -> Result<(), TransportError>;

    /// Drop the current link, if any
    fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Write a payload to the command characteristic
    fn write_characteristic(&mut self, payload: &str) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self, address: &str) -> Result<(), TransportError> {
        (**self).connect(address)
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        (**self).disconnect()
    }

    fn write_characteristic(&mut self, payload: &str) -> Result<(), TransportError> {
        (**self).write_characteristic(payload)
    }
}
