//! Connection lifecycle

/// Link state towards the gate controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
        }
    }
}

/// Events that move the link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    ConnectRequested,
    LinkEstablished,
    NoDeviceFound,
    LinkFailed,
    LinkLost,
    DisconnectRequested,
    TransportError,
}

/// Tracks the link state; only link events mutate it.
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.state
    }

    pub fn can_send_command(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Apply one event and return the resulting state
    pub fn on_transport_event(&mut self, event: LinkEvent) -> ConnectionState {
        use ConnectionState::*;

        let next = match (self.state, event) {
            (Disconnected, LinkEvent::ConnectRequested) => Connecting,
            // already on the way or there
            (state, LinkEvent::ConnectRequested) => state,
            // transports that auto-connect skip the request
            (Disconnected | Connecting, LinkEvent::LinkEstablished) => Connected,
            (Connected, LinkEvent::LinkEstablished) => Connected,
            (
                _,
                LinkEvent::NoDeviceFound
                | LinkEvent::LinkFailed
                | LinkEvent::LinkLost
                | LinkEvent::DisconnectRequested
                | LinkEvent::TransportError,
            ) => Disconnected,
        };

        if next != self.state {
            tracing::info!(from = %self.state, to = %next, ?event, "link state changed");
        } else {
            tracing::debug!(state = %self.state, ?event, "link event without transition");
        }
        self.state = next;
        next
    }
}
