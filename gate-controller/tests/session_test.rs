use gate_controller::{
    ConnectionState, DeviceError, GateSession, KeyStore, KeyValueStore, MemoryStore, Motion,
    Notification, PendingCommand, SECURE_KEY_ENTRY, SessionConfig, SessionError, Transport,
    TransportError, TransportEvent,
};

/// Records every call; optionally fails writes
#[derive(Default)]
struct RecordingTransport {
    connects: Vec<String>,
    disconnects: usize,
    writes: Vec<String>,
    fail_writes: bool,
    fail_connects: bool,
}

impl Transport for RecordingTransport {
    fn connect(&mut self, address: &str) -> Result<(), TransportError> {
        if self.fail_connects {
            return Err(TransportError::Closed);
        }
        self.connects.push(address.to_string());
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.disconnects += 1;
        Ok(())
    }

    fn write_characteristic(&mut self, payload: &str) -> Result<(), TransportError> {
        if self.fail_writes {
            return Err(TransportError::Other("radio off".to_string()));
        }
        self.writes.push(payload.to_string());
        Ok(())
    }
}

type Session = GateSession<RecordingTransport, MemoryStore>;

fn session_with(config: SessionConfig) -> Session {
    let keys = KeyStore::load(MemoryStore::new()).unwrap();
    GateSession::new(RecordingTransport::default(), keys, config)
}

fn session() -> Session {
    session_with(SessionConfig::default())
}

fn connected() -> Session {
    let mut s = session();
    s.start().unwrap();
    s.on_transport_event(TransportEvent::Connected).unwrap();
    assert_eq!(s.state(), ConnectionState::Connected);
    s
}

fn writes(s: &Session) -> &[String] {
    &s.transport().writes
}

#[test]
fn open_refused_until_linked() {
    let mut s = session();
    assert_eq!(s.state(), ConnectionState::Disconnected);
    assert_eq!(s.secure_key().as_str(), "mpc");

    assert!(matches!(
        s.open(),
        Err(SessionError::NotConnected(ConnectionState::Disconnected))
    ));
    assert!(writes(&s).is_empty());

    assert_eq!(
        s.on_transport_event(TransportEvent::Connected).unwrap(),
        Some(Notification::StateChanged(ConnectionState::Connected))
    );
    s.open().unwrap();
    assert_eq!(writes(&s), ["m:mpc:1"]);

    assert_eq!(
        s.on_transport_event(TransportEvent::DataAvailable("ok:m:1".to_string()))
            .unwrap(),
        Some(Notification::GateMoving(Motion::Open))
    );
    assert_eq!(s.secure_key().as_str(), "mpc");
    assert_eq!(s.in_flight(), None);
}

#[test]
fn close_uses_stored_key() {
    let keys = KeyStore::load(MemoryStore::with_entry(SECURE_KEY_ENTRY, "0000")).unwrap();
    let mut s = GateSession::new(RecordingTransport::default(), keys, SessionConfig::default());
    s.start().unwrap();
    s.on_transport_event(TransportEvent::Connected).unwrap();

    s.close().unwrap();
    assert_eq!(writes(&s), ["m:0000:0"]);
    assert_eq!(
        s.on_response_received("ok:m:0").unwrap(),
        Some(Notification::GateMoving(Motion::Close))
    );
}

#[test]
fn refused_while_connecting() {
    let mut s = session();
    s.start().unwrap();
    assert_eq!(s.transport().connects, ["00:15:83:00:C3:F7"]);
    assert!(matches!(
        s.close(),
        Err(SessionError::NotConnected(ConnectionState::Connecting))
    ));
}

#[test]
fn remote_rekey_adopts_acknowledged_key() {
    let mut s = connected();

    s.reset_remote_key("master1", "newkey").unwrap();
    assert_eq!(writes(&s), ["c:master1:newkey"]);
    assert_eq!(s.in_flight(), Some(PendingCommand::ChangeKey));
    // not adopted until the controller confirms
    assert_eq!(s.secure_key().as_str(), "mpc");

    let n = s.on_response_received("ok:c:newkey").unwrap();
    assert!(matches!(n, Some(Notification::KeyChanged(ref k)) if k.as_str() == "newkey"));
    assert_eq!(s.secure_key().as_str(), "newkey");
    assert_eq!(
        s.key_store().store().get(SECURE_KEY_ENTRY).unwrap().as_deref(),
        Some("newkey")
    );

    s.open().unwrap();
    assert_eq!(writes(&s)[1], "m:newkey:1");
}

#[test]
fn remote_rekey_validation() {
    let mut s = connected();

    for (master, new_key) in [
        ("master1", ""),
        ("", "newkey"),
        ("master1", "1234567890"),
        ("mas:ter", "newkey"),
        ("master1", "new:key"),
    ] {
        let err = s.reset_remote_key(master, new_key).unwrap_err();
        assert!(err.is_validation(), "{master:?} {new_key:?}: {err}");
    }
    assert!(writes(&s).is_empty());
}

#[test]
fn remote_rekey_needs_link() {
    let mut s = session();
    assert!(matches!(
        s.reset_remote_key("master1", "newkey"),
        Err(SessionError::NotConnected(_))
    ));
}

#[test]
fn validation_comes_before_link_check() {
    let mut s = session();
    assert!(s.reset_remote_key("master1", "").unwrap_err().is_validation());
}

#[test]
fn local_key_change() {
    let mut s = session();

    let err = s.change_key_locally("").unwrap_err();
    assert!(err.is_validation());
    assert_eq!(s.secure_key().as_str(), "mpc");

    assert!(s.change_key_locally("1234567890").unwrap_err().is_validation());
    assert!(s.change_key_locally("a:b").unwrap_err().is_validation());
    assert_eq!(s.secure_key().as_str(), "mpc");

    // works without a link
    s.change_key_locally("local").unwrap();
    assert_eq!(s.secure_key().as_str(), "local");
    assert!(writes(&s).is_empty());
}

#[test]
fn device_errors_leave_key_alone() {
    let mut s = connected();

    s.open().unwrap();
    assert_eq!(
        s.on_response_received("err:secure").unwrap(),
        Some(Notification::Rejected(DeviceError::Secure))
    );

    s.reset_remote_key("wrong", "newkey").unwrap();
    assert_eq!(
        s.on_response_received("err:master").unwrap(),
        Some(Notification::Rejected(DeviceError::Master))
    );
    assert_eq!(
        s.on_response_received("err:length").unwrap(),
        Some(Notification::Rejected(DeviceError::Length))
    );
    assert_eq!(s.secure_key().as_str(), "mpc");
}

#[test]
fn unrecognized_answers_are_dropped() {
    let mut s = connected();
    s.open().unwrap();

    assert_eq!(
        s.on_transport_event(TransportEvent::DataAvailable("garbage".to_string()))
            .unwrap(),
        None
    );
    // still waiting for the real answer
    assert_eq!(s.in_flight(), Some(PendingCommand::Motion(Motion::Open)));
}

#[test]
fn single_command_in_flight() {
    let mut s = connected();

    s.open().unwrap();
    assert!(matches!(
        s.close(),
        Err(SessionError::CommandInFlight(PendingCommand::Motion(Motion::Open)))
    ));
    assert!(matches!(
        s.reset_remote_key("master1", "newkey"),
        Err(SessionError::CommandInFlight(_))
    ));
    assert_eq!(writes(&s), ["m:mpc:1"]);

    s.on_response_received("ok:m:1").unwrap();
    s.close().unwrap();
    assert_eq!(writes(&s), ["m:mpc:1", "m:mpc:0"]);
}

#[test]
fn overlapping_commands_when_allowed() {
    let mut s = session_with(SessionConfig {
        single_in_flight: false,
        ..SessionConfig::default()
    });
    s.on_transport_event(TransportEvent::Connected).unwrap();

    s.open().unwrap();
    s.close().unwrap();
    assert_eq!(writes(&s), ["m:mpc:1", "m:mpc:0"]);
}

#[test]
fn link_loss_abandons_command() {
    let mut s = connected();
    s.open().unwrap();

    assert_eq!(
        s.on_transport_event(TransportEvent::Disconnected).unwrap(),
        Some(Notification::StateChanged(ConnectionState::Disconnected))
    );
    assert_eq!(s.in_flight(), None);
    assert!(matches!(s.open(), Err(SessionError::NotConnected(_))));

    // after reconnecting a fresh command goes out
    s.connect().unwrap();
    s.on_transport_event(TransportEvent::Connected).unwrap();
    s.open().unwrap();
    assert_eq!(writes(&s).len(), 2);
}

#[test]
fn unsolicited_key_ack_is_adopted() {
    let mut s = connected();
    let n = s.on_response_received("ok:c:other").unwrap();
    assert!(matches!(n, Some(Notification::KeyChanged(_))));
    assert_eq!(s.secure_key().as_str(), "other");
}

#[test]
fn invalid_acknowledged_key_is_an_error() {
    let mut s = connected();
    s.reset_remote_key("master1", "newkey").unwrap();

    let err = s.on_response_received("ok:c:").unwrap_err();
    assert!(err.is_validation());
    assert_eq!(s.secure_key().as_str(), "mpc");
    assert_eq!(s.in_flight(), None);
}

#[test]
fn connect_failures() {
    let mut s = session();
    s.start().unwrap();
    assert_eq!(
        s.on_transport_event(TransportEvent::NoDeviceFound).unwrap(),
        Some(Notification::DeviceNotFound)
    );
    assert_eq!(s.state(), ConnectionState::Disconnected);

    s.connect().unwrap();
    assert_eq!(
        s.on_transport_event(TransportEvent::Disconnected).unwrap(),
        Some(Notification::StateChanged(ConnectionState::Disconnected))
    );

    s.connect().unwrap();
    s.on_transport_event(TransportEvent::Connected).unwrap();
    assert_eq!(
        s.on_transport_event(TransportEvent::Error("gatt 133".to_string()))
            .unwrap(),
        Some(Notification::LinkError("gatt 133".to_string()))
    );
    assert_eq!(s.state(), ConnectionState::Disconnected);
}

#[test]
fn failed_write_is_reported_once() {
    let mut s = {
        let keys = KeyStore::load(MemoryStore::new()).unwrap();
        let transport = RecordingTransport {
            fail_writes: true,
            ..RecordingTransport::default()
        };
        GateSession::new(transport, keys, SessionConfig::default())
    };
    s.on_transport_event(TransportEvent::Connected).unwrap();

    assert!(matches!(s.open(), Err(SessionError::Transport(_))));
    // nothing was sent, so nothing is outstanding
    assert_eq!(s.in_flight(), None);
}

#[test]
fn stop_disconnects() {
    let mut s = connected();
    s.stop().unwrap();
    assert_eq!(s.transport().disconnects, 1);
    assert_eq!(s.state(), ConnectionState::Disconnected);
}

#[test]
fn failed_start_can_be_retried() {
    let keys = KeyStore::load(MemoryStore::new()).unwrap();
    let transport = RecordingTransport {
        fail_connects: true,
        ..RecordingTransport::default()
    };
    let mut s = GateSession::new(transport, keys, SessionConfig::default());

    assert!(matches!(s.start(), Err(SessionError::Transport(TransportError::Closed))));
    assert!(!s.is_started());
    assert_eq!(s.state(), ConnectionState::Disconnected);
    // a second attempt reaches the transport again instead of AlreadyStarted
    assert!(matches!(s.start(), Err(SessionError::Transport(_))));
    assert!(matches!(s.stop(), Err(SessionError::NotStarted)));
}

#[test]
fn key_ack_does_not_release_pending_motion() {
    let mut s = connected();
    s.open().unwrap();

    let n = s.on_response_received("ok:c:other").unwrap();
    assert!(matches!(n, Some(Notification::KeyChanged(_))));
    assert_eq!(s.in_flight(), Some(PendingCommand::Motion(Motion::Open)));
    assert!(matches!(s.close(), Err(SessionError::CommandInFlight(_))));

    s.on_response_received("ok:m:1").unwrap();
    assert_eq!(s.in_flight(), None);
}

#[test]
fn motion_ack_does_not_release_pending_rekey() {
    let mut s = connected();
    s.reset_remote_key("master1", "newkey").unwrap();

    assert_eq!(
        s.on_response_received("ok:m:0").unwrap(),
        Some(Notification::GateMoving(Motion::Close))
    );
    assert_eq!(s.in_flight(), Some(PendingCommand::ChangeKey));

    s.on_response_received("ok:c:newkey").unwrap();
    assert_eq!(s.in_flight(), None);
    assert_eq!(s.secure_key().as_str(), "newkey");
}

#[test]
fn transport_outlives_session() {
    let mut s = connected();
    s.open().unwrap();
    s.stop().unwrap();

    let transport = s.into_transport();
    assert_eq!(transport.writes, ["m:mpc:1"]);
    assert_eq!(transport.disconnects, 1);
}
