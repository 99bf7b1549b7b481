//! Gate BT wire protocol - commands, responses and framing
//!
//! Every message is a short ASCII string of `:`-separated fields.
//!
//! Commands (host -> controller):
//!  m:<secure_key>:1                -> open gate
//!  m:<secure_key>:0                -> close gate
//!  c:<master_key>:<new_secure_key> -> change secure key
//!
//! Responses (controller -> host):
//!  ok:m:1                          -> open gate ok
//!  ok:m:0                          -> close gate ok
//!  ok:c:<secure_key>               -> secure key was changed
//!  err:secure                      -> wrong secure key
//!  err:master                      -> wrong master key
//!  err:length                      -> secure key empty or 10+ characters

pub mod ble;
mod keys;

pub use keys::{FACTORY_SECURE_KEY, KeyError, MAX_KEY_LEN, MasterKey, SecureKey, validate_key};

/// Field separator
pub const DELIMITER: char = ':';

// Command tags
pub const CMD_MOTION: &str = "m";
pub const CMD_CHANGE: &str = "c";

// Motion values
pub const VALUE_OPEN: &str = "1";
pub const VALUE_CLOSE: &str = "0";

// Responses
pub const RESP_OPEN_OK: &str = "ok:m:1";
pub const RESP_CLOSE_OK: &str = "ok:m:0";
pub const RESP_CHANGE_OK_PREFIX: &str = "ok:c";
pub const RESP_ERR_SECURE: &str = "err:secure";
pub const RESP_ERR_MASTER: &str = "err:master";
pub const RESP_ERR_LENGTH: &str = "err:length";

/// Requested gate motion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Motion {
    Open,
    Close,
}

impl Motion {
    pub fn wire_value(&self) -> &'static str {
        match self {
            Motion::Open => VALUE_OPEN,
            Motion::Close => VALUE_CLOSE,
        }
    }
}

impl std::fmt::Display for Motion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Motion::Open => f.write_str("open"),
            Motion::Close => f.write_str("close"),
        }
    }
}

/// Command sent to the controller.
///
/// Fields are plain strings so that `encode` is the last line of defence
/// against a delimiter sneaking onto the wire. Use the constructors taking
/// [`SecureKey`] / [`MasterKey`] to start from validated keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Motion { secure_key: String, value: Motion },
    ChangeSecureKey { master_key: String, new_secure_key: String },
}

impl Command {
    pub fn motion(secure_key: &SecureKey, value: Motion) -> Self {
        Self::Motion {
            secure_key: secure_key.as_str().to_string(),
            value,
        }
    }

    pub fn change_secure_key(master_key: &MasterKey, new_secure_key: &SecureKey) -> Self {
        Self::ChangeSecureKey {
            master_key: master_key.as_str().to_string(),
            new_secure_key: new_secure_key.as_str().to_string(),
        }
    }
}

/// Rejection reported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceError {
    /// Secure key did not match
    Secure,
    /// Master key did not match
    Master,
    /// Candidate secure key was empty or too long
    Length,
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceError::Secure => f.write_str("wrong secure key"),
            DeviceError::Master => f.write_str("wrong master key"),
            DeviceError::Length => f.write_str("invalid secure key length"),
        }
    }
}

/// Decoded controller response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    MotionAck { value: Motion },
    ChangeKeyAck { new_secure_key: String },
    Error { kind: DeviceError },
    Unrecognized { raw: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("{field} contains the field delimiter")]
    InvalidField { field: &'static str },
}

fn check_field(field: &'static str, value: &str) -> Result<(), EncodeError> {
    if value.contains(DELIMITER) {
        return Err(EncodeError::InvalidField { field });
    }
    Ok(())
}

fn join(cmd: &str, key: &str, value: &str) -> String {
    let mut s = String::with_capacity(cmd.len() + key.len() + value.len() + 2);
    s.push_str(cmd);
    s.push(DELIMITER);
    s.push_str(key);
    s.push(DELIMITER);
    s.push_str(value);
    s
}

/// Render a command as a wire string
pub fn encode(command: &Command) -> Result<String, EncodeError> {
    match command {
        Command::Motion { secure_key, value } => {
            check_field("secure key", secure_key)?;
            Ok(join(CMD_MOTION, secure_key, value.wire_value()))
        }
        Command::ChangeSecureKey { master_key, new_secure_key } => {
            check_field("master key", master_key)?;
            check_field("new secure key", new_secure_key)?;
            Ok(join(CMD_CHANGE, master_key, new_secure_key))
        }
    }
}

/// Decode a wire string received from the controller.
///
/// Total: anything that is not a known response comes back as
/// [`Response::Unrecognized`].
pub fn decode(raw: &str) -> Response {
    match raw {
        RESP_OPEN_OK => return Response::MotionAck { value: Motion::Open },
        RESP_CLOSE_OK => return Response::MotionAck { value: Motion::Close },
        _ => {}
    }

    if raw.starts_with(RESP_CHANGE_OK_PREFIX) {
        let fields: Vec<&str> = raw.split(DELIMITER).collect();
        if fields.len() == 3 {
            return Response::ChangeKeyAck {
                new_secure_key: fields[2].to_string(),
            };
        }
    }

    match raw {
        RESP_ERR_SECURE => Response::Error { kind: DeviceError::Secure },
        RESP_ERR_MASTER => Response::Error { kind: DeviceError::Master },
        RESP_ERR_LENGTH => Response::Error { kind: DeviceError::Length },
        _ => Response::Unrecognized { raw: raw.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn motion(key: &str, value: Motion) -> Command {
        Command::Motion { secure_key: key.to_string(), value }
    }

    #[test]
    fn encode_motion() {
        assert_eq!(encode(&motion("0000", Motion::Open)).unwrap(), "m:0000:1");
        assert_eq!(encode(&motion("0000", Motion::Close)).unwrap(), "m:0000:0");
    }

    #[test]
    fn encode_change_key() {
        let cmd = Command::ChangeSecureKey {
            master_key: "master1".to_string(),
            new_secure_key: "newkey".to_string(),
        };
        assert_eq!(encode(&cmd).unwrap(), "c:master1:newkey");
    }

    #[test]
    fn encode_from_validated_keys() {
        let key = SecureKey::new("mpc").unwrap();
        assert_eq!(encode(&Command::motion(&key, Motion::Open)).unwrap(), "m:mpc:1");

        let master = MasterKey::new("m4ster").unwrap();
        let new_key = SecureKey::new("fresh").unwrap();
        assert_eq!(
            encode(&Command::change_secure_key(&master, &new_key)).unwrap(),
            "c:m4ster:fresh"
        );
    }

    #[test]
    fn encode_rejects_delimiter() {
        assert_eq!(
            encode(&motion("a:b", Motion::Open)),
            Err(EncodeError::InvalidField { field: "secure key" })
        );
        let cmd = Command::ChangeSecureKey {
            master_key: "master".to_string(),
            new_secure_key: "x:y".to_string(),
        };
        assert_eq!(
            encode(&cmd),
            Err(EncodeError::InvalidField { field: "new secure key" })
        );
        let cmd = Command::ChangeSecureKey {
            master_key: ":".to_string(),
            new_secure_key: "ok".to_string(),
        };
        assert_eq!(
            encode(&cmd),
            Err(EncodeError::InvalidField { field: "master key" })
        );
    }

    #[test]
    fn decode_acks() {
        assert_eq!(decode("ok:m:1"), Response::MotionAck { value: Motion::Open });
        assert_eq!(decode("ok:m:0"), Response::MotionAck { value: Motion::Close });
        assert_eq!(
            decode("ok:c:xyz"),
            Response::ChangeKeyAck { new_secure_key: "xyz".to_string() }
        );
    }

    #[test]
    fn decode_errors() {
        assert_eq!(decode("err:secure"), Response::Error { kind: DeviceError::Secure });
        assert_eq!(decode("err:master"), Response::Error { kind: DeviceError::Master });
        assert_eq!(decode("err:length"), Response::Error { kind: DeviceError::Length });
    }

    #[test]
    fn decode_unrecognized() {
        for raw in ["garbage", "", "ok:m:2", "ok:m:1\r\n", "ok:c", "ok:c:a:b", "err:secure:x", "OK:M:1"] {
            assert_eq!(
                decode(raw),
                Response::Unrecognized { raw: raw.to_string() },
                "{raw:?}"
            );
        }
    }

    #[test]
    fn decode_is_idempotent() {
        for raw in ["ok:m:1", "ok:c:abc", "err:master", "noise"] {
            assert_eq!(decode(raw), decode(raw));
        }
    }
}
