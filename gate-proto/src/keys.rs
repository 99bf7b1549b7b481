//! Secure and master keys
//!
//! Both keys share one rule: 1 to 9 characters, never the field delimiter.
//! The controller answers `err:length` for anything outside that range, and a
//! delimiter inside a key would make the wire string ambiguous.

use std::fmt;
use std::str::FromStr;

use crate::DELIMITER;

/// Longest key the controller accepts
pub const MAX_KEY_LEN: usize = 9;

/// Secure key the controller ships with
pub const FACTORY_SECURE_KEY: &str = "mpc";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("key must not be empty")]
    Empty,
    #[error("key is {0} characters long, at most 9 allowed")]
    TooLong(usize),
    #[error("key must not contain ':'")]
    Delimiter,
}

/// Check a candidate key against the controller's rules
pub fn validate_key(candidate: &str) -> Result<(), KeyError> {
    let len = candidate.chars().count();
    if len == 0 {
        return Err(KeyError::Empty);
    }
    if len > MAX_KEY_LEN {
        return Err(KeyError::TooLong(len));
    }
    if candidate.contains(DELIMITER) {
        return Err(KeyError::Delimiter);
    }
    Ok(())
}

/// Shared secret required to authorize motion commands
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SecureKey(String);

/// Higher-privilege secret required to authorize remote rekeying.
///
/// Supplied fresh for every reset and never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct MasterKey(String);

macro_rules! key_type {
    ($name:ident) => {
        impl $name {
            pub fn new(key: impl Into<String>) -> Result<Self, KeyError> {
                let key = key.into();
                validate_key(&key)?;
                Ok(Self(key))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = KeyError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = KeyError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(key: $name) -> String {
                key.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        // keys are secrets, keep them out of debug output
        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "(***)"))
            }
        }
    };
}

key_type!(SecureKey);
key_type!(MasterKey);

impl SecureKey {
    /// The key a fresh controller expects
    pub fn factory() -> Self {
        Self(FACTORY_SECURE_KEY.to_string())
    }
}

impl Default for SecureKey {
    fn default() -> Self {
        Self::factory()
    }
}

impl fmt::Display for SecureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
