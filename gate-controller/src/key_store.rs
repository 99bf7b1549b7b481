//! Secure key storage - cached in memory, written through on change

use gate_proto::{KeyError, SecureKey};

use crate::storage::KeyValueStore;

/// Entry name the secure key is persisted under
pub const SECURE_KEY_ENTRY: &str = "secureKey";

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("invalid key: {0}")]
    Invalid(#[from] KeyError),
    #[error("failed to persist secure key: {0}")]
    Persist(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Holds the secure key the host sends with every motion command
#[derive(Debug)]
pub struct KeyStore<S: KeyValueStore> {
    store: S,
    current: SecureKey,
}

impl<S: KeyValueStore> KeyStore<S> {
    /// Load the secure key from `store`, falling back to the factory key.
    ///
    /// A stored value that breaks the key rules is ignored (with a warning)
    /// rather than sent to the controller.
    pub fn load(store: S) -> Result<Self, KeyStoreError> {
        let stored = store
            .get(SECURE_KEY_ENTRY)
            .map_err(|e| KeyStoreError::Persist(Box::new(e)))?;

        let current = match stored {
            Some(value) => SecureKey::new(value).unwrap_or_else(|e| {
                tracing::warn!("stored secure key is invalid ({e}), using factory key");
                SecureKey::factory()
            }),
            None => SecureKey::factory(),
        };

        Ok(Self { store, current })
    }

    pub fn get(&self) -> &SecureKey {
        &self.current
    }

    /// Validate, persist and adopt a new secure key.
    ///
    /// The cached key only changes once the store accepted the write.
    pub fn set(&mut self, new_key: &str) -> Result<(), KeyStoreError> {
        let key = SecureKey::new(new_key)?;
        self.store
            .set(SECURE_KEY_ENTRY, key.as_str())
            .map_err(|e| KeyStoreError::Persist(Box::new(e)))?;
        self.current = key;
        tracing::info!("secure key updated");
        Ok(())
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
