//! Secure Storage using the OS Keychain
//!
//! Holds offline license records. The keyring API cannot enumerate entries,
//! so the store keeps its own key index in a reserved entry.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SecureStore,
};
use core_async::sync::Mutex;
use keyring::Entry;
use std::collections::BTreeSet;
use tracing::{debug, error, warn};

const INDEX_KEY: &str = "__key_index__";

/// Keyring-based secure storage implementation
///
/// - macOS: Keychain
/// - Windows: Credential Manager (DPAPI)
/// - Linux: Secret Service (libsecret)
pub struct KeyringSecureStore {
    service_name: String,
    // Serializes read-modify-write of the key index
    index_lock: Mutex<()>,
}

impl KeyringSecureStore {
    pub fn new() -> Self {
        Self::with_service_name("offline-media-core")
    }

    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            index_lock: Mutex::new(()),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service_name, key).map_err(map_keyring_error)
    }

    fn read_raw(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(map_keyring_error(e)),
        }
    }

    fn delete_raw(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(map_keyring_error(e)),
        }
    }

    fn read_index(&self) -> Result<BTreeSet<String>> {
        match self.read_raw(INDEX_KEY)? {
            Some(raw) => serde_json::from_str(&raw).or_else(|e| {
                warn!(error = %e, "Discarding unreadable keyring index");
                Ok(BTreeSet::new())
            }),
            None => Ok(BTreeSet::new()),
        }
    }

    fn write_index(&self, index: &BTreeSet<String>) -> Result<()> {
        let raw = serde_json::to_string(index)
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to encode index: {}", e)))?;
        self.entry(INDEX_KEY)?
            .set_password(&raw)
            .map_err(map_keyring_error)
    }
}

fn map_keyring_error(e: keyring::Error) -> BridgeError {
    BridgeError::OperationFailed(format!("Keyring error: {}", e))
}

impl Default for KeyringSecureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        if key == INDEX_KEY {
            return Err(BridgeError::OperationFailed(format!("{} is reserved", INDEX_KEY)));
        }

        // Keyring only supports strings
        let encoded = STANDARD.encode(value);
        self.entry(key)?
            .set_password(&encoded)
            .map_err(map_keyring_error)?;

        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index()?;
        if index.insert(key.to_string()) {
            self.write_index(&index)?;
        }

        debug!(key = key, "Stored secret in keyring");
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(encoded) = self.read_raw(key)? else {
            debug!(key = key, "Secret not found in keyring");
            return Ok(None);
        };

        let decoded = STANDARD.decode(&encoded).map_err(|e| {
            error!(key = key, error = %e, "Failed to decode secret");
            BridgeError::OperationFailed(format!("Failed to decode secret: {}", e))
        })?;
        Ok(Some(decoded))
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        self.delete_raw(key)?;

        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index()?;
        if index.remove(key) {
            self.write_index(&index)?;
        }

        debug!(key = key, "Deleted secret from keyring");
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let _guard = self.index_lock.lock().await;
        Ok(self.read_index()?.into_iter().collect())
    }

    async fn clear_all(&self) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        for key in self.read_index()? {
            self.delete_raw(&key)?;
        }
        self.delete_raw(INDEX_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service_name() {
        let store = KeyringSecureStore::new();
        assert_eq!(store.service_name, "offline-media-core");
    }

    #[tokio::test]
    async fn test_reserved_key_is_rejected() {
        let store = KeyringSecureStore::with_service_name("test-offline-media-core");
        assert!(store.set_secret(INDEX_KEY, b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_set_list_and_delete_secret() {
        // Headless CI machines usually have no secret service
        let store = KeyringSecureStore::with_service_name("test-offline-media-core");
        let key = "offline_license:test-user:movie-1";

        if let Err(e) = store.set_secret(key, b"keyset-bytes").await {
            println!("Keyring not available ({}), skipping test", e);
            return;
        }

        match store.get_secret(key).await {
            Ok(Some(value)) => assert_eq!(value, b"keyset-bytes".to_vec()),
            other => println!("Keyring read inconsistent on this system: {:?}", other),
        }

        if let Ok(keys) = store.list_keys().await {
            assert!(keys.contains(&key.to_string()));
        }

        let _ = store.clear_all().await;
    }
}
