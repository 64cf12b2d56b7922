//! Offline License Records
//!
//! Keyset handles are kept in the platform `SecureStore` under
//! `offline_license:<userId>:<contentId>`, with the user id escaped the same
//! way as metadata keys. Presence of a record means a license was acquired;
//! the handle itself is opaque and never logged.

use crate::error::{DownloadError, Result};
use crate::models::{user_key_component, ContentId, LicenseRecord};
use bridge_traits::storage::SecureStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

const KEY_PREFIX: &str = "offline_license";

#[derive(Clone)]
pub struct LicenseStore {
    secure_store: Arc<dyn SecureStore>,
    user_id: String,
}

impl LicenseStore {
    pub fn new(secure_store: Arc<dyn SecureStore>, user_id: impl Into<String>) -> Self {
        Self {
            secure_store,
            user_id: user_id.into(),
        }
    }

    fn storage_key(&self, content_id: &ContentId) -> String {
        format!(
            "{}:{}:{}",
            KEY_PREFIX,
            user_key_component(&self.user_id),
            content_id
        )
    }

    /// Store or replace the license for `record.content_id`.
    pub async fn store(&self, record: &LicenseRecord) -> Result<()> {
        let json =
            serde_json::to_vec(record).map_err(|e| DownloadError::Serialization(e.to_string()))?;

        self.secure_store
            .set_secret(&self.storage_key(&record.content_id), &json)
            .await
            .map_err(|e| {
                warn!(
                    content_id = %record.content_id,
                    error = %e,
                    "Failed to store license record"
                );
                DownloadError::storage("license write", e)
            })?;

        info!(content_id = %record.content_id, "License record stored");
        Ok(())
    }

    pub async fn retrieve(&self, content_id: &ContentId) -> Result<Option<LicenseRecord>> {
        let key = self.storage_key(content_id);
        let data = self
            .secure_store
            .get_secret(&key)
            .await
            .map_err(|e| DownloadError::storage("license read", e))?;

        let Some(data) = data else {
            debug!(content_id = %content_id, "No license record");
            return Ok(None);
        };

        match serde_json::from_slice(&data) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(content_id = %content_id, error = %e, "License record is corrupted");
                if let Err(delete_err) = self.secure_store.delete_secret(&key).await {
                    warn!(error = %delete_err, "Failed to delete corrupted license record");
                }
                Err(DownloadError::Corrupted {
                    content_id: content_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    pub async fn exists(&self, content_id: &ContentId) -> Result<bool> {
        self.secure_store
            .has_secret(&self.storage_key(content_id))
            .await
            .map_err(|e| DownloadError::storage("license lookup", e))
    }

    /// Deleting a missing record is not an error.
    pub async fn delete(&self, content_id: &ContentId) -> Result<()> {
        self.secure_store
            .delete_secret(&self.storage_key(content_id))
            .await
            .map_err(|e| DownloadError::storage("license delete", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::mock::InMemorySecureStore;
    use chrono::Utc;

    #[tokio::test]
    async fn test_store_retrieve_delete() {
        let secure = Arc::new(InMemorySecureStore::new());
        let store = LicenseStore::new(secure.clone(), "u1");
        let id = ContentId::new("m1");

        assert!(!store.exists(&id).await.unwrap());
        store
            .store(&LicenseRecord::new(id.clone(), vec![9, 8, 7], Utc::now()))
            .await
            .unwrap();

        assert!(secure.has_secret("offline_license:u1:m1").await.unwrap());
        let loaded = store.retrieve(&id).await.unwrap().unwrap();
        assert_eq!(loaded.keyset_handle, vec![9, 8, 7]);

        store.delete(&id).await.unwrap();
        assert!(store.retrieve(&id).await.unwrap().is_none());
        store.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_renewal_replaces_handle() {
        let store = LicenseStore::new(Arc::new(InMemorySecureStore::new()), "u1");
        let id = ContentId::new("m1");

        store
            .store(&LicenseRecord::new(id.clone(), vec![1], Utc::now()))
            .await
            .unwrap();
        store
            .store(&LicenseRecord::new(id.clone(), vec![2], Utc::now()))
            .await
            .unwrap();

        assert_eq!(store.retrieve(&id).await.unwrap().unwrap().keyset_handle, vec![2]);
    }

    #[tokio::test]
    async fn test_corrupted_license_is_removed() {
        let secure = Arc::new(InMemorySecureStore::new());
        secure
            .set_secret("offline_license:u1:m1", b"garbage")
            .await
            .unwrap();
        let store = LicenseStore::new(secure.clone(), "u1");

        let result = store.retrieve(&"m1".into()).await;
        assert!(matches!(result, Err(DownloadError::Corrupted { .. })));
        assert!(!secure.has_secret("offline_license:u1:m1").await.unwrap());
    }
}
