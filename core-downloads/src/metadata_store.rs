//! Durable Download Metadata
//!
//! One JSON document per `(user, content)` pair in the host `SettingsStore`,
//! under `offline_meta:<userId>:<contentId>`. The user id has `:` and `%`
//! escaped, so keys of different users never collide and several users can
//! share one settings database.
//!
//! Corrupted documents are deleted on read and reported to the caller, the
//! same way unreadable credentials are handled elsewhere in the workspace.

use crate::error::{DownloadError, Result};
use crate::models::{user_key_component, ContentId, DownloadRecord};
use bridge_traits::storage::SettingsStore;
use std::sync::Arc;
use tracing::{debug, warn};

const KEY_PREFIX: &str = "offline_meta";

#[derive(Clone)]
pub struct MetadataStore {
    settings: Arc<dyn SettingsStore>,
    user_id: String,
}

impl MetadataStore {
    pub fn new(settings: Arc<dyn SettingsStore>, user_id: impl Into<String>) -> Self {
        Self {
            settings,
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn key_prefix(&self) -> String {
        format!("{}:{}:", KEY_PREFIX, user_key_component(&self.user_id))
    }

    fn storage_key(&self, content_id: &ContentId) -> String {
        format!("{}{}", self.key_prefix(), content_id)
    }

    /// Insert or overwrite the record.
    pub async fn save(&self, record: &DownloadRecord) -> Result<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| DownloadError::Serialization(e.to_string()))?;

        self.settings
            .set_string(&self.storage_key(&record.content_id), &json)
            .await
            .map_err(|e| {
                warn!(
                    content_id = %record.content_id,
                    error = %e,
                    "Failed to persist download metadata"
                );
                DownloadError::storage("metadata write", e)
            })
    }

    pub async fn load(&self, content_id: &ContentId) -> Result<Option<DownloadRecord>> {
        let key = self.storage_key(content_id);
        let raw = self
            .settings
            .get_string(&key)
            .await
            .map_err(|e| DownloadError::storage("metadata read", e))?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(
                    content_id = %content_id,
                    error = %e,
                    "Download metadata is corrupted, discarding"
                );
                if let Err(delete_err) = self.settings.delete(&key).await {
                    warn!(error = %delete_err, "Failed to delete corrupted metadata");
                }
                Err(DownloadError::Corrupted {
                    content_id: content_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Every readable record of this user. Corrupted entries are dropped.
    pub async fn load_all(&self) -> Result<Vec<DownloadRecord>> {
        let prefix = self.key_prefix();
        let keys = self
            .settings
            .list_keys()
            .await
            .map_err(|e| DownloadError::storage("metadata list", e))?;

        let mut records = Vec::new();
        for key in keys {
            let Some(id) = key.strip_prefix(&prefix) else {
                continue;
            };
            match self.load(&ContentId::new(id)).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(DownloadError::Corrupted { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        debug!(user_id = %self.user_id, count = records.len(), "Loaded download metadata");
        Ok(records)
    }

    pub async fn delete(&self, content_id: &ContentId) -> Result<()> {
        self.settings
            .delete(&self.storage_key(content_id))
            .await
            .map_err(|e| DownloadError::storage("metadata delete", e))
    }
}
