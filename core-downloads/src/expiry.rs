//! Expiry Sweeper
//!
//! Removes completed downloads whose retention window has passed. Runs only
//! when the host asks for it; there is no internal timer.

use crate::error::Result;
use crate::models::ContentId;
use crate::orchestrator::DownloadOrchestrator;
use bridge_traits::time::Clock;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct ExpirySweeper {
    orchestrator: Arc<DownloadOrchestrator>,
    clock: Arc<dyn Clock>,
}

impl ExpirySweeper {
    pub fn new(orchestrator: Arc<DownloadOrchestrator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            orchestrator,
            clock,
        }
    }

    /// Remove every record whose `expiry_at` lies strictly in the past.
    ///
    /// Returns the removed ids. A failed removal is logged and the sweep
    /// continues with the next record.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<Vec<ContentId>> {
        let now = self.clock.now();
        let expired: Vec<ContentId> = self
            .orchestrator
            .list_all()
            .await
            .into_iter()
            .filter(|record| record.is_expired(now))
            .map(|record| record.content_id)
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for content_id in expired {
            match self.orchestrator.remove(content_id.as_str()).await {
                Ok(true) => removed.push(content_id),
                Ok(false) => {}
                Err(e) => warn!(content_id = %content_id, error = %e, "Failed to remove expired download"),
            }
        }

        if !removed.is_empty() {
            info!(count = removed.len(), "Removed expired downloads");
        }
        Ok(removed)
    }
}
