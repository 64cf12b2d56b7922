//! # Offline Downloads Module
//!
//! Tracks offline downloads from request to removal.
//!
//! ## Components
//!
//! - **Metadata Store** (`metadata_store`): Per-user JSON records in the host settings store
//! - **License Record Store** (`license_store`): Keyset handles in the platform secure store
//! - **Download Orchestrator** (`orchestrator`): The per-item state machine over the backend
//! - **Progress Reporter** (`progress`): Polling fallback for missed backend callbacks
//! - **Expiry Sweeper** (`expiry`): Removes completed downloads past their TTL

pub mod error;
pub mod expiry;
pub mod license_store;
pub mod metadata_store;
pub mod models;
pub mod orchestrator;
pub mod progress;

pub use error::{DownloadError, Result};
pub use expiry::ExpirySweeper;
pub use license_store::LicenseStore;
pub use metadata_store::MetadataStore;
pub use models::{
    BackendTransition, ContentId, DownloadRecord, DownloadRequest, DownloadState, LicenseRecord,
    StopReason, TransitionSource,
};
pub use orchestrator::{DownloadOrchestrator, UNTRACKED_BY_BACKEND};
pub use progress::ProgressReporter;
