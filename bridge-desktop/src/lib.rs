//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `SettingsStore` using a SQLite-backed key-value table
//! - `SecureStore` using the `keyring` crate
//! - `FileSystemAccess` using `tokio::fs`
//! - `DownloadBackend` using `reqwest` with resumable transfers
//! - `DrmProbe` reporting the software-only desktop DRM surface
//!
//! Desktop hosts provide no player; a `PlayerBackend` must always be
//! injected by the embedding application.
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{HttpDownloadBackend, TokioFileSystem};
//!
//! #[tokio::main]
//! async fn main() {
//!     let downloads = HttpDownloadBackend::new().unwrap();
//!     let fs = TokioFileSystem::new();
//!
//!     // Use in core configuration
//! }
//! ```

mod download;
mod drm;
mod filesystem;
mod settings;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use download::{HttpDownloadBackend, TransferRetryPolicy};
pub use drm::DesktopDrmProbe;
pub use filesystem::TokioFileSystem;
pub use settings::SqliteSettingsStore;

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;
