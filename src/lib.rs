//! Workspace umbrella crate.
//!
//! Host applications can depend on `offline-media-workspace` and enable the
//! `desktop-shims` feature instead of wiring
//! each workspace crate individually. The service façade is re-exported at the
//! crate root when that feature pulls in `core-service`.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
