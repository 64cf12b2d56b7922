//! # Offline Playback Module
//!
//! Plays completed downloads through the platform player on a secure surface.
//!
//! ## Overview
//!
//! This module handles:
//! - Device eligibility for hardware-secure DRM playback
//! - The single playback session and its surface handshake
//! - Fail-fast detection of video blocked by the secure output path
//! - Classification of player errors into host-facing failure reasons

pub mod eligibility;
pub mod error;
pub mod session;

pub use eligibility::{CapabilityResult, EligibilityChecker};
pub use error::{
    classify_player_error, ErrorClassification, FailureReason, PlaybackError, Result,
};
pub use session::{
    OfflineContentSource, PendingStart, PlaybackSession, PlaybackSessionManager, SessionState,
};
