//! # Playback Error Types
//!
//! Errors returned by the playback session manager, plus the mapping from
//! platform player error codes to host-facing failure reasons.

use bridge_traits::error::BridgeError;
use bridge_traits::player::PlayerErrorCode;
use core_downloads::DownloadError;
use std::fmt;
use thiserror::Error;

/// Errors that can occur during playback operations.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Source Errors
    // ========================================================================
    /// A source was built but it would reach the network.
    #[error("Refusing network-backed source for {0}")]
    NetworkSourceRejected(String),

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// The player was released by `teardown`.
    #[error("Player has been released")]
    Released,

    /// No surface host is configured.
    #[error("No surface host configured")]
    SurfaceHostMissing,

    // ========================================================================
    // Collaborator Errors
    // ========================================================================
    #[error("Player error: {0}")]
    Player(#[from] BridgeError),

    #[error("Download store error: {0}")]
    Downloads(#[from] DownloadError),
}

pub type Result<T> = std::result::Result<T, PlaybackError>;

/// Reason attached to terminal playback failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    NotDownloaded,
    IneligibleDevice,
    LicenseFailure,
    GenericPlaybackError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NotDownloaded => "not downloaded",
            FailureReason::IneligibleDevice => "ineligible device",
            FailureReason::LicenseFailure => "license failure",
            FailureReason::GenericPlaybackError => "generic playback error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a player error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorClassification {
    pub is_drm_error: bool,
    pub reason: FailureReason,
}

/// Map a player error code to a DRM flag and failure reason.
///
/// Every DRM code is a DRM error. Codes that say the device itself cannot
/// handle the scheme map to `IneligibleDevice`, the rest to `LicenseFailure`.
pub fn classify_player_error(code: PlayerErrorCode) -> ErrorClassification {
    use PlayerErrorCode::*;

    let (is_drm_error, reason) = match code {
        DrmSchemeUnsupported | DrmDeviceRevoked => (true, FailureReason::IneligibleDevice),
        DrmLicenseAcquisitionFailed
        | DrmLicenseExpired
        | DrmDisallowedOperation
        | DrmProvisioningFailed
        | DrmSystemError
        | DrmContentError => (true, FailureReason::LicenseFailure),
        SourceMissing => (false, FailureReason::NotDownloaded),
        DecoderInitFailed | DecodingFailed | SourceIo | Unspecified => {
            (false, FailureReason::GenericPlaybackError)
        }
    };
    ErrorClassification {
        is_drm_error,
        reason,
    }
}
