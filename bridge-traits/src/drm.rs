//! DRM capability probing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::Result;

/// Content protection scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrmScheme {
    Widevine,
    PlayReady,
    ClearKey,
}

impl DrmScheme {
    /// DASH/CENC system id.
    pub fn system_id(&self) -> Uuid {
        match self {
            DrmScheme::Widevine => Uuid::from_u128(0xedef8ba9_79d6_4ace_a3c8_27dcd51d21ed),
            DrmScheme::PlayReady => Uuid::from_u128(0x9a04f079_9840_4286_ab92_e65be0885f95),
            DrmScheme::ClearKey => Uuid::from_u128(0xe2719d58_a985_b3c9_781a_b030af78d30e),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DrmScheme::Widevine => "widevine",
            DrmScheme::PlayReady => "playready",
            DrmScheme::ClearKey => "clearkey",
        }
    }
}

impl fmt::Display for DrmScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Security level of the DRM implementation.
///
/// `L1` means decode and output happen in a trusted environment, `L3` is
/// software only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityLevel {
    L1,
    L2,
    L3,
    Unknown,
}

impl SecurityLevel {
    /// Parse the level string a platform DRM plugin reports.
    pub fn from_platform(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "L1" => SecurityLevel::L1,
            "L2" => SecurityLevel::L2,
            "L3" => SecurityLevel::L3,
            _ => SecurityLevel::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::L1 => "L1",
            SecurityLevel::L2 => "L2",
            SecurityLevel::L3 => "L3",
            SecurityLevel::Unknown => "unknown",
        }
    }
}

/// Platform DRM and codec capability probe.
#[async_trait]
pub trait DrmProbe: Send + Sync {
    async fn is_scheme_supported(&self, scheme: DrmScheme) -> Result<bool>;

    async fn security_level(&self, scheme: DrmScheme) -> Result<SecurityLevel>;

    /// Names of decoders for `mime_type` that support secure playback.
    async fn secure_decoders(&self, mime_type: &str) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_platform_levels() {
        assert_eq!(SecurityLevel::from_platform("L1"), SecurityLevel::L1);
        assert_eq!(SecurityLevel::from_platform(" l3 "), SecurityLevel::L3);
        assert_eq!(SecurityLevel::from_platform("L9"), SecurityLevel::Unknown);
    }

    #[test]
    fn widevine_system_id() {
        assert_eq!(
            DrmScheme::Widevine.system_id().to_string(),
            "edef8ba9-79d6-4ace-a3c8-27dcd51d21ed"
        );
    }
}
