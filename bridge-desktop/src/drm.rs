//! DRM probe for desktop hosts
//!
//! Desktop builds ship no hardware content decryption module. Only ClearKey
//! is reported, at software security level, and no decoder claims secure
//! output, so protected offline playback is always ineligible here.

use async_trait::async_trait;
use bridge_traits::{
    drm::{DrmProbe, DrmScheme, SecurityLevel},
    error::Result,
};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct DesktopDrmProbe;

impl DesktopDrmProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DrmProbe for DesktopDrmProbe {
    async fn is_scheme_supported(&self, scheme: DrmScheme) -> Result<bool> {
        let supported = matches!(scheme, DrmScheme::ClearKey);
        debug!(scheme = %scheme, supported, "Probed DRM scheme");
        Ok(supported)
    }

    async fn security_level(&self, scheme: DrmScheme) -> Result<SecurityLevel> {
        Ok(match scheme {
            DrmScheme::ClearKey => SecurityLevel::L3,
            _ => SecurityLevel::Unknown,
        })
    }

    async fn secure_decoders(&self, _mime_type: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_desktop_probe_reports_software_only() {
        let probe = DesktopDrmProbe::new();
        assert!(!probe.is_scheme_supported(DrmScheme::Widevine).await.unwrap());
        assert!(probe.is_scheme_supported(DrmScheme::ClearKey).await.unwrap());
        assert_eq!(
            probe.security_level(DrmScheme::ClearKey).await.unwrap(),
            SecurityLevel::L3
        );
        assert!(probe.secure_decoders("video/avc").await.unwrap().is_empty());
    }
}
