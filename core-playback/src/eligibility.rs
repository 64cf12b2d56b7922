//! Device Eligibility Checker
//!
//! Decides whether this device can play protected offline content through a
//! hardware-secure path. Results are computed on every call and never cached.

use bridge_traits::drm::{DrmProbe, DrmScheme, SecurityLevel};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Verdict of an eligibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityResult {
    pub eligible: bool,
    pub security_level: SecurityLevel,
    pub secure_decoder_count: usize,
    pub reason: String,
}

pub struct EligibilityChecker {
    probe: Arc<dyn DrmProbe>,
    scheme: DrmScheme,
    mime_types: Vec<String>,
}

impl EligibilityChecker {
    pub fn new(probe: Arc<dyn DrmProbe>, scheme: DrmScheme, mime_types: Vec<String>) -> Self {
        Self {
            probe,
            scheme,
            mime_types,
        }
    }

    pub fn scheme(&self) -> DrmScheme {
        self.scheme
    }

    /// Probe the platform and produce a verdict.
    ///
    /// Probe failures degrade to "unsupported", `Unknown` and zero decoders
    /// respectively; this never returns an error.
    #[instrument(skip(self), fields(scheme = %self.scheme))]
    pub async fn check_eligibility(&self) -> CapabilityResult {
        let supported = match self.probe.is_scheme_supported(self.scheme).await {
            Ok(supported) => supported,
            Err(e) => {
                warn!(error = %e, "DRM scheme probe failed");
                false
            }
        };

        let security_level = if supported {
            match self.probe.security_level(self.scheme).await {
                Ok(level) => level,
                Err(e) => {
                    warn!(error = %e, "Security level probe failed");
                    SecurityLevel::Unknown
                }
            }
        } else {
            SecurityLevel::Unknown
        };

        let mut secure_decoder_count = 0;
        for mime_type in &self.mime_types {
            match self.probe.secure_decoders(mime_type).await {
                Ok(decoders) => secure_decoder_count += decoders.len(),
                Err(e) => warn!(mime_type = %mime_type, error = %e, "Secure decoder probe failed"),
            }
        }

        let eligible = supported && security_level == SecurityLevel::L1 && secure_decoder_count > 0;
        let reason = select_reason(
            self.scheme,
            supported,
            security_level,
            secure_decoder_count,
            eligible,
        );

        debug!(
            eligible,
            level = security_level.as_str(),
            secure_decoder_count,
            "Eligibility checked"
        );
        CapabilityResult {
            eligible,
            security_level,
            secure_decoder_count,
            reason,
        }
    }
}

fn select_reason(
    scheme: DrmScheme,
    supported: bool,
    level: SecurityLevel,
    secure_decoders: usize,
    eligible: bool,
) -> String {
    if !supported {
        format!("DRM scheme {} is not supported on this device", scheme)
    } else if level == SecurityLevel::L3 {
        "Device only supports software DRM (L3)".to_string()
    } else if level == SecurityLevel::L2 {
        "Device supports only partial hardware DRM (L2)".to_string()
    } else if secure_decoders == 0 {
        "No secure hardware decoder available".to_string()
    } else if !eligible {
        "Device is not eligible for protected offline playback".to_string()
    } else {
        "Device supports hardware-secure DRM playback (L1)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use mockall::mock;
    use mockall::predicate::eq;

    mock! {
        pub Probe {}

        #[async_trait]
        impl DrmProbe for Probe {
            async fn is_scheme_supported(&self, scheme: DrmScheme) -> BridgeResult<bool>;
            async fn security_level(&self, scheme: DrmScheme) -> BridgeResult<SecurityLevel>;
            async fn secure_decoders(&self, mime_type: &str) -> BridgeResult<Vec<String>>;
        }
    }

    fn mime_types() -> Vec<String> {
        vec!["video/avc".to_string(), "video/hevc".to_string()]
    }

    fn probe(supported: bool, level: SecurityLevel, avc: usize) -> MockProbe {
        let mut probe = MockProbe::new();
        probe
            .expect_is_scheme_supported()
            .with(eq(DrmScheme::Widevine))
            .returning(move |_| Ok(supported));
        probe.expect_security_level().returning(move |_| Ok(level));
        probe.expect_secure_decoders().returning(move |mime| {
            if mime == "video/avc" {
                Ok((0..avc).map(|i| format!("decoder.avc.secure.{}", i)).collect())
            } else {
                Ok(Vec::new())
            }
        });
        probe
    }

    async fn check(probe: MockProbe) -> CapabilityResult {
        EligibilityChecker::new(Arc::new(probe), DrmScheme::Widevine, mime_types())
            .check_eligibility()
            .await
    }

    #[tokio::test]
    async fn test_l1_with_secure_decoder_is_eligible() {
        let result = check(probe(true, SecurityLevel::L1, 1)).await;
        assert!(result.eligible);
        assert_eq!(result.security_level, SecurityLevel::L1);
        assert_eq!(result.secure_decoder_count, 1);
        assert!(result.reason.contains("L1"));
    }

    #[tokio::test]
    async fn test_l3_is_ineligible() {
        let result = check(probe(true, SecurityLevel::L3, 0)).await;
        assert!(!result.eligible);
        assert_eq!(result.secure_decoder_count, 0);
        assert!(result.reason.contains("L3"));
    }

    #[tokio::test]
    async fn test_unsupported_scheme_takes_priority() {
        let mut probe = MockProbe::new();
        probe.expect_is_scheme_supported().returning(|_| Ok(false));
        probe.expect_security_level().never();
        probe.expect_secure_decoders().returning(|_| Ok(Vec::new()));

        let result = check(probe).await;
        assert!(!result.eligible);
        assert_eq!(result.security_level, SecurityLevel::Unknown);
        assert!(result.reason.contains("widevine is not supported"));
    }

    #[tokio::test]
    async fn test_l2_reason_precedes_missing_decoders() {
        let result = check(probe(true, SecurityLevel::L2, 0)).await;
        assert!(!result.eligible);
        assert!(result.reason.contains("L2"));
    }

    #[tokio::test]
    async fn test_l1_without_secure_decoder() {
        let result = check(probe(true, SecurityLevel::L1, 0)).await;
        assert!(!result.eligible);
        assert_eq!(result.reason, "No secure hardware decoder available");
    }

    #[tokio::test]
    async fn test_unknown_level_is_generic_ineligible() {
        let result = check(probe(true, SecurityLevel::Unknown, 2)).await;
        assert!(!result.eligible);
        assert_eq!(result.secure_decoder_count, 2);
        assert_eq!(
            result.reason,
            "Device is not eligible for protected offline playback"
        );
    }

    #[tokio::test]
    async fn test_probe_failures_degrade() {
        let mut probe = MockProbe::new();
        probe
            .expect_is_scheme_supported()
            .returning(|_| Err(BridgeError::OperationFailed("drm service down".into())));
        probe
            .expect_secure_decoders()
            .returning(|_| Err(BridgeError::OperationFailed("codec list".into())));

        let result = check(probe).await;
        assert!(!result.eligible);
        assert_eq!(result.security_level, SecurityLevel::Unknown);
        assert_eq!(result.secure_decoder_count, 0);
    }

    #[tokio::test]
    async fn test_result_serializes_camel_case() {
        let result = check(probe(true, SecurityLevel::L1, 1)).await;
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["securityLevel"], "L1");
        assert_eq!(json["secureDecoderCount"], 1);
    }
}
