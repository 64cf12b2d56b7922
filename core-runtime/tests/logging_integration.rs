//! Integration tests for logging system

use bridge_traits::time::LogLevel;
use core_runtime::logging::{redact_if_sensitive, strip_path, LogFormat, LoggingConfig};

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_pii_redaction(false)
        .with_spans(false)
        .with_target(false)
        .with_thread_info(true);

    assert_eq!(config.format, LogFormat::Compact);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(!config.redact_pii);
    assert!(!config.enable_spans);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
}

#[test]
fn test_redaction_of_license_and_auth_fields() {
    for field in ["keyset_handle", "license_handle", "auth_context", "refresh_token"] {
        assert_eq!(redact_if_sensitive(field, "value"), "[REDACTED]", "{field}");
    }
}

#[test]
fn test_redaction_keeps_download_fields() {
    assert_eq!(redact_if_sensitive("content_id", "movie-42"), "movie-42");
    assert_eq!(redact_if_sensitive("bytes_downloaded", "1024"), "1024");
    assert_eq!(redact_if_sensitive("user_id", "user_123"), "user_123");
}

#[test]
fn test_email_is_partially_redacted() {
    let redacted = redact_if_sensitive("owner", "viewer@example.com");
    assert!(redacted.starts_with('v'));
    assert!(!redacted.contains("example.com"));
}

#[test]
fn test_path_stripping() {
    assert_eq!(strip_path("/var/cache/offline-downloads/u1/index.mpd"), "index.mpd");
    assert_eq!(strip_path("D:\\cache\\offline-downloads\\u1\\seg.m4s"), "seg.m4s");
    assert_eq!(strip_path(""), "");
}

#[test]
fn test_format_selection() {
    let config = LoggingConfig::default();

    #[cfg(debug_assertions)]
    assert_eq!(config.format, LogFormat::Pretty);

    #[cfg(not(debug_assertions))]
    assert_eq!(config.format, LogFormat::Json);
}
