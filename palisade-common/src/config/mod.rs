mod defaults;

use defaults::*;
use serde::{Deserialize, Serialize};

use crate::{PalisadeError, Secret};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitSettings {
    #[serde(default = "_default_rate_limit")]
    pub limit: u32,

    #[serde(default = "_default_rate_limit_window_seconds")]
    pub window_seconds: u64,

    #[serde(default = "_default_false")]
    pub sliding: bool,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        RateLimitSettings {
            limit: _default_rate_limit(),
            window_seconds: _default_rate_limit_window_seconds(),
            sliding: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AbuseDetectionConfig {
    #[serde(default = "_default_true")]
    pub enabled: bool,

    #[serde(default = "_default_burst_threshold")]
    pub burst_threshold: u32,

    #[serde(default = "_default_burst_window_seconds")]
    pub burst_window_seconds: u64,

    #[serde(default = "_default_burst_multiplier")]
    pub burst_multiplier: f64,

    #[serde(default = "_default_auto_ban_seconds")]
    pub auto_ban_seconds: u64,
}

impl Default for AbuseDetectionConfig {
    fn default() -> Self {
        AbuseDetectionConfig {
            enabled: true,
            burst_threshold: _default_burst_threshold(),
            burst_window_seconds: _default_burst_window_seconds(),
            burst_multiplier: _default_burst_multiplier(),
            auto_ban_seconds: _default_auto_ban_seconds(),
        }
    }
}

/// Startup defaults for geo-blocking. The settings registry is
/// authoritative at runtime.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct GeoBlockingConfig {
    #[serde(default = "_default_false")]
    pub enabled: bool,

    #[serde(default)]
    pub blocked_countries: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReputationConfig {
    #[serde(default = "_default_ip_ttl_seconds")]
    pub ip_ttl_seconds: u64,

    #[serde(default = "_default_asn_ttl_seconds")]
    pub asn_ttl_seconds: u64,

    #[serde(default = "_default_provider_cache_ttl_seconds")]
    pub provider_cache_ttl_seconds: u64,

    #[serde(default = "_default_true")]
    pub tor_detection: bool,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        ReputationConfig {
            ip_ttl_seconds: _default_ip_ttl_seconds(),
            asn_ttl_seconds: _default_asn_ttl_seconds(),
            provider_cache_ttl_seconds: _default_provider_cache_ttl_seconds(),
            tor_detection: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TorListConfig {
    #[serde(default = "_default_true")]
    pub enabled: bool,

    #[serde(default = "_default_tor_list_url")]
    pub url: String,

    #[serde(default = "_default_tor_interval_seconds")]
    pub interval_seconds: u64,

    #[serde(default = "_default_tor_fetch_timeout_seconds")]
    pub fetch_timeout_seconds: u64,

    #[serde(default = "_default_true")]
    pub fetch_on_startup: bool,
}

impl Default for TorListConfig {
    fn default() -> Self {
        TorListConfig {
            enabled: true,
            url: _default_tor_list_url(),
            interval_seconds: _default_tor_interval_seconds(),
            fetch_timeout_seconds: _default_tor_fetch_timeout_seconds(),
            fetch_on_startup: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    #[serde(default = "_default_provider_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "_default_free_asn_url")]
    pub free_asn_url: String,

    #[serde(default = "_default_privacy_url")]
    pub privacy_url: String,

    #[serde(default)]
    pub privacy_token: Option<Secret<String>>,

    #[serde(default = "_default_abuse_url")]
    pub abuse_url: String,

    #[serde(default)]
    pub abuse_api_key: Option<Secret<String>>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            timeout_ms: _default_provider_timeout_ms(),
            free_asn_url: _default_free_asn_url(),
            privacy_url: _default_privacy_url(),
            privacy_token: None,
            abuse_url: _default_abuse_url(),
            abuse_api_key: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetentionConfig {
    #[serde(default = "_default_request_log_days")]
    pub request_log_days: u32,

    #[serde(default = "_default_stats_days")]
    pub stats_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        RetentionConfig {
            request_log_days: _default_request_log_days(),
            stats_days: _default_stats_days(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PalisadeConfig {
    #[serde(default = "_default_database_url")]
    pub database_url: Secret<String>,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub abuse: AbuseDetectionConfig,

    #[serde(default)]
    pub geo: GeoBlockingConfig,

    #[serde(default)]
    pub reputation: ReputationConfig,

    #[serde(default)]
    pub tor_list: TorListConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default = "_default_false")]
    pub log_all_requests: bool,

    #[serde(default)]
    pub retention: RetentionConfig,
}

impl Default for PalisadeConfig {
    fn default() -> Self {
        PalisadeConfig {
            database_url: _default_database_url(),
            rate_limit: Default::default(),
            abuse: Default::default(),
            geo: Default::default(),
            reputation: Default::default(),
            tor_list: Default::default(),
            providers: Default::default(),
            log_all_requests: false,
            retention: Default::default(),
        }
    }
}

impl PalisadeConfig {
    pub fn validate(&self) -> Result<(), PalisadeError> {
        if self.rate_limit.limit < 1 {
            return Err(PalisadeError::Validation(
                "rate_limit.limit must be at least 1".into(),
            ));
        }
        if self.rate_limit.window_seconds < 1 {
            return Err(PalisadeError::Validation(
                "rate_limit.window_seconds must be at least 1".into(),
            ));
        }
        if self.abuse.burst_window_seconds < 1 {
            return Err(PalisadeError::Validation(
                "abuse.burst_window_seconds must be at least 1".into(),
            ));
        }
        for code in &self.geo.blocked_countries {
            if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(PalisadeError::Validation(format!(
                    "invalid country code in geo.blocked_countries: {code:?}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PalisadeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.abuse.burst_threshold, 50);
        assert_eq!(config.abuse.burst_window_seconds, 10);
        assert_eq!(config.abuse.auto_ban_seconds, 3600);
        assert_eq!(config.reputation.ip_ttl_seconds, 3600);
        assert_eq!(config.providers.timeout_ms, 5000);
    }

    #[test]
    fn test_empty_document_deserializes_with_defaults() {
        let config: PalisadeConfig = serde_json::from_str("{}").unwrap();
        assert!(!config.log_all_requests);
        assert!(config.tor_list.enabled);
    }

    #[test]
    fn test_bad_country_code_rejected() {
        let mut config = PalisadeConfig::default();
        config.geo.blocked_countries = vec!["CHN".into()];
        assert!(config.validate().is_err());
    }
}
