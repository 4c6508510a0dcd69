use async_trait::async_trait;
use serde::Deserialize;
use palisade_common::{PalisadeError, ProvidersConfig, Secret};

use super::{IntelProvider, ProviderReport};

/// Token-gated provider exposing per-address privacy flags.
pub struct PrivacyProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<Secret<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct PrivacyFlags {
    #[serde(default)]
    vpn: bool,
    #[serde(default)]
    proxy: bool,
    #[serde(default)]
    tor: bool,
    #[serde(default)]
    relay: bool,
    #[serde(default)]
    hosting: bool,
}

#[derive(Debug, Deserialize)]
struct PrivacyResponse {
    #[serde(default)]
    privacy: Option<PrivacyFlags>,
    #[serde(default)]
    country: Option<String>,
}

impl PrivacyProvider {
    pub const CONFIDENCE: u8 = 90;

    pub fn new(config: &ProvidersConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: config.privacy_url.clone(),
            token: config.privacy_token.clone(),
        }
    }
}

#[async_trait]
impl IntelProvider for PrivacyProvider {
    fn name(&self) -> &'static str {
        "privacy"
    }

    fn priority(&self) -> u8 {
        5
    }

    fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    async fn fetch(&self, address: &str) -> Result<serde_json::Value, PalisadeError> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| PalisadeError::Provider("privacy provider has no token".into()))?;
        let url = format!("{}/{}/privacy", self.base_url.trim_end_matches('/'), address);
        let response = self
            .client
            .get(&url)
            .query(&[("token", token.expose_secret())])
            .send()
            .await
            .map_err(|e| PalisadeError::Provider(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PalisadeError::Provider(format!(
                "{} returned {}",
                self.name(),
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| PalisadeError::Provider(e.to_string()))
    }

    fn interpret(&self, address: &str, raw: &serde_json::Value) -> Option<ProviderReport> {
        let response: PrivacyResponse = serde_json::from_value(raw.clone()).ok()?;
        let flags = response.privacy.unwrap_or_default();
        Some(ProviderReport {
            address: address.to_owned(),
            // A relay is treated as a proxy
            is_proxy: flags.proxy || flags.relay,
            is_vpn: flags.vpn,
            is_tor: flags.tor,
            is_hosting: flags.hosting,
            confidence: Self::CONFIDENCE,
            country: response.country,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(token: Option<&str>) -> PrivacyProvider {
        let mut config = ProvidersConfig::default();
        config.privacy_token = token.map(|t| Secret::new(t.to_owned()));
        PrivacyProvider::new(&config, reqwest::Client::new())
    }

    #[test]
    fn test_enabled_only_with_token() {
        assert!(!provider(None).is_enabled());
        assert!(provider(Some("t")).is_enabled());
    }

    #[test]
    fn test_relay_counts_as_proxy() {
        let raw = serde_json::json!({"privacy": {"relay": true}});
        let report = provider(Some("t")).interpret("203.0.113.7", &raw).unwrap();
        assert!(report.is_proxy);
        assert!(!report.is_vpn);
        assert_eq!(report.confidence, 90);
    }

    #[test]
    fn test_absent_fields_default_to_false() {
        let raw = serde_json::json!({});
        let report = provider(Some("t")).interpret("203.0.113.7", &raw).unwrap();
        assert!(!report.has_positive_indicator());
        assert!(report.country.is_none());
    }

    #[test]
    fn test_all_flags_map_through() {
        let raw = serde_json::json!({
            "privacy": {"vpn": true, "proxy": false, "tor": true, "relay": false, "hosting": true},
            "country": "NL"
        });
        let report = provider(Some("t")).interpret("203.0.113.7", &raw).unwrap();
        assert!(report.is_vpn && report.is_tor && report.is_hosting);
        assert!(!report.is_proxy);
        assert_eq!(report.country.as_deref(), Some("NL"));
    }
}
