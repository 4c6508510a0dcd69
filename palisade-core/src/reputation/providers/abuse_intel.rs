use async_trait::async_trait;
use serde::Deserialize;
use palisade_common::{PalisadeError, ProvidersConfig, Secret};

use super::{IntelProvider, ProviderReport};

/// Key-gated abuse-reputation provider. Classification is derived from
/// the reported usage type plus the 0..100 abuse-confidence score.
pub struct AbuseIntelProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<Secret<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AbuseIntelData {
    #[serde(default)]
    usage_type: Option<String>,
    #[serde(default)]
    abuse_confidence_score: Option<u8>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    isp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AbuseIntelResponse {
    #[serde(default)]
    data: Option<AbuseIntelData>,
}

impl AbuseIntelProvider {
    /// A score at or above this marks the address as an abusive proxy.
    const PROXY_SCORE_THRESHOLD: u8 = 75;

    pub fn new(config: &ProvidersConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: config.abuse_url.clone(),
            api_key: config.abuse_api_key.clone(),
        }
    }
}

#[async_trait]
impl IntelProvider for AbuseIntelProvider {
    fn name(&self) -> &'static str {
        "abuse_intel"
    }

    fn priority(&self) -> u8 {
        8
    }

    fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    async fn fetch(&self, address: &str) -> Result<serde_json::Value, PalisadeError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| PalisadeError::Provider("abuse provider has no API key".into()))?;
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("ipAddress", address)])
            .header("Key", api_key.expose_secret())
            .header("Accept", "application/json")
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
        let response: AbuseIntelResponse = serde_json::from_value(raw.clone()).ok()?;
        let data = response.data.unwrap_or_default();
        let usage = data.usage_type.as_deref().unwrap_or("").to_ascii_lowercase();
        let score = data.abuse_confidence_score.unwrap_or(0);

        Some(ProviderReport {
            address: address.to_owned(),
            is_hosting: usage.contains("data center") || usage.contains("hosting"),
            is_vpn: usage.contains("vpn"),
            is_proxy: score >= Self::PROXY_SCORE_THRESHOLD,
            confidence: score.saturating_add(50).min(100),
            country: data.country_code,
            asn_org: data.isp,
            ..Default::default()
        })
    }
}
