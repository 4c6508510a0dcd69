use async_trait::async_trait;
use serde::Deserialize;
use palisade_common::{PalisadeError, ProvidersConfig};

use super::{IntelProvider, ProviderReport};

/// Keyless ASN lookup. Carries no proxy/VPN verdicts of its own; the
/// classification pipeline combines its ASN answer with the local ASN
/// intelligence table.
pub struct FreeAsnProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct FreeAsnResponse {
    /// `"AS<digits> <org name>"`
    #[serde(rename = "as", default)]
    r#as: Option<String>,
    #[serde(default)]
    org: Option<String>,
    #[serde(default)]
    isp: Option<String>,
    #[serde(default, rename = "countryCode")]
    country_code: Option<String>,
}

impl FreeAsnProvider {
    pub const CONFIDENCE: u8 = 75;

    pub fn new(config: &ProvidersConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: config.free_asn_url.clone(),
        }
    }
}

#[async_trait]
impl IntelProvider for FreeAsnProvider {
    fn name(&self) -> &'static str {
        "free_asn"
    }

    fn priority(&self) -> u8 {
        10
    }

    fn is_enabled(&self) -> bool {
        true
    }

    async fn fetch(&self, address: &str) -> Result<serde_json::Value, PalisadeError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), address);
        let response = self
            .client
            .get(&url)
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
        let response: FreeAsnResponse = serde_json::from_value(raw.clone()).ok()?;
        let (asn, parsed_org) = response
            .r#as
            .as_deref()
            .and_then(parse_as_field)
            .map(|(asn, org)| (Some(asn), org))
            .unwrap_or((None, None));
        asn?;

        Some(ProviderReport {
            address: address.to_owned(),
            confidence: Self::CONFIDENCE,
            asn,
            asn_org: response.org.or(parsed_org).or(response.isp),
            country: response.country_code,
            ..Default::default()
        })
    }
}

/// Splits `"AS16509 Amazon.com, Inc."` into the number and the org name.
fn parse_as_field(value: &str) -> Option<(i64, Option<String>)> {
    let value = value.trim();
    let rest = value.strip_prefix("AS")?;
    let digits_end = rest.find(' ').unwrap_or(rest.len());
    let asn = rest[..digits_end].parse::<i64>().ok()?;
    let org = rest[digits_end..].trim();
    Some((asn, (!org.is_empty()).then(|| org.to_owned())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> FreeAsnProvider {
        FreeAsnProvider::new(&ProvidersConfig::default(), reqwest::Client::new())
    }

    #[test]
    fn test_parse_as_field() {
        assert_eq!(
            parse_as_field("AS16509 Amazon.com, Inc."),
            Some((16509, Some("Amazon.com, Inc.".to_owned())))
        );
        assert_eq!(parse_as_field("AS13335"), Some((13335, None)));
        assert_eq!(parse_as_field("16509 Amazon"), None);
        assert_eq!(parse_as_field("ASx"), None);
    }

    #[test]
    fn test_interpret_full_response() {
        let raw = serde_json::json!({
            "as": "AS16509 Amazon.com, Inc.",
            "org": "AWS EC2",
            "isp": "Amazon.com",
            "countryCode": "US"
        });
        let report = provider().interpret("203.0.113.7", &raw).unwrap();
        assert_eq!(report.asn, Some(16509));
        assert_eq!(report.asn_org.as_deref(), Some("AWS EC2"));
        assert_eq!(report.country.as_deref(), Some("US"));
        assert_eq!(report.confidence, 75);
        assert!(!report.has_positive_indicator());
    }

    #[test]
    fn test_interpret_without_asn_yields_nothing() {
        assert!(provider()
            .interpret("203.0.113.7", &serde_json::json!({"status": "fail"}))
            .is_none());
    }
}
