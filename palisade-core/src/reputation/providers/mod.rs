mod abuse_intel;
mod free_asn;
mod privacy;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;
use palisade_common::{PalisadeError, ProvidersConfig};

pub use abuse_intel::AbuseIntelProvider;
pub use free_asn::FreeAsnProvider;
pub use privacy::PrivacyProvider;

/// Normalized result of one external-intelligence lookup. Fields absent
/// upstream map to `false` / `None`.
#[derive(Debug, Clone, Default)]
pub struct ProviderReport {
    pub address: String,
    pub is_proxy: bool,
    pub is_vpn: bool,
    pub is_tor: bool,
    pub is_hosting: bool,
    pub confidence: u8,
    pub asn: Option<i64>,
    pub asn_org: Option<String>,
    pub country: Option<String>,
}

impl ProviderReport {
    pub fn has_positive_indicator(&self) -> bool {
        self.is_proxy || self.is_vpn || self.is_tor || self.is_hosting
    }
}

/// One external intelligence source. `fetch` hits the network;
/// `interpret` normalizes a raw response and must also work on a
/// cached copy.
#[async_trait]
pub trait IntelProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lower runs earlier.
    fn priority(&self) -> u8;

    fn is_enabled(&self) -> bool;

    async fn fetch(&self, address: &str) -> Result<serde_json::Value, PalisadeError>;

    fn interpret(&self, address: &str, raw: &serde_json::Value) -> Option<ProviderReport>;
}

/// Statically composed adapter list, sorted by priority at startup.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn IntelProvider>>,
    timeout: Duration,
}

impl ProviderRegistry {
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let client = reqwest::Client::new();
        let providers: Vec<Arc<dyn IntelProvider>> = vec![
            Arc::new(PrivacyProvider::new(config, client.clone())),
            Arc::new(AbuseIntelProvider::new(config, client.clone())),
            Arc::new(FreeAsnProvider::new(config, client)),
        ];
        Self::from_providers(providers, Duration::from_millis(config.timeout_ms))
    }

    pub fn from_providers(
        mut providers: Vec<Arc<dyn IntelProvider>>,
        timeout: Duration,
    ) -> Self {
        providers.sort_by_key(|p| p.priority());
        Self { providers, timeout }
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Arc<dyn IntelProvider>> {
        self.providers.iter().filter(|p| p.is_enabled())
    }

    /// Fetch with the per-call deadline; errors and timeouts are
    /// swallowed so one misbehaving provider cannot stall the pipeline.
    pub async fn fetch_with_deadline(
        &self,
        provider: &dyn IntelProvider,
        address: &str,
    ) -> Option<serde_json::Value> {
        match tokio::time::timeout(self.timeout, provider.fetch(address)).await {
            Ok(Ok(raw)) => Some(raw),
            Ok(Err(error)) => {
                warn!(provider = provider.name(), ?error, "Provider lookup failed");
                None
            }
            Err(_) => {
                warn!(provider = provider.name(), "Provider lookup timed out");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider(&'static str, u8, bool);

    #[async_trait]
    impl IntelProvider for StubProvider {
        fn name(&self) -> &'static str {
            self.0
        }
        fn priority(&self) -> u8 {
            self.1
        }
        fn is_enabled(&self) -> bool {
            self.2
        }
        async fn fetch(&self, _address: &str) -> Result<serde_json::Value, PalisadeError> {
            Ok(serde_json::json!({}))
        }
        fn interpret(&self, _address: &str, _raw: &serde_json::Value) -> Option<ProviderReport> {
            None
        }
    }

    #[test]
    fn test_registry_orders_by_priority_and_filters_disabled() {
        let registry = ProviderRegistry::from_providers(
            vec![
                Arc::new(StubProvider("slow", 10, true)),
                Arc::new(StubProvider("disabled", 1, false)),
                Arc::new(StubProvider("fast", 5, true)),
            ],
            Duration::from_millis(100),
        );
        let names: Vec<_> = registry.enabled().map(|p| p.name()).collect();
        assert_eq!(names, vec!["fast", "slow"]);
    }

    #[tokio::test]
    async fn test_deadline_swallows_slow_providers() {
        struct SlowProvider;

        #[async_trait]
        impl IntelProvider for SlowProvider {
            fn name(&self) -> &'static str {
                "slow"
            }
            fn priority(&self) -> u8 {
                1
            }
            fn is_enabled(&self) -> bool {
                true
            }
            async fn fetch(&self, _address: &str) -> Result<serde_json::Value, PalisadeError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(serde_json::json!({}))
            }
            fn interpret(
                &self,
                _address: &str,
                _raw: &serde_json::Value,
            ) -> Option<ProviderReport> {
                None
            }
        }

        let registry =
            ProviderRegistry::from_providers(vec![], Duration::from_millis(10));
        let result = registry.fetch_with_deadline(&SlowProvider, "203.0.113.7").await;
        assert!(result.is_none());
    }
}
