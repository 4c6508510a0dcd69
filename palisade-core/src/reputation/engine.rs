use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};
use palisade_common::{PalisadeError, ReputationConfig};
use palisade_db_entities::ManualBlock::ManualBlockKind;
use palisade_db_entities::ReputationRecord;
use palisade_db_entities::ReputationRecord::ReputationSource;

use super::cidr::cidr_contains;
use super::providers::{FreeAsnProvider, IntelProvider, ProviderRegistry, ProviderReport};
use super::store::{NewReputation, ReputationStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationKind {
    Tor,
    Vpn,
    Proxy,
    Hosting,
    Residential,
    Unknown,
}

impl ClassificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationKind::Tor => "tor",
            ClassificationKind::Vpn => "vpn",
            ClassificationKind::Proxy => "proxy",
            ClassificationKind::Hosting => "hosting",
            ClassificationKind::Residential => "residential",
            ClassificationKind::Unknown => "unknown",
        }
    }

    pub fn is_suspicious(&self) -> bool {
        matches!(
            self,
            ClassificationKind::Tor | ClassificationKind::Vpn | ClassificationKind::Proxy
        )
    }
}

/// The five-way reputation tag plus confidence and provenance.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub address: String,
    pub kind: ClassificationKind,
    pub confidence: u8,
    pub reason: String,
    pub source: ReputationSource,
    pub asn: Option<i64>,
    pub asn_org: Option<String>,
    pub country: Option<String>,
    pub checked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Classification {
    fn new(
        address: &str,
        kind: ClassificationKind,
        confidence: u8,
        reason: String,
        source: ReputationSource,
        ttl_seconds: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            address: address.to_owned(),
            kind,
            confidence,
            reason,
            source,
            asn: None,
            asn_org: None,
            country: None,
            checked_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_seconds as i64),
        }
    }

    pub fn is_tor(&self) -> bool {
        self.kind == ClassificationKind::Tor
    }

    pub fn is_vpn(&self) -> bool {
        self.kind == ClassificationKind::Vpn
    }

    pub fn is_proxy(&self) -> bool {
        self.kind == ClassificationKind::Proxy
    }

    pub fn is_hosting(&self) -> bool {
        self.kind == ClassificationKind::Hosting
    }

    pub fn is_residential(&self) -> bool {
        self.kind == ClassificationKind::Residential
    }

    fn from_record(record: ReputationRecord::Model) -> Self {
        let kind = if record.is_tor {
            ClassificationKind::Tor
        } else if record.is_vpn {
            ClassificationKind::Vpn
        } else if record.is_proxy {
            ClassificationKind::Proxy
        } else if record.is_hosting {
            ClassificationKind::Hosting
        } else if record.is_residential {
            ClassificationKind::Residential
        } else {
            ClassificationKind::Unknown
        };
        Self {
            address: record.address,
            kind,
            confidence: record.confidence.clamp(0, 100) as u8,
            reason: record.reason,
            source: record.source,
            asn: record.asn,
            asn_org: record.asn_org,
            country: record.country,
            checked_at: record.checked_at,
            expires_at: record.expires_at,
        }
    }

    fn to_cached(&self) -> NewReputation {
        NewReputation {
            address: self.address.clone(),
            is_proxy: self.is_proxy(),
            is_vpn: self.is_vpn(),
            is_tor: self.is_tor(),
            is_hosting: self.is_hosting(),
            is_residential: self.is_residential(),
            confidence: self.confidence as i32,
            reason: self.reason.clone(),
            source: self.source,
            asn: self.asn,
            asn_org: self.asn_org.clone(),
            country: self.country.clone(),
        }
    }
}

struct AsnInfo {
    asn: i64,
    org: String,
    is_hosting: bool,
    is_vpn: bool,
    country: Option<String>,
}

/// Layered classification pipeline: cache, manual blocks, Tor list, ASN
/// heuristic, then external providers, stopping at the first
/// high-confidence hit.
pub struct ReputationEngine {
    store: Arc<ReputationStore>,
    providers: Arc<ProviderRegistry>,
    free_asn: Arc<FreeAsnProvider>,
    config: ReputationConfig,
}

impl ReputationEngine {
    pub fn new(
        store: Arc<ReputationStore>,
        providers: Arc<ProviderRegistry>,
        free_asn: Arc<FreeAsnProvider>,
        config: ReputationConfig,
    ) -> Self {
        Self {
            store,
            providers,
            free_asn,
            config,
        }
    }

    /// Never fails: a store error degrades to an uncached
    /// unknown-confidence-30 answer.
    pub async fn classify(&self, address: &str, bypass_cache: bool) -> Classification {
        match self.classify_inner(address, bypass_cache).await {
            Ok(classification) => classification,
            Err(error) => {
                error!(address = %address, ?error, "Classification failed, returning unknown");
                self.unknown(address)
            }
        }
    }

    fn unknown(&self, address: &str) -> Classification {
        Classification::new(
            address,
            ClassificationKind::Unknown,
            30,
            "No reputation data".to_owned(),
            ReputationSource::Heuristic,
            self.config.ip_ttl_seconds,
        )
    }

    async fn classify_inner(
        &self,
        address: &str,
        bypass_cache: bool,
    ) -> Result<Classification, PalisadeError> {
        self.store.increment_stat("check", 1).await?;

        if !bypass_cache {
            if let Some(record) = self.store.get_reputation(address).await? {
                self.store.increment_stat("cache_hit", 1).await?;
                let mut classification = Classification::from_record(record);
                classification.source = ReputationSource::Cache;
                debug!(
                    address = %address,
                    kind = classification.kind.as_str(),
                    "Reputation served from cache"
                );
                return Ok(classification);
            }
        }

        if let Some(block) = self
            .store
            .get_manual_block(address, ManualBlockKind::Address)
            .await?
        {
            let classification = Classification::new(
                address,
                ClassificationKind::Proxy,
                100,
                format!("Manually blocked: {}", block.reason),
                ReputationSource::Manual,
                self.config.ip_ttl_seconds,
            );
            return self.finalize(classification).await;
        }

        for block in self.store.active_cidr_blocks().await? {
            if cidr_contains(&block.identifier, address) {
                let classification = Classification::new(
                    address,
                    ClassificationKind::Proxy,
                    100,
                    format!("Manually blocked: {} ({})", block.reason, block.identifier),
                    ReputationSource::Manual,
                    self.config.ip_ttl_seconds,
                );
                return self.finalize(classification).await;
            }
        }

        if self.config.tor_detection && self.store.is_tor_exit(address).await? {
            let classification = Classification::new(
                address,
                ClassificationKind::Tor,
                100,
                "Known Tor exit node".to_owned(),
                ReputationSource::TorList,
                self.config.ip_ttl_seconds,
            );
            return self.finalize(classification).await;
        }

        let mut tentative = None;
        if let Some(asn_info) = self.asn_lookup(address).await? {
            if let Some(block) = self
                .store
                .get_manual_block(&asn_info.asn.to_string(), ManualBlockKind::Asn)
                .await?
            {
                let classification = self.with_asn(
                    Classification::new(
                        address,
                        ClassificationKind::Proxy,
                        100,
                        format!("Manually blocked ASN {}: {}", asn_info.asn, block.reason),
                        ReputationSource::Manual,
                        self.config.ip_ttl_seconds,
                    ),
                    &asn_info,
                );
                return self.finalize(classification).await;
            }
            if asn_info.is_hosting {
                let classification = self.with_asn(
                    Classification::new(
                        address,
                        ClassificationKind::Hosting,
                        85,
                        format!("Known hosting network AS{} ({})", asn_info.asn, asn_info.org),
                        ReputationSource::Heuristic,
                        self.config.ip_ttl_seconds,
                    ),
                    &asn_info,
                );
                return self.finalize(classification).await;
            }
            if asn_info.is_vpn {
                let classification = self.with_asn(
                    Classification::new(
                        address,
                        ClassificationKind::Vpn,
                        85,
                        format!("Known VPN network AS{} ({})", asn_info.asn, asn_info.org),
                        ReputationSource::Heuristic,
                        self.config.ip_ttl_seconds,
                    ),
                    &asn_info,
                );
                return self.finalize(classification).await;
            }
            // No verdict from the ASN itself; hold as a candidate while
            // the providers get their say
            tentative = Some(self.with_asn(
                Classification::new(
                    address,
                    ClassificationKind::Residential,
                    60,
                    format!("Likely residential (AS{} {})", asn_info.asn, asn_info.org),
                    ReputationSource::Heuristic,
                    self.config.ip_ttl_seconds,
                ),
                &asn_info,
            ));
        }

        for provider in self.providers.enabled() {
            let Some(report) = self.provider_report(provider.as_ref(), address).await? else {
                continue;
            };
            if !report.has_positive_indicator() {
                continue;
            }
            let kind = collapse_report(&report);
            let mut classification = Classification::new(
                address,
                kind,
                report.confidence,
                format!("Flagged by {} ({})", provider.name(), kind.as_str()),
                ReputationSource::Provider,
                self.config.ip_ttl_seconds,
            );
            classification.asn = report.asn;
            classification.asn_org = report.asn_org.clone();
            classification.country = report.country.clone();
            return self.finalize(classification).await;
        }

        if let Some(tentative) = tentative {
            return self.finalize(tentative).await;
        }

        self.finalize(self.unknown(address)).await
    }

    fn with_asn(&self, mut classification: Classification, info: &AsnInfo) -> Classification {
        classification.asn = Some(info.asn);
        classification.asn_org = Some(info.org.clone());
        classification.country = info.country.clone();
        classification
    }

    /// Write-through cache, per-class stats, decision log.
    async fn finalize(
        &self,
        classification: Classification,
    ) -> Result<Classification, PalisadeError> {
        self.store
            .upsert_reputation(classification.to_cached(), self.config.ip_ttl_seconds)
            .await?;
        self.store
            .increment_stat(&format!("classified_{}", classification.kind.as_str()), 1)
            .await?;
        if classification.kind.is_suspicious() {
            warn!(
                address = %classification.address,
                kind = classification.kind.as_str(),
                confidence = classification.confidence,
                reason = %classification.reason,
                "Address classified as suspicious"
            );
        } else {
            debug!(
                address = %classification.address,
                kind = classification.kind.as_str(),
                confidence = classification.confidence,
                "Address classified"
            );
        }
        Ok(classification)
    }

    /// The ASN layer always goes through the keyless provider; richer
    /// providers do not replace it.
    async fn asn_lookup(&self, address: &str) -> Result<Option<AsnInfo>, PalisadeError> {
        let report = self
            .provider_report(self.free_asn.as_ref(), address)
            .await?;
        let Some(report) = report else {
            return Ok(None);
        };
        let Some(asn) = report.asn else {
            return Ok(None);
        };

        if let Some(known) = self.store.get_asn(asn).await? {
            return Ok(Some(AsnInfo {
                asn,
                org: known.org_name,
                is_hosting: known.is_hosting,
                is_vpn: known.is_vpn,
                country: known.country.or(report.country),
            }));
        }

        let org = report.asn_org.clone().unwrap_or_default();
        self.store
            .upsert_asn(
                asn,
                &org,
                false,
                false,
                report.country.clone(),
                self.config.asn_ttl_seconds,
            )
            .await?;
        Ok(Some(AsnInfo {
            asn,
            org,
            is_hosting: false,
            is_vpn: false,
            country: report.country,
        }))
    }

    /// Provider cache first, then a deadline-bounded live call whose raw
    /// response is cached for the next lookup.
    async fn provider_report(
        &self,
        provider: &dyn IntelProvider,
        address: &str,
    ) -> Result<Option<ProviderReport>, PalisadeError> {
        if let Some(raw) = self
            .store
            .get_provider_cached(address, provider.name())
            .await?
        {
            return Ok(provider.interpret(address, &raw));
        }
        let Some(raw) = self.providers.fetch_with_deadline(provider, address).await else {
            return Ok(None);
        };
        self.store
            .set_provider_cached(
                address,
                provider.name(),
                raw.clone(),
                self.config.provider_cache_ttl_seconds,
            )
            .await?;
        Ok(provider.interpret(address, &raw))
    }
}

/// Tor wins over VPN over proxy over hosting.
fn collapse_report(report: &ProviderReport) -> ClassificationKind {
    if report.is_tor {
        ClassificationKind::Tor
    } else if report.is_vpn {
        ClassificationKind::Vpn
    } else if report.is_proxy {
        ClassificationKind::Proxy
    } else {
        ClassificationKind::Hosting
    }
}
