use crate::Secret;

pub(crate) fn _default_false() -> bool {
    false
}

pub(crate) fn _default_true() -> bool {
    true
}

pub(crate) fn _default_database_url() -> Secret<String> {
    Secret::new("sqlite:data".to_owned())
}

pub(crate) fn _default_rate_limit() -> u32 {
    100
}

pub(crate) fn _default_rate_limit_window_seconds() -> u64 {
    60
}

pub(crate) fn _default_burst_threshold() -> u32 {
    50
}

pub(crate) fn _default_burst_window_seconds() -> u64 {
    10
}

pub(crate) fn _default_burst_multiplier() -> f64 {
    5.0
}

pub(crate) fn _default_auto_ban_seconds() -> u64 {
    3600
}

pub(crate) fn _default_ip_ttl_seconds() -> u64 {
    3600
}

pub(crate) fn _default_asn_ttl_seconds() -> u64 {
    86400
}

pub(crate) fn _default_provider_cache_ttl_seconds() -> u64 {
    3600
}

pub(crate) fn _default_tor_list_url() -> String {
    "https://check.torproject.org/torbulkexitlist".to_owned()
}

pub(crate) fn _default_tor_interval_seconds() -> u64 {
    3600
}

pub(crate) fn _default_tor_fetch_timeout_seconds() -> u64 {
    10
}

pub(crate) fn _default_provider_timeout_ms() -> u64 {
    5000
}

pub(crate) fn _default_free_asn_url() -> String {
    "http://ip-api.com/json".to_owned()
}

pub(crate) fn _default_privacy_url() -> String {
    "https://ipinfo.io".to_owned()
}

pub(crate) fn _default_abuse_url() -> String {
    "https://api.abuseipdb.com/api/v2/check".to_owned()
}

pub(crate) fn _default_request_log_days() -> u32 {
    30
}

pub(crate) fn _default_stats_days() -> u32 {
    90
}
