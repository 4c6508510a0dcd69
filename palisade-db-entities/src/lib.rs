#![allow(non_snake_case)]

pub mod ApiKey;
pub mod AsnRecord;
pub mod Ban;
pub mod CounterBucket;
pub mod GeoBlockedCountry;
pub mod ManualBlock;
pub mod Parameters;
pub mod ProviderCache;
pub mod ReputationRecord;
pub mod RequestLog;
pub mod StatCounter;
pub mod TorExit;
