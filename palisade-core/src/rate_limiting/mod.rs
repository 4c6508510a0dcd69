mod counter;

pub use counter::{CounterStore, RateLimitConfig, RateLimitDecision};
