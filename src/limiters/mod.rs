pub mod configs;
pub mod rate_limit_cache;
pub mod service;
pub mod sliding_window;

pub use configs::{
    ConfiguredLimitGroup, ConfiguredRatelimit, GlobalLimitGroup, HttpMethod, RateLimitingConfig,
    TimeUnit,
};
pub use rate_limit_cache::{limit_key, RateLimitCache, GLOBAL_GROUP_ID, GLOBAL_LIMIT_USER};
pub use service::{LimitReport, RateLimitList, RateLimitingService, TrackResult};
pub use sliding_window::{CachedRateLimit, LimitHit, LimitSnapshot, NextAvailableResponse};
