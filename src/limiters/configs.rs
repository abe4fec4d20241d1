//! Rate limiting configuration: limit groups, their limits, and the global group.
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::rate_limit_cache::GLOBAL_GROUP_ID;
use crate::config_error;
use crate::error::Result;

/// Longest id accepted for a limit or a limit group
pub const MAX_ID_LENGTH: usize = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Connect,
    Trace,
    /// Matches every request method
    All,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Trace => "TRACE",
            HttpMethod::All => "ALL",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "HEAD" => Ok(HttpMethod::Head),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "OPTIONS" => Ok(HttpMethod::Options),
            "CONNECT" => Ok(HttpMethod::Connect),
            "TRACE" => Ok(HttpMethod::Trace),
            "ALL" => Ok(HttpMethod::All),
            _ => Err(format!("Invalid http method: {}", s)),
        }
    }
}

/// Length of a sliding window
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    pub fn window(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(60 * 60),
            TimeUnit::Day => Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn window_millis(&self) -> i64 {
        self.window().as_secs() as i64 * 1000
    }
}

impl std::fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeUnit::Second => write!(f, "SECOND"),
            TimeUnit::Minute => write!(f, "MINUTE"),
            TimeUnit::Hour => write!(f, "HOUR"),
            TimeUnit::Day => write!(f, "DAY"),
        }
    }
}

impl std::str::FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SECOND" => Ok(TimeUnit::Second),
            "MINUTE" => Ok(TimeUnit::Minute),
            "HOUR" => Ok(TimeUnit::Hour),
            "DAY" => Ok(TimeUnit::Day),
            _ => Err(format!("Invalid time unit: {}", s)),
        }
    }
}

/// One limit: at most `value` matching requests per `unit`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConfiguredRatelimit {
    pub id: String,
    /// Human-readable form of the uri pattern, reported back to callers
    pub uri: String,
    /// Must match the whole request uri
    pub uri_regex: String,
    pub http_methods: Vec<HttpMethod>,
    pub unit: TimeUnit,
    pub value: u32,
}

impl ConfiguredRatelimit {
    pub fn applies_to_method(&self, method: HttpMethod) -> bool {
        self.http_methods
            .iter()
            .any(|configured| *configured == HttpMethod::All || *configured == method)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConfiguredLimitGroup {
    pub id: String,
    /// Chosen for callers that match no other group
    #[serde(default)]
    pub default: bool,
    /// Caller groups this limit group applies to
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub limits: Vec<ConfiguredRatelimit>,
}

/// Limits shared by every caller
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GlobalLimitGroup {
    #[serde(default)]
    pub limits: Vec<ConfiguredRatelimit>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitingConfig {
    #[serde(default)]
    pub limit_groups: Vec<ConfiguredLimitGroup>,
    #[serde(default)]
    pub global_limit_group: Option<GlobalLimitGroup>,
}

impl RateLimitingConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|err| {
            config_error!("Unable to read rate limit config {}: {}", path.display(), err)
        })?;
        Self::from_json(&json)
    }

    /// Structural checks. Regexes are checked when the config is compiled.
    pub fn validate(&self) -> Result<()> {
        let mut group_ids = HashSet::new();
        for group in &self.limit_groups {
            check_id("Limit group", &group.id)?;
            if group.id == GLOBAL_GROUP_ID {
                return Err(config_error!(
                    "Limit group id {} is reserved for the global limits",
                    GLOBAL_GROUP_ID
                ));
            }
            if !group_ids.insert(group.id.as_str()) {
                return Err(config_error!("Duplicate limit group id: {}", group.id));
            }
            check_limits(&group.id, &group.limits)?;
        }
        if self.limit_groups.iter().filter(|group| group.default).count() > 1 {
            tracing::warn!("Several default limit groups configured; the first one is used");
        }
        if let Some(global) = &self.global_limit_group {
            check_limits("global", &global.limits)?;
        }
        Ok(())
    }
}

fn check_limits(group_id: &str, limits: &[ConfiguredRatelimit]) -> Result<()> {
    let mut limit_ids = HashSet::new();
    for limit in limits {
        check_id("Limit", &limit.id)?;
        if !limit_ids.insert(limit.id.as_str()) {
            return Err(config_error!(
                "Limit group {} has duplicate limit id {}",
                group_id,
                limit.id
            ));
        }
        if limit.http_methods.is_empty() {
            return Err(config_error!(
                "Limit {} in group {} names no http methods",
                limit.id,
                group_id
            ));
        }
    }
    Ok(())
}

/// Ids are segments of datastore keys, so they stay short and never contain
/// the ':' separator.
fn check_id(kind: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(config_error!("{} id must not be blank", kind));
    }
    if id.len() > MAX_ID_LENGTH || id.contains(':') || id.chars().any(char::is_control) {
        return Err(config_error!(
            "{} id {:?} must be at most {} bytes with no ':' or control characters",
            kind,
            id,
            MAX_ID_LENGTH
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "limit_groups": [
            {
                "id": "customer-limits",
                "groups": ["customer"],
                "limits": [
                    {"id": "one", "uri": "/service/*", "uri_regex": "/service/.*",
                     "http_methods": ["GET", "POST"], "unit": "HOUR", "value": 10}
                ]
            },
            {
                "id": "unlimited",
                "default": true
            }
        ],
        "global_limit_group": {
            "limits": [
                {"id": "catch-all", "uri": "*", "uri_regex": ".*",
                 "http_methods": ["ALL"], "unit": "SECOND", "value": 1000}
            ]
        }
    }"#;

    #[test]
    fn parses_json_config() {
        let config = RateLimitingConfig::from_json(CONFIG).unwrap();
        assert_eq!(config.limit_groups.len(), 2);
        let limit = &config.limit_groups[0].limits[0];
        assert_eq!(limit.unit, TimeUnit::Hour);
        assert!(limit.applies_to_method(HttpMethod::Post));
        assert!(!limit.applies_to_method(HttpMethod::Delete));
        assert!(config.limit_groups[1].default);
        let global = config.global_limit_group.unwrap();
        assert!(global.limits[0].applies_to_method(HttpMethod::Delete));
    }

    #[test]
    fn rejects_duplicate_limit_ids() {
        let json = r#"{"limit_groups": [{"id": "g", "limits": [
            {"id": "a", "uri": "/", "uri_regex": "/", "http_methods": ["GET"], "unit": "SECOND", "value": 1},
            {"id": "a", "uri": "/", "uri_regex": "/", "http_methods": ["GET"], "unit": "SECOND", "value": 1}
        ]}]}"#;
        assert!(RateLimitingConfig::from_json(json).is_err());
    }

    #[test]
    fn rejects_ids_that_would_make_ambiguous_keys() {
        let limit = |id: &str| {
            format!(
                r#"{{"id": "{}", "uri": "/", "uri_regex": "/", "http_methods": ["GET"], "unit": "SECOND", "value": 1}}"#,
                id
            )
        };
        let config = |group: &str, limit_id: &str| {
            format!(r#"{{"limit_groups": [{{"id": "{}", "limits": [{}]}}]}}"#, group, limit(limit_id))
        };
        assert!(RateLimitingConfig::from_json(&config("a", "b")).is_ok());
        assert!(RateLimitingConfig::from_json(&config("a:b", "c")).is_err());
        assert!(RateLimitingConfig::from_json(&config("a", "b:c")).is_err());
        assert!(RateLimitingConfig::from_json(&config("global", "c")).is_err());
        assert!(RateLimitingConfig::from_json(&config(" ", "c")).is_err());
        assert!(RateLimitingConfig::from_json(&config(&"g".repeat(200), "c")).is_err());
    }

    #[test]
    fn parses_methods_and_units() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("ALL".parse::<HttpMethod>().unwrap(), HttpMethod::All);
        assert!("FETCH".parse::<HttpMethod>().is_err());
        assert_eq!("minute".parse::<TimeUnit>().unwrap(), TimeUnit::Minute);
        assert_eq!(TimeUnit::Day.window_millis(), 86_400_000);
    }
}
