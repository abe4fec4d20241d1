//! Rate limiting decisions for API callers.
//!
//! A caller is identified by a subject and a set of groups. The first limit
//! group that shares a group with the caller applies (or the default group),
//! and every limit in it matching the request's uri and method is tracked.
//! Global limits are then tracked for all callers under one shared subject.
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::configs::{
    ConfiguredLimitGroup, ConfiguredRatelimit, HttpMethod, RateLimitingConfig, TimeUnit,
};
use super::rate_limit_cache::{RateLimitCache, GLOBAL_GROUP_ID, GLOBAL_LIMIT_USER};
use crate::clock::to_datetime;
use crate::error::{DipperError, Result};
use crate::invalid_argument;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackResult {
    Allowed,
    OverLimit {
        limit_id: String,
        next_available_at: DateTime<Utc>,
        retry_after_secs: u64,
    },
}

impl TrackResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, TrackResult::Allowed)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            TrackResult::Allowed => Ok(()),
            TrackResult::OverLimit {
                limit_id,
                next_available_at,
                retry_after_secs,
            } => Err(DipperError::OverLimit {
                limit_id,
                next_available_at,
                retry_after_secs,
            }),
        }
    }
}

/// One limit as seen by a particular subject
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct LimitReport {
    pub id: String,
    pub uri: String,
    pub uri_regex: String,
    pub methods: Vec<HttpMethod>,
    pub unit: TimeUnit,
    pub value: u32,
    pub remaining: u32,
    pub next_available: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitList {
    /// Id of the limit group that applied, if any
    pub limit_group: Option<String>,
    pub rates: Vec<LimitReport>,
}

#[derive(Clone, Debug)]
struct CompiledLimit {
    config: ConfiguredRatelimit,
    pattern: Regex,
}

impl CompiledLimit {
    fn compile(config: &ConfiguredRatelimit) -> Result<Self> {
        let pattern = Regex::new(&format!("^(?:{})$", config.uri_regex))?;
        Ok(Self {
            config: config.clone(),
            pattern,
        })
    }

    fn matches(&self, uri: &str, method: HttpMethod) -> bool {
        self.config.applies_to_method(method) && self.pattern.is_match(uri)
    }
}

#[derive(Clone, Debug)]
struct CompiledGroup {
    id: String,
    default: bool,
    groups: HashSet<String>,
    limits: Vec<CompiledLimit>,
}

impl CompiledGroup {
    fn compile(config: &ConfiguredLimitGroup) -> Result<Self> {
        Ok(Self {
            id: config.id.clone(),
            default: config.default,
            groups: config.groups.iter().cloned().collect(),
            limits: compile_limits(&config.limits)?,
        })
    }
}

fn compile_limits(limits: &[ConfiguredRatelimit]) -> Result<Vec<CompiledLimit>> {
    limits.iter().map(CompiledLimit::compile).collect()
}

/// A validated, compiled configuration snapshot
#[derive(Clone, Debug)]
pub struct LimitRules {
    version: u64,
    groups: Vec<CompiledGroup>,
    global: Vec<CompiledLimit>,
}

impl LimitRules {
    pub fn compile(config: &RateLimitingConfig, version: u64) -> Result<Self> {
        config.validate()?;
        let groups = config
            .limit_groups
            .iter()
            .map(CompiledGroup::compile)
            .collect::<Result<Vec<_>>>()?;
        let global = match &config.global_limit_group {
            Some(global) => compile_limits(&global.limits)?,
            None => Vec::new(),
        };
        Ok(Self {
            version,
            groups,
            global,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// First group (in config order) sharing a group with the caller,
    /// otherwise the default group
    fn group_for(&self, caller_groups: &[String]) -> Option<&CompiledGroup> {
        self.groups
            .iter()
            .find(|group| caller_groups.iter().any(|g| group.groups.contains(g)))
            .or_else(|| self.groups.iter().find(|group| group.default))
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitingService {
    cache: RateLimitCache,
    rules: Arc<RwLock<Arc<LimitRules>>>,
}

impl RateLimitingService {
    pub fn new(cache: RateLimitCache, config: &RateLimitingConfig) -> Result<Self> {
        let rules = LimitRules::compile(config, 0)?;
        Ok(Self {
            cache,
            rules: Arc::new(RwLock::new(Arc::new(rules))),
        })
    }

    fn rules(&self) -> Arc<LimitRules> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn config_version(&self) -> u64 {
        self.rules().version()
    }

    /// Swap in a new configuration. In-flight calls finish against the
    /// snapshot they started with. Returns the new version.
    pub fn update_config(&self, config: &RateLimitingConfig) -> Result<u64> {
        let mut rules = LimitRules::compile(config, 0)?;
        let mut current = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        rules.version = current.version() + 1;
        let version = rules.version;
        *current = Arc::new(rules);
        tracing::info!("Rate limiting configuration updated to version {}", version);
        Ok(version)
    }

    /// Account one request. Stops at the first limit the caller is over;
    /// global limits are only tracked once the caller's own limits pass.
    #[instrument(skip(self), level = "debug")]
    pub async fn track_limits(
        &self,
        subject: &str,
        groups: &[String],
        uri: &str,
        method: &str,
    ) -> Result<TrackResult> {
        if subject.trim().is_empty() {
            return Err(invalid_argument!("subject must not be blank"));
        }
        let method: HttpMethod = method.parse().map_err(DipperError::InvalidArgument)?;
        let rules = self.rules();

        if let Some(group) = rules.group_for(groups) {
            for limit in group.limits.iter().filter(|l| l.matches(uri, method)) {
                let result = self.track_one(method, subject, &group.id, limit).await?;
                if !result.is_allowed() {
                    return Ok(result);
                }
            }
        }
        for limit in rules.global.iter().filter(|l| l.matches(uri, method)) {
            let result = self
                .track_one(method, GLOBAL_LIMIT_USER, GLOBAL_GROUP_ID, limit)
                .await?;
            if !result.is_allowed() {
                return Ok(result);
            }
        }
        Ok(TrackResult::Allowed)
    }

    async fn track_one(
        &self,
        method: HttpMethod,
        subject: &str,
        group_id: &str,
        limit: &CompiledLimit,
    ) -> Result<TrackResult> {
        let response = self
            .cache
            .update_limit(method, subject, group_id, &limit.config)
            .await?;
        if response.allowed {
            return Ok(TrackResult::Allowed);
        }
        tracing::info!(
            "{} is over limit {} in group {} until {}",
            subject,
            limit.config.id,
            group_id,
            response.next_available_at().to_rfc3339()
        );
        Ok(TrackResult::OverLimit {
            limit_id: limit.config.id.clone(),
            next_available_at: response.next_available_at(),
            retry_after_secs: response.retry_after_secs(self.cache.now_millis()),
        })
    }

    /// Report every limit in the caller's group without recording a hit
    #[instrument(skip(self), level = "debug")]
    pub async fn query_limits(&self, subject: &str, groups: &[String]) -> Result<RateLimitList> {
        if subject.trim().is_empty() {
            return Err(invalid_argument!("subject must not be blank"));
        }
        let rules = self.rules();
        let Some(group) = rules.group_for(groups) else {
            return Ok(RateLimitList::default());
        };

        let now = self.cache.now_millis();
        let mut rates = Vec::with_capacity(group.limits.len());
        for limit in &group.limits {
            let config = &limit.config;
            let (remaining, next_available) =
                match self.cache.get_limit(subject, &group.id, config).await? {
                    Some(state) => (state.remaining(), state.next_available_millis(now)),
                    None => (config.value, now),
                };
            rates.push(LimitReport {
                id: config.id.clone(),
                uri: config.uri.clone(),
                uri_regex: config.uri_regex.clone(),
                methods: config.http_methods.clone(),
                unit: config.unit,
                value: config.value,
                remaining,
                next_available: to_datetime(next_available),
            });
        }
        Ok(RateLimitList {
            limit_group: Some(group.id.clone()),
            rates,
        })
    }
}
