//! Service configuration.

use crate::{cache::RemoteHooks, error::ConfigError};
use harvester_common::{limiter::DelayConfig, retry::RetryConfig};
use std::{path::PathBuf, time::Duration};

/// Global configuration for a [`DataService`](crate::service::DataService).
///
/// All options carry defaults; builder methods override them one at a
/// time.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Cap on in-flight fetches.
    pub max_concurrency: usize,
    /// Skip requests whose fingerprint has been seen in this run.
    pub deduplication: bool,
    pub limiter: Option<LimiterConfig>,
    pub retry: RetryConfig,
    pub delay: DelayConfig,
    pub cache: CacheConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            deduplication: true,
            limiter: None,
            retry: RetryConfig::default(),
            delay: DelayConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn deduplication(mut self, deduplication: bool) -> Self {
        self.deduplication = deduplication;
        self
    }

    pub fn limiter(mut self, limiter: impl Into<Option<LimiterConfig>>) -> Self {
        self.limiter = limiter.into();
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn delay(mut self, delay: DelayConfig) -> Self {
        self.delay = delay;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Concurrency);
        }
        if let Some(limiter) = &self.limiter {
            if limiter.max_rate == 0 || limiter.time_period.is_zero() {
                return Err(ConfigError::Limiter);
            }
        }
        self.cache.validate()
    }
}

/// Sliding-window admission: at most `max_rate` fetch starts per
/// `time_period`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LimiterConfig {
    pub max_rate: usize,
    pub time_period: Duration,
}

impl LimiterConfig {
    pub fn new(max_rate: usize, time_period: Duration) -> Self {
        Self {
            max_rate,
            time_period,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CacheType {
    #[default]
    Json,
    Binary,
    Remote,
}

/// Response-cache configuration; disabled by default.
#[non_exhaustive]
#[derive(Clone)]
pub struct CacheConfig {
    pub use_cache: bool,
    pub cache_type: CacheType,
    /// Snapshot path for the local variants.
    pub path: PathBuf,
    /// Minimum time between periodic flushes.
    pub write_interval: Duration,
    /// Persistence callbacks for [`CacheType::Remote`].
    pub hooks: Option<RemoteHooks>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            use_cache: false,
            cache_type: CacheType::Json,
            path: PathBuf::from("cache.json"),
            write_interval: Duration::from_secs(1200),
            hooks: None,
        }
    }
}

impl CacheConfig {
    /// A JSON file cache at `path` (`.json`, `.jsonl` or `.json.gz`).
    pub fn json(path: impl Into<PathBuf>) -> Self {
        Self {
            use_cache: true,
            cache_type: CacheType::Json,
            path: path.into(),
            ..Self::default()
        }
    }

    /// A compressed binary snapshot at `path` (`.bin` or `.bin.gz`).
    pub fn binary(path: impl Into<PathBuf>) -> Self {
        Self {
            use_cache: true,
            cache_type: CacheType::Binary,
            path: path.into(),
            ..Self::default()
        }
    }

    /// A cache persisted through user-supplied async callbacks.
    pub fn remote(hooks: RemoteHooks) -> Self {
        Self {
            use_cache: true,
            cache_type: CacheType::Remote,
            hooks: Some(hooks),
            ..Self::default()
        }
    }

    pub fn write_interval(mut self, write_interval: Duration) -> Self {
        self.write_interval = write_interval;
        self
    }

    fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.use_cache {
            return Ok(());
        }
        let path = self.path_str();
        match self.cache_type {
            CacheType::Json
                if !(path.ends_with(".json")
                    || path.ends_with(".jsonl")
                    || path.ends_with(".json.gz")) =>
            {
                Err(ConfigError::JsonSuffix(path))
            }
            CacheType::Binary if !(path.ends_with(".bin") || path.ends_with(".bin.gz")) => {
                Err(ConfigError::BinarySuffix(path))
            }
            CacheType::Remote if self.hooks.is_none() => Err(ConfigError::RemoteHooks),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("use_cache", &self.use_cache)
            .field("cache_type", &self.cache_type)
            .field("path", &self.path)
            .field("write_interval", &self.write_interval)
            .field("hooks", &self.hooks.as_ref().map(|_| ".."))
            .finish()
    }
}
