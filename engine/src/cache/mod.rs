//! The response cache.
//!
//! Maps request fingerprints to `(text, data)` pairs so a response can be
//! reconstructed without touching the network. Local variants persist the
//! whole in-memory state as one snapshot file; the remote variant
//! delegates persistence to user callbacks.

mod file;
mod remote;

pub use file::{BinaryFileCache, JsonFileCache};
pub use remote::{LoadState, RemoteCache, RemoteHooks, SaveState};

use crate::{
    config::{CacheConfig, CacheType},
    error::ConfigError,
};
use harvester_common::{error::FetchError, request::Request, response::Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// One cached response: the body text and the parsed JSON payload, if the
/// request asked for one. Serialized as the two-element array
/// `[text, data_or_null]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, Option<Value>)", into = "(String, Option<Value>)")]
pub struct CacheEntry {
    pub text: String,
    pub data: Option<Value>,
}

impl CacheEntry {
    pub fn from_response(response: &Response) -> Self {
        Self {
            text: response.body().to_string(),
            data: response.json().cloned(),
        }
    }

    /// Reconstruct a response for `request` from this entry. The URL is
    /// the request's own encoded URL; headers and cookies are not
    /// replayed.
    pub fn into_response(self, request: &Request) -> Response {
        Response::new(request.clone(), request.url_encoded(), 200)
            .text(self.text)
            .data(self.data)
    }
}

impl From<(String, Option<Value>)> for CacheEntry {
    fn from((text, data): (String, Option<Value>)) -> Self {
        Self { text, data }
    }
}

impl From<CacheEntry> for (String, Option<Value>) {
    fn from(entry: CacheEntry) -> Self {
        (entry.text, entry.data)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("remote cache error: {0}")]
    Remote(#[source] anyhow::Error),
    #[error("cache task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// The cache contract the scheduler drives.
///
/// One mutex serializes `set` and `flush`; `get` is safe concurrently
/// with either. `flush` is a no-op while the state is clean.
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    /// Populate the in-memory state from the backing store. Called once
    /// before the scheduler enters its main loop.
    async fn load(&self) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Option<CacheEntry>;

    /// Store an entry and mark the state dirty.
    async fn set(&self, key: String, entry: CacheEntry) -> Result<(), CacheError>;

    /// Persist the state when dirty.
    async fn flush(&self) -> Result<(), CacheError>;

    /// Flush when at least `interval` has passed since the last flush.
    async fn tick(&self, interval: Duration) -> Result<(), CacheError>;
}

/// Look up `request` in the cache, fetching and recording on a miss.
///
/// A hit synthesizes the response without invoking the fetcher. The
/// at-most-once guarantee per fingerprint comes from the scheduler's
/// dedup, which admits a unique request into exactly one task.
pub async fn fetch_with_cache(
    cache: Option<&Arc<dyn Cache>>,
    request: &Request,
) -> Result<Response, FetchError> {
    let Some(cache) = cache else {
        return request.fetcher().fetch(request).await;
    };

    let key = request.unique_key();
    if let Some(entry) = cache.get(&key).await {
        log::debug!("Cache hit for {key}");
        return Ok(entry.into_response(request));
    }

    log::debug!("Cache miss for {key}");
    let response = request.fetcher().fetch(request).await?;
    cache
        .set(key, CacheEntry::from_response(&response))
        .await
        .map_err(|err| FetchError::Generic(err.into()))?;
    Ok(response)
}

/// Build the cache instance a configuration asks for, if any.
pub fn build_cache(config: &CacheConfig) -> Result<Option<Arc<dyn Cache>>, ConfigError> {
    if !config.use_cache {
        return Ok(None);
    }
    Ok(Some(match config.cache_type {
        CacheType::Json => Arc::new(JsonFileCache::new(&config.path)),
        CacheType::Binary => Arc::new(BinaryFileCache::new(&config.path)),
        CacheType::Remote => {
            let hooks = config.hooks.clone().ok_or(ConfigError::RemoteHooks)?;
            Arc::new(RemoteCache::new(hooks))
        }
    }))
}

/// Shared flush-interval bookkeeping for the cache variants.
#[derive(Debug)]
pub(crate) struct FlushClock {
    last_flush: parking_lot::Mutex<Instant>,
}

impl FlushClock {
    pub(crate) fn new() -> Self {
        Self {
            last_flush: parking_lot::Mutex::new(Instant::now()),
        }
    }

    pub(crate) fn due(&self, interval: Duration) -> bool {
        self.last_flush.lock().elapsed() >= interval
    }

    pub(crate) fn reset(&self) {
        *self.last_flush.lock() = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_serializes_as_two_element_array() {
        let entry = CacheEntry {
            text: "ok".into(),
            data: Some(serde_json::json!({"k": 1})),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"["ok",{"k":1}]"#);

        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn entry_without_data_round_trips() {
        let entry = CacheEntry {
            text: "ok".into(),
            data: None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"["ok",null]"#);
        assert_eq!(serde_json::from_str::<CacheEntry>(&json).unwrap(), entry);
    }
}
