//! Cache persisted through user-supplied async callbacks.

use super::{Cache, CacheEntry, CacheError, FlushClock};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};

/// Persist the full cache state somewhere durable.
pub type SaveState =
    Arc<dyn Fn(HashMap<String, CacheEntry>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Load the previously persisted cache state.
pub type LoadState =
    Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<HashMap<String, CacheEntry>>> + Send + Sync>;

/// The callback pair a remote cache is built from; both are required.
#[derive(Clone)]
pub struct RemoteHooks {
    pub save_state: SaveState,
    pub load_state: LoadState,
}

impl RemoteHooks {
    pub fn new(save_state: SaveState, load_state: LoadState) -> Self {
        Self {
            save_state,
            load_state,
        }
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<String, CacheEntry>,
    dirty: bool,
}

/// In-memory cache whose `load`/`flush` delegate to [`RemoteHooks`].
pub struct RemoteCache {
    hooks: RemoteHooks,
    state: Mutex<State>,
    clock: FlushClock,
}

impl RemoteCache {
    pub fn new(hooks: RemoteHooks) -> Self {
        Self {
            hooks,
            state: Mutex::new(State::default()),
            clock: FlushClock::new(),
        }
    }
}

#[async_trait::async_trait]
impl Cache for RemoteCache {
    async fn load(&self) -> Result<(), CacheError> {
        let entries = (self.hooks.load_state)()
            .await
            .map_err(CacheError::Remote)?;
        log::info!("Loaded {} cache entries from remote state", entries.len());

        let mut state = self.state.lock();
        state.entries = entries;
        state.dirty = false;
        drop(state);

        self.clock.reset();
        Ok(())
    }

    async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.state.lock().entries.get(key).cloned()
    }

    async fn set(&self, key: String, entry: CacheEntry) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        state.entries.insert(key, entry);
        state.dirty = true;
        Ok(())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        let entries = {
            let mut state = self.state.lock();
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            state.entries.clone()
        };

        log::info!("Saving {} cache entries to remote state", entries.len());

        match (self.hooks.save_state)(entries).await {
            Ok(()) => {
                self.clock.reset();
                Ok(())
            }
            Err(err) => {
                self.state.lock().dirty = true;
                Err(CacheError::Remote(err))
            }
        }
    }

    async fn tick(&self, interval: Duration) -> Result<(), CacheError> {
        if self.clock.due(interval) {
            self.flush().await?;
            self.clock.reset();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hooks(
        store: Arc<Mutex<HashMap<String, CacheEntry>>>,
        saves: Arc<AtomicUsize>,
    ) -> RemoteHooks {
        let save_store = store.clone();
        let save_state: SaveState = Arc::new(move |entries| {
            let store = save_store.clone();
            let saves = saves.clone();
            Box::pin(async move {
                *store.lock() = entries;
                saves.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        let load_state: LoadState = Arc::new(move || {
            let store = store.clone();
            Box::pin(async move { Ok(store.lock().clone()) })
        });
        RemoteHooks::new(save_state, load_state)
    }

    fn entry(text: &str) -> CacheEntry {
        CacheEntry {
            text: text.into(),
            data: None,
        }
    }

    #[tokio::test]
    async fn flush_and_load_round_trip_through_hooks() {
        let store = Arc::new(Mutex::new(HashMap::new()));
        let saves = Arc::new(AtomicUsize::new(0));

        let cache = RemoteCache::new(hooks(store.clone(), saves.clone()));
        cache.set("k".into(), entry("ok")).await.unwrap();
        cache.flush().await.unwrap();
        assert_eq!(saves.load(Ordering::SeqCst), 1);

        let fresh = RemoteCache::new(hooks(store, saves.clone()));
        fresh.load().await.unwrap();
        assert_eq!(fresh.get("k").await, Some(entry("ok")));
    }

    #[tokio::test]
    async fn clean_flush_skips_the_save_hook() {
        let store = Arc::new(Mutex::new(HashMap::new()));
        let saves = Arc::new(AtomicUsize::new(0));

        let cache = RemoteCache::new(hooks(store, saves.clone()));
        cache.flush().await.unwrap();
        cache.flush().await.unwrap();
        assert_eq!(saves.load(Ordering::SeqCst), 0);
    }
}
