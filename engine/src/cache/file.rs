//! Local snapshot caches.
//!
//! The whole in-memory map is rewritten on each flush: serialize under
//! the state lock, write to a sibling temp file on the blocking pool,
//! then atomically rename over the target.

use super::{Cache, CacheEntry, CacheError, FlushClock};
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fs,
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, CacheEntry>,
    dirty: bool,
}

#[derive(Debug)]
struct Snapshot {
    path: PathBuf,
    compressed: bool,
    state: Mutex<State>,
    clock: FlushClock,
}

impl Snapshot {
    fn new(path: PathBuf, compressed: bool) -> Self {
        Self {
            path,
            compressed,
            state: Mutex::new(State::default()),
            clock: FlushClock::new(),
        }
    }

    async fn load(&self) -> Result<(), CacheError> {
        let path = self.path.clone();
        let compressed = self.compressed;
        let loaded = tokio::task::spawn_blocking(move || read_snapshot(&path, compressed)).await??;

        if let Some(entries) = loaded {
            log::info!(
                "Loaded {} cache entries from {}",
                entries.len(),
                self.path.display()
            );
            let mut state = self.state.lock();
            state.entries = entries;
            state.dirty = false;
        }
        self.clock.reset();
        Ok(())
    }

    fn get(&self, key: &str) -> Option<CacheEntry> {
        self.state.lock().entries.get(key).cloned()
    }

    fn set(&self, key: String, entry: CacheEntry) {
        let mut state = self.state.lock();
        state.entries.insert(key, entry);
        state.dirty = true;
    }

    /// Persist when dirty. The dirty flag is cleared while serializing so
    /// concurrent `set`s re-mark it; a failed write restores it.
    async fn flush(&self) -> Result<(), CacheError> {
        let bytes = {
            let mut state = self.state.lock();
            if !state.dirty {
                return Ok(());
            }
            let bytes = serde_json::to_vec(&state.entries)?;
            state.dirty = false;
            bytes
        };

        log::info!("Writing cache to {}", self.path.display());

        let path = self.path.clone();
        let compressed = self.compressed;
        let result: Result<(), CacheError> =
            match tokio::task::spawn_blocking(move || write_snapshot(&path, compressed, &bytes))
                .await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(err.into()),
                Err(err) => Err(err.into()),
            };

        match result {
            Ok(()) => {
                self.clock.reset();
                Ok(())
            }
            Err(err) => {
                self.state.lock().dirty = true;
                Err(err)
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

fn read_snapshot(
    path: &Path,
    compressed: bool,
) -> Result<Option<HashMap<String, CacheEntry>>, CacheError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let bytes = if compressed {
        let mut decoder = GzDecoder::new(&bytes[..]);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        decompressed
    } else {
        bytes
    };

    Ok(Some(serde_json::from_slice(&bytes)?))
}

fn write_snapshot(path: &Path, compressed: bool, bytes: &[u8]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{file_name}.tmp"));

    if compressed {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes)?;
        fs::write(&tmp, encoder.finish()?)?;
    } else {
        fs::write(&tmp, bytes)?;
    }

    fs::rename(&tmp, path)
}

/// Plain JSON snapshot cache; gzip-compresses when the path ends in `.gz`.
#[derive(Debug)]
pub struct JsonFileCache {
    snapshot: Snapshot,
}

impl JsonFileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let compressed = path.to_string_lossy().ends_with(".gz");
        Self {
            snapshot: Snapshot::new(path, compressed),
        }
    }
}

#[async_trait::async_trait]
impl Cache for JsonFileCache {
    async fn load(&self) -> Result<(), CacheError> {
        self.snapshot.load().await
    }

    async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.snapshot.get(key)
    }

    async fn set(&self, key: String, entry: CacheEntry) -> Result<(), CacheError> {
        self.snapshot.set(key, entry);
        Ok(())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.snapshot.flush().await
    }

    async fn tick(&self, interval: Duration) -> Result<(), CacheError> {
        self.snapshot.tick(interval).await
    }
}

/// Always-compressed snapshot cache, the portable stand-in for a native
/// binary dump.
#[derive(Debug)]
pub struct BinaryFileCache {
    snapshot: Snapshot,
}

impl BinaryFileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot: Snapshot::new(path.into(), true),
        }
    }
}

#[async_trait::async_trait]
impl Cache for BinaryFileCache {
    async fn load(&self) -> Result<(), CacheError> {
        self.snapshot.load().await
    }

    async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.snapshot.get(key)
    }

    async fn set(&self, key: String, entry: CacheEntry) -> Result<(), CacheError> {
        self.snapshot.set(key, entry);
        Ok(())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.snapshot.flush().await
    }

    async fn tick(&self, interval: Duration) -> Result<(), CacheError> {
        self.snapshot.tick(interval).await
    }
}
