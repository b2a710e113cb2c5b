//! Persistent cache of benchmark outcomes.

use crate::settings::Dimensions;
use crate::util::MovAlignResult;
use std::collections::BTreeMap;

#[cfg(feature = "settings-file")]
use crate::util::MovAlignError;
#[cfg(feature = "settings-file")]
use std::path::{Path, PathBuf};

/// Cache key: operation name, requested shape and crop flag.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BenchmarkKey(String);

impl BenchmarkKey {
    pub fn new(operation: &str, requested: Dimensions, crop: bool) -> Self {
        Self(format!(
            "{operation}:{}x{}x{}x{}:{}",
            requested.x(),
            requested.y(),
            requested.z(),
            requested.n(),
            if crop { "crop" } else { "pad" }
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Stored outcome of one benchmark.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "settings-file", derive(serde::Serialize, serde::Deserialize))]
pub struct StoredSizes {
    pub x: usize,
    pub y: usize,
    pub batch: usize,
    /// Free device memory (MB) the benchmark ran with.
    pub min_memory_mb: usize,
}

/// Key-value store consulted by the size selector.
pub trait SettingsStore: Send {
    fn find(&self, key: &BenchmarkKey) -> Option<StoredSizes>;
    fn insert(&mut self, key: &BenchmarkKey, value: StoredSizes);
    /// Persists pending inserts.
    fn flush(&mut self) -> MovAlignResult<()>;
}

/// Process-local store; nothing survives the run.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<BenchmarkKey, StoredSizes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SettingsStore for MemoryStore {
    fn find(&self, key: &BenchmarkKey) -> Option<StoredSizes> {
        self.entries.get(key).copied()
    }

    fn insert(&mut self, key: &BenchmarkKey, value: StoredSizes) {
        self.entries.insert(key.clone(), value);
    }

    fn flush(&mut self) -> MovAlignResult<()> {
        Ok(())
    }
}

/// JSON file backed store. The whole file is rewritten on flush.
#[cfg(feature = "settings-file")]
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, StoredSizes>,
    dirty: bool,
}

#[cfg(feature = "settings-file")]
impl JsonFileStore {
    /// Opens `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> MovAlignResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(store_error)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(store_error(err)),
        };
        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(feature = "settings-file")]
fn store_error(err: impl std::fmt::Display) -> MovAlignError {
    MovAlignError::SettingsStore {
        reason: err.to_string(),
    }
}

#[cfg(feature = "settings-file")]
impl SettingsStore for JsonFileStore {
    fn find(&self, key: &BenchmarkKey) -> Option<StoredSizes> {
        self.entries.get(key.as_str()).copied()
    }

    fn insert(&mut self, key: &BenchmarkKey, value: StoredSizes) {
        self.entries.insert(key.as_str().to_owned(), value);
        self.dirty = true;
    }

    fn flush(&mut self) -> MovAlignResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let text = serde_json::to_string_pretty(&self.entries).map_err(store_error)?;
        std::fs::write(&self.path, text).map_err(store_error)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{BenchmarkKey, MemoryStore, SettingsStore, StoredSizes};
    use crate::settings::Dimensions;

    #[test]
    fn key_distinguishes_crop_and_operation() {
        let d = Dimensions::frames(4096, 4096, 40).unwrap();
        assert_ne!(BenchmarkKey::new("movie", d, true), BenchmarkKey::new("movie", d, false));
        assert_ne!(BenchmarkKey::new("movie", d, true), BenchmarkKey::new("corr", d, true));
        assert_eq!(BenchmarkKey::new("movie", d, true).as_str(), "movie:4096x4096x1x40:crop");
    }

    #[test]
    fn memory_store_round_trip() {
        let mut store = MemoryStore::new();
        let key = BenchmarkKey::new("op", Dimensions::frames(8, 8, 1).unwrap(), false);
        assert!(store.find(&key).is_none());
        let value = StoredSizes {
            x: 8,
            y: 8,
            batch: 1,
            min_memory_mb: 3,
        };
        store.insert(&key, value);
        store.flush().unwrap();
        assert_eq!(store.find(&key), Some(value));
        assert_eq!(store.len(), 1);
    }

    #[cfg(feature = "settings-file")]
    #[test]
    fn json_store_persists_entries() {
        use super::JsonFileStore;
        let path = std::env::temp_dir().join(format!("movalign-store-{}.json", std::process::id()));
        let key = BenchmarkKey::new("op", Dimensions::frames(16, 8, 2).unwrap(), true);
        let value = StoredSizes {
            x: 16,
            y: 8,
            batch: 2,
            min_memory_mb: 1,
        };
        {
            let mut store = JsonFileStore::open(&path).unwrap();
            store.insert(&key, value);
            store.flush().unwrap();
        }
        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.find(&key), Some(value));
        let _ = std::fs::remove_file(&path);
    }
}
