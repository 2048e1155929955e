//! Persistent dedup store for recognized codes
//!
//! Insertion-ordered cache mapping decoded text to its first sighting,
//! capped at a configurable entry count and snapshotted to a JSON file on
//! every new insert. A single lock guards both the in-memory map and the
//! file write.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::recognize::CodeKind;
use crate::StorageConfig;

/// Timestamp format of stored entries; lexicographic order is
/// chronological order, which the partial-load sort relies on
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One recognized code, recorded at first sighting and never mutated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCode {
    /// Decoded text, the identity key
    pub info: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed code store {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// On-disk document shape: `{ "codes": [...] }`
#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    codes: Vec<StoredCode>,
}

/// Thread-safe, bounded, persisted dedup cache
pub struct CodeStore {
    path: PathBuf,
    max_entries: usize,
    inner: Mutex<IndexMap<String, StoredCode>>,
}

impl CodeStore {
    /// Open the store, loading the backing snapshot if one exists
    ///
    /// Load failures are logged and leave the store empty rather than
    /// refusing to start; an unreadable history must not block scanning.
    pub fn open(config: &StorageConfig) -> Self {
        let mut cache = IndexMap::new();

        match Self::load(&config.path, config.max_file_size, config.max_entries) {
            Ok(Some(codes)) => {
                for entry in codes {
                    cache.insert(entry.info.clone(), entry);
                }
                info!(entries = cache.len(), path = %config.path.display(), "loaded code store");
            }
            Ok(None) => {
                debug!(path = %config.path.display(), "no existing code store");
            }
            Err(e) => {
                warn!(error = %e, "failed to load code store, starting empty");
            }
        }

        Self {
            path: config.path.clone(),
            max_entries: config.max_entries.max(1),
            inner: Mutex::new(cache),
        }
    }

    /// Read the snapshot, partial-loading oversized histories
    ///
    /// If the file exceeds the size threshold or holds more entries than
    /// the cache admits, only the most recent `max_entries` survive. That
    /// trades completeness for bounded startup cost on a runaway file.
    fn load(
        path: &Path,
        max_file_size: u64,
        max_entries: usize,
    ) -> Result<Option<Vec<StoredCode>>, StorageError> {
        if !path.exists() {
            return Ok(None);
        }

        let size = fs::metadata(path)
            .map_err(|source| StorageError::Io {
                path: path.to_owned(),
                source,
            })?
            .len();
        let raw = fs::read(path).map_err(|source| StorageError::Io {
            path: path.to_owned(),
            source,
        })?;
        let snapshot: Snapshot =
            serde_json::from_slice(&raw).map_err(|source| StorageError::Malformed {
                path: path.to_owned(),
                source,
            })?;

        let mut codes = snapshot.codes;
        if size > max_file_size || codes.len() > max_entries {
            warn!(
                size,
                entries = codes.len(),
                keep = max_entries,
                "code store oversized, loading only the most recent entries"
            );
            codes.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            codes.truncate(max_entries);
            // Back to oldest-first so insertion order matches history
            codes.reverse();
        }
        Ok(Some(codes))
    }

    /// Record a code if it has not been seen before
    ///
    /// Returns `true` for a new insertion, `false` for a duplicate. The
    /// snapshot is rewritten on every insert; a write failure is logged and
    /// the in-memory cache stays authoritative for the session.
    pub fn add(&self, text: &str, kind: CodeKind) -> bool {
        let mut cache = self.inner.lock().expect("code store lock poisoned");

        if cache.contains_key(text) {
            debug!(code = text, "duplicate code ignored");
            return false;
        }

        if cache.len() >= self.max_entries {
            if let Some((oldest, _)) = cache.shift_remove_index(0) {
                info!(evicted = %oldest, "cache full, removed oldest entry");
            }
        }

        let entry = StoredCode {
            info: text.to_owned(),
            kind: kind.label().to_owned(),
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
        };
        info!(code = text, kind = %kind, "stored new code");
        cache.insert(text.to_owned(), entry);

        if let Err(e) = self.persist(&cache) {
            warn!(error = %e, "failed to persist code store");
        }
        true
    }

    /// All stored entries in insertion order
    pub fn get_all(&self) -> Vec<StoredCode> {
        let cache = self.inner.lock().expect("code store lock poisoned");
        cache.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("code store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize the full map and atomically replace the snapshot, so a
    /// crash mid-write can never leave a truncated document behind
    fn persist(&self, cache: &IndexMap<String, StoredCode>) -> Result<(), StorageError> {
        let snapshot = Snapshot {
            codes: cache.values().cloned().collect(),
        };
        let json =
            serde_json::to_vec_pretty(&snapshot).map_err(|source| StorageError::Malformed {
                path: self.path.clone(),
                source,
            })?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json).map_err(|source| StorageError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_config(dir: &TempDir, max_entries: usize) -> StorageConfig {
        StorageConfig {
            path: dir.path().join("codes.json"),
            max_entries,
            max_file_size: 100 * 1024 * 1024,
        }
    }

    #[test]
    fn add_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = CodeStore::open(&store_config(&dir, 10));

        assert!(store.add("ABC123", CodeKind::Qr));
        assert!(!store.add("ABC123", CodeKind::Qr));

        let all = store.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].info, "ABC123");
        assert_eq!(all[0].kind, "QR");
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let dir = TempDir::new().unwrap();
        let config = store_config(&dir, 3);
        let store = CodeStore::open(&config);

        for code in ["a", "b", "c", "d"] {
            assert!(store.add(code, CodeKind::Code128));
        }

        let all = store.get_all();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|e| e.info != "a"));
        assert_eq!(all.last().unwrap().info, "d");
    }

    #[test]
    fn snapshot_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let config = store_config(&dir, 10);

        {
            let store = CodeStore::open(&config);
            store.add("first", CodeKind::Qr);
            store.add("second", CodeKind::Ean13);
        }

        let store = CodeStore::open(&config);
        let all = store.get_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].info, "first");
        assert_eq!(all[1].info, "second");
        // Still deduplicates against reloaded history
        assert!(!store.add("first", CodeKind::Qr));
    }

    #[test]
    fn atomic_persist_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let config = store_config(&dir, 10);
        let store = CodeStore::open(&config);
        store.add("x", CodeKind::Qr);

        assert!(config.path.exists());
        assert!(!config.path.with_extension("json.tmp").exists());

        let raw = fs::read(&config.path).unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(doc["codes"][0]["info"], "x");
        assert_eq!(doc["codes"][0]["type"], "QR");
    }

    #[test]
    fn oversized_file_partial_loads_most_recent() {
        let dir = TempDir::new().unwrap();
        let mut config = store_config(&dir, 4);

        let codes: Vec<StoredCode> = (0..10)
            .map(|i| StoredCode {
                info: format!("code-{i}"),
                kind: "QR".into(),
                timestamp: format!("2026-08-24 10:00:{i:02}"),
            })
            .collect();
        let snapshot = serde_json::json!({ "codes": codes });
        fs::write(&config.path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

        // Force the partial-load path regardless of actual file size
        config.max_file_size = 1;
        let store = CodeStore::open(&config);

        let all = store.get_all();
        assert_eq!(all.len(), 4);
        let kept: Vec<&str> = all.iter().map(|e| e.info.as_str()).collect();
        assert_eq!(kept, ["code-6", "code-7", "code-8", "code-9"]);
    }

    #[test]
    fn malformed_snapshot_starts_empty() {
        let dir = TempDir::new().unwrap();
        let config = store_config(&dir, 10);
        fs::write(&config.path, b"{ not json").unwrap();

        let store = CodeStore::open(&config);
        assert!(store.is_empty());
        assert!(store.add("fresh", CodeKind::Qr));
    }
}
