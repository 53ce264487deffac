//! Persistent cache of classification results.
//!
//! Probing a file on a slow USB stick takes seconds, so buckets are remembered
//! across runs keyed by path and invalidated when size or mtime change.

use crate::media::{Bucket, MediaFile};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// One cached classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub mtime_ns: u64,
    pub size: u64,
    pub bucket: Bucket,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    entries: BTreeMap<String, serde_json::Value>,
}

fn mtime_ns(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// In-memory classification cache with optional JSON persistence.
#[derive(Debug, Default)]
pub struct ClassificationCache {
    path: Option<PathBuf>,
    entries: HashMap<PathBuf, CacheEntry>,
    dirty: bool,
}

impl ClassificationCache {
    /// A cache that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the cache from `path`. A missing or unreadable file yields an
    /// empty cache; individual malformed entries are dropped.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut cache = Self {
            path: Some(path.clone()),
            ..Self::default()
        };

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return cache,
            Err(e) => {
                debug!("Failed to read classification cache {}: {}", path.display(), e);
                return cache;
            }
        };

        let file: CacheFile = match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(e) => {
                debug!("Failed to parse classification cache {}: {}", path.display(), e);
                return cache;
            }
        };

        for (key, value) in file.entries {
            if let Ok(entry) = serde_json::from_value::<CacheEntry>(value) {
                cache.entries.insert(PathBuf::from(key), entry);
            }
        }

        if !cache.entries.is_empty() {
            info!("Loaded {} cached classifications", cache.entries.len());
        }
        cache
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached bucket for `file`, if the cached size and mtime still match.
    pub fn lookup(&self, file: &MediaFile) -> Option<Bucket> {
        let entry = self.entries.get(&file.path)?;
        if entry.size == file.size_bytes && entry.mtime_ns == mtime_ns(file.modified) {
            Some(entry.bucket)
        } else {
            None
        }
    }

    /// Records a classification. `Unclassified` is never cached so failed
    /// probes are retried.
    pub fn insert(&mut self, file: &MediaFile, bucket: Bucket) {
        if bucket == Bucket::Unclassified {
            return;
        }
        self.entries.insert(
            file.path.clone(),
            CacheEntry {
                mtime_ns: mtime_ns(file.modified),
                size: file.size_bytes,
                bucket,
            },
        );
        self.dirty = true;
    }

    /// Writes the cache back if anything changed since the last save.
    pub fn save(&mut self) -> io::Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let entries = self
            .entries
            .iter()
            .map(|(p, entry)| {
                let value = serde_json::to_value(entry)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                Ok((p.to_string_lossy().into_owned(), value))
            })
            .collect::<io::Result<BTreeMap<_, _>>>()?;

        let json = serde_json::to_string(&CacheFile { entries })
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        fs::write(path, json)?;
        self.dirty = false;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
