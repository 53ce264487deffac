//! Media files and the candidate pool they are drawn from.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Confidence that the player can decode a file smoothly on the target board.
///
/// Ordered from most to least confident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// Decodes comfortably (h264, sub-4K 8-bit hevc).
    Safe,
    /// 4K 8-bit hevc; usually fine.
    Medium,
    /// 4K 10-bit hevc; likely to stutter.
    Risky,
    /// Not probed, or the probe failed.
    Unclassified,
}

impl Default for Bucket {
    fn default() -> Self {
        Self::Unclassified
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bucket::Safe => write!(f, "safe"),
            Bucket::Medium => write!(f, "medium"),
            Bucket::Risky => write!(f, "risky"),
            Bucket::Unclassified => write!(f, "unclassified"),
        }
    }
}

/// A playable video discovered during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    /// Absolute path to the file.
    pub path: PathBuf,
    /// File size in bytes at discovery time.
    pub size_bytes: u64,
    /// Last modified time, used to validate cached classifications.
    pub modified: SystemTime,
    /// Classification bucket.
    pub bucket: Bucket,
}

impl MediaFile {
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64, modified: SystemTime) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            modified,
            bucket: Bucket::Unclassified,
        }
    }

    pub fn with_bucket(mut self, bucket: Bucket) -> Self {
        self.bucket = bucket;
        self
    }

    /// Two scans produce distinct instances; identity is the path.
    pub fn same_file(&self, other: &MediaFile) -> bool {
        self.path == other.path
    }
}

/// Per-bucket file counts, mostly for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketCounts {
    pub safe: usize,
    pub medium: usize,
    pub risky: usize,
    pub unclassified: usize,
}

impl BucketCounts {
    /// Counts the buckets of `files`.
    pub fn tally<'a>(files: impl IntoIterator<Item = &'a MediaFile>) -> Self {
        let mut counts = Self::default();
        for file in files {
            match file.bucket {
                Bucket::Safe => counts.safe += 1,
                Bucket::Medium => counts.medium += 1,
                Bucket::Risky => counts.risky += 1,
                Bucket::Unclassified => counts.unclassified += 1,
            }
        }
        counts
    }
}

impl std::fmt::Display for BucketCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "safe={} medium={} risky={} unclassified={}",
            self.safe, self.medium, self.risky, self.unclassified
        )
    }
}

/// The set of files eligible for playback, rebuilt from scratch on every scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidatePool {
    files: Vec<MediaFile>,
}

impl CandidatePool {
    pub fn new(files: Vec<MediaFile>) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &[MediaFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.iter().any(|f| f.path == path)
    }

    pub fn counts(&self) -> BucketCounts {
        BucketCounts::tally(&self.files)
    }

    /// Paths in sorted order, for order-insensitive comparison.
    pub fn sorted_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.files.iter().map(|f| f.path.clone()).collect();
        paths.sort();
        paths
    }

    pub fn into_files(self) -> Vec<MediaFile> {
        self.files
    }
}

impl FromIterator<MediaFile> for CandidatePool {
    fn from_iter<T: IntoIterator<Item = MediaFile>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
