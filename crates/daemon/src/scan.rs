//! Scanner module for discovering video files on removable storage.
//!
//! Mount points are collected from the kernel mount table and from the
//! conventional automount roots. When nothing is mounted the scanner tries to
//! mount a raw USB partition read-only before giving up.

use crate::config::StorageConfig;
use crate::media::{CandidatePool, MediaFile};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Video file extensions picked up by the scanner (case-insensitive matching).
pub const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mkv"];

/// Filesystems a USB stick is realistically formatted with.
pub const USB_FILESYSTEMS: &[&str] = &["vfat", "exfat", "ntfs", "ntfs3", "ext4", "ext3", "ext2"];

/// Error type for the raw-partition mount fallback.
#[derive(Debug, Error)]
pub enum MountError {
    /// No partition node matched the naming convention.
    #[error("no raw USB partitions found in {0}")]
    NoPartitions(PathBuf),

    /// The mount command could not be executed.
    #[error("failed to run mount: {0}")]
    Io(#[from] std::io::Error),

    /// The mount command ran and reported failure.
    #[error("mount of {device} on {target} failed: {reason}")]
    Failed {
        device: PathBuf,
        target: PathBuf,
        reason: String,
    },
}

/// Mounts a block device read-only.
pub trait Mounter: Send {
    fn mount_read_only(&self, device: &Path, target: &Path) -> Result<(), MountError>;
}

/// Runs the system `mount` binary.
#[derive(Debug, Default, Clone)]
pub struct SystemMounter;

impl Mounter for SystemMounter {
    fn mount_read_only(&self, device: &Path, target: &Path) -> Result<(), MountError> {
        fs::create_dir_all(target)?;

        let output = Command::new("mount")
            .args(["-o", "ro"])
            .arg(device)
            .arg(target)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MountError::Failed {
                device: device.to_path_buf(),
                target: target.to_path_buf(),
                reason: format!("{} ({})", stderr.trim(), output.status),
            });
        }

        Ok(())
    }
}

/// Checks if a file has a video extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            VIDEO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Extracts USB mount points from `/proc/mounts` content.
///
/// Only `/dev/sd*` sources with a filesystem from [`USB_FILESYSTEMS`] count.
/// Octal escapes (`\040` for space) in mount points are decoded.
pub fn parse_proc_mounts(content: &str) -> Vec<PathBuf> {
    content
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let source = parts.next()?;
            let mountpoint = parts.next()?;
            let fs_type = parts.next()?;
            if source.starts_with("/dev/sd") && USB_FILESYSTEMS.contains(&fs_type) {
                Some(PathBuf::from(unescape_mount_path(mountpoint)))
            } else {
                None
            }
        })
        .collect()
}

/// Devices (as listed in the first column) that are currently mounted.
fn mounted_sources(content: &str) -> HashSet<PathBuf> {
    content
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(PathBuf::from)
        .collect()
}

fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u16, |acc, b| acc * 8 + u16::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Whether a `/dev` entry name looks like a USB disk partition (`sda1`, `sdb12`).
pub fn is_raw_partition_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix("sd") else {
        return false;
    };
    let letters = rest.chars().take_while(|c| c.is_ascii_lowercase()).count();
    let digits = &rest[letters..];
    letters > 0 && !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Lists raw partition nodes in `device_dir`, sorted by name.
pub fn list_raw_partitions(device_dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(device_dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot list {}: {}", device_dir.display(), e);
            return Vec::new();
        }
    };

    let mut partitions: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(is_raw_partition_name)
                .unwrap_or(false)
        })
        .map(|e| e.path())
        .collect();
    partitions.sort();
    partitions
}

/// Walks each mount root and collects readable `.mp4`/`.mkv` files.
///
/// Unreadable subtrees, hidden directories and symlinks are skipped. A file
/// reachable from more than one root is reported once.
pub fn scan_mounts(mounts: &[PathBuf]) -> Vec<MediaFile> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for root in mounts {
        if !root.is_dir() {
            continue;
        }

        let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
            // Skip hidden directories (.Trashes, .Spotlight-V100, ...) below the root
            if entry.file_type().is_dir() && entry.depth() > 0 {
                if let Some(name) = entry.file_name().to_str() {
                    if name.starts_with('.') {
                        return false;
                    }
                }
            }
            true
        });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !is_video_file(entry.path()) {
                continue;
            }

            let path = entry.path().to_path_buf();
            if !seen.insert(path.clone()) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            if let Err(e) = fs::File::open(&path) {
                debug!("Skipping unreadable file {}: {}", path.display(), e);
                continue;
            }

            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push(MediaFile::new(path, metadata.len(), modified));
        }
    }

    files
}

/// Finds removable storage and lists the video files on it.
pub struct StorageScanner {
    config: StorageConfig,
    mounter: Box<dyn Mounter>,
}

impl StorageScanner {
    pub fn new(config: StorageConfig) -> Self {
        Self::with_mounter(config, Box::new(SystemMounter))
    }

    pub fn with_mounter(config: StorageConfig, mounter: Box<dyn Mounter>) -> Self {
        Self { config, mounter }
    }

    fn read_proc_mounts(&self) -> String {
        fs::read_to_string(&self.config.proc_mounts).unwrap_or_else(|e| {
            debug!("Cannot read {}: {}", self.config.proc_mounts.display(), e);
            String::new()
        })
    }

    /// Mount points from the mount table plus subdirectories of the scan roots.
    pub fn discover_mounts(&self) -> Vec<PathBuf> {
        let mut mounts: BTreeSet<PathBuf> = parse_proc_mounts(&self.read_proc_mounts())
            .into_iter()
            .collect();

        for root in &self.config.scan_roots {
            let Ok(entries) = fs::read_dir(root) else {
                continue;
            };
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                // An empty fallback directory is not storage; it only counts once mounted
                if path == self.config.fallback_mount_root {
                    continue;
                }
                if path.is_dir() {
                    mounts.insert(path);
                }
            }
        }

        mounts.into_iter().collect()
    }

    /// Mounts the first raw partition that is not already mounted.
    pub fn mount_fallback(&self) -> Result<PathBuf, MountError> {
        let mounted = mounted_sources(&self.read_proc_mounts());
        let partitions: Vec<PathBuf> = list_raw_partitions(&self.config.device_dir)
            .into_iter()
            .filter(|p| !mounted.contains(p))
            .collect();

        if partitions.is_empty() {
            return Err(MountError::NoPartitions(self.config.device_dir.clone()));
        }

        let target = &self.config.fallback_mount_root;
        let mut last_error = None;
        for device in partitions {
            match self.mounter.mount_read_only(&device, target) {
                Ok(()) => {
                    info!("Mounted {} read-only on {}", device.display(), target.display());
                    return Ok(target.clone());
                }
                Err(e) => {
                    debug!("Mount attempt failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| MountError::NoPartitions(self.config.device_dir.clone())))
    }

    /// Scans all storage and returns an unclassified pool.
    ///
    /// Directories under the scan roots may be empty automount points, so the
    /// raw-partition fallback runs whenever the discovered mounts hold no
    /// videos, not only when nothing was discovered.
    pub fn scan(&self) -> CandidatePool {
        let mut mounts = self.discover_mounts();
        log_mounts(&mounts);

        let mut files = scan_mounts(&mounts);

        if files.is_empty() && self.config.mount_fallback {
            match self.mount_fallback() {
                Ok(root) => {
                    files = scan_mounts(std::slice::from_ref(&root));
                    mounts.push(root);
                    log_mounts(&mounts);
                }
                Err(e) => warn!("No USB storage available: {}", e),
            }
        }

        info!("Found {} candidate video files", files.len());
        CandidatePool::new(files)
    }
}

fn log_mounts(mounts: &[PathBuf]) {
    if mounts.is_empty() {
        info!("Detected mounts for scanning: <none>");
    } else {
        let listed: Vec<String> = mounts.iter().map(|m| m.display().to_string()).collect();
        info!("Detected mounts for scanning: {}", listed.join(", "));
    }
}
