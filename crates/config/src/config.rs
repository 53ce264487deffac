//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Where removable storage is looked for
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Directories whose immediate subdirectories are treated as mount points
    #[serde(default = "default_scan_roots")]
    pub scan_roots: Vec<PathBuf>,
    /// Mount table to read (`/proc/mounts` on Linux)
    #[serde(default = "default_proc_mounts")]
    pub proc_mounts: PathBuf,
    /// Directory holding raw block device nodes
    #[serde(default = "default_device_dir")]
    pub device_dir: PathBuf,
    /// Try to mount a raw partition read-only when nothing is mounted
    #[serde(default = "default_true")]
    pub mount_fallback: bool,
    /// Target directory for the fallback mount
    #[serde(default = "default_fallback_mount_root")]
    pub fallback_mount_root: PathBuf,
}

fn default_scan_roots() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/media"),
        PathBuf::from("/run/media"),
        PathBuf::from("/mnt"),
    ]
}

fn default_proc_mounts() -> PathBuf {
    PathBuf::from("/proc/mounts")
}

fn default_device_dir() -> PathBuf {
    PathBuf::from("/dev")
}

fn default_fallback_mount_root() -> PathBuf {
    PathBuf::from("/mnt/usb")
}

fn default_true() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            scan_roots: default_scan_roots(),
            proc_mounts: default_proc_mounts(),
            device_dir: default_device_dir(),
            mount_fallback: true,
            fallback_mount_root: default_fallback_mount_root(),
        }
    }
}

/// ffprobe-based classification settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifierConfig {
    /// Probe files and weight selection by bucket (default true)
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// ffprobe binary name or path
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    /// Per-file probe timeout in seconds (default 4)
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Uncached files probed per scan (0 = unlimited, default 4)
    #[serde(default = "default_max_probes_per_scan")]
    pub max_probes_per_scan: usize,
    /// JSON file the classification cache is persisted to (empty = memory only)
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    4
}

fn default_max_probes_per_scan() -> usize {
    4
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("/var/cache/rpi-random-player/classification-cache.json")
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ffprobe_path: default_ffprobe_path(),
            probe_timeout_secs: default_probe_timeout_secs(),
            max_probes_per_scan: default_max_probes_per_scan(),
            cache_path: default_cache_path(),
        }
    }
}

/// How the next file is drawn from the candidate pool
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// 80/20 draw over the safe/medium buckets, risky only as a last resort
    #[default]
    Weighted,
    /// Every file equally likely
    Uniform,
}

impl std::str::FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "weighted" => Ok(SelectionPolicy::Weighted),
            "uniform" => Ok(SelectionPolicy::Uniform),
            other => Err(format!("unknown selection policy '{}'", other)),
        }
    }
}

/// Selection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectionConfig {
    #[serde(default)]
    pub policy: SelectionPolicy,
    /// Never pick the previous file twice in a row when another exists
    #[serde(default = "default_true")]
    pub avoid_repeat: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            policy: SelectionPolicy::default(),
            avoid_repeat: true,
        }
    }
}

/// External player settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerConfig {
    /// Player binary name or path
    #[serde(default = "default_player_binary")]
    pub binary: String,
    /// Audio output driver passed as `--ao`
    #[serde(default = "default_audio_output")]
    pub audio_output: String,
    /// Audio device passed as `--audio-device` (empty = player default)
    #[serde(default)]
    pub audio_device: String,
    /// DRM display mode passed as `--drm-mode` (empty = player default)
    #[serde(default)]
    pub display_mode: String,
    /// Extra arguments appended before the file path
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Seconds to wait after SIGTERM before escalating to SIGKILL
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

fn default_player_binary() -> String {
    "mpv".to_string()
}

fn default_audio_output() -> String {
    "alsa".to_string()
}

fn default_stop_timeout_secs() -> u64 {
    3
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            binary: default_player_binary(),
            audio_output: default_audio_output(),
            audio_device: String::new(),
            display_mode: String::new(),
            extra_args: Vec::new(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

/// Keyboard settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputConfig {
    /// Key that starts (or reshuffles) playback
    #[serde(default = "default_start_key")]
    pub start_key: String,
    /// Key that stops playback
    #[serde(default = "default_stop_key")]
    pub stop_key: String,
    /// Grab keyboards exclusively so key presses do not reach the console
    #[serde(default = "default_true")]
    pub grab: bool,
}

fn default_start_key() -> String {
    "S".to_string()
}

fn default_stop_key() -> String {
    "E".to_string()
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            start_key: default_start_key(),
            stop_key: default_stop_key(),
            grab: true,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub input: InputConfig,
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// The provisioning scripts write these into the service environment file:
    /// - PLAYER_AUDIO_DEVICE -> player.audio_device
    /// - PLAYER_DISPLAY_MODE -> player.display_mode
    /// - PLAYER_AUDIO_OUTPUT -> player.audio_output
    /// - PLAYER_STOP_TIMEOUT_SECS -> player.stop_timeout_secs
    /// - CLASSIFIER_ENABLED -> classifier.enabled
    /// - SELECTION_POLICY -> selection.policy
    /// - INPUT_START_KEY -> input.start_key
    /// - INPUT_STOP_KEY -> input.stop_key
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("PLAYER_AUDIO_DEVICE") {
            self.player.audio_device = val.trim().to_string();
        }

        if let Ok(val) = env::var("PLAYER_DISPLAY_MODE") {
            self.player.display_mode = val.trim().to_string();
        }

        if let Ok(val) = env::var("PLAYER_AUDIO_OUTPUT") {
            if !val.trim().is_empty() {
                self.player.audio_output = val.trim().to_string();
            }
        }

        if let Ok(val) = env::var("PLAYER_STOP_TIMEOUT_SECS") {
            if let Ok(secs) = val.trim().parse::<u64>() {
                self.player.stop_timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("CLASSIFIER_ENABLED") {
            if let Some(enabled) = parse_bool(val.trim()) {
                self.classifier.enabled = enabled;
            }
        }

        if let Ok(val) = env::var("SELECTION_POLICY") {
            if let Ok(policy) = val.parse::<SelectionPolicy>() {
                self.selection.policy = policy;
            }
        }

        if let Ok(val) = env::var("INPUT_START_KEY") {
            if !val.trim().is_empty() {
                self.input.start_key = val.trim().to_string();
            }
        }

        if let Ok(val) = env::var("INPUT_STOP_KEY") {
            if !val.trim().is_empty() {
                self.input.stop_key = val.trim().to_string();
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }
}
