//! USB Random Video Player
//!
//! Kiosk daemon that plays a random video from attached USB storage when
//! START is pressed and stops it on STOP.

pub mod cache;
pub mod classify;
pub mod controller;
pub mod daemon;
pub mod dispatch;
pub mod input;
pub mod media;
pub mod player;
pub mod probe;
pub mod scan;
pub mod select;
pub mod session;
pub mod startup;

#[cfg(test)]
mod testing;

pub use cache::ClassificationCache;
pub use classify::{classify_stream, Classifier};
pub use controller::{ControlError, Controller, MediaLibrary, UsbLibrary};
pub use daemon::{build_controller, Daemon, DaemonError};
pub use dispatch::{control_channel, ControlEvent, Dispatcher};
pub use input::{
    diagnose_keyboard, find_keyboards, parse_key, spawn_keyboard_input, InputError, KeyBindings,
};
pub use media::{Bucket, BucketCounts, CandidatePool, MediaFile};
pub use player::{build_player_command, MpvLauncher, PlayerExit, PlayerLauncher, PlayerProcess};
pub use probe::{parse_ffprobe_output, FfprobeProber, ProbeError, Prober, VideoStreamInfo};
pub use rpi_random_player_config as config;
pub use rpi_random_player_config::Config;
pub use scan::{MountError, StorageScanner};
pub use select::{select, SelectError};
pub use session::{PlaybackError, PlaybackSessionManager, SessionExit, SessionState, StopOutcome};
pub use startup::{
    check_player_available, check_probe_available, parse_version_line, run_startup_checks,
    Capabilities, StartupError,
};
