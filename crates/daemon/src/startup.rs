//! Startup checks for the player daemon
//!
//! Verifies the external tools before the control loop starts:
//! - the player binary (mpv) runs; if not, playback attempts will fail
//! - ffprobe runs; if not, classification is disabled

use crate::config::Config;
use std::process::Command;
use thiserror::Error;
use tracing::{error, info, warn};

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Player not available: {0}")]
    PlayerUnavailable(String),

    #[error("ffprobe not available: {0}")]
    ProbeUnavailable(String),
}

/// Extract the version token from a `--version` style banner
///
/// Handles the formats printed by the tools we use:
/// - mpv: "mpv 0.35.1 Copyright © 2000-2023 mpv/MPlayer/mplayer2 projects"
/// - mpv git builds: "mpv v0.36.0-dirty ..."
/// - ffprobe: "ffprobe version 6.0 Copyright (c) 2007-2023 the FFmpeg developers"
/// - ffprobe distro builds: "ffprobe version n6.1-3-gabc123 ..."
pub fn parse_version_line(output: &str, program: &str) -> Option<String> {
    let program = program.to_lowercase();
    let line = output
        .lines()
        .find(|line| line.to_lowercase().starts_with(&program))?;

    let rest = line.get(program.len()..)?.trim_start();
    let rest = rest.strip_prefix("version").unwrap_or(rest).trim_start();
    let token = rest.split_whitespace().next()?;
    let token = token.trim_start_matches(|c| c == 'v' || c == 'n');

    if token.chars().next()?.is_ascii_digit() {
        Some(token.to_string())
    } else {
        None
    }
}

fn program_name(binary: &str) -> &str {
    binary.rsplit('/').next().unwrap_or(binary)
}

fn run_version(binary: &str, flag: &str) -> Result<String, String> {
    let output = Command::new(binary)
        .arg(flag)
        .output()
        .map_err(|e| {
            format!(
                "{} {} failed; is it installed and in PATH? Error: {}",
                binary, flag, e
            )
        })?;

    if !output.status.success() {
        return Err(format!("{} {} exited with {}", binary, flag, output.status));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Check that the player binary runs, returning its version
pub fn check_player_available(binary: &str) -> Result<String, StartupError> {
    let output = run_version(binary, "--version").map_err(StartupError::PlayerUnavailable)?;
    Ok(version_or_unknown(&output, binary))
}

/// Check that ffprobe runs, returning its version
pub fn check_probe_available(binary: &str) -> Result<String, StartupError> {
    let output = run_version(binary, "-version").map_err(StartupError::ProbeUnavailable)?;
    Ok(version_or_unknown(&output, binary))
}

fn version_or_unknown(output: &str, binary: &str) -> String {
    parse_version_line(output, program_name(binary)).unwrap_or_else(|| "unknown".to_string())
}

/// What the startup checks found that changes how the daemon runs.
///
/// A missing player is only logged; playback attempts then fail one by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub probe_available: bool,
}

impl Capabilities {
    /// What to assume when checks are skipped.
    pub fn assumed() -> Self {
        Self {
            probe_available: true,
        }
    }
}

/// Run all startup checks and log their results
pub fn run_startup_checks(cfg: &Config) -> Capabilities {
    match check_player_available(&cfg.player.binary) {
        Ok(version) => info!("Player: {} {}", cfg.player.binary, version),
        Err(e) => error!("{}. Playback will fail until it is installed.", e),
    }

    let probe_available = if cfg.classifier.enabled {
        match check_probe_available(&cfg.classifier.ffprobe_path) {
            Ok(version) => {
                info!("ffprobe: {}", version);
                true
            }
            Err(e) => {
                warn!("{}. Videos will be picked without classification.", e);
                false
            }
        }
    } else {
        false
    };

    Capabilities { probe_available }
}
