//! Daemon startup and main loop for the player daemon
//!
//! Wires storage, classification, selection, the player and keyboard input
//! together and runs the control loop until SIGTERM/SIGINT.

use crate::config::Config;
use crate::controller::{Controller, MediaLibrary, UsbLibrary};
use crate::dispatch::{control_channel, ControlEvent, Dispatcher};
use crate::input::{spawn_keyboard_input, InputError};
use crate::player::{MpvLauncher, PlayerLauncher};
use crate::session::PlaybackSessionManager;
use crate::startup::{run_startup_checks, Capabilities};
use std::time::Duration;
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Keyboard input could not be set up
    #[error("Input initialization failed: {0}")]
    Input(#[from] InputError),

    /// Signal handler could not be installed
    #[error("Signal handling failed: {0}")]
    Signal(#[from] std::io::Error),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    /// Outcome of the startup checks
    pub capabilities: Capabilities,
    controller: Controller,
}

impl Daemon {
    /// Initialize the daemon, running startup checks first
    pub fn new(config: Config) -> Self {
        let capabilities = run_startup_checks(&config);
        Self::with_capabilities(config, capabilities)
    }

    /// Initialize the daemon without running startup checks
    ///
    /// Both external tools are assumed to be present.
    pub fn new_without_checks(config: Config) -> Self {
        Self::with_capabilities(config, Capabilities::assumed())
    }

    fn with_capabilities(config: Config, capabilities: Capabilities) -> Self {
        let library = UsbLibrary::from_config(
            &config.storage,
            &config.classifier,
            capabilities.probe_available,
        );
        info!(
            "Selection policy: {:?}, avoid repeat: {}, classification: {}",
            config.selection.policy,
            config.selection.avoid_repeat,
            if library.classifies() { "on" } else { "off" }
        );
        let launcher = MpvLauncher::new(config.player.clone());
        let controller = build_controller(&config, Box::new(library), Box::new(launcher));

        Self {
            config,
            capabilities,
            controller,
        }
    }

    /// Run the daemon until a shutdown signal arrives
    ///
    /// Fails only on invalid key bindings or if signal handlers cannot be
    /// installed. A missing keyboard is waited for.
    pub async fn run(self) -> Result<(), DaemonError> {
        let (tx, rx) = control_channel();

        let input = spawn_keyboard_input(&self.config.input, tx.clone())?;
        let signals = spawn_signal_listener(tx)?;

        info!("Ready. Press START to play a random video, STOP to stop.");
        let mut dispatcher = Dispatcher::new(self.controller, rx);
        dispatcher.run().await;

        input.abort();
        signals.abort();
        Ok(())
    }
}

/// Assembles the controller from its collaborators
pub fn build_controller(
    config: &Config,
    library: Box<dyn MediaLibrary>,
    launcher: Box<dyn PlayerLauncher>,
) -> Controller {
    let stop_timeout = Duration::from_secs(config.player.stop_timeout_secs);
    let sessions = PlaybackSessionManager::new(launcher, stop_timeout);
    Controller::new(library, sessions, config.selection.clone())
}

/// Turns SIGTERM and SIGINT into a `Shutdown` control event
fn spawn_signal_listener(
    tx: mpsc::Sender<ControlEvent>,
) -> Result<tokio::task::JoinHandle<()>, DaemonError> {
    let mut sigterm = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received"),
            _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
        }

        if tx.send(ControlEvent::Shutdown).await.is_err() {
            warn!("Control loop already gone");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::testing::{FakeLauncher, StaticLibrary};

    #[tokio::test]
    async fn test_daemon_initialization_without_checks() {
        let mut config = Config::default();
        // keep the test away from the system-wide cache file
        config.classifier.cache_path = std::path::PathBuf::new();
        let daemon = Daemon::new_without_checks(config.clone());
        assert_eq!(daemon.config, config);
        assert_eq!(daemon.capabilities, Capabilities::assumed());
        assert_eq!(daemon.controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_build_controller_uses_stop_timeout() {
        let mut config = Config::default();
        config.player.stop_timeout_secs = 0;
        let launcher = FakeLauncher::new();
        launcher.set_ignore_term(true);

        let mut controller = build_controller(
            &config,
            Box::new(StaticLibrary::new(&["/media/usb/a.mp4"])),
            Box::new(launcher.clone()),
        );
        controller.on_start_key().await.unwrap();
        controller.on_stop_key().await.unwrap();

        // zero grace period goes straight to SIGKILL
        assert_eq!(launcher.kill_calls(), 1);
        assert_eq!(controller.state(), SessionState::Idle);
    }
}
