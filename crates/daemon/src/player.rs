//! External player process handling.
//!
//! Builds the mpv command line and wraps the spawned child behind the small
//! [`PlayerProcess`] capability the session manager works with.

use crate::config::PlayerConfig;
use async_trait::async_trait;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};

/// Fixed flags: fullscreen, DRM hardware decoding, no terminal, no on-screen controls.
pub const BASE_PLAYER_ARGS: &[&str] = &[
    "--fullscreen",
    "--hwdec=drm",
    "--no-terminal",
    "--quiet",
    "--no-osc",
    "--no-osd-bar",
];

/// How a player process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerExit {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if the process was killed by one.
    pub signal: Option<i32>,
}

impl PlayerExit {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for PlayerExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl std::fmt::Display for PlayerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// A running player process.
#[async_trait]
pub trait PlayerProcess: Send {
    /// OS process id, if known.
    fn pid(&self) -> Option<u32>;

    /// Waits for the process to exit. Must be cancel-safe: dropping the
    /// future before completion loses nothing.
    async fn wait(&mut self) -> io::Result<PlayerExit>;

    /// Returns the exit status if the process has already exited.
    fn try_wait(&mut self) -> io::Result<Option<PlayerExit>>;

    /// Asks the process to exit (SIGTERM).
    fn terminate(&mut self) -> io::Result<()>;

    /// Forces the process to exit (SIGKILL).
    fn kill(&mut self) -> io::Result<()>;
}

/// Starts player processes.
pub trait PlayerLauncher: Send {
    fn launch(&mut self, file: &Path) -> io::Result<Box<dyn PlayerProcess>>;
}

/// Builds the player command for `file`.
///
/// Layout: `<binary> <base flags> --ao=<output> [--audio-device=..]
/// [--drm-mode=..] [extra args] <file>`
pub fn build_player_command(config: &PlayerConfig, file: &Path) -> Command {
    let mut cmd = Command::new(&config.binary);

    cmd.args(BASE_PLAYER_ARGS);
    cmd.arg(format!("--ao={}", config.audio_output));

    if !config.audio_device.is_empty() {
        cmd.arg(format!("--audio-device={}", config.audio_device));
    }

    if !config.display_mode.is_empty() {
        cmd.arg(format!("--drm-mode={}", config.display_mode));
    }

    cmd.args(&config.extra_args);
    cmd.arg(file);

    cmd
}

/// Launches mpv in its own process group with all stdio detached.
#[derive(Debug, Clone)]
pub struct MpvLauncher {
    config: PlayerConfig,
}

impl MpvLauncher {
    pub fn new(config: PlayerConfig) -> Self {
        Self { config }
    }
}

impl PlayerLauncher for MpvLauncher {
    fn launch(&mut self, file: &Path) -> io::Result<Box<dyn PlayerProcess>> {
        let mut cmd = build_player_command(&self.config, file);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .process_group(0);

        let child = cmd.spawn()?;
        let pid = child.id();
        Ok(Box::new(MpvProcess { child, pid }))
    }
}

/// A spawned mpv child. Signals go to its whole process group so helper
/// processes mpv forks die with it.
#[derive(Debug)]
pub struct MpvProcess {
    child: Child,
    pid: Option<u32>,
}

impl MpvProcess {
    fn signal_group(&mut self, signal: libc::c_int) -> io::Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
        // addresses the process group created at spawn.
        let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }
}

#[async_trait]
impl PlayerProcess for MpvProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn wait(&mut self) -> io::Result<PlayerExit> {
        self.child.wait().await.map(PlayerExit::from)
    }

    fn try_wait(&mut self) -> io::Result<Option<PlayerExit>> {
        Ok(self.child.try_wait()?.map(PlayerExit::from))
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.signal_group(libc::SIGTERM)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.signal_group(libc::SIGKILL)?;
        match self.child.start_kill() {
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }
}
