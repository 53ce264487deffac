//! Playback session lifecycle.
//!
//! The manager owns the only handle to the player process. Every start,
//! stop and exit goes through it, which is what keeps at most one player
//! alive at a time.

use crate::media::MediaFile;
use crate::player::{PlayerExit, PlayerLauncher, PlayerProcess};
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Error type for playback operations.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// The player could not be spawned.
    #[error("Failed to start player for {path}: {source}")]
    StartFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The player ignored SIGTERM for the whole grace period.
    #[error("Player did not exit within {0:?} of SIGTERM")]
    TerminationTimeout(Duration),

    /// SIGKILL failed or the player survived it.
    #[error("Failed to kill player: {0}")]
    KillFailed(String),

    /// A player left over from a failed kill is still alive.
    #[error("Previous player process is still running")]
    PreviousStillRunning,
}

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Playing,
    Stopping,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Starting => write!(f, "starting"),
            SessionState::Playing => write!(f, "playing"),
            SessionState::Stopping => write!(f, "stopping"),
        }
    }
}

/// How a `stop` concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was playing.
    AlreadyIdle,
    /// The player exited after SIGTERM (or had already exited).
    Graceful(PlayerExit),
    /// The player needed SIGKILL.
    Forced(PlayerExit),
}

/// One running player plus the file it plays.
pub struct PlaybackSession {
    pub id: u64,
    pub file: MediaFile,
    pub started_at: Instant,
    process: Box<dyn PlayerProcess>,
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("id", &self.id)
            .field("file", &self.file.path)
            .field("pid", &self.process.pid())
            .finish()
    }
}

/// A player exit observed outside of `stop`.
#[derive(Debug)]
pub struct SessionExit {
    pub id: u64,
    pub file: MediaFile,
    pub status: io::Result<PlayerExit>,
}

/// Starts, stops and watches the player.
pub struct PlaybackSessionManager {
    launcher: Box<dyn PlayerLauncher>,
    stop_timeout: Duration,
    state: SessionState,
    current: Option<PlaybackSession>,
    orphan: Option<Box<dyn PlayerProcess>>,
    next_id: u64,
}

impl PlaybackSessionManager {
    pub fn new(launcher: Box<dyn PlayerLauncher>, stop_timeout: Duration) -> Self {
        Self {
            launcher,
            stop_timeout,
            state: SessionState::Idle,
            current: None,
            orphan: None,
            next_id: 1,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current(&self) -> Option<&PlaybackSession> {
        self.current.as_ref()
    }

    pub fn current_file(&self) -> Option<&MediaFile> {
        self.current.as_ref().map(|s| &s.file)
    }

    pub fn has_orphan(&self) -> bool {
        self.orphan.is_some()
    }

    /// Plays `file`, replacing whatever is playing. Returns the new session id.
    ///
    /// The previous player is fully reaped before the new one is spawned.
    pub async fn start(&mut self, file: MediaFile) -> Result<u64, PlaybackError> {
        if self.current.is_some() {
            debug!("Restart requested, stopping current player first");
            self.stop().await?;
        }

        self.reap_orphan().await?;

        self.state = SessionState::Starting;
        let process = match self.launcher.launch(&file.path) {
            Ok(process) => process,
            Err(source) => {
                self.state = SessionState::Idle;
                return Err(PlaybackError::StartFailed {
                    path: file.path,
                    source,
                });
            }
        };

        let id = self.next_id;
        self.next_id += 1;
        info!(
            "Session {} playing {} [{}] (pid {:?})",
            id,
            file.path.display(),
            file.bucket,
            process.pid()
        );

        self.current = Some(PlaybackSession {
            id,
            file,
            started_at: Instant::now(),
            process,
        });
        self.state = SessionState::Playing;
        Ok(id)
    }

    /// Stops playback: SIGTERM, bounded wait, then SIGKILL and another
    /// bounded wait. A no-op when idle.
    ///
    /// The state is `Idle` afterwards even on `KillFailed`; the surviving
    /// process is kept as an orphan and reaped before the next start.
    pub async fn stop(&mut self) -> Result<StopOutcome, PlaybackError> {
        let Some(mut session) = self.current.take() else {
            return Ok(StopOutcome::AlreadyIdle);
        };
        self.state = SessionState::Stopping;
        let result = self.terminate_session(&mut session).await;
        self.state = SessionState::Idle;

        match &result {
            Ok(StopOutcome::Graceful(exit)) | Ok(StopOutcome::Forced(exit)) => {
                info!(
                    "Session {} stopped after {:.1}s ({})",
                    session.id,
                    session.started_at.elapsed().as_secs_f64(),
                    exit
                );
            }
            Ok(StopOutcome::AlreadyIdle) => {}
            Err(e) => {
                error!("Session {}: {}", session.id, e);
                self.orphan = Some(session.process);
            }
        }
        result
    }

    async fn terminate_session(
        &self,
        session: &mut PlaybackSession,
    ) -> Result<StopOutcome, PlaybackError> {
        let process = &mut session.process;

        // An exit may already be pending if it raced with the stop request.
        if let Ok(Some(exit)) = process.try_wait() {
            return Ok(StopOutcome::Graceful(exit));
        }

        if let Err(e) = process.terminate() {
            warn!("Failed to send SIGTERM to player: {}", e);
        }

        match timeout(self.stop_timeout, process.wait()).await {
            Ok(Ok(exit)) => return Ok(StopOutcome::Graceful(exit)),
            Ok(Err(e)) => warn!("Waiting for player failed: {}", e),
            Err(_) => warn!(
                "{}, sending SIGKILL",
                PlaybackError::TerminationTimeout(self.stop_timeout)
            ),
        }

        process
            .kill()
            .map_err(|e| PlaybackError::KillFailed(e.to_string()))?;

        match timeout(self.stop_timeout, process.wait()).await {
            Ok(Ok(exit)) => Ok(StopOutcome::Forced(exit)),
            Ok(Err(e)) => Err(PlaybackError::KillFailed(e.to_string())),
            Err(_) => Err(PlaybackError::KillFailed(format!(
                "still running {:?} after SIGKILL",
                self.stop_timeout
            ))),
        }
    }

    async fn reap_orphan(&mut self) -> Result<(), PlaybackError> {
        let Some(orphan) = self.orphan.as_mut() else {
            return Ok(());
        };

        if let Ok(Some(exit)) = orphan.try_wait() {
            debug!("Reaped leftover player ({})", exit);
            self.orphan = None;
            return Ok(());
        }

        if let Err(e) = orphan.kill() {
            debug!("Retrying SIGKILL on leftover player failed: {}", e);
        }
        match timeout(self.stop_timeout, orphan.wait()).await {
            Ok(Ok(exit)) => {
                debug!("Reaped leftover player ({})", exit);
                self.orphan = None;
                Ok(())
            }
            _ => Err(PlaybackError::PreviousStillRunning),
        }
    }

    /// Resolves when the current player exits on its own. Pending forever
    /// while idle. Cancel-safe: dropping it loses no exit.
    pub async fn next_exit(&mut self) -> SessionExit {
        let Some(session) = self.current.as_mut() else {
            return std::future::pending().await;
        };
        let status = session.process.wait().await;
        SessionExit {
            id: session.id,
            file: session.file.clone(),
            status,
        }
    }

    /// Clears the session that produced `exit`. Returns false if that
    /// session is no longer current.
    pub fn acknowledge_exit(&mut self, exit: &SessionExit) -> bool {
        match &self.current {
            Some(session) if session.id == exit.id => {
                let elapsed = session.started_at.elapsed();
                match &exit.status {
                    Ok(status) => info!(
                        "Session {} ended after {:.1}s ({})",
                        exit.id,
                        elapsed.as_secs_f64(),
                        status
                    ),
                    Err(e) => warn!("Session {} ended, wait failed: {}", exit.id, e),
                }
                self.current = None;
                self.state = SessionState::Idle;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{script_player, FakeLauncher};
    use std::time::SystemTime;

    const STOP_TIMEOUT: Duration = Duration::from_millis(50);

    fn media(path: &str) -> MediaFile {
        MediaFile::new(path, 1, SystemTime::UNIX_EPOCH)
    }

    fn manager() -> (PlaybackSessionManager, FakeLauncher) {
        let launcher = FakeLauncher::new();
        let manager = PlaybackSessionManager::new(Box::new(launcher.clone()), STOP_TIMEOUT);
        (manager, launcher)
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (mut manager, launcher) = manager();
        assert_eq!(manager.state(), SessionState::Idle);

        let id = manager.start(media("/media/usb/a.mp4")).await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(manager.state(), SessionState::Playing);
        assert_eq!(launcher.alive(), 1);

        let outcome = manager.stop().await.unwrap();
        assert_eq!(outcome, StopOutcome::Graceful(PlayerExit::signaled(15)));
        assert_eq!(manager.state(), SessionState::Idle);
        assert_eq!(launcher.alive(), 0);
        assert_eq!(launcher.kill_calls(), 0);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let (mut manager, launcher) = manager();
        assert_eq!(manager.stop().await.unwrap(), StopOutcome::AlreadyIdle);
        assert_eq!(launcher.terminate_calls(), 0);
    }

    #[tokio::test]
    async fn test_restart_reaps_before_spawning() {
        let (mut manager, launcher) = manager();
        let first = manager.start(media("/media/usb/a.mp4")).await.unwrap();
        let second = manager.start(media("/media/usb/b.mp4")).await.unwrap();

        assert!(second > first);
        assert_eq!(launcher.launched().len(), 2);
        assert_eq!(launcher.terminate_calls(), 1);
        assert_eq!(launcher.alive(), 1);
        assert_eq!(launcher.max_alive(), 1);
        assert_eq!(manager.current_file().unwrap().path, PathBuf::from("/media/usb/b.mp4"));
    }

    #[tokio::test]
    async fn test_stop_escalates_to_sigkill() {
        let (mut manager, launcher) = manager();
        launcher.set_ignore_term(true);
        manager.start(media("/media/usb/a.mp4")).await.unwrap();

        let outcome = manager.stop().await.unwrap();
        assert_eq!(outcome, StopOutcome::Forced(PlayerExit::signaled(9)));
        assert_eq!(launcher.kill_calls(), 1);
        assert_eq!(launcher.alive(), 0);
    }

    #[tokio::test]
    async fn test_kill_failure_keeps_orphan_and_blocks_start() {
        let (mut manager, launcher) = manager();
        launcher.set_ignore_term(true);
        launcher.set_kill_fails(true);
        manager.start(media("/media/usb/a.mp4")).await.unwrap();

        assert!(matches!(manager.stop().await, Err(PlaybackError::KillFailed(_))));
        assert_eq!(manager.state(), SessionState::Idle);
        assert!(manager.has_orphan());

        let result = manager.start(media("/media/usb/b.mp4")).await;
        assert!(matches!(result, Err(PlaybackError::PreviousStillRunning)));
        assert_eq!(launcher.launched().len(), 1);

        // once the kill goes through the orphan is reaped and playback resumes
        launcher.set_kill_fails(false);
        manager.start(media("/media/usb/b.mp4")).await.unwrap();
        assert!(!manager.has_orphan());
        assert_eq!(launcher.launched().len(), 2);
        assert_eq!(launcher.max_alive(), 1);
    }

    #[tokio::test]
    async fn test_start_failure_stays_idle() {
        let (mut manager, launcher) = manager();
        launcher.set_launch_fails(true);

        let result = manager.start(media("/media/usb/a.mp4")).await;
        assert!(matches!(result, Err(PlaybackError::StartFailed { .. })));
        assert_eq!(manager.state(), SessionState::Idle);
        assert!(manager.current().is_none());
    }

    #[tokio::test]
    async fn test_natural_exit_is_reported() {
        let (mut manager, launcher) = manager();
        let id = manager.start(media("/media/usb/a.mp4")).await.unwrap();
        launcher.finish(0, PlayerExit::code(0));

        let exit = manager.next_exit().await;
        assert_eq!(exit.id, id);
        assert_eq!(*exit.status.as_ref().unwrap(), PlayerExit::code(0));
        assert!(manager.acknowledge_exit(&exit));
        assert_eq!(manager.state(), SessionState::Idle);
        assert_eq!(launcher.alive(), 0);
    }

    #[tokio::test]
    async fn test_next_exit_pending_when_idle() {
        let (mut manager, _launcher) = manager();
        let waited = timeout(Duration::from_millis(20), manager.next_exit()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_stale_exit_not_acknowledged() {
        let (mut manager, launcher) = manager();
        manager.start(media("/media/usb/a.mp4")).await.unwrap();
        launcher.finish(0, PlayerExit::code(0));
        let exit = manager.next_exit().await;

        // a restart happened before the exit was handled
        manager.start(media("/media/usb/b.mp4")).await.unwrap();
        assert!(!manager.acknowledge_exit(&exit));
        assert_eq!(manager.state(), SessionState::Playing);
    }

    async fn start_real(manager: &mut PlaybackSessionManager) -> u64 {
        for _ in 0..20 {
            match manager.start(media("/media/usb/a.mp4")).await {
                Ok(id) => return id,
                // the script may still be open in a process another test forked
                Err(PlaybackError::StartFailed { source, .. })
                    if source.raw_os_error() == Some(libc::ETXTBSY) =>
                {
                    tokio::time::sleep(Duration::from_millis(25)).await;
                }
                Err(e) => panic!("start failed: {}", e),
            }
        }
        panic!("script stayed busy");
    }

    #[tokio::test]
    async fn test_real_player_stops_gracefully() {
        let tmp = tempfile::TempDir::new().unwrap();
        let launcher = script_player(tmp.path(), "exec sleep 30");
        let mut manager = PlaybackSessionManager::new(Box::new(launcher), Duration::from_secs(5));

        start_real(&mut manager).await;
        let outcome = manager.stop().await.unwrap();
        assert_eq!(outcome, StopOutcome::Graceful(PlayerExit::signaled(libc::SIGTERM)));
        assert_eq!(manager.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_real_player_ignoring_term_is_killed() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ready = tmp.path().join("ready");
        let body = format!(
            "trap '' TERM\ntouch {}\nwhile true; do sleep 1; done",
            ready.display()
        );
        let launcher = script_player(tmp.path(), &body);
        let mut manager =
            PlaybackSessionManager::new(Box::new(launcher), Duration::from_millis(300));

        start_real(&mut manager).await;
        while !ready.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let outcome = manager.stop().await.unwrap();
        assert_eq!(outcome, StopOutcome::Forced(PlayerExit::signaled(libc::SIGKILL)));
        assert!(!manager.has_orphan());
    }

    #[tokio::test]
    async fn test_stop_after_exit_already_happened() {
        let (mut manager, launcher) = manager();
        manager.start(media("/media/usb/a.mp4")).await.unwrap();
        launcher.finish(0, PlayerExit::code(0));

        let outcome = manager.stop().await.unwrap();
        assert_eq!(outcome, StopOutcome::Graceful(PlayerExit::code(0)));
        assert_eq!(launcher.terminate_calls(), 0);
    }
}
