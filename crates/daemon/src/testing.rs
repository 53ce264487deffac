//! In-process fakes for the prober, the player and the media library.

use crate::controller::MediaLibrary;
use crate::media::{CandidatePool, MediaFile};
use crate::config::PlayerConfig;
use crate::player::{MpvLauncher, PlayerExit, PlayerLauncher, PlayerProcess};
use crate::probe::{ProbeError, Prober, VideoStreamInfo};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::sync::mpsc;

/// A real player launcher running a shell script that ignores the mpv flags.
pub fn script_player(dir: &Path, body: &str) -> MpvLauncher {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("fake-mpv");
    std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    MpvLauncher::new(PlayerConfig {
        binary: script.to_string_lossy().into_owned(),
        ..PlayerConfig::default()
    })
}

/// Prober answering from a fixed table; unknown paths fail.
#[derive(Debug, Default)]
pub struct FakeProber {
    streams: HashMap<PathBuf, VideoStreamInfo>,
    calls: Arc<Mutex<usize>>,
}

impl FakeProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl AsRef<Path>, stream: VideoStreamInfo) -> Self {
        self.streams.insert(path.as_ref().to_path_buf(), stream);
        self
    }

    pub fn failing(mut self, path: impl AsRef<Path>) -> Self {
        self.streams.remove(path.as_ref());
        self
    }

    /// Shared probe counter; stays valid after the prober is boxed.
    pub fn calls(&self) -> Arc<Mutex<usize>> {
        self.calls.clone()
    }
}

impl Prober for FakeProber {
    fn probe(&self, path: &Path) -> Result<VideoStreamInfo, ProbeError> {
        *self.calls.lock().unwrap() += 1;
        self.streams
            .get(path)
            .cloned()
            .ok_or_else(|| ProbeError::FfprobeFailed(format!("no fixture for {}", path.display())))
    }
}

/// A media library whose contents tests can swap at any time.
#[derive(Debug, Clone, Default)]
pub struct StaticLibrary {
    files: Arc<Mutex<Vec<MediaFile>>>,
    scans: Arc<Mutex<usize>>,
}

impl StaticLibrary {
    pub fn new(paths: &[&str]) -> Self {
        let library = Self::default();
        library.set(paths);
        library
    }

    pub fn set(&self, paths: &[&str]) {
        *self.files.lock().unwrap() = paths
            .iter()
            .map(|p| MediaFile::new(*p, 1, SystemTime::UNIX_EPOCH))
            .collect();
    }

    pub fn set_files(&self, files: Vec<MediaFile>) {
        *self.files.lock().unwrap() = files;
    }

    pub fn scans(&self) -> usize {
        *self.scans.lock().unwrap()
    }
}

impl MediaLibrary for StaticLibrary {
    fn scan(&mut self) -> CandidatePool {
        *self.scans.lock().unwrap() += 1;
        CandidatePool::new(self.files.lock().unwrap().clone())
    }
}

#[derive(Debug, Default)]
struct FakePlayerState {
    launched: Vec<PathBuf>,
    exits: Vec<mpsc::UnboundedSender<PlayerExit>>,
    alive: usize,
    max_alive: usize,
    terminate_calls: usize,
    kill_calls: usize,
    ignore_term: bool,
    kill_fails: bool,
    launch_fails: bool,
}

/// Player launcher producing [`FakeProcess`]es. Clones share state, so a test
/// keeps one clone to observe and drive the processes the manager owns.
#[derive(Debug, Clone, Default)]
pub struct FakeLauncher {
    state: Arc<Mutex<FakePlayerState>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes ignore SIGTERM and only die on SIGKILL.
    pub fn set_ignore_term(&self, ignore: bool) {
        self.state.lock().unwrap().ignore_term = ignore;
    }

    /// SIGKILL delivery fails and the process keeps running.
    pub fn set_kill_fails(&self, fails: bool) {
        self.state.lock().unwrap().kill_fails = fails;
    }

    pub fn set_launch_fails(&self, fails: bool) {
        self.state.lock().unwrap().launch_fails = fails;
    }

    pub fn launched(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().launched.clone()
    }

    pub fn alive(&self) -> usize {
        self.state.lock().unwrap().alive
    }

    pub fn max_alive(&self) -> usize {
        self.state.lock().unwrap().max_alive
    }

    pub fn terminate_calls(&self) -> usize {
        self.state.lock().unwrap().terminate_calls
    }

    pub fn kill_calls(&self) -> usize {
        self.state.lock().unwrap().kill_calls
    }

    /// Makes the `index`-th launched process exit on its own.
    pub fn finish(&self, index: usize, exit: PlayerExit) {
        let state = self.state.lock().unwrap();
        let _ = state.exits[index].send(exit);
    }
}

impl PlayerLauncher for FakeLauncher {
    fn launch(&mut self, file: &Path) -> io::Result<Box<dyn PlayerProcess>> {
        let mut state = self.state.lock().unwrap();
        if state.launch_fails {
            return Err(io::Error::new(io::ErrorKind::NotFound, "player binary missing"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.launched.push(file.to_path_buf());
        state.exits.push(tx.clone());
        state.alive += 1;
        state.max_alive = state.max_alive.max(state.alive);

        Ok(Box::new(FakeProcess {
            pid: 1000 + state.launched.len() as u32,
            state: self.state.clone(),
            tx,
            rx,
            exited: None,
        }))
    }
}

/// A pretend player. It exits when its launcher's `finish` is called, when it
/// is terminated (unless SIGTERM is ignored) or when it is killed.
#[derive(Debug)]
pub struct FakeProcess {
    pid: u32,
    state: Arc<Mutex<FakePlayerState>>,
    tx: mpsc::UnboundedSender<PlayerExit>,
    rx: mpsc::UnboundedReceiver<PlayerExit>,
    exited: Option<PlayerExit>,
}

impl FakeProcess {
    fn record_exit(&mut self, exit: PlayerExit) -> PlayerExit {
        if self.exited.is_none() {
            self.exited = Some(exit);
            self.state.lock().unwrap().alive -= 1;
        }
        self.exited.unwrap_or(exit)
    }
}

#[async_trait]
impl PlayerProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn wait(&mut self) -> io::Result<PlayerExit> {
        if let Some(exit) = self.exited {
            return Ok(exit);
        }
        match self.rx.recv().await {
            Some(exit) => Ok(self.record_exit(exit)),
            // unreachable while self holds a sender
            None => std::future::pending().await,
        }
    }

    fn try_wait(&mut self) -> io::Result<Option<PlayerExit>> {
        if let Some(exit) = self.exited {
            return Ok(Some(exit));
        }
        match self.rx.try_recv() {
            Ok(exit) => Ok(Some(self.record_exit(exit))),
            Err(_) => Ok(None),
        }
    }

    fn terminate(&mut self) -> io::Result<()> {
        let ignore = {
            let mut state = self.state.lock().unwrap();
            state.terminate_calls += 1;
            state.ignore_term
        };
        if !ignore && self.exited.is_none() {
            let _ = self.tx.send(PlayerExit::signaled(15));
        }
        Ok(())
    }

    fn kill(&mut self) -> io::Result<()> {
        let fails = {
            let mut state = self.state.lock().unwrap();
            state.kill_calls += 1;
            state.kill_fails
        };
        if fails {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "operation not permitted"));
        }
        if self.exited.is_none() {
            let _ = self.tx.send(PlayerExit::signaled(9));
        }
        Ok(())
    }
}

impl Drop for FakeProcess {
    // mirrors kill_on_drop
    fn drop(&mut self) {
        if self.exited.is_none() {
            self.state.lock().unwrap().alive -= 1;
        }
    }
}
