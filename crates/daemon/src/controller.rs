//! Playback controller: what happens on START, STOP and natural end.
//!
//! The controller is owned by the dispatcher task and is the only place that
//! touches the session manager, so it needs no locking.

use crate::cache::ClassificationCache;
use crate::classify::Classifier;
use crate::config::{ClassifierConfig, SelectionConfig, StorageConfig};
use crate::media::{CandidatePool, MediaFile};
use crate::probe::FfprobeProber;
use crate::scan::StorageScanner;
use crate::select::{select, SelectError};
use crate::session::{PlaybackError, PlaybackSessionManager, SessionExit, SessionState, StopOutcome};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Error type for controller actions. None of these are fatal.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Select(#[from] SelectError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

/// Source of the candidate pool.
pub trait MediaLibrary: Send {
    /// Rebuilds the pool from scratch.
    fn scan(&mut self) -> CandidatePool;
}

/// USB storage, optionally classified with ffprobe.
pub struct UsbLibrary {
    scanner: StorageScanner,
    classifier: Option<Classifier>,
}

impl UsbLibrary {
    pub fn new(scanner: StorageScanner, classifier: Option<Classifier>) -> Self {
        Self { scanner, classifier }
    }

    /// Builds the library from config. Classification is skipped entirely
    /// when disabled or when ffprobe is not available.
    pub fn from_config(
        storage: &StorageConfig,
        classifier: &ClassifierConfig,
        probe_available: bool,
    ) -> Self {
        let classifier = if classifier.enabled && probe_available {
            let cache = if classifier.cache_path.as_os_str().is_empty() {
                ClassificationCache::in_memory()
            } else {
                ClassificationCache::load(&classifier.cache_path)
            };
            let prober = FfprobeProber::new(
                classifier.ffprobe_path.clone(),
                Duration::from_secs(classifier.probe_timeout_secs),
            );
            Some(Classifier::new(
                Box::new(prober),
                cache,
                classifier.max_probes_per_scan,
            ))
        } else {
            if classifier.enabled {
                info!("ffprobe not available, classification disabled");
            }
            None
        };

        Self::new(StorageScanner::new(storage.clone()), classifier)
    }

    pub fn classifies(&self) -> bool {
        self.classifier.is_some()
    }
}

impl MediaLibrary for UsbLibrary {
    fn scan(&mut self) -> CandidatePool {
        let pool = self.scanner.scan();
        match self.classifier.as_mut() {
            Some(classifier) if !pool.is_empty() => classifier.classify_pool(pool),
            _ => pool,
        }
    }
}

/// Reacts to control stimuli.
pub struct Controller {
    // Scans walk the filesystem and run ffprobe, so they happen on the
    // blocking pool; the mutex is only ever held by that one task.
    library: Arc<Mutex<Box<dyn MediaLibrary>>>,
    selection: SelectionConfig,
    rng: StdRng,
    last_played: Option<MediaFile>,
    sessions: PlaybackSessionManager,
}

impl Controller {
    pub fn new(
        library: Box<dyn MediaLibrary>,
        sessions: PlaybackSessionManager,
        selection: SelectionConfig,
    ) -> Self {
        Self::with_rng(library, sessions, selection, StdRng::from_entropy())
    }

    pub fn with_rng(
        library: Box<dyn MediaLibrary>,
        sessions: PlaybackSessionManager,
        selection: SelectionConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            library: Arc::new(Mutex::new(library)),
            selection,
            rng,
            last_played: None,
            sessions,
        }
    }

    pub fn state(&self) -> SessionState {
        self.sessions.state()
    }

    pub fn current_file(&self) -> Option<&MediaFile> {
        self.sessions.current_file()
    }

    pub fn last_played(&self) -> Option<&MediaFile> {
        self.last_played.as_ref()
    }

    /// Rescans, picks a file and plays it, replacing any current playback.
    ///
    /// With nothing to play the current state is left as is.
    pub async fn on_start_key(&mut self) -> Result<u64, ControlError> {
        info!("START pressed ({})", self.sessions.state());
        self.play_next().await
    }

    /// Stops playback; a no-op when idle.
    pub async fn on_stop_key(&mut self) -> Result<StopOutcome, ControlError> {
        info!("STOP pressed ({})", self.sessions.state());
        Ok(self.sessions.stop().await?)
    }

    /// Handles a player exit that nobody asked for by moving on to the next
    /// file. Returns `Ok(None)` for an exit that is no longer current.
    pub async fn on_natural_end(
        &mut self,
        exit: SessionExit,
    ) -> Result<Option<u64>, ControlError> {
        if !self.sessions.acknowledge_exit(&exit) {
            return Ok(None);
        }
        self.play_next().await.map(Some)
    }

    /// Waits for the current player to exit on its own.
    pub async fn session_exit(&mut self) -> SessionExit {
        self.sessions.next_exit().await
    }

    /// Stops playback before the daemon exits.
    pub async fn shutdown(&mut self) -> Result<StopOutcome, ControlError> {
        Ok(self.sessions.stop().await?)
    }

    /// Rescans the library without blocking the runtime.
    async fn scan_library(&self) -> CandidatePool {
        let library = Arc::clone(&self.library);
        let scanned = tokio::task::spawn_blocking(move || {
            let mut library = library.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            library.scan()
        })
        .await;

        match scanned {
            Ok(pool) => pool,
            Err(e) => {
                error!("Library scan aborted: {}", e);
                CandidatePool::default()
            }
        }
    }

    async fn play_next(&mut self) -> Result<u64, ControlError> {
        let pool = self.scan_library().await;
        let file = select(&pool, self.last_played.as_ref(), &self.selection, &mut self.rng)?;
        info!(
            "Selected {} [{}] from {} candidates",
            file.path.display(),
            file.bucket,
            pool.len()
        );

        // A file that fails to start still counts as played, so the next
        // selection moves past it.
        self.last_played = Some(file.clone());

        self.sessions.start(file).await.map_err(|e| {
            warn!("Playback did not start: {}", e);
            e.into()
        })
    }
}
