//! The control loop.
//!
//! Key presses and shutdown requests arrive on one channel; player exits come
//! from the session manager. Both are polled in a single `select!` so every
//! stimulus is handled to completion before the next one is looked at.

use crate::controller::Controller;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Capacity of the control event channel.
pub const CONTROL_CHANNEL_CAPACITY: usize = 32;

/// A stimulus for the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Start,
    Stop,
    Shutdown,
}

impl std::fmt::Display for ControlEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlEvent::Start => write!(f, "START"),
            ControlEvent::Stop => write!(f, "STOP"),
            ControlEvent::Shutdown => write!(f, "SHUTDOWN"),
        }
    }
}

/// Creates the control channel.
pub fn control_channel() -> (mpsc::Sender<ControlEvent>, mpsc::Receiver<ControlEvent>) {
    mpsc::channel(CONTROL_CHANNEL_CAPACITY)
}

/// Serializes control events and player exits onto the controller.
pub struct Dispatcher {
    controller: Controller,
    events: mpsc::Receiver<ControlEvent>,
}

impl Dispatcher {
    pub fn new(controller: Controller, events: mpsc::Receiver<ControlEvent>) -> Self {
        Self { controller, events }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Runs until a `Shutdown` event arrives or every sender is gone, then
    /// stops playback.
    pub async fn run(&mut self) {
        loop {
            tokio::select! {
                // A key event that is ready at the same time as an exit wins;
                // a restart then reaps the exited player.
                biased;

                event = self.events.recv() => {
                    match event {
                        Some(ControlEvent::Start) => {
                            if let Err(e) = self.controller.on_start_key().await {
                                warn!("START: {}", e);
                            }
                        }
                        Some(ControlEvent::Stop) => {
                            match self.controller.on_stop_key().await {
                                Ok(outcome) => debug!("STOP: {:?}", outcome),
                                Err(e) => warn!("STOP: {}", e),
                            }
                        }
                        Some(ControlEvent::Shutdown) | None => {
                            info!("Shutting down");
                            if let Err(e) = self.controller.shutdown().await {
                                warn!("Stopping playback on shutdown failed: {}", e);
                            }
                            return;
                        }
                    }
                }

                exit = self.controller.session_exit() => {
                    if let Err(e) = self.controller.on_natural_end(exit).await {
                        warn!("Could not continue after playback ended: {}", e);
                    }
                }
            }
        }
    }
}
