//! Keyboard input via evdev.
//!
//! Every device that advertises the START or STOP key gets its own reader
//! task feeding the control channel. Readers end on I/O errors (unplugged
//! keyboard); once all of them are gone, or when none was present at
//! startup, the devices are enumerated again every second.

use crate::config::InputConfig;
use crate::dispatch::ControlEvent;
use evdev::{Device, InputEvent, InputEventKind, Key};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Delay between device enumerations while no keyboard is present.
pub const REENUMERATE_INTERVAL: Duration = Duration::from_secs(1);

/// evdev value of a key-down event (0 is release, 2 is autorepeat).
const KEY_DOWN: i32 = 1;

/// Error type for keyboard input.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Unknown key name: {0}")]
    UnknownKey(String),

    #[error("START and STOP are both bound to {0}")]
    SameKey(String),

    #[error("No input device with the configured START/STOP keys found")]
    NoDevices,
}

/// Resolves a key name such as `S`, `KEY_S`, `space` or `F5`.
pub fn parse_key(name: &str) -> Option<Key> {
    let upper = name.trim().to_ascii_uppercase();
    let upper = upper.strip_prefix("KEY_").unwrap_or(&upper);

    let key = match upper {
        "A" => Key::KEY_A,
        "B" => Key::KEY_B,
        "C" => Key::KEY_C,
        "D" => Key::KEY_D,
        "E" => Key::KEY_E,
        "F" => Key::KEY_F,
        "G" => Key::KEY_G,
        "H" => Key::KEY_H,
        "I" => Key::KEY_I,
        "J" => Key::KEY_J,
        "K" => Key::KEY_K,
        "L" => Key::KEY_L,
        "M" => Key::KEY_M,
        "N" => Key::KEY_N,
        "O" => Key::KEY_O,
        "P" => Key::KEY_P,
        "Q" => Key::KEY_Q,
        "R" => Key::KEY_R,
        "S" => Key::KEY_S,
        "T" => Key::KEY_T,
        "U" => Key::KEY_U,
        "V" => Key::KEY_V,
        "W" => Key::KEY_W,
        "X" => Key::KEY_X,
        "Y" => Key::KEY_Y,
        "Z" => Key::KEY_Z,
        "0" => Key::KEY_0,
        "1" => Key::KEY_1,
        "2" => Key::KEY_2,
        "3" => Key::KEY_3,
        "4" => Key::KEY_4,
        "5" => Key::KEY_5,
        "6" => Key::KEY_6,
        "7" => Key::KEY_7,
        "8" => Key::KEY_8,
        "9" => Key::KEY_9,
        "F1" => Key::KEY_F1,
        "F2" => Key::KEY_F2,
        "F3" => Key::KEY_F3,
        "F4" => Key::KEY_F4,
        "F5" => Key::KEY_F5,
        "F6" => Key::KEY_F6,
        "F7" => Key::KEY_F7,
        "F8" => Key::KEY_F8,
        "F9" => Key::KEY_F9,
        "F10" => Key::KEY_F10,
        "F11" => Key::KEY_F11,
        "F12" => Key::KEY_F12,
        "SPACE" => Key::KEY_SPACE,
        "ENTER" => Key::KEY_ENTER,
        "ESC" | "ESCAPE" => Key::KEY_ESC,
        "UP" => Key::KEY_UP,
        "DOWN" => Key::KEY_DOWN,
        "LEFT" => Key::KEY_LEFT,
        "RIGHT" => Key::KEY_RIGHT,
        "PLAYPAUSE" => Key::KEY_PLAYPAUSE,
        "STOPCD" => Key::KEY_STOPCD,
        _ => return None,
    };
    Some(key)
}

/// The two meaningful keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBindings {
    pub start: Key,
    pub stop: Key,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            start: Key::KEY_S,
            stop: Key::KEY_E,
        }
    }
}

impl KeyBindings {
    pub fn from_config(config: &InputConfig) -> Result<Self, InputError> {
        let start = parse_key(&config.start_key)
            .ok_or_else(|| InputError::UnknownKey(config.start_key.clone()))?;
        let stop = parse_key(&config.stop_key)
            .ok_or_else(|| InputError::UnknownKey(config.stop_key.clone()))?;
        if start == stop {
            return Err(InputError::SameKey(config.start_key.clone()));
        }
        Ok(Self { start, stop })
    }

    /// Maps one key event to a command. Only key-down of the bound keys
    /// counts; releases and autorepeat are ignored.
    pub fn command_for(&self, key: Key, value: i32) -> Option<ControlEvent> {
        if value != KEY_DOWN {
            return None;
        }
        if key == self.start {
            Some(ControlEvent::Start)
        } else if key == self.stop {
            Some(ControlEvent::Stop)
        } else {
            None
        }
    }

    pub fn command_for_event(&self, event: &InputEvent) -> Option<ControlEvent> {
        match event.kind() {
            InputEventKind::Key(key) => self.command_for(key, event.value()),
            _ => None,
        }
    }

    fn matches_device(&self, device: &Device) -> bool {
        device
            .supported_keys()
            .map_or(false, |keys| keys.contains(self.start) || keys.contains(self.stop))
    }
}

/// Input devices able to produce the START or STOP key.
pub fn find_keyboards(bindings: &KeyBindings) -> Vec<(PathBuf, Device)> {
    evdev::enumerate()
        .filter(|(_, device)| bindings.matches_device(device))
        .collect()
}

fn device_label(path: &Path, device: &Device) -> String {
    format!("{} ({})", path.display(), device.name().unwrap_or("unnamed"))
}

async fn read_device(
    path: PathBuf,
    mut device: Device,
    bindings: KeyBindings,
    grab: bool,
    tx: mpsc::Sender<ControlEvent>,
) {
    let label = device_label(&path, &device);
    if grab {
        if let Err(e) = device.grab() {
            debug!("Could not grab {}: {}", label, e);
        }
    }

    let mut stream = match device.into_event_stream() {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Cannot read from {}: {}", label, e);
            return;
        }
    };
    info!("Listening for keys on {}", label);

    loop {
        match stream.next_event().await {
            Ok(event) => {
                if let Some(command) = bindings.command_for_event(&event) {
                    debug!("{} from {}", command, label);
                    if tx.send(command).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("Keyboard {} went away: {}", label, e);
                return;
            }
        }
    }
}

/// Polls `find` every `interval` until it returns something.
///
/// Gives up with `None` once the control channel has closed.
async fn wait_for_devices<T, F>(
    mut find: F,
    interval: Duration,
    tx: &mpsc::Sender<ControlEvent>,
) -> Option<Vec<T>>
where
    F: FnMut() -> Vec<T>,
{
    loop {
        tokio::time::sleep(interval).await;
        if tx.is_closed() {
            return None;
        }
        let found = find();
        if !found.is_empty() {
            return Some(found);
        }
    }
}

/// Starts reading the keyboards.
///
/// Only bad key bindings are an error. With no keyboard attached the task
/// keeps enumerating until one appears, and it runs until the control
/// channel closes.
pub fn spawn_keyboard_input(
    config: &InputConfig,
    tx: mpsc::Sender<ControlEvent>,
) -> Result<JoinHandle<()>, InputError> {
    let bindings = KeyBindings::from_config(config)?;
    let devices = find_keyboards(&bindings);
    if devices.is_empty() {
        warn!("No keyboard input devices found. Retrying until one appears.");
    } else {
        info!(
            "Keyboard input ready: {} device(s), START={:?} STOP={:?}",
            devices.len(),
            bindings.start,
            bindings.stop
        );
    }

    let grab = config.grab;
    Ok(tokio::spawn(async move {
        let mut devices = devices;
        loop {
            if !devices.is_empty() {
                let mut readers = JoinSet::new();
                for (path, device) in devices {
                    readers.spawn(read_device(path, device, bindings, grab, tx.clone()));
                }
                while readers.join_next().await.is_some() {}

                if tx.is_closed() {
                    return;
                }
                warn!("No keyboard available, waiting for one to appear");
            }

            let found =
                wait_for_devices(|| find_keyboards(&bindings), REENUMERATE_INTERVAL, &tx).await;
            devices = match found {
                Some(found) => {
                    info!("Keyboard connected: {} device(s)", found.len());
                    found
                }
                None => return,
            };
        }
    }))
}

/// Lists usable keyboards and logs every key-down for `duration`.
///
/// Returns the number of devices found.
pub async fn diagnose_keyboard(
    config: &InputConfig,
    duration: Duration,
) -> Result<usize, InputError> {
    let bindings = KeyBindings::from_config(config)?;
    let devices = find_keyboards(&bindings);
    if devices.is_empty() {
        return Err(InputError::NoDevices);
    }

    let count = devices.len();
    for (path, device) in &devices {
        info!("Candidate keyboard: {}", device_label(path, device));
    }
    info!(
        "Logging key presses for {}s (START={:?} STOP={:?})",
        duration.as_secs(),
        bindings.start,
        bindings.stop
    );

    let mut readers = JoinSet::new();
    for (path, device) in devices {
        readers.spawn(async move {
            let label = device_label(&path, &device);
            let mut stream = match device.into_event_stream() {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Cannot read from {}: {}", label, e);
                    return;
                }
            };
            while let Ok(event) = stream.next_event().await {
                if let InputEventKind::Key(key) = event.kind() {
                    if event.value() == KEY_DOWN {
                        let command = bindings.command_for(key, KEY_DOWN);
                        info!("{}: {:?} -> {:?}", label, key, command);
                    }
                }
            }
        });
    }

    tokio::time::sleep(duration).await;
    readers.abort_all();
    Ok(count)
}
