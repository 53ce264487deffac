//! Probe module for reading video stream metadata with ffprobe.
//!
//! Only the first video stream matters for classification, so the probe asks
//! ffprobe for exactly that stream and nothing else.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe exited unsuccessfully.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// ffprobe did not finish in time and was killed.
    #[error("ffprobe timed out after {0:?}")]
    Timeout(Duration),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// The file has no video stream.
    #[error("no video stream")]
    NoVideoStream,

    /// IO error spawning or reading ffprobe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The first video stream of a file, as reported by ffprobe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoStreamInfo {
    /// Codec name (e.g. "h264", "hevc").
    pub codec_name: String,
    pub width: u32,
    pub height: u32,
    /// Pixel format (e.g. "yuv420p", "yuv420p10le").
    pub pix_fmt: String,
}

/// Something that can describe the first video stream of a file.
pub trait Prober: Send {
    fn probe(&self, path: &Path) -> Result<VideoStreamInfo, ProbeError>;
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_name: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub pix_fmt: Option<String>,
    }
}

/// Parses `ffprobe -of json -show_entries stream=...` output.
pub fn parse_ffprobe_output(json_str: &str) -> Result<VideoStreamInfo, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let stream = ffprobe
        .streams
        .unwrap_or_default()
        .into_iter()
        .next()
        .ok_or(ProbeError::NoVideoStream)?;

    Ok(VideoStreamInfo {
        codec_name: stream.codec_name.unwrap_or_default().to_lowercase(),
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        pix_fmt: stream.pix_fmt.unwrap_or_default().to_lowercase(),
    })
}

/// Runs the ffprobe binary with a hard timeout.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    binary: String,
    timeout: Duration,
}

impl FfprobeProber {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn build_command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=codec_name,width,height,pix_fmt",
            "-of",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
        cmd
    }
}

impl Prober for FfprobeProber {
    fn probe(&self, path: &Path) -> Result<VideoStreamInfo, ProbeError> {
        let mut child = self.build_command(path).spawn()?;
        let deadline = Instant::now() + self.timeout;

        // The output is a few hundred bytes, well under the pipe buffer, so
        // polling for exit before reading cannot deadlock.
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProbeError::Timeout(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let mut stdout = String::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_string(&mut stdout)?;
        }

        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut err) = child.stderr.take() {
                let _ = err.read_to_string(&mut stderr);
            }
            return Err(ProbeError::FfprobeFailed(format!(
                "ffprobe exited with status {}: {}",
                status,
                stderr.trim()
            )));
        }

        parse_ffprobe_output(&stdout)
    }
}
