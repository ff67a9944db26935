//! FFmpeg-backed camera capture
//!
//! `FfmpegDevices` probes the configured camera/microphone and hands out a
//! stream whose tracks name the devices. `FfmpegEncoder` records that stream
//! by running ffmpeg against the devices and forwarding its webm output,
//! read from stdout, as chunks.

use super::traits::{
    CaptureError, MediaConstraints, MediaDevices, MediaStreamHandle, MediaTrack, TrackKind,
};
use crate::recorder::{
    AbortHandle, ChunkSink, EncoderFactory, MediaEncoder, RecorderError, RecorderResult,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::task::JoinHandle;

/// How long ffmpeg gets to finalize the container after `q`
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(5);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// stderr lines kept for the error raised on a failed exit
const STDERR_TAIL_LINES: usize = 20;

/// FFmpeg input configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FfmpegConfig {
    /// ffmpeg executable
    pub binary: String,

    /// ffmpeg demuxer for the camera (`v4l2`, `avfoundation`, `dshow`)
    pub video_format: String,

    /// Camera device, e.g. `/dev/video0`
    pub video_device: String,

    /// ffmpeg demuxer for the microphone
    pub audio_format: String,

    /// Microphone device; `None` records video only
    pub audio_device: Option<String>,

    /// Bytes read from ffmpeg per chunk
    pub chunk_size: usize,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            video_format: "v4l2".to_string(),
            video_device: "/dev/video0".to_string(),
            audio_format: "alsa".to_string(),
            audio_device: Some("default".to_string()),
            chunk_size: 64 * 1024,
        }
    }
}

/// Track that names a device ffmpeg will open
#[derive(Debug)]
pub struct DeviceTrack {
    kind: TrackKind,
    label: String,
    live: AtomicBool,
}

impl DeviceTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            live: AtomicBool::new(true),
        }
    }
}

impl MediaTrack for DeviceTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn stop(&self) {
        if self.live.swap(false, Ordering::AcqRel) {
            tracing::debug!("Stopped {} track {}", self.kind, self.label);
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

/// Camera and microphone access through ffmpeg
pub struct FfmpegDevices {
    config: FfmpegConfig,
}

impl FfmpegDevices {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }

    async fn probe_binary(&self) -> Result<(), CaptureError> {
        let status = Command::new(&self.config.binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(CaptureError::DeviceUnavailable(format!(
                "{} -version exited with {}",
                self.config.binary, status
            ))),
            Err(e) => Err(CaptureError::DeviceUnavailable(format!(
                "FFmpeg not found ({}): {}",
                self.config.binary, e
            ))),
        }
    }
}

/// Map an error from opening a device node to the acquisition taxonomy
pub fn classify_open_error(device: &str, error: &std::io::Error) -> CaptureError {
    match error.kind() {
        std::io::ErrorKind::PermissionDenied => {
            CaptureError::PermissionDenied(format!("Access to {} was denied", device))
        }
        _ => CaptureError::DeviceUnavailable(format!("{}: {}", device, error)),
    }
}

#[async_trait]
impl MediaDevices for FfmpegDevices {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaStreamHandle, CaptureError> {
        self.probe_binary().await?;

        // Device nodes only exist for v4l2; other demuxers fail later in ffmpeg
        if self.config.video_format == "v4l2" {
            let device = self.config.video_device.clone();
            let opened = tokio::task::spawn_blocking({
                let device = device.clone();
                move || std::fs::OpenOptions::new().read(true).open(&device).map(|_| ())
            })
            .await
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
            if let Err(e) = opened {
                return Err(classify_open_error(&device, &e));
            }
        }

        let mut tracks: Vec<Box<dyn MediaTrack>> = vec![Box::new(DeviceTrack::new(
            TrackKind::Video,
            self.config.video_device.clone(),
        ))];
        if constraints.audio {
            match &self.config.audio_device {
                Some(device) => tracks.push(Box::new(DeviceTrack::new(TrackKind::Audio, device.clone()))),
                None => tracing::warn!("Audio requested but no microphone is configured"),
            }
        }

        tracing::info!(
            "Acquired camera {} ({}x{} @ {}fps, {} tracks)",
            self.config.video_device,
            constraints.width,
            constraints.height,
            constraints.frame_rate,
            tracks.len()
        );
        Ok(MediaStreamHandle::new(constraints.clone(), tracks))
    }
}

/// Build the ffmpeg argument list for recording `stream` to webm on stdout
pub fn encoder_args(config: &FfmpegConfig, stream: &MediaStreamHandle) -> RecorderResult<Vec<String>> {
    let video = stream
        .track(TrackKind::Video)
        .ok_or_else(|| RecorderError::Encoder("Stream has no video track".to_string()))?;
    let constraints = stream.constraints();

    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostats"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    args.extend([
        "-f".to_string(),
        config.video_format.clone(),
        "-framerate".to_string(),
        constraints.frame_rate.to_string(),
        "-video_size".to_string(),
        format!("{}x{}", constraints.width, constraints.height),
        "-i".to_string(),
        video.label().to_string(),
    ]);

    let audio = stream.track(TrackKind::Audio);
    if let Some(audio) = audio {
        args.extend([
            "-f".to_string(),
            config.audio_format.clone(),
            "-i".to_string(),
            audio.label().to_string(),
        ]);
    }

    args.extend([
        "-c:v".to_string(),
        "libvpx".to_string(),
        "-deadline".to_string(),
        "realtime".to_string(),
        "-b:v".to_string(),
        "2M".to_string(),
    ]);
    if audio.is_some() {
        args.extend(["-c:a".to_string(), "libopus".to_string()]);
    }
    args.extend(["-f".to_string(), "webm".to_string(), "pipe:1".to_string()]);

    Ok(args)
}

/// Records a stream by running ffmpeg against its devices.
///
/// The child lives behind a shared lock so an `AbortHandle` can kill it
/// while `stop` is waiting for the container to be finalized.
pub struct FfmpegEncoder {
    config: FfmpegConfig,
    process: Arc<Mutex<Option<Child>>>,
    stdin: Option<ChildStdin>,
    reader: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<String>>,
}

/// How the ffmpeg process ended
enum Exit {
    Status(ExitStatus),
    Killed,
    Aborted,
}

impl FfmpegEncoder {
    pub fn new(config: FfmpegConfig) -> Self {
        Self {
            config,
            process: Arc::new(Mutex::new(None)),
            stdin: None,
            reader: None,
            stderr: None,
        }
    }
}

/// Wait for ffmpeg to exit on its own, killing it after `FINALIZE_TIMEOUT`
async fn wait_for_exit(process: &Mutex<Option<Child>>) -> RecorderResult<Exit> {
    let deadline = tokio::time::Instant::now() + FINALIZE_TIMEOUT;
    loop {
        let overdue = {
            let mut slot = process.lock();
            let Some(child) = slot.as_mut() else {
                return Ok(Exit::Aborted);
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    slot.take();
                    return Ok(Exit::Status(status));
                }
                Ok(None) if tokio::time::Instant::now() >= deadline => slot.take(),
                Ok(None) => None,
                Err(e) => {
                    slot.take();
                    return Err(RecorderError::Io(e));
                }
            }
        };

        if let Some(mut child) = overdue {
            tracing::warn!("ffmpeg did not exit within {:?}, killing", FINALIZE_TIMEOUT);
            child.kill().await?;
            return Ok(Exit::Killed);
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}

/// Log ffmpeg's stderr and keep its last lines for error reports
async fn collect_stderr_tail(stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!("ffmpeg: {}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Error reading ffmpeg stderr: {}", e);
                break;
            }
        }
    }
    Vec::from(tail).join("\n")
}

#[async_trait]
impl MediaEncoder for FfmpegEncoder {
    fn mime_type(&self) -> &str {
        "video/webm"
    }

    async fn start(&mut self, stream: &MediaStreamHandle, sink: ChunkSink) -> RecorderResult<()> {
        if self.reader.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }

        let args = encoder_args(&self.config, stream)?;
        let mut process = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RecorderError::Encoder(format!("Failed to spawn ffmpeg: {}", e)))?;

        let mut stdout = process
            .stdout
            .take()
            .ok_or_else(|| RecorderError::Encoder("ffmpeg stdout unavailable".to_string()))?;
        let stderr = process
            .stderr
            .take()
            .ok_or_else(|| RecorderError::Encoder("ffmpeg stderr unavailable".to_string()))?;

        let chunk_size = self.config.chunk_size.max(1);
        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; chunk_size];
            let mut total = 0usize;
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        total += n;
                        if !sink.push(buf[..n].to_vec()) {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Error reading ffmpeg output: {}", e);
                        break;
                    }
                }
            }
            tracing::debug!("ffmpeg output closed after {} bytes", total);
        });

        tracing::info!("Started ffmpeg encoder: {} {}", self.config.binary, args.join(" "));
        self.stdin = process.stdin.take();
        *self.process.lock() = Some(process);
        self.reader = Some(reader);
        self.stderr = Some(tokio::spawn(collect_stderr_tail(stderr)));
        Ok(())
    }

    async fn stop(&mut self) -> RecorderResult<()> {
        let Some(reader) = self.reader.take() else {
            return Err(RecorderError::NotRecording);
        };

        // `q` asks ffmpeg to finish the container cleanly
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.write_all(b"q").await {
                tracing::debug!("Could not send q to ffmpeg: {}", e);
            }
        }

        let exit = wait_for_exit(&self.process).await;
        let stderr = self.stderr.take();

        if matches!(exit, Ok(Exit::Aborted)) {
            reader.abort();
            if let Some(stderr) = stderr {
                stderr.abort();
            }
            tracing::info!("ffmpeg encoder aborted while stopping");
            return Ok(());
        }

        if let Err(e) = reader.await {
            tracing::warn!("ffmpeg reader task failed: {}", e);
        }
        let tail = match stderr {
            Some(stderr) => stderr.await.unwrap_or_default(),
            None => String::new(),
        };

        match exit? {
            Exit::Status(status) if !status.success() => {
                tracing::error!("ffmpeg exited with {}: {}", status, tail);
                Err(RecorderError::Encoder(if tail.is_empty() {
                    format!("ffmpeg exited with {}", status)
                } else {
                    format!("ffmpeg exited with {}: {}", status, tail)
                }))
            }
            _ => {
                tracing::info!("ffmpeg encoder stopped");
                Ok(())
            }
        }
    }

    fn abort(&mut self) {
        self.abort_handle().abort();
        self.stdin = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(stderr) = self.stderr.take() {
            stderr.abort();
        }
    }

    fn abort_handle(&self) -> AbortHandle {
        let process = self.process.clone();
        AbortHandle::new(move || {
            if let Some(mut child) = process.lock().take() {
                if let Err(e) = child.start_kill() {
                    tracing::debug!("Failed to kill ffmpeg: {}", e);
                }
                tracing::info!("ffmpeg encoder killed");
            }
        })
    }
}

/// Creates `FfmpegEncoder`s sharing one configuration
pub struct FfmpegEncoderFactory {
    config: FfmpegConfig,
}

impl FfmpegEncoderFactory {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn create(&self) -> Box<dyn MediaEncoder> {
        Box::new(FfmpegEncoder::new(self.config.clone()))
    }
}
