//! Live capture session
//!
//! Drives one "Go Live" modal from camera acquisition through recording,
//! preview and upload. The session owns every hardware resource it
//! acquires and releases them on each exit path.
//!
//! All state sits behind one `parking_lot::Mutex` that is never held across
//! an `.await`, so `cancel` may run while another task is suspended in an
//! acquisition, a recorder flush or an upload. Each suspended operation
//! remembers the session generation it started in and discards its result
//! if the generation moved on.

pub mod error;
pub mod state;

#[cfg(test)]
mod tests;

pub use error::{SessionError, SessionResult};
pub use state::{CaptureState, SessionEvent, SessionSnapshot, SubmissionResult};

use crate::capture::{FfmpegDevices, FfmpegEncoderFactory, MediaDevices, MediaStreamHandle};
use crate::config::{CaptureConfig, GoLiveConfig};
use crate::geo::{
    FixedPosition, IpPositionProvider, LocationResolver, NominatimGeocoder, PositionProvider,
};
use crate::preview::{assemble, PreviewArtifact};
use crate::publish::{self, Category, HttpPublisher, PublishError, PublishReceipt, Publisher};
use crate::recorder::{
    AbortHandle, EncoderFactory, RecorderError, RecordingToken, StreamRecorder,
};
use crate::utils::error::{ErrorResponse, UserNotice};
use parking_lot::Mutex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const UPLOAD_SUCCESS: &str = "Live video uploaded successfully!";

/// Collaborators a session talks to
pub struct SessionServices {
    pub devices: Arc<dyn MediaDevices>,
    pub encoders: Arc<dyn EncoderFactory>,
    pub location: Arc<LocationResolver>,
    pub publisher: Arc<dyn Publisher>,
}

impl SessionServices {
    /// ffmpeg capture, configured location lookup and the HTTP publisher
    pub fn from_config(config: &GoLiveConfig) -> SessionResult<Self> {
        let location = &config.location;
        let provider: Arc<dyn PositionProvider> = match location.fixed_position {
            Some(coordinates) => Arc::new(FixedPosition::new(coordinates)),
            None => Arc::new(IpPositionProvider::new(&location.ip_lookup_url, location.timeout())?),
        };

        let mut resolver = LocationResolver::new(provider, location.timeout());
        if location.reverse_geocode {
            resolver = resolver.with_geocoder(Arc::new(NominatimGeocoder::new(
                &location.geocoder_url,
                &location.user_agent,
                location.timeout(),
            )?));
        }

        let ffmpeg = config.capture.ffmpeg.clone();
        Ok(Self {
            devices: Arc::new(FfmpegDevices::new(ffmpeg.clone())),
            encoders: Arc::new(FfmpegEncoderFactory::new(ffmpeg)),
            location: Arc::new(resolver),
            publisher: Arc::new(HttpPublisher::new(&config.api, &config.capture.file_name)?),
        })
    }
}

/// What the session holds in the way of recorded media. Exactly one
/// variant applies at a time.
enum MediaContent {
    Empty,
    /// `recorder` is `None` while it is starting or stopping outside the
    /// lock. During a stop, `abort` still reaches its encoder.
    Recording {
        recorder: Option<StreamRecorder>,
        token: RecordingToken,
        abort: Option<AbortHandle>,
    },
    Preview(Arc<PreviewArtifact>),
}

struct SessionInner {
    state: CaptureState,
    generation: u64,
    attempt: u64,
    category: Option<Category>,
    caption: String,
    stream: Option<MediaStreamHandle>,
    media: MediaContent,
    playback: Option<NamedTempFile>,
    submission: Option<SubmissionResult>,
    last_notice: Option<UserNotice>,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            generation: 0,
            attempt: 0,
            category: None,
            caption: String::new(),
            stream: None,
            media: MediaContent::Empty,
            playback: None,
            submission: None,
            last_notice: None,
        }
    }

    fn preview(&self) -> Option<Arc<PreviewArtifact>> {
        match &self.media {
            MediaContent::Preview(artifact) => Some(artifact.clone()),
            _ => None,
        }
    }

    fn release_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.release();
        }
    }

    fn discard_media(&mut self) {
        if let MediaContent::Recording {
            recorder, abort, ..
        } = std::mem::replace(&mut self.media, MediaContent::Empty)
        {
            match (recorder, abort) {
                (Some(mut recorder), _) => recorder.abort(),
                (None, Some(abort)) => {
                    tracing::debug!("Killing encoder with a stop in flight");
                    abort.abort();
                }
                (None, None) => {}
            }
        }
        self.playback = None;
    }
}

/// One live capture modal
#[derive(Clone)]
pub struct CaptureSession {
    inner: Arc<Mutex<SessionInner>>,
    services: Arc<SessionServices>,
    config: Arc<CaptureConfig>,
    events: broadcast::Sender<SessionEvent>,
}

impl CaptureSession {
    pub fn new(services: SessionServices, config: CaptureConfig) -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            inner: Arc::new(Mutex::new(SessionInner::new())),
            services: Arc::new(services),
            config: Arc::new(config),
            events,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.inner.lock().state
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Result of the latest upload, kept after the modal closes
    pub fn submission_result(&self) -> Option<SubmissionResult> {
        self.inner.lock().submission.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock();
        let (chunk_count, preview_bytes) = match &inner.media {
            MediaContent::Empty => (0, None),
            MediaContent::Recording { recorder, .. } => {
                (recorder.as_ref().map(|r| r.chunks().len()).unwrap_or(0), None)
            }
            MediaContent::Preview(artifact) => (artifact.chunk_count(), Some(artifact.len())),
        };
        let preview = inner.preview();
        let can_submit = inner.state == CaptureState::Previewing
            && publish::validate(&inner.caption, preview.as_deref()).is_ok();

        SessionSnapshot {
            state: inner.state,
            category: inner.category,
            caption: inner.caption.clone(),
            chunk_count,
            preview_bytes,
            can_submit,
            notice: inner.last_notice.clone(),
            stream_live: inner.stream.as_ref().map(|s| !s.is_released()).unwrap_or(false),
        }
    }

    fn set_state(&self, inner: &mut SessionInner, to: CaptureState) {
        let from = inner.state;
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            tracing::warn!("Unexpected transition {} -> {}", from, to);
        }
        tracing::debug!("Session {} -> {}", from, to);
        inner.state = to;
        let _ = self.events.send(SessionEvent::StateChanged { from, to });
    }

    fn notify(&self, inner: &mut SessionInner, notice: UserNotice) {
        inner.last_notice = Some(notice.clone());
        let _ = self.events.send(SessionEvent::Notice(notice));
    }

    fn fail(&self, inner: &mut SessionInner, error: &SessionError) {
        tracing::warn!("Live session error in {}: {}", inner.state, error);
        self.notify(inner, UserNotice::from(error));
    }

    /// Release everything and return to `Idle`. Operations still in flight
    /// find a newer generation and drop their results.
    fn teardown(&self, inner: &mut SessionInner) {
        inner.generation += 1;
        inner.release_stream();
        inner.discard_media();
        inner.caption.clear();
        inner.category = None;
        self.set_state(inner, CaptureState::Idle);
        let _ = self.events.send(SessionEvent::Closed);
    }

    /// Open the modal for `category` and acquire the camera.
    pub async fn open(&self, category: Category) -> SessionResult<()> {
        let generation = {
            let mut inner = self.inner.lock();
            if inner.state != CaptureState::Idle {
                return Err(SessionError::InvalidTransition {
                    action: "open",
                    state: inner.state,
                });
            }
            inner.generation += 1;
            inner.category = Some(category);
            inner.caption.clear();
            inner.submission = None;
            inner.last_notice = None;
            tracing::info!("Opening live session for {}", category);
            self.set_state(&mut inner, CaptureState::CameraInitializing);
            inner.generation
        };

        self.acquire_camera(generation).await
    }

    async fn acquire_camera(&self, generation: u64) -> SessionResult<()> {
        let acquired = self.services.devices.acquire(&self.config.constraints).await;

        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.state != CaptureState::CameraInitializing {
            if let Ok(stream) = acquired {
                tracing::info!("Camera granted after the session closed, releasing");
                stream.release();
            }
            return Err(SessionError::Cancelled);
        }

        match acquired {
            Ok(stream) => {
                inner.stream = Some(stream);
                self.set_state(&mut inner, CaptureState::CameraReady);
                Ok(())
            }
            Err(e) => {
                let error = SessionError::from(e);
                self.fail(&mut inner, &error);
                self.teardown(&mut inner);
                Err(error)
            }
        }
    }

    /// Edit the caption. Allowed until the upload starts.
    pub fn set_caption(&self, caption: &str) -> SessionResult<()> {
        let mut inner = self.inner.lock();
        if !inner.state.can_edit_caption() {
            return Err(SessionError::InvalidTransition {
                action: "edit caption",
                state: inner.state,
            });
        }
        inner.caption = caption.to_string();
        Ok(())
    }

    pub async fn start_recording(&self) -> SessionResult<RecordingToken> {
        let (stream, token, mut recorder) = {
            let mut inner = self.inner.lock();
            match inner.state {
                CaptureState::CameraReady => {}
                CaptureState::Recording => return Err(RecorderError::AlreadyRecording.into()),
                state => {
                    return Err(SessionError::InvalidTransition {
                        action: "start recording",
                        state,
                    })
                }
            }
            let stream = match &inner.stream {
                Some(stream) if !stream.is_released() => stream.clone(),
                _ => return Err(RecorderError::StreamReleased.into()),
            };

            inner.attempt += 1;
            let token = RecordingToken {
                generation: inner.generation,
                attempt: inner.attempt,
            };
            inner.media = MediaContent::Recording {
                recorder: None,
                token,
                abort: None,
            };
            self.set_state(&mut inner, CaptureState::Recording);

            let recorder = StreamRecorder::new(self.services.encoders.create(), self.config.flush_timeout());
            (stream, token, recorder)
        };

        let started = recorder.start(stream, token).await;

        let mut inner = self.inner.lock();
        if inner.generation != token.generation {
            recorder.abort();
            return Err(SessionError::Cancelled);
        }

        match started {
            Ok(token) => {
                inner.media = MediaContent::Recording {
                    recorder: Some(recorder),
                    token,
                    abort: None,
                };
                Ok(token)
            }
            Err(e) => {
                let error = SessionError::from(e);
                inner.release_stream();
                inner.media = MediaContent::Empty;
                self.fail(&mut inner, &error);
                self.set_state(&mut inner, CaptureState::Failed);
                Err(error)
            }
        }
    }

    /// Move chunks delivered by the encoder into the buffer
    pub fn poll_chunks(&self) -> usize {
        let mut inner = self.inner.lock();
        let received = match &mut inner.media {
            MediaContent::Recording {
                recorder: Some(recorder),
                ..
            } => recorder.collect_pending(),
            _ => 0,
        };
        if received > 0 {
            let _ = self.events.send(SessionEvent::ChunksReceived(received));
        }
        received
    }

    /// Stop recording, release the camera and assemble the preview.
    ///
    /// Calling it again once previewing returns the same artifact.
    pub async fn stop_recording(&self) -> SessionResult<Arc<PreviewArtifact>> {
        let (mut recorder, token) = {
            let mut inner = self.inner.lock();
            match inner.state {
                CaptureState::Recording => {}
                CaptureState::Previewing => {
                    if let Some(artifact) = inner.preview() {
                        return Ok(artifact);
                    }
                }
                _ => {}
            }
            let state = inner.state;
            match &mut inner.media {
                MediaContent::Recording {
                    recorder,
                    token,
                    abort,
                } if state == CaptureState::Recording => match recorder.take() {
                    Some(recorder) => {
                        *abort = recorder.abort_handle();
                        (recorder, *token)
                    }
                    None => return Err(RecorderError::NotRecording.into()),
                },
                _ => {
                    return Err(SessionError::InvalidTransition {
                        action: "stop recording",
                        state,
                    })
                }
            }
        };

        let stopped = recorder.stop(token).await.map(|chunks| chunks.len());

        let mut inner = self.inner.lock();
        if inner.generation != token.generation {
            recorder.abort();
            return Err(SessionError::Cancelled);
        }
        inner.release_stream();

        let chunks = recorder.take_chunks();
        let assembled = match stopped {
            Ok(count) => {
                tracing::debug!("Assembling preview from {} chunks", count);
                assemble(&chunks, recorder.mime_type()).map_err(SessionError::from)
            }
            Err(e) => Err(SessionError::from(e)),
        };

        match assembled {
            Ok(artifact) => {
                let artifact = Arc::new(artifact);
                tracing::info!("Preview ready: {} bytes", artifact.len());
                inner.media = MediaContent::Preview(artifact.clone());
                self.set_state(&mut inner, CaptureState::Previewing);
                Ok(artifact)
            }
            Err(error) => {
                inner.media = MediaContent::Empty;
                self.fail(&mut inner, &error);
                self.set_state(&mut inner, CaptureState::Failed);
                Err(error)
            }
        }
    }

    /// Discard the preview (or failed attempt) and reacquire the camera
    pub async fn retake(&self) -> SessionResult<()> {
        let generation = {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, CaptureState::Previewing | CaptureState::Failed) {
                return Err(SessionError::InvalidTransition {
                    action: "retake",
                    state: inner.state,
                });
            }
            inner.discard_media();
            inner.release_stream();
            self.set_state(&mut inner, CaptureState::CameraInitializing);
            inner.generation
        };

        self.acquire_camera(generation).await
    }

    /// Path of a playable file for the current preview
    pub fn preview_playback_path(&self) -> SessionResult<PathBuf> {
        let artifact = {
            let inner = self.inner.lock();
            if let Some(file) = &inner.playback {
                return Ok(file.path().to_path_buf());
            }
            inner.preview().ok_or(SessionError::InvalidTransition {
                action: "play preview",
                state: inner.state,
            })?
        };

        let dir = self.config.preview_dir.as_deref().map(Path::new);
        let file = artifact.write_playback_file(dir)?;
        let path = file.path().to_path_buf();

        let mut inner = self.inner.lock();
        match inner.preview() {
            Some(current) if current.id() == artifact.id() => {
                inner.playback = Some(file);
                Ok(path)
            }
            _ => Err(SessionError::Cancelled),
        }
    }

    /// Validate, resolve the location and upload the preview.
    ///
    /// On success the session completes and closes. On failure it returns
    /// to `Previewing` with the media kept for another attempt.
    pub async fn submit(&self) -> SessionResult<PublishReceipt> {
        let (generation, caption, media, category) = {
            let mut inner = self.inner.lock();
            match inner.state {
                CaptureState::Idle | CaptureState::Submitting | CaptureState::Completed => {
                    return Err(SessionError::InvalidTransition {
                        action: "submit",
                        state: inner.state,
                    })
                }
                _ => {}
            }

            let media = match inner.state {
                CaptureState::Previewing => inner.preview(),
                _ => None,
            };
            if let Err(e) = publish::validate(&inner.caption, media.as_deref()) {
                let error = SessionError::from(e);
                self.notify(&mut inner, UserNotice::from(&error));
                return Err(error);
            }

            self.set_state(&mut inner, CaptureState::Submitting);
            (
                inner.generation,
                inner.caption.clone(),
                media,
                inner.category.unwrap_or_default(),
            )
        };

        let resolved = self.services.location.resolve().await;
        let location = {
            let mut inner = self.inner.lock();
            if inner.generation != generation || inner.state != CaptureState::Submitting {
                return Err(SessionError::Cancelled);
            }
            match resolved {
                Ok(location) => location,
                Err(e) => {
                    let error = SessionError::from(e);
                    self.fail(&mut inner, &error);
                    self.set_state(&mut inner, CaptureState::Previewing);
                    return Err(error);
                }
            }
        };

        let published = publish::submit(
            &*self.services.publisher,
            &caption,
            media,
            category,
            location,
        )
        .await;

        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.state != CaptureState::Submitting {
            tracing::info!("Ignoring upload response for a closed session");
            return Err(SessionError::Cancelled);
        }

        match published {
            Ok(receipt) => {
                tracing::info!("Live post published: {}", receipt.message);
                inner.submission = Some(SubmissionResult::accepted(&receipt));
                self.notify(&mut inner, UserNotice::success(UPLOAD_SUCCESS));
                self.set_state(&mut inner, CaptureState::Completed);
                self.teardown(&mut inner);
                Ok(receipt)
            }
            Err(e) => {
                let status = match &e {
                    PublishError::Server { status, .. } => Some(*status),
                    _ => None,
                };
                let error = SessionError::from(e);
                inner.submission = Some(SubmissionResult::rejected(&ErrorResponse::from(&error), status));
                self.fail(&mut inner, &error);
                self.set_state(&mut inner, CaptureState::Previewing);
                Err(error)
            }
        }
    }

    /// Close the modal. Synchronously releases the camera and drops any
    /// media, even with an acquisition, stop or upload in flight.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CaptureState::Idle && inner.stream.is_none() {
            return;
        }
        tracing::info!("Cancelling live session in state {}", inner.state);
        self.teardown(&mut inner);
    }

    /// Cancel the session once `signal` resolves, whatever operation is in
    /// flight. Abort the returned task to stop watching.
    pub fn cancel_when<F>(&self, signal: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let session = self.clone();
        tokio::spawn(async move {
            signal.await;
            tracing::info!("Cancel requested");
            session.cancel();
        })
    }
}
