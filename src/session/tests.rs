use super::*;
use crate::capture::CaptureError;
use crate::geo::{Coordinates, FixedPosition, GeoError};
use crate::preview::PreviewError;
use crate::publish::ValidationError;
use crate::testing::{FakeDevices, FakeEncoderFactory, FakePosition, FakePublisher};
use crate::utils::error::NoticeLevel;
use std::time::Duration;
use tokio::sync::Notify;

fn here() -> Coordinates {
    Coordinates::new(40.7411, -73.9897)
}

struct Setup {
    devices: FakeDevices,
    encoders: FakeEncoderFactory,
    publisher: FakePublisher,
    position: Arc<dyn PositionProvider>,
    flush_timeout_ms: u64,
    preview_dir: Option<String>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            devices: FakeDevices::new(),
            encoders: FakeEncoderFactory::new(),
            publisher: FakePublisher::new(),
            position: Arc::new(FixedPosition::new(here())),
            flush_timeout_ms: 1_000,
            preview_dir: None,
        }
    }
}

impl Setup {
    fn build(self) -> Harness {
        let devices = Arc::new(self.devices);
        let encoders = Arc::new(self.encoders);
        let publisher = Arc::new(self.publisher);

        let services = SessionServices {
            devices: devices.clone(),
            encoders: encoders.clone(),
            location: Arc::new(LocationResolver::new(self.position, Duration::from_secs(1))),
            publisher: publisher.clone(),
        };
        let config = CaptureConfig {
            flush_timeout_ms: self.flush_timeout_ms,
            preview_dir: self.preview_dir,
            ..CaptureConfig::default()
        };

        Harness {
            session: CaptureSession::new(services, config),
            devices,
            encoders,
            publisher,
        }
    }
}

struct Harness {
    session: CaptureSession,
    devices: Arc<FakeDevices>,
    encoders: Arc<FakeEncoderFactory>,
    publisher: Arc<FakePublisher>,
}

impl Harness {
    fn live(&self) -> usize {
        self.devices.live()
    }

    async fn record(&self, chunks: &[&str]) -> Arc<PreviewArtifact> {
        self.session.start_recording().await.unwrap();
        for chunk in chunks {
            assert!(self.encoders.emit(chunk.as_bytes().to_vec()));
        }
        self.session.stop_recording().await.unwrap()
    }

    async fn previewing(&self, caption: &str) -> Arc<PreviewArtifact> {
        self.session.open(Category::Crime).await.unwrap();
        let artifact = self.record(&["a", "b"]).await;
        self.session.set_caption(caption).unwrap();
        artifact
    }

    async fn drive_to(&self, target: CaptureState) {
        self.session.open(Category::Traffic).await.unwrap();
        if target == CaptureState::CameraReady {
            return;
        }
        self.session.start_recording().await.unwrap();
        match target {
            CaptureState::Recording => {
                self.encoders.emit(b"a".to_vec());
                self.session.poll_chunks();
            }
            CaptureState::Failed => {
                assert!(self.session.stop_recording().await.is_err());
            }
            CaptureState::Previewing => {
                self.encoders.emit(b"a".to_vec());
                self.session.stop_recording().await.unwrap();
            }
            other => panic!("cannot drive to {}", other),
        }
    }

    fn notice(&self) -> String {
        self.session.snapshot().notice.map(|n| n.message).unwrap_or_default()
    }
}

fn harness() -> Harness {
    Setup::default().build()
}

#[tokio::test]
async fn test_record_preview_and_publish() {
    let h = harness();
    let mut events = h.session.subscribe();

    h.session.open(Category::Crime).await.unwrap();
    assert_eq!(h.session.state(), CaptureState::CameraReady);
    assert_eq!(h.live(), 2);

    h.session.start_recording().await.unwrap();
    h.encoders.emit(b"a".to_vec());
    h.encoders.emit(b"b".to_vec());
    assert_eq!(h.session.poll_chunks(), 2);
    assert_eq!(h.session.snapshot().chunk_count, 2);

    let artifact = h.session.stop_recording().await.unwrap();
    assert_eq!(artifact.bytes().to_vec(), b"ab".to_vec());
    assert_eq!(h.live(), 0);
    assert_eq!(h.session.state(), CaptureState::Previewing);

    h.session.set_caption("Fire on 5th Ave").unwrap();
    assert!(h.session.snapshot().can_submit);

    let receipt = h.session.submit().await.unwrap();
    assert_eq!(receipt.message, "Post created");

    let sent = h.publisher.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].caption, "Fire on 5th Ave");
    assert_eq!(sent[0].media, b"ab".to_vec());
    assert_eq!(sent[0].category, Category::Crime);
    assert_eq!(sent[0].location, "40.7411, -73.9897");

    assert_eq!(h.session.state(), CaptureState::Idle);
    assert!(h.session.submission_result().unwrap().success);
    let snapshot = h.session.snapshot();
    assert_eq!(snapshot.notice.unwrap().level, NoticeLevel::Success);
    assert!(snapshot.caption.is_empty());
    assert_eq!(snapshot.preview_bytes, None);

    let mut transitions = Vec::new();
    let mut closed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::StateChanged { to, .. } => transitions.push(to),
            SessionEvent::Closed => closed = true,
            _ => {}
        }
    }
    assert_eq!(
        transitions,
        vec![
            CaptureState::CameraInitializing,
            CaptureState::CameraReady,
            CaptureState::Recording,
            CaptureState::Previewing,
            CaptureState::Submitting,
            CaptureState::Completed,
            CaptureState::Idle,
        ]
    );
    assert!(closed);
}

#[tokio::test]
async fn test_permission_denied_returns_to_idle() {
    let h = Setup {
        devices: FakeDevices::new().fail_next(CaptureError::PermissionDenied("camera".into())),
        ..Setup::default()
    }
    .build();

    let result = h.session.open(Category::General).await;
    assert!(matches!(
        result,
        Err(SessionError::Capture(CaptureError::PermissionDenied(_)))
    ));
    assert_eq!(h.session.state(), CaptureState::Idle);
    assert_eq!(h.live(), 0);
    assert_eq!(h.notice(), "Camera or microphone access was denied.");

    h.session.open(Category::General).await.unwrap();
    assert_eq!(h.session.state(), CaptureState::CameraReady);
}

#[tokio::test]
async fn test_zero_chunks_fails_and_allows_retake() {
    let h = harness();
    h.session.open(Category::Accident).await.unwrap();
    h.session.start_recording().await.unwrap();

    let result = h.session.stop_recording().await;
    assert!(matches!(result, Err(SessionError::Preview(PreviewError::NoData))));
    assert_eq!(h.session.state(), CaptureState::Failed);
    assert_eq!(h.live(), 0);
    assert_eq!(h.notice(), "No video was recorded. Please record again.");

    h.session.set_caption("Crash on I-95").unwrap();
    assert!(matches!(
        h.session.submit().await,
        Err(SessionError::Validation(ValidationError::MissingMedia))
    ));
    assert_eq!(h.publisher.calls(), 0);

    h.session.retake().await.unwrap();
    assert_eq!(h.session.state(), CaptureState::CameraReady);
    assert_eq!(h.live(), 2);
    assert_eq!(h.session.snapshot().caption, "Crash on I-95");
}

#[tokio::test]
async fn test_network_failure_keeps_media_for_retry() {
    let h = Setup {
        publisher: FakePublisher::new().respond_with(Err(PublishError::Network("connection reset".into()))),
        ..Setup::default()
    }
    .build();
    h.previewing("Fire on 5th Ave").await;

    let first = h.session.submit().await;
    assert!(matches!(first, Err(SessionError::Publish(PublishError::Network(_)))));
    assert_eq!(h.session.state(), CaptureState::Previewing);
    assert_eq!(h.notice(), "Error uploading video.");
    assert_eq!(h.session.snapshot().preview_bytes, Some(2));
    assert!(!h.session.submission_result().unwrap().success);

    h.session.submit().await.unwrap();
    assert_eq!(h.session.state(), CaptureState::Idle);

    let sent = h.publisher.requests();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], sent[1]);
}

#[tokio::test]
async fn test_server_rejection_reports_status() {
    let h = Setup {
        publisher: FakePublisher::new().respond_with(Err(PublishError::Server {
            status: 413,
            message: "File too large".into(),
        })),
        ..Setup::default()
    }
    .build();
    h.previewing("Protest downtown").await;

    assert!(h.session.submit().await.is_err());
    let result = h.session.submission_result().unwrap();
    assert_eq!(result.status, Some(413));
    assert_eq!(result.message, "File too large");
    assert_eq!(h.session.state(), CaptureState::Previewing);
}

#[tokio::test]
async fn test_cancel_releases_camera_from_every_state() {
    for target in [
        CaptureState::CameraReady,
        CaptureState::Recording,
        CaptureState::Previewing,
        CaptureState::Failed,
    ] {
        let h = harness();
        h.drive_to(target).await;
        assert_eq!(h.session.state(), target);

        h.session.cancel();

        assert_eq!(h.session.state(), CaptureState::Idle, "cancel from {}", target);
        assert_eq!(h.live(), 0, "cancel from {}", target);
        let snapshot = h.session.snapshot();
        assert!(!snapshot.stream_live);
        assert_eq!(snapshot.chunk_count, 0);
        assert_eq!(snapshot.preview_bytes, None);
        assert_eq!(snapshot.category, None);
    }
}

#[tokio::test]
async fn test_cancel_during_acquisition_releases_late_stream() {
    let gate = Arc::new(Notify::new());
    let h = Setup {
        devices: FakeDevices::new().gated(gate.clone()),
        ..Setup::default()
    }
    .build();

    let session = h.session.clone();
    let opening = tokio::spawn(async move { session.open(Category::Riot).await });
    while h.devices.calls() == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.session.state(), CaptureState::CameraInitializing);

    h.session.cancel();
    assert_eq!(h.session.state(), CaptureState::Idle);

    gate.notify_one();
    let result = opening.await.unwrap();
    assert!(matches!(result, Err(SessionError::Cancelled)));
    assert_eq!(h.session.state(), CaptureState::Idle);
    assert_eq!(h.live(), 0);
}

#[tokio::test]
async fn test_stale_acquisition_does_not_touch_new_session() {
    let gate = Arc::new(Notify::new());
    let h = Setup {
        devices: FakeDevices::new().gated(gate.clone()),
        ..Setup::default()
    }
    .build();

    let session = h.session.clone();
    let first = tokio::spawn(async move { session.open(Category::Riot).await });
    while h.devices.calls() == 0 {
        tokio::task::yield_now().await;
    }
    h.session.cancel();

    h.session.open(Category::Fight).await.unwrap();
    assert_eq!(h.session.state(), CaptureState::CameraReady);
    assert_eq!(h.live(), 2);

    gate.notify_one();
    assert!(matches!(first.await.unwrap(), Err(SessionError::Cancelled)));
    assert_eq!(h.session.state(), CaptureState::CameraReady);
    assert_eq!(h.session.snapshot().category, Some(Category::Fight));
    assert_eq!(h.live(), 2);
}

#[tokio::test]
async fn test_cancel_while_stopping_releases_camera() {
    let h = Setup {
        encoders: FakeEncoderFactory::new().never_flush(),
        flush_timeout_ms: 200,
        ..Setup::default()
    }
    .build();
    h.session.open(Category::Crime).await.unwrap();
    h.session.start_recording().await.unwrap();
    h.encoders.emit(b"a".to_vec());

    let session = h.session.clone();
    let stopping = tokio::spawn(async move { session.stop_recording().await });
    while h.encoders.stop_calls() == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.live(), 2);

    h.session.cancel();
    assert_eq!(h.live(), 0);
    assert_eq!(h.session.state(), CaptureState::Idle);

    assert!(matches!(stopping.await.unwrap(), Err(SessionError::Cancelled)));
    assert_eq!(h.session.state(), CaptureState::Idle);
}

#[tokio::test]
async fn test_cancel_kills_encoder_that_is_slow_to_stop() {
    let h = Setup {
        encoders: FakeEncoderFactory::new()
            .with_final_chunk(b"tail".to_vec())
            .slow_stop(Duration::from_secs(5)),
        ..Setup::default()
    }
    .build();
    h.session.open(Category::Crime).await.unwrap();
    h.session.start_recording().await.unwrap();

    let session = h.session.clone();
    let stopping = tokio::spawn(async move { session.stop_recording().await });
    while h.encoders.stop_calls() == 0 {
        tokio::task::yield_now().await;
    }
    assert!(h.encoders.is_running());

    h.session.cancel();
    assert!(!h.encoders.is_running());
    assert!(h.encoders.current_sink().is_none());
    assert_eq!(h.live(), 0);

    let result = tokio::time::timeout(Duration::from_secs(1), stopping)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(SessionError::Cancelled)));
    assert_eq!(h.session.state(), CaptureState::Idle);
}

#[tokio::test]
async fn test_cancel_during_submission_ignores_response() {
    let gate = Arc::new(Notify::new());
    let h = Setup {
        publisher: FakePublisher::new().gated(gate.clone()),
        ..Setup::default()
    }
    .build();
    h.previewing("Fire on 5th Ave").await;

    let session = h.session.clone();
    let submitting = tokio::spawn(async move { session.submit().await });
    while h.publisher.calls() == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.session.state(), CaptureState::Submitting);

    h.session.cancel();
    assert_eq!(h.session.state(), CaptureState::Idle);

    gate.notify_one();
    assert!(matches!(submitting.await.unwrap(), Err(SessionError::Cancelled)));
    assert_eq!(h.session.state(), CaptureState::Idle);
    assert!(h.session.submission_result().is_none());
}

#[tokio::test]
async fn test_cancel_signal_interrupts_upload() {
    let gate = Arc::new(Notify::new());
    let h = Setup {
        publisher: FakePublisher::new().gated(gate.clone()),
        ..Setup::default()
    }
    .build();
    let signal = Arc::new(Notify::new());
    let watcher = h.session.cancel_when({
        let signal = signal.clone();
        async move { signal.notified().await }
    });
    h.previewing("Fire on 5th Ave").await;

    let session = h.session.clone();
    let submitting = tokio::spawn(async move { session.submit().await });
    while h.publisher.calls() == 0 {
        tokio::task::yield_now().await;
    }

    signal.notify_one();
    watcher.await.unwrap();
    assert_eq!(h.session.state(), CaptureState::Idle);
    assert_eq!(h.live(), 0);

    gate.notify_one();
    assert!(matches!(submitting.await.unwrap(), Err(SessionError::Cancelled)));
    assert!(h.session.submission_result().is_none());
}

#[tokio::test]
async fn test_cancel_signal_interrupts_camera_open() {
    let gate = Arc::new(Notify::new());
    let h = Setup {
        devices: FakeDevices::new().gated(gate.clone()),
        ..Setup::default()
    }
    .build();
    let signal = Arc::new(Notify::new());
    let watcher = h.session.cancel_when({
        let signal = signal.clone();
        async move { signal.notified().await }
    });

    let session = h.session.clone();
    let opening = tokio::spawn(async move { session.open(Category::Riot).await });
    while h.devices.calls() == 0 {
        tokio::task::yield_now().await;
    }

    signal.notify_one();
    watcher.await.unwrap();
    assert_eq!(h.session.state(), CaptureState::Idle);

    gate.notify_one();
    assert!(matches!(opening.await.unwrap(), Err(SessionError::Cancelled)));
    assert_eq!(h.live(), 0);
}

#[tokio::test]
async fn test_duplicate_submit_is_rejected() {
    let gate = Arc::new(Notify::new());
    let h = Setup {
        publisher: FakePublisher::new().gated(gate.clone()),
        ..Setup::default()
    }
    .build();
    h.previewing("Fire on 5th Ave").await;

    let session = h.session.clone();
    let submitting = tokio::spawn(async move { session.submit().await });
    while h.publisher.calls() == 0 {
        tokio::task::yield_now().await;
    }

    assert!(matches!(
        h.session.submit().await,
        Err(SessionError::InvalidTransition {
            state: CaptureState::Submitting,
            ..
        })
    ));
    assert!(h.session.set_caption("changed").is_err());

    gate.notify_one();
    submitting.await.unwrap().unwrap();
    assert_eq!(h.publisher.calls(), 1);
    assert_eq!(h.publisher.requests()[0].caption, "Fire on 5th Ave");
}

#[tokio::test]
async fn test_late_chunks_after_cancel_are_dropped() {
    let h = harness();
    h.session.open(Category::Crime).await.unwrap();
    h.session.start_recording().await.unwrap();
    h.encoders.emit(b"a".to_vec());
    assert_eq!(h.session.poll_chunks(), 1);

    let sink = h.encoders.current_sink().unwrap();
    h.session.cancel();

    assert!(!sink.push(b"late".to_vec()));
    assert_eq!(h.session.poll_chunks(), 0);
    assert_eq!(h.session.snapshot().chunk_count, 0);
    assert_eq!(h.live(), 0);
}

#[tokio::test]
async fn test_retake_discards_previous_chunks() {
    let h = harness();
    h.session.open(Category::Politics).await.unwrap();
    h.record(&["old"]).await;

    h.session.retake().await.unwrap();
    assert_eq!(h.session.snapshot().preview_bytes, None);

    let artifact = h.record(&["new"]).await;
    assert_eq!(artifact.bytes().to_vec(), b"new".to_vec());
    assert_eq!(artifact.chunk_count(), 1);
}

#[tokio::test]
async fn test_double_start_is_rejected() {
    let h = harness();
    h.session.open(Category::Crime).await.unwrap();
    h.session.start_recording().await.unwrap();

    assert!(matches!(
        h.session.start_recording().await,
        Err(SessionError::Recorder(RecorderError::AlreadyRecording))
    ));
    assert_eq!(h.session.state(), CaptureState::Recording);
    assert_eq!(h.live(), 2);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let h = harness();
    let first = h.previewing("Fire").await;

    let second = h.session.stop_recording().await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.encoders.stop_calls(), 1);
}

#[tokio::test]
async fn test_validation_blocks_submit_without_network() {
    let h = harness();
    h.session.open(Category::Crime).await.unwrap();
    h.session.set_caption("Fire").unwrap();

    assert!(matches!(
        h.session.submit().await,
        Err(SessionError::Validation(ValidationError::MissingMedia))
    ));
    assert_eq!(h.session.state(), CaptureState::CameraReady);

    h.record(&["ab"]).await;
    h.session.set_caption("   ").unwrap();
    assert!(!h.session.snapshot().can_submit);
    assert!(matches!(
        h.session.submit().await,
        Err(SessionError::Validation(ValidationError::MissingCaption))
    ));
    assert_eq!(h.session.state(), CaptureState::Previewing);
    assert_eq!(h.notice(), "Please enter a caption.");
    assert_eq!(h.publisher.calls(), 0);
}

#[tokio::test]
async fn test_position_failure_returns_to_preview() {
    let h = Setup {
        position: Arc::new(FakePosition::err(GeoError::PermissionDenied("blocked".into()))),
        ..Setup::default()
    }
    .build();
    h.previewing("Fire").await;

    assert!(matches!(
        h.session.submit().await,
        Err(SessionError::Location(GeoError::PermissionDenied(_)))
    ));
    assert_eq!(h.session.state(), CaptureState::Previewing);
    assert_eq!(h.notice(), "Unable to access location.");
    assert_eq!(h.session.snapshot().preview_bytes, Some(2));
    assert_eq!(h.publisher.calls(), 0);
}

#[tokio::test]
async fn test_encoder_start_failure_releases_camera() {
    let h = Setup {
        encoders: FakeEncoderFactory::new().failing_start(),
        ..Setup::default()
    }
    .build();
    h.session.open(Category::Crime).await.unwrap();

    assert!(matches!(
        h.session.start_recording().await,
        Err(SessionError::Recorder(RecorderError::Encoder(_)))
    ));
    assert_eq!(h.session.state(), CaptureState::Failed);
    assert_eq!(h.live(), 0);
}

#[tokio::test]
async fn test_open_twice_is_rejected() {
    let h = harness();
    h.session.open(Category::Crime).await.unwrap();
    assert!(matches!(
        h.session.open(Category::Crime).await,
        Err(SessionError::InvalidTransition { action: "open", .. })
    ));
    assert_eq!(h.live(), 2);
}

#[tokio::test]
async fn test_preview_playback_file_lives_with_session() {
    let dir = tempfile::tempdir().unwrap();
    let h = Setup {
        preview_dir: Some(dir.path().to_string_lossy().to_string()),
        ..Setup::default()
    }
    .build();

    assert!(h.session.preview_playback_path().is_err());
    h.previewing("Fire").await;

    let path = h.session.preview_playback_path().unwrap();
    assert!(path.starts_with(dir.path()));
    assert_eq!(std::fs::read(&path).unwrap(), b"ab".to_vec());
    assert_eq!(h.session.preview_playback_path().unwrap(), path);

    h.session.cancel();
    assert!(!path.exists());
}

#[test]
fn test_services_from_default_config() {
    let mut config = GoLiveConfig::default();
    assert!(SessionServices::from_config(&config).is_ok());

    config.location.fixed_position = Some(here());
    config.location.reverse_geocode = false;
    assert!(SessionServices::from_config(&config).is_ok());
}
