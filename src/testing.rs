//! In-memory collaborators for unit tests

use crate::capture::{
    CaptureError, MediaConstraints, MediaDevices, MediaStreamHandle, MediaTrack, TrackKind,
};
use crate::geo::{Coordinates, GeoError, PositionProvider, ReverseGeocoder};
use crate::publish::{Category, PublishError, PublishReceipt, PublishRequest, Publisher};
use crate::recorder::{AbortHandle, ChunkSink, EncoderFactory, MediaEncoder, RecorderError, RecorderResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Track that counts itself in `live` until stopped
#[derive(Debug)]
pub struct FakeTrack {
    kind: TrackKind,
    live: Arc<AtomicUsize>,
    stopped: AtomicBool,
}

impl FakeTrack {
    pub fn new(kind: TrackKind, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            kind,
            live,
            stopped: AtomicBool::new(false),
        }
    }
}

impl MediaTrack for FakeTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn label(&self) -> &str {
        "fake"
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_live(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }
}

/// Camera plus microphone stream
pub fn fake_stream(live: &Arc<AtomicUsize>) -> MediaStreamHandle {
    MediaStreamHandle::new(
        MediaConstraints::default(),
        vec![
            Box::new(FakeTrack::new(TrackKind::Video, live.clone())),
            Box::new(FakeTrack::new(TrackKind::Audio, live.clone())),
        ],
    )
}

/// Scripted camera access. Grants a stream unless a failure was queued.
pub struct FakeDevices {
    live: Arc<AtomicUsize>,
    failures: Mutex<VecDeque<CaptureError>>,
    gate: Mutex<Option<Arc<Notify>>>,
    calls: AtomicUsize,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            failures: Mutex::new(VecDeque::new()),
            gate: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next acquisition
    pub fn fail_next(self, error: CaptureError) -> Self {
        self.failures.lock().push_back(error);
        self
    }

    /// Hold the next acquisition until `gate` is notified
    pub fn gated(self, gate: Arc<Notify>) -> Self {
        *self.gate.lock() = Some(gate);
        self
    }

    /// Tracks currently holding hardware
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn acquire(&self, _constraints: &MediaConstraints) -> Result<MediaStreamHandle, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let failure = self.failures.lock().pop_front();
        match failure {
            Some(error) => Err(error),
            None => Ok(fake_stream(&self.live)),
        }
    }
}

/// State shared between a `FakeEncoderFactory` and its encoders
#[derive(Default)]
struct EncoderShared {
    sink: Mutex<Option<ChunkSink>>,
    held: Mutex<Option<ChunkSink>>,
    running: AtomicBool,
    stop_calls: AtomicUsize,
    killed: Notify,
}

impl EncoderShared {
    fn kill(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.sink.lock().take();
        self.held.lock().take();
        self.killed.notify_one();
    }
}

/// Encoders whose output is driven by the test through `emit`
pub struct FakeEncoderFactory {
    final_chunk: Option<Vec<u8>>,
    never_flush: bool,
    fail_start: bool,
    stop_delay: Option<Duration>,
    shared: Arc<EncoderShared>,
}

impl FakeEncoderFactory {
    pub fn new() -> Self {
        Self {
            final_chunk: None,
            never_flush: false,
            fail_start: false,
            stop_delay: None,
            shared: Arc::new(EncoderShared::default()),
        }
    }

    /// Push `data` when stopped
    pub fn with_final_chunk(mut self, data: Vec<u8>) -> Self {
        self.final_chunk = Some(data);
        self
    }

    /// Keep the sink open after stop
    pub fn never_flush(mut self) -> Self {
        self.never_flush = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Take `delay` to finalize on stop, unless killed first
    pub fn slow_stop(mut self, delay: Duration) -> Self {
        self.stop_delay = Some(delay);
        self
    }

    /// Deliver a chunk from the running encoder
    pub fn emit(&self, data: Vec<u8>) -> bool {
        self.shared
            .sink
            .lock()
            .as_ref()
            .map(|sink| sink.push(data))
            .unwrap_or(false)
    }

    pub fn current_sink(&self) -> Option<ChunkSink> {
        self.shared.sink.lock().clone()
    }

    pub fn stop_calls(&self) -> usize {
        self.shared.stop_calls.load(Ordering::SeqCst)
    }

    /// Whether an encoder is still holding the devices
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

impl EncoderFactory for FakeEncoderFactory {
    fn create(&self) -> Box<dyn MediaEncoder> {
        Box::new(FakeEncoder {
            final_chunk: self.final_chunk.clone(),
            never_flush: self.never_flush,
            fail_start: self.fail_start,
            stop_delay: self.stop_delay,
            shared: self.shared.clone(),
        })
    }
}

struct FakeEncoder {
    final_chunk: Option<Vec<u8>>,
    never_flush: bool,
    fail_start: bool,
    stop_delay: Option<Duration>,
    shared: Arc<EncoderShared>,
}

#[async_trait]
impl MediaEncoder for FakeEncoder {
    fn mime_type(&self) -> &str {
        "video/webm"
    }

    async fn start(&mut self, _stream: &MediaStreamHandle, sink: ChunkSink) -> RecorderResult<()> {
        if self.fail_start {
            return Err(RecorderError::Encoder("encoder refused to start".to_string()));
        }
        *self.shared.sink.lock() = Some(sink);
        self.shared.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&mut self) -> RecorderResult<()> {
        self.shared.stop_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.stop_delay {
            let _ = tokio::time::timeout(delay, self.shared.killed.notified()).await;
        }

        let sink = self.shared.sink.lock().take();
        if let Some(sink) = sink {
            if let Some(data) = self.final_chunk.take() {
                sink.push(data);
            }
            if self.never_flush {
                *self.shared.held.lock() = Some(sink);
            }
        }
        self.shared.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn abort_handle(&self) -> AbortHandle {
        let shared = self.shared.clone();
        AbortHandle::new(move || shared.kill())
    }
}

/// What a `FakePublisher` was asked to upload
#[derive(Debug, Clone, PartialEq)]
pub struct SentRequest {
    pub caption: String,
    pub media: Vec<u8>,
    pub category: Category,
    pub location: String,
}

pub fn receipt(status: u16, message: &str) -> PublishReceipt {
    PublishReceipt {
        message: message.to_string(),
        status,
        data: Some(serde_json::json!({ "message": message })),
        published_at: chrono::Utc::now(),
    }
}

/// Records uploads and answers from a script, succeeding by default
pub struct FakePublisher {
    responses: Mutex<VecDeque<Result<PublishReceipt, PublishError>>>,
    requests: Mutex<Vec<SentRequest>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakePublisher {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    /// Queue the answer for the next upload
    pub fn respond_with(self, response: Result<PublishReceipt, PublishError>) -> Self {
        self.responses.lock().push_back(response);
        self
    }

    /// Hold the next upload until `gate` is notified
    pub fn gated(self, gate: Arc<Notify>) -> Self {
        *self.gate.lock() = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<SentRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<PublishReceipt, PublishError> {
        self.requests.lock().push(SentRequest {
            caption: request.caption().to_string(),
            media: request.media().bytes().to_vec(),
            category: request.category(),
            location: request.location().to_string(),
        });

        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let response = self.responses.lock().pop_front();
        response.unwrap_or_else(|| Ok(receipt(200, "Post created")))
    }
}

pub struct FakePosition {
    result: Option<Result<Coordinates, GeoError>>,
}

impl FakePosition {
    pub fn err(error: GeoError) -> Self {
        Self {
            result: Some(Err(error)),
        }
    }

    /// Never answers
    pub fn hanging() -> Self {
        Self { result: None }
    }
}

#[async_trait]
impl PositionProvider for FakePosition {
    async fn current_position(&self) -> Result<Coordinates, GeoError> {
        match &self.result {
            Some(result) => result.clone(),
            None => std::future::pending().await,
        }
    }
}

pub struct FakeGeocoder {
    result: Result<String, GeoError>,
}

impl FakeGeocoder {
    pub fn ok(name: &str) -> Self {
        Self {
            result: Ok(name.to_string()),
        }
    }

    pub fn err(error: GeoError) -> Self {
        Self { result: Err(error) }
    }
}

#[async_trait]
impl ReverseGeocoder for FakeGeocoder {
    async fn reverse(&self, _coordinates: Coordinates) -> Result<String, GeoError> {
        self.result.clone()
    }
}
