//! Encoder channel abstraction
//!
//! A `MediaEncoder` turns a live `MediaStreamHandle` into encoded chunks,
//! pushed through a `ChunkSink` as they become available.

use crate::capture::MediaStreamHandle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Recording errors
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Recording already in progress")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Media stream has already been released")]
    StreamReleased,

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Timed out waiting for the encoder to flush")]
    FlushTimeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RecorderResult<T> = Result<T, RecorderError>;

/// Identifies one recording attempt within one session.
///
/// `generation` changes every time the session is opened or torn down,
/// `attempt` every time recording starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingToken {
    pub generation: u64,
    pub attempt: u64,
}

/// One encoded segment, in capture order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub sequence: u64,
    pub data: Vec<u8>,
}

pub(crate) type ChunkMessage = (RecordingToken, Vec<u8>);

/// Data-available callback handed to an encoder.
///
/// The channel closes once every clone is dropped, which is how the
/// recorder learns that the encoder has flushed.
#[derive(Debug, Clone)]
pub struct ChunkSink {
    token: RecordingToken,
    tx: mpsc::UnboundedSender<ChunkMessage>,
}

impl ChunkSink {
    pub(crate) fn new(token: RecordingToken, tx: mpsc::UnboundedSender<ChunkMessage>) -> Self {
        Self { token, tx }
    }

    pub fn token(&self) -> RecordingToken {
        self.token
    }

    /// Deliver a chunk. Returns false once the recorder no longer listens.
    pub fn push(&self, data: Vec<u8>) -> bool {
        self.tx.send((self.token, data)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Kills a running encoder from outside the task that owns it.
///
/// Cloneable and synchronous, so teardown can fire it while a `stop` is
/// still awaiting the encoder.
#[derive(Clone)]
pub struct AbortHandle {
    abort: Arc<dyn Fn() + Send + Sync>,
}

impl AbortHandle {
    pub fn new(abort: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            abort: Arc::new(abort),
        }
    }

    pub fn abort(&self) {
        (self.abort)()
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortHandle").finish_non_exhaustive()
    }
}

/// In-stream recorder, the equivalent of a browser MediaRecorder.
#[async_trait]
pub trait MediaEncoder: Send {
    /// Container mime type of the produced chunks
    fn mime_type(&self) -> &str;

    /// Begin encoding `stream`, delivering chunks to `sink` as they arrive
    async fn start(&mut self, stream: &MediaStreamHandle, sink: ChunkSink) -> RecorderResult<()>;

    /// Finish encoding. Remaining data must be pushed and every sink clone
    /// dropped, otherwise the recorder waits until its flush timeout.
    async fn stop(&mut self) -> RecorderResult<()>;

    /// Tear down immediately without flushing
    fn abort(&mut self) {
        self.abort_handle().abort();
    }

    /// Handle that tears the running encoder down, usable while `stop`
    /// holds `&mut self`. Firing it after the encoder finished is a no-op.
    fn abort_handle(&self) -> AbortHandle;
}

/// Creates a fresh encoder for every recording attempt
pub trait EncoderFactory: Send + Sync {
    fn create(&self) -> Box<dyn MediaEncoder>;
}
