//! Stream recorder
//!
//! Wraps a live stream and an encoder, buffering chunks in capture order.
//! Starting clears the buffer; a second start without a stop is rejected.
//! Stopping waits for the encoder to flush and then releases the stream.

use super::channel::{
    AbortHandle, ChunkMessage, ChunkSink, EncodedChunk, MediaEncoder, RecorderError, RecorderResult,
    RecordingToken,
};
use crate::capture::MediaStreamHandle;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct StreamRecorder {
    encoder: Box<dyn MediaEncoder>,
    stream: Option<MediaStreamHandle>,
    token: Option<RecordingToken>,
    rx: Option<mpsc::UnboundedReceiver<ChunkMessage>>,
    chunks: Vec<EncodedChunk>,
    next_sequence: u64,
    stopped: bool,
    flush_timeout: Duration,
}

impl StreamRecorder {
    pub fn new(encoder: Box<dyn MediaEncoder>, flush_timeout: Duration) -> Self {
        Self {
            encoder,
            stream: None,
            token: None,
            rx: None,
            chunks: Vec::new(),
            next_sequence: 0,
            stopped: false,
            flush_timeout,
        }
    }

    pub fn mime_type(&self) -> &str {
        self.encoder.mime_type()
    }

    pub fn token(&self) -> Option<RecordingToken> {
        self.token
    }

    pub fn is_recording(&self) -> bool {
        self.token.is_some() && !self.stopped
    }

    /// Kill switch for the running encoder, `None` unless recording.
    /// Stays valid while `stop` is awaiting the encoder.
    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.is_recording().then(|| self.encoder.abort_handle())
    }

    /// Chunks received so far for the current attempt
    pub fn chunks(&self) -> &[EncodedChunk] {
        &self.chunks
    }

    /// Start recording `stream`. Takes ownership of the stream; it is
    /// released when recording stops or fails to start.
    pub async fn start(
        &mut self,
        stream: MediaStreamHandle,
        token: RecordingToken,
    ) -> RecorderResult<RecordingToken> {
        if self.is_recording() {
            return Err(RecorderError::AlreadyRecording);
        }
        if stream.is_released() {
            return Err(RecorderError::StreamReleased);
        }

        self.chunks.clear();
        self.next_sequence = 0;
        self.stopped = false;

        let (tx, rx) = mpsc::unbounded_channel();
        let sink = ChunkSink::new(token, tx);

        if let Err(e) = self.encoder.start(&stream, sink).await {
            tracing::error!("Encoder failed to start: {}", e);
            stream.release();
            return Err(e);
        }

        tracing::info!(
            "Recording started (generation {}, attempt {}, {})",
            token.generation,
            token.attempt,
            self.encoder.mime_type()
        );

        self.stream = Some(stream);
        self.token = Some(token);
        self.rx = Some(rx);
        Ok(token)
    }

    /// Move chunks delivered so far into the buffer. Returns how many arrived.
    pub fn collect_pending(&mut self) -> usize {
        let mut pending = Vec::new();
        if let Some(rx) = self.rx.as_mut() {
            while let Ok(message) = rx.try_recv() {
                pending.push(message);
            }
        }
        let mut accepted = 0;
        for (token, data) in pending {
            if self.accept(token, data) {
                accepted += 1;
            }
        }
        accepted
    }

    fn accept(&mut self, token: RecordingToken, data: Vec<u8>) -> bool {
        if self.token != Some(token) {
            tracing::debug!("Dropping chunk from stale recording {:?}", token);
            return false;
        }
        if data.is_empty() {
            return false;
        }
        self.chunks.push(EncodedChunk {
            sequence: self.next_sequence,
            data,
        });
        self.next_sequence += 1;
        true
    }

    /// Stop recording and return every chunk of this attempt.
    ///
    /// Idempotent: after the first call the same chunks are returned and
    /// nothing else happens.
    pub async fn stop(&mut self, token: RecordingToken) -> RecorderResult<&[EncodedChunk]> {
        if self.token != Some(token) {
            return Err(RecorderError::NotRecording);
        }
        if self.stopped {
            return Ok(&self.chunks);
        }
        self.stopped = true;

        let stopped = self.encoder.stop().await;
        let flushed = self.drain_until_closed().await;

        if let Some(stream) = self.stream.take() {
            stream.release();
        }

        stopped?;
        flushed?;

        tracing::info!("Recording stopped with {} chunks", self.chunks.len());
        Ok(&self.chunks)
    }

    async fn drain_until_closed(&mut self) -> RecorderResult<()> {
        let Some(mut rx) = self.rx.take() else {
            return Ok(());
        };

        let deadline = tokio::time::Instant::now() + self.flush_timeout;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some((token, data))) => {
                    self.accept(token, data);
                }
                Ok(None) => return Ok(()),
                Err(_) => {
                    rx.close();
                    while let Ok((token, data)) = rx.try_recv() {
                        self.accept(token, data);
                    }
                    tracing::warn!(
                        "Encoder did not flush within {:?}",
                        self.flush_timeout
                    );
                    return Err(RecorderError::FlushTimeout);
                }
            }
        }
    }

    /// Tear down without flushing: the encoder is aborted, late chunks are
    /// ignored and the stream is released.
    pub fn abort(&mut self) {
        if !self.stopped {
            self.encoder.abort();
        }
        self.stopped = true;
        self.rx = None;
        if let Some(stream) = self.stream.take() {
            stream.release();
        }
    }

    /// Hand over the buffered chunks, leaving the recorder empty
    pub fn take_chunks(&mut self) -> Vec<EncodedChunk> {
        std::mem::take(&mut self.chunks)
    }
}

impl Drop for StreamRecorder {
    fn drop(&mut self) {
        if self.is_recording() {
            tracing::debug!("Recorder dropped while recording, aborting");
            self.abort();
        }
    }
}
