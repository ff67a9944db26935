//! Recording system module
//!
//! - `MediaEncoder` trait for chunk-producing encoders
//! - `StreamRecorder` buffering one recording attempt in capture order

pub mod channel;
pub mod stream;

pub use channel::{
    AbortHandle, ChunkSink, EncodedChunk, EncoderFactory, MediaEncoder, RecorderError, RecorderResult,
    RecordingToken,
};
pub use stream::StreamRecorder;
