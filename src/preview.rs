//! Preview assembly
//!
//! Concatenates the chunks of a stopped recording into one playable
//! artifact that the user can review before publishing.

use crate::recorder::EncodedChunk;
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;
use uuid::Uuid;

/// Preview errors
#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("No video data was recorded")]
    NoData,

    #[error("Chunk {found} arrived out of order (expected after {previous})")]
    OutOfOrder { previous: u64, found: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single contiguous recording ready for playback and upload
#[derive(Debug, Clone)]
pub struct PreviewArtifact {
    id: Uuid,
    mime_type: String,
    bytes: Arc<[u8]>,
    chunk_count: usize,
    created_at: DateTime<Utc>,
}

/// Join `chunks` in order into a `PreviewArtifact`.
pub fn assemble(chunks: &[EncodedChunk], mime_type: &str) -> Result<PreviewArtifact, PreviewError> {
    let total: usize = chunks.iter().map(|c| c.data.len()).sum();
    if total == 0 {
        return Err(PreviewError::NoData);
    }

    let mut bytes = Vec::with_capacity(total);
    let mut previous: Option<u64> = None;
    for chunk in chunks {
        if let Some(previous) = previous {
            if chunk.sequence <= previous {
                return Err(PreviewError::OutOfOrder {
                    previous,
                    found: chunk.sequence,
                });
            }
        }
        previous = Some(chunk.sequence);
        bytes.extend_from_slice(&chunk.data);
    }

    let artifact = PreviewArtifact {
        id: Uuid::new_v4(),
        mime_type: mime_type.to_string(),
        bytes: bytes.into(),
        chunk_count: chunks.len(),
        created_at: Utc::now(),
    };

    tracing::debug!(
        "Assembled preview {} from {} chunks ({} bytes)",
        artifact.id,
        artifact.chunk_count,
        artifact.len()
    );
    Ok(artifact)
}

impl PreviewArtifact {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of recorder chunks the artifact was built from
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// File extension matching the mime type
    pub fn extension(&self) -> &'static str {
        match self.mime_type.split(';').next().map(str::trim) {
            Some("video/mp4") => "mp4",
            Some("video/x-matroska") => "mkv",
            _ => "webm",
        }
    }

    /// Write the artifact to a temporary file a player can open.
    ///
    /// The file is deleted when the returned handle is dropped.
    pub fn write_playback_file(&self, dir: Option<&Path>) -> Result<NamedTempFile, PreviewError> {
        let suffix = format!(".{}", self.extension());
        let mut builder = tempfile::Builder::new();
        builder.prefix("golive-preview-").suffix(&suffix);

        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(&self.bytes)?;
        file.flush()?;

        tracing::debug!("Wrote preview {} to {:?}", self.id, file.path());
        Ok(file)
    }
}
