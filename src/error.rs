use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by a [`MetadataCodec`](crate::exif::MetadataCodec).
#[derive(Error, Debug)]
pub enum CodecError {
    /// Not a JPEG, or not readable as one. Never retried.
    #[error("Unsupported image format for {}: {reason}", path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },

    /// The container is a JPEG but its structure could not be parsed.
    #[error("Failed to read metadata from {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },

    /// Producing the rewritten file content failed.
    #[error("Failed to write metadata for {}: {reason}", path.display())]
    Write { path: PathBuf, reason: String },
}

/// Errors of the synchronization engine.
///
/// Only [`SyncError::Unsupported`] and [`SyncError::NoRuntime`] are ever
/// returned synchronously. Everything else describes a failed rewrite and is
/// delivered through [`SyncEvent::Failed`](crate::sync::SyncEvent::Failed).
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Unsupported(CodecError),

    /// Both the lossless and the lossy write failed.
    #[error("Failed to store metadata for {}: lossless write: {lossless}; lossy write: {lossy}", path.display())]
    CodecWriteFatal {
        path: PathBuf,
        lossless: CodecError,
        lossy: CodecError,
    },

    /// The temp file could not be written.
    #[error("Failed to stage temp file {}: {source}", temp.display())]
    Stage {
        temp: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Moving the temp file over the original failed. The original is intact.
    #[error("Failed to replace {} with {}", path.display(), temp.display())]
    ReplaceFailed { path: PathBuf, temp: PathBuf },

    #[error("Metadata rewrite for {} panicked", path.display())]
    TaskPanicked { path: PathBuf },

    #[error("No tokio runtime available for metadata rewrites")]
    NoRuntime,

    #[error("Runtime shut down before metadata of {} was stored", path.display())]
    RuntimeShutdown { path: PathBuf },
}
