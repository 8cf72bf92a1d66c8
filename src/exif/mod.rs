//! EXIF and XMP metadata reading and writing for iris photos.
//!
//! [`MetadataCodec`] is the seam between the synchronization engine and the
//! byte format. [`JpegCodec`] is the production implementation:
//!
//! - the full field set lives in an XMP packet (`dc:` plus the
//!   [`IRIS_NAMESPACE`] application namespace),
//! - title, comment, subject and person are mirrored into standard EXIF tags
//!   when [`StoreOption::XmpAndExif`] is configured,
//! - EXIF orientation is read for display and never written.
//!
//! The codec never modifies the photo. [`MetadataCodec::write`] returns the
//! complete new file content; placing it on disk is the caller's job.

mod reader;
mod writer;
mod xmp;

pub use reader::read_exif;
pub use xmp::IRIS_NAMESPACE;

use img_parts::Bytes;
use img_parts::jpeg::Jpeg;
use std::io::Read;
use std::path::Path;

use crate::config::StoreOption;
use crate::error::CodecError;
use crate::files;
use crate::metadata::Metadata;

/// How aggressively a write may restructure existing EXIF data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    /// Keep every existing EXIF byte; only add or redirect entries.
    Lossless,
    /// Rebuild the EXIF block. Tags the encoder does not model may be lost.
    Lossy,
}

/// Reads and writes the metadata of one photo format.
///
/// Implementations must be usable from several threads at once; the engine
/// guarantees that writes to one path never overlap, but reads and writes of
/// different paths do.
pub trait MetadataCodec: Send + Sync {
    /// Fail with [`CodecError::UnsupportedFormat`] unless `path` is a photo
    /// this codec can store metadata in.
    fn check_format(&self, path: &Path) -> Result<(), CodecError>;

    /// Decode the current metadata of `path`.
    fn read(&self, path: &Path) -> Result<Metadata, CodecError>;

    /// Produce the new content of `path` with `metadata` applied.
    fn write(
        &self,
        path: &Path,
        metadata: &Metadata,
        strategy: WriteStrategy,
    ) -> Result<Vec<u8>, CodecError>;
}

/// [`MetadataCodec`] for JPEG files.
///
/// # Example
///
/// ```rust,no_run
/// use iris_meta::config::StoreOption;
/// use iris_meta::exif::{JpegCodec, MetadataCodec, WriteStrategy};
/// use std::path::Path;
///
/// let codec = JpegCodec::new(StoreOption::XmpAndExif);
/// let path = Path::new("right-eye.jpg");
///
/// let mut metadata = codec.read(path)?;
/// metadata.comment = Some("pigment spot at 4 o'clock".into());
/// let bytes = codec.write(path, &metadata, WriteStrategy::Lossless)?;
/// # Ok::<(), iris_meta::error::CodecError>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCodec {
    store_option: StoreOption,
}

impl JpegCodec {
    pub fn new(store_option: StoreOption) -> Self {
        Self { store_option }
    }

    pub fn store_option(&self) -> StoreOption {
        self.store_option
    }
}

impl MetadataCodec for JpegCodec {
    fn check_format(&self, path: &Path) -> Result<(), CodecError> {
        let unsupported = |reason: String| CodecError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason,
        };

        if !files::is_supported_image(path) {
            return Err(unsupported("not a .jpg/.jpeg file".to_string()));
        }

        let mut head = Vec::with_capacity(16);
        std::fs::File::open(path)
            .and_then(|file| file.take(16).read_to_end(&mut head))
            .map_err(|e| unsupported(e.to_string()))?;

        match image::guess_format(&head) {
            Ok(image::ImageFormat::Jpeg) => Ok(()),
            Ok(other) => Err(unsupported(format!("content is {other:?}, not JPEG"))),
            Err(e) => Err(unsupported(e.to_string())),
        }
    }

    fn read(&self, path: &Path) -> Result<Metadata, CodecError> {
        self.check_format(path)?;

        let read_error = |reason: String| CodecError::Read {
            path: path.to_path_buf(),
            reason,
        };

        let bytes = std::fs::read(path).map_err(|e| read_error(e.to_string()))?;
        let jpeg = Jpeg::from_bytes(Bytes::from(bytes))
            .map_err(|e| read_error(format!("Failed to parse JPEG: {e}")))?;

        let exif = match read_exif(path) {
            Ok(exif) => exif,
            Err(e) => {
                log::debug!("Failed to read EXIF from {}: {e:#}", path.display());
                Metadata::default()
            }
        };

        // Once this crate has written a packet, XMP is authoritative: a
        // field cleared in XMP must not come back from a stale EXIF tag.
        let metadata = match reader::xmp_packet(&jpeg) {
            Some(packet) if packet.contains(IRIS_NAMESPACE) => Metadata {
                orientation: exif.orientation,
                ..xmp::parse_xmp(&packet)
            },
            Some(packet) => {
                let mut m = xmp::parse_xmp(&packet);
                m.fill_missing_from(&exif);
                m
            }
            None => exif,
        };

        Ok(metadata)
    }

    fn write(
        &self,
        path: &Path,
        metadata: &Metadata,
        strategy: WriteStrategy,
    ) -> Result<Vec<u8>, CodecError> {
        writer::encode_jpeg(path, metadata, strategy, self.store_option).map_err(|e| {
            CodecError::Write {
                path: path.to_path_buf(),
                reason: format!("{e:#}"),
            }
        })
    }
}
