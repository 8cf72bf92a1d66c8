use std::path::Path;

use super::replace::FileReplacer;
use crate::error::SyncError;
use crate::exif::{MetadataCodec, WriteStrategy};
use crate::metadata::Metadata;

/// Write `metadata` into the file at `path`, replacing it atomically.
///
/// On any error the original file is left as it was. A temp file may be
/// left behind; the next stage for the same path removes it.
pub(crate) fn rewrite(
    codec: &dyn MetadataCodec,
    replacer: &dyn FileReplacer,
    path: &Path,
    metadata: &Metadata,
) -> Result<(), SyncError> {
    let bytes = encode(codec, path, metadata)?;

    let temp = replacer
        .stage(path, &bytes)
        .map_err(|source| SyncError::Stage {
            temp: replacer.temp_path(path),
            source,
        })?;

    if !replacer.replace(&temp, path) {
        return Err(SyncError::ReplaceFailed {
            path: path.to_path_buf(),
            temp,
        });
    }

    Ok(())
}

/// Lossless first; on failure one lossy attempt.
fn encode(codec: &dyn MetadataCodec, path: &Path, metadata: &Metadata) -> Result<Vec<u8>, SyncError> {
    let lossless = match codec.write(path, metadata, WriteStrategy::Lossless) {
        Ok(bytes) => return Ok(bytes),
        Err(e) => e,
    };

    log::warn!("{lossless}. Retrying with lossy EXIF rewrite");

    codec
        .write(path, metadata, WriteStrategy::Lossy)
        .map_err(|lossy| SyncError::CodecWriteFatal {
            path: path.to_path_buf(),
            lossless,
            lossy,
        })
}
