use anyhow::{Context, Result};
use img_parts::jpeg::{Jpeg, JpegSegment};
use nom_exif::*;
use std::path::Path;

use super::xmp::XMP_HEADER;
use crate::metadata::Metadata;

// XP* tag IDs (IFD0)
pub(crate) const TAG_XP_TITLE: u16 = 0x9C9B;
pub(crate) const TAG_XP_COMMENT: u16 = 0x9C9C;
pub(crate) const TAG_XP_AUTHOR: u16 = 0x9C9D;
pub(crate) const TAG_XP_SUBJECT: u16 = 0x9C9F;

/// Read the standard EXIF tags of a photo into a [`Metadata`].
///
/// Only the fields with an EXIF home are filled: title (ImageDescription,
/// XPTitle), comment (UserComment, XPComment), subject (XPSubject),
/// person (XPAuthor) and orientation. A file without EXIF yields an empty
/// record.
pub fn read_exif(path: &Path) -> Result<Metadata> {
    let mut parser = MediaParser::new();
    let ms = MediaSource::file_path(path).context("Failed to open image file")?;

    let iter: ExifIter = match parser.parse(ms) {
        Ok(iter) => iter,
        Err(_) => {
            log::debug!("No EXIF data found in {}", path.display());
            return Ok(Metadata::default());
        }
    };
    let exif: Exif = iter.into();

    let mut data = Metadata::default();

    // Title / ImageDescription
    if let Some(val) = exif.get(ExifTag::ImageDescription) {
        data.title = entry_to_string(val);
    }

    // XPTitle fallback
    if data.title.is_none() {
        if let Some(val) = exif.get_by_ifd_tag_code(0, TAG_XP_TITLE) {
            data.title = entry_to_string(val);
        }
    }

    // Comment / UserComment
    if let Some(val) = exif.get(ExifTag::UserComment) {
        data.comment = entry_to_string(val).and_then(|s| strip_charset_prefix(&s));
    }

    // XPComment fallback
    if data.comment.is_none() {
        if let Some(val) = exif.get_by_ifd_tag_code(0, TAG_XP_COMMENT) {
            data.comment = entry_to_string(val);
        }
    }

    if let Some(val) = exif.get_by_ifd_tag_code(0, TAG_XP_SUBJECT) {
        data.subject = entry_to_string(val);
    }

    if let Some(val) = exif.get_by_ifd_tag_code(0, TAG_XP_AUTHOR) {
        data.person = entry_to_string(val);
    }

    if let Some(val) = exif.get(ExifTag::Orientation) {
        data.orientation = entry_to_string(val)
            .and_then(|s| s.parse::<u16>().ok())
            .filter(|o| (1..=8).contains(o));
    }

    Ok(data)
}

/// Convert an EntryValue to an Option<String>.
fn entry_to_string(val: &EntryValue) -> Option<String> {
    let s = val.to_string();
    let s = s.trim().trim_matches('"').trim_matches('\0').to_string();
    if s.is_empty() { None } else { Some(s) }
}

/// Drop the 8-byte character code header of a UserComment value.
fn strip_charset_prefix(s: &str) -> Option<String> {
    let stripped = ["ASCII", "UNICODE", "JIS"]
        .iter()
        .find_map(|code| s.strip_prefix(code))
        .map(|rest| rest.trim_start_matches('\0'))
        .unwrap_or(s)
        .trim();
    if stripped.is_empty() { None } else { Some(stripped.to_string()) }
}

/// Find the XMP APP1 segment position in a JPEG.
pub(crate) fn find_xmp_segment_pos(segments: &[JpegSegment]) -> Option<usize> {
    segments
        .iter()
        .position(|s| s.marker() == 0xE1 && s.contents().starts_with(XMP_HEADER))
}

/// The XMP packet of a JPEG, if it has one.
pub(crate) fn xmp_packet(jpeg: &Jpeg) -> Option<String> {
    let pos = find_xmp_segment_pos(jpeg.segments())?;
    let contents = jpeg.segments()[pos].contents();
    let xmp_bytes = &contents[XMP_HEADER.len()..];
    Some(String::from_utf8_lossy(xmp_bytes).to_string())
}
