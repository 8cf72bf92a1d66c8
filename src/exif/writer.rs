use anyhow::{Context, Result};
use img_parts::Bytes;
use img_parts::ImageEXIF;
use img_parts::jpeg::{Jpeg, JpegSegment};
use little_exif::endian::Endian;
use little_exif::exif_tag::{ExifTag, ExifTagGroup};
use little_exif::exif_tag_format::ExifTagFormat;
use little_exif::filetype::FileExtension;
use std::path::Path;

use super::WriteStrategy;
use super::reader::{
    TAG_XP_AUTHOR, TAG_XP_COMMENT, TAG_XP_SUBJECT, TAG_XP_TITLE, find_xmp_segment_pos, xmp_packet,
};
use super::xmp::{self, XMP_HEADER};
use crate::config::StoreOption;
use crate::metadata::Metadata;

const TAG_IMAGE_DESCRIPTION: u16 = 0x010E;
const TAG_USER_COMMENT: u16 = 0x9286;
const TAG_EXIF_IFD_POINTER: u16 = 0x8769;

// little_exif as_u8_vec(JPEG) returns: [APP1 marker 2B][length 2B][Exif\0\0 6B][TIFF data]
// img-parts set_exif() expects just the TIFF data (after Exif\0\0)
const JPEG_EXIF_OVERHEAD: usize = 10; // 2 + 2 + 6

/// Largest payload of a JPEG marker segment (length field minus itself).
const MAX_SEGMENT_CONTENTS: usize = 65533;
const EXIF_PREFIX: &[u8] = b"Exif\0\0";

/// The subset of [`Metadata`] mirrored into standard EXIF tags.
struct ExifText<'a> {
    title: Option<&'a str>,
    comment: Option<&'a str>,
    subject: Option<&'a str>,
    person: Option<&'a str>,
}

impl<'a> ExifText<'a> {
    fn from_metadata(m: &'a Metadata) -> Self {
        Self {
            title: m.title.as_deref(),
            comment: m.comment.as_deref(),
            subject: m.subject.as_deref(),
            person: m.person.as_deref(),
        }
    }

    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.comment.is_none()
            && self.subject.is_none()
            && self.person.is_none()
    }
}

/// Produce the new content of the JPEG at `path` with `metadata` applied.
///
/// The file itself is not modified. EXIF tags are only touched when
/// `store_option` allows it; the XMP packet is always written, so that after
/// the first store it is authoritative over any camera EXIF text.
pub(crate) fn encode_jpeg(
    path: &Path,
    metadata: &Metadata,
    strategy: WriteStrategy,
    store_option: StoreOption,
) -> Result<Vec<u8>> {
    let file_bytes = std::fs::read(path).context("Failed to read image file")?;

    // Parse JPEG structure with img-parts (preserves all segments)
    let mut jpeg = Jpeg::from_bytes(Bytes::from(file_bytes))
        .map_err(|e| anyhow::anyhow!("Failed to parse JPEG: {e}"))?;

    if store_option.writes_exif() {
        update_exif(&mut jpeg, path, &ExifText::from_metadata(metadata), strategy)?;
    }

    update_xmp_metadata(&mut jpeg, metadata)?;

    Ok(jpeg.encoder().bytes().to_vec())
}

fn update_exif(jpeg: &mut Jpeg, path: &Path, text: &ExifText, strategy: WriteStrategy) -> Result<()> {
    // Remember where the EXIF segment was originally positioned
    let orig_exif_pos = find_exif_segment_pos(jpeg.segments());
    let original_exif = jpeg.exif().unwrap_or_default();

    let tiff_data = match strategy {
        WriteStrategy::Lossless if original_exif.is_empty() => {
            if text.is_empty() {
                return Ok(());
            }
            fresh_tiff(text)?
        }
        WriteStrategy::Lossless => {
            let (ifd0, exif_ifd) = raw_edits(text);
            inject_tags_into_tiff(&original_exif, &ifd0, &exif_ifd)?
        }
        WriteStrategy::Lossy => {
            let Some(rebuilt) = rebuilt_tiff(path, text)? else {
                return Ok(());
            };
            // little_exif keeps every tag it parsed; drop the cleared mirrors
            let (ifd0, exif_ifd) = absent_tags(text);
            inject_tags_into_tiff(&rebuilt, &ifd0.into(), &exif_ifd.into())?
        }
    };

    if tiff_data[..] == original_exif[..] {
        return Ok(());
    }

    if tiff_data.len() + EXIF_PREFIX.len() > MAX_SEGMENT_CONTENTS {
        anyhow::bail!("EXIF block of {} bytes does not fit in one APP1 segment", tiff_data.len());
    }

    jpeg.set_exif(Some(Bytes::from(tiff_data)));

    // set_exif() inserts at position 3, which may be after XMP APP1.
    // Move the EXIF segment back to its original position so EXIF comes
    // before XMP (required for many EXIF parsers).
    if let Some(new_pos) = find_exif_segment_pos(jpeg.segments()) {
        let target_pos = orig_exif_pos.unwrap_or_else(|| after_app0(jpeg.segments()));
        if target_pos < new_pos {
            let segments = jpeg.segments_mut();
            let seg = segments.remove(new_pos);
            segments.insert(target_pos, seg);
        }
    }

    Ok(())
}

/// Index right after a leading JFIF APP0 segment.
fn after_app0(segments: &[JpegSegment]) -> usize {
    match segments.first() {
        Some(s) if s.marker() == 0xE0 => 1,
        _ => 0,
    }
}

/// Find the position of the EXIF APP1 segment in a JPEG.
/// EXIF segments have marker 0xE1 (APP1) and contents starting with "Exif\0\0".
fn find_exif_segment_pos(segments: &[JpegSegment]) -> Option<usize> {
    segments
        .iter()
        .position(|s| s.marker() == 0xE1 && s.contents().starts_with(EXIF_PREFIX))
}

// ============================================================================
// Lossy strategy: rebuild the EXIF block with little_exif
// ============================================================================

/// Encode a string as UTF-16LE bytes (used for XP* tags).
fn encode_utf16le(s: &str) -> Vec<u8> {
    let mut bytes: Vec<u8> = s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
    // Null terminator
    bytes.push(0);
    bytes.push(0);
    bytes
}

/// Create an XP* tag (UTF-16LE encoded, IFD0 group).
fn make_xp_tag(tag_id: u16, value: &str) -> Option<ExifTag> {
    let raw_data = encode_utf16le(value);
    ExifTag::from_u16_with_data(
        tag_id,
        &ExifTagFormat::INT8U,
        &raw_data,
        &Endian::Little,
        &ExifTagGroup::IFD0,
    )
    .ok()
}

fn user_comment_bytes(value: &str) -> Vec<u8> {
    let mut data = b"ASCII\0\0\0".to_vec();
    data.extend_from_slice(value.as_bytes());
    data
}

fn little_exif_tags(text: &ExifText) -> Vec<ExifTag> {
    let mut tags = Vec::new();
    if let Some(title) = text.title {
        tags.push(ExifTag::ImageDescription(title.to_string()));
        tags.extend(make_xp_tag(TAG_XP_TITLE, title));
    }
    if let Some(comment) = text.comment {
        tags.push(ExifTag::UserComment(user_comment_bytes(comment)));
        tags.extend(make_xp_tag(TAG_XP_COMMENT, comment));
    }
    if let Some(subject) = text.subject {
        tags.extend(make_xp_tag(TAG_XP_SUBJECT, subject));
    }
    if let Some(person) = text.person {
        tags.extend(make_xp_tag(TAG_XP_AUTHOR, person));
    }
    tags
}

/// Load existing EXIF metadata from a file path using little_exif.
/// Returns None if it can't parse.
fn load_existing_metadata(path: &Path) -> Option<little_exif::metadata::Metadata> {
    let path_owned = path.to_path_buf();
    let result = std::panic::catch_unwind(move || {
        little_exif::metadata::Metadata::new_from_path(&path_owned)
    });

    match result {
        Ok(Ok(m)) if m.data().is_empty() => {
            log::debug!("little_exif loaded empty metadata");
            None
        }
        Ok(Ok(m)) => {
            log::debug!("little_exif loaded {} existing EXIF tags", m.data().len());
            Some(m)
        }
        Ok(Err(e)) => {
            log::debug!("little_exif could not parse EXIF: {e}");
            None
        }
        Err(_) => {
            log::debug!("little_exif panicked parsing EXIF");
            None
        }
    }
}

fn serialize_tiff(metadata: &little_exif::metadata::Metadata) -> Result<Vec<u8>> {
    let exif_bytes = metadata.as_u8_vec(FileExtension::JPEG);
    if exif_bytes.len() <= JPEG_EXIF_OVERHEAD {
        anyhow::bail!("little_exif produced an empty EXIF block");
    }
    Ok(exif_bytes[JPEG_EXIF_OVERHEAD..].to_vec())
}

/// A fresh EXIF block holding only our tags.
fn fresh_tiff(text: &ExifText) -> Result<Vec<u8>> {
    let mut metadata = little_exif::metadata::Metadata::new();
    for tag in little_exif_tags(text) {
        metadata.set_tag(tag);
    }
    serialize_tiff(&metadata)
}

/// Round-trip the existing EXIF through little_exif, which keeps the tags it
/// understands and drops the rest (maker notes, unknown private tags).
///
/// `None` when there is no readable EXIF and nothing to mirror into it.
fn rebuilt_tiff(path: &Path, text: &ExifText) -> Result<Option<Vec<u8>>> {
    let Some(mut metadata) = load_existing_metadata(path) else {
        if text.is_empty() {
            log::debug!("No readable EXIF in {}, leaving it as is", path.display());
            return Ok(None);
        }
        log::info!("Rebuilding EXIF from scratch for {}", path.display());
        return fresh_tiff(text).map(Some);
    };
    for tag in little_exif_tags(text) {
        metadata.set_tag(tag);
    }
    serialize_tiff(&metadata).map(Some)
}

// ============================================================================
// Lossless strategy: raw IFD injection into the original TIFF block
// ============================================================================

/// A raw IFD entry to inject into a TIFF.
struct RawIfdEntry {
    tag_id: u16,
    data_format: u16,            // TIFF data format (2=ASCII, 1=BYTE, 7=UNDEFINED)
    count: u32,
    inline_value: [u8; 4],       // value if data fits in 4 bytes
    extra_data: Option<Vec<u8>>, // data if > 4 bytes
}

impl RawIfdEntry {
    fn new(tag_id: u16, data_format: u16, data: Vec<u8>) -> Self {
        let count = data.len() as u32;
        if data.len() <= 4 {
            let mut inline = [0u8; 4];
            inline[..data.len()].copy_from_slice(&data);
            Self { tag_id, data_format, count, inline_value: inline, extra_data: None }
        } else {
            Self { tag_id, data_format, count, inline_value: [0u8; 4], extra_data: Some(data) }
        }
    }
}

/// Build a raw IFD entry for a string tag (ASCII, format=2).
fn make_string_entry(tag_id: u16, value: &str) -> RawIfdEntry {
    let mut data = value.as_bytes().to_vec();
    data.push(0); // null terminator
    RawIfdEntry::new(tag_id, 2, data)
}

/// Build a raw IFD entry for a UTF-16LE byte tag (XP* tags, format=1 BYTE).
fn make_xp_entry(tag_id: u16, value: &str) -> RawIfdEntry {
    RawIfdEntry::new(tag_id, 1, encode_utf16le(value))
}

/// Build a raw IFD entry for UserComment (UNDEFINED format=7, with ASCII prefix).
fn make_user_comment_entry(value: &str) -> RawIfdEntry {
    RawIfdEntry::new(TAG_USER_COMMENT, 7, user_comment_bytes(value))
}

/// Entries to set and tags to drop in one IFD.
#[derive(Default)]
struct IfdEdits {
    set: Vec<RawIfdEntry>,
    remove: Vec<u16>,
}

impl From<Vec<u16>> for IfdEdits {
    fn from(remove: Vec<u16>) -> Self {
        Self { set: Vec::new(), remove }
    }
}

/// Mirror tags of the fields absent in `text`, for IFD0 and ExifIFD.
fn absent_tags(text: &ExifText) -> (Vec<u16>, Vec<u16>) {
    let mut ifd0 = Vec::new();
    let mut exif_ifd = Vec::new();
    if text.title.is_none() {
        ifd0.extend([TAG_IMAGE_DESCRIPTION, TAG_XP_TITLE]);
    }
    if text.comment.is_none() {
        exif_ifd.push(TAG_USER_COMMENT);
        ifd0.push(TAG_XP_COMMENT);
    }
    if text.subject.is_none() {
        ifd0.push(TAG_XP_SUBJECT);
    }
    if text.person.is_none() {
        ifd0.push(TAG_XP_AUTHOR);
    }
    (ifd0, exif_ifd)
}

/// IFD0 and ExifIFD edits that make the EXIF text tags mirror `text`.
fn raw_edits(text: &ExifText) -> (IfdEdits, IfdEdits) {
    let (ifd0_remove, exif_remove) = absent_tags(text);
    let mut ifd0 = Vec::new();
    let mut exif_ifd = Vec::new();
    if let Some(title) = text.title {
        ifd0.push(make_string_entry(TAG_IMAGE_DESCRIPTION, title));
        ifd0.push(make_xp_entry(TAG_XP_TITLE, title));
    }
    if let Some(comment) = text.comment {
        exif_ifd.push(make_user_comment_entry(comment));
        ifd0.push(make_xp_entry(TAG_XP_COMMENT, comment));
    }
    if let Some(subject) = text.subject {
        ifd0.push(make_xp_entry(TAG_XP_SUBJECT, subject));
    }
    if let Some(person) = text.person {
        ifd0.push(make_xp_entry(TAG_XP_AUTHOR, person));
    }
    (
        IfdEdits { set: ifd0, remove: ifd0_remove },
        IfdEdits { set: exif_ifd, remove: exif_remove },
    )
}

/// Byte order aware accessors for a TIFF block.
#[derive(Clone, Copy)]
struct ByteOrder {
    big_endian: bool,
}

impl ByteOrder {
    fn read_u16(self, data: &[u8], offset: usize) -> u16 {
        let b = [data[offset], data[offset + 1]];
        if self.big_endian { u16::from_be_bytes(b) } else { u16::from_le_bytes(b) }
    }

    fn read_u32(self, data: &[u8], offset: usize) -> u32 {
        let b = [data[offset], data[offset + 1], data[offset + 2], data[offset + 3]];
        if self.big_endian { u32::from_be_bytes(b) } else { u32::from_le_bytes(b) }
    }

    fn encode_u16(self, val: u16) -> [u8; 2] {
        if self.big_endian { val.to_be_bytes() } else { val.to_le_bytes() }
    }

    fn encode_u32(self, val: u32) -> [u8; 4] {
        if self.big_endian { val.to_be_bytes() } else { val.to_le_bytes() }
    }
}

/// Location of a parsed IFD inside the original block.
struct IfdInfo {
    count: usize,
    start: usize,
    tag_ids: Vec<u16>,
    next: u32,
}

fn parse_ifd(data: &[u8], offset: usize, order: ByteOrder) -> Result<IfdInfo> {
    if offset + 2 > data.len() {
        anyhow::bail!("IFD offset {offset} out of bounds");
    }
    let count = order.read_u16(data, offset) as usize;
    let start = offset + 2;
    let end = start + count * 12;
    if end + 4 > data.len() {
        anyhow::bail!("IFD entries extend beyond TIFF data");
    }
    let tag_ids = (0..count).map(|i| order.read_u16(data, start + i * 12)).collect();
    let next = order.read_u32(data, end);
    Ok(IfdInfo { count, start, tag_ids, next })
}

impl IfdInfo {
    /// Indices of the original entries that survive `edits`.
    fn kept(&self, edits: &IfdEdits) -> Vec<usize> {
        (0..self.count)
            .filter(|&i| !edits.remove.contains(&self.tag_ids[i]))
            .collect()
    }

    /// Whether `edits` would change this IFD.
    fn affected_by(&self, edits: &IfdEdits) -> bool {
        !edits.set.is_empty() || self.tag_ids.iter().any(|t| edits.remove.contains(t))
    }
}

/// Append a copy of `ifd` with `edits` applied to the end of `result`.
/// Entries in `edits.set` replace same-tag entries in place or are added;
/// tags in `edits.remove` are left out. Returns the offset of the new IFD.
fn append_ifd(
    result: &mut Vec<u8>,
    original: &[u8],
    ifd: &IfdInfo,
    edits: &IfdEdits,
    order: ByteOrder,
) -> Result<u32> {
    // IFDs start on a word boundary
    if result.len() % 2 == 1 {
        result.push(0);
    }

    let kept = ifd.kept(edits);
    let kept_tags: Vec<u16> = kept.iter().map(|&i| ifd.tag_ids[i]).collect();

    let append_count = edits.set.iter().filter(|e| !kept_tags.contains(&e.tag_id)).count();
    let total = u16::try_from(kept.len() + append_count).context("Too many IFD entries")?;

    let start = result.len();
    let start_offset = u32::try_from(start).context("TIFF block too large")?;

    // Entry count
    result.extend_from_slice(&order.encode_u16(total));

    // Copy surviving original entries
    for &i in &kept {
        let eo = ifd.start + i * 12;
        result.extend_from_slice(&original[eo..eo + 12]);
    }

    // Placeholder slots for new entries
    let append_start = result.len();
    result.resize(append_start + append_count * 12, 0);

    // Next-IFD pointer
    result.extend_from_slice(&order.encode_u32(ifd.next));

    // Append data blobs and build entries
    let mut raw: Vec<(u16, [u8; 12])> = Vec::new();
    for entry in &edits.set {
        let mut ib = [0u8; 12];
        ib[0..2].copy_from_slice(&order.encode_u16(entry.tag_id));
        ib[2..4].copy_from_slice(&order.encode_u16(entry.data_format));
        ib[4..8].copy_from_slice(&order.encode_u32(entry.count));
        if let Some(ref extra) = entry.extra_data {
            if result.len() % 2 == 1 {
                result.push(0);
            }
            let data_off = u32::try_from(result.len()).context("TIFF block too large")?;
            ib[8..12].copy_from_slice(&order.encode_u32(data_off));
            result.extend_from_slice(extra);
        } else {
            ib[8..12].copy_from_slice(&entry.inline_value);
        }
        raw.push((entry.tag_id, ib));
    }

    // Fill entries
    let entries_base = start + 2;
    let mut slot = 0;
    for (tag_id, ib) in &raw {
        let off = match kept_tags.iter().position(|t| t == tag_id) {
            Some(idx) => entries_base + idx * 12,
            None => {
                let off = append_start + slot * 12;
                slot += 1;
                off
            }
        };
        result[off..off + 12].copy_from_slice(ib);
    }

    Ok(start_offset)
}

/// Apply `ifd0_edits` and `exif_ifd_edits` directly to the original raw TIFF
/// data.
///
/// Each affected IFD is copied to the end of the block with the edits
/// applied, and the header / ExifIFD pointer are redirected. Every original
/// byte stays where it was, so offsets held by tags this code knows nothing
/// about (maker notes, thumbnails) remain valid. Returns the input unchanged
/// when no edit applies.
fn inject_tags_into_tiff(
    original: &[u8],
    ifd0_edits: &IfdEdits,
    exif_ifd_edits: &IfdEdits,
) -> Result<Vec<u8>> {
    if original.len() < 8 {
        anyhow::bail!("Original TIFF data too short");
    }

    let order = match &original[0..2] {
        b"MM" => ByteOrder { big_endian: true },
        b"II" => ByteOrder { big_endian: false },
        _ => anyhow::bail!("Invalid TIFF byte order"),
    };

    let ifd0 = parse_ifd(original, order.read_u32(original, 4) as usize, order)?;

    // Find ExifIFD offset from IFD0
    let exif_pointer_idx = ifd0.tag_ids.iter().position(|t| *t == TAG_EXIF_IFD_POINTER);
    let exif_ifd = match exif_pointer_idx {
        Some(idx) => {
            let offset = order.read_u32(original, ifd0.start + idx * 12 + 8) as usize;
            Some(parse_ifd(original, offset, order)?)
        }
        None if !exif_ifd_edits.set.is_empty() => {
            anyhow::bail!("EXIF block has no ExifIFD to hold UserComment");
        }
        None => None,
    };

    let exif_changes = exif_ifd.as_ref().is_some_and(|e| e.affected_by(exif_ifd_edits));
    if !exif_changes && !ifd0.affected_by(ifd0_edits) {
        return Ok(original.to_vec());
    }

    let mut result = original.to_vec();

    let new_exif_ifd = match &exif_ifd {
        Some(exif_ifd) if exif_changes => {
            Some(append_ifd(&mut result, original, exif_ifd, exif_ifd_edits, order)?)
        }
        _ => None,
    };

    let new_ifd0 = append_ifd(&mut result, original, &ifd0, ifd0_edits, order)?;

    // The pointer entry is never removed; find its index among the kept entries
    let new_pointer_idx = ifd0
        .kept(ifd0_edits)
        .iter()
        .position(|&i| ifd0.tag_ids[i] == TAG_EXIF_IFD_POINTER);
    if let (Some(new_exif_off), Some(idx)) = (new_exif_ifd, new_pointer_idx) {
        let eo = new_ifd0 as usize + 2 + idx * 12;
        result[eo + 8..eo + 12].copy_from_slice(&order.encode_u32(new_exif_off));
    }

    // Update TIFF header to point to new IFD0
    result[4..8].copy_from_slice(&order.encode_u32(new_ifd0));

    Ok(result)
}

// ============================================================================
// XMP Metadata Writing
// ============================================================================

/// Update or create the XMP packet of the JPEG.
fn update_xmp_metadata(jpeg: &mut Jpeg, metadata: &Metadata) -> Result<()> {
    let existing_xmp = xmp_packet(jpeg);
    let new_xmp = xmp::build_xmp(existing_xmp.as_deref(), metadata);

    // Build the segment contents: XMP header + XMP data
    let mut contents = Vec::with_capacity(XMP_HEADER.len() + new_xmp.len());
    contents.extend_from_slice(XMP_HEADER);
    contents.extend_from_slice(new_xmp.as_bytes());
    if contents.len() > MAX_SEGMENT_CONTENTS {
        anyhow::bail!("XMP packet of {} bytes does not fit in one APP1 segment", new_xmp.len());
    }

    let new_segment = JpegSegment::new_with_contents(0xE1, Bytes::from(contents));

    let segments = jpeg.segments_mut();
    if let Some(pos) = find_xmp_segment_pos(segments) {
        segments[pos] = new_segment;
    } else {
        // Insert after EXIF APP1, or after APP0
        let insert_pos = find_exif_segment_pos(segments)
            .map(|p| p + 1)
            .unwrap_or_else(|| after_app0(segments));
        let insert_pos = std::cmp::min(insert_pos, segments.len());
        segments.insert(insert_pos, new_segment);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Little-endian TIFF: IFD0 with Orientation + ExifIFD pointer,
    /// ExifIFD with one unrelated tag (ISO 100).
    fn sample_tiff() -> Vec<u8> {
        let mut t = Vec::new();
        t.extend_from_slice(b"II");
        t.extend_from_slice(&42u16.to_le_bytes());
        t.extend_from_slice(&8u32.to_le_bytes());
        // IFD0 at 8: 2 entries
        t.extend_from_slice(&2u16.to_le_bytes());
        // Orientation = 6
        t.extend_from_slice(&0x0112u16.to_le_bytes());
        t.extend_from_slice(&3u16.to_le_bytes());
        t.extend_from_slice(&1u32.to_le_bytes());
        t.extend_from_slice(&[6, 0, 0, 0]);
        // ExifIFD pointer -> 38
        t.extend_from_slice(&TAG_EXIF_IFD_POINTER.to_le_bytes());
        t.extend_from_slice(&4u16.to_le_bytes());
        t.extend_from_slice(&1u32.to_le_bytes());
        t.extend_from_slice(&38u32.to_le_bytes());
        // next IFD
        t.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(t.len(), 38);
        // ExifIFD at 38: 1 entry, ISO = 100
        t.extend_from_slice(&1u16.to_le_bytes());
        t.extend_from_slice(&0x8827u16.to_le_bytes());
        t.extend_from_slice(&3u16.to_le_bytes());
        t.extend_from_slice(&1u32.to_le_bytes());
        t.extend_from_slice(&[100, 0, 0, 0]);
        t.extend_from_slice(&0u32.to_le_bytes());
        t
    }

    fn find_entry(data: &[u8], ifd_offset: usize, tag: u16) -> Option<[u8; 12]> {
        let order = ByteOrder { big_endian: false };
        let ifd = parse_ifd(data, ifd_offset, order).ok()?;
        let idx = ifd.tag_ids.iter().position(|t| *t == tag)?;
        let eo = ifd.start + idx * 12;
        data[eo..eo + 12].try_into().ok()
    }

    fn set(entry: RawIfdEntry) -> IfdEdits {
        IfdEdits {
            set: vec![entry],
            remove: Vec::new(),
        }
    }

    fn ifd0_offset(data: &[u8]) -> usize {
        u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize
    }

    fn entry_value_offset(entry: &[u8; 12]) -> usize {
        u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]) as usize
    }

    #[test]
    fn inject_keeps_original_bytes_and_adds_tags() {
        let original = sample_tiff();
        let text = ExifText {
            title: Some("Left eye, follow-up"),
            comment: Some("pigment spot"),
            subject: None,
            person: None,
        };
        let (ifd0, exif_ifd) = raw_edits(&text);
        let result = inject_tags_into_tiff(&original, &ifd0, &exif_ifd).unwrap();

        // Original block is an untouched prefix except for the IFD0 pointer
        assert_eq!(&result[8..original.len()], &original[8..]);

        let new_ifd0 = u32::from_le_bytes([result[4], result[5], result[6], result[7]]) as usize;
        assert!(new_ifd0 >= original.len());
        assert_eq!(new_ifd0 % 2, 0);

        // Orientation survives
        let orientation = find_entry(&result, new_ifd0, 0x0112).unwrap();
        assert_eq!(orientation[8], 6);

        // ImageDescription points at the null-terminated title
        let desc = find_entry(&result, new_ifd0, TAG_IMAGE_DESCRIPTION).unwrap();
        let off = entry_value_offset(&desc);
        assert_eq!(&result[off..off + 19], b"Left eye, follow-up");
        assert_eq!(result[off + 19], 0);

        // ExifIFD was rebuilt with ISO kept and UserComment added
        let pointer = find_entry(&result, new_ifd0, TAG_EXIF_IFD_POINTER).unwrap();
        let new_exif = entry_value_offset(&pointer);
        assert_ne!(new_exif, 38);
        let iso = find_entry(&result, new_exif, 0x8827).unwrap();
        assert_eq!(iso[8], 100);
        let comment = find_entry(&result, new_exif, TAG_USER_COMMENT).unwrap();
        let off = entry_value_offset(&comment);
        assert_eq!(&result[off..off + 20], b"ASCII\0\0\0pigment spot");
    }

    #[test]
    fn inject_replaces_existing_tag_in_place() {
        let original = sample_tiff();
        let first = inject_tags_into_tiff(
            &original,
            &set(make_string_entry(TAG_IMAGE_DESCRIPTION, "first")),
            &IfdEdits::default(),
        )
        .unwrap();
        let second = inject_tags_into_tiff(
            &first,
            &set(make_string_entry(TAG_IMAGE_DESCRIPTION, "second")),
            &IfdEdits::default(),
        )
        .unwrap();

        let ifd0 = u32::from_le_bytes([second[4], second[5], second[6], second[7]]) as usize;
        let order = ByteOrder { big_endian: false };
        let parsed = parse_ifd(&second, ifd0, order).unwrap();
        assert_eq!(parsed.count, 3);
        let desc = find_entry(&second, ifd0, TAG_IMAGE_DESCRIPTION).unwrap();
        let off = entry_value_offset(&desc);
        assert_eq!(&second[off..off + 7], b"second\0");
    }

    #[test]
    fn cleared_fields_are_removed_from_both_ifds() {
        let full = ExifText {
            title: Some("camera title"),
            comment: Some("camera comment"),
            subject: Some("iris"),
            person: None,
        };
        let (ifd0, exif_ifd) = raw_edits(&full);
        let written = inject_tags_into_tiff(&sample_tiff(), &ifd0, &exif_ifd).unwrap();

        let cleared = ExifText {
            title: None,
            comment: None,
            subject: Some("iris"),
            person: None,
        };
        let (ifd0, exif_ifd) = raw_edits(&cleared);
        let result = inject_tags_into_tiff(&written, &ifd0, &exif_ifd).unwrap();

        let new_ifd0 = ifd0_offset(&result);
        assert!(find_entry(&result, new_ifd0, TAG_IMAGE_DESCRIPTION).is_none());
        assert!(find_entry(&result, new_ifd0, TAG_XP_TITLE).is_none());
        assert!(find_entry(&result, new_ifd0, TAG_XP_COMMENT).is_none());
        assert!(find_entry(&result, new_ifd0, TAG_XP_SUBJECT).is_some());
        assert_eq!(find_entry(&result, new_ifd0, 0x0112).unwrap()[8], 6);

        // The pointer follows the ExifIFD rebuilt without UserComment
        let pointer = find_entry(&result, new_ifd0, TAG_EXIF_IFD_POINTER).unwrap();
        let new_exif = entry_value_offset(&pointer);
        assert!(find_entry(&result, new_exif, TAG_USER_COMMENT).is_none());
        assert_eq!(find_entry(&result, new_exif, 0x8827).unwrap()[8], 100);
    }

    #[test]
    fn nothing_to_set_or_remove_keeps_block() {
        let original = sample_tiff();
        let empty = ExifText {
            title: None,
            comment: None,
            subject: None,
            person: None,
        };
        let (ifd0, exif_ifd) = raw_edits(&empty);
        assert_eq!(inject_tags_into_tiff(&original, &ifd0, &exif_ifd).unwrap(), original);
    }

    #[test]
    fn removal_without_exif_ifd_is_fine() {
        let mut t = Vec::new();
        t.extend_from_slice(b"II");
        t.extend_from_slice(&42u16.to_le_bytes());
        t.extend_from_slice(&8u32.to_le_bytes());
        t.extend_from_slice(&0u16.to_le_bytes());
        t.extend_from_slice(&0u32.to_le_bytes());

        let result = inject_tags_into_tiff(&t, &IfdEdits::default(), &vec![TAG_USER_COMMENT].into())
            .unwrap();
        assert_eq!(result, t);
    }

    #[test]
    fn short_string_is_stored_inline() {
        let entry = make_string_entry(TAG_IMAGE_DESCRIPTION, "OD");
        assert!(entry.extra_data.is_none());
        assert_eq!(&entry.inline_value, b"OD\0\0");
        assert_eq!(entry.count, 3);
    }

    #[test]
    fn user_comment_without_exif_ifd_fails() {
        let mut t = Vec::new();
        t.extend_from_slice(b"II");
        t.extend_from_slice(&42u16.to_le_bytes());
        t.extend_from_slice(&8u32.to_le_bytes());
        t.extend_from_slice(&0u16.to_le_bytes());
        t.extend_from_slice(&0u32.to_le_bytes());

        let err = inject_tags_into_tiff(&t, &IfdEdits::default(), &set(make_user_comment_entry("x"))).unwrap_err();
        assert!(err.to_string().contains("ExifIFD"));
    }

    #[test]
    fn invalid_byte_order_fails() {
        let err = inject_tags_into_tiff(b"XX\0\0\0\0\0\0", &set(make_xp_entry(TAG_XP_TITLE, "t")), &IfdEdits::default())
            .unwrap_err();
        assert!(err.to_string().contains("byte order"));
    }

    #[test]
    fn truncated_ifd_fails() {
        let mut t = sample_tiff();
        t.truncate(20);
        assert!(inject_tags_into_tiff(&t, &set(make_xp_entry(TAG_XP_TITLE, "t")), &IfdEdits::default()).is_err());
    }

    #[test]
    fn big_endian_block_is_supported() {
        let mut t = Vec::new();
        t.extend_from_slice(b"MM");
        t.extend_from_slice(&42u16.to_be_bytes());
        t.extend_from_slice(&8u32.to_be_bytes());
        t.extend_from_slice(&0u16.to_be_bytes());
        t.extend_from_slice(&0u32.to_be_bytes());

        let result =
            inject_tags_into_tiff(&t, &set(make_xp_entry(TAG_XP_SUBJECT, "iris")), &IfdEdits::default())
                .unwrap();
        let ifd0 = u32::from_be_bytes([result[4], result[5], result[6], result[7]]) as usize;
        assert_eq!(u16::from_be_bytes([result[ifd0], result[ifd0 + 1]]), 1);
        assert_eq!(
            u16::from_be_bytes([result[ifd0 + 2], result[ifd0 + 3]]),
            TAG_XP_SUBJECT
        );
    }

    #[test]
    fn utf16_encoding_is_null_terminated() {
        assert_eq!(encode_utf16le("Ab"), vec![b'A', 0, b'b', 0, 0, 0]);
    }
}
