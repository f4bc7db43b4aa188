//! C3 OggStream. Scanning, classifying and annotating pages within a
//! buffer that is already known to hold a Body (or a standalone chapter
//! byte range formatted the same way).

use std::io::Cursor;

use crate::error::{Result, TonieError};
use crate::ogg_page::OggPage;

const OPUS_HEAD_MAGIC: &[u8] = b"OpusHead";
const OPUS_TAGS_MAGIC: &[u8] = b"OpusTags";

/// One page together with the byte offset (relative to the start of
/// `buffer`) it starts at.
pub struct OffsetPage {
    pub offset: u64,
    pub page: OggPage,
}

/// Lazily scans `buffer` for `OggS`-signed pages, skipping one byte at a
/// time on mis-sync, and returns them all with their starting offsets.
///
/// Two-state iteration per `spec.md` §9: each step either yields a page or
/// advances by one byte looking for the next sync point. There is no
/// exception-driven control flow for a corrupt byte in the middle of a
/// stream, callers just see fewer pages than expected.
pub fn pages(buffer: &[u8]) -> Result<Vec<OffsetPage>> {
    let mut result = Vec::new();
    let mut offset = 0usize;
    while offset + 4 <= buffer.len() {
        if &buffer[offset..offset + 4] != b"OggS" {
            offset += 1;
            continue;
        }
        let mut cursor = Cursor::new(&buffer[offset..]);
        let page = OggPage::parse(&mut cursor)?;
        let consumed = cursor.position() as usize;
        result.push(OffsetPage {
            offset: offset as u64,
            page,
        });
        offset += consumed;
    }
    Ok(result)
}

fn page_is(page: &OggPage, magic: &[u8]) -> bool {
    page.segments
        .first()
        .map(|first| first.len() >= magic.len() && &first[..magic.len()] == magic)
        .unwrap_or(false)
}

/// Returns the prefix of `pages` classified as OpusHead/OpusTags header pages.
pub fn headers(all_pages: &[OggPage]) -> Vec<&OggPage> {
    all_pages
        .iter()
        .take_while(|page| page_is(page, OPUS_HEAD_MAGIC) || page_is(page, OPUS_TAGS_MAGIC))
        .collect()
}

pub fn is_opus_head(page: &OggPage) -> bool {
    page_is(page, OPUS_HEAD_MAGIC)
}

pub fn is_opus_tags(page: &OggPage) -> bool {
    page_is(page, OPUS_TAGS_MAGIC)
}

/// Appends length-prefixed UTF-8 comment strings to an OpusTags page and
/// bumps its comment count field. The OpusTags payload layout (after the
/// 8-byte magic) is: vendor-string length + vendor string, then comment
/// count + repeated (length + UTF-8 bytes).
pub fn add_tags(page: &mut OggPage, tags: &[String]) -> Result<()> {
    if !is_opus_tags(page) {
        return Err(TonieError::CorruptHeader(
            "add_tags called on a page that is not OpusTags".into(),
        ));
    }
    let mut payload = page
        .segments
        .first()
        .cloned()
        .ok_or_else(|| TonieError::CorruptHeader("OpusTags page has no segment".into()))?;

    if payload.len() < 12 {
        return Err(TonieError::CorruptHeader("OpusTags payload too short".into()));
    }
    let vendor_len = u32::from_le_bytes(payload[8..12].try_into().unwrap()) as usize;
    let count_offset = 12 + vendor_len;
    if payload.len() < count_offset + 4 {
        return Err(TonieError::CorruptHeader(
            "OpusTags payload truncated before comment count".into(),
        ));
    }
    let mut count =
        u32::from_le_bytes(payload[count_offset..count_offset + 4].try_into().unwrap());

    let mut appended = Vec::new();
    for tag in tags {
        let bytes = tag.as_bytes();
        appended.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        appended.extend_from_slice(bytes);
        count += 1;
    }

    payload[count_offset..count_offset + 4].copy_from_slice(&count.to_le_bytes());
    payload.extend_from_slice(&appended);

    page.segments = vec![payload];
    Ok(())
}

/// Scans `buffer` for the page whose sequence number equals each entry of
/// `chapter_sequence_numbers`, in the order given, returning the byte
/// offset each one starts at.
pub fn chapter_offsets(buffer: &[u8], chapter_sequence_numbers: &[u32]) -> Result<Vec<u64>> {
    let scanned = pages(buffer)?;
    chapter_sequence_numbers
        .iter()
        .map(|&seq| {
            scanned
                .iter()
                .find(|entry| entry.page.sequence == seq)
                .map(|entry| entry.offset)
                .ok_or(TonieError::ChapterNotFound(seq))
        })
        .collect()
}

/// One granule per chapter marker (the granule of the page whose sequence
/// equals the marker), bracketed by an initial `0` and the end-of-stream
/// granule of the final page. Duplicates in `chapter_sequence_numbers` are
/// preserved; downstream UI layers are responsible for deduplicating.
pub fn parse_positions(buffer: &[u8], chapter_sequence_numbers: &[u32]) -> Result<Vec<u64>> {
    let scanned = pages(buffer)?;
    let mut positions = Vec::with_capacity(chapter_sequence_numbers.len() + 2);
    positions.push(0);
    for &seq in chapter_sequence_numbers {
        let granule = scanned
            .iter()
            .find(|entry| entry.page.sequence == seq)
            .map(|entry| entry.page.granule)
            .ok_or(TonieError::ChapterNotFound(seq))?;
        positions.push(granule);
    }
    let end_of_stream = scanned
        .last()
        .map(|entry| entry.page.granule)
        .unwrap_or(0);
    positions.push(end_of_stream);
    Ok(positions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ogg_page::{OggPage, TYPE_BOS};

    fn opus_head_page(serial: u32) -> OggPage {
        let mut page = OggPage::new(TYPE_BOS, 0, serial, 0);
        let mut payload = vec![0u8; 19];
        payload[..8].copy_from_slice(b"OpusHead");
        payload[8] = 1;
        payload[9] = 2;
        payload[12..16].copy_from_slice(&48000u32.to_le_bytes());
        page.segments.push(payload);
        page
    }

    fn opus_tags_page(serial: u32) -> OggPage {
        let mut page = OggPage::new(0, 0, serial, 1);
        let mut payload = Vec::new();
        payload.extend_from_slice(b"OpusTags");
        payload.extend_from_slice(&6u32.to_le_bytes());
        payload.extend_from_slice(b"tester");
        payload.extend_from_slice(&0u32.to_le_bytes());
        page.segments.push(payload);
        page
    }

    fn data_page(serial: u32, sequence: u32, granule: u64) -> OggPage {
        let mut page = OggPage::new(0, granule, serial, sequence);
        page.segments.push(vec![0xAB; 20]);
        page
    }

    fn sample_buffer() -> Vec<u8> {
        let mut buf = Vec::new();
        opus_head_page(42).write(&mut buf, None).unwrap();
        opus_tags_page(42).write(&mut buf, None).unwrap();
        data_page(42, 2, 960).write(&mut buf, None).unwrap();
        data_page(42, 3, 1920).write(&mut buf, None).unwrap();
        buf
    }

    #[test]
    fn pages_finds_all_four_pages() {
        let buf = sample_buffer();
        let found = pages(&buf).unwrap();
        assert_eq!(found.len(), 4);
        assert_eq!(found[0].offset, 0);
    }

    #[test]
    fn headers_returns_exactly_the_opus_head_and_tags_prefix() {
        let buf = sample_buffer();
        let found = pages(&buf).unwrap();
        let all: Vec<OggPage> = found.into_iter().map(|e| e.page).collect();
        let hdrs = headers(&all);
        assert_eq!(hdrs.len(), 2);
        assert!(is_opus_head(hdrs[0]));
        assert!(is_opus_tags(hdrs[1]));
    }

    #[test]
    fn add_tags_increments_comment_count() {
        let mut tags_page = opus_tags_page(42);
        add_tags(&mut tags_page, &["encoder=test".to_string()]).unwrap();

        let payload = &tags_page.segments[0];
        let vendor_len = u32::from_le_bytes(payload[8..12].try_into().unwrap()) as usize;
        let count_offset = 12 + vendor_len;
        let count = u32::from_le_bytes(
            payload[count_offset..count_offset + 4].try_into().unwrap(),
        );
        assert_eq!(count, 1);
    }

    #[test]
    fn chapter_offsets_finds_markers_in_requested_order() {
        let buf = sample_buffer();
        let offsets = chapter_offsets(&buf, &[3, 2]).unwrap();
        assert_eq!(offsets.len(), 2);
        assert!(offsets[0] > offsets[1]);
    }

    #[test]
    fn chapter_offsets_missing_marker_errors() {
        let buf = sample_buffer();
        let err = chapter_offsets(&buf, &[99]).unwrap_err();
        assert!(matches!(err, TonieError::ChapterNotFound(99)));
    }

    #[test]
    fn parse_positions_brackets_with_zero_and_eos_granule() {
        let buf = sample_buffer();
        let positions = parse_positions(&buf, &[2, 3]).unwrap();
        assert_eq!(positions, vec![0, 960, 1920, 1920]);
    }
}
