//! C6 LosslessAssembler. Reassembles pre-encoded chapter byte ranges into
//! one Body without touching a single Opus payload byte: renumber pages,
//! retarget the serial, rebase granules, re-pad to 4 KiB, fix up the final
//! EOS, recompute the hash. Grounded in the teacher's
//! `copy_first_and_second_page`/`resize_pages` pair in `converter.rs`, gone
//! through a second lens since the teacher's version mutates Opus-TOC
//! padding in place. This one only ever grows the segment table (see
//! `crate::ogg_page`'s design note).

use sha1::{Digest, Sha1};

use crate::error::{Result, TonieError};
use crate::header::TonieHeader;
use crate::ogg_page::{OggPage, NO_GRANULE};
use crate::ogg_stream;
use crate::statistics::BLOCK_SIZE;

const HEADER_REGION_END: u64 = 0x200;

/// One chapter's worth of pre-encoded Ogg bytes: either extracted from an
/// existing Tonie file's Body, or freshly produced by [`crate::encoder`]
/// for a new chapter (with its own OpusHead/OpusTags already stripped by
/// the caller; see `spec.md` §4.7's `build_mixed`).
pub struct RawChapter {
    pub bytes: Vec<u8>,
}

/// Assembles `chapters` into a full Body, returning the Body bytes and the
/// [`TonieHeader`] built from them.
///
/// `original_body`, if given, supplies the canonical OpusHead+OpusTags
/// prefix (re-serialized with `audio_id` as the new serial); otherwise the
/// first chapter's own header pages are used.
pub fn assemble(
    chapters: &[RawChapter],
    original_body: Option<&[u8]>,
    audio_id: u32,
) -> Result<(Vec<u8>, TonieHeader)> {
    if chapters.is_empty() {
        return Err(TonieError::CorruptHeader(
            "cannot assemble an empty chapter list".into(),
        ));
    }

    let mut body = Vec::new();
    write_header_prefix(&mut body, original_body, chapters, audio_id)?;

    let mut next_sequence = 2u32;
    let mut cumulative_granule = 0u64;
    let mut chapter_markers = Vec::with_capacity(chapters.len());

    for (index, chapter) in chapters.iter().enumerate() {
        let pages = ogg_stream::pages(&chapter.bytes)?;
        let data_pages: Vec<_> = pages
            .iter()
            .filter(|entry| entry.page.sequence >= 2)
            .collect();

        let real_granules: Vec<u64> = data_pages
            .iter()
            .map(|entry| entry.page.granule)
            .filter(|&g| g != NO_GRANULE)
            .collect();
        let first_granule = real_granules.iter().copied().min().unwrap_or(0);
        let last_granule = real_granules.iter().copied().max().unwrap_or(0);
        let chapter_duration = last_granule.saturating_sub(first_granule);

        chapter_markers.push(if index > 0 { next_sequence } else { 0 });

        for entry in &data_pages {
            let mut page = entry.page.clone();
            let continuation = page.type_flags & crate::ogg_page::TYPE_CONTINUATION;
            page.set_bos(false);
            page.set_eos(false);
            page.type_flags |= continuation;
            page.serial = audio_id;
            page.sequence = next_sequence;
            next_sequence += 1;

            if page.granule != NO_GRANULE {
                page.granule = (page.granule - first_granule) + cumulative_granule;
            }

            let offset = body.len() as u64;
            let next_boundary = ((offset + page.size() as u64) / BLOCK_SIZE + 1) * BLOCK_SIZE;
            page.pad_to_end_at(offset, next_boundary)?;
            page.write(&mut body, None)?;
        }

        cumulative_granule += chapter_duration;
    }

    set_final_eos(&mut body)?;

    let mut hasher = Sha1::new();
    hasher.update(&body);
    let hash = hasher.finalize().to_vec();

    let header = TonieHeader::new(hash, body.len() as i32, audio_id, chapter_markers);
    Ok((body, header))
}

fn write_header_prefix(
    body: &mut Vec<u8>,
    original_body: Option<&[u8]>,
    chapters: &[RawChapter],
    audio_id: u32,
) -> Result<()> {
    let source = match original_body {
        Some(bytes) => bytes,
        None => &chapters[0].bytes,
    };
    let pages = ogg_stream::pages(source)?;
    let mut headers: Vec<OggPage> = ogg_stream::headers(
        &pages.iter().map(|entry| entry.page.clone()).collect::<Vec<_>>(),
    )
    .into_iter()
    .cloned()
    .collect();

    if headers.len() < 2 {
        return Err(TonieError::CorruptHeader(
            "source for header prefix has no OpusHead+OpusTags pair".into(),
        ));
    }
    for page in &mut headers {
        page.serial = audio_id;
    }

    let combined_len: usize = headers.iter().map(OggPage::size).sum();
    if combined_len as u64 > HEADER_REGION_END {
        return Err(TonieError::HeadersTooLarge(combined_len));
    }

    for page in &headers {
        page.write(body, None)?;
    }
    body.resize(HEADER_REGION_END as usize, 0);
    Ok(())
}

/// Scans backwards within the final 64 KiB of `body` for the last page,
/// sets its EOS flag, recomputes its checksum and rewrites it in place.
/// same fix-up the spec describes for C6 step 4.
fn set_final_eos(body: &mut [u8]) -> Result<()> {
    let window_start = body.len().saturating_sub(0x10000);
    let pages = ogg_stream::pages(&body[window_start..])?;
    let last = pages
        .last()
        .ok_or_else(|| TonieError::CorruptHeader("no pages found to set EOS on".into()))?;
    let absolute_offset = window_start as u64 + last.offset;

    let mut page = last.page.clone();
    page.set_eos(true);
    let mut rewritten = Vec::with_capacity(page.size());
    page.write(&mut rewritten, None)?;

    let start = absolute_offset as usize;
    body[start..start + rewritten.len()].copy_from_slice(&rewritten);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ogg_page::{OggPage, TYPE_BOS, TYPE_EOS};

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

    fn chapter_bytes(serial: u32, start_sequence: u32, page_count: u32, granule_step: u64) -> RawChapter {
        let mut buf = Vec::new();
        opus_head_page(serial).write(&mut buf, None).unwrap();
        opus_tags_page(serial).write(&mut buf, None).unwrap();
        let mut granule = 0u64;
        for i in 0..page_count {
            granule += granule_step;
            let mut page = OggPage::new(0, granule, serial, start_sequence + i);
            page.segments.push(vec![0xCD; 30]);
            if i + 1 == page_count {
                page.type_flags |= TYPE_EOS;
            }
            page.write(&mut buf, None).unwrap();
        }
        RawChapter { bytes: buf }
    }

    #[test]
    fn assemble_two_chapters_renumbers_sequentially() {
        let chapters = vec![
            chapter_bytes(1, 2, 3, 960),
            chapter_bytes(1, 2, 2, 960),
        ];
        let (body, header) = assemble(&chapters, None, 99).unwrap();
        assert_eq!(header.audio_id, 99);
        assert_eq!(header.audio_chapters, vec![0, 5]);

        let pages = ogg_stream::pages(&body).unwrap();
        let data_pages: Vec<_> = pages.iter().filter(|e| e.page.sequence >= 2).collect();
        assert_eq!(data_pages.len(), 5);
        let sequences: Vec<u32> = data_pages.iter().map(|e| e.page.sequence).collect();
        assert_eq!(sequences, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn assemble_rebases_granules_across_chapters() {
        let chapters = vec![chapter_bytes(1, 2, 2, 960), chapter_bytes(1, 2, 2, 960)];
        let (body, _header) = assemble(&chapters, None, 99).unwrap();
        let pages = ogg_stream::pages(&body).unwrap();
        let data_pages: Vec<_> = pages.iter().filter(|e| e.page.sequence >= 2).collect();
        // Second chapter's granules continue from the first chapter's span.
        assert!(data_pages[2].page.granule > data_pages[1].page.granule);
    }

    #[test]
    fn assemble_sets_eos_on_final_page_only() {
        let chapters = vec![chapter_bytes(1, 2, 2, 960)];
        let (body, _header) = assemble(&chapters, None, 5).unwrap();
        let pages = ogg_stream::pages(&body).unwrap();
        let data_pages: Vec<_> = pages.iter().filter(|e| e.page.sequence >= 2).collect();
        assert!(data_pages.last().unwrap().page.is_eos());
        assert!(!data_pages[0].page.is_eos());
    }

    #[test]
    fn assemble_hash_matches_body() {
        let chapters = vec![chapter_bytes(1, 2, 1, 960)];
        let (body, header) = assemble(&chapters, None, 5).unwrap();
        let mut hasher = Sha1::new();
        hasher.update(&body);
        assert_eq!(header.hash, hasher.finalize().to_vec());
        assert_eq!(header.audio_length as usize, body.len());
    }

    #[test]
    fn assemble_every_page_block_aligned() {
        let chapters = vec![chapter_bytes(1, 2, 4, 960), chapter_bytes(1, 2, 3, 960)];
        let (body, _header) = assemble(&chapters, None, 5).unwrap();
        for entry in ogg_stream::pages(&body).unwrap() {
            if entry.page.sequence < 2 {
                continue; // OpusHead/OpusTags end inside [0, 0x200), not on a 4 KiB boundary
            }
            let end = entry.offset + entry.page.size() as u64;
            assert_eq!(end % BLOCK_SIZE, 0);
        }
    }
}
