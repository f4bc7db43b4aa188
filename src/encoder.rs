//! C5 Encoder. Drives C2/C3, consuming PCM from an [`AudioDecoder`] and
//! [`OpusEncoder`] pair and emitting 4 KiB-aligned Ogg pages into a Body
//! buffer. Mirrors the shape of the teacher's
//! `Converter::create_tonie_file` loop (one source at a time, chapter
//! markers recorded as they're reached, pages resized/padded as they're
//! written) without its ffmpeg/opusenc subprocess plumbing, which lives in
//! [`crate::ffmpeg`] behind the same traits.

use log::{info, warn};

use crate::audio::{
    AudioDecoder, AudioSource, OpusEncoder, ProgressEvent, ProgressSink, CHANNELS,
    FRAME_SIZE_SAMPLES,
};
use crate::error::{Result, TonieError};
use crate::ogg_page::{OggPage, TYPE_BOS};
use crate::statistics::BLOCK_SIZE;

/// Soft warning threshold: 1 GiB.
const SIZE_WARNING_BYTES: u64 = 0x40000000;
/// Hard limit: ~1.994 GiB, the constant the original implementation enforces.
/// Whether hardware truly rejects larger files is unverified (`spec.md` §9);
/// treated as a hard library limit regardless.
pub const SIZE_LIMIT_BYTES: u64 = 0x77359400;

const SAMPLES_PER_FRAME_PER_CHANNEL: usize = FRAME_SIZE_SAMPLES;
const SAMPLES_PER_FRAME_INTERLEAVED: usize = FRAME_SIZE_SAMPLES * CHANNELS as usize;

/// Output of a full encode: the raw Body bytes and the page-sequence
/// numbers marking chapter starts (`chapter_markers[0] == 0` always).
pub struct EncodeOutput {
    pub body: Vec<u8>,
    pub chapter_markers: Vec<u32>,
}

/// Resolves `audio_id`, replacing `0` with the current Unix timestamp
/// truncated to u32. This is the Encoder's half of the "Timestamp IDs distinct"
/// property in `spec.md` §8; callers own the actual `SystemTime` read so
/// the encoder itself stays free of wall-clock side effects in tests.
pub fn resolve_audio_id(audio_id: u32, now_unix: u64) -> u32 {
    if audio_id == 0 {
        now_unix as u32
    } else {
        audio_id
    }
}

/// Builds the OpusHead page (seq 0, BOS set) per `spec.md` §3.
fn opus_head_page(serial: u32) -> OggPage {
    let mut page = OggPage::new(TYPE_BOS, 0, serial, 0);
    let mut payload = Vec::with_capacity(19);
    payload.extend_from_slice(b"OpusHead");
    payload.push(1); // version
    payload.push(CHANNELS as u8);
    payload.extend_from_slice(&0u16.to_le_bytes()); // pre-skip
    payload.extend_from_slice(&48_000u32.to_le_bytes()); // input sample rate
    payload.extend_from_slice(&0i16.to_le_bytes()); // output gain
    payload.push(0); // channel mapping family
    page.segments.push(payload);
    page
}

/// Builds the OpusTags page (seq 1) with a vendor string, an `encoder`
/// comment, and a large `pad` comment sized so the header pages together
/// occupy exactly `0x200` bytes, per `spec.md` §3.
fn opus_tags_page(serial: u32, vendor: &str) -> Result<OggPage> {
    let mut page = OggPage::new(0, 0, serial, 1);

    let mut payload = Vec::new();
    payload.extend_from_slice(b"OpusTags");
    payload.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    payload.extend_from_slice(vendor.as_bytes());
    payload.extend_from_slice(&1u32.to_le_bytes()); // comment count, bumped below
    let encoder_comment = "encoder=audio2tonie".to_string();
    payload.extend_from_slice(&(encoder_comment.len() as u32).to_le_bytes());
    payload.extend_from_slice(encoder_comment.as_bytes());
    page.segments.push(payload);

    // Pad with a `pad=` comment until the OpusHead+OpusTags pair together
    // occupy exactly 0x200 bytes. Solve directly rather than iterating: a
    // comment costs 4 (length prefix) + "pad=".len() + N bytes, and the
    // comment-count field is unaffected by N's own size (it's a plain u32,
    // not a varint).
    let head_size = opus_head_page(serial).size();
    let fixed_tags_size = page.size();
    let target = 0x200usize;
    if fixed_tags_size + head_size > target {
        return Err(TonieError::HeadersTooLarge(fixed_tags_size + head_size));
    }
    let budget = target - head_size - fixed_tags_size;
    // Each extra comment costs 4 + "pad=".len() + pad_len, plus it must
    // terminate the segment so the page's own lacing table can grow too;
    // solve iteratively the same way header padding does, since adding a
    // segment can itself grow the lacing-table entry count.
    let mut pad_len = budget.saturating_sub(4 + 4);
    loop {
        let mut candidate = page.clone();
        let comment = format!("pad={}", "=".repeat(pad_len));
        let mut payload = candidate.segments.pop().unwrap();
        let count_offset = 8 + 4 + vendor.len();
        let mut count = u32::from_le_bytes(payload[count_offset..count_offset + 4].try_into().unwrap());
        count += 1;
        payload[count_offset..count_offset + 4].copy_from_slice(&count.to_le_bytes());
        payload.extend_from_slice(&(comment.len() as u32).to_le_bytes());
        payload.extend_from_slice(comment.as_bytes());
        candidate.segments.push(payload);

        let total = head_size + candidate.size();
        if total == target {
            return Ok(candidate);
        }
        if total > target {
            if pad_len == 0 {
                return Err(TonieError::HeadersTooLarge(total));
            }
            pad_len -= 1;
        } else {
            pad_len += 1;
        }
    }
}

/// Encodes `sources` into a Body buffer plus chapter markers.
///
/// `audio_id` must already be resolved (see [`resolve_audio_id`]); the
/// caller is expected to have read the wall clock itself when `0` was
/// passed in, keeping this function a pure transform of its inputs.
pub fn encode(
    sources: &[AudioSource],
    audio_id: u32,
    decoder: &mut dyn AudioDecoder,
    encoder: &mut dyn OpusEncoder,
    progress: &mut dyn ProgressSink,
) -> Result<EncodeOutput> {
    let mut body = Vec::new();
    let head = opus_head_page(audio_id);
    head.write(&mut body, None)?;
    let tags = opus_tags_page(audio_id, "audio2tonie")?;
    tags.write(&mut body, None)?;
    if body.len() != 0x200 {
        return Err(TonieError::HeadersTooLarge(body.len()));
    }

    let mut next_sequence = 2u32;
    let mut granule = 0u64;
    let mut chapter_markers = Vec::with_capacity(sources.len());
    let mut warned_size = false;

    for (track_index, source) in sources.iter().enumerate() {
        if progress.is_cancelled() {
            return Err(TonieError::Cancelled);
        }
        progress.on_event(ProgressEvent::FileStart {
            track: track_index + 1,
            path: source.path.clone(),
        });

        chapter_markers.push(next_sequence);
        // Convention: the duplicated-zero behavior from the original
        // implementation (spec.md §9 open question). The first chapter
        // marker is always forced to 0 regardless of the running sequence.
        if track_index == 0 {
            *chapter_markers.last_mut().unwrap() = 0;
        }

        let pcm = decoder.decode(&source.path)?;
        let samples = crate::audio::i16_to_f32(&pcm);

        let mut offset = 0usize;
        let total_frames = samples.len() / SAMPLES_PER_FRAME_INTERLEAVED + 1;
        let mut frames_done = 0usize;
        while offset < samples.len() {
            if progress.is_cancelled() {
                return Err(TonieError::Cancelled);
            }
            let end = std::cmp::min(offset + SAMPLES_PER_FRAME_INTERLEAVED, samples.len());
            let frame = &samples[offset..end];
            offset = end;
            frames_done += 1;
            progress.on_event(ProgressEvent::Progress {
                fraction: frames_done as f32 / total_frames.max(1) as f32,
            });

            // Silence trimming at source boundaries: reproduce the observed
            // behavior of dropping frames that are entirely zero-valued.
            if frame.iter().all(|&s| s == 0.0) {
                continue;
            }

            let packet = encoder.encode_frame(frame)?;
            if packet.is_empty() {
                continue;
            }
            next_sequence = emit_packet(
                &mut body,
                &mut granule,
                audio_id,
                next_sequence,
                packet,
                SAMPLES_PER_FRAME_PER_CHANNEL as u64,
            )?;

            check_size_limits(&body, &mut warned_size, progress)?;
        }

        progress.on_event(ProgressEvent::FileDone);
    }

    for packet in encoder.drain()? {
        next_sequence = emit_packet(
            &mut body,
            &mut granule,
            audio_id,
            next_sequence,
            packet,
            SAMPLES_PER_FRAME_PER_CHANNEL as u64,
        )?;
        check_size_limits(&body, &mut warned_size, progress)?;
    }

    if let Some(last_page_offset) = crate::ogg_stream::pages(&body)?.last().map(|p| p.offset) {
        set_eos_in_place(&mut body, last_page_offset)?;
    }

    info!(
        "encoded {} source(s) into {} bytes across {} chapters",
        sources.len(),
        body.len(),
        chapter_markers.len()
    );

    Ok(EncodeOutput {
        body,
        chapter_markers,
    })
}

fn emit_packet(
    body: &mut Vec<u8>,
    granule: &mut u64,
    audio_id: u32,
    sequence: u32,
    packet: Vec<u8>,
    granule_advance: u64,
) -> Result<u32> {
    *granule += granule_advance;
    let offset = body.len() as u64;
    let mut page = OggPage::new(0, *granule, audio_id, sequence);
    page.segments.push(packet);

    let next_boundary = ((offset + page.size() as u64) / BLOCK_SIZE + 1) * BLOCK_SIZE;
    page.pad_to_end_at(offset, next_boundary)?;
    page.write(body, None)?;
    Ok(sequence + 1)
}

fn check_size_limits(
    body: &[u8],
    warned: &mut bool,
    progress: &mut dyn ProgressSink,
) -> Result<()> {
    let len = body.len() as u64;
    if len >= SIZE_LIMIT_BYTES {
        return Err(TonieError::SizeLimit);
    }
    if len >= SIZE_WARNING_BYTES && !*warned {
        *warned = true;
        warn!("body size {} bytes exceeds the 1 GiB soft warning threshold", len);
        progress.on_event(ProgressEvent::Warning {
            text: "body size exceeds 1 GiB".to_string(),
        });
    }
    Ok(())
}

/// Sets the EOS flag on the page at `offset`, recomputing and rewriting
/// its checksum in place. Same fix-up C6 performs on its own final
/// page.
fn set_eos_in_place(body: &mut [u8], offset: u64) -> Result<()> {
    let mut cursor = std::io::Cursor::new(&body[offset as usize..]);
    let mut page = OggPage::parse(&mut cursor)?;
    page.set_eos(true);
    let mut rewritten = Vec::with_capacity(page.size());
    page.write(&mut rewritten, None)?;
    body[offset as usize..offset as usize + rewritten.len()].copy_from_slice(&rewritten);
    Ok(())
}
