//! C7 TonieFile facade. Orchestrates C1/C3/C4/C5/C6 behind the operations
//! `spec.md` §4.7 names: build from sources, build from a mix of sources
//! and raw chapters, read/parse, extract chapters (raw or as standalone
//! `.ogg`), and dump the whole Body back out.

use std::io::Write;
use std::path::Path;

use crate::assembler::{self, RawChapter};
use crate::audio::{AudioDecoder, AudioSource, OpusEncoder, ProgressSink};
use crate::encoder::{self, EncodeOutput};
use crate::error::{Result, TonieError};
use crate::ffmpeg::prefixed_track_path;
use crate::header::{self, TonieHeader, HEADER_SIZE};
use crate::ogg_stream;
use crate::statistics::{self, Statistics};

/// Body starts immediately after the fixed 4 KiB header region.
pub const BODY_START: u64 = HEADER_SIZE as u64;

/// One element of a `build_mixed` track list: either an already-encoded
/// chapter's raw Ogg bytes, or a source audio path still to be encoded.
pub enum TrackSource {
    Raw(RawChapter),
    Path(AudioSource),
}

/// A parsed, (possibly) validated Tonie file in memory.
pub struct TonieFile {
    pub header: TonieHeader,
    pub body: Vec<u8>,
    /// Set by [`TonieFile::read`]; integrity failures during read do not
    /// abort; they're reported here so callers can choose a repair path
    /// (`spec.md` §7).
    pub hash_correct: bool,
    pub statistics: Option<Statistics>,
}

impl TonieFile {
    /// `spec.md` §4.7: `build_from_sources`, uses C5 only.
    pub fn build_from_sources(
        sources: &[AudioSource],
        audio_id: u32,
        decoder: &mut dyn AudioDecoder,
        opus_encoder: &mut dyn OpusEncoder,
        progress: &mut dyn ProgressSink,
        now_unix: u64,
    ) -> Result<TonieFile> {
        let resolved_id = encoder::resolve_audio_id(audio_id, now_unix);
        let EncodeOutput {
            body,
            chapter_markers,
        } = encoder::encode(sources, resolved_id, decoder, opus_encoder, progress)?;

        let header = build_header(&body, resolved_id, chapter_markers)?;
        let statistics = statistics::check(&header, &body)?;
        Ok(TonieFile {
            header,
            body,
            hash_correct: true,
            statistics: Some(statistics),
        })
    }

    /// `spec.md` §4.7: `build_mixed`, raw pre-encoded chapters and source
    /// paths side by side; paths are encoded in isolation via C5 first
    /// (their own OpusHead/OpusTags stripped), then everything is handed
    /// to C6.
    pub fn build_mixed(
        tracks: Vec<TrackSource>,
        original_body: Option<&[u8]>,
        audio_id: u32,
        decoder: &mut dyn AudioDecoder,
        opus_encoder: &mut dyn OpusEncoder,
        progress: &mut dyn ProgressSink,
        now_unix: u64,
    ) -> Result<TonieFile> {
        let resolved_id = encoder::resolve_audio_id(audio_id, now_unix);
        let mut chapters = Vec::with_capacity(tracks.len());

        for track in tracks {
            match track {
                TrackSource::Raw(chapter) => chapters.push(chapter),
                TrackSource::Path(source) => {
                    let EncodeOutput { body, .. } = encoder::encode(
                        &[source],
                        resolved_id,
                        decoder,
                        opus_encoder,
                        progress,
                    )?;
                    chapters.push(RawChapter { bytes: body });
                }
            }
        }

        let (body, header) = assembler::assemble(&chapters, original_body, resolved_id)?;
        let statistics = statistics::check(&header, &body)?;
        Ok(TonieFile {
            header,
            body,
            hash_correct: true,
            statistics: Some(statistics),
        })
    }

    /// `spec.md` §4.7: `read`, parse header via C1, slice Body, run C4.
    /// Integrity failures set `hash_correct = false` rather than erroring,
    /// per `spec.md` §7.
    pub fn read(bytes: &[u8]) -> Result<TonieFile> {
        if bytes.len() < HEADER_SIZE {
            return Err(TonieError::CorruptHeader(
                "file shorter than the fixed header region".into(),
            ));
        }
        let header_bytes: [u8; HEADER_SIZE] = bytes[..HEADER_SIZE].try_into().unwrap();
        let header = header::parse(&header_bytes)?;
        let body = bytes[HEADER_SIZE..].to_vec();

        match statistics::check(&header, &body) {
            Ok(stats) => Ok(TonieFile {
                header,
                body,
                hash_correct: true,
                statistics: Some(stats),
            }),
            Err(TonieError::HashMismatch) => Ok(TonieFile {
                header,
                body,
                hash_correct: false,
                statistics: None,
            }),
            Err(other) => Err(other),
        }
    }

    /// `spec.md` §4.7: `extract_raw_chapters`, via C3's `chapter_offsets`.
    pub fn extract_raw_chapters(&self) -> Result<Vec<RawChapter>> {
        let markers = &self.header.audio_chapters;
        let mut offsets = ogg_stream::chapter_offsets(&self.body, markers)?;
        offsets.push(self.body.len() as u64);

        let mut chapters = Vec::with_capacity(markers.len());
        for window in offsets.windows(2) {
            let (start, end) = (window[0] as usize, window[1] as usize);
            chapters.push(RawChapter {
                bytes: self.body[start..end].to_vec(),
            });
        }
        Ok(chapters)
    }

    /// `spec.md` §4.7: `extract_chapter_to_ogg`. OpusHead+OpusTags from
    /// this file, then the chapter's pages with granule rebased to 0 and
    /// sequence renumbered from 2, EOS forced on the last page.
    pub fn extract_chapter_to_ogg<W: Write>(&self, index: usize, writer: &mut W) -> Result<()> {
        let chapters = self.extract_raw_chapters()?;
        let chapter = chapters
            .get(index)
            .ok_or_else(|| TonieError::ChapterNotFound(index as u32))?;

        let all_pages = ogg_stream::pages(&self.body)?;
        let headers = ogg_stream::headers(
            &all_pages
                .iter()
                .map(|entry| entry.page.clone())
                .collect::<Vec<_>>(),
        );
        for page in &headers {
            page.write(writer, None)?;
        }

        let pages = ogg_stream::pages(&chapter.bytes)?;
        let data_pages: Vec<_> = pages
            .into_iter()
            .filter(|entry| entry.page.sequence >= 2)
            .collect();
        let first_granule = data_pages
            .iter()
            .map(|entry| entry.page.granule)
            .filter(|&g| g != crate::ogg_page::NO_GRANULE)
            .min()
            .unwrap_or(0);

        let page_count = data_pages.len();
        for (i, entry) in data_pages.into_iter().enumerate() {
            let mut page = entry.page;
            page.sequence = 2 + i as u32;
            if page.granule != crate::ogg_page::NO_GRANULE {
                page.granule -= first_granule;
            }
            page.set_eos(i + 1 == page_count);
            page.write(writer, None)?;
        }
        Ok(())
    }

    /// `spec.md` §4.7: `dump_all_as_single_ogg`. Body is already a valid
    /// Ogg stream; concatenate it as-is.
    pub fn dump_all_as_single_ogg<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.body)?;
        Ok(())
    }

    /// Serializes this file's header and body back into one byte buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let header_bytes = header::serialize(&self.header)?;
        let mut out = Vec::with_capacity(HEADER_SIZE + self.body.len());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&self.body);
        Ok(out)
    }
}

fn build_header(body: &[u8], audio_id: u32, chapter_markers: Vec<u32>) -> Result<TonieHeader> {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(body);
    let hash = hasher.finalize().to_vec();
    Ok(TonieHeader::new(
        hash,
        body.len() as i32,
        audio_id,
        chapter_markers,
    ))
}

/// Resolves a `prefix_dir`-relative track path for source index
/// `track_number` (1-based), per `spec.md` §4.5. Used by CLI callers that
/// pass `prefix_dir` through to the Encoder.
pub fn resolve_prefixed_source(prefix_dir: &Path, track_number: usize) -> Result<AudioSource> {
    Ok(AudioSource::new(prefixed_track_path(
        prefix_dir,
        track_number,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NullProgressSink;
    use std::path::Path as StdPath;

    struct ToneDecoder;
    impl AudioDecoder for ToneDecoder {
        fn decode(&mut self, _path: &StdPath) -> Result<Vec<i16>> {
            Ok((0..crate::audio::FRAME_SIZE_SAMPLES * 2 * 4)
                .map(|i| ((i % 200) as i16) - 100)
                .collect())
        }
    }

    struct StubOpusEncoder {
        next_id: u32,
    }
    impl OpusEncoder for StubOpusEncoder {
        fn encode_frame(&mut self, samples: &[f32]) -> Result<Vec<u8>> {
            if samples.iter().all(|&s| s == 0.0) {
                return Ok(Vec::new());
            }
            self.next_id += 1;
            Ok(vec![0xAB; 10 + (self.next_id as usize % 5)])
        }
        fn drain(&mut self) -> Result<Vec<Vec<u8>>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn build_from_sources_then_read_round_trips_with_hash_correct() {
        let sources = vec![AudioSource::new("a.wav")];
        let mut decoder = ToneDecoder;
        let mut opus_encoder = StubOpusEncoder { next_id: 0 };
        let mut sink = NullProgressSink;
        let file = TonieFile::build_from_sources(
            &sources,
            0xCAFEBABE,
            &mut decoder,
            &mut opus_encoder,
            &mut sink,
            1_700_000_000,
        )
        .unwrap();

        let bytes = file.to_bytes().unwrap();
        let parsed = TonieFile::read(&bytes).unwrap();
        assert!(parsed.hash_correct);
        assert_eq!(parsed.header.audio_chapters, file.header.audio_chapters);
        assert_eq!(parsed.header.audio_id, 0xCAFEBABE);
    }

    #[test]
    fn read_detects_tampered_body_but_still_parses_positions() {
        let sources = vec![AudioSource::new("a.wav")];
        let mut decoder = ToneDecoder;
        let mut opus_encoder = StubOpusEncoder { next_id: 0 };
        let mut sink = NullProgressSink;
        let file = TonieFile::build_from_sources(
            &sources,
            7,
            &mut decoder,
            &mut opus_encoder,
            &mut sink,
            1_700_000_000,
        )
        .unwrap();

        let mut bytes = file.to_bytes().unwrap();
        let tamper_at = HEADER_SIZE + 0x10;
        bytes[tamper_at] ^= 0xFF;

        let parsed = TonieFile::read(&bytes).unwrap();
        assert!(!parsed.hash_correct);
        assert!(ogg_stream::parse_positions(&parsed.body, &parsed.header.audio_chapters).is_ok());
    }

    #[test]
    fn extract_raw_chapters_covers_the_whole_body_without_gaps() {
        let sources = vec![AudioSource::new("a.wav"), AudioSource::new("b.wav")];
        let mut decoder = ToneDecoder;
        let mut opus_encoder = StubOpusEncoder { next_id: 0 };
        let mut sink = NullProgressSink;
        let file = TonieFile::build_from_sources(
            &sources,
            7,
            &mut decoder,
            &mut opus_encoder,
            &mut sink,
            1_700_000_000,
        )
        .unwrap();

        let chapters = file.extract_raw_chapters().unwrap();
        assert_eq!(chapters.len(), 2);
        let total: usize = chapters.iter().map(|c| c.bytes.len()).sum();
        assert_eq!(total, file.body.len());
    }

    #[test]
    fn extract_chapter_to_ogg_produces_a_standalone_parseable_stream() {
        let sources = vec![AudioSource::new("a.wav")];
        let mut decoder = ToneDecoder;
        let mut opus_encoder = StubOpusEncoder { next_id: 0 };
        let mut sink = NullProgressSink;
        let file = TonieFile::build_from_sources(
            &sources,
            7,
            &mut decoder,
            &mut opus_encoder,
            &mut sink,
            1_700_000_000,
        )
        .unwrap();

        let mut out = Vec::new();
        file.extract_chapter_to_ogg(0, &mut out).unwrap();
        let pages = ogg_stream::pages(&out).unwrap();
        assert!(ogg_stream::is_opus_head(&pages[0].page));
        assert!(pages.last().unwrap().page.is_eos());
    }

    #[test]
    fn dump_all_as_single_ogg_matches_body_bytes() {
        let sources = vec![AudioSource::new("a.wav")];
        let mut decoder = ToneDecoder;
        let mut opus_encoder = StubOpusEncoder { next_id: 0 };
        let mut sink = NullProgressSink;
        let file = TonieFile::build_from_sources(
            &sources,
            7,
            &mut decoder,
            &mut opus_encoder,
            &mut sink,
            1_700_000_000,
        )
        .unwrap();

        let mut out = Vec::new();
        file.dump_all_as_single_ogg(&mut out).unwrap();
        assert_eq!(out, file.body);
    }
}
