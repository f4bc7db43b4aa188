//! Concrete `AudioDecoder`/`OpusEncoder` adapters that shell out to
//! `ffmpeg`/`opusenc`, the same way the teacher's `converter.rs`/
//! `convert.rs` do. Not part of the codec's contract (`spec.md` treats
//! both as external collaborators reached only through traits). This is
//! just the one implementation the CLI wires up by default.

use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tempfile::SpooledTempFile;

use crate::audio::{AudioDecoder, OpusEncoder};
use crate::error::{Result, TonieError};

/// Decodes source audio to 48 kHz stereo PCM by piping it through ffmpeg.
pub struct FfmpegAudioDecoder {
    ffmpeg_binary: String,
}

impl FfmpegAudioDecoder {
    pub fn new(ffmpeg_binary: impl Into<String>) -> Self {
        FfmpegAudioDecoder {
            ffmpeg_binary: ffmpeg_binary.into(),
        }
    }
}

impl AudioDecoder for FfmpegAudioDecoder {
    fn decode(&mut self, path: &Path) -> Result<Vec<i16>> {
        if !path.exists() {
            return Err(TonieError::SourceMissing(path.to_path_buf()));
        }

        let process = Command::new(&self.ffmpeg_binary)
            .args([
                "-hide_banner",
                "-loglevel",
                "warning",
                "-i",
            ])
            .arg(path)
            .args(["-f", "s16le", "-ar", "48000", "-ac", "2", "-"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TonieError::AudioDecodeFailure {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let output = process
            .wait_with_output()
            .map_err(|e| TonieError::AudioDecodeFailure {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(TonieError::AudioDecodeFailure {
                path: path.to_path_buf(),
                reason: format!("ffmpeg exited with {}", output.status),
            });
        }

        Ok(output
            .stdout
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect())
    }
}

/// Encodes raw PCM frames into Opus packets by round-tripping them through
/// `opusenc` as a spooled WAV file, then re-parsing the Ogg Opus data pages
/// it produces. `opusenc` itself only ever sees one call's worth of PCM;
/// this adapter buffers frames and defers the actual subprocess call to
/// [`OpusEncoder::drain`], since `opusenc` has no per-frame streaming mode.
pub struct OpusencEncoder {
    opusenc_binary: String,
    bitrate_bps: u32,
    cbr: bool,
    pending_samples: Vec<f32>,
}

impl OpusencEncoder {
    pub fn new(opusenc_binary: impl Into<String>, bitrate_bps: u32, cbr: bool) -> Self {
        OpusencEncoder {
            opusenc_binary: opusenc_binary.into(),
            bitrate_bps,
            cbr,
            pending_samples: Vec::new(),
        }
    }

    fn write_wav_header(out: &mut Vec<u8>, sample_count: usize) {
        let data_len = (sample_count * 2) as u32; // 16-bit mono-equivalent sample count already interleaved
        let byte_rate = crate::audio::SAMPLE_RATE_HZ * crate::audio::CHANNELS as u32 * 2;
        let block_align = crate::audio::CHANNELS * 2;

        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&crate::audio::CHANNELS.to_le_bytes());
        out.extend_from_slice(&crate::audio::SAMPLE_RATE_HZ.to_le_bytes());
        out.extend_from_slice(&byte_rate.to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
    }

    fn run_opusenc(&self, pcm: &[f32]) -> Result<Vec<u8>> {
        let mut wav = Vec::new();
        Self::write_wav_header(&mut wav, pcm.len());
        for &sample in pcm {
            let clamped = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            wav.extend_from_slice(&clamped.to_le_bytes());
        }

        let vbr_flag = if self.cbr { "--hard-cbr" } else { "--vbr" };
        let mut process = Command::new(&self.opusenc_binary)
            .args([
                "--quiet",
                vbr_flag,
                "--bitrate",
                &(self.bitrate_bps / 1000).to_string(),
                "-",
                "-",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        process
            .stdin
            .take()
            .expect("stdin was piped")
            .write_all(&wav)?;

        let mut tmp = SpooledTempFile::new(50 * 1024 * 1024);
        let output = process.wait_with_output()?;
        if !output.status.success() {
            return Err(TonieError::OpusPaddingFailure {
                page_no: 0,
                reason: format!("opusenc exited with {}", output.status),
            });
        }
        tmp.write_all(&output.stdout)?;

        let mut ogg_bytes = Vec::new();
        tmp.seek(std::io::SeekFrom::Start(0))?;
        tmp.read_to_end(&mut ogg_bytes)?;
        Ok(ogg_bytes)
    }
}

impl OpusEncoder for OpusencEncoder {
    fn encode_frame(&mut self, samples: &[f32]) -> Result<Vec<u8>> {
        // opusenc has no per-frame API; buffer and let drain() do the real
        // subprocess call. This method never itself returns a usable
        // packet, matching the "buffer, flush at drain" contract.
        self.pending_samples.extend_from_slice(samples);
        Ok(Vec::new())
    }

    fn drain(&mut self) -> Result<Vec<Vec<u8>>> {
        if self.pending_samples.is_empty() {
            return Ok(Vec::new());
        }
        let pcm = std::mem::take(&mut self.pending_samples);
        let ogg_bytes = self.run_opusenc(&pcm)?;
        let pages = crate::ogg_stream::pages(&ogg_bytes)?;
        Ok(pages
            .into_iter()
            .skip_while(|entry| {
                crate::ogg_stream::is_opus_head(&entry.page)
                    || crate::ogg_stream::is_opus_tags(&entry.page)
            })
            .flat_map(|entry| entry.page.segments)
            .collect())
    }
}

/// Resolves `prefix_dir/<NNNN>.mp3` for a 1-based track number, per
/// `spec.md` §4.5.
pub fn prefixed_track_path(prefix_dir: &Path, track_number: usize) -> Result<PathBuf> {
    let candidate = prefix_dir.join(format!("{:04}.mp3", track_number));
    if candidate.exists() {
        Ok(candidate)
    } else {
        Err(TonieError::PrefixMissing(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_track_path_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = prefixed_track_path(dir.path(), 1).unwrap_err();
        assert!(matches!(err, TonieError::PrefixMissing(_)));
    }
}
