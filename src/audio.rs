//! External collaborator ports. Source-audio decoding (MP3/FLAC/WAV/M4A/
//! AAC/WMA/OGG → 48 kHz stereo PCM) and Opus frame encoding are out of
//! scope for this codec (`spec.md` §1); only their interfaces surface
//! here. [`crate::ffmpeg`] provides one concrete implementation of both,
//! by shelling out the way the teacher does; callers may substitute their
//! own (an in-process decoder, a mock for tests, …).

use std::path::{Path, PathBuf};

use crate::error::Result;

pub const SAMPLE_RATE_HZ: u32 = 48_000;
pub const CHANNELS: u16 = 2;
/// 2880 samples/channel per Opus frame, per `spec.md` §4.5.
pub const FRAME_SIZE_SAMPLES: usize = 2880;

/// One source to be encoded into a chapter: a file path, decoded start to
/// finish by an [`AudioDecoder`].
#[derive(Debug, Clone)]
pub struct AudioSource {
    pub path: PathBuf,
}

impl AudioSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        AudioSource { path: path.into() }
    }
}

/// Decodes arbitrary source audio into interleaved 48 kHz stereo 16-bit PCM.
///
/// Implementations own whatever resampling is required to reach 48 kHz
/// stereo; the codec never looks at the source sample rate or channel
/// count itself.
pub trait AudioDecoder {
    /// Decodes `path` fully into memory as interleaved i16 stereo samples
    /// at 48 kHz. Errors surface as [`crate::error::TonieError::AudioDecodeFailure`].
    fn decode(&mut self, path: &Path) -> Result<Vec<i16>>;
}

/// Encodes 48 kHz stereo PCM into Opus packets at a fixed bitrate.
///
/// CBR is required for the determinism property in `spec.md` §5: the same
/// PCM input must always produce byte-identical packets.
pub trait OpusEncoder {
    /// Encodes exactly one frame of `FRAME_SIZE_SAMPLES` samples per
    /// channel (interleaved, so `samples.len() == FRAME_SIZE_SAMPLES * 2`)
    /// into one Opus packet.
    fn encode_frame(&mut self, samples: &[f32]) -> Result<Vec<u8>>;

    /// Flushes any samples buffered internally (e.g. to round out a final
    /// partial frame) into zero or more trailing Opus packets.
    fn drain(&mut self) -> Result<Vec<Vec<u8>>>;
}

/// Converts interleaved i16 PCM into the `[-1.0, 1.0]` f32 range expected
/// by [`OpusEncoder::encode_frame`].
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// A 20 ms-granularity progress event surfaced to callers during encoding,
/// per `spec.md` §6.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    FileStart { track: usize, path: PathBuf },
    Progress { fraction: f32 },
    FileDone,
    PostProcess { stage_name: String },
    Warning { text: String },
    Failed { text: String },
}

/// Receives [`ProgressEvent`]s and may request cancellation. Called from
/// the same thread the encode runs on, between Opus frames. There is no
/// internal concurrency in this library (`spec.md` §5).
pub trait ProgressSink {
    fn on_event(&mut self, event: ProgressEvent);

    /// Polled between frames; returning `true` aborts the operation with
    /// [`crate::error::TonieError::Cancelled`] and leaves no temporary
    /// artefacts beyond whatever the caller itself allocated.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A [`ProgressSink`] that discards every event and never cancels.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn on_event(&mut self, _event: ProgressEvent) {}
}
