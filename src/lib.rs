//! `audio2tonie`, a codec for the Tonie audio-box file container format:
//! a 4 KiB protobuf-style header followed by a SHA-1-protected,
//! block-aligned Opus-in-Ogg body. See the module docs on [`tonie_file`]
//! for the facade most callers want.

pub mod assembler;
pub mod audio;
pub mod crc;
pub mod encoder;
pub mod error;
pub mod ffmpeg;
pub mod header;
pub mod ogg_page;
pub mod ogg_stream;
pub mod statistics;
pub mod tonie_file;
pub mod utils;

pub use error::{Result, TonieError};
pub use tonie_file::TonieFile;
