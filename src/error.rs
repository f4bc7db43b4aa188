use std::path::PathBuf;

use thiserror::Error;

/// Error taxonomy for the Tonie file codec.
///
/// Collaborator errors (from an `AudioDecoder`/`OpusEncoder` implementation)
/// are propagated verbatim and never swallowed; everything else aborts the
/// current operation. `read()` is the one exception that does not use this
/// type for integrity failures; see [`crate::tonie_file::TonieFile::hash_correct`].
#[derive(Debug, Error)]
pub enum TonieError {
    #[error("source file not found: {0}")]
    SourceMissing(PathBuf),

    #[error("unsupported source audio format: {0}")]
    SourceUnsupportedFormat(PathBuf),

    #[error("expected prefixed track file missing: {0}")]
    PrefixMissing(PathBuf),

    #[error("failed to decode source audio {path}: {reason}")]
    AudioDecodeFailure { path: PathBuf, reason: String },

    #[error("corrupt header: {0}")]
    CorruptHeader(String),

    #[error("chapter sequence number {0} not found in body")]
    ChapterNotFound(u32),

    #[error("combined OpusHead+OpusTags header pages exceed 0x200 bytes ({0} bytes)")]
    HeadersTooLarge(usize),

    #[error("opus padding failure on page {page_no}: {reason}")]
    OpusPaddingFailure { page_no: u32, reason: String },

    #[error("body size exceeds the 2 GiB hard limit (0x77359400 bytes)")]
    SizeLimit,

    #[error("operation cancelled")]
    Cancelled,

    #[error("SHA-1 mismatch: body hash does not match header hash")]
    HashMismatch,

    #[error("page at body offset {offset:#x} does not end on a 4 KiB boundary")]
    BlockAlignmentViolation { offset: u64 },

    #[error("granule position regressed from {previous} to {current} at page {page_no}")]
    GranuleRegression {
        page_no: u32,
        previous: u64,
        current: u64,
    },

    #[error("failed to serialize header: fields without padding exceed 4092 bytes ({0} bytes)")]
    HeaderSerializationFailure(usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TonieError>;
