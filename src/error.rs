//! Error types for KAO archive handling.

use thiserror::Error;

/// Errors that can occur while reading, editing or writing a KAO archive.
#[derive(Debug, Error)]
pub enum KaoError {
    /// Index or sub-index outside the table.
    #[error("portrait ({index}, {subindex}) out of range: {len} indices with {sub_entries} slots each")]
    OutOfRange {
        index: usize,
        subindex: usize,
        len: usize,
        sub_entries: usize,
    },

    /// The archive's pointer table does not fit the file.
    #[error("malformed KAO archive: {0}")]
    MalformedArchive(String),

    /// The bytes at a populated slot are not a valid portrait.
    #[error("corrupt portrait payload: {0}")]
    CorruptPayload(String),

    /// Bitmap does not have the fixed portrait dimensions.
    #[error("portrait must be {expected}x{expected}, got {width}x{height}")]
    InvalidDimensions {
        width: u32,
        height: u32,
        expected: u32,
    },

    /// Bitmap uses more colours than a portrait palette holds.
    #[error("portrait uses {0} colours, at most 16 are supported")]
    TooManyColours(usize),

    /// The codec failed to produce a payload.
    #[error("compression failed: {0}")]
    Compression(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for KAO operations.
pub type Result<T> = std::result::Result<T, KaoError>;
