//! Error types for OxiBz operations.
//!
//! Every failure the codec can report is a variant of [`BzError`]. Format
//! errors (bad markers, undecodable Huffman data, CRC mismatches) are final
//! for the stream that raised them; the stream wrappers remember them and
//! refuse further work.

use std::io;
use thiserror::Error;

/// The main error type for OxiBz operations.
#[derive(Debug, Error)]
pub enum BzError {
    /// I/O error from underlying reader/writer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid magic number in the stream header.
    #[error("Invalid magic number: expected {expected:02x?}, found {found:02x?}")]
    InvalidMagic {
        /// Expected magic bytes.
        expected: Vec<u8>,
        /// Actual magic bytes found.
        found: Vec<u8>,
    },

    /// Invalid stream header (version byte or block size digit).
    #[error("Invalid header: {message}")]
    InvalidHeader {
        /// Description of the header error.
        message: String,
    },

    /// Block size multiplier outside 1-9.
    #[error("Invalid BZip2 block size {size}, valid range: 1-9")]
    InvalidBlockSize {
        /// The rejected multiplier.
        size: u32,
    },

    /// Something other than a block header or end-of-stream marker.
    #[error("BZip2 stream format error: unexpected marker {marker:#014x}")]
    InvalidBlockMarker {
        /// The 48-bit value that was read.
        marker: u64,
    },

    /// Huffman stage failure: selectors exhausted or no code matched.
    #[error("Error decoding BZip2 block: {message}")]
    HuffmanDecode {
        /// Description of the decode failure.
        message: String,
    },

    /// Block CRC mismatch, detected once the block has been fully read.
    #[error("BZip2 block CRC error: expected {expected:#010x}, computed {computed:#010x}")]
    BlockCrcMismatch {
        /// CRC stored in the block header.
        expected: u32,
        /// CRC of the decoded data.
        computed: u32,
    },

    /// Combined stream CRC mismatch, detected at the end-of-stream marker.
    #[error("BZip2 stream CRC error: expected {expected:#010x}, computed {computed:#010x}")]
    StreamCrcMismatch {
        /// CRC stored after the end-of-stream marker.
        expected: u32,
        /// CRC folded from the decoded blocks.
        computed: u32,
    },

    /// Structurally invalid block contents.
    #[error("Corrupted data: {message}")]
    CorruptedData {
        /// Description of the corruption.
        message: String,
    },

    /// Unexpected end of input.
    #[error("Unexpected end of file: expected {expected} more bytes")]
    UnexpectedEof {
        /// Number of bytes that were expected but not available.
        expected: usize,
    },

    /// Operation on a stream that has already been finished.
    #[error("Stream closed: write beyond end of stream")]
    StreamClosed,

    /// Operation on a stream that previously failed.
    #[error("Stream failed earlier: {message}")]
    StreamFailed {
        /// Message of the error that ended the stream.
        message: String,
    },
}

/// Result type alias for OxiBz operations.
pub type Result<T> = std::result::Result<T, BzError>;

impl BzError {
    /// Create an invalid magic error.
    pub fn invalid_magic(expected: impl Into<Vec<u8>>, found: impl Into<Vec<u8>>) -> Self {
        Self::InvalidMagic {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create an invalid header error.
    pub fn invalid_header(message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            message: message.into(),
        }
    }

    /// Create an invalid block size error.
    pub fn invalid_block_size(size: u32) -> Self {
        Self::InvalidBlockSize { size }
    }

    /// Create an invalid block marker error.
    pub fn invalid_marker(marker: u64) -> Self {
        Self::InvalidBlockMarker { marker }
    }

    /// Create a Huffman decode error.
    pub fn huffman(message: impl Into<String>) -> Self {
        Self::HuffmanDecode {
            message: message.into(),
        }
    }

    /// Create a block CRC mismatch error.
    pub fn block_crc(expected: u32, computed: u32) -> Self {
        Self::BlockCrcMismatch { expected, computed }
    }

    /// Create a stream CRC mismatch error.
    pub fn stream_crc(expected: u32, computed: u32) -> Self {
        Self::StreamCrcMismatch { expected, computed }
    }

    /// Create a corrupted data error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::CorruptedData {
            message: message.into(),
        }
    }

    /// Create an unexpected EOF error.
    pub fn unexpected_eof(expected: usize) -> Self {
        Self::UnexpectedEof { expected }
    }

    /// Wrap an earlier failure so it can be reported again.
    pub fn failed(first: &BzError) -> Self {
        Self::StreamFailed {
            message: first.to_string(),
        }
    }

    /// Whether this error came from the compressed data rather than the transport.
    pub fn is_format_error(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::StreamClosed)
    }
}

impl From<BzError> for io::Error {
    fn from(err: BzError) -> Self {
        match err {
            BzError::Io(e) => e,
            BzError::UnexpectedEof { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            BzError::StreamClosed => io::Error::new(io::ErrorKind::BrokenPipe, err),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
