//! # OxiBz Core
//!
//! Core components shared by the OxiBz crates.
//!
//! This crate provides the building blocks the BZip2 codec is layered on:
//!
//! - [`bitstream`]: MSB-first bit I/O for markers, tables and Huffman codes
//! - [`crc`]: The BZip2 flavour of CRC-32 and the stream CRC fold
//! - [`error`]: Error types
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ CLI                                                     │
//! │     oxibz compress / decompress / test / info           │
//! ├─────────────────────────────────────────────────────────┤
//! │ Stream                                                  │
//! │     BzEncoder / BzDecoder, header and trailer, CRC fold │
//! ├─────────────────────────────────────────────────────────┤
//! │ Block                                                   │
//! │     RLE1, BWT (divsufsort), MTF/RLE2, Huffman stage     │
//! ├─────────────────────────────────────────────────────────┤
//! │ BitStream (this crate)                                  │
//! │     BitReader/BitWriter, Bzip2Crc                       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use oxibz_core::bitstream::{BitReader, BitWriter};
//! use oxibz_core::crc::Bzip2Crc;
//! use std::io::Cursor;
//!
//! // Write a block header marker
//! let mut writer = BitWriter::new(Vec::new());
//! writer.write_bits(0x314159, 24).unwrap();
//! writer.write_bits(0x265359, 24).unwrap();
//! let bytes = writer.into_inner().unwrap();
//!
//! let mut reader = BitReader::new(Cursor::new(bytes));
//! assert_eq!(reader.read_bits(24).unwrap(), 0x314159);
//!
//! // Compute a block CRC
//! assert_eq!(Bzip2Crc::compute(b"abc"), 0x648C_BB73);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod bitstream;
pub mod crc;
pub mod error;

// Re-exports for convenience
pub use bitstream::{BitReader, BitWriter};
pub use crc::{Bzip2Crc, combine_stream_crc};
pub use error::{BzError, Result};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::bitstream::{BitReader, BitWriter};
    pub use crate::crc::{Bzip2Crc, combine_stream_crc};
    pub use crate::error::{BzError, Result};
}
