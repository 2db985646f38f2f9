//! BZip2 compression/decompression for OxiBz.
//!
//! This crate provides a pure Rust implementation of the BZip2 format,
//! compatible with the reference `bzip2` tool in both directions.
//!
//! A block passes through these stages:
//! 1. Run-length encoding of runs of 4 to 255 equal bytes
//! 2. Burrows-Wheeler Transform, via a suffix array
//! 3. Move-to-Front transform with zero-run coding (RUNA/RUNB)
//! 4. Huffman coding with 2-6 tables, selected per 50-symbol group
//!
//! Each block carries a CRC of its uncompressed bytes; the stream trailer
//! carries a CRC folded from all block CRCs.
//!
//! # Example
//!
//! ```
//! use oxibz_bzip2::{CompressionLevel, compress, decompress};
//!
//! let data = b"hello, hello, hello world";
//! let compressed = compress(data, CompressionLevel::new(1)).unwrap();
//! let restored = decompress(&compressed[..]).unwrap();
//! assert_eq!(restored, data);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod allocator;
pub mod bwt;
pub mod compressor;
pub mod decompressor;
pub mod divsufsort;
pub mod huffman;
pub mod mtf;
pub mod rle;

mod decode;
mod encode;

pub use decode::{BzDecoder, DecoderOptions, decompress};
pub use encode::{BzEncoder, EncoderOptions, compress};

/// BZip2 magic bytes ("BZ").
pub const BZIP2_MAGIC: [u8; 2] = [0x42, 0x5A];

/// Version marker following the magic ('h', Huffman coded).
pub const VERSION_MARKER: u8 = b'h';

/// First 24 bits of the block header magic (0x314159265359).
pub const BLOCK_MAGIC_1: u32 = 0x31_41_59;

/// Last 24 bits of the block header magic.
pub const BLOCK_MAGIC_2: u32 = 0x26_53_59;

/// First 24 bits of the end of stream magic (0x177245385090).
pub const EOS_MAGIC_1: u32 = 0x17_72_45;

/// Last 24 bits of the end of stream magic.
pub const EOS_MAGIC_2: u32 = 0x38_50_90;

/// Maximum block size (900k).
pub const MAX_BLOCK_SIZE: usize = 900_000;

/// Longest run a single RLE1 record can hold.
pub const RLE_MAX_RUN: usize = 255;

/// Symbols coded with the same Huffman table.
pub const HUFFMAN_GROUP_SIZE: usize = 50;

/// 256 MTF ranks, RUNA/RUNB in place of rank 0, plus end of block.
pub const HUFFMAN_MAX_ALPHABET_SIZE: usize = 258;

/// Longest code length the encoder produces.
pub const HUFFMAN_ENCODE_MAX_CODE_LENGTH: u32 = 20;

/// Longest code length the decoder accepts.
pub const HUFFMAN_DECODE_MAX_CODE_LENGTH: u32 = 23;

/// Fewest Huffman tables in a block.
pub const HUFFMAN_MIN_TABLES: usize = 2;

/// Most Huffman tables in a block.
pub const HUFFMAN_MAX_TABLES: usize = 6;

/// Most selectors a block can declare.
pub const HUFFMAN_MAX_SELECTORS: usize = 18_002;

/// Zero-run digit with weight 1 at its position.
pub const HUFFMAN_SYMBOL_RUNA: u16 = 0;

/// Zero-run digit with weight 2 at its position.
pub const HUFFMAN_SYMBOL_RUNB: u16 = 1;

/// Compression level (1-9, where 9 = 900k block size).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    /// Create a new compression level (clamped to 1-9).
    pub fn new(level: u8) -> Self {
        Self(level.clamp(1, 9))
    }

    /// Get the block size for this level.
    pub fn block_size(&self) -> usize {
        self.0 as usize * 100_000
    }

    /// Get the level value.
    pub fn level(&self) -> u8 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(9)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_level() {
        let level = CompressionLevel::new(5);
        assert_eq!(level.level(), 5);
        assert_eq!(level.block_size(), 500_000);
    }

    #[test]
    fn test_compression_level_clamp() {
        assert_eq!(CompressionLevel::new(0).level(), 1);
        assert_eq!(CompressionLevel::new(10).level(), 9);
    }

    #[test]
    fn test_default_level() {
        let level = CompressionLevel::default();
        assert_eq!(level.level(), 9);
        assert_eq!(level.block_size(), MAX_BLOCK_SIZE);
    }

    #[test]
    fn test_roundtrip_single_byte() {
        let original = b"a";
        let compressed = compress(original, CompressionLevel::new(1)).unwrap();
        let decompressed = decompress(&compressed[..]).unwrap();
        assert_eq!(decompressed, original.as_slice());
    }

    #[test]
    fn test_roundtrip_repeated() {
        let original = b"aaaaaaaaaabbbbbbbbbbcccccccccc";
        let compressed = compress(original, CompressionLevel::new(1)).unwrap();
        let decompressed = decompress(&compressed[..]).unwrap();
        assert_eq!(decompressed, original.as_slice());
    }

    #[test]
    fn test_roundtrip_empty() {
        let original = b"";
        let compressed = compress(original, CompressionLevel::new(1)).unwrap();
        let decompressed = decompress(&compressed[..]).unwrap();
        assert_eq!(decompressed, original.as_slice());
    }

    #[test]
    fn test_magic_constants() {
        let block = ((BLOCK_MAGIC_1 as u64) << 24) | BLOCK_MAGIC_2 as u64;
        let eos = ((EOS_MAGIC_1 as u64) << 24) | EOS_MAGIC_2 as u64;
        assert_eq!(block, 0x3141_5926_5359);
        assert_eq!(eos, 0x1772_4538_5090);
    }
}
