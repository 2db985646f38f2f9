//! Block compressor.
//!
//! Bytes are absorbed through the first run-length stage into a fixed block
//! buffer. Closing the block runs the BWT, MTF/RLE2 and Huffman stages and
//! writes the complete block to a [`BitWriter`].

use crate::divsufsort::{DivSufSort, workspace_len};
use crate::huffman::HuffmanStageEncoder;
use crate::mtf::encode_block;
use crate::{BLOCK_MAGIC_1, BLOCK_MAGIC_2, RLE_MAX_RUN};
use log::{debug, trace};
use oxibz_core::bitstream::BitWriter;
use oxibz_core::crc::Bzip2Crc;
use oxibz_core::error::Result;
use std::io::Write;

/// Bytes a write may commit beyond the acceptance limit: one 5-byte run
/// record plus the byte starting the next run.
const RLE_RESERVE: usize = 6;

/// Compresses one block at a time.
///
/// The block buffer and suffix array are sized once for the block size and
/// reused by [`reset`](Self::reset).
#[derive(Debug)]
pub struct BlockCompressor {
    /// RLE1 output plus one byte for the BWT wrap.
    block: Vec<u8>,
    block_length: usize,
    block_length_limit: usize,
    /// Suffix array and BWT output.
    bwt_block: Vec<i32>,
    crc: Bzip2Crc,
    /// Byte values present in `block`.
    present: [bool; 256],
    /// Pending run, not yet in `block`.
    rle_value: u8,
    rle_length: usize,
}

impl BlockCompressor {
    /// Create a compressor for blocks of up to `block_size` bytes.
    pub fn new(block_size: usize) -> Self {
        debug_assert!(block_size > RLE_RESERVE, "block size too small");
        Self {
            block: vec![0; block_size + 1],
            block_length: 0,
            block_length_limit: block_size - RLE_RESERVE,
            bwt_block: vec![0; workspace_len(block_size)],
            crc: Bzip2Crc::new(),
            present: [false; 256],
            rle_value: 0,
            rle_length: 0,
        }
    }

    /// Prepare for a new block, keeping the allocated buffers.
    pub fn reset(&mut self) {
        self.block_length = 0;
        self.crc.reset();
        self.present = [false; 256];
        self.rle_value = 0;
        self.rle_length = 0;
    }

    /// Append a run of `value` to the block, as 1-3 literals or a 4-byte
    /// prefix followed by the extra count.
    fn write_run(&mut self, value: u8, run_length: usize) {
        let start = self.block_length;

        self.present[value as usize] = true;
        self.crc.update_repeat(value, run_length);

        match run_length {
            1..=3 => {
                self.block[start..start + run_length].fill(value);
                self.block_length += run_length;
            }
            _ => {
                let extra = (run_length - 4) as u8;
                self.present[extra as usize] = true;
                self.block[start..start + 4].fill(value);
                self.block[start + 4] = extra;
                self.block_length += 5;
            }
        }
    }

    /// Offer one byte. Returns `false`, without changing any state, when
    /// the block is full.
    pub fn write(&mut self, value: u8) -> bool {
        if self.block_length > self.block_length_limit {
            return false;
        }

        if self.rle_length == 0 {
            self.rle_value = value;
            self.rle_length = 1;
        } else if self.rle_value != value {
            self.write_run(self.rle_value, self.rle_length);
            self.rle_value = value;
            self.rle_length = 1;
        } else if self.rle_length == RLE_MAX_RUN - 1 {
            self.write_run(value, RLE_MAX_RUN);
            self.rle_length = 0;
        } else {
            self.rle_length += 1;
        }

        true
    }

    /// Offer a slice; returns how many bytes were accepted.
    pub fn write_slice(&mut self, data: &[u8]) -> usize {
        data.iter().take_while(|&&b| self.write(b)).count()
    }

    /// True if nothing has been written since the last reset.
    pub fn is_empty(&self) -> bool {
        self.block_length == 0 && self.rle_length == 0
    }

    /// CRC of the bytes written so far, pending run included once closed.
    pub fn crc(&self) -> u32 {
        self.crc.value()
    }

    fn write_symbol_map<W: Write>(&self, writer: &mut BitWriter<W>) -> Result<()> {
        let mut condensed = [false; 16];
        for (i, range) in self.present.chunks(16).enumerate() {
            condensed[i] = range.iter().any(|&p| p);
        }

        for &in_use in &condensed {
            writer.write_bool(in_use)?;
        }

        for (range, _) in self.present.chunks(16).zip(condensed).filter(|(_, c)| *c) {
            for &p in range {
                writer.write_bool(p)?;
            }
        }

        Ok(())
    }

    /// Finish the block and write it out. Returns the block CRC.
    pub fn close<W: Write>(&mut self, writer: &mut BitWriter<W>) -> Result<u32> {
        if self.rle_length > 0 {
            self.write_run(self.rle_value, self.rle_length);
            self.rle_length = 0;
        }

        let length = self.block_length;
        self.block[length] = self.block[0];

        let origin = DivSufSort::new(&self.block, &mut self.bwt_block, length).bwt();
        trace!("BWT of {} bytes, origin {}", length, origin);

        let crc = self.crc.value();
        writer.write_bits(BLOCK_MAGIC_1, 24)?;
        writer.write_bits(BLOCK_MAGIC_2, 24)?;
        writer.write_u32(crc)?;
        // Randomised blocks are never produced
        writer.write_bool(false)?;
        writer.write_bits(origin, 24)?;

        self.write_symbol_map(writer)?;

        let mtf = encode_block(
            self.bwt_block[..length].iter().map(|&v| v as u8),
            &self.present,
        );
        let huffman = HuffmanStageEncoder::new(&mtf);
        let tables = huffman.table_count();
        huffman.encode(writer)?;

        debug!(
            "Closed block: {} RLE bytes, {} MTF symbols, {} tables, CRC {:#010x}",
            length,
            mtf.symbols.len(),
            tables,
            crc
        );

        Ok(crc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(compressor: &mut BlockCompressor, data: &[u8]) -> usize {
        compressor.write_slice(data)
    }

    #[test]
    fn test_empty() {
        let mut compressor = BlockCompressor::new(100_000);
        assert!(compressor.is_empty());
        assert!(compressor.write(b'x'));
        assert!(!compressor.is_empty());
        compressor.reset();
        assert!(compressor.is_empty());
    }

    #[test]
    fn test_short_runs_literal() {
        let mut compressor = BlockCompressor::new(100_000);
        fill(&mut compressor, b"aabbbc");
        compressor.write_run(compressor.rle_value, compressor.rle_length);
        assert_eq!(&compressor.block[..compressor.block_length], b"aabbbc");
    }

    #[test]
    fn test_run_of_four_gets_count() {
        let mut compressor = BlockCompressor::new(100_000);
        fill(&mut compressor, b"aaaab");
        assert_eq!(&compressor.block[..compressor.block_length], &[b'a', b'a', b'a', b'a', 0]);
        assert!(compressor.present[0]);
    }

    #[test]
    fn test_run_split_at_255() {
        let mut compressor = BlockCompressor::new(100_000);
        fill(&mut compressor, &[b'z'; 256]);
        // 255 bytes flushed as one record, one byte still pending
        assert_eq!(
            &compressor.block[..compressor.block_length],
            &[b'z', b'z', b'z', b'z', 251]
        );
        assert_eq!(compressor.rle_length, 1);
    }

    #[test]
    fn test_crc_tracks_runs() {
        let mut data = b"hello".to_vec();
        data.extend(std::iter::repeat_n(b'!', 600));
        data.extend_from_slice(b"world");

        let mut compressor = BlockCompressor::new(100_000);
        assert_eq!(fill(&mut compressor, &data), data.len());

        let mut sink = BitWriter::new(Vec::new());
        let crc = compressor.close(&mut sink).unwrap();
        assert_eq!(crc, Bzip2Crc::compute(&data));
    }

    #[test]
    fn test_rejects_when_full() {
        let mut compressor = BlockCompressor::new(100_000);
        // Distinct neighbours defeat the run-length stage
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let accepted = fill(&mut compressor, &data);

        assert!(accepted < data.len());
        assert!(accepted >= 100_000 - RLE_RESERVE);
        assert!(!compressor.write(data[accepted]));

        // Rejection leaves the block closable within its buffer
        let mut sink = BitWriter::new(Vec::new());
        let crc = compressor.close(&mut sink).unwrap();
        assert!(compressor.block_length <= 100_000);
        assert_eq!(crc, Bzip2Crc::compute(&data[..accepted]));
    }

    #[test]
    fn test_close_writes_block_header() {
        let mut compressor = BlockCompressor::new(100_000);
        fill(&mut compressor, b"abc");

        let mut sink = BitWriter::new(Vec::new());
        let crc = compressor.close(&mut sink).unwrap();
        let bytes = sink.into_inner().unwrap();

        assert_eq!(crc, 0x648C_BB73);
        assert_eq!(&bytes[..6], &[0x31, 0x41, 0x59, 0x26, 0x53, 0x59]);
        assert_eq!(&bytes[6..10], &crc.to_be_bytes());
    }
}
