//! Block decompressor.
//!
//! Construction consumes one complete block from the bit stream (everything
//! after the block magic) and decodes it down to the BWT output. Bytes are
//! then pulled through the inverse BWT and the inverse first-stage RLE by
//! [`read`](BlockDecompressor::read). The block CRC can only be checked once
//! the block has been read to the end.

use crate::bwt::InverseBwt;
use crate::huffman::HuffmanStageDecoder;
use crate::mtf::MoveToFront;
use crate::rle::RunLengthDecoder;
use crate::{
    HUFFMAN_DECODE_MAX_CODE_LENGTH, HUFFMAN_MAX_SELECTORS, HUFFMAN_MAX_TABLES, HUFFMAN_MIN_TABLES,
    HUFFMAN_SYMBOL_RUNA, HUFFMAN_SYMBOL_RUNB,
};
use log::{debug, warn};
use oxibz_core::bitstream::BitReader;
use oxibz_core::error::{BzError, Result};
use std::io::Read;

/// Pseudo-random run lengths used by the legacy randomised block format.
const RNUMS: [u16; 512] = [
    619, 720, 127, 481, 931, 816, 813, 233, 566, 247, 985, 724, 205, 454, 863, 491,
    741, 242, 949, 214, 733, 859, 335, 708, 621, 574, 73, 654, 730, 472, 419, 436,
    278, 496, 867, 210, 399, 680, 480, 51, 878, 465, 811, 169, 869, 675, 611, 697,
    867, 561, 862, 687, 507, 283, 482, 129, 807, 591, 733, 623, 150, 238, 59, 379,
    684, 877, 625, 169, 643, 105, 170, 607, 520, 932, 727, 476, 693, 425, 174, 647,
    73, 122, 335, 530, 442, 853, 695, 249, 445, 515, 909, 545, 703, 919, 874, 474,
    882, 500, 594, 612, 641, 801, 220, 162, 819, 984, 589, 513, 495, 799, 161, 604,
    958, 533, 221, 400, 386, 867, 600, 782, 382, 596, 414, 171, 516, 375, 682, 485,
    911, 276, 98, 553, 163, 354, 666, 933, 424, 341, 533, 870, 227, 730, 475, 186,
    263, 647, 537, 686, 600, 224, 469, 68, 770, 919, 190, 373, 294, 822, 808, 206,
    184, 943, 795, 384, 383, 461, 404, 758, 839, 887, 715, 67, 618, 276, 204, 918,
    873, 777, 604, 560, 951, 160, 578, 722, 79, 804, 96, 409, 713, 940, 652, 934,
    970, 447, 318, 353, 859, 672, 112, 785, 645, 863, 803, 350, 139, 93, 354, 99,
    820, 908, 609, 772, 154, 274, 580, 184, 79, 626, 630, 742, 653, 282, 762, 623,
    680, 81, 927, 626, 789, 125, 411, 521, 938, 300, 821, 78, 343, 175, 128, 250,
    170, 774, 972, 275, 999, 639, 495, 78, 352, 126, 857, 956, 358, 619, 580, 124,
    737, 594, 701, 612, 669, 112, 134, 694, 363, 992, 809, 743, 168, 974, 944, 375,
    748, 52, 600, 747, 642, 182, 862, 81, 344, 805, 988, 739, 511, 655, 814, 334,
    249, 515, 897, 955, 664, 981, 649, 113, 974, 459, 893, 228, 433, 837, 553, 268,
    926, 240, 102, 654, 459, 51, 686, 754, 806, 760, 493, 403, 415, 394, 687, 700,
    946, 670, 656, 610, 738, 392, 760, 799, 887, 653, 978, 321, 576, 617, 626, 502,
    894, 679, 243, 440, 680, 879, 194, 572, 640, 724, 926, 56, 204, 700, 707, 151,
    457, 449, 797, 195, 791, 558, 945, 679, 297, 59, 87, 824, 713, 663, 412, 693,
    342, 606, 134, 108, 571, 364, 631, 212, 174, 643, 304, 329, 343, 97, 430, 751,
    497, 314, 983, 374, 822, 928, 140, 206, 73, 263, 980, 736, 876, 478, 430, 305,
    170, 514, 364, 692, 829, 82, 855, 953, 676, 246, 369, 970, 294, 750, 807, 827,
    150, 790, 288, 923, 804, 378, 215, 828, 592, 281, 565, 555, 710, 82, 896, 831,
    547, 261, 524, 462, 293, 465, 502, 56, 661, 821, 976, 991, 658, 869, 905, 758,
    745, 193, 768, 550, 608, 933, 378, 286, 215, 979, 792, 961, 61, 688, 793, 644,
    986, 403, 106, 366, 905, 644, 372, 567, 466, 434, 645, 210, 389, 550, 919, 135,
    780, 773, 635, 389, 707, 100, 626, 958, 165, 504, 920, 176, 193, 713, 857, 265,
    203, 50, 668, 108, 645, 990, 626, 197, 510, 357, 358, 850, 858, 364, 936, 638,
];

/// Undoes the bit flips of a randomised block.
#[derive(Debug, Clone)]
struct Randomiser {
    index: usize,
    count: u32,
}

impl Randomiser {
    fn new() -> Self {
        Self {
            index: 0,
            count: RNUMS[0] as u32 - 1,
        }
    }

    #[inline]
    fn apply(&mut self, byte: u8) -> u8 {
        self.count -= 1;
        if self.count == 0 {
            self.index = (self.index + 1) % RNUMS.len();
            self.count = RNUMS[self.index] as u32;
            byte ^ 1
        } else {
            byte
        }
    }
}

/// BWT output in original order, derandomised when needed.
#[derive(Debug)]
struct BlockBytes {
    bwt: InverseBwt,
    randomiser: Option<Randomiser>,
}

impl Iterator for BlockBytes {
    type Item = u8;

    #[inline]
    fn next(&mut self) -> Option<u8> {
        let byte = self.bwt.next()?;
        Some(match &mut self.randomiser {
            Some(randomiser) => randomiser.apply(byte),
            None => byte,
        })
    }
}

/// Decompresses a single block.
#[derive(Debug)]
pub struct BlockDecompressor {
    expected_crc: u32,
    randomised: bool,
    bwt_length: usize,
    bytes: BlockBytes,
    rle: RunLengthDecoder,
    /// Byte being repeated and how many copies are still owed.
    current: u8,
    repeat: usize,
}

/// Huffman tables and the byte map read from a block.
struct BlockTables {
    /// Dense symbol index to byte value.
    symbol_map: Vec<u8>,
    decoder: HuffmanStageDecoder,
}

impl BlockDecompressor {
    /// Read and decode one block. The block magic must already have been
    /// consumed; `block_size` is the stream's declared maximum.
    pub fn new<R: Read>(reader: &mut BitReader<R>, block_size: usize) -> Result<Self> {
        let expected_crc = reader.read_u32()?;
        let randomised = reader.read_bool()?;
        let origin = reader.read_bits(24)?;

        let tables = read_tables(reader)?;
        let block = decode_symbols(reader, tables, block_size)?;
        let bwt = InverseBwt::new(&block, origin)?;

        debug!(
            "Block: {} BWT bytes, origin {}, CRC {:#010x}{}",
            block.len(),
            origin,
            expected_crc,
            if randomised { ", randomised" } else { "" }
        );

        Ok(Self {
            expected_crc,
            randomised,
            bwt_length: block.len(),
            bytes: BlockBytes {
                bwt,
                randomiser: randomised.then(Randomiser::new),
            },
            rle: RunLengthDecoder::new(),
            current: 0,
            repeat: 0,
        })
    }

    /// CRC stored in the block header.
    pub fn expected_crc(&self) -> u32 {
        self.expected_crc
    }

    /// Whether the block uses the legacy randomised format.
    pub fn is_randomised(&self) -> bool {
        self.randomised
    }

    /// Length of the block before the inverse first-stage RLE.
    pub fn bwt_length(&self) -> usize {
        self.bwt_length
    }

    /// Read decoded bytes into `buf`. Returns 0 once the block is exhausted.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            if self.repeat == 0 {
                match self.rle.next_run(&mut self.bytes)? {
                    Some((byte, repeat)) => {
                        self.current = byte;
                        self.repeat = repeat;
                    }
                    None => break,
                }
            }

            let n = self.repeat.min(buf.len() - written);
            buf[written..written + n].fill(self.current);
            written += n;
            self.repeat -= n;
        }
        Ok(written)
    }

    /// Compare the CRC of the bytes read with the stored one. Only
    /// meaningful after [`read`](Self::read) has returned 0.
    pub fn check_crc(&self) -> Result<u32> {
        let computed = self.rle.crc();
        if computed != self.expected_crc {
            warn!(
                "Block CRC mismatch: stored {:#010x}, computed {:#010x}",
                self.expected_crc, computed
            );
            return Err(BzError::block_crc(self.expected_crc, computed));
        }
        Ok(computed)
    }
}

/// Read the symbol map, selectors and code length tables.
fn read_tables<R: Read>(reader: &mut BitReader<R>) -> Result<BlockTables> {
    let used_ranges = reader.read_bits(16)?;
    let mut symbol_map = Vec::with_capacity(256);
    for range in 0..16u32 {
        if used_ranges & (0x8000 >> range) != 0 {
            for value in range * 16..range * 16 + 16 {
                if reader.read_bool()? {
                    symbol_map.push(value as u8);
                }
            }
        }
    }
    if symbol_map.is_empty() {
        return Err(BzError::corrupted("block uses no symbols"));
    }
    let alphabet_size = symbol_map.len() + 2;

    let table_count = reader.read_bits(3)? as usize;
    let selector_count = reader.read_bits(15)? as usize;
    if !(HUFFMAN_MIN_TABLES..=HUFFMAN_MAX_TABLES).contains(&table_count)
        || !(1..=HUFFMAN_MAX_SELECTORS).contains(&selector_count)
    {
        return Err(BzError::corrupted(format!(
            "invalid Huffman tables: {} tables, {} selectors",
            table_count, selector_count
        )));
    }

    let mut table_mtf = MoveToFront::new();
    let mut selectors = Vec::with_capacity(selector_count);
    for _ in 0..selector_count {
        let rank = reader.read_unary()? as usize;
        if rank >= table_count {
            return Err(BzError::corrupted(format!(
                "selector rank {} with {} tables",
                rank, table_count
            )));
        }
        selectors.push(table_mtf.index_to_front(rank));
    }

    let max_length = HUFFMAN_DECODE_MAX_CODE_LENGTH as i32;
    let mut table_lengths = Vec::with_capacity(table_count);
    for _ in 0..table_count {
        let mut current = reader.read_bits(5)? as i32;
        let mut lengths = Vec::with_capacity(alphabet_size);
        for _ in 0..alphabet_size {
            while reader.read_bool()? {
                current += if reader.read_bool()? { -1 } else { 1 };
                if !(0..=max_length).contains(&current) {
                    break;
                }
            }
            if !(1..=max_length).contains(&current) {
                return Err(BzError::corrupted(format!(
                    "Huffman code length {} outside 1-{}",
                    current, max_length
                )));
            }
            lengths.push(current as u8);
        }
        table_lengths.push(lengths);
    }

    Ok(BlockTables {
        symbol_map,
        decoder: HuffmanStageDecoder::new(&table_lengths, selectors),
    })
}

/// Decode Huffman symbols and undo MTF/RLE2, producing the BWT block.
fn decode_symbols<R: Read>(
    reader: &mut BitReader<R>,
    tables: BlockTables,
    block_size: usize,
) -> Result<Vec<u8>> {
    let BlockTables {
        symbol_map,
        mut decoder,
    } = tables;
    let end_of_block = (symbol_map.len() + 1) as u16;

    let mut block = Vec::with_capacity(block_size);
    let mut mtf = MoveToFront::new();
    let mut repeat_count = 0usize;
    let mut repeat_increment = 1usize;
    let mut mtf_value = 0u8;

    loop {
        let symbol = decoder.next_symbol(reader)?;

        if symbol == HUFFMAN_SYMBOL_RUNA || symbol == HUFFMAN_SYMBOL_RUNB {
            let digit = if symbol == HUFFMAN_SYMBOL_RUNA { 1 } else { 2 };
            repeat_count += repeat_increment * digit;
            repeat_increment <<= 1;
            if repeat_count > block_size {
                return Err(BzError::corrupted("run exceeds declared block size"));
            }
            continue;
        }

        if repeat_count > 0 {
            if block.len() + repeat_count > block_size {
                return Err(BzError::corrupted("block exceeds declared block size"));
            }
            let byte = symbol_map[mtf_value as usize];
            block.resize(block.len() + repeat_count, byte);
            repeat_count = 0;
            repeat_increment = 1;
        }

        if symbol == end_of_block {
            return Ok(block);
        }

        if block.len() >= block_size {
            return Err(BzError::corrupted("block exceeds declared block size"));
        }

        let index = symbol as usize - 1;
        if index >= symbol_map.len() {
            return Err(BzError::corrupted(format!(
                "MTF index {} outside alphabet of {}",
                index,
                symbol_map.len()
            )));
        }
        mtf_value = mtf.index_to_front(index);
        block.push(symbol_map[mtf_value as usize]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::BlockCompressor;
    use oxibz_core::bitstream::BitWriter;
    use oxibz_core::crc::Bzip2Crc;
    use std::io::Cursor;

    /// Compress `data` as one block and return the bytes after the magic.
    fn block_bytes(data: &[u8], block_size: usize) -> Vec<u8> {
        let mut compressor = BlockCompressor::new(block_size);
        assert_eq!(compressor.write_slice(data), data.len());
        let mut writer = BitWriter::new(Vec::new());
        compressor.close(&mut writer).unwrap();
        let bytes = writer.into_inner().unwrap();
        bytes[6..].to_vec()
    }

    fn decode_all(block: &mut BlockDecompressor) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 97];
        loop {
            let n = block.read(&mut buf).unwrap();
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn test_block_roundtrip() {
        let mut data = b"The quick brown fox jumps over the lazy dog. ".repeat(40);
        data.extend(std::iter::repeat_n(0u8, 1000));
        data.extend((0..=255u8).cycle().take(3000));

        let bytes = block_bytes(&data, 100_000);
        let mut reader = BitReader::new(Cursor::new(bytes));
        let mut block = BlockDecompressor::new(&mut reader, 100_000).unwrap();

        assert!(!block.is_randomised());
        assert_eq!(block.expected_crc(), Bzip2Crc::compute(&data));
        assert_eq!(decode_all(&mut block), data);
        assert_eq!(block.check_crc().unwrap(), Bzip2Crc::compute(&data));
    }

    #[test]
    fn test_block_too_large_for_declared_size() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let bytes = block_bytes(&data, 100_000);
        let mut reader = BitReader::new(Cursor::new(bytes));
        assert!(matches!(
            BlockDecompressor::new(&mut reader, 10_000),
            Err(BzError::CorruptedData { .. })
        ));
    }

    #[test]
    fn test_crc_mismatch_detected() {
        let data = b"hello hello hello";
        let mut bytes = block_bytes(data, 100_000);
        // Flip a bit in the stored CRC
        bytes[0] ^= 0x01;

        let mut reader = BitReader::new(Cursor::new(bytes));
        let mut block = BlockDecompressor::new(&mut reader, 100_000).unwrap();
        assert_eq!(decode_all(&mut block), data);
        assert!(matches!(
            block.check_crc(),
            Err(BzError::BlockCrcMismatch { .. })
        ));
    }

    #[test]
    fn test_randomiser_flips() {
        let mut randomiser = Randomiser::new();
        let positions: Vec<usize> = (0..2000).filter(|_| randomiser.apply(0) == 1).collect();
        // First flip after RNUMS[0] - 1 bytes, then every RNUMS[i] bytes
        assert_eq!(positions, vec![617, 1337, 1464, 1945]);
    }

    #[test]
    fn test_rejects_bad_table_count() {
        // One used symbol, then a table count of 7
        let mut writer = BitWriter::new(Vec::new());
        writer.write_u32(0).unwrap();
        writer.write_bool(false).unwrap();
        writer.write_bits(0, 24).unwrap();
        writer.write_bits(0x0040, 16).unwrap();
        writer.write_bits(0x0002, 16).unwrap();
        writer.write_bits(7, 3).unwrap();
        writer.write_bits(1, 15).unwrap();
        let bytes = writer.into_inner().unwrap();

        let mut reader = BitReader::new(Cursor::new(bytes));
        assert!(matches!(
            BlockDecompressor::new(&mut reader, 100_000),
            Err(BzError::CorruptedData { .. })
        ));
    }
}
