//! Huffman stage for BZip2.
//!
//! A block's MTF/RLE2 symbols are coded with between two and six canonical
//! Huffman tables. The symbol stream is cut into groups of 50 and each group
//! names the table it is coded with through a selector. The encoder seeds
//! the tables with disjoint low-cost ranges of the alphabet, then refines
//! tables and selectors together over a few passes.
//!
//! Wire layout after the symbol map:
//!
//! ```text
//! table count (3 bits) | selector count (15 bits)
//! selectors, each an MTF rank written in unary
//! per table: start length (5 bits), then per symbol a run of
//!            "10" (+1) / "11" (-1) pairs closed by a single 0 bit
//! symbol data, one code per symbol from the group's table
//! ```

use crate::allocator::allocate_code_lengths;
use crate::mtf::{MoveToFront, MtfBlock};
use crate::{
    HUFFMAN_DECODE_MAX_CODE_LENGTH, HUFFMAN_ENCODE_MAX_CODE_LENGTH, HUFFMAN_GROUP_SIZE,
    HUFFMAN_MAX_ALPHABET_SIZE, HUFFMAN_MAX_TABLES,
};
use log::trace;
use oxibz_core::bitstream::{BitReader, BitWriter};
use oxibz_core::error::{BzError, Result};
use std::io::{Read, Write};

/// Length given to symbols outside a seed table's low-cost range.
const HIGH_SYMBOL_COST: u32 = 15;

/// Optimisation passes over tables and selectors.
const OPTIMISATION_PASSES: usize = 4;

/// Number of tables to use for a block of `symbol_count` MTF symbols.
fn select_table_count(symbol_count: usize) -> usize {
    match symbol_count {
        2400.. => 6,
        1200.. => 5,
        600.. => 4,
        200.. => 3,
        _ => 2,
    }
}

/// Bound code lengths for `frequencies`, returned in symbol order.
fn generate_code_lengths(frequencies: &[u32], lengths: &mut [u32]) {
    // Frequency in the high bits, symbol index in the low 9; sorting the
    // merged values sorts the frequencies and keeps the way back.
    let mut merged: Vec<u32> = frequencies
        .iter()
        .enumerate()
        .map(|(i, &f)| (f << 9) | i as u32)
        .collect();
    merged.sort_unstable();

    let mut sorted: Vec<u32> = merged.iter().map(|&m| m >> 9).collect();
    allocate_code_lengths(&mut sorted, HUFFMAN_ENCODE_MAX_CODE_LENGTH);

    for (&m, &length) in merged.iter().zip(&sorted) {
        lengths[(m & 0x1ff) as usize] = length;
    }
}

/// Encodes one block's MTF/RLE2 symbols.
#[derive(Debug)]
pub struct HuffmanStageEncoder<'a> {
    block: &'a MtfBlock,
    code_lengths: Vec<Vec<u32>>,
    selectors: Vec<u8>,
}

impl<'a> HuffmanStageEncoder<'a> {
    /// Prepare an encoder for `block`.
    pub fn new(block: &'a MtfBlock) -> Self {
        let tables = select_table_count(block.symbols.len());
        let groups = block.symbols.len().div_ceil(HUFFMAN_GROUP_SIZE);
        Self {
            block,
            code_lengths: vec![vec![0; block.alphabet_size]; tables],
            selectors: vec![0; groups],
        }
    }

    /// Number of tables this block will be coded with.
    pub fn table_count(&self) -> usize {
        self.code_lengths.len()
    }

    /// Give each table a contiguous low-cost slice of the alphabet with
    /// roughly equal cumulative frequency.
    fn generate_seeds(&mut self) {
        let block = self.block;
        let alphabet_size = block.alphabet_size as isize;
        let frequencies = &block.frequencies;
        let tables = self.code_lengths.len();

        let mut remaining = block.symbols.len() as u32;
        let mut low_cost_end: isize = -1;

        for (i, lengths) in self.code_lengths.iter_mut().enumerate() {
            let target = remaining / (tables - i) as u32;
            let low_cost_start = low_cost_end + 1;
            let mut actual = 0;

            while actual < target && low_cost_end < alphabet_size - 1 {
                low_cost_end += 1;
                actual += frequencies[low_cost_end as usize];
            }

            if low_cost_end > low_cost_start
                && i != 0
                && i != tables - 1
                && (tables - i) & 1 == 0
            {
                actual -= frequencies[low_cost_end as usize];
                low_cost_end -= 1;
            }

            for (j, length) in lengths.iter_mut().enumerate() {
                let j = j as isize;
                if j < low_cost_start || j > low_cost_end {
                    *length = HIGH_SYMBOL_COST;
                }
            }

            remaining -= actual;
        }
    }

    /// Pick the cheapest table for each group, then rebuild every table
    /// from the symbols it was picked for.
    fn optimise(&mut self, store_selectors: bool) {
        let block = self.block;
        let tables = self.code_lengths.len();
        let mut table_frequencies = vec![vec![0u32; block.alphabet_size]; tables];

        for (group_index, group) in block.symbols.chunks(HUFFMAN_GROUP_SIZE).enumerate() {
            let mut cost = [0u32; HUFFMAN_MAX_TABLES];
            for &symbol in group {
                for (c, lengths) in cost.iter_mut().zip(&self.code_lengths) {
                    *c += lengths[symbol as usize];
                }
            }

            let mut best_table = 0;
            for t in 1..tables {
                if cost[t] < cost[best_table] {
                    best_table = t;
                }
            }

            let best_frequencies = &mut table_frequencies[best_table];
            for &symbol in group {
                best_frequencies[symbol as usize] += 1;
            }

            if store_selectors {
                self.selectors[group_index] = best_table as u8;
            }
        }

        for (frequencies, lengths) in table_frequencies.iter().zip(self.code_lengths.iter_mut()) {
            generate_code_lengths(frequencies, lengths);
        }
    }

    /// Canonical codes for each table: ascending by length, then by symbol.
    fn assign_codes(&self) -> Vec<Vec<u32>> {
        self.code_lengths
            .iter()
            .map(|lengths| {
                let min = lengths.iter().copied().min().unwrap_or(0);
                let max = lengths.iter().copied().max().unwrap_or(0);

                let mut codes = vec![0u32; lengths.len()];
                let mut code = 0u32;
                for length in min..=max {
                    for (symbol, &l) in lengths.iter().enumerate() {
                        if l == length {
                            codes[symbol] = code;
                            code += 1;
                        }
                    }
                    code <<= 1;
                }
                codes
            })
            .collect()
    }

    fn write_selectors_and_tables<W: Write>(&self, writer: &mut BitWriter<W>) -> Result<()> {
        writer.write_bits(self.code_lengths.len() as u32, 3)?;
        writer.write_bits(self.selectors.len() as u32, 15)?;

        let mut selector_mtf = MoveToFront::new();
        for &selector in &self.selectors {
            writer.write_unary(selector_mtf.value_to_front(selector) as u32)?;
        }

        for lengths in &self.code_lengths {
            let mut current = lengths[0];
            writer.write_bits(current, 5)?;

            for &length in lengths {
                let step = if current < length { 0b10 } else { 0b11 };
                for _ in 0..current.abs_diff(length) {
                    writer.write_bits(step, 2)?;
                }
                writer.write_bool(false)?;
                current = length;
            }
        }

        Ok(())
    }

    fn write_block_data<W: Write>(&self, writer: &mut BitWriter<W>, codes: &[Vec<u32>]) -> Result<()> {
        let groups = self.block.symbols.chunks(HUFFMAN_GROUP_SIZE);
        for (group, &selector) in groups.zip(&self.selectors) {
            let lengths = &self.code_lengths[selector as usize];
            let codes = &codes[selector as usize];
            for &symbol in group {
                let symbol = symbol as usize;
                writer.write_bits(codes[symbol], lengths[symbol] as u8)?;
            }
        }
        Ok(())
    }

    /// Optimise the tables, then write selectors, tables and symbol data.
    pub fn encode<W: Write>(mut self, writer: &mut BitWriter<W>) -> Result<()> {
        self.generate_seeds();
        for pass in 0..OPTIMISATION_PASSES {
            self.optimise(pass == OPTIMISATION_PASSES - 1);
        }
        let codes = self.assign_codes();

        trace!(
            "Huffman stage: {} symbols, alphabet {}, {} tables, {} selectors",
            self.block.symbols.len(),
            self.block.alphabet_size,
            self.code_lengths.len(),
            self.selectors.len()
        );

        self.write_selectors_and_tables(writer)?;
        self.write_block_data(writer, &codes)
    }
}

/// Decoding tables for one canonical Huffman code.
#[derive(Debug, Clone)]
struct DecodeTable {
    min_length: usize,
    /// Per length: value subtracted from a code to get its canonical index.
    bases: [i32; HUFFMAN_DECODE_MAX_CODE_LENGTH as usize + 2],
    /// Per length: highest code of that length, -1 when there is none.
    limits: [i32; HUFFMAN_DECODE_MAX_CODE_LENGTH as usize + 1],
    /// Symbols in canonical order.
    symbols: Vec<u16>,
}

impl DecodeTable {
    fn new(lengths: &[u8]) -> Self {
        let max_code = HUFFMAN_DECODE_MAX_CODE_LENGTH as usize;
        let min_length = lengths.iter().copied().min().unwrap_or(1) as usize;
        let max_length = lengths.iter().copied().max().unwrap_or(0) as usize;

        let mut bases = [0i32; HUFFMAN_DECODE_MAX_CODE_LENGTH as usize + 2];
        let mut limits = [-1i32; HUFFMAN_DECODE_MAX_CODE_LENGTH as usize + 1];

        // Count codes per length, then turn counts into first indices
        for &length in lengths {
            bases[length as usize + 1] += 1;
        }
        for i in 1..max_code + 2 {
            bases[i] += bases[i - 1];
        }

        let mut code = 0i32;
        for i in min_length..=max_length {
            let first_code = code;
            code += bases[i + 1] - bases[i];
            bases[i] = first_code - bases[i];
            limits[i] = code - 1;
            code <<= 1;
        }

        let mut symbols = Vec::with_capacity(lengths.len());
        for length in min_length..=max_length {
            for (symbol, &l) in lengths.iter().enumerate() {
                if l as usize == length {
                    symbols.push(symbol as u16);
                }
            }
        }

        Self {
            min_length,
            bases,
            limits,
            symbols,
        }
    }
}

/// Decodes the symbol stream of one block.
#[derive(Debug)]
pub struct HuffmanStageDecoder {
    tables: Vec<DecodeTable>,
    selectors: Vec<u8>,
    current_table: usize,
    /// Index of the next selector to consume.
    group_index: usize,
    /// Symbols decoded so far.
    group_position: usize,
}

impl HuffmanStageDecoder {
    /// Build decoding tables from each table's code lengths.
    ///
    /// Lengths must already be validated to `1..=23` and selectors to
    /// indices of `table_lengths`.
    pub fn new(table_lengths: &[Vec<u8>], selectors: Vec<u8>) -> Self {
        debug_assert!(table_lengths.iter().all(|t| t.len() <= HUFFMAN_MAX_ALPHABET_SIZE));
        Self {
            tables: table_lengths.iter().map(|l| DecodeTable::new(l)).collect(),
            selectors,
            current_table: 0,
            group_index: 0,
            group_position: 0,
        }
    }

    /// Decode the next symbol.
    pub fn next_symbol<R: Read>(&mut self, reader: &mut BitReader<R>) -> Result<u16> {
        if self.group_position % HUFFMAN_GROUP_SIZE == 0 {
            let Some(&selector) = self.selectors.get(self.group_index) else {
                return Err(BzError::huffman(format!(
                    "selectors exhausted after {} groups",
                    self.selectors.len()
                )));
            };
            self.current_table = selector as usize;
            self.group_index += 1;
        }
        self.group_position += 1;

        let table = &self.tables[self.current_table];
        let mut length = table.min_length;
        let mut code = reader.read_bits(length as u8)? as i32;

        while length <= HUFFMAN_DECODE_MAX_CODE_LENGTH as usize {
            if code <= table.limits[length] {
                let index = code - table.bases[length];
                return usize::try_from(index)
                    .ok()
                    .and_then(|i| table.symbols.get(i).copied())
                    .ok_or_else(|| BzError::huffman(format!("code index {} out of range", index)));
            }
            code = (code << 1) | reader.read_bits(1)? as i32;
            length += 1;
        }

        Err(BzError::huffman("no Huffman code matched within 23 bits"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mtf::encode_block;
    use std::io::Cursor;

    fn block_for(data: &[u8]) -> MtfBlock {
        let mut present = [false; 256];
        for &b in data {
            present[b as usize] = true;
        }
        encode_block(data.iter().copied(), &present)
    }

    /// Encode, then parse the tables back and decode every symbol.
    fn roundtrip(block: &MtfBlock) -> Vec<u16> {
        let mut writer = BitWriter::new(Vec::new());
        HuffmanStageEncoder::new(block).encode(&mut writer).unwrap();
        let bytes = writer.into_inner().unwrap();

        let mut reader = BitReader::new(Cursor::new(bytes));
        let tables = reader.read_bits(3).unwrap() as usize;
        let selector_count = reader.read_bits(15).unwrap() as usize;

        let mut selector_mtf = MoveToFront::new();
        let selectors: Vec<u8> = (0..selector_count)
            .map(|_| selector_mtf.index_to_front(reader.read_unary().unwrap() as usize))
            .collect();

        let mut lengths = Vec::new();
        for _ in 0..tables {
            let mut current = reader.read_bits(5).unwrap() as i32;
            let mut table = Vec::new();
            for _ in 0..block.alphabet_size {
                while reader.read_bool().unwrap() {
                    current += if reader.read_bool().unwrap() { -1 } else { 1 };
                }
                table.push(current as u8);
            }
            lengths.push(table);
        }

        let mut decoder = HuffmanStageDecoder::new(&lengths, selectors);
        let mut symbols = Vec::new();
        loop {
            let symbol = decoder.next_symbol(&mut reader).unwrap();
            symbols.push(symbol);
            if symbol == block.end_of_block() {
                return symbols;
            }
        }
    }

    #[test]
    fn test_table_count_thresholds() {
        assert_eq!(select_table_count(1), 2);
        assert_eq!(select_table_count(199), 2);
        assert_eq!(select_table_count(200), 3);
        assert_eq!(select_table_count(600), 4);
        assert_eq!(select_table_count(1200), 5);
        assert_eq!(select_table_count(2399), 5);
        assert_eq!(select_table_count(2400), 6);
    }

    #[test]
    fn test_generate_code_lengths_order() {
        let mut lengths = [0u32; 4];
        generate_code_lengths(&[8, 1, 4, 1], &mut lengths);
        // Most frequent symbol gets the shortest code
        assert_eq!(lengths[0], 1);
        assert_eq!(lengths[2], 2);
        assert_eq!(lengths[1], 3);
        assert_eq!(lengths[3], 3);
    }

    #[test]
    fn test_canonical_codes() {
        let block = block_for(b"ab");
        let mut encoder = HuffmanStageEncoder::new(&block);
        encoder.code_lengths = vec![vec![2, 1, 3, 3], vec![2, 2, 2, 2]];
        let codes = encoder.assign_codes();
        assert_eq!(codes[0], vec![0b10, 0b0, 0b110, 0b111]);
        assert_eq!(codes[1], vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_roundtrip_small() {
        let block = block_for(b"abracadabra");
        assert_eq!(roundtrip(&block), block.symbols);
    }

    #[test]
    fn test_roundtrip_many_groups() {
        let mut state = 12345u32;
        let data: Vec<u8> = (0..20_000)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
                // Skewed distribution over most of the byte range
                let r = (state >> 16) as u8;
                if r < 128 { r % 8 } else { r }
            })
            .collect();
        let block = block_for(&data);
        assert!(block.symbols.len() > 2400);
        assert_eq!(roundtrip(&block), block.symbols);
    }

    #[test]
    fn test_decoder_rejects_exhausted_selectors() {
        let lengths = vec![vec![1u8, 1], vec![1, 1]];
        let mut decoder = HuffmanStageDecoder::new(&lengths, vec![0]);
        let mut reader = BitReader::new(Cursor::new(vec![0u8; 16]));
        for _ in 0..HUFFMAN_GROUP_SIZE {
            assert_eq!(decoder.next_symbol(&mut reader).unwrap(), 0);
        }
        assert!(matches!(
            decoder.next_symbol(&mut reader),
            Err(BzError::HuffmanDecode { .. })
        ));
    }

    #[test]
    fn test_decoder_rejects_unmatched_code() {
        // An incomplete code: only "0" is assigned, so all-ones never matches
        let lengths = vec![vec![1u8]];
        let mut decoder = HuffmanStageDecoder::new(&lengths, vec![0]);
        let mut reader = BitReader::new(Cursor::new(vec![0xFFu8; 8]));
        assert!(matches!(
            decoder.next_symbol(&mut reader),
            Err(BzError::HuffmanDecode { .. })
        ));
    }
}
