//! Move-to-Front Transform and second-stage RLE for BZip2.
//!
//! MTF replaces each byte with its position in a dynamic list and then moves
//! it to the front, so the clusters produced by the BWT become runs of
//! zeros. Those zero runs are written with the two reserved symbols RUNA and
//! RUNB as a bijective base-2 number; every other rank `r` becomes symbol
//! `r + 1`, and the block ends with an explicit end-of-block symbol.

use crate::{HUFFMAN_MAX_ALPHABET_SIZE, HUFFMAN_SYMBOL_RUNA, HUFFMAN_SYMBOL_RUNB};

/// A 256-entry move-to-front list.
#[derive(Debug, Clone)]
pub struct MoveToFront {
    list: [u8; 256],
}

impl MoveToFront {
    /// Create a list holding every byte value in ascending order.
    pub fn new() -> Self {
        let mut list = [0u8; 256];
        for (i, slot) in list.iter_mut().enumerate() {
            *slot = i as u8;
        }
        Self { list }
    }

    /// Move `value` to the front and return the position it was found at
    /// (forward transform).
    #[inline]
    pub fn value_to_front(&mut self, value: u8) -> usize {
        let mut index = 0;
        let mut temp = self.list[0];
        if value != temp {
            self.list[0] = value;
            while value != temp {
                index += 1;
                std::mem::swap(&mut temp, &mut self.list[index]);
            }
        }
        index
    }

    /// Move the entry at `index` to the front and return its value
    /// (inverse transform).
    #[inline]
    pub fn index_to_front(&mut self, index: usize) -> u8 {
        let value = self.list[index];
        self.list.copy_within(0..index, 1);
        self.list[0] = value;
        value
    }
}

impl Default for MoveToFront {
    fn default() -> Self {
        Self::new()
    }
}

/// Output of the MTF/RLE2 stage for one block.
#[derive(Debug, Clone)]
pub struct MtfBlock {
    /// Symbol stream, terminated by the end-of-block symbol.
    pub symbols: Vec<u16>,
    /// Occurrences of each symbol in `symbols`.
    pub frequencies: [u32; HUFFMAN_MAX_ALPHABET_SIZE],
    /// Number of symbols in the alphabet (end-of-block symbol + 1).
    pub alphabet_size: usize,
}

impl MtfBlock {
    /// The end-of-block symbol, always the last in the alphabet.
    pub fn end_of_block(&self) -> u16 {
        (self.alphabet_size - 1) as u16
    }
}

/// Run the MTF and RLE2 stages over a BWT block.
///
/// `present` marks the byte values that occur in the block; they are
/// renumbered densely before the move-to-front pass.
pub fn encode_block<I>(bwt: I, present: &[bool; 256]) -> MtfBlock
where
    I: IntoIterator<Item = u8>,
{
    let mut symbol_map = [0u8; 256];
    let mut unique = 0usize;
    for (value, _) in present.iter().enumerate().filter(|(_, p)| **p) {
        symbol_map[value] = unique as u8;
        unique += 1;
    }
    let end_of_block = unique + 1;

    let bwt = bwt.into_iter();
    let mut symbols = Vec::with_capacity(bwt.size_hint().0 + 1);
    let mut frequencies = [0u32; HUFFMAN_MAX_ALPHABET_SIZE];
    let mut mtf = MoveToFront::new();
    let mut repeat = 0u32;

    for byte in bwt {
        let position = mtf.value_to_front(symbol_map[byte as usize]);
        if position == 0 {
            repeat += 1;
        } else {
            push_run(&mut symbols, &mut frequencies, repeat);
            repeat = 0;
            symbols.push((position + 1) as u16);
            frequencies[position + 1] += 1;
        }
    }
    push_run(&mut symbols, &mut frequencies, repeat);

    symbols.push(end_of_block as u16);
    frequencies[end_of_block] += 1;

    MtfBlock {
        symbols,
        frequencies,
        alphabet_size: end_of_block + 1,
    }
}

/// Emit a run of `count` zero ranks as RUNA/RUNB digits, least significant first.
fn push_run(symbols: &mut Vec<u16>, frequencies: &mut [u32], count: u32) {
    if count == 0 {
        return;
    }
    let mut remaining = count - 1;
    loop {
        let symbol = if remaining & 1 == 0 {
            HUFFMAN_SYMBOL_RUNA
        } else {
            HUFFMAN_SYMBOL_RUNB
        };
        symbols.push(symbol);
        frequencies[symbol as usize] += 1;

        if remaining <= 1 {
            break;
        }
        remaining = (remaining - 2) >> 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presence(data: &[u8]) -> [bool; 256] {
        let mut present = [false; 256];
        for &b in data {
            present[b as usize] = true;
        }
        present
    }

    /// Decode a RUNA/RUNB digit sequence back to its run length.
    fn run_length(digits: &[u16]) -> u32 {
        let mut count = 0;
        let mut increment = 1;
        for &d in digits {
            count += if d == HUFFMAN_SYMBOL_RUNA { increment } else { increment << 1 };
            increment <<= 1;
        }
        count
    }

    #[test]
    fn test_mtf_initial_order() {
        let mut mtf = MoveToFront::new();
        assert_eq!(mtf.value_to_front(b'a'), 97);
        assert_eq!(mtf.value_to_front(b'a'), 0);
        assert_eq!(mtf.value_to_front(0), 1);
    }

    #[test]
    fn test_mtf_repeated() {
        let mut mtf = MoveToFront::new();
        let ranks: Vec<usize> = b"aaaa".iter().map(|&b| mtf.value_to_front(b)).collect();
        assert_eq!(ranks, vec![97, 0, 0, 0]);
    }

    #[test]
    fn test_mtf_roundtrip() {
        let test_cases = [
            b"hello".as_slice(),
            b"banana",
            b"abracadabra",
            b"the quick brown fox",
        ];

        for data in test_cases {
            let mut forward = MoveToFront::new();
            let ranks: Vec<usize> = data.iter().map(|&b| forward.value_to_front(b)).collect();

            let mut inverse = MoveToFront::new();
            let recovered: Vec<u8> = ranks.iter().map(|&r| inverse.index_to_front(r)).collect();
            assert_eq!(recovered, data, "Failed for: {:?}", data);
        }
    }

    #[test]
    fn test_run_digits() {
        for count in 1..=300u32 {
            let mut symbols = Vec::new();
            let mut frequencies = [0u32; HUFFMAN_MAX_ALPHABET_SIZE];
            push_run(&mut symbols, &mut frequencies, count);
            assert_eq!(run_length(&symbols), count, "run of {}", count);
            assert_eq!(
                (frequencies[0] + frequencies[1]) as usize,
                symbols.len()
            );
        }
    }

    #[test]
    fn test_encode_block_runs() {
        // "aaab": the first 'a' is rank 0 in the dense map, so it opens a run
        let data = b"aaab";
        let block = encode_block(data.iter().copied(), &presence(data));

        let eob = block.end_of_block();
        assert_eq!(eob, 3);
        assert_eq!(block.alphabet_size, 4);
        assert_eq!(*block.symbols.last().unwrap(), eob);

        let run_end = block.symbols.iter().position(|&s| s > 1).unwrap();
        assert_eq!(run_length(&block.symbols[..run_end]), 3);
        // 'b' sits at rank 1 after 'a' was moved to the front
        assert_eq!(block.symbols[run_end], 2);
    }

    #[test]
    fn test_encode_block_frequencies() {
        let data = b"nnbaaa";
        let block = encode_block(data.iter().copied(), &presence(data));

        let mut counted = [0u32; HUFFMAN_MAX_ALPHABET_SIZE];
        for &s in &block.symbols {
            counted[s as usize] += 1;
        }
        assert_eq!(counted, block.frequencies);
        assert_eq!(block.alphabet_size, 5);
    }

    #[test]
    fn test_encode_block_full_alphabet() {
        let data: Vec<u8> = (0..=255).collect();
        let block = encode_block(data.iter().copied(), &presence(&data));
        assert_eq!(block.alphabet_size, HUFFMAN_MAX_ALPHABET_SIZE);
        assert_eq!(block.end_of_block(), 257);
    }
}
