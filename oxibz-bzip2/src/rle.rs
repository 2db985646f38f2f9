//! Inverse of the first run-length stage.
//!
//! The encoder writes runs of 4 to 255 equal bytes as the byte four times
//! followed by a count of further repeats (0-251). Shorter runs are stored
//! literally. [`RunLengthDecoder`] expands that form one run at a time and
//! keeps the block CRC of the expanded bytes.

use oxibz_core::crc::Bzip2Crc;
use oxibz_core::error::{BzError, Result};

/// Equal bytes that introduce a repeat count.
const RUN_THRESHOLD: u32 = 4;

/// Streaming RLE1 decoder.
#[derive(Debug, Clone)]
pub struct RunLengthDecoder {
    last: Option<u8>,
    /// Consecutive copies of `last` seen since the last count byte.
    accumulator: u32,
    crc: Bzip2Crc,
}

impl RunLengthDecoder {
    /// Create a decoder for a new block.
    pub fn new() -> Self {
        Self {
            last: None,
            accumulator: 0,
            crc: Bzip2Crc::new(),
        }
    }

    /// Pull the next output byte and the number of times it occurs.
    ///
    /// Returns `None` once `source` is exhausted.
    pub fn next_run<I>(&mut self, source: &mut I) -> Result<Option<(u8, usize)>>
    where
        I: Iterator<Item = u8>,
    {
        let Some(byte) = source.next() else {
            return Ok(None);
        };

        if self.last != Some(byte) {
            self.last = Some(byte);
            self.accumulator = 1;
            self.crc.update_byte(byte);
            return Ok(Some((byte, 1)));
        }

        self.accumulator += 1;
        if self.accumulator == RUN_THRESHOLD {
            let count = source
                .next()
                .ok_or_else(|| BzError::corrupted("block ends inside a run-length record"))?;
            let repeat = count as usize + 1;
            self.accumulator = 0;
            self.crc.update_repeat(byte, repeat);
            Ok(Some((byte, repeat)))
        } else {
            self.crc.update_byte(byte);
            Ok(Some((byte, 1)))
        }
    }

    /// CRC of everything produced so far.
    pub fn crc(&self) -> u32 {
        self.crc.value()
    }
}

impl Default for RunLengthDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = RunLengthDecoder::new();
        let mut source = data.iter().copied();
        let mut out = Vec::new();
        while let Some((byte, repeat)) = decoder.next_run(&mut source)? {
            out.extend(std::iter::repeat_n(byte, repeat));
        }
        assert_eq!(decoder.crc(), Bzip2Crc::compute(&out));
        Ok(out)
    }

    #[test]
    fn test_rle1_no_runs() {
        assert_eq!(expand(b"abcdef").unwrap(), b"abcdef");
    }

    #[test]
    fn test_rle1_short_runs() {
        assert_eq!(expand(b"aabbbc").unwrap(), b"aabbbc");
    }

    #[test]
    fn test_rle1_zero_count() {
        // Four equal bytes always carry a count, even a zero one
        assert_eq!(expand(&[b'c', b'c', b'c', b'c', 0, b'd']).unwrap(), b"ccccd");
    }

    #[test]
    fn test_rle1_max_run() {
        let out = expand(&[b'x', b'x', b'x', b'x', 251]).unwrap();
        assert_eq!(out, vec![b'x'; 255]);
    }

    #[test]
    fn test_rle1_consecutive_records() {
        // 256 equal bytes split into a full record and a literal
        let out = expand(&[b'z', b'z', b'z', b'z', 251, b'z']).unwrap();
        assert_eq!(out, vec![b'z'; 256]);

        // A count byte equal to the run value is not a new literal
        let out = expand(&[3, 3, 3, 3, 3, 3]).unwrap();
        assert_eq!(out, vec![3; 8]);
    }

    #[test]
    fn test_rle1_truncated_record() {
        assert!(matches!(
            expand(b"qqqq"),
            Err(BzError::CorruptedData { .. })
        ));
    }
}
