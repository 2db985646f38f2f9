//! CRC-32 as used by BZip2.
//!
//! BZip2 uses the same polynomial as ZIP and GZIP (0x04C11DB7) but feeds it
//! most-significant-bit first, so the table below is the non-reflected form.
//!
//! - Polynomial: 0x04C11DB7
//! - Initial value: 0xFFFFFFFF
//! - Final XOR: 0xFFFFFFFF
//! - Reflected input/output: No
//!
//! Each block carries the CRC of its uncompressed bytes; the stream trailer
//! carries a combination of all block CRCs (see [`combine_stream_crc`]).

/// CRC-32 lookup table (polynomial 0x04C11DB7, MSB-first).
const BZIP2_CRC_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0usize;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut j = 0;
        while j < 8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ 0x04C1_1DB7;
            } else {
                crc <<= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Running BZip2 CRC-32.
///
/// Besides byte-wise updates it can fold a single value repeated many times
/// in one call, which is how run-length encoded data is accounted for.
///
/// # Example
///
/// ```
/// use oxibz_core::crc::Bzip2Crc;
///
/// let mut crc = Bzip2Crc::new();
/// crc.update(b"ab");
/// crc.update_byte(b'c');
/// assert_eq!(crc.value(), 0x648C_BB73);
/// ```
#[derive(Debug, Clone)]
pub struct Bzip2Crc {
    crc: u32,
}

impl Bzip2Crc {
    /// Create a new CRC calculator.
    pub fn new() -> Self {
        Self { crc: 0xFFFF_FFFF }
    }

    /// Reset the CRC to its initial state.
    pub fn reset(&mut self) {
        self.crc = 0xFFFF_FFFF;
    }

    /// Fold in one byte.
    #[inline(always)]
    pub fn update_byte(&mut self, value: u8) {
        self.crc = (self.crc << 8) ^ BZIP2_CRC_TABLE[((self.crc >> 24) as u8 ^ value) as usize];
    }

    /// Fold in `value` repeated `count` times.
    #[inline]
    pub fn update_repeat(&mut self, value: u8, count: usize) {
        let mut crc = self.crc;
        for _ in 0..count {
            crc = (crc << 8) ^ BZIP2_CRC_TABLE[((crc >> 24) as u8 ^ value) as usize];
        }
        self.crc = crc;
    }

    /// Fold in a slice of bytes.
    #[inline]
    pub fn update(&mut self, data: &[u8]) {
        let mut crc = self.crc;
        for &byte in data {
            crc = (crc << 8) ^ BZIP2_CRC_TABLE[((crc >> 24) as u8 ^ byte) as usize];
        }
        self.crc = crc;
    }

    /// Current CRC value (finalised, the state is unchanged).
    pub fn value(&self) -> u32 {
        !self.crc
    }

    /// Compute the CRC of a byte slice in one call.
    pub fn compute(data: &[u8]) -> u32 {
        let mut crc = Self::new();
        crc.update(data);
        crc.value()
    }
}

impl Default for Bzip2Crc {
    fn default() -> Self {
        Self::new()
    }
}

/// Fold a block CRC into the combined stream CRC.
///
/// The stream value is rotated left by one bit and XORed with the block CRC,
/// so the result depends on block order.
#[inline]
pub fn combine_stream_crc(stream_crc: u32, block_crc: u32) -> u32 {
    stream_crc.rotate_left(1) ^ block_crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_known_values() {
        assert_eq!(Bzip2Crc::compute(b""), 0);
        assert_eq!(Bzip2Crc::compute(b"abc"), 0x648C_BB73);
        // CRC-32/BZIP2 check value
        assert_eq!(Bzip2Crc::compute(b"123456789"), 0xFC89_1918);
    }

    #[test]
    fn test_crc_incremental() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let mut crc = Bzip2Crc::new();
        for chunk in data.chunks(7) {
            crc.update(chunk);
        }
        assert_eq!(crc.value(), Bzip2Crc::compute(data));
    }

    #[test]
    fn test_crc_repeat_matches_bytewise() {
        let mut repeated = Bzip2Crc::new();
        repeated.update_byte(b'x');
        repeated.update_repeat(b'A', 10);
        repeated.update_repeat(b'B', 0);

        let mut bytewise = Bzip2Crc::new();
        bytewise.update(b"xAAAAAAAAAA");
        assert_eq!(repeated.value(), bytewise.value());
        assert_eq!(Bzip2Crc::compute(&[b'A'; 10]), 0xA2F8_4F0E);
    }

    #[test]
    fn test_crc_reset() {
        let mut crc = Bzip2Crc::new();
        crc.update(b"garbage");
        crc.reset();
        crc.update(b"abc");
        assert_eq!(crc.value(), 0x648C_BB73);
    }

    #[test]
    fn test_combine_stream_crc() {
        assert_eq!(combine_stream_crc(0, 0x648C_BB73), 0x648C_BB73);
        assert_eq!(combine_stream_crc(0x8000_0001, 0), 0x0000_0003);

        // Left fold over several blocks is order-dependent
        let blocks = [0x1111_1111u32, 0x2222_2222, 0x3333_3333];
        let forward = blocks.iter().fold(0, |acc, &b| combine_stream_crc(acc, b));
        let backward = blocks.iter().rev().fold(0, |acc, &b| combine_stream_crc(acc, b));
        assert_ne!(forward, backward);
    }
}
