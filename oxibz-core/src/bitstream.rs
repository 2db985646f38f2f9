//! Bit-level I/O for the BZip2 format.
//!
//! BZip2 packs every field most-significant-bit first: a 24-bit marker is
//! emitted starting with its top bit, Huffman codes are emitted from their
//! first (leftmost) bit, and the final partial byte is padded with zero bits
//! on the right.
//!
//! # Example
//!
//! ```
//! use oxibz_core::bitstream::{BitReader, BitWriter};
//! use std::io::Cursor;
//!
//! let mut output = Vec::new();
//! {
//!     let mut writer = BitWriter::new(&mut output);
//!     writer.write_bits(0b101, 3).unwrap();
//!     writer.write_unary(2).unwrap();
//!     writer.flush().unwrap();
//! }
//! assert_eq!(output, vec![0b1011_1000]);
//!
//! let mut reader = BitReader::new(Cursor::new(&output));
//! assert_eq!(reader.read_bits(3).unwrap(), 0b101);
//! assert_eq!(reader.read_unary().unwrap(), 2);
//! ```

use crate::error::{BzError, Result};
use std::io::{ErrorKind, Read, Write};

/// A MSB-first bit reader that wraps any `Read` implementation.
///
/// Bytes are pulled from the underlying reader in small batches, so the
/// reader may run ahead of the bits actually consumed.
#[derive(Debug)]
pub struct BitReader<R: Read> {
    /// Underlying reader.
    reader: R,
    /// Bit buffer; the next bit is at position `bits_in_buffer - 1`.
    buffer: u64,
    /// Number of valid bits in buffer.
    bits_in_buffer: u8,
    /// Total bits consumed (for error reporting).
    total_bits_read: u64,
}

impl<R: Read> BitReader<R> {
    /// Create a new `BitReader` wrapping the given reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: 0,
            bits_in_buffer: 0,
            total_bits_read: 0,
        }
    }

    /// Get a reference to the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Consume this `BitReader` and return the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Get the total number of bits consumed so far.
    pub fn bits_read(&self) -> u64 {
        self.total_bits_read
    }

    /// Ensure at least `count` bits are buffered.
    #[inline]
    fn fill_buffer(&mut self, count: u8) -> Result<()> {
        debug_assert!(count <= 32, "Cannot buffer more than 32 bits at once");

        while self.bits_in_buffer < count {
            let room = ((64 - self.bits_in_buffer) / 8) as usize;
            let mut temp_buf = [0u8; 8];
            match self.reader.read(&mut temp_buf[..room]) {
                Ok(0) => {
                    let missing = (count - self.bits_in_buffer).div_ceil(8);
                    return Err(BzError::unexpected_eof(missing as usize));
                }
                Ok(n) => {
                    for &byte in &temp_buf[..n] {
                        self.buffer = (self.buffer << 8) | byte as u64;
                        self.bits_in_buffer += 8;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    /// Read up to 32 bits as an unsigned big-endian value.
    #[inline]
    pub fn read_bits(&mut self, count: u8) -> Result<u32> {
        debug_assert!(count <= 32, "Cannot read more than 32 bits at once");

        if count == 0 {
            return Ok(0);
        }

        self.fill_buffer(count)?;

        let shift = self.bits_in_buffer - count;
        let value = (self.buffer >> shift) & ((1u64 << count) - 1);
        self.bits_in_buffer = shift;
        self.total_bits_read += count as u64;

        Ok(value as u32)
    }

    /// Read a single bit.
    #[inline]
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? != 0)
    }

    /// Read a unary number: the count of one-bits before the next zero-bit.
    pub fn read_unary(&mut self) -> Result<u32> {
        let mut count = 0;
        while self.read_bool()? {
            count += 1;
        }
        Ok(count)
    }

    /// Read a 32-bit big-endian integer.
    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_bits(32)
    }
}

/// A MSB-first bit writer that wraps any `Write` implementation.
///
/// Complete 32-bit words are forwarded to the underlying writer as they
/// fill. Call [`flush`](Self::flush) when done to write the remaining bits,
/// zero-padded to a byte boundary.
#[derive(Debug)]
pub struct BitWriter<W: Write> {
    /// Underlying writer.
    writer: W,
    /// Bit buffer; the low `bits_in_buffer` bits are pending output.
    buffer: u64,
    /// Number of bits in buffer.
    bits_in_buffer: u8,
    /// Total bits written.
    total_bits_written: u64,
}

impl<W: Write> BitWriter<W> {
    /// Create a new `BitWriter` wrapping the given writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buffer: 0,
            bits_in_buffer: 0,
            total_bits_written: 0,
        }
    }

    /// Get a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Get a mutable reference to the underlying writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Flush pending bits and return the underlying writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        Ok(self.writer)
    }

    /// Get the total number of bits written so far.
    pub fn bits_written(&self) -> u64 {
        self.total_bits_written
    }

    /// Write the low `count` bits of `value` (0-32), most significant first.
    #[inline]
    pub fn write_bits(&mut self, value: u32, count: u8) -> Result<()> {
        debug_assert!(count <= 32, "Cannot write more than 32 bits at once");

        if count == 0 {
            return Ok(());
        }

        let mask = (1u64 << count) - 1;
        self.buffer = (self.buffer << count) | (value as u64 & mask);
        self.bits_in_buffer += count;
        self.total_bits_written += count as u64;

        if self.bits_in_buffer >= 32 {
            let word = (self.buffer >> (self.bits_in_buffer - 32)) as u32;
            self.writer.write_all(&word.to_be_bytes())?;
            self.bits_in_buffer -= 32;
        }

        Ok(())
    }

    /// Write a single bit.
    #[inline]
    pub fn write_bool(&mut self, bit: bool) -> Result<()> {
        self.write_bits(bit as u32, 1)
    }

    /// Write `value` in unary: `value` one-bits followed by a zero-bit.
    pub fn write_unary(&mut self, mut value: u32) -> Result<()> {
        while value >= 31 {
            self.write_bits(0x7FFF_FFFF, 31)?;
            value -= 31;
        }
        // value ones then a terminating zero
        self.write_bits(((1u32 << value) - 1) << 1, value as u8 + 1)
    }

    /// Write a 32-bit big-endian integer.
    #[inline]
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bits(value, 32)
    }

    /// Write out all pending bits, padding the last byte with zeros.
    ///
    /// Padding ends the current byte, so this is only called once the
    /// stream is complete.
    pub fn flush(&mut self) -> Result<()> {
        while self.bits_in_buffer >= 8 {
            let byte = (self.buffer >> (self.bits_in_buffer - 8)) as u8;
            self.writer.write_all(&[byte])?;
            self.bits_in_buffer -= 8;
        }

        if self.bits_in_buffer > 0 {
            let byte = (self.buffer << (8 - self.bits_in_buffer)) as u8;
            self.writer.write_all(&[byte])?;
            self.total_bits_written += (8 - self.bits_in_buffer) as u64;
            self.bits_in_buffer = 0;
        }

        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_bitreader_basic() {
        // 0b10110101 = 0xB5
        let data = vec![0xB5];
        let mut reader = BitReader::new(Cursor::new(data));

        assert_eq!(reader.read_bits(1).unwrap(), 1); // MSB first
        assert_eq!(reader.read_bits(1).unwrap(), 0);
        assert_eq!(reader.read_bits(2).unwrap(), 0b11);
        assert_eq!(reader.read_bits(4).unwrap(), 0b0101);
        assert_eq!(reader.bits_read(), 8);
    }

    #[test]
    fn test_bitreader_across_bytes() {
        let data = vec![0x31, 0x41, 0x59, 0x26, 0x53, 0x59];
        let mut reader = BitReader::new(Cursor::new(data));

        assert_eq!(reader.read_bits(24).unwrap(), 0x314159);
        assert_eq!(reader.read_bits(24).unwrap(), 0x265359);
    }

    #[test]
    fn test_bitreader_u32_unaligned() {
        let data = vec![0xFF, 0x12, 0x34, 0x56, 0x78, 0x00];
        let mut reader = BitReader::new(Cursor::new(data));

        assert_eq!(reader.read_bits(4).unwrap(), 0xF);
        assert_eq!(reader.read_u32().unwrap(), 0xF123_4567);
        assert_eq!(reader.read_bits(4).unwrap(), 0x8);
    }

    #[test]
    fn test_bitreader_eof() {
        let data = vec![0xAB];
        let mut reader = BitReader::new(Cursor::new(data));

        assert_eq!(reader.read_bits(8).unwrap(), 0xAB);
        assert!(matches!(
            reader.read_bits(1),
            Err(BzError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_bitwriter_basic() {
        let mut output = Vec::new();
        {
            let mut writer = BitWriter::new(&mut output);
            writer.write_bool(true).unwrap();
            writer.write_bool(false).unwrap();
            writer.write_bits(0b11, 2).unwrap();
            writer.write_bits(0b0101, 4).unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(output, vec![0xB5]);
    }

    #[test]
    fn test_bitwriter_padding() {
        let mut output = Vec::new();
        let mut writer = BitWriter::new(&mut output);
        writer.write_bits(0x314159, 24).unwrap();
        writer.write_bits(0b1, 1).unwrap();
        assert_eq!(writer.bits_written(), 25);
        writer.flush().unwrap();
        assert_eq!(writer.bits_written(), 32);
        drop(writer);
        assert_eq!(output, vec![0x31, 0x41, 0x59, 0x80]);
    }

    #[test]
    fn test_unary() {
        let mut output = Vec::new();
        {
            let mut writer = BitWriter::new(&mut output);
            for value in [0, 1, 5, 40, 2] {
                writer.write_unary(value).unwrap();
            }
            writer.flush().unwrap();
        }

        let mut reader = BitReader::new(Cursor::new(&output));
        for value in [0, 1, 5, 40, 2] {
            assert_eq!(reader.read_unary().unwrap(), value);
        }
    }

    #[test]
    fn test_roundtrip_mixed_widths() {
        let fields: Vec<(u32, u8)> = vec![
            (0x42, 8),
            (0x5A, 8),
            (1, 1),
            (0x123456, 24),
            (0xDEAD_BEEF, 32),
            (0, 3),
            (19, 5),
            (0x7FFF, 15),
        ];

        let mut output = Vec::new();
        {
            let mut writer = BitWriter::new(&mut output);
            for &(value, count) in &fields {
                writer.write_bits(value, count).unwrap();
            }
            writer.flush().unwrap();
        }

        let mut reader = BitReader::new(Cursor::new(&output));
        for &(value, count) in &fields {
            assert_eq!(reader.read_bits(count).unwrap(), value);
        }
    }

    #[test]
    fn test_into_inner_flushes() {
        let mut writer = BitWriter::new(Vec::new());
        writer.write_bits(0b111, 3).unwrap();
        let output = writer.into_inner().unwrap();
        assert_eq!(output, vec![0b1110_0000]);
    }
}
