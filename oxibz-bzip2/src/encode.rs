//! BZip2 stream encoder.

use crate::compressor::BlockCompressor;
use crate::{BZIP2_MAGIC, CompressionLevel, EOS_MAGIC_1, EOS_MAGIC_2, VERSION_MARKER};
use log::debug;
use oxibz_core::bitstream::BitWriter;
use oxibz_core::crc::combine_stream_crc;
use oxibz_core::error::{BzError, Result};
use std::io::{self, Write};

/// Encoder configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncoderOptions {
    /// Block size multiplier.
    pub level: CompressionLevel,
    /// Omit the leading `BZ` magic.
    pub headerless: bool,
}

impl EncoderOptions {
    /// Options for the given level, with a full header.
    pub fn new(level: CompressionLevel) -> Self {
        Self {
            level,
            headerless: false,
        }
    }

    /// Set whether the `BZ` magic is omitted.
    pub fn headerless(mut self, headerless: bool) -> Self {
        self.headerless = headerless;
        self
    }
}

/// BZip2 encoder.
///
/// Implements [`Write`]; input is cut into blocks of the configured size.
/// Call [`finish`](Self::finish) to write the end of the stream and get the
/// sink back. An encoder dropped without finishing finishes itself and
/// ignores any error.
///
/// # Example
///
/// ```
/// use oxibz_bzip2::{BzEncoder, CompressionLevel};
/// use std::io::Write;
///
/// let mut encoder = BzEncoder::new(Vec::new(), CompressionLevel::new(1));
/// encoder.write_all(b"abc").unwrap();
/// let compressed = encoder.finish().unwrap();
/// assert_eq!(&compressed[..4], b"BZh1");
/// ```
#[derive(Debug)]
pub struct BzEncoder<W: Write> {
    /// Output; only `None` once the sink has been handed back.
    writer: Option<BitWriter<W>>,
    options: EncoderOptions,
    block: BlockCompressor,
    stream_crc: u32,
    header_written: bool,
    finished: bool,
    /// Message of the error that ended the stream.
    failed: Option<String>,
    blocks_written: usize,
    total_in: u64,
}

impl<W: Write> BzEncoder<W> {
    /// Create an encoder with the given compression level.
    pub fn new(writer: W, level: CompressionLevel) -> Self {
        Self::with_options(writer, EncoderOptions::new(level))
    }

    /// Create an encoder from explicit options.
    pub fn with_options(writer: W, options: EncoderOptions) -> Self {
        Self {
            writer: Some(BitWriter::new(writer)),
            block: BlockCompressor::new(options.level.block_size()),
            options,
            stream_crc: 0,
            header_written: false,
            finished: false,
            failed: None,
            blocks_written: 0,
            total_in: 0,
        }
    }

    /// Create an encoder from a raw block size multiplier, which must be
    /// 1-9.
    pub fn with_block_size(writer: W, multiplier: u32) -> Result<Self> {
        if !(1..=9).contains(&multiplier) {
            return Err(BzError::invalid_block_size(multiplier));
        }
        Ok(Self::new(writer, CompressionLevel::new(multiplier as u8)))
    }

    /// Uncompressed bytes accepted so far.
    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    /// Compressed bits produced so far.
    pub fn total_out_bits(&self) -> u64 {
        self.writer.as_ref().map_or(0, BitWriter::bits_written)
    }

    /// Number of blocks written so far.
    pub fn blocks_written(&self) -> usize {
        self.blocks_written
    }

    /// Combined CRC of the blocks written so far.
    pub fn stream_crc(&self) -> u32 {
        self.stream_crc
    }

    fn check_usable(&self) -> Result<()> {
        if let Some(message) = &self.failed {
            return Err(BzError::StreamFailed {
                message: message.clone(),
            });
        }
        if self.finished {
            return Err(BzError::StreamClosed);
        }
        Ok(())
    }

    /// Remember the first error so later calls fail the same way.
    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.failed = Some(e.to_string());
        }
        result
    }

    fn writer(&mut self) -> Result<&mut BitWriter<W>> {
        self.writer.as_mut().ok_or(BzError::StreamClosed)
    }

    fn write_header(&mut self) -> Result<()> {
        if self.header_written {
            return Ok(());
        }
        let headerless = self.options.headerless;
        let digit = b'0' + self.options.level.level();

        let writer = self.writer()?;
        if !headerless {
            for &byte in &BZIP2_MAGIC {
                writer.write_bits(byte as u32, 8)?;
            }
        }
        writer.write_bits(VERSION_MARKER as u32, 8)?;
        writer.write_bits(digit as u32, 8)?;

        self.header_written = true;
        Ok(())
    }

    /// Write out the current block, if it holds anything, and start a new one.
    fn close_block(&mut self) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }

        let writer = self.writer.as_mut().ok_or(BzError::StreamClosed)?;
        let crc = self.block.close(writer)?;
        self.stream_crc = combine_stream_crc(self.stream_crc, crc);
        self.blocks_written += 1;
        self.block.reset();
        Ok(())
    }

    fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.write_header()?;

        let mut offset = 0;
        while offset < data.len() {
            offset += self.block.write_slice(&data[offset..]);
            if offset < data.len() {
                self.close_block()?;
            }
        }

        self.total_in += data.len() as u64;
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.write_header()?;
        self.close_block()?;

        let stream_crc = self.stream_crc;
        let writer = self.writer()?;
        writer.write_bits(EOS_MAGIC_1, 24)?;
        writer.write_bits(EOS_MAGIC_2, 24)?;
        writer.write_u32(stream_crc)?;
        writer.flush()?;

        debug!(
            "Finished stream: {} bytes in {} blocks, stream CRC {:#010x}",
            self.total_in, self.blocks_written, stream_crc
        );
        Ok(())
    }

    /// Write the final block and the end-of-stream trailer. Calling it
    /// again after success does nothing.
    pub fn try_finish(&mut self) -> Result<()> {
        if self.finished && self.failed.is_none() {
            return Ok(());
        }
        self.check_usable()?;

        let result = self.write_trailer();
        self.record(result)?;
        self.finished = true;
        Ok(())
    }

    /// Finish the stream and return the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.try_finish()?;
        let writer = self.writer.take().ok_or(BzError::StreamClosed)?;
        writer.into_inner()
    }
}

impl<W: Write> Write for BzEncoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_usable()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let result = self.write_data(buf);
        self.record(result)?;
        Ok(buf.len())
    }

    /// Flushes the sink only; pending bits stay buffered until the stream
    /// is finished.
    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.get_mut().flush(),
            None => Ok(()),
        }
    }
}

impl<W: Write> Drop for BzEncoder<W> {
    fn drop(&mut self) {
        if self.writer.is_some() && !self.finished && self.failed.is_none() {
            let _ = self.try_finish();
        }
    }
}

/// Compress data to a complete BZip2 stream.
pub fn compress(data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
    let mut encoder = BzEncoder::new(Vec::new(), level);
    encoder.write_data(data)?;
    encoder.finish()
}
