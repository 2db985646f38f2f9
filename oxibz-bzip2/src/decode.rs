//! BZip2 stream decoder.

use crate::decompressor::BlockDecompressor;
use crate::{
    BLOCK_MAGIC_1, BLOCK_MAGIC_2, BZIP2_MAGIC, EOS_MAGIC_1, EOS_MAGIC_2, VERSION_MARKER,
};
use log::{debug, warn};
use oxibz_core::bitstream::BitReader;
use oxibz_core::crc::combine_stream_crc;
use oxibz_core::error::{BzError, Result};
use std::io::{self, Read};

/// Decoder configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecoderOptions {
    /// The stream starts at `h`, without the `BZ` magic.
    pub headerless: bool,
}

impl DecoderOptions {
    /// Set whether the `BZ` magic is expected.
    pub fn headerless(mut self, headerless: bool) -> Self {
        self.headerless = headerless;
        self
    }
}

#[derive(Debug)]
enum State {
    Reading,
    Done,
    /// Message of the error that ended the stream.
    Failed(String),
}

/// BZip2 decoder.
///
/// Implements [`Read`]. The stream header is checked on construction.
/// After the last block the stored stream CRC is compared against the
/// fold of the block CRCs. Once an error has been returned every later
/// read fails with [`BzError::StreamFailed`].
///
/// Decoded bytes are handed out before their block's CRC can be checked,
/// so callers that must not act on corrupt data should buffer the whole
/// output first.
#[derive(Debug)]
pub struct BzDecoder<R: Read> {
    reader: BitReader<R>,
    level: u8,
    block: Option<BlockDecompressor>,
    stream_crc: u32,
    block_crcs: Vec<u32>,
    state: State,
    total_out: u64,
}

impl<R: Read> BzDecoder<R> {
    /// Create a new decoder, reading the stream header.
    pub fn new(reader: R) -> Result<Self> {
        Self::with_options(reader, DecoderOptions::default())
    }

    /// Create a decoder with explicit options.
    pub fn with_options(reader: R, options: DecoderOptions) -> Result<Self> {
        let mut reader = BitReader::new(reader);

        if !options.headerless {
            let mut magic = [0u8; 2];
            for byte in &mut magic {
                *byte = reader.read_bits(8)? as u8;
            }
            if magic != BZIP2_MAGIC {
                return Err(BzError::invalid_magic(BZIP2_MAGIC.to_vec(), magic.to_vec()));
            }
        }

        let version = reader.read_bits(8)? as u8;
        if version != VERSION_MARKER {
            return Err(BzError::invalid_header(format!(
                "Invalid BZip2 version marker {:#04x}",
                version
            )));
        }

        let digit = reader.read_bits(8)? as u8;
        if !(b'1'..=b'9').contains(&digit) {
            return Err(BzError::invalid_header(format!(
                "Invalid block size digit {:#04x}",
                digit
            )));
        }

        Ok(Self {
            reader,
            level: digit - b'0',
            block: None,
            stream_crc: 0,
            block_crcs: Vec::new(),
            state: State::Reading,
            total_out: 0,
        })
    }

    /// Declared block size multiplier (1-9).
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Declared maximum block size in bytes.
    pub fn block_size(&self) -> usize {
        self.level as usize * 100_000
    }

    /// CRCs of the blocks verified so far.
    pub fn block_crcs(&self) -> &[u32] {
        &self.block_crcs
    }

    /// Fold of the verified block CRCs.
    pub fn stream_crc(&self) -> u32 {
        self.stream_crc
    }

    /// Whether the end-of-stream trailer has been read and verified.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// Decompressed bytes returned so far.
    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    /// Compressed bits consumed so far, header included.
    pub fn compressed_bits(&self) -> u64 {
        self.reader.bits_read()
    }

    /// Consume the decoder and return the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }

    /// Read the next marker. Returns `false` at a verified end of stream.
    fn next_block(&mut self) -> Result<bool> {
        let high = self.reader.read_bits(24)?;
        let low = self.reader.read_bits(24)?;

        if high == BLOCK_MAGIC_1 && low == BLOCK_MAGIC_2 {
            let block_size = self.block_size();
            let block = BlockDecompressor::new(&mut self.reader, block_size)?;
            self.block = Some(block);
            return Ok(true);
        }

        if high == EOS_MAGIC_1 && low == EOS_MAGIC_2 {
            let stored = self.reader.read_u32()?;
            if stored != self.stream_crc {
                warn!(
                    "Stream CRC mismatch: stored {:#010x}, computed {:#010x}",
                    stored, self.stream_crc
                );
                return Err(BzError::stream_crc(stored, self.stream_crc));
            }
            debug!(
                "End of stream: {} blocks, {} bytes, CRC {:#010x}",
                self.block_crcs.len(),
                self.total_out,
                stored
            );
            return Ok(false);
        }

        Err(BzError::invalid_marker(((high as u64) << 24) | low as u64))
    }

    fn read_blocks(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if let Some(block) = self.block.as_mut() {
                let n = block.read(buf)?;
                if n > 0 {
                    self.total_out += n as u64;
                    return Ok(n);
                }

                let crc = block.check_crc()?;
                self.stream_crc = combine_stream_crc(self.stream_crc, crc);
                self.block_crcs.push(crc);
                self.block = None;
            }

            if !self.next_block()? {
                self.state = State::Done;
                return Ok(0);
            }
        }
    }

    /// Read decompressed bytes, reporting codec errors as [`BzError`].
    ///
    /// Returns 0 at the end of the stream.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        match &self.state {
            State::Done => return Ok(0),
            State::Failed(message) => {
                return Err(BzError::StreamFailed {
                    message: message.clone(),
                });
            }
            State::Reading => {}
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let result = self.read_blocks(buf);
        if let Err(e) = &result {
            self.state = State::Failed(e.to_string());
            self.block = None;
        }
        result
    }
}

impl<R: Read> Read for BzDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_bytes(buf)?)
    }
}

/// Decompress a complete BZip2 stream.
pub fn decompress<R: Read>(reader: R) -> Result<Vec<u8>> {
    let mut decoder = BzDecoder::new(reader)?;
    let mut output = Vec::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = decoder.read_bytes(&mut buf)?;
        if n == 0 {
            return Ok(output);
        }
        output.extend_from_slice(&buf[..n]);
    }
}
