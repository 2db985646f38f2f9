//! Info command implementation.

use crate::utils::format_ratio;
use oxibz_bzip2::{BzDecoder, DecoderOptions};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Stream details gathered by decoding a whole file.
#[derive(Debug, Serialize, Deserialize)]
struct StreamInfo {
    file: String,
    level: u8,
    block_size: usize,
    blocks: usize,
    block_crcs: Vec<String>,
    stream_crc: String,
    compressed_size: u64,
    uncompressed_size: u64,
    ratio: String,
    /// Bits of payload, header and trailer, before padding.
    compressed_bits: u64,
}

impl StreamInfo {
    fn gather<R: Read>(
        name: &Path,
        reader: R,
        compressed_size: u64,
        headerless: bool,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let options = DecoderOptions::default().headerless(headerless);
        let mut decoder = BzDecoder::with_options(reader, options)?;
        let uncompressed_size = io::copy(&mut decoder, &mut io::sink())?;

        Ok(Self {
            file: name.display().to_string(),
            level: decoder.level(),
            block_size: decoder.block_size(),
            blocks: decoder.block_crcs().len(),
            block_crcs: decoder
                .block_crcs()
                .iter()
                .map(|crc| format!("{:08x}", crc))
                .collect(),
            stream_crc: format!("{:08x}", decoder.stream_crc()),
            compressed_size,
            uncompressed_size,
            ratio: format_ratio(uncompressed_size, compressed_size),
            compressed_bits: decoder.compressed_bits(),
        })
    }

    fn print(&self) {
        println!("Stream Information");
        println!("==================");
        println!("File: {}", self.file);
        println!("Block size: {} (level {})", self.block_size, self.level);
        println!("Blocks: {}", self.blocks);
        for (i, crc) in self.block_crcs.iter().enumerate() {
            println!("  Block {}: CRC {}", i + 1, crc);
        }
        println!("Stream CRC: {}", self.stream_crc);
        println!();
        println!("Compressed size: {} bytes", self.compressed_size);
        println!("Uncompressed size: {} bytes", self.uncompressed_size);
        println!("Ratio: {}", self.ratio);
    }
}

pub fn cmd_info(
    path: &Path,
    json: bool,
    headerless: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let compressed_size = std::fs::metadata(path)?.len();
    let reader = BufReader::new(File::open(path)?);
    let info = StreamInfo::gather(path, reader, compressed_size, headerless)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        info.print();
    }
    Ok(())
}
