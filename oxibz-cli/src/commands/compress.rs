//! Compress command implementation.

use crate::utils::{
    ProgressReader, compressed_name, confirm_overwrite, copy_mtime, create_progress_bar,
    format_ratio, has_compressed_suffix,
};
use log::{info, warn};
use oxibz_bzip2::{BzEncoder, CompressionLevel, EncoderOptions};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Options shared by every file of one `compress` invocation.
#[derive(Debug, Clone, Copy)]
pub struct CompressOptions {
    pub level: CompressionLevel,
    pub keep: bool,
    pub force: bool,
    pub stdout: bool,
    pub headerless: bool,
    pub progress: bool,
}

impl CompressOptions {
    fn encoder_options(&self) -> EncoderOptions {
        EncoderOptions::new(self.level).headerless(self.headerless)
    }
}

pub fn cmd_compress(
    files: &[impl AsRef<Path>],
    options: &CompressOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    for file in files {
        compress_file(file.as_ref(), options)?;
    }
    Ok(())
}

/// Compress `reader` into `writer`; returns the sink and the bytes read.
fn encode<R: Read, W: Write>(
    mut reader: R,
    writer: W,
    options: &CompressOptions,
) -> Result<(W, u64), Box<dyn std::error::Error>> {
    let mut encoder = BzEncoder::with_options(writer, options.encoder_options());
    let total = io::copy(&mut reader, &mut encoder)?;
    encoder.try_finish()?;
    info!(
        "{} blocks, stream CRC {:#010x}",
        encoder.blocks_written(),
        encoder.stream_crc()
    );
    let writer = encoder.finish()?;
    Ok((writer, total))
}

fn write_output<R: Read>(
    reader: R,
    output: &Path,
    options: &CompressOptions,
) -> Result<u64, Box<dyn std::error::Error>> {
    let file = File::create(output)?;
    let (mut writer, total) = encode(reader, BufWriter::new(file), options)?;
    writer.flush()?;
    Ok(total)
}

fn compress_file(input: &Path, options: &CompressOptions) -> Result<(), Box<dyn std::error::Error>> {
    if input.is_dir() {
        return Err(format!("{} is a directory", input.display()).into());
    }
    if has_compressed_suffix(input) && !options.force {
        warn!(
            "{}: already has a compressed suffix, skipping (use --force)",
            input.display()
        );
        return Ok(());
    }

    let size = fs::metadata(input)?.len();
    let bar = create_progress_bar(size, options.progress && !options.stdout);
    let reader = ProgressReader::new(BufReader::new(File::open(input)?), bar.clone());

    if options.stdout {
        let stdout = io::stdout().lock();
        let (mut writer, _) = encode(reader, BufWriter::new(stdout), options)?;
        writer.flush()?;
        return Ok(());
    }

    let output = compressed_name(input);
    if !confirm_overwrite(&output, options.force)? {
        info!("{}: not overwritten", output.display());
        return Ok(());
    }

    let result = write_output(reader, &output, options);
    bar.finish_and_clear();

    let total = match result {
        Ok(total) => total,
        Err(e) => {
            // Leave no truncated output behind
            let _ = fs::remove_file(&output);
            return Err(e);
        }
    };

    copy_mtime(input, &output)?;

    let compressed = fs::metadata(&output)?.len();
    info!(
        "{}: {} -> {} bytes ({})",
        input.display(),
        total,
        compressed,
        format_ratio(total, compressed)
    );

    if !options.keep {
        fs::remove_file(input)?;
    }
    Ok(())
}
