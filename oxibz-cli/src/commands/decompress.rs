//! Decompress command implementation.

use crate::utils::{
    ProgressReader, confirm_overwrite, copy_mtime, create_progress_bar, decompressed_name,
};
use log::{debug, info};
use oxibz_bzip2::{BzDecoder, DecoderOptions};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Options shared by every file of one `decompress` invocation.
#[derive(Debug, Clone, Copy)]
pub struct DecompressOptions {
    pub keep: bool,
    pub force: bool,
    pub stdout: bool,
    pub headerless: bool,
    pub progress: bool,
}

pub fn cmd_decompress(
    files: &[impl AsRef<Path>],
    options: &DecompressOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    for file in files {
        decompress_file(file.as_ref(), options)?;
    }
    Ok(())
}

/// Decode all of `reader` into `writer`; returns the sink and the bytes
/// written.
fn decode<R: Read, W: Write>(
    reader: R,
    mut writer: W,
    options: &DecompressOptions,
) -> Result<(W, u64), Box<dyn std::error::Error>> {
    let decoder_options = DecoderOptions::default().headerless(options.headerless);
    let mut decoder = BzDecoder::with_options(reader, decoder_options)?;
    let total = io::copy(&mut decoder, &mut writer)?;
    debug!(
        "{} blocks, stream CRC {:#010x}",
        decoder.block_crcs().len(),
        decoder.stream_crc()
    );
    writer.flush()?;
    Ok((writer, total))
}

fn write_output<R: Read>(
    reader: R,
    output: &Path,
    options: &DecompressOptions,
) -> Result<u64, Box<dyn std::error::Error>> {
    let file = File::create(output)?;
    let (_, total) = decode(reader, BufWriter::new(file), options)?;
    Ok(total)
}

fn decompress_file(
    input: &Path,
    options: &DecompressOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    if input.is_dir() {
        return Err(format!("{} is a directory", input.display()).into());
    }

    let size = fs::metadata(input)?.len();
    let bar = create_progress_bar(size, options.progress && !options.stdout);
    let reader = BufReader::new(ProgressReader::new(File::open(input)?, bar.clone()));

    if options.stdout {
        let stdout = io::stdout().lock();
        decode(reader, BufWriter::new(stdout), options)?;
        return Ok(());
    }

    let output = decompressed_name(input);
    if !confirm_overwrite(&output, options.force)? {
        info!("{}: not overwritten", output.display());
        return Ok(());
    }

    let result = write_output(reader, &output, options);
    bar.finish_and_clear();

    let total = match result {
        Ok(total) => total,
        Err(e) => {
            // Leave no partial output behind
            let _ = fs::remove_file(&output);
            return Err(format!("{}: {}", input.display(), e).into());
        }
    };

    copy_mtime(input, &output)?;
    info!("{}: {} -> {} bytes", input.display(), size, total);

    if !options.keep {
        fs::remove_file(input)?;
    }
    Ok(())
}
