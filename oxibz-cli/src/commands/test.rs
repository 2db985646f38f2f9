//! Test command implementation.

use oxibz_bzip2::{BzDecoder, DecoderOptions};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

/// Decode one file to nowhere; returns the uncompressed size.
fn test_file(path: &Path, headerless: bool) -> Result<u64, Box<dyn std::error::Error>> {
    let reader = BufReader::new(File::open(path)?);
    let options = DecoderOptions::default().headerless(headerless);
    let mut decoder = BzDecoder::with_options(reader, options)?;
    let total = io::copy(&mut decoder, &mut io::sink())?;
    Ok(total)
}

pub fn cmd_test(
    files: &[impl AsRef<Path>],
    headerless: bool,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut failed = 0usize;

    for file in files {
        let path = file.as_ref();
        match test_file(path, headerless) {
            Ok(total) => {
                if verbose {
                    println!("{}: OK ({} bytes)", path.display(), total);
                } else {
                    println!("{}: OK", path.display());
                }
            }
            Err(e) => {
                println!("{}: FAILED: {}", path.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(format!("{} of {} files failed", failed, files.len()).into());
    }
    Ok(())
}
