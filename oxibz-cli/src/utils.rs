//! Utility functions for the CLI.

use dialoguer::Confirm;
use filetime::FileTime;
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use oxibz_bzip2::CompressionLevel;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Suffixes stripped on decompression, with the suffix that replaces them.
const SUFFIXES: [(&str, &str); 4] = [(".bz2", ""), (".bz", ""), (".tbz2", ".tar"), (".tbz", ".tar")];

/// Create a progress bar with standard styling.
pub fn create_progress_bar(len: u64, enable: bool) -> ProgressBar {
    if !enable {
        return ProgressBar::hidden();
    }

    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░ ");

    let pb = ProgressBar::new(len);
    pb.set_style(style);
    pb
}

/// A reader that advances a progress bar by the bytes read through it.
pub struct ProgressReader<R> {
    inner: R,
    bar: ProgressBar,
}

impl<R: Read> ProgressReader<R> {
    pub fn new(inner: R, bar: ProgressBar) -> Self {
        Self { inner, bar }
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bar.inc(n as u64);
        Ok(n)
    }
}

/// Log level for `-v` repetitions, or errors only with `--quiet`.
pub fn log_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Send log output to stderr so `--stdout` data stays clean.
pub fn init_logging(level: LevelFilter) {
    // Fails only if a logger is already installed
    let _ = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );
}

/// Pick the block size from `--level`, `--fast` or `--best`; default 9.
pub fn select_level(level: Option<u8>, fast: bool, best: bool) -> CompressionLevel {
    match (level, fast, best) {
        (Some(level), _, _) => CompressionLevel::new(level),
        (None, true, _) => CompressionLevel::new(1),
        (None, false, true) => CompressionLevel::new(9),
        (None, false, false) => CompressionLevel::default(),
    }
}

/// Whether the file name already carries a compressed suffix.
pub fn has_compressed_suffix(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy().to_ascii_lowercase());
    name.is_some_and(|name| {
        SUFFIXES
            .iter()
            .any(|(suffix, _)| name.len() > suffix.len() && name.ends_with(suffix))
    })
}

/// `FILE` → `FILE.bz2`.
pub fn compressed_name(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".bz2");
    PathBuf::from(name)
}

/// `FILE.bz2`/`FILE.bz` → `FILE`, `FILE.tbz2`/`FILE.tbz` → `FILE.tar`,
/// anything else → `FILE.out`.
pub fn decompressed_name(path: &Path) -> PathBuf {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return append_out(path);
    };
    let lower = name.to_ascii_lowercase();

    for (suffix, replacement) in SUFFIXES {
        if lower.len() > suffix.len() && lower.ends_with(suffix) {
            let stem = &name[..name.len() - suffix.len()];
            return path.with_file_name(format!("{}{}", stem, replacement));
        }
    }

    append_out(path)
}

fn append_out(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".out");
    PathBuf::from(name)
}

/// Whether `output` may be written. Asks on the terminal when it exists and
/// `force` is not set.
pub fn confirm_overwrite(output: &Path, force: bool) -> io::Result<bool> {
    if force || !output.exists() {
        return Ok(true);
    }

    Confirm::new()
        .with_prompt(format!("{} already exists. Overwrite?", output.display()))
        .default(false)
        .interact()
        .map_err(io::Error::other)
}

/// Give `output` the modification time of `input`.
pub fn copy_mtime(input: &Path, output: &Path) -> io::Result<()> {
    let metadata = std::fs::metadata(input)?;
    let mtime = FileTime::from_last_modification_time(&metadata);
    filetime::set_file_mtime(output, mtime)
}

/// Compression ratio as "x.xx:1", or "-" for empty input.
pub fn format_ratio(uncompressed: u64, compressed: u64) -> String {
    if compressed == 0 || uncompressed == 0 {
        return "-".to_string();
    }
    format!("{:.2}:1", uncompressed as f64 / compressed as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(0, false), LevelFilter::Warn);
        assert_eq!(log_level(1, false), LevelFilter::Info);
        assert_eq!(log_level(2, false), LevelFilter::Debug);
        assert_eq!(log_level(5, false), LevelFilter::Trace);
        assert_eq!(log_level(3, true), LevelFilter::Error);
    }

    #[test]
    fn test_select_level() {
        assert_eq!(select_level(None, false, false).level(), 9);
        assert_eq!(select_level(None, true, false).level(), 1);
        assert_eq!(select_level(None, false, true).level(), 9);
        assert_eq!(select_level(Some(4), true, false).level(), 4);
    }

    #[test]
    fn test_compressed_name() {
        assert_eq!(
            compressed_name(Path::new("dir/notes.txt")),
            PathBuf::from("dir/notes.txt.bz2")
        );
    }

    #[test]
    fn test_decompressed_name() {
        assert_eq!(
            decompressed_name(Path::new("notes.txt.bz2")),
            PathBuf::from("notes.txt")
        );
        assert_eq!(decompressed_name(Path::new("data.bz")), PathBuf::from("data"));
        assert_eq!(
            decompressed_name(Path::new("dir/backup.tbz2")),
            PathBuf::from("dir/backup.tar")
        );
        assert_eq!(decompressed_name(Path::new("DATA.BZ2")), PathBuf::from("DATA"));
        assert_eq!(
            decompressed_name(Path::new("archive")),
            PathBuf::from("archive.out")
        );
        // A bare suffix is not stripped to an empty name
        assert_eq!(decompressed_name(Path::new(".bz2")), PathBuf::from(".bz2.out"));
    }

    #[test]
    fn test_has_compressed_suffix() {
        assert!(has_compressed_suffix(Path::new("a.bz2")));
        assert!(has_compressed_suffix(Path::new("a.tbz")));
        assert!(!has_compressed_suffix(Path::new("a.txt")));
        assert!(!has_compressed_suffix(Path::new(".bz2")));
    }

    #[test]
    fn test_format_ratio() {
        assert_eq!(format_ratio(1000, 250), "4.00:1");
        assert_eq!(format_ratio(0, 14), "-");
    }

    #[test]
    fn test_progress_reader_counts() {
        let bar = create_progress_bar(5, false);
        let mut reader = ProgressReader::new(&b"hello"[..], bar.clone());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
        assert_eq!(bar.position(), 5);
    }
}
