//! OxiBz CLI - a Pure Rust bzip2 compressor
//!
//! Compresses, decompresses, tests and inspects `.bz2` files.

mod commands;
mod utils;

use clap::{ArgAction, Args, Parser, Subcommand};
use commands::{
    CompressOptions, DecompressOptions, cmd_compress, cmd_decompress, cmd_info, cmd_test,
};
use std::path::PathBuf;
use utils::{init_logging, log_level, select_level};

#[derive(Parser)]
#[command(name = "oxibz")]
#[command(author, version, about = "OxiBz - Pure Rust bzip2 compressor")]
#[command(long_about = "
OxiBz is a Pure Rust implementation of the bzip2 block-sorting compressor.
Output is readable by the reference bzip2 and vice versa.

Examples:
  oxibz compress notes.txt
  oxibz compress --fast --keep big.log
  oxibz decompress notes.txt.bz2
  oxibz decompress --stdout backup.tbz2 > backup.tar
  oxibz test *.bz2
  oxibz info --json notes.txt.bz2
")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Flags common to commands that write output files.
#[derive(Args, Debug, Clone, Copy)]
struct OutputArgs {
    /// Keep (don't delete) input files
    #[arg(short, long)]
    keep: bool,

    /// Overwrite existing output files without asking
    #[arg(short, long)]
    force: bool,

    /// Write to standard output; input files are kept
    #[arg(short = 'c', long)]
    stdout: bool,

    /// Stream has no leading "BZ" magic
    #[arg(long)]
    headerless: bool,

    /// Show a progress bar
    #[arg(short = 'P', long)]
    progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress files to FILE.bz2
    #[command(alias = "c")]
    Compress {
        /// Files to compress
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Block size in units of 100k (1-9)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=9))]
        level: Option<u8>,

        /// Same as --level 1
        #[arg(long, conflicts_with_all = ["level", "best"])]
        fast: bool,

        /// Same as --level 9
        #[arg(long, conflicts_with = "level")]
        best: bool,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Decompress .bz2 files
    #[command(alias = "d")]
    Decompress {
        /// Files to decompress
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Check the integrity of compressed files
    #[command(alias = "t")]
    Test {
        /// Files to test
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Stream has no leading "BZ" magic
        #[arg(long)]
        headerless: bool,
    },

    /// Show stream information
    #[command(alias = "i")]
    Info {
        /// Compressed file to inspect
        file: PathBuf,

        /// Output as JSON (machine-readable)
        #[arg(short, long)]
        json: bool,

        /// Stream has no leading "BZ" magic
        #[arg(long)]
        headerless: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(log_level(cli.verbose, cli.quiet));

    let result = match cli.command {
        Commands::Compress {
            files,
            level,
            fast,
            best,
            output,
        } => {
            let options = CompressOptions {
                level: select_level(level, fast, best),
                keep: output.keep || output.stdout,
                force: output.force,
                stdout: output.stdout,
                headerless: output.headerless,
                progress: output.progress,
            };
            cmd_compress(&files, &options)
        }
        Commands::Decompress { files, output } => {
            let options = DecompressOptions {
                keep: output.keep || output.stdout,
                force: output.force,
                stdout: output.stdout,
                headerless: output.headerless,
                progress: output.progress,
            };
            cmd_decompress(&files, &options)
        }
        Commands::Test { files, headerless } => cmd_test(&files, headerless, cli.verbose > 0),
        Commands::Info {
            file,
            json,
            headerless,
        } => cmd_info(&file, json, headerless),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
