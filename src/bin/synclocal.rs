use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use regex::Regex;

use dirsync::cli::parse_regex;
use dirsync::local_sync::{self, SyncOptions};
use dirsync::logger::{NoopLogger, SyncLogger, TextLogger};

/// Directory synchronize utility
#[derive(Parser, Debug)]
#[command(about = "directory synchronize utility")]
struct Args {
    /// Path to the files database
    #[arg(short, long, default_value = "./.syncfiles.db")]
    filedb: PathBuf,

    /// Number of jobs (-1 = half the cores)
    #[arg(short, long, default_value_t = -1)]
    job: i64,

    /// Source files path
    #[arg(short, long, default_value = ".")]
    src: PathBuf,

    /// Destination files path
    #[arg(short, long, default_value = ".")]
    dst: PathBuf,

    /// Compare modification times instead of content hashes
    #[arg(short, long)]
    time: bool,

    /// Check only; report what would be copied
    #[arg(short, long)]
    check: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Exclusion pattern for source files
    #[arg(short, long, value_parser = parse_regex)]
    pattern: Option<Regex>,

    /// Append a sync log to this file
    #[arg(long)]
    log: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let logger: Box<dyn SyncLogger> = match &args.log {
        Some(path) => Box::new(TextLogger::new(path)?),
        None => Box::new(NoopLogger),
    };

    let start = Instant::now();
    let stats = local_sync::run(
        &SyncOptions {
            src: args.src,
            dst: args.dst,
            filedb: args.filedb,
            jobs: args.job,
            use_timestamp: args.time,
            check_only: args.check,
            verbose: args.verbose,
            exclude: args.pattern,
        },
        logger,
    )?;

    let elapsed = start.elapsed();
    println!("=== Sync Complete ===");
    println!("Files checked: {}", stats.checked);
    println!("Files copied: {}", stats.copied);
    println!("Time: {:.2}s", elapsed.as_secs_f64());
    if stats.errors > 0 {
        eprintln!("Errors encountered: {}", stats.errors);
    }
    Ok(())
}
