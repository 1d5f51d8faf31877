#[macro_use]
extern crate log;

mod address;
mod aggregator;
mod compact_set;
mod error;
mod planner;
mod progress_reporter;
mod scanner;
mod shared_types;

use std::error::Error;
use std::io::ErrorKind;
use std::num::NonZeroU64;
use std::path::PathBuf;

use aggregator::{count_unique, count_unique_with_progress, CountPreferences};
use clap::Parser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use log::SetLoggerError;
use simplelog::{ColorChoice, LevelFilter, TermLogger, TerminalMode};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Path to the file containing IP addresses, one per line
    #[arg(short, long, default_value = "ips.txt")]
    file: PathBuf,

    /// Bytes per scan chunk; each chunk is scanned on its own task
    #[arg(short, long, default_value_t = default_chunk_size())]
    chunk_size: NonZeroU64,

    /// Show a progress bar on stderr
    #[arg(short, long)]
    progress: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn default_chunk_size() -> NonZeroU64 {
    NonZeroU64::new(planner::DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroU64::MIN)
}

fn init_logging(verbose: u8, multi: MultiProgress) -> Result<(), SetLoggerError> {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    let logger = TermLogger::new(
        level,
        simplelog::Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );
    LogWrapper::new(multi, *logger).try_init()?;
    log::set_max_level(level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = CliArgs::parse();
    let multi = MultiProgress::new();
    init_logging(args.verbose, multi.clone())?;

    if let Err(e) = tokio::fs::metadata(&args.file).await {
        if e.kind() == ErrorKind::NotFound {
            println!("File {} does not exist", args.file.display());
            return Ok(());
        }
    }

    println!(
        "Processing {} to count unique IP addresses...",
        args.file.display()
    );

    let specs = CountPreferences {
        path: args.file,
        chunk_size: args.chunk_size,
    };
    let result = if args.progress {
        count_unique_with_progress(specs, Some(multi)).await
    } else {
        count_unique(specs).await
    };

    match result {
        Ok(summary) => {
            if summary.degraded_chunks > 0 {
                println!(
                    "Warning: {} of {} chunks could not be fully read; the count may be low",
                    summary.degraded_chunks, summary.chunks
                );
            }
            println!("Total unique IPv4 addresses: {}", summary.unique);
        }
        Err(e) => println!("Error: {e}"),
    }

    Ok(())
}
