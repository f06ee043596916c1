#[macro_use]
extern crate log;

mod benchmark;
mod chunk_reader;
mod planner;
mod progress_reporter;
mod shared_types;
mod source;

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use tokio::sync::mpsc;

use benchmark::{run_benchmark, BenchmarkConfig};
use planner::OffsetSeed;
use progress_reporter::ProgressReporter;
use shared_types::{
    ByteCount, ReadMode, ShortReadPolicy, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE,
};
use source::FileSource;

const PROGRESS_QUEUE: usize = 1024;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// File to read. A file larger than 100GB is recommended
    #[arg(short, long)]
    file_path: PathBuf,

    /// Offset seed in chunks, reduced modulo 10000. Random when omitted
    #[arg(short, long, default_value = None)]
    offset: Option<u64>,

    /// Read chunks concurrently, each with its own file handle
    #[arg(short, long)]
    parallel: bool,

    /// Bytes per read, clamped to 1024..=262144
    #[arg(short, long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Fail when a chunk comes back short instead of counting missing bytes as zero
    #[arg(long)]
    strict_reads: bool,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,

    /// Log every chunk read at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool, multi: MultiProgress) -> Result<(), Box<dyn Error>> {
    let level = if verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };
    let logger = simplelog::TermLogger::new(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    LogWrapper::new(multi, *logger).try_init()?;
    log::set_max_level(level);
    Ok(())
}

fn clamp_chunk_size(requested: usize) -> usize {
    let chunk_size = requested.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
    if chunk_size != requested {
        warn!("chunk size {requested} out of range, using {chunk_size}");
    }
    chunk_size
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = CliArgs::parse();
    let multi = MultiProgress::new();
    init_logging(args.verbose, multi.clone())?;

    if let Err(e) = run(args, multi).await {
        error!("benchmark failed: {e}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(args: CliArgs, multi: MultiProgress) -> Result<(), Box<dyn Error>> {
    println!("----Storage Benchmark----");
    println!();

    let chunk_size = clamp_chunk_size(args.chunk_size);
    let seed = OffsetSeed::resolve(args.offset, &mut rand::thread_rng());
    let mode = if args.parallel {
        ReadMode::Parallel
    } else {
        ReadMode::Sequential
    };
    let short_reads = if args.strict_reads {
        ShortReadPolicy::Fail
    } else {
        ShortReadPolicy::ZeroFill
    };

    let source = FileSource::new(&args.file_path);
    let config = BenchmarkConfig::for_source(source, chunk_size, seed)?
        .with_mode(mode)
        .with_short_reads(short_reads);
    let chunk_count = config.plan()?.chunk_count();
    info!(
        "{} read of {} chunks from {} ({} bytes), seed {}",
        mode,
        chunk_count,
        args.file_path.display(),
        config.file_length,
        seed.value()
    );
    if chunk_count == 0 {
        warn!("file is smaller than 10000 chunks of {chunk_size} bytes, nothing to read");
    }

    let (progress, reporter) = if args.no_progress || chunk_count == 0 {
        (None, None)
    } else {
        let (tx_progress, rx_progress) = mpsc::channel::<ByteCount>(PROGRESS_QUEUE);
        let total = chunk_count * chunk_size as ByteCount;
        let reporter = ProgressReporter::new(rx_progress, total, multi).spawn();
        (Some(tx_progress), Some(reporter))
    };

    let result = run_benchmark(&config, progress).await?;
    if let Some(reporter) = reporter {
        reporter.await.ok();
    }

    println!("{result}");
    println!(
        "Offset seed: {} Chunks read: {} Bytes read: {} Throughput: {:.1} MB/s",
        result.seed.value(),
        result.chunk_count(),
        result.bytes_read,
        result.throughput_mb_per_sec()
    );

    Ok(())
}
