//! Demo application instrumenting a small multithreaded workload.
//!
//! Run with:
//! ```bash
//! cargo run --example threads --features demo -- --help
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use clap::{Parser, ValueEnum};
use regioni::report::table::{TableRenderer, TableStyle};
use regioni::{Config, Profiler};

/// Table style selection.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum StyleChoice {
    Ascii,
    #[default]
    Rounded,
    Sharp,
    Markdown,
    Blank,
}

impl From<StyleChoice> for TableStyle {
    fn from(choice: StyleChoice) -> Self {
        match choice {
            StyleChoice::Ascii => TableStyle::Ascii,
            StyleChoice::Rounded => TableStyle::Rounded,
            StyleChoice::Sharp => TableStyle::Sharp,
            StyleChoice::Markdown => TableStyle::Markdown,
            StyleChoice::Blank => TableStyle::Blank,
        }
    }
}

/// Demo application for regioni - region based counter instrumentation.
///
/// Every worker thread runs a nested pair of regions, takes intermediate
/// reads, and releases its counters before exiting. The report is written
/// below the output directory and printed as a table.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of worker threads
    #[arg(short, long, default_value = "4")]
    threads: usize,

    /// Region invocations per thread
    #[arg(short, long, default_value = "100")]
    iterations: usize,

    /// Counters to record, e.g. "sys::THREAD_CPU_NS,sys::WALL_NS=instant"
    #[arg(short, long)]
    events: Option<String>,

    /// Parent directory of the measurement directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Rank used for the report file name
    #[arg(long)]
    rank: Option<u32>,

    /// Table style
    #[arg(short, long, value_enum, default_value = "rounded")]
    style: StyleChoice,

    /// Print the JSON report instead of a table
    #[arg(long)]
    json: bool,
}

/// Burns some CPU so the counters have something to show.
fn work(iterations: usize) -> u64 {
    (0..iterations as u64 * 1_000).fold(0u64, |acc, x| acc.wrapping_mul(31).wrapping_add(x))
}

fn run_worker(profiler: &Profiler, index: usize, iterations: usize) -> regioni::Result<u64> {
    let mut checksum = 0;
    for i in 0..iterations {
        profiler.region_begin("compute")?;
        checksum ^= work(index + 1);
        if i % 10 == 0 {
            profiler.read("compute")?;
        }

        profiler.region_begin("inner")?;
        checksum ^= work(1);
        profiler.region_end("inner")?;

        profiler.region_end("compute")?;
    }
    profiler.cleanup_thread()?;
    Ok(checksum)
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(events) = args.events {
        config = config.with_events(events);
    }
    if let Some(output) = args.output {
        config = config.with_output_dir(output);
    }
    if let Some(rank) = args.rank {
        config = config.with_rank(rank);
    }

    let profiler = Arc::new(Profiler::new(config));
    if let Err(e) = profiler.init() {
        eprintln!("init failed: {e}");
        std::process::exit(1);
    }

    profiler.region_begin("main").unwrap();

    let handles: Vec<_> = (0..args.threads)
        .map(|index| {
            let profiler = Arc::clone(&profiler);
            thread::spawn(move || run_worker(&profiler, index, args.iterations))
        })
        .collect();

    for handle in handles {
        match handle.join().unwrap() {
            Ok(checksum) => log::debug!("worker checksum {checksum:#x}"),
            Err(e) => eprintln!("worker failed: {e}"),
        }
    }

    profiler.region_end("main").unwrap();

    let report = profiler.snapshot().unwrap();
    if args.json {
        println!("{}", report.to_json(true).unwrap());
    } else {
        let table = TableRenderer::new()
            .with_style(args.style.into())
            .with_title(format!("{} threads x {} iterations", args.threads, args.iterations))
            .render(&report);
        println!("{table}");
    }

    profiler.print_output().unwrap();
    profiler.finalize().unwrap();
}
