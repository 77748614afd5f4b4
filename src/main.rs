//! # Main — CLI Entry Point
//!
//! Parses the command line, initialises logging, and routes to the runners in
//! [`cli`]: `run` drives a benchmark, `fmt` renders a binary trace file.
//!
//! ## Global Options
//!
//! - `-v`/`-vv`: raise log verbosity to debug/trace (overridden by `RUST_LOG`).
//! - `LOG_FORMAT=json`: JSON log output for machine collection.
//! - `.env` files are honoured before parsing, so workspace and trace paths
//!   can live in per-host environment files.

mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use scatterbench::prng::PrngKind;
use scatterbench::sample::SampleKind;
use scatterbench::storage::StoreKind;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(
    name = "scatterbench",
    about = "Measure object-store throughput and latency under scattered small-object I/O"
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the write-then-read benchmark workload
    Run {
        /// Random number generator driving the workload
        #[arg(long, value_enum, default_value_t = PrngKind::Debug)]
        prng: PrngKind,

        /// Workload seed (0 derives per-worker seeds from the clock)
        #[arg(long, default_value_t = 0)]
        seed: u32,

        /// Payload flavour
        #[arg(long, value_enum, default_value_t = SampleKind::Debug)]
        sample: SampleKind,

        /// Storage backend under test
        #[arg(long, value_enum, default_value_t = StoreKind::Debug)]
        storage: StoreKind,

        /// Backend workspace (a directory path for filesystem backends);
        /// must not already exist
        #[arg(long, env = "SCATTERBENCH_WORKSPACE")]
        workspace: String,

        /// Directory receiving one <ordinal>.trc file per worker
        #[arg(long, env = "SCATTERBENCH_TRACE_DIR", default_value = ".")]
        trace_dir: PathBuf,

        /// Objects each worker writes
        #[arg(long, default_value_t = 10)]
        write_count: u64,

        /// Objects each worker reads back (cycling over what it wrote)
        #[arg(long, default_value_t = 10)]
        read_count: u64,

        /// Number of parallel workers
        #[arg(long, default_value_t = 1)]
        parallel: u32,

        /// Write the run summary as JSON to this path
        #[arg(long)]
        summary_json: Option<PathBuf>,

        /// Remaining arguments are forwarded verbatim to the backend
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        backend_args: Vec<String>,
    },

    /// Render a binary trace file as text or CSV
    Fmt {
        /// Output CSV (sec.nsec,sec.nsec,OP,TAG) instead of text
        #[arg(short, long)]
        csv: bool,

        /// Trace file to render
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Structured logging: LOG_FORMAT=json for collectors, human-readable to
    // stderr otherwise. RUST_LOG wins over the -v counter when set.
    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Run {
            prng,
            seed,
            sample,
            storage,
            workspace,
            trace_dir,
            write_count,
            read_count,
            parallel,
            summary_json,
            backend_args,
        } => cli::run_bench(
            scatterbench::supervisor::RunConfig {
                prng,
                sample,
                storage,
                seed,
                workspace,
                trace_dir,
                write_count,
                read_count,
                parallel,
                backend_args,
            },
            summary_json.as_deref(),
        ),
        Commands::Fmt { csv, file } => cli::run_fmt(&file, csv),
    }
}
