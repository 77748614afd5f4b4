//! # CLI Execution Functions
//!
//! Extracted from `main.rs` to keep the entry point slim: the benchmark
//! runner (supervisor dispatch, summary reporting) and the trace formatter.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use scatterbench::supervisor::{self, RunConfig};
use scatterbench::tracefmt::{self, OutputMode};

/// Execute a benchmark run and report the outcome. The process exit status
/// is the supervisor's verdict: workload-level errors are part of the
/// summary, not the exit code.
pub fn run_bench(cfg: RunConfig, summary_json: Option<&Path>) -> Result<()> {
    let summary = supervisor::run(cfg)?;

    // One machine-greppable line on stdout; the log stream stays on stderr.
    println!(
        "workers={} written={} read={} write_errors={} read_errors={} invalid={} elapsed={:.3}s",
        summary.workers.len(),
        summary.objects_written,
        summary.objects_read,
        summary.write_errors,
        summary.read_errors,
        summary.invalid,
        summary.elapsed_secs
    );

    if let Some(path) = summary_json {
        let json = serde_json::to_string_pretty(&summary).context("encoding run summary")?;
        fs::write(path, json)
            .with_context(|| format!("writing summary to {}", path.display()))?;
        info!(summary = %path.display(), "run summary written");
    }

    Ok(())
}

/// Render a trace file to stdout.
pub fn run_fmt(file: &Path, csv: bool) -> Result<()> {
    let mode = if csv { OutputMode::Csv } else { OutputMode::Text };
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let count = tracefmt::render(file, mode, &mut out)?;
    out.flush().context("flushing output")?;
    info!(records = count, "trace rendered");
    Ok(())
}
