//! # Supervisor — Run Orchestration
//!
//! Owns a benchmark run end to end: validates the configuration, claims the
//! workspace (exclusively — an existing workspace refuses the run before any
//! worker launches), builds the N + 1 start barrier, spawns the workers,
//! joins the rendezvous as the final participant, then reaps and aggregates.
//!
//! ## Failure policy
//!
//! Infrastructure failures are fatal: a workspace that cannot be claimed, a
//! worker that cannot open its trace stream, a worker that panics. Workload
//! failures are data: per-operation I/O errors and validation mismatches are
//! counted in the [`RunSummary`] and leave the exit status untouched. One
//! worker's failure never interrupts the others; they are all joined before
//! the verdict.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::barrier::Barrier;
use crate::prng::PrngKind;
use crate::sample::SampleKind;
use crate::storage::StoreKind;
use crate::worker::{self, WorkerReport};

/// Everything a run needs, resolved from the CLI before anything starts.
#[derive(Clone, Debug, Serialize)]
pub struct RunConfig {
    pub prng: PrngKind,
    pub sample: SampleKind,
    pub storage: StoreKind,
    /// Workload seed; 0 derives a per-worker seed from the clock.
    pub seed: u32,
    pub workspace: String,
    pub trace_dir: PathBuf,
    pub write_count: u64,
    pub read_count: u64,
    pub parallel: u32,
    /// Forwarded verbatim to the backend.
    pub backend_args: Vec<String>,
}

/// Aggregated outcome of a run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub config: RunConfig,
    pub workers: Vec<WorkerReport>,
    pub objects_written: u64,
    pub objects_read: u64,
    pub write_errors: u64,
    pub read_errors: u64,
    pub invalid: u64,
}

/// Execute a full benchmark run. Returns the summary on clean completion;
/// an error when setup fails or any worker fails infrastructure-side.
pub fn run(cfg: RunConfig) -> Result<RunSummary> {
    ensure!(cfg.parallel >= 1, "at least one worker is required");
    ensure!(
        cfg.write_count > 0 || cfg.read_count == 0,
        "a read phase needs written objects: write count is 0 but read count is {}",
        cfg.read_count
    );

    let started_at = Utc::now();

    // The trace directory is created opportunistically; if this fails the
    // workers surface the real error when they open their streams.
    let _ = fs::create_dir_all(&cfg.trace_dir);

    // Exclusive workspace claim, before any worker exists.
    let store = cfg
        .storage
        .create(&cfg.workspace, &cfg.backend_args)
        .context("storage setup")?;
    let store: Arc<dyn crate::storage::ObjectStore> = Arc::from(store);

    info!(
        workers = cfg.parallel,
        writes = cfg.write_count,
        reads = cfg.read_count,
        storage = ?cfg.storage,
        prng = ?cfg.prng,
        "starting benchmark"
    );

    // Workers plus the supervisor: the supervisor's own arrival below is the
    // one that starts the measured run.
    let barrier = Barrier::new(cfg.parallel as usize + 1);
    let cfg = Arc::new(cfg);

    let mut handles = Vec::with_capacity(cfg.parallel as usize);
    for ordinal in 0..cfg.parallel {
        let cfg = Arc::clone(&cfg);
        let store = Arc::clone(&store);
        let barrier = barrier.clone();
        let handle = thread::Builder::new()
            .name(format!("worker-{ordinal:x}"))
            .spawn(move || worker::run(&cfg, ordinal, store.as_ref(), &barrier))
            .with_context(|| format!("launching worker {ordinal}"))?;
        handles.push(handle);
    }

    barrier.wait();
    let bench_start = Instant::now();

    let mut workers = Vec::with_capacity(handles.len());
    let mut failed = 0u32;
    for (ordinal, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(report)) => workers.push(report),
            Ok(Err(err)) => {
                failed += 1;
                error!("worker {ordinal} failed: {err:#}");
            }
            Err(_) => {
                failed += 1;
                error!("worker {ordinal} panicked");
            }
        }
    }
    let elapsed_secs = bench_start.elapsed().as_secs_f64();

    store.destroy().context("workspace teardown")?;

    ensure!(
        failed == 0,
        "{failed} of {} workers failed",
        cfg.parallel
    );

    let summary = RunSummary {
        started_at,
        elapsed_secs,
        objects_written: workers.iter().map(|w| w.written).sum(),
        objects_read: workers.iter().map(|w| w.read).sum(),
        write_errors: workers.iter().map(|w| w.write_errors).sum(),
        read_errors: workers.iter().map(|w| w.read_errors).sum(),
        invalid: workers.iter().map(|w| w.invalid).sum(),
        workers,
        config: Arc::try_unwrap(cfg).unwrap_or_else(|shared| (*shared).clone()),
    };

    info!(
        written = summary.objects_written,
        read = summary.objects_read,
        write_errors = summary.write_errors,
        read_errors = summary.read_errors,
        invalid = summary.invalid,
        "benchmark complete in {:.2}s",
        summary.elapsed_secs
    );

    Ok(summary)
}
