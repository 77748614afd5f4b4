//! # Scatterbench — Core Library
//!
//! A storage micro-benchmark harness for scattered small-object I/O: many
//! parallel client tasks write, then read back and validate, large numbers of
//! small independently-addressed objects against a pluggable backend, while a
//! per-worker trace pipeline emits fixed-size binary latency records for
//! post-hoc analysis.
//!
//! ## Module Organization
//!
//! **Workload modules** (deterministic stimulus generation):
//! - [`prng`] — Seedable, peekable 32-bit generators (counting debug sequence
//!   and Marsaglia's xorwow)
//! - [`sample`] — Variable-length payloads derived from a PRNG, with
//!   round-trip validation
//!
//! **Infrastructure modules** (storage, coordination, telemetry):
//! - [`storage`] — Pluggable object stores keyed by `(client_id, obj_id)`:
//!   flat-directory debug backend and the hierarchical dirtree backend
//! - [`barrier`] — N-party start rendezvous so all workers begin measuring
//!   simultaneously
//! - [`trace`] — Fixed-capacity trace ring drained to disk by a captive
//!   thread, one 40-byte record per I/O
//! - [`tracefmt`] — Offline rendering of `.trc` streams as text or CSV
//! - [`worker`], [`supervisor`] — Thread-per-client workload execution and
//!   run orchestration
//!
//! ## Design Philosophy
//!
//! Everything the workload does is reproducible from a single 32-bit seed:
//! object names are PRNG peeks, payload lengths and contents are PRNG draws,
//! and read-back validation replays the same draw sequence. The measured
//! variable is the backend layout (flat vs. hierarchical); the harness itself
//! stays out of the way — slot writes into the trace ring are lock-free and
//! the drain thread owns all file I/O.

pub mod barrier;
pub mod prng;
pub mod sample;
pub mod storage;
pub mod supervisor;
pub mod trace;
pub mod tracefmt;
pub mod worker;
