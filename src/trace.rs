//! # Trace — Binary Telemetry Ring and Drain Thread
//!
//! Each worker owns one trace stream: a fixed-capacity ring of 40-byte
//! records filled by the measurement thread and drained to a `.trc` file by a
//! captive thread, so file I/O for telemetry never sits on the timed path.
//!
//! ## Record layout
//!
//! `{op: u8, tag: [u8; 7], ts: (i64, i64), dur: (i64, i64)}` — 40 bytes,
//! 8-byte aligned, host-native byte order (a trace file never leaves the host
//! that produced it). Timestamps are relative to the worker's benchmark
//! origin, taken right after the start barrier releases.
//!
//! ## Ring protocol
//!
//! The ring holds [`TRACE_ENTRIES`] slots and all cursors are `u16`: the ring
//! size equals the index-type modulus, so wrapping arithmetic *is* the modulo.
//! Three cursors exist:
//!
//! - `next_ent` — producer write position. Private to the producing thread.
//! - `last_flush` — drained-up-to marker (exclusive). Mutated only under the
//!   control mutex.
//! - `next_flush` — inclusive end of the batch to drain. Mutated only under
//!   the control mutex.
//!
//! The producer fills a slot *without* taking the lock, then (every
//! [`FLUSH_BLOCK`] records, i.e. once an 8 KiB chunk fills) takes the mutex,
//! publishes `next_flush` = the index just written, sets the FLUSH request
//! and signals the condvar. The drainer snapshots the request and cursors
//! under the mutex and only ever reads slots in `(last_flush, next_flush]`.
//! The mutex publication is the release/acquire edge that orders the
//! lock-free slot write before the drainer's read — do not reorder "fill
//! slot" and "publish `next_flush`".
//!
//! If the producer laps the drainer, the oldest unflushed entries are
//! silently overwritten; the ring is 65536 deep and flushes every 204
//! records, so that takes a drain thread roughly 320 blocks behind.
//!
//! [`Trace::finish`] publishes EXIT with `next_flush = next_ent − 1`,
//! flushing exactly the records produced before the call (the producer is
//! quiescent by then), and joins the drain thread.

use std::cell::{Cell, UnsafeCell};
use std::fs::File;
use std::io::Write;
use std::ops::RangeInclusive;
use std::path::Path;
use std::ptr;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, error};

/// Ring capacity in records. Must equal `u16::MAX + 1` so cursor wrapping is
/// the ring modulo.
pub const TRACE_ENTRIES: usize = 65536;

/// On-disk size of one record, in bytes.
pub const ENTRY_SIZE: usize = 40;

/// Producer publishes a flush once this many records (one 8 KiB chunk) have
/// accumulated.
pub const FLUSH_BLOCK: usize = 8192 / ENTRY_SIZE;

const _: () = assert!(ENTRY_SIZE % 8 == 0);
const _: () = assert!(TRACE_ENTRIES == u16::MAX as usize + 1);

/// Operation recorded by a trace entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TraceOp {
    Read = 0,
    Write = 1,
    Misc = 2,
}

impl TraceOp {
    /// Render an on-disk op code, tolerating values a newer writer might emit.
    pub fn name(code: u8) -> &'static str {
        match code {
            0 => "READ",
            1 => "WRITE",
            2 => "MISC",
            _ => "UNKNOWN",
        }
    }
}

/// One fixed-size telemetry record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraceEntry {
    pub op: u8,
    pub tag: [u8; 7],
    pub ts_sec: i64,
    pub ts_nsec: i64,
    pub dur_sec: i64,
    pub dur_nsec: i64,
}

impl TraceEntry {
    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut out = [0u8; ENTRY_SIZE];
        out[0] = self.op;
        out[1..8].copy_from_slice(&self.tag);
        out[8..16].copy_from_slice(&self.ts_sec.to_ne_bytes());
        out[16..24].copy_from_slice(&self.ts_nsec.to_ne_bytes());
        out[24..32].copy_from_slice(&self.dur_sec.to_ne_bytes());
        out[32..40].copy_from_slice(&self.dur_nsec.to_ne_bytes());
        out
    }

    pub fn from_bytes(buf: &[u8; ENTRY_SIZE]) -> Self {
        let field = |range: std::ops::Range<usize>| {
            i64::from_ne_bytes(buf[range].try_into().expect("8-byte field"))
        };
        let mut tag = [0u8; 7];
        tag.copy_from_slice(&buf[1..8]);
        TraceEntry {
            op: buf[0],
            tag,
            ts_sec: field(8..16),
            ts_nsec: field(16..24),
            dur_sec: field(24..32),
            dur_nsec: field(32..40),
        }
    }

    /// The tag with NUL padding stripped, lossily decoded.
    pub fn tag_str(&self) -> String {
        let end = self.tag.iter().position(|&b| b == 0).unwrap_or(7);
        String::from_utf8_lossy(&self.tag[..end]).into_owned()
    }
}

fn tag_bytes(tag: &str) -> [u8; 7] {
    let mut out = [0u8; 7];
    let src = tag.as_bytes();
    let n = src.len().min(out.len());
    out[..n].copy_from_slice(&src[..n]);
    out
}

fn timespec(d: Duration) -> (i64, i64) {
    (d.as_secs() as i64, i64::from(d.subsec_nanos()))
}

/// A ring slot. The producer writes slots outside the published flush range
/// without holding the lock; the drainer reads only `(last_flush,
/// next_flush]` after observing the publication under the mutex.
struct Slot(UnsafeCell<TraceEntry>);

// Shared with the drain thread. Soundness rests on the ring protocol above:
// any slot is either producer-side (unpublished) or drainer-side (published),
// and the transition happens under the control mutex.
unsafe impl Sync for Slot {}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Request {
    None,
    Flush,
    Exit,
}

struct Control {
    req: Request,
    last_flush: u16,
    next_flush: u16,
    /// Flush publications so far; diagnostic only.
    flushes: u64,
}

struct Ring {
    slots: Box<[Slot]>,
    ctl: Mutex<Control>,
    cv: Condvar,
}

impl Ring {
    fn new() -> Self {
        let slots: Vec<Slot> = (0..TRACE_ENTRIES)
            .map(|_| Slot(UnsafeCell::new(TraceEntry::default())))
            .collect();
        Ring {
            slots: slots.into_boxed_slice(),
            // Both flush cursors start at the slot "before" index 0, so the
            // inclusive range (last_flush, next_flush] is initially empty.
            ctl: Mutex::new(Control {
                req: Request::None,
                last_flush: u16::MAX,
                next_flush: u16::MAX,
                flushes: 0,
            }),
            cv: Condvar::new(),
        }
    }
}

struct TraceInner {
    ring: Arc<Ring>,
    origin: Instant,
    next_ent: Cell<u16>,
    drain: JoinHandle<Result<()>>,
}

/// Producer handle for one worker's trace stream.
///
/// Created with the worker's benchmark origin; all timestamps recorded
/// through it are deltas from that instant. [`Trace::disabled`] gives a
/// handle that records nothing, for paths that measure without telemetry.
pub struct Trace {
    inner: Option<TraceInner>,
}

impl Trace {
    /// Open `<trace_dir>/<ordinal:x>.trc` and start the drain thread.
    pub fn create(trace_dir: &Path, ordinal: u32, origin: Instant) -> Result<Trace> {
        let path = trace_dir.join(format!("{ordinal:x}.trc"));
        let file = File::create(&path)
            .with_context(|| format!("creating trace file {}", path.display()))?;

        let ring = Arc::new(Ring::new());
        let drain_ring = Arc::clone(&ring);
        let drain = thread::Builder::new()
            .name(format!("trace-drain-{ordinal:x}"))
            .spawn(move || {
                let result = drain_loop(&drain_ring, file);
                if let Err(err) = &result {
                    // Best-effort telemetry: the producer is not interrupted.
                    error!("trace drain terminated: {err:#}");
                }
                result
            })
            .context("spawning trace drain thread")?;

        debug!(trace = %path.display(), "trace stream open");
        Ok(Trace {
            inner: Some(TraceInner {
                ring,
                origin,
                next_ent: Cell::new(0),
                drain,
            }),
        })
    }

    /// A handle that drops every record. Useful where the storage path runs
    /// without telemetry (setup probes, unit tests).
    pub fn disabled() -> Trace {
        Trace { inner: None }
    }

    /// Record one entry. `start` is the operation's wall-clock start,
    /// `duration` its elapsed time; the tag is truncated to seven bytes.
    pub fn record(&self, op: TraceOp, start: Instant, duration: Duration, tag: &str) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        let (ts_sec, ts_nsec) = timespec(start.saturating_duration_since(inner.origin));
        let (dur_sec, dur_nsec) = timespec(duration);
        let entry = TraceEntry {
            op: op as u8,
            tag: tag_bytes(tag),
            ts_sec,
            ts_nsec,
            dur_sec,
            dur_nsec,
        };

        let idx = inner.next_ent.get();
        // Slot fill happens outside the lock. The drainer cannot look at this
        // slot until the publication below, which the mutex orders after the
        // write.
        unsafe { ptr::write(inner.ring.slots[idx as usize].0.get(), entry) };
        let next = idx.wrapping_add(1);
        inner.next_ent.set(next);

        if next as usize % FLUSH_BLOCK == 0 {
            let mut ctl = inner.ring.ctl.lock().unwrap();
            ctl.next_flush = idx;
            ctl.req = Request::Flush;
            ctl.flushes += 1;
            inner.ring.cv.notify_one();
        }
    }

    /// Record a write IOP.
    pub fn write(&self, start: Instant, duration: Duration) {
        self.record(TraceOp::Write, start, duration, "");
    }

    /// Record a read IOP.
    pub fn read(&self, start: Instant, duration: Duration) {
        self.record(TraceOp::Read, start, duration, "");
    }

    /// Record a tagged marker with no duration, timestamped now.
    pub fn misc(&self, tag: &str) {
        self.record(TraceOp::Misc, Instant::now(), Duration::ZERO, tag);
    }

    /// Flush publications so far (diagnostic).
    pub fn flush_signals(&self) -> u64 {
        match &self.inner {
            Some(inner) => inner.ring.ctl.lock().unwrap().flushes,
            None => 0,
        }
    }

    /// Flush everything recorded so far and join the drain thread. Records
    /// produced before this call are on disk when it returns.
    pub fn finish(mut self) -> Result<()> {
        match self.inner.take() {
            Some(inner) => shutdown(inner),
            None => Ok(()),
        }
    }
}

impl Drop for Trace {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            if let Err(err) = shutdown(inner) {
                error!("trace shutdown: {err:#}");
            }
        }
    }
}

fn shutdown(inner: TraceInner) -> Result<()> {
    {
        let mut ctl = inner.ring.ctl.lock().unwrap();
        ctl.next_flush = inner.next_ent.get().wrapping_sub(1);
        ctl.req = Request::Exit;
        inner.ring.cv.notify_one();
    }
    inner
        .drain
        .join()
        .map_err(|_| anyhow!("trace drain thread panicked"))?
}

/// The contiguous slot spans covered by the inclusive range
/// `(last_flush, next_flush]`, in flush order: the tail of the ring first,
/// then the head when the range wraps. `None` when the range is empty.
fn flush_spans(
    last_flush: u16,
    next_flush: u16,
) -> Option<(RangeInclusive<usize>, Option<RangeInclusive<usize>>)> {
    if next_flush == last_flush {
        return None;
    }
    let first = last_flush.wrapping_add(1);
    if first <= next_flush {
        Some((first as usize..=next_flush as usize, None))
    } else {
        Some((
            first as usize..=u16::MAX as usize,
            Some(0..=next_flush as usize),
        ))
    }
}

fn drain_loop(ring: &Ring, mut file: File) -> Result<()> {
    let mut chunk: Vec<u8> = Vec::with_capacity(FLUSH_BLOCK * ENTRY_SIZE);
    loop {
        let (req, last_flush, next_flush) = {
            let mut ctl = ring.ctl.lock().unwrap();
            while ctl.req == Request::None {
                ctl = ring.cv.wait(ctl).unwrap();
            }
            let snapshot = (ctl.req, ctl.last_flush, ctl.next_flush);
            ctl.req = Request::None;
            snapshot
        };

        if let Some((tail, head)) = flush_spans(last_flush, next_flush) {
            write_span(ring, &mut file, &mut chunk, tail)?;
            if let Some(head) = head {
                write_span(ring, &mut file, &mut chunk, head)?;
            }
            ring.ctl.lock().unwrap().last_flush = next_flush;
        }

        if req == Request::Exit {
            return Ok(());
        }
    }
}

fn write_span(
    ring: &Ring,
    file: &mut File,
    chunk: &mut Vec<u8>,
    span: RangeInclusive<usize>,
) -> Result<()> {
    chunk.clear();
    for i in span {
        // Published slots: the producer will not touch these again until
        // last_flush moves past them.
        let entry = unsafe { ptr::read(ring.slots[i].0.get()) };
        chunk.extend_from_slice(&entry.to_bytes());
    }
    file.write_all(chunk).context("writing trace records")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn read_entries(path: &Path) -> Vec<TraceEntry> {
        let bytes = fs::read(path).unwrap();
        assert_eq!(bytes.len() % ENTRY_SIZE, 0, "trace file has a partial record");
        bytes
            .chunks_exact(ENTRY_SIZE)
            .map(|c| TraceEntry::from_bytes(c.try_into().unwrap()))
            .collect()
    }

    /// M records in, M records out, in production order — across no-flush,
    /// exact-block, and straddling-block record counts.
    #[test]
    fn records_survive_in_order() {
        for m in [0usize, 1, 10, FLUSH_BLOCK - 1, FLUSH_BLOCK, FLUSH_BLOCK + 1, 1000] {
            let dir = tempfile::tempdir().unwrap();
            let origin = Instant::now();
            let trace = Trace::create(dir.path(), 0, origin).unwrap();
            for i in 0..m {
                // Encode the production index in the duration for ordering
                // checks.
                trace.record(
                    TraceOp::Misc,
                    origin,
                    Duration::from_nanos(i as u64),
                    "order",
                );
            }
            trace.finish().unwrap();

            let entries = read_entries(&dir.path().join("0.trc"));
            assert_eq!(entries.len(), m, "M = {m}");
            for (i, e) in entries.iter().enumerate() {
                assert_eq!(e.op, TraceOp::Misc as u8);
                assert_eq!(e.dur_nsec, i as i64, "record {i} out of order (M = {m})");
                assert_eq!(e.tag_str(), "order");
            }
        }
    }

    /// Exactly k flush signals for BLOCK * k records.
    #[test]
    fn one_flush_signal_per_block() {
        let dir = tempfile::tempdir().unwrap();
        let origin = Instant::now();
        let trace = Trace::create(dir.path(), 1, origin).unwrap();
        let k = 3;
        for _ in 0..FLUSH_BLOCK * k {
            trace.record(TraceOp::Write, origin, Duration::ZERO, "");
        }
        assert_eq!(trace.flush_signals(), k as u64);
        trace.finish().unwrap();
        assert_eq!(
            fs::read(dir.path().join("1.trc")).unwrap().len(),
            FLUSH_BLOCK * k * ENTRY_SIZE
        );
    }

    /// Round-trip of the record encoding, including tag truncation and NUL
    /// padding.
    #[test]
    fn entry_encoding_roundtrip() {
        let entry = TraceEntry {
            op: TraceOp::Read as u8,
            tag: tag_bytes("longer-than-seven"),
            ts_sec: 12,
            ts_nsec: 345_678_901,
            dur_sec: 0,
            dur_nsec: 42,
        };
        let decoded = TraceEntry::from_bytes(&entry.to_bytes());
        assert_eq!(decoded, entry);
        assert_eq!(decoded.tag_str(), "longer-");

        let short = TraceEntry {
            tag: tag_bytes("abc"),
            ..TraceEntry::default()
        };
        assert_eq!(short.tag, [b'a', b'b', b'c', 0, 0, 0, 0]);
        assert_eq!(short.tag_str(), "abc");
    }

    /// Span arithmetic for the inclusive flush range, with and without
    /// wrap-around.
    #[test]
    fn flush_span_arithmetic() {
        // Empty.
        assert!(flush_spans(5, 5).is_none());
        assert!(flush_spans(u16::MAX, u16::MAX).is_none());

        // First batch after startup: (65535, 203] = [0, 203].
        let (tail, head) = flush_spans(u16::MAX, 203).unwrap();
        assert_eq!(tail, 0..=203);
        assert!(head.is_none());

        // Plain interior batch.
        let (tail, head) = flush_spans(203, 407).unwrap();
        assert_eq!(tail, 204..=407);
        assert!(head.is_none());

        // Wrapping batch: (65483, 151] splits into the ring tail then head.
        let (tail, head) = flush_spans(65483, 151).unwrap();
        assert_eq!(tail, 65484..=65535);
        assert_eq!(head.unwrap(), 0..=151);
    }

    /// A full wrap of the producer cursor: more records than the ring holds
    /// still land on disk in order while the drainer keeps up.
    #[test]
    fn cursor_wrap_preserves_stream() {
        let dir = tempfile::tempdir().unwrap();
        let origin = Instant::now();
        let trace = Trace::create(dir.path(), 2, origin).unwrap();
        let m = TRACE_ENTRIES + 3 * FLUSH_BLOCK;
        for i in 0..m {
            trace.record(
                TraceOp::Write,
                origin,
                Duration::from_nanos(i as u64),
                "",
            );
            // Wait for the drainer at each block boundary so the producer
            // never laps it; lapping is legal but forfeits the oldest
            // records, which this test asserts against.
            let produced = trace.inner.as_ref().unwrap().next_ent.get();
            if produced as usize % FLUSH_BLOCK == 0 {
                let ring = &trace.inner.as_ref().unwrap().ring;
                let target = produced.wrapping_sub(1);
                while ring.ctl.lock().unwrap().last_flush != target {
                    std::thread::yield_now();
                }
            }
        }
        trace.finish().unwrap();

        let entries = read_entries(&dir.path().join("2.trc"));
        assert_eq!(entries.len(), m);
        for (i, e) in entries.iter().enumerate() {
            assert_eq!(e.dur_nsec, i as i64, "record {i} out of order after wrap");
        }
    }

    /// A disabled handle records nothing and finishes cleanly.
    #[test]
    fn disabled_handle_is_inert() {
        let trace = Trace::disabled();
        trace.write(Instant::now(), Duration::ZERO);
        trace.misc("noop");
        assert_eq!(trace.flush_signals(), 0);
        trace.finish().unwrap();
    }

    /// Trace creation fails cleanly when the directory cannot take the file.
    #[test]
    fn unwritable_dir_fails_creation() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("not-a-dir.txt");
        fs::write(&bogus, b"file, not dir").unwrap();
        assert!(Trace::create(&bogus, 0, Instant::now()).is_err());
    }
}
