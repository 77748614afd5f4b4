//! # Tracefmt — Offline Trace Rendering
//!
//! Reads a `.trc` stream of fixed-size binary records and renders it for
//! humans or spreadsheets. This is post-mortem tooling: it runs on the host
//! that produced the trace (records are host-native byte order) but never
//! during a benchmark.
//!
//! Text output:
//!
//! ```text
//! timestamp:0.6017, duration:0.5614, operation:WRITE, tag:
//! ```
//!
//! CSV output is `sec.nsec,sec.nsec,OP,TAG` in the same field order.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use crate::trace::{TraceEntry, TraceOp, ENTRY_SIZE};

/// Rendering style.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Csv,
}

/// Render every record in `path` to `out`. Returns the record count. A
/// trailing partial record is reported and skipped rather than treated as
/// corruption — a crashed worker can leave one.
pub fn render(path: &Path, mode: OutputMode, out: &mut dyn Write) -> Result<u64> {
    let file =
        File::open(path).with_context(|| format!("opening trace file {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut count = 0u64;
    loop {
        let mut record = [0u8; ENTRY_SIZE];
        match read_record(&mut reader, &mut record)? {
            RecordRead::Complete => {}
            RecordRead::End => break,
            RecordRead::Partial(n) => {
                warn!(
                    "{}: {n} trailing bytes do not form a whole record; ignored",
                    path.display()
                );
                break;
            }
        }

        let entry = TraceEntry::from_bytes(&record);
        match mode {
            OutputMode::Text => writeln!(
                out,
                "timestamp:{}.{}, duration:{}.{}, operation:{}, tag:{}",
                entry.ts_sec,
                entry.ts_nsec,
                entry.dur_sec,
                entry.dur_nsec,
                TraceOp::name(entry.op),
                entry.tag_str()
            )?,
            OutputMode::Csv => writeln!(
                out,
                "{}.{},{}.{},{},{}",
                entry.ts_sec,
                entry.ts_nsec,
                entry.dur_sec,
                entry.dur_nsec,
                TraceOp::name(entry.op),
                entry.tag_str()
            )?,
        }
        count += 1;
    }

    Ok(count)
}

enum RecordRead {
    Complete,
    End,
    Partial(usize),
}

/// Fill one record from the reader, distinguishing clean EOF from a torn
/// final record.
fn read_record(reader: &mut dyn Read, record: &mut [u8; ENTRY_SIZE]) -> Result<RecordRead> {
    let mut filled = 0;
    while filled < ENTRY_SIZE {
        let n = reader
            .read(&mut record[filled..])
            .context("reading trace records")?;
        if n == 0 {
            return Ok(match filled {
                0 => RecordRead::End,
                torn => RecordRead::Partial(torn),
            });
        }
        filled += n;
    }
    Ok(RecordRead::Complete)
}
