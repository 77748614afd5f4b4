//! # Sample — Verifiable Pseudo-Random Payloads
//!
//! A sample is the unit of data the benchmark writes and reads back: a
//! variable-length octet payload whose length and contents are both derived
//! from a [`Prng`], so a reader holding only the seed can regenerate the
//! exact bytes and validate what the storage backend returned.
//!
//! The backing buffer is allocated once at [`SAMPLE_LEN_MAX`] and retained
//! across re-initialisation, so a worker reuses a single sample object for
//! its entire run.
//!
//! ## Derivation
//!
//! Length is `next() mod (L_max − L_min) + L_min` with `L_min = L_max / 2`.
//! The payload is consecutive PRNG outputs laid down as little-endian 32-bit
//! words; when the length is not word-aligned one further word is drawn and
//! its trailing bytes discarded. Validation replays the identical draw
//! sequence — length first, then words — and compares word-by-word, with a
//! partial compare of the final word's low bytes for the tail.

use clap::ValueEnum;
use serde::Serialize;
use tracing::error;

use crate::prng::Prng;

/// Largest payload a sample can carry, in bytes. An integral number of
/// 32-bit words; the word-fill path depends on that.
pub const SAMPLE_LEN_MAX: usize = 384 * 4;

/// Smallest payload generated.
pub const SAMPLE_LEN_MIN: usize = SAMPLE_LEN_MAX / 2;

const WORD: usize = std::mem::size_of::<u32>();

/// Sample flavour selection. A single flavour exists today; the selector is
/// part of the configuration surface so runs record which one they used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Debug,
}

impl SampleKind {
    /// Construct a sample of this kind, drawing its initial length and
    /// contents from `prng`.
    pub fn create(self, prng: &mut dyn Prng) -> Sample {
        match self {
            SampleKind::Debug => Sample::new(prng),
        }
    }
}

/// A reusable payload buffer plus its current logical length.
pub struct Sample {
    len: usize,
    data: Vec<u8>,
}

fn draw_len(prng: &mut dyn Prng) -> usize {
    prng.next() as usize % (SAMPLE_LEN_MAX - SAMPLE_LEN_MIN) + SAMPLE_LEN_MIN
}

impl Sample {
    /// Allocate the backing buffer and fill it from `prng`.
    pub fn new(prng: &mut dyn Prng) -> Self {
        let mut sample = Sample {
            len: 0,
            data: vec![0u8; SAMPLE_LEN_MAX],
        };
        sample.reinit(prng);
        sample
    }

    /// Regenerate length and contents from `prng`, reusing the buffer.
    pub fn reinit(&mut self, prng: &mut dyn Prng) {
        self.len = draw_len(prng);
        debug_assert!(self.len <= SAMPLE_LEN_MAX);

        let whole_words = self.len / WORD;
        let remain = self.len % WORD;

        for i in 0..whole_words {
            let word = prng.next().to_le_bytes();
            self.data[i * WORD..(i + 1) * WORD].copy_from_slice(&word);
        }

        // One more draw covers a byte tail; the overspill stays in the buffer
        // but is outside the logical length. SAMPLE_LEN_MAX being word-aligned
        // guarantees the room for it.
        if remain != 0 {
            let word = prng.next().to_le_bytes();
            self.data[whole_words * WORD..(whole_words + 1) * WORD].copy_from_slice(&word);
        }
    }

    /// Load externally-supplied bytes (a payload read back from storage).
    /// `bytes` must fit the backing buffer.
    pub fn read(&mut self, bytes: &[u8]) {
        assert!(bytes.len() <= SAMPLE_LEN_MAX);
        self.len = bytes.len();
        self.data[..bytes.len()].copy_from_slice(bytes);
    }

    /// Check the payload against the sequence `prng` produces, consuming the
    /// generator in the same order as [`Sample::reinit`]. Logs one diagnostic
    /// identifying the first mismatch and returns false; otherwise true.
    pub fn validate(&self, prng: &mut dyn Prng) -> bool {
        let valid_len = draw_len(prng);
        if self.len != valid_len {
            error!(
                "sample length mismatch: wanted {valid_len}, got {}",
                self.len
            );
            return false;
        }

        let whole_words = self.len / WORD;
        let remain = self.len % WORD;

        for i in 0..whole_words {
            let want = prng.next();
            let base = i * WORD;
            let got = u32::from_le_bytes([
                self.data[base],
                self.data[base + 1],
                self.data[base + 2],
                self.data[base + 3],
            ]);
            if want != got {
                error!("sample data mismatch at word {i}: wanted {want:08x}, got {got:08x}");
                return false;
            }
        }

        // A read-back payload carries only `remain` bytes of the final word,
        // so compare just those low bytes.
        if remain != 0 {
            let want = prng.next().to_le_bytes();
            let got = &self.data[whole_words * WORD..whole_words * WORD + remain];
            if want[..remain] != *got {
                error!("sample data mismatch in the {remain}-byte tail");
                return false;
            }
        }

        true
    }

    /// Current logical length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }
}
