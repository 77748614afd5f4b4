//! # PRNG — Deterministic, Peekable Random Sequences
//!
//! Repeatable 32-bit pseudo-random sequences parameterised by a single seed.
//! Every stage of the workload leans on two properties:
//!
//! - **Determinism**: re-seeding with the same value restores the exact
//!   sequence, so a payload written during the write phase can be regenerated
//!   bit-for-bit during read-back validation.
//! - **Peekability**: [`Prng::peek`] exposes a value without advancing the
//!   sequence, which is how object ids are recorded before the payload draw
//!   consumes the generator.
//!
//! Two implementations are provided. [`DebugPrng`] produces the counting
//! sequence `seed, seed+1, seed+2, …` — no randomness, but every property of
//! the harness can be verified by eye. [`XorwowPrng`] is Marsaglia's xorwow
//! (Xorshift RNGs, <http://www.jstatsoft.org/v08/i14/paper>, p.5), the
//! generator the CUDA toolkit defaults to: a five-word xorshift state plus a
//! Weyl accumulator.
//!
//! ## Peek semantics
//!
//! The two variants peek differently, and read-back depends on the exact
//! contract. The debug generator peeks the *upcoming* value. Xorwow peeks the
//! *most recently produced* value, which immediately after seeding is the
//! seed itself, before any shuffle.

use clap::ValueEnum;
use serde::Serialize;

/// A deterministic, seedable, peekable 32-bit generator.
///
/// `reseed` fully replaces the generator state; no residue from prior use is
/// observable afterwards.
pub trait Prng: Send {
    /// Reset the sequence to the one produced by `seed`.
    fn reseed(&mut self, seed: u32);

    /// Advance the sequence and return the next value.
    fn next(&mut self) -> u32;

    /// Observe without advancing. See the module docs for the per-variant
    /// contract.
    fn peek(&self) -> u32;
}

/// Generator selection, decided once from configuration and consumed at
/// construction time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrngKind {
    /// Counting sequence, for debugging the harness itself.
    Debug,
    /// Marsaglia xorwow.
    Xorshift,
}

impl PrngKind {
    /// Construct a generator of this kind seeded with `seed`.
    pub fn create(self, seed: u32) -> Box<dyn Prng> {
        match self {
            PrngKind::Debug => Box::new(DebugPrng::new(seed)),
            PrngKind::Xorshift => Box::new(XorwowPrng::new(seed)),
        }
    }
}

/// Counting sequence: the `i`-th draw from seed `s` is `s + i`.
pub struct DebugPrng {
    seq: u32,
}

impl DebugPrng {
    pub fn new(seed: u32) -> Self {
        DebugPrng { seq: seed }
    }
}

impl Prng for DebugPrng {
    fn reseed(&mut self, seed: u32) {
        self.seq = seed;
    }

    fn next(&mut self) -> u32 {
        let value = self.seq;
        self.seq = self.seq.wrapping_add(1);
        value
    }

    fn peek(&self) -> u32 {
        self.seq
    }
}

/// Weyl sequence increment applied on every draw.
const WEYL_INCREMENT: u32 = 32437;

/// Marsaglia's xorwow: five words of xorshift state plus a Weyl counter.
///
/// Seeding fills the state words with successive 6-bit left rotations of the
/// seed, and caches the seed as the current value so `peek` returns it until
/// the first draw.
pub struct XorwowPrng {
    state: [u32; 5],
    current: u32,
}

impl XorwowPrng {
    pub fn new(seed: u32) -> Self {
        let mut prng = XorwowPrng {
            state: [0; 5],
            current: 0,
        };
        prng.reseed(seed);
        prng
    }
}

impl Prng for XorwowPrng {
    fn reseed(&mut self, seed: u32) {
        self.current = seed;
        let mut s = seed;
        for word in &mut self.state {
            s = s.rotate_left(6);
            *word = s;
        }
    }

    fn next(&mut self) -> u32 {
        let s = self.state[0];

        let mut t = self.state[3];
        t ^= t >> 2;
        t ^= t << 1;

        self.state[3] = self.state[2];
        self.state[2] = self.state[1];
        self.state[1] = s;

        t ^= s;
        t ^= s << 4;
        self.state[0] = t;

        self.state[4] = self.state[4].wrapping_add(WEYL_INCREMENT);
        self.current = t.wrapping_add(self.state[4]);
        self.current
    }

    fn peek(&self) -> u32 {
        self.current
    }
}
