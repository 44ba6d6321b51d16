//! DATA payload randomization.
//!
//! The payload is XORed with the output of an 8-bit LFSR seeded with
//! [`RANDOM_SEED`]. XOR with a fixed stream is its own inverse, so the same
//! function whitens and de-whitens.

use super::constants::{RANDOM_FEEDBACK, RANDOM_SEED};

/// Pseudo-random byte stream used for whitening.
#[derive(Debug, Clone)]
pub struct RandomSequence {
    state: u8,
}

impl RandomSequence {
    pub fn new() -> Self {
        Self { state: RANDOM_SEED }
    }
}

impl Default for RandomSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for RandomSequence {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        let out = self.state;
        self.state = if self.state & 0x01 != 0 {
            (self.state >> 1) ^ RANDOM_FEEDBACK
        } else {
            self.state >> 1
        };
        Some(out)
    }
}

/// Whiten (or de-whiten) `data` in place.
pub fn whiten_in_place(data: &mut [u8]) {
    for (byte, mask) in data.iter_mut().zip(RandomSequence::new()) {
        *byte ^= mask;
    }
}

/// Whiten (or de-whiten) `data` into a new buffer.
pub fn whiten(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    whiten_in_place(&mut out);
    out
}
