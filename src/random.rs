//! Seedable randomness for generator logic.
//!
//! Generators must draw every random decision from the [`Random`] handed to them through
//! [`crate::Context::random`]; identical seed plus identical settings then reproduce identical
//! output.

/// Deterministic SplitMix64 stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Random {
    seed: u64,
    state: u64,
}

impl Random {
    /// Stream starting at `seed`.
    pub fn new(seed: u64) -> Self {
        Self { seed, state: seed }
    }

    /// Reset the stream to the start of `seed`.
    pub fn seed(&mut self, value: u64) {
        self.seed = value;
        self.state = value;
    }

    /// Seed the stream was last reset to.
    pub fn current_seed(&self) -> u64 {
        self.seed
    }

    /// Next raw 64-bit value.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform in `[0, 1)` with 53 bits of precision.
    pub fn next_f64_01(&mut self) -> f64 {
        let v = self.next_u64() >> 11;
        (v as f64) * (1.0 / ((1u64 << 53) as f64))
    }

    /// Uniform in `[0, max)`.
    pub fn float(&mut self, max: f64) -> f64 {
        self.float_range(0.0, max)
    }

    /// Uniform in `[min, max)`. Swapped bounds are accepted.
    pub fn float_range(&mut self, min: f64, max: f64) -> f64 {
        min + (max - min) * self.next_f64_01()
    }

    /// Uniform integer in `[min, max]` (inclusive). Swapped bounds are accepted.
    pub fn int_range(&mut self, min: i64, max: i64) -> i64 {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        let span = (hi as i128 - lo as i128 + 1) as u128;
        // multiply-shift keeps the bias below 2^-64 for any span
        let r = (u128::from(self.next_u64()) * span) >> 64;
        (lo as i128 + r as i128) as i64
    }

    /// Uniformly chosen element, `None` for an empty slice.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let i = self.int_range(0, items.len() as i64 - 1) as usize;
        items.get(i)
    }

    /// `true` with probability `p` (clamped to `0..=1`).
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64_01() < p.clamp(0.0, 1.0)
    }
}

impl Default for Random {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
#[path = "../tests/unit/random.rs"]
mod tests;
