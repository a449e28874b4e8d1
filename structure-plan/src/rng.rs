//! Seeded generator
//!
//! 32-bit state mulberry-style mixer. The state advances by an odd constant on
//! every draw, so the walk visits all 2^32 states before repeating. Output is a
//! pure function of the state; `SeededRng` is only a mutable cell around it.

use serde::{Deserialize, Serialize};

const STATE_INCREMENT: u32 = 0x6D2B_79F5;
const TWO_POW_32: f64 = 4_294_967_296.0;

/// Generator state as a plain value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RngState(pub u32);

impl RngState {
    /// Advance once, returning the 32-bit output and the following state.
    pub fn next_u32(self) -> (u32, RngState) {
        let s = self.0.wrapping_add(STATE_INCREMENT);
        let mut t = s;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        (t ^ (t >> 14), RngState(s))
    }

    /// Advance once, returning a float in `[0, 1)`.
    pub fn next_f64(self) -> (f64, RngState) {
        let (v, next) = self.next_u32();
        (v as f64 / TWO_POW_32, next)
    }
}

/// Mutable generator handed to expansion and detail passes.
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: RngState,
}

impl SeededRng {
    pub fn new(seed: u32) -> Self {
        Self { state: RngState(seed) }
    }

    pub fn next(&mut self) -> f64 {
        let (v, next) = self.state.next_f64();
        self.state = next;
        v
    }

    pub fn next_u32(&mut self) -> u32 {
        let (v, next) = self.state.next_u32();
        self.state = next;
        v
    }

    /// Uniform integer in `[min, max]`. Reversed bounds are swapped.
    pub fn int(&mut self, min: i64, max: i64) -> i64 {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        // widened so the full i64 range cannot overflow
        let (lo, hi) = (lo as i128, hi as i128);
        let span = (hi - lo + 1) as f64;
        let offset = (self.next() * span).floor() as i128;
        (lo + offset).min(hi) as i64
    }

    pub fn float(&mut self, min: f64, max: f64) -> f64 {
        min + self.next() * (max - min)
    }

    pub fn bool(&mut self, p: f64) -> bool {
        self.next() < p
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let idx = (self.next() * items.len() as f64).floor() as usize;
        items.get(idx.min(items.len() - 1))
    }

    /// Fisher-Yates, walking from the back.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = (self.next() * (i + 1) as f64).floor() as usize;
            items.swap(i, j.min(i));
        }
    }

    /// Box-Muller transform; consumes two draws.
    pub fn gaussian(&mut self, mean: f64, stddev: f64) -> f64 {
        let u1 = self.next().max(f64::MIN_POSITIVE);
        let u2 = self.next();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + z * stddev
    }

    /// Pick proportionally to weight. Non-positive weights never win.
    pub fn weighted_pick<'a, T>(&mut self, items: &'a [(T, f64)]) -> Option<&'a T> {
        let total: f64 = items.iter().map(|(_, w)| w.max(0.0)).sum();
        if total <= 0.0 {
            return None;
        }
        let mut roll = self.next() * total;
        for (item, weight) in items {
            let w = weight.max(0.0);
            if w > 0.0 && roll < w {
                return Some(item);
            }
            roll -= w;
        }
        items.iter().rev().find(|(_, w)| *w > 0.0).map(|(item, _)| item)
    }

    pub fn state(&self) -> RngState {
        self.state
    }

    pub fn set_state(&mut self, state: RngState) {
        self.state = state;
    }
}
