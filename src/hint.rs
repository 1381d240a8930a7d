//! Time-varying scan-start hints.
//!
//! `acquire` probes the bitmap linearly from its hint bit. If every caller
//! starts at bit 0 they all collide on the low words and serialize on the
//! same cache line; a hint drawn from a fast-moving source spreads concurrent
//! callers across the bitmap. This module is that source: a per-thread
//! xorshift stream seeded from the clock, standing in for a raw cycle-counter
//! read on platforms that have one.

use core::cell::Cell;
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns a cheap, thread-local pseudo-random `u32`.
///
/// Intended as the `hint` argument of
/// [`acquire_pow2`](crate::ConcurrentBitset::acquire_pow2) (which masks it)
/// or, reduced modulo the capacity, of
/// [`acquire`](crate::ConcurrentBitset::acquire). Not suitable for anything
/// needing unpredictability.
pub fn scan_hint() -> u32 {
    thread_local! {
        static STATE: Cell<u32> = const { Cell::new(0) };
    }

    STATE.with(|state| {
        let mut x = state.get();
        if x == 0 {
            // First call on this thread: seed from the clock. The TLS slot
            // address decorrelates threads seeded in the same nanosecond.
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.subsec_nanos())
                .unwrap_or(0);
            let addr = state as *const Cell<u32> as usize as u32;
            x = (nanos ^ addr) | 1;
        }
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        state.set(x);
        x
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_vary_within_a_thread() {
        let a = scan_hint();
        let b = scan_hint();
        let c = scan_hint();
        // xorshift has period 2^32 - 1; consecutive outputs never repeat.
        assert!(a != b || b != c);
    }

    #[test]
    fn hint_is_never_zero() {
        // Zero is the xorshift fixed point; the seed avoids it and the
        // stream can then never reach it.
        for _ in 0..10_000 {
            assert_ne!(scan_hint(), 0);
        }
    }
}
