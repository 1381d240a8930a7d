//! # `bitpool` - Lock-Free Concurrent Bitset Slot Pool
//!
//! A fixed-capacity concurrent bit-set used as a scalable index allocator:
//! many threads claim and release small integer slots (`0..capacity`) from a
//! shared pool with no lock and no CAS loop.
//!
//! ## Design
//!
//! The pool is a flat array of atomic `u32` words. Word 0 packs a used-count
//! with a 5-bit identity tag; the remaining words are the bitmap. `acquire`
//! splits into two independent atomic operations on distinct locations:
//!
//! 1. **Reservation**: one `fetch_add` on the header claims that *a* free
//!    slot exists and simultaneously validates the tag — header contention is
//!    an add, never a compare-exchange retry.
//! 2. **Claim**: a `fetch_or` probe of the bitmap, starting at a
//!    caller-supplied hint, picks *which* bit.
//!
//! Sequentially consistent fences order reservation before claim, claim
//! before the caller's dependent actions, and (on release) bit-clear before
//! count-decrement.
//!
//! ## Guarantees
//!
//! - **Lock-free**: the only internal loop is the claim probe, and a
//!   successful reservation proves it terminates. No operation blocks.
//! - **Uniqueness**: a claimed bit is held by exactly one caller until
//!   released.
//! - **Identity**: every operation checks the caller's expected tag against
//!   the header, so use of a stale or reused pool fails fast with a tag
//!   mismatch instead of corrupting state.
//!
//! A documented benign race exists: `acquire` can report `Full` while a
//! concurrent release is mid-flight. Retrying resolves it; the pool never
//! hands out a duplicate slot.
//!
//! ## Example
//!
//! ```rust
//! use bitpool::{ConcurrentBitset, scan_hint};
//!
//! let pool = ConcurrentBitset::with_tag_lg2(6, 9).unwrap(); // 64 slots, tag 9
//!
//! let claim = pool.acquire_pow2(scan_hint(), 9).unwrap();
//! assert!(claim.bit < 64);
//! assert_eq!(claim.used, 1);
//!
//! assert_eq!(pool.release(claim.bit, 9).unwrap(), 0);
//! ```

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod bitset;
pub mod header;
pub mod hint;
mod sync;

#[cfg(loom)]
mod loom_tests;

pub use bitset::{
    buffer_word_count, buffer_word_count_lg2, AcquireError, Claim, ConcurrentBitset, InitError,
    ReleaseError, SetError, Snapshot,
};
pub use header::{Header, MAX_BIT_COUNT, MAX_BIT_COUNT_LG2};
pub use hint::scan_hint;

// Compile-time checks of the packed-header layout.
const _: () = {
    use crate::header::{MAX_BIT_COUNT, TAG_MASK, TAG_SHIFT, USED_MASK, WORD_BITS};

    // Count and tag fields must not overlap, and the tag must sit above the
    // count.
    assert!(USED_MASK & TAG_MASK == 0);
    assert!(TAG_MASK >> TAG_SHIFT == 0x1f);

    // Headroom: a full pool plus one in-flight reservation per slot must not
    // carry into the tag region.
    assert!(2 * (MAX_BIT_COUNT as u64) <= (USED_MASK as u64) + 1);

    // The bitmap word width the shift/mask arithmetic assumes.
    assert!(WORD_BITS == 32);
    assert!(core::mem::size_of::<core::sync::atomic::AtomicU32>() == 4);
};
