//! The lock-free concurrent bitset.
//!
//! A [`ConcurrentBitset`] is a fixed-capacity pool of integer slots
//! `0..capacity`. Any number of threads share it by `&` reference and claim
//! and release slots with no lock and no CAS loop:
//!
//! - **reserve**: `acquire` first does a `fetch_add(1)` on the packed header
//!   word. The prior value, read in the same operation, proves in one shot
//!   that the caller's tag matches and that a free bit exists somewhere.
//! - **claim**: only then does it probe the bitmap with `fetch_or`, starting
//!   at a caller-supplied hint bit, until it flips a `0` to `1`.
//!
//! Splitting reservation from claim keeps header contention to a fetch-add
//! rather than a compare-exchange retry, which is the point of the design.
//! The cost is one documented benign race: a reservation can observe "full"
//! while a concurrent `release` is mid-flight, so `acquire` may report
//! [`AcquireError::Full`] even though a bit is momentarily free. Retrying
//! resolves it.

use crossbeam_utils::Backoff;

use crate::header::{
    self, Header, MAX_BIT_COUNT, MAX_BIT_COUNT_LG2, WORD_BITS, WORD_BITS_LG2, WORD_INDEX_MASK,
};
use crate::sync::atomic::{fence, AtomicU32, Ordering};

/// Number of `u32` words (header + bitmap) needed for a pool of `capacity`
/// bits, or `None` if `capacity` exceeds [`MAX_BIT_COUNT`].
#[inline]
pub const fn buffer_word_count(capacity: u32) -> Option<u32> {
    if capacity <= MAX_BIT_COUNT {
        Some(1 + (capacity >> WORD_BITS_LG2) + if capacity & WORD_INDEX_MASK != 0 { 1 } else { 0 })
    } else {
        None
    }
}

/// Number of `u32` words needed for a pool of `2^capacity_lg2` bits, or
/// `None` if `capacity_lg2` exceeds [`MAX_BIT_COUNT_LG2`].
#[inline]
pub const fn buffer_word_count_lg2(capacity_lg2: u32) -> Option<u32> {
    if capacity_lg2 <= MAX_BIT_COUNT_LG2 {
        let bitmap_lg2 = if capacity_lg2 > WORD_BITS_LG2 {
            capacity_lg2 - WORD_BITS_LG2
        } else {
            0
        };
        Some(1 + (1 << bitmap_lg2))
    } else {
        None
    }
}

/// Error constructing a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// Requested capacity exceeds [`MAX_BIT_COUNT`].
    CapacityTooLarge,
    /// State tag does not fit the 5-bit header field.
    TagOutOfRange,
}

impl core::fmt::Display for InitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::CapacityTooLarge => f.write_str("bit capacity exceeds the supported maximum"),
            Self::TagOutOfRange => f.write_str("state tag does not fit in 5 bits"),
        }
    }
}

impl std::error::Error for InitError {}

/// Error returned by [`ConcurrentBitset::acquire`] and
/// [`ConcurrentBitset::acquire_pow2`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// The used-count already equalled the capacity at reservation time.
    ///
    /// May be transient under concurrent releases; retrying is valid.
    Full,
    /// The buffer's state tag differs from the caller's expected tag.
    ///
    /// Fatal for this caller: the pool was reset or the reference is stale.
    TagMismatch,
    /// Out-of-range hint or tag, or a non-power-of-two capacity passed to the
    /// wrapping variant. A programming error, not retryable.
    InvalidArgument,
}

impl AcquireError {
    /// The raw protocol code: failures travel as the signed pair
    /// `(code, code)` in the source wire format.
    #[inline]
    pub const fn code(self) -> i32 {
        match self {
            Self::Full => -1,
            Self::TagMismatch => -2,
            Self::InvalidArgument => -3,
        }
    }
}

impl core::fmt::Display for AcquireError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Full => f.write_str("no free slot: pool is full"),
            Self::TagMismatch => f.write_str("state tag mismatch: stale or wrong pool"),
            Self::InvalidArgument => f.write_str("hint or tag out of range"),
        }
    }
}

impl std::error::Error for AcquireError {}

/// Error returned by [`ConcurrentBitset::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseError {
    /// The bit was already clear: a double release. Treat as fatal.
    AlreadyReleased,
    /// The buffer's state tag differs from the caller's expected tag.
    TagMismatch,
    /// Bit index or tag out of range.
    InvalidArgument,
}

impl ReleaseError {
    /// The raw protocol code for this failure.
    #[inline]
    pub const fn code(self) -> i32 {
        match self {
            Self::AlreadyReleased => -1,
            Self::TagMismatch => -2,
            Self::InvalidArgument => -3,
        }
    }
}

impl core::fmt::Display for ReleaseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AlreadyReleased => f.write_str("bit was already released"),
            Self::TagMismatch => f.write_str("state tag mismatch: stale or wrong pool"),
            Self::InvalidArgument => f.write_str("bit or tag out of range"),
        }
    }
}

impl std::error::Error for ReleaseError {}

/// Error returned by [`ConcurrentBitset::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetError {
    /// The bit was already set: a double claim. Treat as fatal.
    AlreadyClaimed,
    /// The buffer's state tag differs from the caller's expected tag.
    TagMismatch,
    /// Bit index or tag out of range.
    InvalidArgument,
}

impl SetError {
    /// The raw protocol code for this failure.
    #[inline]
    pub const fn code(self) -> i32 {
        match self {
            Self::AlreadyClaimed => -1,
            Self::TagMismatch => -2,
            Self::InvalidArgument => -3,
        }
    }
}

impl core::fmt::Display for SetError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AlreadyClaimed => f.write_str("bit was already claimed"),
            Self::TagMismatch => f.write_str("state tag mismatch: stale or wrong pool"),
            Self::InvalidArgument => f.write_str("bit or tag out of range"),
        }
    }
}

impl std::error::Error for SetError {}

/// A successful acquisition: the claimed bit and the used-count the claiming
/// reservation observed (including itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    /// The claimed slot index, `< capacity`. Unique among live claims.
    pub bit: u32,
    /// Used-count after this reservation, `>= 1`.
    pub used: u32,
}

/// An instantaneous view of a pool's header, for diagnostics.
///
/// `used` is a single instantaneous sample: under concurrent traffic it may
/// include reservations whose bit is not yet set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
    /// Pool capacity in bits.
    pub capacity: u32,
    /// Sampled used-count.
    pub used: u32,
    /// Sampled state tag.
    pub tag: u32,
}

/// A fixed-capacity, lock-free bitset slot pool.
///
/// Storage is `1 + ceil(capacity / 32)` atomic words: word 0 is the packed
/// header ([`crate::header`]), the rest the bitmap. One context owns the
/// value; all threads operate through `&self`.
///
/// ```
/// use bitpool::ConcurrentBitset;
///
/// let pool = ConcurrentBitset::new(64).unwrap();
/// let claim = pool.acquire(0, 0).unwrap();
/// assert!(claim.bit < 64);
/// assert_eq!(pool.release(claim.bit, 0).unwrap(), 0);
/// ```
pub struct ConcurrentBitset {
    capacity: u32,
    words: Box<[AtomicU32]>,
}

impl ConcurrentBitset {
    /// Creates a zeroed pool of `capacity` bits with state tag 0.
    ///
    /// # Errors
    /// [`InitError::CapacityTooLarge`] if `capacity > MAX_BIT_COUNT`.
    pub fn new(capacity: u32) -> Result<Self, InitError> {
        Self::with_tag(capacity, 0)
    }

    /// Creates a zeroed pool of `capacity` bits carrying `tag` in its header.
    ///
    /// All subsequent `acquire`/`release`/`set` callers must present the same
    /// tag or fail with a tag mismatch.
    ///
    /// # Errors
    /// [`InitError::CapacityTooLarge`] or [`InitError::TagOutOfRange`].
    pub fn with_tag(capacity: u32, tag: u32) -> Result<Self, InitError> {
        let word_count = buffer_word_count(capacity).ok_or(InitError::CapacityTooLarge)?;
        let tag_bits = header::encode_tag(tag).ok_or(InitError::TagOutOfRange)?;

        let words: Box<[AtomicU32]> = (0..word_count)
            .map(|i| AtomicU32::new(if i == 0 { tag_bits } else { 0 }))
            .collect();

        #[cfg(feature = "tracing")]
        tracing::debug!(capacity, tag, words = words.len(), "concurrent bitset created");

        Ok(Self { capacity, words })
    }

    /// Creates a zeroed pool of `2^capacity_lg2` bits carrying `tag`.
    ///
    /// Power-of-two pools additionally support [`Self::acquire_pow2`], which
    /// wraps out-of-range hints instead of rejecting them.
    ///
    /// # Errors
    /// [`InitError::CapacityTooLarge`] if `capacity_lg2 > MAX_BIT_COUNT_LG2`,
    /// or [`InitError::TagOutOfRange`].
    pub fn with_tag_lg2(capacity_lg2: u32, tag: u32) -> Result<Self, InitError> {
        if capacity_lg2 > MAX_BIT_COUNT_LG2 {
            return Err(InitError::CapacityTooLarge);
        }
        Self::with_tag(1 << capacity_lg2, tag)
    }

    /// Pool capacity in bits.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// The state tag currently carried by the header.
    #[inline]
    pub fn tag(&self) -> u32 {
        Header::from_word(self.header().load(Ordering::SeqCst)).tag()
    }

    /// Sampled used-count. See [`Snapshot`] for the consistency caveat.
    #[inline]
    pub fn used(&self) -> u32 {
        Header::from_word(self.header().load(Ordering::SeqCst)).used()
    }

    /// Samples the header into a [`Snapshot`].
    pub fn snapshot(&self) -> Snapshot {
        let h = Header::from_word(self.header().load(Ordering::SeqCst));
        Snapshot {
            capacity: self.capacity,
            used: h.used(),
            tag: h.tag(),
        }
    }

    /// Whether `bit` is currently claimed. Sampled, like [`Self::used`].
    ///
    /// # Panics
    /// Panics if `bit >= capacity()`.
    pub fn is_claimed(&self, bit: u32) -> bool {
        assert!(bit < self.capacity);
        let mask = 1u32 << (bit & WORD_INDEX_MASK);
        self.bitmap_word(bit >> WORD_BITS_LG2).load(Ordering::SeqCst) & mask != 0
    }

    /// Re-initializes an exclusively held pool: clears every bit, zeroes the
    /// used-count and installs a new tag.
    ///
    /// Taking `&mut self` is what makes this sound: the owner must have
    /// confirmed quiescence (no outstanding claims or in-flight calls) to
    /// hold the exclusive reference at all. Callers still presenting the old
    /// tag afterwards fail with a tag mismatch, which is the tag's purpose.
    ///
    /// # Errors
    /// [`InitError::TagOutOfRange`].
    pub fn reset(&mut self, tag: u32) -> Result<(), InitError> {
        let tag_bits = header::encode_tag(tag).ok_or(InitError::TagOutOfRange)?;
        self.words[0].store(tag_bits, Ordering::SeqCst);
        for w in &self.words[1..] {
            w.store(0, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Claims any free bit, probing from `hint`.
    ///
    /// On success returns the claimed bit and the used-count including this
    /// claim; a trailing fence guarantees the bit is visible before any
    /// dependent action by the caller. A good `hint` is time-varying (see
    /// [`crate::hint::scan_hint`]) so concurrent callers spread across the
    /// bitmap instead of racing for the same word.
    ///
    /// # Errors
    /// - [`AcquireError::InvalidArgument`]: `hint >= capacity` or `tag >= 32`.
    /// - [`AcquireError::TagMismatch`]: the pool carries a different tag.
    /// - [`AcquireError::Full`]: no free slot at reservation time. Possibly
    ///   transient under concurrent releases; retrying is valid.
    pub fn acquire(&self, hint: u32, expected_tag: u32) -> Result<Claim, AcquireError> {
        let Some(tag_bits) = header::encode_tag(expected_tag) else {
            return Err(AcquireError::InvalidArgument);
        };
        if hint >= self.capacity {
            return Err(AcquireError::InvalidArgument);
        }

        let used = self.reserve(tag_bits)?;
        let bit = self.claim_from(hint);

        // The claimed bit must be visible before the caller acts on it.
        fence(Ordering::SeqCst);

        Ok(Claim { bit, used })
    }

    /// Claims any free bit, wrapping `hint` modulo the capacity.
    ///
    /// The variant for power-of-two pools (see [`Self::with_tag_lg2`]): any
    /// `u32` is a permissible hint, e.g. a raw clock sample, and is reduced
    /// by masking. No trailing fence is issued on success.
    ///
    /// # Errors
    /// As [`Self::acquire`], except an out-of-range hint cannot occur;
    /// [`AcquireError::InvalidArgument`] instead rejects tags `>= 32` and
    /// pools whose capacity is not a power of two.
    pub fn acquire_pow2(&self, hint: u32, expected_tag: u32) -> Result<Claim, AcquireError> {
        let Some(tag_bits) = header::encode_tag(expected_tag) else {
            return Err(AcquireError::InvalidArgument);
        };
        if !self.capacity.is_power_of_two() {
            return Err(AcquireError::InvalidArgument);
        }

        let used = self.reserve(tag_bits)?;
        let bit = self.claim_from(hint & (self.capacity - 1));

        Ok(Claim { bit, used })
    }

    /// Releases a previously acquired bit, returning the new used-count.
    ///
    /// # Errors
    /// - [`ReleaseError::InvalidArgument`]: `bit >= capacity` or `tag >= 32`.
    /// - [`ReleaseError::TagMismatch`]: the pool carries a different tag;
    ///   nothing is mutated.
    /// - [`ReleaseError::AlreadyReleased`]: the bit was already clear — a
    ///   double release. The used-count is not touched.
    pub fn release(&self, bit: u32, expected_tag: u32) -> Result<u32, ReleaseError> {
        let Some(tag_bits) = header::encode_tag(expected_tag) else {
            return Err(ReleaseError::InvalidArgument);
        };
        if bit >= self.capacity {
            return Err(ReleaseError::InvalidArgument);
        }
        if Header::from_word(self.header().load(Ordering::SeqCst)).tag_bits() != tag_bits {
            #[cfg(feature = "tracing")]
            tracing::trace!(bit, expected_tag, "release failed: tag mismatch");
            return Err(ReleaseError::TagMismatch);
        }

        let mask = 1u32 << (bit & WORD_INDEX_MASK);
        let prev = self
            .bitmap_word(bit >> WORD_BITS_LG2)
            .fetch_and(!mask, Ordering::SeqCst);

        if prev & mask == 0 {
            #[cfg(feature = "tracing")]
            tracing::trace!(bit, "release failed: bit already clear");
            return Err(ReleaseError::AlreadyReleased);
        }

        // The bit-clear must be observable before the count decrement, and the
        // decrement before the caller's subsequent operations.
        fence(Ordering::SeqCst);
        let prior = self.header().fetch_sub(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);

        Ok(Header::from_word(prior.wrapping_sub(1)).used())
    }

    /// Directly claims a specific bit the caller knows to be free, bypassing
    /// the reserve-then-search protocol (state restoration path).
    ///
    /// On success the header's used-count is **decremented**, not
    /// incremented. This asymmetry with `acquire`/`release` is the documented
    /// contract of the protocol and is preserved as such; a `set` bit must
    /// therefore correspond to a claim the count already includes. The
    /// decremented count is returned.
    ///
    /// # Errors
    /// - [`SetError::InvalidArgument`]: `bit >= capacity` or `tag >= 32`.
    /// - [`SetError::AlreadyClaimed`]: the bit was already set — a double
    ///   claim. The used-count is not touched.
    /// - [`SetError::TagMismatch`]: the pool carries a different tag; nothing
    ///   is mutated.
    pub fn set(&self, bit: u32, expected_tag: u32) -> Result<u32, SetError> {
        let Some(tag_bits) = header::encode_tag(expected_tag) else {
            return Err(SetError::InvalidArgument);
        };
        if bit >= self.capacity {
            return Err(SetError::InvalidArgument);
        }
        if Header::from_word(self.header().load(Ordering::SeqCst)).tag_bits() != tag_bits {
            return Err(SetError::TagMismatch);
        }

        let mask = 1u32 << (bit & WORD_INDEX_MASK);
        let prev = self
            .bitmap_word(bit >> WORD_BITS_LG2)
            .fetch_or(mask, Ordering::SeqCst);

        if prev & mask != 0 {
            #[cfg(feature = "tracing")]
            tracing::trace!(bit, "set failed: bit already claimed");
            return Err(SetError::AlreadyClaimed);
        }

        // The bit-set must be observable before the count update.
        fence(Ordering::SeqCst);
        let prior = self.header().fetch_sub(1, Ordering::SeqCst);

        Ok(Header::from_word(prior.wrapping_sub(1)).used())
    }

    #[inline(always)]
    fn header(&self) -> &AtomicU32 {
        &self.words[0]
    }

    #[inline(always)]
    fn bitmap_word(&self, word: u32) -> &AtomicU32 {
        &self.words[word as usize + 1]
    }

    /// The reservation half of `acquire`: count increment, tag and capacity
    /// checks against the prior header value, and the fence that makes the
    /// reservation visible before the bit search. Returns the used-count
    /// including this reservation.
    fn reserve(&self, tag_bits: u32) -> Result<u32, AcquireError> {
        // Two fetch-ops instead of a CAS loop. The undo path can race with a
        // concurrent release into a spurious `Full`; callers retry.
        let prior = Header::from_word(self.header().fetch_add(1, Ordering::SeqCst));

        if prior.tag_bits() != tag_bits {
            self.header().fetch_sub(1, Ordering::SeqCst);
            #[cfg(feature = "tracing")]
            tracing::trace!(found = prior.tag(), "acquire failed: tag mismatch");
            return Err(AcquireError::TagMismatch);
        }
        if prior.used() >= self.capacity {
            self.header().fetch_sub(1, Ordering::SeqCst);
            return Err(AcquireError::Full);
        }

        // The reservation must be visible before any bit is set.
        fence(Ordering::SeqCst);

        Ok(prior.used() + 1)
    }

    /// The claim half of `acquire`: probe the bitmap from `bit` until a
    /// `fetch_or` flips a zero. A successful reservation guarantees a free bit,
    /// so the loop terminates; under contention it may spin (lock-free, not
    /// wait-free).
    fn claim_from(&self, mut bit: u32) -> u32 {
        debug_assert!(bit < self.capacity);
        let word_count = self.words.len() as u32 - 1;
        let backoff = Backoff::new();

        loop {
            let word = bit >> WORD_BITS_LG2;
            let mask = 1u32 << (bit & WORD_INDEX_MASK);
            let prev = self.bitmap_word(word).fetch_or(mask, Ordering::SeqCst);

            if prev & mask == 0 {
                return bit;
            }

            // Lost the race for this bit. `trailing_ones` jumps straight to
            // the word's lowest zero instead of rescanning bit by bit; a
            // candidate past the capacity (partial tail word) counts as the
            // word being exhausted.
            let zero = prev.trailing_ones();
            let candidate = (word << WORD_BITS_LG2) | zero;
            if zero < WORD_BITS && candidate < self.capacity {
                bit = candidate;
                continue;
            }

            let next = if word + 1 < word_count {
                word + 1
            } else {
                // Completed a rotation without claiming; back off briefly
                // before sweeping again.
                backoff.spin();
                0
            };
            bit = (next << WORD_BITS_LG2) | (bit & WORD_INDEX_MASK);
            if bit >= self.capacity {
                // The kept in-word offset overshoots a partial tail word;
                // fall back to the word's first bit.
                bit = next << WORD_BITS_LG2;
            }
        }
    }
}

impl core::fmt::Debug for ConcurrentBitset {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let snap = self.snapshot();
        f.debug_struct("ConcurrentBitset")
            .field("capacity", &snap.capacity)
            .field("used", &snap.used)
            .field("tag", &snap.tag)
            .finish_non_exhaustive()
    }
}
