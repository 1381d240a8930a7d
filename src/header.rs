//! The packed header word: used-count and state tag in one `u32`.
//!
//! Word 0 of a pool's buffer is not part of the bitmap. Its low 26 bits count
//! the currently claimed slots and its bits 26..31 hold a 5-bit *state tag*,
//! an opaque identity/epoch value chosen by the pool's owner so that callers
//! holding a stale reference to a reused buffer fail fast instead of
//! corrupting it.
//!
//! Layout:
//!
//! ```text
//!  31 30............26 25........................0
//! [ - |   state tag    |       used-count         ]
//! ```
//!
//! The maximum capacity is capped at `2^25` while the count field holds
//! `2^26 - 1`, so a full pool tolerates at least `2^25` in-flight reservations
//! before an increment could carry into the tag region.

/// Log2 of the bits per bitmap word.
pub const WORD_BITS_LG2: u32 = 5;
/// Bits per bitmap word.
pub const WORD_BITS: u32 = 1 << WORD_BITS_LG2;
/// Mask selecting a bit's position within its word.
pub const WORD_INDEX_MASK: u32 = WORD_BITS - 1;

/// Log2 of the maximum supported capacity.
pub const MAX_BIT_COUNT_LG2: u32 = 25;
/// Maximum supported capacity in bits (about 33 million; a 4 MiB bitmap).
pub const MAX_BIT_COUNT: u32 = 1 << MAX_BIT_COUNT_LG2;

/// Bit position of the state tag within the header word.
pub const TAG_SHIFT: u32 = 26;
/// Number of state tag bits.
pub const TAG_BITS: u32 = 5;
/// Exclusive upper bound on state tag values.
pub const TAG_LIMIT: u32 = 1 << TAG_BITS;
/// Mask selecting the used-count field of the header word.
pub const USED_MASK: u32 = (1 << TAG_SHIFT) - 1;
/// Mask selecting the state tag field of the header word.
pub const TAG_MASK: u32 = (TAG_LIMIT - 1) << TAG_SHIFT;

/// Encodes a caller-supplied tag value into its in-header bit pattern.
///
/// Returns `None` if `tag` does not fit the 5-bit field.
#[inline(always)]
pub const fn encode_tag(tag: u32) -> Option<u32> {
    if tag < TAG_LIMIT {
        Some(tag << TAG_SHIFT)
    } else {
        None
    }
}

/// A decoded view of one header word.
///
/// This is a plain value: construct it from a single atomic load (or the prior
/// value of an atomic RMW) and both fields are consistent with each other,
/// which two separate reads of the header would not be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Header(u32);

impl Header {
    /// Wraps a raw header word.
    #[inline(always)]
    pub const fn from_word(word: u32) -> Self {
        Self(word)
    }

    /// The raw word.
    #[inline(always)]
    pub const fn word(self) -> u32 {
        self.0
    }

    /// The used-count field: number of currently claimed slots.
    #[inline(always)]
    pub const fn used(self) -> u32 {
        self.0 & USED_MASK
    }

    /// The state tag, shifted back down to `0..32`.
    #[inline(always)]
    pub const fn tag(self) -> u32 {
        (self.0 & TAG_MASK) >> TAG_SHIFT
    }

    /// The state tag in its in-header bit position (for comparison against
    /// [`encode_tag`] output without shifting).
    #[inline(always)]
    pub(crate) const fn tag_bits(self) -> u32 {
        self.0 & TAG_MASK
    }
}
