//! Packed count and duration words.
//!
//! A [`PackedCounter`] is a `u64` split in two: the event count lives in the
//! high [`COUNT_BITS`] and the cumulative duration, in ticks, lives in the low
//! [`DURATION_BITS`]. Adding two packed words with ordinary integer addition
//! adds both sub-fields at once, which is what lets the accumulator update a
//! count and a duration with one atomic `fetch_add` and no compare-and-swap
//! loop.
//!
//! # Precision
//!
//! Encoding never fails. Inputs wider than their sub-field are masked to it,
//! so `decode(encode(c, d))` is `(c, d & DURATION_MASK)`. Sums of packed words
//! are exact only while the duration sub-field does not carry into the count
//! sub-field; a carry inflates the count by one and wraps the duration. That
//! bound is accepted: the counters live for a single short reporting window.
//! Nothing here saturates.

/// Width of the count sub-field, in bits.
pub const COUNT_BITS: u32 = 32;
/// Width of the duration sub-field, in bits.
pub const DURATION_BITS: u32 = 64 - COUNT_BITS;

const COUNT_MASK: u64 = (1 << COUNT_BITS) - 1;
/// Mask selecting the duration sub-field of a packed word.
pub const DURATION_MASK: u64 = (1 << DURATION_BITS) - 1;

/// A count and a cumulative duration packed into one `u64`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackedCounter(u64);

impl PackedCounter {
    /// The packed word for zero events of zero duration.
    pub const ZERO: Self = Self(0);

    /// Pack `count` and `duration_ticks`, truncating each to its sub-field.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn encode(count: u32, duration_ticks: i64) -> Self {
        let count = (count as u64) & COUNT_MASK;
        let duration = (duration_ticks as u64) & DURATION_MASK;
        Self((count << DURATION_BITS) | duration)
    }

    /// Wrap a raw packed word, for instance one loaded from an atomic.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw packed word.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// The count sub-field.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn count(self) -> u32 {
        ((self.0 >> DURATION_BITS) & COUNT_MASK) as u32
    }

    /// The duration sub-field, in ticks.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn duration_ticks(self) -> i64 {
        (self.0 & DURATION_MASK) as i64
    }

    /// Unpack into `(count, duration_ticks)`.
    #[must_use]
    pub const fn decode(self) -> (u32, i64) {
        (self.count(), self.duration_ticks())
    }

    /// Sum two packed words the way the accumulator's atomic add does.
    #[must_use]
    pub const fn wrapping_add(self, other: Self) -> Self {
        Self(self.0.wrapping_add(other.0))
    }

    /// Undo a [`PackedCounter::wrapping_add`] of `other`.
    #[must_use]
    pub const fn wrapping_sub(self, other: Self) -> Self {
        Self(self.0.wrapping_sub(other.0))
    }
}

/// Pack `count` and `duration_ticks` into a raw `u64`. See
/// [`PackedCounter::encode`].
#[must_use]
pub const fn encode(count: u32, duration_ticks: i64) -> u64 {
    PackedCounter::encode(count, duration_ticks).raw()
}

/// Unpack a raw `u64` into `(count, duration_ticks)`. See
/// [`PackedCounter::decode`].
#[must_use]
pub const fn decode(packed: u64) -> (u32, i64) {
    PackedCounter::from_raw(packed).decode()
}
