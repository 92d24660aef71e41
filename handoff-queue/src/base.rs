//! State and behaviour common to every topology.
//!
//! [`Shared`] bundles the two sequences with the ring. It owns the size
//! estimate and the emptiness check, which read the same way no matter who
//! is allowed to move which index.

use crate::error::QueueError;
use crate::ring::RingBuffer;
use crate::sequence::{Access, PaddedSequence};

/// Rounds `requested` up to the next power of two.
///
/// # Errors
///
/// [`QueueError::ZeroCapacity`] for `0`, [`QueueError::CapacityOverflow`]
/// when no power of two `>= requested` fits in `usize`.
pub fn round_capacity(requested: usize) -> Result<usize, QueueError> {
    if requested == 0 {
        return Err(QueueError::ZeroCapacity);
    }
    requested
        .checked_next_power_of_two()
        .ok_or(QueueError::CapacityOverflow(requested))
}

/// Panicking form of [`round_capacity`] for the direct constructors.
pub(crate) fn checked_capacity(requested: usize) -> usize {
    match round_capacity(requested) {
        Ok(capacity) => capacity,
        Err(err) => panic!("{err}"),
    }
}

/// Head, tail and slots of one queue.
///
/// Queue contains elements in `[head, tail)`.
pub(crate) struct Shared<T> {
    /// Consumer progress.
    head: PaddedSequence,
    /// Producer progress.
    tail: PaddedSequence,
    ring: RingBuffer<T>,
}

impl<T> Shared<T> {
    /// `capacity` must already be rounded.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            head: PaddedSequence::new(0),
            tail: PaddedSequence::new(0),
            ring: RingBuffer::new(capacity),
        }
    }

    #[inline]
    pub(crate) const fn head(&self) -> &PaddedSequence {
        &self.head
    }

    #[inline]
    pub(crate) const fn tail(&self) -> &PaddedSequence {
        &self.tail
    }

    #[inline]
    pub(crate) const fn ring(&self) -> &RingBuffer<T> {
        &self.ring
    }

    #[inline]
    pub(crate) const fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Estimated number of queued elements, in `[0, capacity]`.
    ///
    /// Reads `head`, `tail`, then `head` again and retries until both head
    /// reads agree, so the pair is never torn across a concurrent poll. The
    /// answer can still be stale by the time the caller looks at it.
    pub(crate) fn size(&self) -> usize {
        let mut after = self.head.get(Access::AcquireRelease);
        loop {
            let before = after;
            let tail = self.tail.get(Access::AcquireRelease);
            after = self.head.get(Access::AcquireRelease);
            if before == after {
                // a head that ran ahead of a stale tail reads as "negative"
                let size = tail.wrapping_sub(after);
                return if (size as isize) < 0 {
                    0
                } else {
                    size.min(self.capacity())
                };
            }
        }
    }

    /// `head >= tail`.
    ///
    /// Never reports empty while elements are provably present; may report
    /// non-empty when every remaining element is already claimed.
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        let head = self.head.get(Access::AcquireRelease);
        let tail = self.tail.get(Access::AcquireRelease);
        (tail.wrapping_sub(head) as isize) <= 0
    }
}

/// Calls `poll` until it comes up empty or `limit` elements were handed to
/// `consume`. Returns how many were handed over.
#[inline]
pub(crate) fn drain_by<T>(
    limit: usize,
    mut poll: impl FnMut() -> Option<T>,
    mut consume: impl FnMut(T),
) -> usize {
    let mut count = 0;
    while count < limit {
        match poll() {
            Some(value) => {
                consume(value);
                count += 1;
            }
            None => break,
        }
    }
    count
}

/// Fills while `reserve` confirms room for one more element, up to `limit`.
///
/// `reserve` must guarantee the following `publish` succeeds, so the
/// supplier is never called for an element that has nowhere to go.
#[inline]
pub(crate) fn fill_by<T>(
    limit: usize,
    mut reserve: impl FnMut() -> bool,
    mut publish: impl FnMut(T),
    mut supplier: impl FnMut() -> T,
) -> usize {
    let mut count = 0;
    while count < limit && reserve() {
        publish(supplier());
        count += 1;
    }
    count
}
