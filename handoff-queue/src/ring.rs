//! Slot storage shared by every topology.
//!
//! Memory layout:
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │ pad slots (never touched)                             │
//! ├───────────────────────────────────────────────────────┤
//! │ Slot[0]: { occupied, value }                          │
//! │ Slot[1]: { occupied, value }                          │
//! │ ...                                                   │
//! │ Slot[capacity - 1]                                    │
//! ├───────────────────────────────────────────────────────┤
//! │ pad slots (never touched)                             │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! The padding keeps the payload region off the cache lines of whatever the
//! allocator placed next to the slot array. A sequence maps to
//! `(sequence & mask) + pad`.
//!
//! `occupied == true` means "published and not yet consumed". Who is allowed
//! to flip it, and when, is decided by each topology's index protocol.

use std::cell::UnsafeCell;
use std::mem::{MaybeUninit, size_of};
use std::sync::atomic::{AtomicBool, Ordering};

/// Bytes of padding on each side of the payload region.
const PAD_BYTES: usize = 128;

pub(crate) struct Slot<T> {
    occupied: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    const fn empty() -> Self {
        Self {
            occupied: AtomicBool::new(false),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    #[inline]
    pub(crate) fn is_occupied(&self, order: Ordering) -> bool {
        self.occupied.load(order)
    }

    /// Writes `value` and release-publishes the slot.
    ///
    /// # Safety
    ///
    /// The caller must own the slot for writing: it is free and no other
    /// thread can write it until it has been consumed again.
    #[inline]
    pub(crate) unsafe fn publish(&self, value: T) {
        unsafe { (*self.value.get()).write(value) };
        self.occupied.store(true, Ordering::Release);
    }

    /// Moves the value out and release-clears the slot.
    ///
    /// # Safety
    ///
    /// The slot must be occupied (observed with acquire ordering) and the
    /// caller must hold the exclusive right to consume it.
    #[inline]
    pub(crate) unsafe fn take(&self) -> T {
        let value = unsafe { (*self.value.get()).assume_init_read() };
        self.occupied.store(false, Ordering::Release);
        value
    }

    /// Borrows the value without consuming it.
    ///
    /// # Safety
    ///
    /// Same as [`take`](Self::take); the slot must stay occupied for the
    /// lifetime of the returned reference.
    #[inline]
    pub(crate) unsafe fn value_ref(&self) -> &T {
        unsafe { (*self.value.get()).assume_init_ref() }
    }
}

/// Power-of-two slot array with padding on both ends.
pub(crate) struct RingBuffer<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    pad: usize,
}

// Safety: slots are only accessed under the index protocols of the queue
// types, which hand each value to exactly one thread at a time.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Number of padding slots on each side for this element type.
    pub(crate) const fn pad() -> usize {
        let per_slot = size_of::<Slot<T>>();
        let pad = PAD_BYTES.div_ceil(per_slot);
        if pad == 0 { 1 } else { pad }
    }

    /// Allocates storage for `capacity` elements.
    ///
    /// `capacity` must already be a power of two.
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());

        let pad = Self::pad();
        let slots = (0..capacity + 2 * pad).map(|_| Slot::empty()).collect();

        Self {
            slots,
            mask: capacity - 1,
            pad,
        }
    }

    #[inline]
    pub(crate) const fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Returns the slot a sequence maps to.
    #[inline]
    pub(crate) fn slot(&self, sequence: usize) -> &Slot<T> {
        let index = (sequence & self.mask) + self.pad;
        // Safety: index <= mask + pad < slots.len()
        unsafe { self.slots.get_unchecked(index) }
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        for slot in &mut self.slots[..] {
            if *slot.occupied.get_mut() {
                unsafe { slot.value.get_mut().assume_init_drop() };
            }
        }
    }
}
