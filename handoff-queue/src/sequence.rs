//! Cache-line isolated sequence counter.
//!
//! Every queue keeps two of these: `head` (consumer progress) and `tail`
//! (producer progress). Each one owns a full padded line so a store to one
//! never invalidates the line holding the other.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ head: AtomicUsize + padding (128 bytes)  │
//! ├──────────────────────────────────────────┤
//! │ tail: AtomicUsize + padding (128 bytes)  │
//! └──────────────────────────────────────────┘
//! ```
//!
//! Call sites pick the weakest [`Access`] that still gives them the
//! happens-before edge they need.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering, fence};

use crossbeam_utils::CachePadded;

/// Ordering strength for a single [`PaddedSequence`] access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No ordering. Used by the owning role to re-read its own index.
    Plain,
    /// Coherent with other accesses to this counter, nothing else.
    ///
    /// Rust's model has no separate "opaque" mode, so this lowers to
    /// `Relaxed` exactly like [`Plain`](Self::Plain). Call sites keep the
    /// distinction to document intent.
    Opaque,
    /// Acquire on loads, release on stores, acquire-release on CAS.
    AcquireRelease,
    /// Sequentially consistent access followed by a full fence.
    Fence,
}

impl Access {
    #[inline]
    const fn load(self) -> Ordering {
        match self {
            Self::Plain | Self::Opaque => Ordering::Relaxed,
            Self::AcquireRelease => Ordering::Acquire,
            Self::Fence => Ordering::SeqCst,
        }
    }

    #[inline]
    const fn store(self) -> Ordering {
        match self {
            Self::Plain | Self::Opaque => Ordering::Relaxed,
            Self::AcquireRelease => Ordering::Release,
            Self::Fence => Ordering::SeqCst,
        }
    }

    #[inline]
    const fn exchange(self) -> (Ordering, Ordering) {
        match self {
            Self::Plain | Self::Opaque => (Ordering::Relaxed, Ordering::Relaxed),
            Self::AcquireRelease => (Ordering::AcqRel, Ordering::Acquire),
            Self::Fence => (Ordering::SeqCst, Ordering::SeqCst),
        }
    }
}

/// A monotonically increasing index on its own cache line.
///
/// Arithmetic on the stored value is wrapping; callers compare sequences
/// with `wrapping_sub`, never with `<`.
#[derive(Default)]
pub struct PaddedSequence {
    value: CachePadded<AtomicUsize>,
}

impl PaddedSequence {
    /// Creates a sequence starting at `initial`.
    pub const fn new(initial: usize) -> Self {
        Self {
            value: CachePadded::new(AtomicUsize::new(initial)),
        }
    }

    /// Reads the sequence.
    #[inline]
    pub fn get(&self, access: Access) -> usize {
        let value = self.value.load(access.load());
        if access == Access::Fence {
            fence(Ordering::SeqCst);
        }
        value
    }

    /// Writes the sequence.
    #[inline]
    pub fn set(&self, access: Access, value: usize) {
        self.value.store(value, access.store());
        if access == Access::Fence {
            fence(Ordering::SeqCst);
        }
    }

    /// Attempts to move the sequence from `current` to `new`.
    ///
    /// May fail spuriously; returns the observed value on failure.
    #[inline]
    pub fn compare_exchange_weak(
        &self,
        current: usize,
        new: usize,
        access: Access,
    ) -> Result<usize, usize> {
        let (success, failure) = access.exchange();
        self.value
            .compare_exchange_weak(current, new, success, failure)
    }
}

impl fmt::Debug for PaddedSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PaddedSequence")
            .field(&self.get(Access::Opaque))
            .finish()
    }
}
