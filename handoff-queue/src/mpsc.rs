//! Multi-producer single-consumer (MPSC) bounded queue.
//!
//! Producers race for slots with a compare-and-swap on `tail`; the winner
//! then writes and publishes its slot. Claiming and publishing are separate
//! steps, so the consumer checks the slot itself and treats a claimed but
//! unpublished slot as empty.
//!
//! # Example
//!
//! ```
//! use handoff_queue::mpsc;
//! use std::thread;
//!
//! let (tx, mut rx) = mpsc::queue::<u64>(1024);
//!
//! let handles: Vec<_> = (0..2u64)
//!     .map(|id| {
//!         let tx = tx.clone();
//!         thread::spawn(move || {
//!             for i in 0..100 {
//!                 while tx.offer(id * 1000 + i).is_err() {
//!                     std::hint::spin_loop();
//!                 }
//!             }
//!         })
//!     })
//!     .collect();
//!
//! let mut received = Vec::new();
//! while received.len() < 200 {
//!     if let Some(val) = rx.poll() {
//!         received.push(val);
//!     }
//! }
//!
//! for h in handles {
//!     h.join().unwrap();
//! }
//! assert_eq!(received.len(), 200);
//! ```
//!
//! # Performance Notes
//!
//! Producers share a cached `producer_limit` (`head + capacity` as last
//! seen) and only read the consumer's `head` once `tail` reaches it. A lost
//! CAS backs off: spin hints first, then a short park alternating with a
//! yield.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::base::{self, Shared};
use crate::error::Full;
use crate::queue::{QueueConsumer, QueueProducer, SharedProducer};
use crate::sequence::{Access, PaddedSequence};
use crate::wait::Contention;

/// Creates an MPSC queue with the given capacity.
///
/// The actual capacity is rounded up to the next power of two.
///
/// # Panics
///
/// Panics if `capacity` is 0 or cannot be rounded up.
pub fn queue<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let capacity = base::checked_capacity(capacity);
    let inner = Arc::new(Inner {
        base: Shared::new(capacity),
        producer_limit: PaddedSequence::new(capacity),
    });

    (
        Producer {
            inner: Arc::clone(&inner),
        },
        Consumer { inner },
    )
}

struct Inner<T> {
    base: Shared<T>,
    /// `head + capacity` as last observed by any producer. Stored with
    /// release so a producer trusting it inherits the acquire on `head`.
    producer_limit: PaddedSequence,
}

impl<T> Inner<T> {
    /// Returns the number of free slots past `tail`, refreshing the cached
    /// limit from `head` when it promises fewer than `wanted`. `None` means
    /// the queue is full.
    #[inline]
    fn available(&self, tail: usize, wanted: usize) -> Option<usize> {
        let cached = self.producer_limit.get(Access::AcquireRelease);
        let free = cached.wrapping_sub(tail) as isize;
        if free > 0 && free as usize >= wanted {
            return Some(free as usize);
        }

        let head = self.base.head().get(Access::AcquireRelease);
        let limit = head.wrapping_add(self.base.capacity());
        let free = limit.wrapping_sub(tail) as isize;
        if free <= 0 {
            return None;
        }
        self.producer_limit.set(Access::AcquireRelease, limit);
        Some(free as usize)
    }
}

/// The producing half of an MPSC queue.
///
/// Clone it to add producers; all clones share the same queue.
pub struct Producer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Producer<T> {
    /// Attempts to enqueue `value`.
    ///
    /// # Errors
    ///
    /// Returns `Err(Full(value))` if the queue is full.
    ///
    /// # Example
    ///
    /// ```
    /// use handoff_queue::mpsc;
    ///
    /// let (tx, _rx) = mpsc::queue::<u32>(2);
    ///
    /// assert!(tx.offer(1).is_ok());
    /// assert!(tx.offer(2).is_ok());
    /// assert!(tx.offer(3).is_err());
    /// ```
    #[inline]
    pub fn offer(&self, value: T) -> Result<(), Full<T>> {
        let inner = &*self.inner;
        let tail_seq = inner.base.tail();
        let mut contention: Option<Contention> = None;

        loop {
            let tail = tail_seq.get(Access::Opaque);
            if inner.available(tail, 1).is_none() {
                return Err(Full(value));
            }

            if tail_seq
                .compare_exchange_weak(tail, tail.wrapping_add(1), Access::Opaque)
                .is_ok()
            {
                // Safety: the claim is ours alone, and `available` proved the
                // slot's previous occupant was consumed (acquire on head).
                unsafe { inner.base.ring().slot(tail).publish(value) };
                return Ok(());
            }

            contention.get_or_insert_with(Contention::new).wait();
        }
    }

    /// Claims up to `limit` slots in one CAS and fills them from `supplier`.
    /// Returns the number enqueued.
    ///
    /// If `supplier` panics, the slots already claimed are never published
    /// and the consumer stalls at the first of them.
    pub fn fill<F: FnMut() -> T>(&self, mut supplier: F, limit: usize) -> usize {
        if limit == 0 {
            return 0;
        }

        let inner = &*self.inner;
        let tail_seq = inner.base.tail();
        let mut contention: Option<Contention> = None;

        let (tail, batch) = loop {
            let tail = tail_seq.get(Access::Opaque);
            let Some(available) = inner.available(tail, limit) else {
                return 0;
            };
            let batch = available.min(limit);

            if tail_seq
                .compare_exchange_weak(tail, tail.wrapping_add(batch), Access::Opaque)
                .is_ok()
            {
                break (tail, batch);
            }

            contention.get_or_insert_with(Contention::new).wait();
        };

        let ring = inner.base.ring();
        for offset in 0..batch {
            // Safety: [tail, tail + batch) was claimed by the CAS above.
            unsafe { ring.slot(tail.wrapping_add(offset)).publish(supplier()) };
        }

        batch
    }

    /// Returns the capacity of the queue.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.base.capacity()
    }

    /// Returns an estimate of the number of queued elements.
    #[inline]
    pub fn size(&self) -> usize {
        self.inner.base.size()
    }

    /// Returns `true` if the queue looks empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.base.is_empty()
    }
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send> QueueProducer<T> for Producer<T> {
    fn offer(&mut self, value: T) -> Result<(), Full<T>> {
        Producer::offer(self, value)
    }

    fn fill(&mut self, supplier: &mut dyn FnMut() -> T, limit: usize) -> usize {
        Producer::fill(self, supplier, limit)
    }

    fn capacity(&self) -> usize {
        Producer::capacity(self)
    }

    fn size(&self) -> usize {
        Producer::size(self)
    }

    fn is_empty(&self) -> bool {
        Producer::is_empty(self)
    }
}

impl<T: Send + 'static> SharedProducer<T> for Producer<T> {
    fn clone_producer(&self) -> Box<dyn SharedProducer<T>> {
        Box::new(self.clone())
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

/// The consuming half of an MPSC queue.
///
/// Not `Clone`: there is only one consumer.
pub struct Consumer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Consumer<T> {
    /// Dequeues the next element.
    ///
    /// Returns `None` both when the queue is empty and when a producer has
    /// claimed the next slot but not yet published it; the caller retries.
    ///
    /// # Example
    ///
    /// ```
    /// use handoff_queue::mpsc;
    ///
    /// let (tx, mut rx) = mpsc::queue::<u32>(8);
    ///
    /// assert_eq!(rx.poll(), None);
    /// tx.offer(42).unwrap();
    /// assert_eq!(rx.poll(), Some(42));
    /// ```
    #[inline]
    pub fn poll(&mut self) -> Option<T> {
        let base = &self.inner.base;
        let head = base.head().get(Access::Opaque);
        let slot = base.ring().slot(head);

        if !slot.is_occupied(Ordering::Acquire) {
            return None;
        }

        // Safety: published (acquire above); we are the only consumer.
        let value = unsafe { slot.take() };
        // release: a producer reusing this slot must see the value moved out
        base.head().set(Access::AcquireRelease, head.wrapping_add(1));

        Some(value)
    }

    /// Borrows the next element without dequeuing it.
    #[inline]
    pub fn peek(&mut self) -> Option<&T> {
        let base = &self.inner.base;
        let head = base.head().get(Access::Opaque);
        let slot = base.ring().slot(head);

        if !slot.is_occupied(Ordering::Acquire) {
            return None;
        }

        // Safety: producers never write an occupied slot and only we clear it.
        Some(unsafe { slot.value_ref() })
    }

    /// Hands up to `limit` elements to `consumer`; returns how many.
    pub fn drain<F: FnMut(T)>(&mut self, consumer: F, limit: usize) -> usize {
        base::drain_by(limit, || self.poll(), consumer)
    }

    /// Returns the capacity of the queue.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.base.capacity()
    }

    /// Returns an estimate of the number of queued elements.
    #[inline]
    pub fn size(&self) -> usize {
        self.inner.base.size()
    }

    /// Returns `true` if the queue looks empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.base.is_empty()
    }
}

impl<T: Send> QueueConsumer<T> for Consumer<T> {
    fn poll(&mut self) -> Option<T> {
        Consumer::poll(self)
    }

    fn peek(&mut self) -> Option<&T> {
        Consumer::peek(self)
    }

    fn drain(&mut self, consumer: &mut dyn FnMut(T), limit: usize) -> usize {
        Consumer::drain(self, consumer, limit)
    }

    fn capacity(&self) -> usize {
        Consumer::capacity(self)
    }

    fn size(&self) -> usize {
        Consumer::size(self)
    }

    fn is_empty(&self) -> bool {
        Consumer::is_empty(self)
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}
