//! Single-producer multi-consumer (SPMC) bounded queue.
//!
//! The producer alone moves `tail`. Consumers race for `head` with a
//! compare-and-swap, and the winner moves the element out of its slot. A slot
//! whose index was already claimed may still hold its value for a moment, so
//! the producer checks the slot itself before reusing it.
//!
//! # Example
//!
//! ```
//! use handoff_queue::spmc;
//! use std::thread;
//!
//! let (mut tx, rx) = spmc::queue::<u64>(64);
//!
//! let workers: Vec<_> = (0..2)
//!     .map(|_| {
//!         let mut rx = rx.clone();
//!         thread::spawn(move || {
//!             let mut sum = 0;
//!             loop {
//!                 match rx.poll() {
//!                     Some(0) => return sum,
//!                     Some(v) => sum += v,
//!                     None => std::hint::spin_loop(),
//!                 }
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for v in (1..=100).chain([0, 0]) {
//!     while tx.offer(v).is_err() {
//!         std::hint::spin_loop();
//!     }
//! }
//!
//! let total: u64 = workers.into_iter().map(|h| h.join().unwrap()).sum();
//! assert_eq!(total, 5050);
//! ```
//!
//! # Peeking
//!
//! Consumers cannot borrow a slot another consumer may take at any moment.
//! [`Consumer::peek`] therefore claims the next element into a per-handle
//! stash; the following `poll` on the same handle returns it. A stashed
//! element belongs to that handle: dropping the handle drops it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crossbeam_utils::Backoff;

use crate::base::{self, Shared};
use crate::error::Full;
use crate::queue::{QueueConsumer, QueueProducer, SharedConsumer};
use crate::sequence::{Access, PaddedSequence};
use crate::wait::Contention;

/// Creates an SPMC queue with the given capacity.
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
        consumer_limit: PaddedSequence::new(0),
    });

    (
        Producer {
            inner: Arc::clone(&inner),
            cached_head: 0,
        },
        Consumer { inner, stash: None },
    )
}

struct Inner<T> {
    base: Shared<T>,
    /// `tail` as last observed by any consumer.
    consumer_limit: PaddedSequence,
}

/// The producing half of an SPMC queue.
///
/// Takes `&mut self` to statically ensure single-producer access.
pub struct Producer<T> {
    inner: Arc<Inner<T>>,
    cached_head: usize,
}

impl<T> Producer<T> {
    /// Returns `true` once the slot for `tail` may be written, or `false` if
    /// the queue is full.
    ///
    /// A slot inside the window can still be occupied while the consumer that
    /// claimed it moves the value out; that is waited out here.
    #[inline]
    fn reserve(&mut self, tail: usize) -> bool {
        let base = &self.inner.base;
        let capacity = base.capacity();

        if tail.wrapping_sub(self.cached_head) >= capacity {
            self.cached_head = base.head().get(Access::AcquireRelease);
            if tail.wrapping_sub(self.cached_head) >= capacity {
                return false;
            }
        }

        let slot = base.ring().slot(tail);
        if slot.is_occupied(Ordering::Acquire) {
            let backoff = Backoff::new();
            while slot.is_occupied(Ordering::Acquire) {
                backoff.snooze();
            }
        }
        true
    }

    #[inline]
    fn publish(&self, tail: usize, value: T) {
        let base = &self.inner.base;
        // Safety: `reserve` saw the slot free with acquire ordering, and only
        // the producer writes slots.
        unsafe { base.ring().slot(tail).publish(value) };
        base.tail().set(Access::AcquireRelease, tail.wrapping_add(1));
    }

    /// Attempts to enqueue `value`.
    ///
    /// # Errors
    ///
    /// Returns `Err(Full(value))` if the queue is full.
    #[inline]
    pub fn offer(&mut self, value: T) -> Result<(), Full<T>> {
        let tail = self.inner.base.tail().get(Access::Plain);
        if !self.reserve(tail) {
            return Err(Full(value));
        }
        self.publish(tail, value);
        Ok(())
    }

    /// Enqueues up to `limit` elements from `supplier`. Returns the number
    /// enqueued.
    pub fn fill<F: FnMut() -> T>(&mut self, mut supplier: F, limit: usize) -> usize {
        let mut tail = self.inner.base.tail().get(Access::Plain);
        let mut produced = 0;

        while produced < limit && self.reserve(tail) {
            self.publish(tail, supplier());
            tail = tail.wrapping_add(1);
            produced += 1;
        }

        produced
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

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

/// A consuming handle of an SPMC queue.
///
/// Clone it to add consumers. Each clone starts with an empty stash.
pub struct Consumer<T> {
    inner: Arc<Inner<T>>,
    stash: Option<T>,
}

impl<T> Consumer<T> {
    /// Claims the next element from the ring.
    fn claim(&self) -> Option<T> {
        let inner = &*self.inner;
        let head_seq = inner.base.head();
        let mut contention: Option<Contention> = None;

        loop {
            let head = head_seq.get(Access::Opaque);

            let limit = inner.consumer_limit.get(Access::AcquireRelease);
            if (limit.wrapping_sub(head) as isize) <= 0 {
                let tail = inner.base.tail().get(Access::AcquireRelease);
                if (tail.wrapping_sub(head) as isize) <= 0 {
                    return None;
                }
                inner.consumer_limit.set(Access::AcquireRelease, tail);
            }

            if head_seq
                .compare_exchange_weak(head, head.wrapping_add(1), Access::AcquireRelease)
                .is_ok()
            {
                let slot = inner.base.ring().slot(head);
                // published before tail moved past it, so this only spins if
                // the publish is not yet visible here
                let backoff = Backoff::new();
                while !slot.is_occupied(Ordering::Acquire) {
                    backoff.snooze();
                }
                // Safety: the CAS gave us sole ownership of sequence `head`
                // and the acquire above saw it published.
                return Some(unsafe { slot.take() });
            }

            contention.get_or_insert_with(Contention::new).wait();
        }
    }

    /// Dequeues the next element, or `None` if the queue is empty.
    ///
    /// # Example
    ///
    /// ```
    /// use handoff_queue::spmc;
    ///
    /// let (mut tx, mut rx) = spmc::queue::<u32>(8);
    ///
    /// assert_eq!(rx.poll(), None);
    /// tx.offer(42).unwrap();
    /// assert_eq!(rx.poll(), Some(42));
    /// ```
    #[inline]
    pub fn poll(&mut self) -> Option<T> {
        self.stash.take().or_else(|| self.claim())
    }

    /// Claims the next element into this handle's stash and borrows it.
    ///
    /// Other consumers no longer see a peeked element.
    #[inline]
    pub fn peek(&mut self) -> Option<&T> {
        if self.stash.is_none() {
            self.stash = self.claim();
        }
        self.stash.as_ref()
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

    /// Returns an estimate of the queued elements, including this handle's
    /// stash.
    #[inline]
    pub fn size(&self) -> usize {
        (self.inner.base.size() + usize::from(self.stash.is_some())).min(self.capacity())
    }

    /// Returns `true` if the queue looks empty and nothing is stashed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stash.is_none() && self.inner.base.is_empty()
    }
}

impl<T> Clone for Consumer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            stash: None,
        }
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

impl<T: Send + 'static> SharedConsumer<T> for Consumer<T> {
    fn clone_consumer(&self) -> Box<dyn SharedConsumer<T>> {
        Box::new(self.clone())
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .field("stashed", &self.stash.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    // ============================================================================
    // Basic Operations
    // ============================================================================

    #[test]
    fn basic_offer_poll() {
        let (mut tx, mut rx) = queue::<u64>(8);

        tx.offer(1).unwrap();
        tx.offer(2).unwrap();
        tx.offer(3).unwrap();

        assert_eq!(rx.poll(), Some(1));
        assert_eq!(rx.poll(), Some(2));
        assert_eq!(rx.poll(), Some(3));
        assert_eq!(rx.poll(), None);
    }

    #[test]
    fn queue_full_until_polled() {
        let (mut tx, mut rx) = queue::<u64>(2);

        tx.offer(1).unwrap();
        tx.offer(2).unwrap();
        assert_eq!(tx.offer(3), Err(Full(3)));

        assert_eq!(rx.poll(), Some(1));
        tx.offer(3).unwrap();
        assert_eq!(rx.poll(), Some(2));
        assert_eq!(rx.poll(), Some(3));
    }

    #[test]
    fn clones_share_the_queue() {
        let (mut tx, mut rx1) = queue::<u64>(8);
        let mut rx2 = rx1.clone();

        tx.offer(1).unwrap();
        tx.offer(2).unwrap();

        assert_eq!(rx2.poll(), Some(1));
        assert_eq!(rx1.poll(), Some(2));
        assert_eq!(rx1.poll(), None);
        assert_eq!(rx2.poll(), None);
    }

    #[test]
    fn fill_and_drain() {
        let (mut tx, mut rx) = queue::<u64>(8);
        let mut next = 0;

        assert_eq!(
            tx.fill(
                || {
                    next += 1;
                    next
                },
                100
            ),
            8
        );
        assert_eq!(tx.fill(|| 0, 1), 0);

        let mut out = Vec::new();
        assert_eq!(rx.drain(|v| out.push(v), 5), 5);
        assert_eq!(rx.drain(|v| out.push(v), 5), 3);
        assert_eq!(out, (1..=8).collect::<Vec<_>>());
    }

    // ============================================================================
    // Peek
    // ============================================================================

    #[test]
    fn peek_stashes_for_this_handle() {
        let (mut tx, mut rx1) = queue::<u64>(8);
        let mut rx2 = rx1.clone();

        tx.offer(1).unwrap();
        tx.offer(2).unwrap();

        assert_eq!(rx1.peek(), Some(&1));
        assert_eq!(rx1.peek(), Some(&1));
        assert_eq!(rx1.size(), 2);
        assert!(!rx1.is_empty());

        // the peeked element is no longer visible to other handles
        assert_eq!(rx2.poll(), Some(2));
        assert_eq!(rx2.poll(), None);

        assert_eq!(rx1.poll(), Some(1));
        assert!(rx1.is_empty());
    }

    #[test]
    fn clone_does_not_copy_stash() {
        let (mut tx, mut rx1) = queue::<u64>(4);
        tx.offer(7).unwrap();

        assert_eq!(rx1.peek(), Some(&7));
        let mut rx2 = rx1.clone();
        assert_eq!(rx2.poll(), None);
        assert_eq!(rx1.poll(), Some(7));
    }

    #[test]
    fn stash_dropped_with_handle() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct DropCounter;
        impl Drop for DropCounter {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (mut tx, mut rx) = queue::<DropCounter>(4);
        let _ = tx.offer(DropCounter);
        let _ = tx.offer(DropCounter);

        assert!(rx.peek().is_some());
        drop(rx);
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);

        drop(tx);
        assert_eq!(DROPS.load(Ordering::SeqCst), 2);
    }

    // ============================================================================
    // Cross-Thread
    // ============================================================================

    #[test]
    fn claimed_slot_waits_for_publish() {
        let (tx, mut rx) = queue::<u64>(4);

        // tail moves before the slot contents are visible
        let base = &tx.inner.base;
        base.tail().set(Access::AcquireRelease, 1);

        let consumer = thread::spawn(move || rx.poll());

        thread::sleep(std::time::Duration::from_millis(20));
        unsafe { base.ring().slot(0).publish(5) };

        assert_eq!(consumer.join().unwrap(), Some(5));
        assert_eq!(base.head().get(Access::AcquireRelease), 1);
    }

    #[test]
    fn multi_consumer_each_element_once() {
        const CONSUMERS: usize = 4;
        const COUNT: u64 = 40_000;

        let (mut tx, rx) = queue::<u64>(64);
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let taken = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let mut rx = rx.clone();
                let seen = Arc::clone(&seen);
                let taken = Arc::clone(&taken);
                thread::spawn(move || {
                    let mut local = Vec::new();
                    while taken.load(Ordering::Relaxed) < COUNT as usize {
                        if let Some(v) = rx.poll() {
                            local.push(v);
                            taken.fetch_add(1, Ordering::Relaxed);
                        } else {
                            std::hint::spin_loop();
                        }
                    }
                    let mut seen = seen.lock().unwrap();
                    for v in local {
                        assert!(seen.insert(v), "element {v} delivered twice");
                    }
                })
            })
            .collect();
        drop(rx);

        for i in 0..COUNT {
            while tx.offer(i).is_err() {
                std::hint::spin_loop();
            }
        }

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(seen.lock().unwrap().len(), COUNT as usize);
    }
}
