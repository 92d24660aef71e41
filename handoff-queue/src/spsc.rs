//! Single-producer single-consumer (SPSC) bounded queue.
//!
//! Neither index is contended: the producer alone moves `tail`, the consumer
//! alone moves `head`. Each side caches the other side's index so the hot
//! path touches no shared line until the cached view runs out.
//!
//! # Example
//!
//! ```
//! use handoff_queue::spsc;
//!
//! let (mut tx, mut rx) = spsc::queue::<u64>(1024);
//!
//! tx.offer(1).unwrap();
//! tx.offer(2).unwrap();
//!
//! assert_eq!(rx.peek(), Some(&1));
//! assert_eq!(rx.poll(), Some(1));
//! assert_eq!(rx.poll(), Some(2));
//! assert_eq!(rx.poll(), None);
//! ```
//!
//! # Batching
//!
//! [`Producer::fill`] and [`Consumer::drain`] look `step` slots ahead, where
//! `step = min(capacity / 4, max_lookahead)`. If the far slot is already
//! free (fill) or published (drain), every slot before it is too, and the
//! whole batch moves without another acquire load.
//!
//! ```text
//!   head                 tail        tail + step - 1
//!    │                    │               │
//!    ▼                    ▼               ▼
//! ┌────┬────┬────┬────┬────┬────┬────┬────┐
//! │ e0 │ e1 │ e2 │ e3 │    │    │    │    │   free at the far slot ⇒
//! └────┴────┴────┴────┴────┴────┴────┴────┘   the batch in between is free
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::base::{self, Shared};
use crate::error::Full;
use crate::queue::{QueueConsumer, QueueProducer};
use crate::sequence::Access;

/// Default ceiling on the look-ahead step.
pub const DEFAULT_MAX_LOOKAHEAD: usize = 4096;

/// Creates an SPSC queue with the given capacity.
///
/// The actual capacity is rounded up to the next power of two.
///
/// # Panics
///
/// Panics if `capacity` is 0 or cannot be rounded up.
///
/// # Example
///
/// ```
/// use handoff_queue::spsc;
///
/// let (tx, _rx) = spsc::queue::<String>(100);
/// assert_eq!(tx.capacity(), 128);
/// ```
pub fn queue<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    with_max_lookahead(capacity, DEFAULT_MAX_LOOKAHEAD)
}

/// Creates an SPSC queue with a custom look-ahead ceiling.
///
/// # Panics
///
/// Panics if `capacity` is 0 or cannot be rounded up.
pub fn with_max_lookahead<T>(capacity: usize, max_lookahead: usize) -> (Producer<T>, Consumer<T>) {
    let capacity = base::checked_capacity(capacity);
    let step = lookahead_step(capacity, max_lookahead);
    let shared = Arc::new(Shared::new(capacity));

    (
        Producer {
            shared: Arc::clone(&shared),
            cached_head: 0,
            step,
        },
        Consumer {
            shared,
            cached_tail: 0,
            step,
        },
    )
}

#[inline]
const fn lookahead_step(capacity: usize, max_lookahead: usize) -> usize {
    let quarter = capacity / 4;
    if quarter < max_lookahead {
        quarter
    } else {
        max_lookahead
    }
}

/// The producing half of an SPSC queue.
///
/// Takes `&mut self` to statically ensure single-producer access.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    /// Last observed consumer position; a lower bound of the real `head`.
    cached_head: usize,
    step: usize,
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
    /// use handoff_queue::spsc;
    ///
    /// let (mut tx, _rx) = spsc::queue::<u32>(2);
    ///
    /// assert!(tx.offer(1).is_ok());
    /// assert!(tx.offer(2).is_ok());
    /// assert_eq!(tx.offer(3).unwrap_err().into_inner(), 3);
    /// ```
    #[inline]
    pub fn offer(&mut self, value: T) -> Result<(), Full<T>> {
        let shared = &*self.shared;
        let tail = shared.tail().get(Access::Plain);
        let capacity = shared.capacity();

        if tail.wrapping_sub(self.cached_head) >= capacity {
            self.cached_head = shared.head().get(Access::AcquireRelease);
            if tail.wrapping_sub(self.cached_head) >= capacity {
                return Err(Full(value));
            }
        }

        // Safety: head > tail - capacity, so the slot's previous occupant was
        // consumed, and the acquire on head ordered that consumption first.
        unsafe { shared.ring().slot(tail).publish(value) };
        shared.tail().set(Access::AcquireRelease, tail.wrapping_add(1));

        Ok(())
    }

    /// Enqueues up to `limit` elements from `supplier`, batching with
    /// look-ahead. Returns the number enqueued.
    pub fn fill<F: FnMut() -> T>(&mut self, mut supplier: F, limit: usize) -> usize {
        let shared = &*self.shared;
        let ring = shared.ring();
        let mut tail = shared.tail().get(Access::Plain);
        let mut produced = 0;

        while produced < limit {
            let batch = self.step.min(limit - produced);

            let far = ring.slot(tail.wrapping_add(batch.saturating_sub(1)));
            if batch > 1 && !far.is_occupied(Ordering::Acquire) {
                for _ in 0..batch {
                    // Safety: the consumer frees slots in order; the far slot
                    // being free implies every slot before it is free.
                    unsafe { ring.slot(tail).publish(supplier()) };
                    tail = tail.wrapping_add(1);
                    shared.tail().set(Access::AcquireRelease, tail);
                }
                produced += batch;
            } else {
                let slot = ring.slot(tail);
                if slot.is_occupied(Ordering::Acquire) {
                    break;
                }
                // Safety: checked free above, and only we write slots.
                unsafe { slot.publish(supplier()) };
                tail = tail.wrapping_add(1);
                shared.tail().set(Access::AcquireRelease, tail);
                produced += 1;
            }
        }

        produced
    }

    /// Returns the capacity of the queue.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Returns an estimate of the number of queued elements.
    #[inline]
    pub fn size(&self) -> usize {
        self.shared.size()
    }

    /// Returns `true` if the queue looks empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shared.is_empty()
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

/// The consuming half of an SPSC queue.
///
/// Takes `&mut self` to statically ensure single-consumer access.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    /// Last observed producer position; an upper bound of what we consumed.
    cached_tail: usize,
    step: usize,
}

impl<T> Consumer<T> {
    /// Returns `true` if an element at `head` is visible, refreshing the
    /// cached tail when it runs out.
    #[inline]
    fn has_next(&mut self, head: usize) -> bool {
        if head == self.cached_tail {
            self.cached_tail = self.shared.tail().get(Access::AcquireRelease);
            if head == self.cached_tail {
                return false;
            }
        }
        true
    }

    /// Dequeues the next element, or `None` if the queue is empty.
    ///
    /// # Example
    ///
    /// ```
    /// use handoff_queue::spsc;
    ///
    /// let (mut tx, mut rx) = spsc::queue::<u32>(8);
    ///
    /// assert_eq!(rx.poll(), None);
    /// tx.offer(42).unwrap();
    /// assert_eq!(rx.poll(), Some(42));
    /// ```
    #[inline]
    pub fn poll(&mut self) -> Option<T> {
        let head = self.shared.head().get(Access::Plain);
        if !self.has_next(head) {
            return None;
        }

        let shared = &*self.shared;
        let slot = shared.ring().slot(head);
        if !slot.is_occupied(Ordering::Acquire) {
            return None;
        }

        // Safety: published (acquire above) and we are the only consumer.
        let value = unsafe { slot.take() };
        shared.head().set(Access::AcquireRelease, head.wrapping_add(1));

        Some(value)
    }

    /// Borrows the next element without dequeuing it.
    #[inline]
    pub fn peek(&mut self) -> Option<&T> {
        let head = self.shared.head().get(Access::Plain);
        if !self.has_next(head) {
            return None;
        }

        let slot = self.shared.ring().slot(head);
        if !slot.is_occupied(Ordering::Acquire) {
            return None;
        }

        // Safety: only this consumer clears the slot, and it cannot while
        // the returned borrow of `self` is alive.
        Some(unsafe { slot.value_ref() })
    }

    /// Hands up to `limit` elements to `consumer`, batching with look-ahead.
    /// Returns the number consumed.
    pub fn drain<F: FnMut(T)>(&mut self, mut consumer: F, limit: usize) -> usize {
        let shared = &*self.shared;
        let ring = shared.ring();
        let mut head = shared.head().get(Access::Plain);
        let mut consumed = 0;

        while consumed < limit {
            let batch = self.step.min(limit - consumed);

            let far = ring.slot(head.wrapping_add(batch.saturating_sub(1)));
            if batch > 1 && far.is_occupied(Ordering::Acquire) {
                for _ in 0..batch {
                    // Safety: the producer publishes in order; the far slot
                    // being published implies every slot before it is too.
                    let value = unsafe { ring.slot(head).take() };
                    head = head.wrapping_add(1);
                    shared.head().set(Access::AcquireRelease, head);
                    consumer(value);
                }
                consumed += batch;
            } else {
                let slot = ring.slot(head);
                if !slot.is_occupied(Ordering::Acquire) {
                    break;
                }
                // Safety: published (acquire above) and we are the only consumer.
                let value = unsafe { slot.take() };
                head = head.wrapping_add(1);
                shared.head().set(Access::AcquireRelease, head);
                consumer(value);
                consumed += 1;
            }
        }

        consumed
    }

    /// Returns the capacity of the queue.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Returns an estimate of the number of queued elements.
    #[inline]
    pub fn size(&self) -> usize {
        self.shared.size()
    }

    /// Returns `true` if the queue looks empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shared.is_empty()
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    // ============================================================================
    // Basic Operations
    // ============================================================================

    #[test]
    fn basic_offer_poll() {
        let (mut tx, mut rx) = queue::<u64>(4);

        assert!(tx.offer(1).is_ok());
        assert!(tx.offer(2).is_ok());
        assert!(tx.offer(3).is_ok());

        assert_eq!(rx.poll(), Some(1));
        assert_eq!(rx.poll(), Some(2));
        assert_eq!(rx.poll(), Some(3));
        assert_eq!(rx.poll(), None);
    }

    #[test]
    fn empty_poll_returns_none() {
        let (_tx, mut rx) = queue::<u64>(4);
        for _ in 0..10 {
            assert_eq!(rx.poll(), None);
            assert_eq!(rx.peek(), None);
        }
    }

    #[test]
    fn offer_returns_value_when_full() {
        let (mut tx, _rx) = queue::<u64>(4);

        for i in 0..4 {
            assert!(tx.offer(i).is_ok());
        }

        let err = tx.offer(5).unwrap_err();
        assert_eq!(err.into_inner(), 5);
        assert_eq!(tx.size(), 4);
    }

    #[test]
    fn peek_does_not_consume() {
        let (mut tx, mut rx) = queue::<String>(4);

        tx.offer("a".to_string()).unwrap();
        tx.offer("b".to_string()).unwrap();

        assert_eq!(rx.peek().map(String::as_str), Some("a"));
        assert_eq!(rx.peek().map(String::as_str), Some("a"));
        assert_eq!(rx.size(), 2);
        assert_eq!(rx.poll().as_deref(), Some("a"));
        assert_eq!(rx.peek().map(String::as_str), Some("b"));
    }

    #[test]
    fn capacity_one() {
        let (mut tx, mut rx) = queue::<u64>(1);
        assert_eq!(tx.capacity(), 1);

        assert!(tx.offer(1).is_ok());
        assert!(tx.offer(2).is_err());
        assert_eq!(rx.poll(), Some(1));
        assert!(tx.offer(2).is_ok());
        assert_eq!(rx.poll(), Some(2));
    }

    #[test]
    fn interleaved_many_laps() {
        let (mut tx, mut rx) = queue::<u64>(8);

        for i in 0..1000 {
            assert!(tx.offer(i).is_ok());
            assert_eq!(rx.poll(), Some(i));
        }
        assert!(rx.is_empty());
    }

    // ============================================================================
    // Batching
    // ============================================================================

    #[test]
    fn lookahead_step_is_quarter_capped() {
        assert_eq!(lookahead_step(1, 4096), 0);
        assert_eq!(lookahead_step(16, 4096), 4);
        assert_eq!(lookahead_step(1 << 20, 4096), 4096);
        assert_eq!(lookahead_step(64, 8), 8);
    }

    #[test]
    fn fill_stops_at_capacity() {
        let (mut tx, mut rx) = queue::<u64>(16);
        let mut next = 0;

        let filled = tx.fill(
            || {
                next += 1;
                next
            },
            100,
        );
        assert_eq!(filled, 16);
        assert_eq!(tx.size(), 16);

        for i in 1..=16 {
            assert_eq!(rx.poll(), Some(i));
        }
    }

    #[test]
    fn fill_after_partial_drain_uses_single_steps() {
        let (mut tx, mut rx) = queue::<u64>(16);
        assert_eq!(tx.fill(|| 7, 16), 16);

        // free exactly one slot, the look-ahead slot stays occupied
        assert_eq!(rx.poll(), Some(7));
        assert_eq!(tx.fill(|| 8, 16), 1);
        assert!(tx.offer(9).is_err());
    }

    #[test]
    fn drain_respects_limit_and_order() {
        let (mut tx, mut rx) = queue::<u64>(32);
        for i in 0..20 {
            tx.offer(i).unwrap();
        }

        let mut out = Vec::new();
        assert_eq!(rx.drain(|v| out.push(v), 10), 10);
        assert_eq!(rx.drain(|v| out.push(v), 100), 10);
        assert_eq!(rx.drain(|v| out.push(v), 100), 0);

        assert_eq!(out, (0..20).collect::<Vec<_>>());
        assert!(rx.is_empty());
    }

    #[test]
    fn zero_limit_is_noop() {
        let (mut tx, mut rx) = queue::<u64>(8);
        assert_eq!(tx.fill(|| 1, 0), 0);
        tx.offer(1).unwrap();
        assert_eq!(rx.drain(|_| {}, 0), 0);
        assert_eq!(rx.size(), 1);
    }

    #[test]
    fn offer_after_batched_drain() {
        let (mut tx, mut rx) = queue::<u64>(16);

        for round in 0..50u64 {
            assert_eq!(tx.fill(|| round, 16), 16);
            assert_eq!(rx.drain(|v| assert_eq!(v, round), 16), 16);
            assert!(tx.offer(round).is_ok());
            assert_eq!(rx.poll(), Some(round));
        }
    }

    // ============================================================================
    // Drop Behavior
    // ============================================================================

    #[test]
    fn drop_cleans_up_remaining() {
        static DROP_COUNT: AtomicUsize = AtomicUsize::new(0);

        struct DropCounter;
        impl Drop for DropCounter {
            fn drop(&mut self) {
                DROP_COUNT.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (mut tx, mut rx) = queue::<DropCounter>(4);

        let _ = tx.offer(DropCounter);
        let _ = tx.offer(DropCounter);
        let _ = tx.offer(DropCounter);

        drop(rx.poll());
        assert_eq!(DROP_COUNT.load(Ordering::SeqCst), 1);

        drop(tx);
        drop(rx);

        assert_eq!(DROP_COUNT.load(Ordering::SeqCst), 3);
    }

    // ============================================================================
    // Cross-Thread
    // ============================================================================

    #[test]
    fn cross_thread_fifo_preserved() {
        const COUNT: u64 = 100_000;
        let (mut tx, mut rx) = queue::<u64>(64);

        let producer = thread::spawn(move || {
            for i in 0..COUNT {
                while tx.offer(i).is_err() {
                    std::hint::spin_loop();
                }
            }
        });

        let mut expected = 0;
        while expected < COUNT {
            match rx.poll() {
                Some(v) => {
                    assert_eq!(v, expected, "FIFO order was violated");
                    expected += 1;
                }
                None => std::hint::spin_loop(),
            }
        }

        producer.join().unwrap();
        assert_eq!(rx.poll(), None);
    }

    #[test]
    fn cross_thread_batched() {
        const COUNT: u64 = 100_000;
        let (mut tx, mut rx) = queue::<u64>(256);

        let producer = thread::spawn(move || {
            let mut next = 0u64;
            while next < COUNT {
                let want = ((COUNT - next) as usize).min(64);
                let mut value = next;
                let filled = tx.fill(
                    || {
                        let v = value;
                        value += 1;
                        v
                    },
                    want,
                );
                next += filled as u64;
            }
        });

        let mut expected = 0;
        while expected < COUNT {
            rx.drain(
                |v| {
                    assert_eq!(v, expected);
                    expected += 1;
                },
                128,
            );
        }

        producer.join().unwrap();
    }
}
