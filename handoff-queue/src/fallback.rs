//! Portable backend over [`crossbeam_queue::ArrayQueue`].
//!
//! Used where the native rings are unavailable or unwanted. `ArrayQueue` is
//! multi-producer multi-consumer, so one pair of handle types serves every
//! topology; both handles are `Clone`.
//!
//! Two contract points need per-handle state on top of `ArrayQueue`:
//!
//! - `fill` asks the supplier for an element before it knows the push will
//!   succeed. If another producer took the last slot in between, the element
//!   is carried by this handle and pushed ahead of anything else on the next
//!   `offer` or `fill`.
//! - `peek` cannot borrow from `ArrayQueue`, so it pops into a per-handle
//!   stash that the next `poll` returns.

use std::fmt;
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use tracing::debug;

use crate::base;
use crate::error::Full;
use crate::queue::{QueueConsumer, QueueProducer, SharedConsumer, SharedProducer};

/// Creates a fallback queue with the given capacity.
///
/// The actual capacity is rounded up to the next power of two, like the
/// native queues.
///
/// # Panics
///
/// Panics if `capacity` is 0 or cannot be rounded up.
///
/// # Example
///
/// ```
/// use handoff_queue::fallback;
///
/// let (mut tx, mut rx) = fallback::queue::<u32>(3);
/// assert_eq!(tx.capacity(), 4);
///
/// tx.offer(1).unwrap();
/// assert_eq!(rx.peek(), Some(&1));
/// assert_eq!(rx.poll(), Some(1));
/// ```
pub fn queue<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let queue = Arc::new(ArrayQueue::new(base::checked_capacity(capacity)));
    (
        Producer {
            queue: Arc::clone(&queue),
            carry: None,
        },
        Consumer { queue, stash: None },
    )
}

/// A producing handle of a fallback queue.
pub struct Producer<T> {
    queue: Arc<ArrayQueue<T>>,
    /// Supplied by `fill` but not yet pushed.
    carry: Option<T>,
}

impl<T> Producer<T> {
    /// Pushes the carried element, if any. Returns `false` if it is still
    /// carried.
    #[inline]
    fn flush_carry(&mut self) -> bool {
        match self.carry.take() {
            Some(value) => match self.queue.push(value) {
                Ok(()) => true,
                Err(value) => {
                    self.carry = Some(value);
                    false
                }
            },
            None => true,
        }
    }

    /// Attempts to enqueue `value`.
    ///
    /// # Errors
    ///
    /// Returns `Err(Full(value))` if the queue is full.
    #[inline]
    pub fn offer(&mut self, value: T) -> Result<(), Full<T>> {
        if !self.flush_carry() {
            return Err(Full(value));
        }
        self.queue.push(value).map_err(Full)
    }

    /// Enqueues up to `limit` elements from `supplier`. Returns the number
    /// pushed during this call, including a previously carried element.
    pub fn fill<F: FnMut() -> T>(&mut self, mut supplier: F, limit: usize) -> usize {
        let mut produced = 0;
        if limit == 0 {
            return produced;
        }

        if self.carry.is_some() {
            if !self.flush_carry() {
                return produced;
            }
            produced += 1;
        }

        while produced < limit && !self.queue.is_full() {
            if let Err(value) = self.queue.push(supplier()) {
                self.carry = Some(value);
                break;
            }
            produced += 1;
        }

        produced
    }

    /// Returns the capacity of the queue.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Returns an estimate of the number of queued elements.
    #[inline]
    pub fn size(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if the queue looks empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            carry: None,
        }
    }
}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        if !self.flush_carry() {
            debug!("fallback producer dropped with a carried element and a full queue");
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
            .field("carrying", &self.carry.is_some())
            .finish_non_exhaustive()
    }
}

/// A consuming handle of a fallback queue.
pub struct Consumer<T> {
    queue: Arc<ArrayQueue<T>>,
    stash: Option<T>,
}

impl<T> Consumer<T> {
    /// Dequeues the next element, or `None` if the queue is empty.
    #[inline]
    pub fn poll(&mut self) -> Option<T> {
        self.stash.take().or_else(|| self.queue.pop())
    }

    /// Pops the next element into this handle's stash and borrows it.
    #[inline]
    pub fn peek(&mut self) -> Option<&T> {
        if self.stash.is_none() {
            self.stash = self.queue.pop();
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
        self.queue.capacity()
    }

    /// Returns an estimate of the queued elements, including this handle's
    /// stash.
    #[inline]
    pub fn size(&self) -> usize {
        (self.queue.len() + usize::from(self.stash.is_some())).min(self.capacity())
    }

    /// Returns `true` if the queue looks empty and nothing is stashed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stash.is_none() && self.queue.is_empty()
    }
}

impl<T> Clone for Consumer<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
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
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn rounds_capacity() {
        let (tx, rx) = queue::<u8>(5);
        assert_eq!(tx.capacity(), 8);
        assert_eq!(rx.capacity(), 8);
    }

    #[test]
    fn offer_poll_fifo() {
        let (mut tx, mut rx) = queue::<u64>(4);
        for i in 0..4 {
            tx.offer(i).unwrap();
        }
        assert_eq!(tx.offer(4), Err(Full(4)));
        assert_eq!(tx.size(), 4);

        for i in 0..4 {
            assert_eq!(rx.poll(), Some(i));
        }
        assert_eq!(rx.poll(), None);
    }

    #[test]
    fn peek_stashes() {
        let (mut tx, mut rx) = queue::<u64>(2);
        tx.offer(1).unwrap();
        tx.offer(2).unwrap();

        assert_eq!(rx.peek(), Some(&1));
        assert_eq!(rx.size(), 2);

        // the stash frees a ring slot
        tx.offer(3).unwrap();
        assert_eq!(rx.size(), 2);

        let mut out = Vec::new();
        assert_eq!(rx.drain(|v| out.push(v), 10), 3);
        assert_eq!(out, vec![1, 2, 3]);
        assert!(rx.is_empty());
    }

    #[test]
    fn fill_stops_when_full() {
        let (mut tx, mut rx) = queue::<u64>(4);
        let mut next = 0;
        assert_eq!(
            tx.fill(
                || {
                    next += 1;
                    next
                },
                10
            ),
            4
        );
        assert_eq!(next, 4, "supplier called without room");
        assert_eq!(tx.fill(|| 0, 0), 0);
        assert_eq!(rx.drain(|_| {}, usize::MAX), 4);
    }

    #[test]
    fn carried_element_goes_first() {
        let (mut tx, mut rx) = queue::<u64>(2);
        tx.carry = Some(100);

        tx.offer(1).unwrap();
        assert_eq!(tx.offer(2), Err(Full(2)));
        assert_eq!(rx.poll(), Some(100));
        assert_eq!(rx.poll(), Some(1));

        tx.carry = Some(200);
        assert_eq!(tx.fill(|| 5, 2), 2);
        assert_eq!(rx.poll(), Some(200));
        assert_eq!(rx.poll(), Some(5));
    }

    #[test]
    fn drop_flushes_carry() {
        let (mut tx, mut rx) = queue::<u64>(2);
        tx.carry = Some(9);
        drop(tx);
        assert_eq!(rx.poll(), Some(9));
    }

    #[test]
    fn drop_releases_everything() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct DropCounter;
        impl Drop for DropCounter {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (mut tx, mut rx) = queue::<DropCounter>(2);
        let _ = tx.offer(DropCounter);
        let _ = tx.offer(DropCounter);
        tx.carry = Some(DropCounter);
        assert!(rx.peek().is_some());

        drop(tx);
        drop(rx);
        assert_eq!(DROPS.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cross_thread_producers() {
        const PRODUCERS: u64 = 3;
        const N: u64 = 5_000;

        let (tx, mut rx) = queue::<u64>(32);
        let handles: Vec<_> = (0..PRODUCERS)
            .map(|id| {
                let mut tx = tx.clone();
                thread::spawn(move || {
                    for i in 0..N {
                        while tx.offer(id * N + i).is_err() {
                            std::hint::spin_loop();
                        }
                    }
                })
            })
            .collect();
        drop(tx);

        let mut count = 0;
        let mut sum = 0;
        while count < PRODUCERS * N {
            if let Some(v) = rx.poll() {
                sum += v;
                count += 1;
            }
        }
        let total = PRODUCERS * N;
        assert_eq!(sum, total * (total - 1) / 2);

        for h in handles {
            h.join().unwrap();
        }
    }
}
