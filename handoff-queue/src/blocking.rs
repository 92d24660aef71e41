//! Blocking consumer on top of a non-blocking queue.
//!
//! Producers stay non-blocking: `offer` still fails on a full queue. Only
//! the consumer gains [`take`](Consumer::take) and
//! [`poll_timeout`](Consumer::poll_timeout), which park the thread while the
//! queue is empty.
//!
//! # Wake-up protocol
//!
//! Producers only pay for an unpark when the consumer is actually waiting:
//!
//! ```text
//! Consumer                          Producer
//! ────────                          ────────
//! store(waiting, true)
//! [SeqCst fence]                    offer(value)
//! poll() -> empty                   [SeqCst fence]
//! park()                            load(waiting) -> true
//!                                   unpark()
//! ```
//!
//! The two fences order the flag store before the re-poll and the publish
//! before the flag load, so either the consumer sees the element or the
//! producer sees the flag. The parker keeps one wake-up token, so an unpark
//! that lands before `park` is not lost.
//!
//! # Example
//!
//! ```
//! use handoff_queue::blocking;
//! use std::thread;
//!
//! let (mut tx, mut rx) = blocking::queue::<u64>(16);
//!
//! let producer = thread::spawn(move || {
//!     for i in 0..100 {
//!         while tx.offer(i).is_err() {
//!             std::hint::spin_loop();
//!         }
//!     }
//! });
//!
//! for expected in 0..100 {
//!     assert_eq!(rx.take().unwrap(), expected);
//! }
//! producer.join().unwrap();
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering, fence};
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;
use crossbeam_utils::sync::{Parker, Unparker};
use tracing::{debug, trace};

use crate::error::{Full, Interrupted};
use crate::mpsc;
use crate::queue::{BlockingQueueConsumer, QueueConsumer, QueueProducer, SharedProducer};

/// Creates an MPSC queue whose consumer can block.
///
/// The actual capacity is rounded up to the next power of two.
///
/// # Panics
///
/// Panics if `capacity` is 0 or cannot be rounded up.
pub fn queue<T: Send>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let (producer, consumer) = mpsc::queue(capacity);
    wrap(producer, consumer)
}

/// Adds blocking waits to an existing producer/consumer pair.
///
/// Every element must go through the returned producer (or its clones);
/// offers made through another handle of the same queue do not wake the
/// consumer.
pub fn wrap<T, P, C>(producer: P, consumer: C) -> (Producer<T, P>, Consumer<T, C>)
where
    P: QueueProducer<T>,
    C: QueueConsumer<T>,
{
    let parker = Parker::new();
    let waiter = Arc::new(Waiter {
        waiting: CachePadded::new(AtomicBool::new(false)),
        interrupted: AtomicBool::new(false),
        unparker: parker.unparker().clone(),
    });

    (
        Producer {
            inner: ManuallyDrop::new(producer),
            waiter: Arc::clone(&waiter),
            _marker: PhantomData,
        },
        Consumer {
            inner: consumer,
            parker,
            waiter,
            _marker: PhantomData,
        },
    )
}

/// State shared between the consumer and everything that can wake it.
struct Waiter {
    /// Set while the consumer is about to park or parked.
    waiting: CachePadded<AtomicBool>,
    interrupted: AtomicBool,
    unparker: Unparker,
}

impl Waiter {
    /// Wakes the consumer if it's waiting. Of several racing producers only
    /// the one that clears the flag pays for the unpark.
    #[inline]
    fn notify(&self) {
        fence(Ordering::SeqCst);
        if self.waiting.load(Ordering::Relaxed) && self.waiting.swap(false, Ordering::AcqRel) {
            self.unparker.unpark();
        }
    }
}

/// The producing half of a blocking queue.
///
/// Clone it (when the wrapped producer is clonable) to add producers.
pub struct Producer<T, P = mpsc::Producer<T>> {
    /// Dropped by hand so a final flush can still wake the consumer.
    inner: ManuallyDrop<P>,
    waiter: Arc<Waiter>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, P: QueueProducer<T>> Producer<T, P> {
    /// Attempts to enqueue `value`, waking the consumer if it is waiting.
    ///
    /// The consumer is notified even when `value` is rejected: the wrapped
    /// producer may still have published an element it was holding back.
    ///
    /// # Errors
    ///
    /// Returns `Err(Full(value))` if the queue is full.
    #[inline]
    pub fn offer(&mut self, value: T) -> Result<(), Full<T>> {
        let result = self.inner.offer(value);
        self.waiter.notify();
        result
    }

    /// Enqueues up to `limit` elements from `supplier`, waking the consumer
    /// once if anything was enqueued.
    pub fn fill<F: FnMut() -> T>(&mut self, mut supplier: F, limit: usize) -> usize {
        let produced = self.inner.fill(&mut supplier, limit);
        if produced > 0 {
            self.waiter.notify();
        }
        produced
    }

    /// Returns the capacity of the queue.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Returns an estimate of the number of queued elements.
    #[inline]
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    /// Returns `true` if the queue looks empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<T, P: Clone> Clone for Producer<T, P> {
    fn clone(&self) -> Self {
        Self {
            inner: ManuallyDrop::new(P::clone(&self.inner)),
            waiter: Arc::clone(&self.waiter),
            _marker: PhantomData,
        }
    }
}

impl<T, P> Drop for Producer<T, P> {
    fn drop(&mut self) {
        // Safety: `inner` is never touched again.
        unsafe { ManuallyDrop::drop(&mut self.inner) };
        self.waiter.notify();
    }
}

impl<T: Send, P: QueueProducer<T>> QueueProducer<T> for Producer<T, P> {
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

impl<T, P> SharedProducer<T> for Producer<T, P>
where
    T: Send + 'static,
    P: QueueProducer<T> + Clone + 'static,
{
    fn clone_producer(&self) -> Box<dyn SharedProducer<T>> {
        Box::new(self.clone())
    }
}

impl<T, P: QueueProducer<T>> fmt::Debug for Producer<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

/// The consuming half of a blocking queue.
pub struct Consumer<T, C = mpsc::Consumer<T>> {
    inner: C,
    parker: Parker,
    waiter: Arc<Waiter>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C: QueueConsumer<T>> Consumer<T, C> {
    /// Consumes a pending interrupt, if any.
    #[inline]
    fn interrupted(&self) -> bool {
        self.waiter.interrupted.swap(false, Ordering::AcqRel)
    }

    /// Announces the wait, then polls once more.
    ///
    /// Returns the element if one slipped in; otherwise the caller parks and
    /// must clear `waiting` afterwards.
    #[inline]
    fn prepare_park(&mut self) -> Option<T> {
        self.waiter.waiting.store(true, Ordering::SeqCst);
        fence(Ordering::SeqCst);

        let value = self.inner.poll();
        if value.is_some() {
            self.waiter.waiting.store(false, Ordering::Relaxed);
        }
        value
    }

    /// Dequeues the next element, or `None` if none is visible.
    #[inline]
    pub fn poll(&mut self) -> Option<T> {
        self.inner.poll()
    }

    /// Borrows the next element without dequeuing it.
    #[inline]
    pub fn peek(&mut self) -> Option<&T> {
        self.inner.peek()
    }

    /// Hands up to `limit` elements to `consumer`; returns how many.
    pub fn drain<F: FnMut(T)>(&mut self, mut consumer: F, limit: usize) -> usize {
        self.inner.drain(&mut consumer, limit)
    }

    /// Waits until an element is available and dequeues it.
    ///
    /// An element that is already available is returned even if an
    /// interrupt is pending.
    ///
    /// # Errors
    ///
    /// [`Interrupted`] if an [`Interrupter`] fired before an element arrived.
    /// The interrupt is consumed.
    pub fn take(&mut self) -> Result<T, Interrupted> {
        loop {
            if let Some(value) = self.inner.poll() {
                return Ok(value);
            }
            if self.interrupted() {
                debug!("blocking take interrupted");
                return Err(Interrupted);
            }
            if let Some(value) = self.prepare_park() {
                return Ok(value);
            }

            trace!("consumer parking");
            self.parker.park();
            self.waiter.waiting.store(false, Ordering::Relaxed);
        }
    }

    /// Waits up to `timeout` for an element.
    ///
    /// Returns `Ok(None)` once the timeout has elapsed with the queue still
    /// empty. A timeout too large to represent waits like [`take`](Self::take).
    ///
    /// # Errors
    ///
    /// [`Interrupted`] if an [`Interrupter`] fired before an element arrived.
    ///
    /// # Example
    ///
    /// ```
    /// use handoff_queue::blocking;
    /// use std::time::Duration;
    ///
    /// let (_tx, mut rx) = blocking::queue::<u32>(4);
    /// assert_eq!(rx.poll_timeout(Duration::from_millis(5)), Ok(None));
    /// ```
    pub fn poll_timeout(&mut self, timeout: Duration) -> Result<Option<T>, Interrupted> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.take().map(Some);
        };

        loop {
            if let Some(value) = self.inner.poll() {
                return Ok(Some(value));
            }
            if self.interrupted() {
                debug!("blocking poll interrupted");
                return Err(Interrupted);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            if let Some(value) = self.prepare_park() {
                return Ok(Some(value));
            }

            trace!(remaining = ?(deadline - now), "consumer parking with timeout");
            self.parker.park_timeout(deadline - now);
            self.waiter.waiting.store(false, Ordering::Relaxed);
        }
    }

    /// Returns a handle that can cut this consumer's waits short.
    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            waiter: Arc::clone(&self.waiter),
        }
    }

    /// Returns the capacity of the queue.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Returns an estimate of the number of queued elements.
    #[inline]
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    /// Returns `true` if the queue looks empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<T: Send, C: QueueConsumer<T>> QueueConsumer<T> for Consumer<T, C> {
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

impl<T: Send, C: QueueConsumer<T>> BlockingQueueConsumer<T> for Consumer<T, C> {
    fn take(&mut self) -> Result<T, Interrupted> {
        Consumer::take(self)
    }

    fn poll_timeout(&mut self, timeout: Duration) -> Result<Option<T>, Interrupted> {
        Consumer::poll_timeout(self, timeout)
    }

    fn interrupter(&self) -> Interrupter {
        Consumer::interrupter(self)
    }
}

impl<T, C: QueueConsumer<T>> fmt::Debug for Consumer<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .field("waiting", &self.waiter.waiting.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Cancels the current or next wait of one blocking consumer.
///
/// An interrupt stays pending until a wait observes it; a pending interrupt
/// makes the next `take` or `poll_timeout` on an empty queue return
/// [`Interrupted`] at once.
#[derive(Clone)]
pub struct Interrupter {
    waiter: Arc<Waiter>,
}

impl Interrupter {
    /// Raises the interrupt and wakes the consumer.
    pub fn interrupt(&self) {
        self.waiter.interrupted.store(true, Ordering::Release);
        self.waiter.unparker.unpark();
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupter")
            .field("pending", &self.waiter.interrupted.load(Ordering::Relaxed))
            .finish()
    }
}
