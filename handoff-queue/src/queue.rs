//! The operation contract every backend satisfies.
//!
//! Producer and consumer roles are separate handles. A handle that may be
//! shared between several threads of the same role (MPSC producers, SPMC
//! consumers) is cloned through [`SharedProducer`] / [`SharedConsumer`];
//! single-role handles cannot be cloned at all, which is what keeps an SPSC
//! queue single-producer.
//!
//! The methods take `&mut dyn` callbacks so the traits stay object safe and
//! [`QueueFactory`](crate::QueueFactory) can hand out boxed handles. Concrete
//! handles also expose generic inherent versions of the same methods.

use std::time::Duration;

use crate::base;
use crate::error::{Full, Interrupted};
use crate::wait::{ExitCondition, WaitStrategy};

/// Elements moved per call inside `drain_with` / `fill_with`.
const WAIT_BATCH: usize = 64;

/// The producing side of a queue.
pub trait QueueProducer<T>: Send {
    /// Attempts to enqueue `value`. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns `Err(Full(value))` if there is no free slot.
    fn offer(&mut self, value: T) -> Result<(), Full<T>>;

    /// Enqueues up to `limit` elements produced by `supplier`.
    ///
    /// The supplier is only called once room for its element is known.
    /// Returns the number of elements produced.
    fn fill(&mut self, supplier: &mut dyn FnMut() -> T, limit: usize) -> usize;

    /// Fixed capacity, a power of two.
    fn capacity(&self) -> usize;

    /// Best-effort element count, in `[0, capacity]`.
    fn size(&self) -> usize;

    /// Conservative emptiness check.
    fn is_empty(&self) -> bool;

    /// [`fill`](Self::fill) with `limit = capacity`.
    fn fill_all(&mut self, supplier: &mut dyn FnMut() -> T) -> usize {
        let limit = self.capacity();
        self.fill(supplier, limit)
    }

    /// Keeps filling until `exit` says stop, idling through `wait` whenever
    /// the queue is full. Returns the total number produced.
    fn fill_with(
        &mut self,
        supplier: &mut dyn FnMut() -> T,
        wait: &mut dyn WaitStrategy,
        exit: &dyn ExitCondition,
    ) -> usize {
        let mut total = 0;
        let mut idle = 0;
        while exit.keep_running() {
            let produced = self.fill(&mut *supplier, WAIT_BATCH);
            if produced == 0 {
                idle = wait.idle(idle);
            } else {
                idle = 0;
                total += produced;
            }
        }
        total
    }
}

/// The consuming side of a queue.
pub trait QueueConsumer<T>: Send {
    /// Dequeues the next element, or `None` if none is visible. Never blocks.
    fn poll(&mut self) -> Option<T>;

    /// Borrows the next element without dequeuing it.
    fn peek(&mut self) -> Option<&T>;

    /// Hands up to `limit` elements to `consumer`; returns how many.
    fn drain(&mut self, consumer: &mut dyn FnMut(T), limit: usize) -> usize {
        base::drain_by(limit, || self.poll(), &mut *consumer)
    }

    /// Fixed capacity, a power of two.
    fn capacity(&self) -> usize;

    /// Best-effort element count, in `[0, capacity]`.
    fn size(&self) -> usize;

    /// Conservative emptiness check.
    fn is_empty(&self) -> bool;

    /// [`drain`](Self::drain) with `limit = capacity`.
    fn drain_all(&mut self, consumer: &mut dyn FnMut(T)) -> usize {
        let limit = self.capacity();
        self.drain(consumer, limit)
    }

    /// Keeps draining until `exit` says stop, idling through `wait` whenever
    /// the queue is empty. Returns the total number consumed.
    fn drain_with(
        &mut self,
        consumer: &mut dyn FnMut(T),
        wait: &mut dyn WaitStrategy,
        exit: &dyn ExitCondition,
    ) -> usize {
        let mut total = 0;
        let mut idle = 0;
        while exit.keep_running() {
            let consumed = self.drain(&mut *consumer, WAIT_BATCH);
            if consumed == 0 {
                idle = wait.idle(idle);
            } else {
                idle = 0;
                total += consumed;
            }
        }
        total
    }
}

/// A producer handle that several threads may each hold a clone of.
pub trait SharedProducer<T>: QueueProducer<T> {
    /// Clones this handle into a new box.
    fn clone_producer(&self) -> Box<dyn SharedProducer<T>>;
}

impl<T> Clone for Box<dyn SharedProducer<T>> {
    fn clone(&self) -> Self {
        self.clone_producer()
    }
}

/// A consumer handle that several threads may each hold a clone of.
pub trait SharedConsumer<T>: QueueConsumer<T> {
    /// Clones this handle into a new box.
    fn clone_consumer(&self) -> Box<dyn SharedConsumer<T>>;
}

impl<T> Clone for Box<dyn SharedConsumer<T>> {
    fn clone(&self) -> Self {
        self.clone_consumer()
    }
}

/// A single consumer that can wait for elements.
pub trait BlockingQueueConsumer<T>: QueueConsumer<T> {
    /// Waits until an element is available.
    ///
    /// # Errors
    ///
    /// [`Interrupted`] if an interrupter fired while waiting.
    fn take(&mut self) -> Result<T, Interrupted>;

    /// Waits up to `timeout` for an element; `Ok(None)` on expiry.
    ///
    /// # Errors
    ///
    /// [`Interrupted`] if an interrupter fired while waiting.
    fn poll_timeout(&mut self, timeout: Duration) -> Result<Option<T>, Interrupted>;

    /// Returns a handle that can cancel this consumer's waits.
    fn interrupter(&self) -> crate::blocking::Interrupter;
}
