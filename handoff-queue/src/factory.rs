//! Backend selection.
//!
//! [`QueueFactory`] picks the native ring or the `crossbeam-queue` fallback
//! for each topology and hands out boxed handles. Both backends satisfy the
//! same traits; callers observe no difference beyond performance.
//!
//! ```
//! use handoff_queue::{QueueFactory, Topology};
//!
//! let factory = QueueFactory::detect();
//! let (tx, mut rx) = factory.mpsc::<u64>(64).unwrap();
//!
//! let mut tx2 = tx.clone();
//! tx2.offer(1).unwrap();
//! assert_eq!(rx.poll(), Some(1));
//! # let _ = factory.backend(Topology::Mpsc);
//! ```

use tracing::debug;

use crate::base::round_capacity;
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::queue::{
    BlockingQueueConsumer, QueueConsumer, QueueProducer, SharedConsumer, SharedProducer,
};
use crate::spsc::DEFAULT_MAX_LOOKAHEAD;
use crate::{blocking, fallback, mpsc, spmc, spsc};

/// Who may call which side of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    /// One producer, one consumer.
    Spsc,
    /// Many producers, one consumer.
    Mpsc,
    /// One producer, many consumers.
    Spmc,
    /// Many producers, one consumer that may block.
    MpscBlocking,
}

/// Which implementation backs a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// The ring buffers in this crate.
    Native,
    /// [`crossbeam_queue::ArrayQueue`] behind the same traits.
    Fallback,
}

impl Backend {
    /// Picks the backend for `topology` given whether native ordered atomics
    /// are usable.
    ///
    /// Every topology has a native ring today, so only the capability flag
    /// decides. `topology` stays in the signature so a topology without a
    /// native ring can opt out here without touching the callers.
    pub const fn select(topology: Topology, native_supported: bool) -> Self {
        let _ = topology;
        if native_supported {
            Self::Native
        } else {
            Self::Fallback
        }
    }
}

/// Boxed producer and consumer handed out by [`QueueFactory`].
pub type Handles<P, C> = (Box<P>, Box<C>);

/// Builds queues of any topology on the selected backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFactory {
    native_supported: bool,
    max_lookahead: usize,
}

impl Default for QueueFactory {
    fn default() -> Self {
        Self::detect()
    }
}

impl QueueFactory {
    /// Creates a factory with an explicit capability flag and the default
    /// look-ahead ceiling.
    pub const fn new(native_supported: bool) -> Self {
        Self {
            native_supported,
            max_lookahead: DEFAULT_MAX_LOOKAHEAD,
        }
    }

    /// Creates a factory from explicit settings.
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            native_supported: config.native_supported(),
            max_lookahead: config.max_lookahead(),
        }
    }

    /// Creates a factory from the target's capabilities and the environment
    /// overrides read by [`QueueConfig::from_env`].
    pub fn detect() -> Self {
        Self::from_config(&QueueConfig::from_env())
    }

    /// Returns the backend this factory uses for `topology`.
    pub fn backend(&self, topology: Topology) -> Backend {
        let backend = Backend::select(topology, self.native_supported);
        debug!(?topology, ?backend, "queue backend selected");
        backend
    }

    /// Creates an SPSC queue.
    ///
    /// # Errors
    ///
    /// [`QueueError`] if `capacity` is zero or cannot be rounded up.
    pub fn spsc<T: Send + 'static>(
        &self,
        capacity: usize,
    ) -> Result<Handles<dyn QueueProducer<T>, dyn QueueConsumer<T>>, QueueError> {
        let capacity = round_capacity(capacity)?;
        let backend = self.backend(Topology::Spsc);
        let handles: Handles<dyn QueueProducer<T>, dyn QueueConsumer<T>> = match backend {
            Backend::Native => {
                let (tx, rx) = spsc::with_max_lookahead(capacity, self.max_lookahead);
                (Box::new(tx), Box::new(rx))
            }
            Backend::Fallback => {
                let (tx, rx) = fallback::queue(capacity);
                (Box::new(tx), Box::new(rx))
            }
        };
        Ok(handles)
    }

    /// Creates an MPSC queue. Clone the producer to add producers.
    ///
    /// # Errors
    ///
    /// [`QueueError`] if `capacity` is zero or cannot be rounded up.
    pub fn mpsc<T: Send + 'static>(
        &self,
        capacity: usize,
    ) -> Result<Handles<dyn SharedProducer<T>, dyn QueueConsumer<T>>, QueueError> {
        let capacity = round_capacity(capacity)?;
        let backend = self.backend(Topology::Mpsc);
        let handles: Handles<dyn SharedProducer<T>, dyn QueueConsumer<T>> = match backend {
            Backend::Native => {
                let (tx, rx) = mpsc::queue(capacity);
                (Box::new(tx), Box::new(rx))
            }
            Backend::Fallback => {
                let (tx, rx) = fallback::queue(capacity);
                (Box::new(tx), Box::new(rx))
            }
        };
        Ok(handles)
    }

    /// Creates an SPMC queue. Clone the consumer to add consumers.
    ///
    /// # Errors
    ///
    /// [`QueueError`] if `capacity` is zero or cannot be rounded up.
    pub fn spmc<T: Send + 'static>(
        &self,
        capacity: usize,
    ) -> Result<Handles<dyn QueueProducer<T>, dyn SharedConsumer<T>>, QueueError> {
        let capacity = round_capacity(capacity)?;
        let backend = self.backend(Topology::Spmc);
        let handles: Handles<dyn QueueProducer<T>, dyn SharedConsumer<T>> = match backend {
            Backend::Native => {
                let (tx, rx) = spmc::queue(capacity);
                (Box::new(tx), Box::new(rx))
            }
            Backend::Fallback => {
                let (tx, rx) = fallback::queue(capacity);
                (Box::new(tx), Box::new(rx))
            }
        };
        Ok(handles)
    }

    /// Creates an MPSC queue whose consumer can block.
    ///
    /// # Errors
    ///
    /// [`QueueError`] if `capacity` is zero or cannot be rounded up.
    pub fn mpsc_blocking<T: Send + 'static>(
        &self,
        capacity: usize,
    ) -> Result<Handles<dyn SharedProducer<T>, dyn BlockingQueueConsumer<T>>, QueueError> {
        let capacity = round_capacity(capacity)?;
        let backend = self.backend(Topology::MpscBlocking);
        let handles: Handles<dyn SharedProducer<T>, dyn BlockingQueueConsumer<T>> = match backend {
            Backend::Native => {
                let (tx, rx) = blocking::queue(capacity);
                (Box::new(tx), Box::new(rx))
            }
            Backend::Fallback => {
                let (tx, rx) = fallback::queue(capacity);
                let (tx, rx) = blocking::wrap::<T, _, _>(tx, rx);
                (Box::new(tx), Box::new(rx))
            }
        };
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Interrupted;
    use std::thread;
    use std::time::Duration;

    const BOTH: [bool; 2] = [true, false];

    #[test]
    fn select_is_pure() {
        for topology in [
            Topology::Spsc,
            Topology::Mpsc,
            Topology::Spmc,
            Topology::MpscBlocking,
        ] {
            assert_eq!(Backend::select(topology, true), Backend::Native);
            assert_eq!(Backend::select(topology, false), Backend::Fallback);
        }
    }

    #[test]
    fn config_drives_backend() {
        use crate::config::BackendPreference;

        let config = QueueConfig::new().with_backend(BackendPreference::Fallback);
        let factory = QueueFactory::from_config(&config);
        assert_eq!(factory.backend(Topology::Spsc), Backend::Fallback);
        assert_eq!(factory, QueueFactory::new(false));
    }

    #[test]
    fn rejects_zero_capacity() {
        for native in BOTH {
            let factory = QueueFactory::new(native);
            assert!(matches!(factory.spsc::<u8>(0), Err(QueueError::ZeroCapacity)));
            assert!(matches!(factory.mpsc::<u8>(0), Err(QueueError::ZeroCapacity)));
            assert!(matches!(factory.spmc::<u8>(0), Err(QueueError::ZeroCapacity)));
            assert!(matches!(
                factory.mpsc_blocking::<u8>(0),
                Err(QueueError::ZeroCapacity)
            ));
            assert!(matches!(
                factory.spsc::<u8>(usize::MAX),
                Err(QueueError::CapacityOverflow(_))
            ));
        }
    }

    #[test]
    fn every_topology_round_trips_on_both_backends() {
        for native in BOTH {
            let factory = QueueFactory::new(native);

            let (mut tx, mut rx) = factory.spsc::<u32>(3).unwrap();
            assert_eq!(tx.capacity(), 4);
            tx.offer(1).unwrap();
            assert_eq!(rx.peek(), Some(&1));
            assert_eq!(rx.poll(), Some(1));

            let (tx, mut rx) = factory.mpsc::<u32>(4).unwrap();
            let mut tx2 = tx.clone();
            tx2.offer(2).unwrap();
            assert_eq!(rx.poll(), Some(2));

            let (mut tx, rx) = factory.spmc::<u32>(4).unwrap();
            let mut rx2 = rx.clone();
            tx.offer(3).unwrap();
            assert_eq!(rx2.poll(), Some(3));

            let (mut tx, mut rx) = factory.mpsc_blocking::<u32>(4).unwrap();
            tx.offer(4).unwrap();
            assert_eq!(rx.take(), Ok(4));
        }
    }

    #[test]
    fn blocking_wakes_on_both_backends() {
        for native in BOTH {
            let (tx, mut rx) = QueueFactory::new(native).mpsc_blocking::<u64>(8).unwrap();

            let mut producer_tx = tx.clone();
            let producer = thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                producer_tx.offer(11).unwrap();
            });

            assert_eq!(rx.poll_timeout(Duration::from_secs(10)), Ok(Some(11)));
            producer.join().unwrap();

            rx.interrupter().interrupt();
            assert_eq!(rx.take(), Err(Interrupted));
        }
    }
}
