//! # handoff-queue
//!
//! Fixed-capacity ring buffer queues for handing work from producer threads
//! to background consumers.
//!
//! ## Features
//!
//! - **SPSC**: single producer, single consumer; neither index is contended
//! - **MPSC**: many producers racing on `tail`, one consumer
//! - **SPMC**: one producer, many consumers racing on `head`
//! - **Blocking MPSC**: the consumer can park until data arrives
//! - **Fallback**: the same contract over `crossbeam_queue::ArrayQueue`
//!
//! ## Design Goals
//!
//! - No allocations after construction
//! - Cache-line isolation of `head`, `tail` and the slot region
//! - Producers and consumers are separate handles; a role that must stay
//!   single is a handle that cannot be cloned
//! - Only the blocking consumer ever suspends a thread
//!
//! ## Example
//!
//! ```
//! use handoff_queue::spsc;
//!
//! // capacity is rounded up to the next power of two
//! let (mut tx, mut rx) = spsc::queue::<u64>(1000);
//! assert_eq!(tx.capacity(), 1024);
//!
//! tx.offer(42).unwrap();
//! assert_eq!(rx.poll(), Some(42));
//! ```
//!
//! To pick the backend at runtime and work through trait objects, use
//! [`QueueFactory`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod base;
pub mod blocking;
pub mod config;
pub mod error;
pub mod factory;
pub mod fallback;
pub mod mpsc;
pub mod queue;
pub mod sequence;
pub mod spmc;
pub mod spsc;
pub mod wait;

mod ring;

pub use base::round_capacity;
pub use blocking::Interrupter;
pub use config::{BackendPreference, QueueConfig};
pub use error::{ConfigError, Full, Interrupted, QueueError};
pub use factory::{Backend, Handles, QueueFactory, Topology};
pub use queue::{
    BlockingQueueConsumer, QueueConsumer, QueueProducer, SharedConsumer, SharedProducer,
};
pub use sequence::{Access, PaddedSequence};
pub use wait::{BackoffWait, ExitCondition, WaitStrategy};
