//! Lock-free producer/consumer collections whose consumers retrieve items
//! asynchronously.
//!
//! Producers never block and never suspend; consumers receive either an
//! immediately available value or a [`TakeFuture`] that resolves once a value
//! arrives (or the take is cancelled). The containers in this crate:
//!
//! - [`AsyncQueue`]: a multi-producer/multi-consumer FIFO built from a chain
//!   of fixed-size segments whose slots double as item storage and pending
//!   consumer registration.
//! - [`AwaitableCollection`]: an adapter that turns any thread-safe
//!   [`QueueRw`] container (FIFO, LIFO, priority) into an awaitable
//!   collection via a signed-balance arbitration protocol.
//! - [`AsyncStack`] and [`AsyncPriorityQueue`]: awaitable LIFO and
//!   priority-by-tag variants of the adapter.
//! - [`BatchQueue`]: accumulates items into fixed-size [`Batch`]es and
//!   publishes whole batches to consumers; [`AutoFlushBatchQueue`] adds a
//!   periodic flush.
//! - [`take_from_any`]: awaits the first available item across up to 32
//!   collections with at-most-one delivery.
//!
//! No operation in the rendezvous core holds a lock; the well-defined spin
//! points use bounded exponential backoff and always wait on a store that a
//! cooperating party has already begun.

pub mod collections;

pub use collections::{
  take_from_any, AsyncPriorityQueue, AsyncQueue, AsyncQueueIter, AsyncStack, AsyncTake, AutoFlushBatchQueue,
  AwaitableCollection, Batch, BatchIter, BatchQueue, Element, PriorityBuffer, PriorityMessage, QueueBase, QueueError,
  QueueRw, QueueSize, RingQueue, SharedStack, Stack, TakeError, TakeFuture, DEFAULT_PRIORITY_LEVELS,
  DEFAULT_SEGMENT_CAPACITY, MAX_PRIORITY_LEVELS, MAX_TAKE_FROM_ANY,
};
