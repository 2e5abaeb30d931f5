use std::cmp::Ordering;
use std::ops::Add;

use async_trait::async_trait;
use thiserror::Error;

use crate::collections::element::Element;

mod async_queue;
mod auto_flush_batch_queue;
mod awaitable_collection;
mod awaiter;
mod batch_queue;
mod priority_queue;
mod ring_queue;
mod take_any;

pub use self::{
  async_queue::{AsyncQueue, AsyncQueueIter, DEFAULT_SEGMENT_CAPACITY},
  auto_flush_batch_queue::AutoFlushBatchQueue,
  awaitable_collection::AwaitableCollection,
  awaiter::TakeFuture,
  batch_queue::{Batch, BatchIter, BatchQueue},
  priority_queue::{AsyncPriorityQueue, PriorityBuffer, PriorityMessage, DEFAULT_PRIORITY_LEVELS, MAX_PRIORITY_LEVELS},
  ring_queue::RingQueue,
  take_any::{take_from_any, MAX_TAKE_FROM_ANY},
};

pub(crate) use self::awaiter::{TakeCompletion, Waiter};
pub(crate) use self::take_any::TakeGroupCore;

/// An error raised by a container-level queue operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError<E> {
  /// The queue is full and cannot accept more elements. Carries the rejected element.
  #[error("queue is full")]
  Full(E),
  /// The queue has been closed. Carries the rejected element.
  #[error("queue is closed")]
  Closed(E),
  /// The queue has been closed and drained.
  #[error("queue is disconnected")]
  Disconnected,
}

/// An error resolved through a take deferred.
///
/// Synchronous entry points never raise these; they only surface when the
/// returned future is polled.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeError {
  /// The cancellation signal associated with the take fired first.
  #[error("take was cancelled")]
  Cancelled,
  /// A precondition on the call was violated.
  #[error("invalid argument: {0}")]
  InvalidArgument(&'static str),
}

/// The size of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSize {
  /// The queue has no capacity limit.
  Limitless,
  /// The queue holds or can hold the given number of elements.
  Limited(usize),
}

impl QueueSize {
  pub const fn limitless() -> Self {
    QueueSize::Limitless
  }

  pub const fn limited(value: usize) -> Self {
    QueueSize::Limited(value)
  }

  pub const fn is_limitless(&self) -> bool {
    matches!(self, QueueSize::Limitless)
  }

  /// Converts to `usize`, mapping [`QueueSize::Limitless`] to `usize::MAX`.
  pub const fn to_usize(self) -> usize {
    match self {
      QueueSize::Limitless => usize::MAX,
      QueueSize::Limited(value) => value,
    }
  }

  /// Converts to an option, mapping [`QueueSize::Limitless`] to `None`.
  pub const fn to_option(self) -> Option<usize> {
    match self {
      QueueSize::Limitless => None,
      QueueSize::Limited(value) => Some(value),
    }
  }
}

impl Default for QueueSize {
  fn default() -> Self {
    QueueSize::limited(0)
  }
}

impl Add for QueueSize {
  type Output = QueueSize;

  fn add(self, other: QueueSize) -> QueueSize {
    match (self, other) {
      (QueueSize::Limitless, _) | (_, QueueSize::Limitless) => QueueSize::Limitless,
      (QueueSize::Limited(lhs), QueueSize::Limited(rhs)) => QueueSize::Limited(lhs + rhs),
    }
  }
}

impl PartialOrd for QueueSize {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    match (self, other) {
      (QueueSize::Limitless, QueueSize::Limitless) => Some(Ordering::Equal),
      (QueueSize::Limitless, _) => Some(Ordering::Greater),
      (_, QueueSize::Limitless) => Some(Ordering::Less),
      (QueueSize::Limited(lhs), QueueSize::Limited(rhs)) => lhs.partial_cmp(rhs),
    }
  }
}

/// Common trait defining basic size queries for a queue.
pub trait QueueBase<E> {
  /// Returns the current number of elements resident in the queue.
  fn len(&self) -> QueueSize;

  /// Returns the queue capacity, or [`QueueSize::Limitless`] for unbounded queues.
  fn capacity(&self) -> QueueSize;

  /// Returns `true` if the queue currently holds no elements.
  fn is_empty(&self) -> bool {
    self.len() == QueueSize::Limited(0)
  }
}

/// A thread-safe producer/consumer container operated through shared references.
///
/// This is the capability the [`AwaitableCollection`] adapter requires of its
/// item store: non-blocking `offer` and `poll` that are safe to call from any
/// thread. Implementations decide ordering (FIFO, LIFO, priority) and
/// boundedness.
pub trait QueueRw<E>: QueueBase<E> {
  /// Adds an element to the queue.
  ///
  /// # Returns
  ///
  /// * `Ok(())` - if the element was accepted
  /// * `Err(QueueError::Full(element))` - if the queue is at capacity
  /// * `Err(QueueError::Closed(element))` - if the queue no longer accepts elements
  fn offer(&self, element: E) -> Result<(), QueueError<E>>;

  /// Removes and returns the next element, or `Ok(None)` if the queue is empty.
  fn poll(&self) -> Result<Option<E>, QueueError<E>>;

  /// Releases internal resources. Implementations may close the queue.
  fn clean_up(&self);
}

/// Object-safe facade over every awaitable container in this crate.
///
/// Useful for consumers generic over the concrete collection, e.g. draining a
/// `Vec<Arc<dyn AsyncTake<E>>>` uniformly.
#[async_trait]
pub trait AsyncTake<E: Element>: Send + Sync {
  /// Takes the next item, suspending until one arrives.
  async fn take_async(&self) -> Result<E, TakeError>;
}
