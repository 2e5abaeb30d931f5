use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::collections::element::Element;
use crate::collections::queue::{
  AsyncTake, AwaitableCollection, QueueBase, QueueError, QueueRw, QueueSize, RingQueue, TakeError, TakeFuture,
};

/// Number of priority levels used when none is specified.
pub const DEFAULT_PRIORITY_LEVELS: usize = 8;

/// Upper bound on the number of priority levels.
pub const MAX_PRIORITY_LEVELS: usize = 32;

const LEVEL_QUEUE_CAPACITY: usize = 32;

/// A message that carries its own priority tag.
///
/// Priority 0 is the highest; out-of-range tags are clamped to the available
/// levels, and `None` routes to the middle level.
pub trait PriorityMessage: Element {
  fn get_priority(&self) -> Option<i8>;
}

/// A multi-level FIFO store that routes elements by their priority tag.
///
/// Draining scans level 0 (top priority) downwards, so a resident high
/// priority element is always returned before a lower one.
#[derive(Debug, Clone)]
pub struct PriorityBuffer<E> {
  levels: Vec<RingQueue<E>>,
}

impl<E: PriorityMessage> PriorityBuffer<E> {
  /// Creates a buffer with `levels` priority levels.
  ///
  /// # Panics
  ///
  /// Panics if `levels` is zero or greater than [`MAX_PRIORITY_LEVELS`].
  pub fn new(levels: usize) -> Self {
    assert!(
      (1..=MAX_PRIORITY_LEVELS).contains(&levels),
      "priority levels must be in 1..={MAX_PRIORITY_LEVELS}"
    );
    Self {
      levels: (0..levels)
        .map(|_| RingQueue::new(LEVEL_QUEUE_CAPACITY).with_dynamic(true))
        .collect(),
    }
  }

  pub fn level_count(&self) -> usize {
    self.levels.len()
  }

  fn level_index(&self, priority: Option<i8>) -> usize {
    let levels = self.levels.len();
    let default = (levels / 2) as i8;
    let max = (levels - 1) as i8;
    priority.unwrap_or(default).clamp(0, max) as usize
  }
}

impl<E: PriorityMessage> Default for PriorityBuffer<E> {
  fn default() -> Self {
    Self::new(DEFAULT_PRIORITY_LEVELS)
  }
}

impl<E: PriorityMessage> QueueBase<E> for PriorityBuffer<E> {
  fn len(&self) -> QueueSize {
    let mut total = 0usize;
    for level in &self.levels {
      match level.len() {
        QueueSize::Limitless => return QueueSize::limitless(),
        QueueSize::Limited(value) => total += value,
      }
    }
    QueueSize::limited(total)
  }

  fn capacity(&self) -> QueueSize {
    let mut total = 0usize;
    for level in &self.levels {
      match level.capacity() {
        QueueSize::Limitless => return QueueSize::limitless(),
        QueueSize::Limited(value) => total += value,
      }
    }
    QueueSize::limited(total)
  }
}

impl<E: PriorityMessage> QueueRw<E> for PriorityBuffer<E> {
  fn offer(&self, element: E) -> Result<(), QueueError<E>> {
    let index = self.level_index(element.get_priority());
    self.levels[index].offer(element)
  }

  fn poll(&self) -> Result<Option<E>, QueueError<E>> {
    for level in &self.levels {
      if let Some(element) = level.poll()? {
        return Ok(Some(element));
      }
    }
    Ok(None)
  }

  fn clean_up(&self) {
    for level in &self.levels {
      level.clean_up();
    }
  }
}

/// A priority-by-tag collection whose consumers take items asynchronously.
///
/// Resident elements are taken top-priority first; parked consumers are
/// completed in arrival order regardless of the priority of the element that
/// wakes them.
#[derive(Debug, Clone)]
pub struct AsyncPriorityQueue<E: PriorityMessage> {
  inner: AwaitableCollection<PriorityBuffer<E>, E>,
}

impl<E: PriorityMessage> AsyncPriorityQueue<E> {
  /// Creates a queue with [`DEFAULT_PRIORITY_LEVELS`] levels.
  pub fn new() -> Self {
    Self::with_levels(DEFAULT_PRIORITY_LEVELS)
  }

  /// Creates a queue with `levels` priority levels.
  ///
  /// # Panics
  ///
  /// Panics if `levels` is zero or greater than [`MAX_PRIORITY_LEVELS`].
  pub fn with_levels(levels: usize) -> Self {
    Self {
      inner: AwaitableCollection::new(PriorityBuffer::new(levels)),
    }
  }

  pub fn offer(&self, element: E) -> Result<(), QueueError<E>> {
    self.inner.offer(element)
  }

  pub fn take(&self) -> TakeFuture<E> {
    self.inner.take()
  }

  pub fn take_until(&self, token: CancellationToken) -> TakeFuture<E> {
    self.inner.take_until(token)
  }

  pub fn count(&self) -> usize {
    self.inner.count()
  }

  pub fn awaiter_count(&self) -> usize {
    self.inner.awaiter_count()
  }
}

impl<E: PriorityMessage> Default for AsyncPriorityQueue<E> {
  fn default() -> Self {
    Self::new()
  }
}

impl<E: PriorityMessage> QueueBase<E> for AsyncPriorityQueue<E> {
  fn len(&self) -> QueueSize {
    self.inner.len()
  }

  fn capacity(&self) -> QueueSize {
    self.inner.capacity()
  }
}

#[async_trait]
impl<E: PriorityMessage> AsyncTake<E> for AsyncPriorityQueue<E> {
  async fn take_async(&self) -> Result<E, TakeError> {
    self.inner.take().await
  }
}
