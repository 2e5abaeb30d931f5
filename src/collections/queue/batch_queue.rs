use std::cell::UnsafeCell;
use std::fmt;
use std::ops::Index;
use std::sync::atomic::{fence, AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use crossbeam_utils::{Backoff, CachePadded};
use tokio_util::sync::CancellationToken;

use crate::collections::element::Element;
use crate::collections::queue::{AsyncQueue, AsyncQueueIter, AsyncTake, QueueBase, QueueSize, TakeError, TakeFuture};

struct BatchSlot<E> {
  value: UnsafeCell<Option<E>>,
  /// Set with release ordering after the value store; readers spin on it.
  finalized: AtomicBool,
}

/// Accumulating storage behind one [`Batch`].
///
/// Producers reserve slots through `reservation` (last claimed index, -1 when
/// empty); a flush poisons the counter past the capacity so no further slot
/// can be claimed. `count` stays -1 while accumulating and freezes to the
/// published length on rotation.
struct BatchBuffer<E> {
  reservation: CachePadded<AtomicI64>,
  count: AtomicI64,
  slots: Box<[BatchSlot<E>]>,
}

unsafe impl<E: Send> Send for BatchBuffer<E> {}
unsafe impl<E: Send + Sync> Sync for BatchBuffer<E> {}

impl<E> BatchBuffer<E> {
  fn new(capacity: usize) -> Self {
    let slots = (0..capacity)
      .map(|_| BatchSlot {
        value: UnsafeCell::new(None),
        finalized: AtomicBool::new(false),
      })
      .collect::<Vec<_>>()
      .into_boxed_slice();
    Self {
      reservation: CachePadded::new(AtomicI64::new(-1)),
      count: AtomicI64::new(-1),
      slots,
    }
  }

  fn frozen_count(&self) -> usize {
    let count = self.count.load(Ordering::Acquire);
    if count < 0 {
      0
    } else {
      count as usize
    }
  }
}

/// An immutable, read-only view of one published batch.
///
/// The length equals the frozen count of the batch. Indexing spin-waits on the
/// per-slot finalized flag: a producer may still be completing a slot it
/// reserved just before a flush froze the count.
pub struct Batch<E: Element> {
  buffer: Arc<BatchBuffer<E>>,
}

impl<E: Element> Batch<E> {
  /// Number of elements in the batch.
  pub fn len(&self) -> usize {
    self.buffer.frozen_count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Returns the element at `index`, or `None` past the frozen count.
  pub fn get(&self, index: usize) -> Option<&E> {
    if index >= self.len() {
      return None;
    }
    let slot = &self.buffer.slots[index];
    let backoff = Backoff::new();
    while !slot.finalized.load(Ordering::Acquire) {
      backoff.snooze();
    }
    unsafe { (*slot.value.get()).as_ref() }
  }

  pub fn iter(&self) -> BatchIter<'_, E> {
    BatchIter { batch: self, index: 0 }
  }

  /// Copies the batch into a `Vec`.
  pub fn to_vec(&self) -> Vec<E> {
    self.iter().cloned().collect()
  }
}

impl<E: Element> Index<usize> for Batch<E> {
  type Output = E;

  /// # Panics
  ///
  /// Panics if `index` is at or past the frozen count.
  fn index(&self, index: usize) -> &E {
    match self.get(index) {
      Some(element) => element,
      None => panic!("batch index {index} out of range (len {})", self.len()),
    }
  }
}

impl<E: Element> Clone for Batch<E> {
  fn clone(&self) -> Self {
    Self {
      buffer: self.buffer.clone(),
    }
  }
}

impl<E: Element> fmt::Debug for Batch<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Batch").field("len", &self.len()).finish()
  }
}

impl<E: Element> Element for Batch<E> {}

/// Borrowing iterator over a [`Batch`].
pub struct BatchIter<'a, E: Element> {
  batch: &'a Batch<E>,
  index: usize,
}

impl<'a, E: Element> Iterator for BatchIter<'a, E> {
  type Item = &'a E;

  fn next(&mut self) -> Option<&'a E> {
    let element = self.batch.get(self.index)?;
    self.index += 1;
    Some(element)
  }
}

impl<'a, E: Element> IntoIterator for &'a Batch<E> {
  type Item = &'a E;
  type IntoIter = BatchIter<'a, E>;

  fn into_iter(self) -> Self::IntoIter {
    self.iter()
  }
}

struct BatchCore<E: Element> {
  batch_size: usize,
  current: ArcSwap<BatchBuffer<E>>,
  inner: AsyncQueue<Batch<E>>,
}

/// Accumulates offered elements into fixed-size batches and surfaces whole
/// batches to consumers.
///
/// A batch is published when it fills, when [`flush`](BatchQueue::flush) is
/// called with elements pending, or periodically through
/// [`AutoFlushBatchQueue`](crate::collections::queue::AutoFlushBatchQueue).
/// Published batches travel through an inner [`AsyncQueue`], so
/// [`take`](BatchQueue::take) has the same rendezvous semantics as a plain
/// queue of elements.
///
/// Clones share the same queue.
pub struct BatchQueue<E: Element> {
  core: Arc<BatchCore<E>>,
}

impl<E: Element> BatchQueue<E> {
  /// Creates a batch queue publishing batches of `batch_size` elements.
  ///
  /// # Panics
  ///
  /// Panics if `batch_size` is zero.
  pub fn new(batch_size: usize) -> Self {
    assert!(batch_size > 0, "batch size must be greater than zero");
    Self {
      core: Arc::new(BatchCore {
        batch_size,
        current: ArcSwap::new(Arc::new(BatchBuffer::new(batch_size))),
        inner: AsyncQueue::new(),
      }),
    }
  }

  pub fn batch_size(&self) -> usize {
    self.core.batch_size
  }

  /// Adds an element to the current batch, publishing the batch when this
  /// element fills it.
  pub fn offer(&self, element: E) {
    let backoff = Backoff::new();
    loop {
      let current = self.core.current.load_full();
      let index = current.reservation.fetch_add(1, Ordering::AcqRel) + 1;
      let capacity = self.core.batch_size as i64;
      if index >= capacity {
        // A rotation is pending or in progress; wait for the fresh batch.
        backoff.snooze();
        continue;
      }
      let slot = &current.slots[index as usize];
      // Sole owner of the reserved slot until the finalized flag is set.
      unsafe {
        *slot.value.get() = Some(element);
      }
      // The value store must be visible before the flag is observed.
      fence(Ordering::SeqCst);
      slot.finalized.store(true, Ordering::Release);
      if index == capacity - 1 {
        self.rotate(&current, self.core.batch_size);
      }
      return;
    }
  }

  /// Publishes the partially filled current batch, if any.
  ///
  /// Reports success without publishing when the batch is empty, and also when
  /// its final slot is already reserved: the `offer` holding that reservation
  /// rotates imminently, so there is nothing left for the flusher to do.
  pub fn flush(&self) {
    loop {
      let current = self.core.current.load_full();
      let reserved = current.reservation.load(Ordering::Acquire);
      if reserved < 0 {
        return;
      }
      if reserved >= self.core.batch_size as i64 - 1 {
        return;
      }
      // Poison the reservation counter so no further offer claims a slot in
      // this batch, then freeze it at the claimed length.
      if current
        .reservation
        .compare_exchange(
          reserved,
          self.core.batch_size as i64,
          Ordering::AcqRel,
          Ordering::Acquire,
        )
        .is_ok()
      {
        self.rotate(&current, (reserved + 1) as usize);
        return;
      }
      // Lost to a concurrent offer or flush; re-examine.
    }
  }

  fn rotate(&self, outgoing: &Arc<BatchBuffer<E>>, frozen: usize) {
    outgoing.count.store(frozen as i64, Ordering::Release);
    self.core.current.store(Arc::new(BatchBuffer::new(self.core.batch_size)));
    tracing::trace!(len = frozen, "publishing batch");
    self.core.inner.offer(Batch {
      buffer: outgoing.clone(),
    });
  }

  /// Takes the next published batch.
  pub fn take(&self) -> TakeFuture<Batch<E>> {
    self.core.inner.take()
  }

  /// Like [`take`](BatchQueue::take), resolving with
  /// [`TakeError::Cancelled`] once `token` fires first.
  pub fn take_until(&self, token: CancellationToken) -> TakeFuture<Batch<E>> {
    self.core.inner.take_until(token)
  }

  /// Approximate number of published batches not yet taken.
  pub fn count(&self) -> usize {
    self.core.inner.count()
  }

  /// Approximate number of consumers parked for a batch.
  pub fn awaiter_count(&self) -> usize {
    self.core.inner.awaiter_count()
  }

  /// Iterates over the published batches currently resident.
  pub fn iter(&self) -> AsyncQueueIter<Batch<E>> {
    self.core.inner.iter()
  }
}

impl<E: Element> Clone for BatchQueue<E> {
  fn clone(&self) -> Self {
    Self {
      core: self.core.clone(),
    }
  }
}

impl<E: Element> fmt::Debug for BatchQueue<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BatchQueue")
      .field("batch_size", &self.core.batch_size)
      .field("count", &self.count())
      .finish()
  }
}

impl<E: Element> QueueBase<Batch<E>> for BatchQueue<E> {
  fn len(&self) -> QueueSize {
    QueueSize::limited(self.count())
  }

  fn capacity(&self) -> QueueSize {
    QueueSize::limitless()
  }
}

#[async_trait]
impl<E: Element> AsyncTake<Batch<E>> for BatchQueue<E> {
  async fn take_async(&self) -> Result<Batch<E>, TakeError> {
    self.take().await
  }
}

static_assertions::assert_impl_all!(BatchQueue<u32>: Send, Sync, Clone);
static_assertions::assert_impl_all!(Batch<u32>: Send, Sync, Clone);

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  #[tokio::test]
  async fn filling_a_batch_publishes_it() {
    let queue = BatchQueue::new(3);
    queue.offer(0u32);
    queue.offer(1u32);
    assert_eq!(queue.count(), 0);
    queue.offer(42u32);
    assert_eq!(queue.count(), 1);
    let batch = queue.take().await.unwrap();
    assert_eq!(batch.len(), 3);
    assert_eq!(batch.to_vec(), vec![0, 1, 42]);
  }

  #[tokio::test]
  async fn flush_publishes_a_partial_batch() {
    let queue = BatchQueue::new(3);
    queue.offer(7u32);
    queue.flush();
    let batch = queue.take().await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0], 7);
  }

  #[tokio::test]
  async fn flush_of_an_empty_batch_is_a_no_op() {
    let queue: BatchQueue<u32> = BatchQueue::new(3);
    queue.flush();
    queue.flush();
    assert_eq!(queue.count(), 0);
  }

  #[tokio::test]
  async fn successive_flushes_publish_at_most_one_batch() {
    let queue = BatchQueue::new(3);
    queue.offer(1u32);
    queue.flush();
    queue.flush();
    assert_eq!(queue.count(), 1);
  }

  #[tokio::test]
  async fn batch_indexing_past_the_count_panics() {
    let queue = BatchQueue::new(2);
    queue.offer(1u32);
    queue.flush();
    let batch = queue.take().await.unwrap();
    assert_eq!(batch.get(1), None);
    let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| batch[1]));
    assert!(panicked.is_err());
  }

  #[tokio::test]
  async fn batches_preserve_offer_order_within_and_across_batches() {
    let queue = BatchQueue::new(4);
    for value in 0..12u32 {
      queue.offer(value);
    }
    for base in [0u32, 4, 8] {
      let batch = queue.take().await.unwrap();
      assert_eq!(batch.to_vec(), (base..base + 4).collect::<Vec<_>>());
    }
  }

  #[tokio::test]
  async fn iterating_published_batches() {
    let queue = BatchQueue::new(2);
    for value in 0..4u32 {
      queue.offer(value);
    }
    let lengths: Vec<usize> = queue.iter().map(|batch| batch.len()).collect();
    assert_eq!(lengths, vec![2, 2]);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_offers_preserve_every_element() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 100;

    let queue = BatchQueue::new(8);
    let mut producers = Vec::new();
    for producer in 0..PRODUCERS {
      let queue = queue.clone();
      producers.push(tokio::spawn(async move {
        for sequence in 0..PER_PRODUCER {
          queue.offer((producer * PER_PRODUCER + sequence) as u64);
        }
      }));
    }
    for producer in producers {
      producer.await.unwrap();
    }
    queue.flush();

    let mut seen = HashSet::new();
    let mut total = 0;
    while total < PRODUCERS * PER_PRODUCER {
      let batch = queue.take().await.unwrap();
      for element in &batch {
        assert!(seen.insert(*element), "duplicate element {element}");
        total += 1;
      }
    }
    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
  }
}
