use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use crossbeam_queue::SegQueue;
use crossbeam_utils::Backoff;
use tokio_util::sync::CancellationToken;

use crate::collections::element::Element;
use crate::collections::queue::{AsyncTake, QueueBase, QueueSize, TakeCompletion, TakeError, TakeFuture};

mod segment;
#[cfg(test)]
mod tests;

use segment::{Segment, SLOT_CLEARED, SLOT_EMPTY, SLOT_ITEM, SLOT_WAITER};

/// Default number of slots per segment.
pub const DEFAULT_SEGMENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
  Item,
  Waiter,
}

struct QueueCore<E: Element> {
  segment_capacity: usize,
  /// Tail for producers; the segment whose item claims are still being handed out.
  item_tail: ArcSwap<Segment<E>>,
  /// Tail for consumers; the segment whose awaiter claims are still being handed out.
  waiter_tail: ArcSwap<Segment<E>>,
  /// Trailing end of the chain; bounds enumeration only.
  head: ArcSwap<Segment<E>>,
  /// Fully drained segments awaiting reuse.
  pool: SegQueue<Arc<Segment<E>>>,
  /// Positive: active enumerations (pooling forbidden). Negative: a segment is
  /// in transfer to the pool (enumeration start waits).
  iteration_balance: AtomicI64,
  next_segment_id: AtomicU64,
}

impl<E: Element> QueueCore<E> {
  fn new(segment_capacity: usize) -> Self {
    let first = Arc::new(Segment::new(0, segment_capacity));
    Self {
      segment_capacity,
      item_tail: ArcSwap::new(first.clone()),
      waiter_tail: ArcSwap::new(first.clone()),
      head: ArcSwap::new(first),
      pool: SegQueue::new(),
      iteration_balance: AtomicI64::new(0),
      next_segment_id: AtomicU64::new(1),
    }
  }

  fn tail(&self, side: Side) -> &ArcSwap<Segment<E>> {
    match side {
      Side::Item => &self.item_tail,
      Side::Waiter => &self.waiter_tail,
    }
  }

  fn allocate_next(&self) -> Arc<Segment<E>> {
    let id = self.next_segment_id.fetch_add(1, Ordering::Relaxed);
    match self.pool.pop() {
      Some(segment) => {
        segment.reset_for_reuse(id);
        tracing::trace!(segment_id = id, "reusing pooled segment");
        segment
      }
      None => {
        tracing::trace!(segment_id = id, "allocating segment");
        Arc::new(Segment::new(id, self.segment_capacity))
      }
    }
  }

  /// Rendezvous winner at the last slot: grows the chain and advances its own
  /// tail. The loser spins on `next` until this store lands.
  fn grow_as_winner(&self, segment: &Arc<Segment<E>>, side: Side) {
    let next = self.allocate_next();
    segment.next.store(Some(next.clone()));
    self.tail(side).store(next);
  }

  /// Rendezvous loser at the last slot: advances its own tail, moves the head
  /// past the drained segment and offers the segment to the pool.
  fn retire_as_loser(&self, segment: &Arc<Segment<E>>, side: Side) {
    let backoff = Backoff::new();
    let next = loop {
      if let Some(next) = segment.next.load_full() {
        break next;
      }
      backoff.snooze();
    };
    self.tail(side).store(next.clone());
    self.advance_head(segment, &next);
    self.try_pool(segment);
  }

  fn advance_head(&self, retired: &Arc<Segment<E>>, next: &Arc<Segment<E>>) {
    // Losers of distinct segments can finish out of order; keep the head at
    // the highest id seen so enumeration never starts behind a retired block.
    self.head.rcu(|current| {
      if current.id() <= retired.id() {
        Arc::clone(next)
      } else {
        Arc::clone(current)
      }
    });
  }

  fn try_pool(&self, segment: &Arc<Segment<E>>) {
    // A single transfer slot: balance 0 -> -1 excludes enumerations for the
    // duration of the push. With enumerations active (or another transfer in
    // flight) the segment is simply dropped instead.
    if self
      .iteration_balance
      .compare_exchange(0, -1, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
    {
      self.pool.push(segment.clone());
      self.iteration_balance.fetch_add(1, Ordering::AcqRel);
      tracing::trace!(segment_id = segment.id(), "segment released to pool");
    }
  }
}

impl<E: Element> Drop for QueueCore<E> {
  fn drop(&mut self) {
    // Unlink iteratively; recursive Arc drops could overflow the stack on a
    // long chain. Parked consumers outlive the queue through their own
    // completion handles, so they are cancelled rather than left hanging.
    let mut cursor = Some(self.head.load_full());
    while let Some(segment) = cursor {
      for index in 0..segment.capacity() {
        if let Some(waiter) = segment.slot(index).waiter.swap(None) {
          waiter.try_cancel();
        }
      }
      cursor = segment.next.swap(None);
    }
    while let Some(segment) = self.pool.pop() {
      segment.next.store(None);
    }
  }
}

/// A multi-producer/multi-consumer FIFO whose consumers take items
/// asynchronously.
///
/// Storage is a chain of fixed-size segments. Each slot in a segment serves
/// double duty: the party that arrives first (producer or consumer) marks it,
/// and the party that arrives second completes the rendezvous: a producer by
/// completing the parked consumer, a consumer by reading the item directly.
/// [`offer`](AsyncQueue::offer) never fails and never suspends;
/// [`take`](AsyncQueue::take) returns a [`TakeFuture`] that resolves as soon
/// as an item is paired with it.
///
/// Within one segment, the item claimed at index `i` is delivered to the
/// consumer claiming index `i`; across segments there is no global ordering
/// guarantee when producers race past a segment boundary.
///
/// Clones share the same queue.
pub struct AsyncQueue<E: Element> {
  core: Arc<QueueCore<E>>,
}

impl<E: Element> AsyncQueue<E> {
  /// Creates an empty queue with [`DEFAULT_SEGMENT_CAPACITY`] slots per segment.
  pub fn new() -> Self {
    Self::with_segment_capacity(DEFAULT_SEGMENT_CAPACITY)
  }

  /// Creates an empty queue with `segment_capacity` slots per segment.
  ///
  /// # Panics
  ///
  /// Panics if `segment_capacity` is zero.
  pub fn with_segment_capacity(segment_capacity: usize) -> Self {
    assert!(segment_capacity > 0, "segment capacity must be greater than zero");
    Self {
      core: Arc::new(QueueCore::new(segment_capacity)),
    }
  }

  /// Adds an element to the queue.
  ///
  /// If a consumer is already parked at the paired slot the element is handed
  /// to it directly; a consumer that turns out to be cancelled costs one retry
  /// at a fresh slot, so every accepted element is eventually delivered.
  pub fn offer(&self, element: E) {
    let mut element = element;
    let backoff = Backoff::new();
    loop {
      let tail = self.core.item_tail.load_full();
      let index = tail.claim_item();
      let capacity = tail.capacity() as i64;
      if index >= capacity {
        // The last-slot claimant is advancing the tail; wait and restart.
        backoff.snooze();
        continue;
      }
      let last = index == capacity - 1;
      let slot = tail.slot(index as usize);
      // Publish the value before contending for the slot so a consumer that
      // loses the CAS below can read it directly, without parking.
      slot.item.store(Some(Arc::new(element)));
      match slot
        .state
        .compare_exchange(SLOT_EMPTY, SLOT_ITEM, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(_) => {
          if last {
            self.core.grow_as_winner(&tail, Side::Item);
          }
          return;
        }
        Err(_) => {
          // A consumer won the slot. It writes its waiter handle right after
          // its CAS, so spin briefly for the handle to become visible.
          let waiter = {
            let handle_backoff = Backoff::new();
            loop {
              if let Some(waiter) = slot.waiter.swap(None) {
                break waiter;
              }
              handle_backoff.snooze();
            }
          };
          let value = slot
            .item
            .swap(None)
            .map(unwrap_arc)
            .unwrap_or_else(|| unreachable!("slot item vanished before the rendezvous completed"));
          let delivery = waiter.try_complete(value);
          slot.state.store(SLOT_CLEARED, Ordering::Release);
          if last {
            self.core.retire_as_loser(&tail, Side::Item);
          }
          match delivery {
            Ok(()) => return,
            Err(returned) => {
              // The consumer cancelled; its slot stays burned and the element
              // is retried at a fresh slot.
              element = returned;
            }
          }
        }
      }
    }
  }

  /// Takes the next element.
  ///
  /// Resolves immediately when an item is already paired with the claimed
  /// slot; otherwise the returned future parks until a producer arrives.
  /// Dropping the pending future cancels the registration.
  pub fn take(&self) -> TakeFuture<E> {
    self.take_impl(None)
  }

  /// Like [`take`](AsyncQueue::take), resolving with
  /// [`TakeError::Cancelled`] once `token` is cancelled first.
  ///
  /// Cancellation does not reclaim the claimed slot; the producer that lands
  /// on it discovers the cancellation and retries at a fresh slot.
  pub fn take_until(&self, token: CancellationToken) -> TakeFuture<E> {
    self.take_impl(Some(token))
  }

  fn take_impl(&self, token: Option<CancellationToken>) -> TakeFuture<E> {
    if let Some(token) = &token {
      if token.is_cancelled() {
        return TakeFuture::cancelled();
      }
    }
    let backoff = Backoff::new();
    loop {
      let tail = self.core.waiter_tail.load_full();
      let index = tail.claim_waiter();
      let capacity = tail.capacity() as i64;
      if index >= capacity {
        backoff.snooze();
        continue;
      }
      let last = index == capacity - 1;
      let slot = tail.slot(index as usize);
      match slot
        .state
        .compare_exchange(SLOT_EMPTY, SLOT_WAITER, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(_) => {
          // Parked first: the waiter handle is written after the CAS; the
          // producer pairing with this slot spins for it.
          let completion = Arc::new(TakeCompletion::new());
          slot.waiter.store(Some(completion.clone()));
          if last {
            self.core.grow_as_winner(&tail, Side::Waiter);
          }
          return TakeFuture::waiting(completion, token, None);
        }
        Err(_) => {
          // A producer won the slot; its value was published before the CAS,
          // so it can be read directly.
          let value = {
            let item_backoff = Backoff::new();
            loop {
              if let Some(item) = slot.item.swap(None) {
                break unwrap_arc(item);
              }
              item_backoff.snooze();
            }
          };
          slot.state.store(SLOT_CLEARED, Ordering::Release);
          if last {
            self.core.retire_as_loser(&tail, Side::Waiter);
          }
          return TakeFuture::ready(value);
        }
      }
    }
  }

  /// Approximate number of items resident in the queue.
  ///
  /// Exact at quiescent points; in flight the snapshot may lag concurrent
  /// operations. At most one of `count` and
  /// [`awaiter_count`](AsyncQueue::awaiter_count) is non-zero at a quiescent
  /// point.
  pub fn count(&self) -> usize {
    let item_tail = self.core.item_tail.load_full();
    let waiter_tail = self.core.waiter_tail.load_full();
    surplus(
      item_tail.id(),
      item_tail.item_claim_count(),
      waiter_tail.id(),
      waiter_tail.waiter_claim_count(),
      self.core.segment_capacity,
    )
  }

  /// Approximate number of consumers parked in the queue.
  pub fn awaiter_count(&self) -> usize {
    let item_tail = self.core.item_tail.load_full();
    let waiter_tail = self.core.waiter_tail.load_full();
    surplus(
      waiter_tail.id(),
      waiter_tail.waiter_claim_count(),
      item_tail.id(),
      item_tail.item_claim_count(),
      self.core.segment_capacity,
    )
  }

  /// Iterates over the items currently resident in the queue, yielding clones.
  ///
  /// The iterator never observes an item already handed to a consumer and may
  /// skip items that are taken while the iteration runs. While any iterator is
  /// alive, drained segments are dropped instead of pooled.
  pub fn iter(&self) -> AsyncQueueIter<E> {
    AsyncQueueIter::new(self.core.clone())
  }
}

/// Count of claims the `ahead` tail has handed out beyond the `behind` tail.
fn surplus(ahead_id: u64, ahead_claims: usize, behind_id: u64, behind_claims: usize, capacity: usize) -> usize {
  if ahead_id < behind_id {
    0
  } else if ahead_id == behind_id {
    ahead_claims.saturating_sub(behind_claims)
  } else {
    let full_gap = (ahead_id - behind_id - 1) as usize;
    ahead_claims + (capacity - behind_claims) + capacity * full_gap
  }
}

fn unwrap_arc<T: Clone>(arc: Arc<T>) -> T {
  Arc::try_unwrap(arc).unwrap_or_else(|shared| (*shared).clone())
}

impl<E: Element> Clone for AsyncQueue<E> {
  fn clone(&self) -> Self {
    Self {
      core: self.core.clone(),
    }
  }
}

impl<E: Element> Default for AsyncQueue<E> {
  fn default() -> Self {
    Self::new()
  }
}

impl<E: Element> fmt::Debug for AsyncQueue<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AsyncQueue")
      .field("count", &self.count())
      .field("awaiter_count", &self.awaiter_count())
      .finish()
  }
}

impl<E: Element> FromIterator<E> for AsyncQueue<E> {
  fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
    let queue = Self::new();
    for element in iter {
      queue.offer(element);
    }
    queue
  }
}

impl<E: Element> QueueBase<E> for AsyncQueue<E> {
  fn len(&self) -> QueueSize {
    QueueSize::limited(self.count())
  }

  fn capacity(&self) -> QueueSize {
    QueueSize::limitless()
  }
}

#[async_trait]
impl<E: Element> AsyncTake<E> for AsyncQueue<E> {
  async fn take_async(&self) -> Result<E, TakeError> {
    self.take().await
  }
}

/// Snapshot-style iterator over an [`AsyncQueue`]. See [`AsyncQueue::iter`].
pub struct AsyncQueueIter<E: Element> {
  core: Arc<QueueCore<E>>,
  segment: Option<Arc<Segment<E>>>,
  index: usize,
}

impl<E: Element> AsyncQueueIter<E> {
  fn new(core: Arc<QueueCore<E>>) -> Self {
    // Enumeration and pooling exclude each other: wait out an in-flight pool
    // transfer, then announce this enumeration.
    let backoff = Backoff::new();
    loop {
      let balance = core.iteration_balance.load(Ordering::Acquire);
      if balance < 0 {
        backoff.snooze();
        continue;
      }
      if core
        .iteration_balance
        .compare_exchange(balance, balance + 1, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
      {
        break;
      }
    }
    let segment = Some(core.head.load_full());
    Self { core, segment, index: 0 }
  }
}

impl<E: Element> Iterator for AsyncQueueIter<E> {
  type Item = E;

  fn next(&mut self) -> Option<E> {
    loop {
      let segment = self.segment.as_ref()?;
      let produced = segment.item_claim_count();
      let consumed = segment.waiter_claim_count();
      // Slots below the consumer claims are paired or being paired; skip.
      if self.index < consumed {
        self.index = consumed;
        continue;
      }
      if self.index >= produced {
        if produced == segment.capacity() {
          let next = segment.next.load_full();
          self.segment = next;
          self.index = 0;
          continue;
        }
        // Caught up with production.
        self.segment = None;
        return None;
      }
      let slot = segment.slot(self.index);
      self.index += 1;
      // The slot is claimed on the item side, so its producer resolves it soon.
      let backoff = Backoff::new();
      while slot.state.load(Ordering::Acquire) == SLOT_EMPTY {
        backoff.snooze();
      }
      if slot.state.load(Ordering::Acquire) == SLOT_ITEM {
        if let Some(item) = slot.item.load_full() {
          return Some((*item).clone());
        }
      }
      // Paired with a consumer or taken mid-iteration; skip it.
    }
  }
}

impl<E: Element> Drop for AsyncQueueIter<E> {
  fn drop(&mut self) {
    self.core.iteration_balance.fetch_sub(1, Ordering::AcqRel);
  }
}

impl<E: Element> IntoIterator for &AsyncQueue<E> {
  type Item = E;
  type IntoIter = AsyncQueueIter<E>;

  fn into_iter(self) -> Self::IntoIter {
    self.iter()
  }
}

static_assertions::assert_impl_all!(AsyncQueue<u32>: Send, Sync, Clone);
static_assertions::assert_impl_all!(TakeFuture<u32>: Send);
