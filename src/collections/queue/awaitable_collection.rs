use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use crossbeam_queue::SegQueue;
use crossbeam_utils::{Backoff, CachePadded};
use tokio_util::sync::CancellationToken;

use crate::collections::element::Element;
use crate::collections::queue::{
  AsyncTake, QueueBase, QueueError, QueueRw, QueueSize, TakeCompletion, TakeError, TakeFuture, Waiter,
};

struct CollectionCore<Q, E: Element> {
  items: Q,
  /// Pending consumers in arrival order. Cancelled entries stay behind as
  /// tombstones until a producer dequeues and discards them.
  waiters: SegQueue<Waiter<E>>,
  /// Signed arbitration counter: positive when items outnumber awaiters,
  /// negative when awaiters outnumber items, zero when matched.
  balance: CachePadded<AtomicI64>,
  /// Registered-and-unsettled awaiters; maintained by whichever party settles
  /// an awaiter, so tombstones still sitting in `waiters` are not counted.
  pending: Arc<AtomicUsize>,
}

impl<Q, E: Element> Drop for CollectionCore<Q, E> {
  fn drop(&mut self) {
    // Parked consumers outlive the collection through their own completion
    // handles; cancel them rather than leaving their futures hanging.
    while let Some(waiter) = self.waiters.pop() {
      if let Waiter::Completion(completion) = waiter {
        completion.try_cancel();
      }
    }
  }
}

/// Adapts any thread-safe [`QueueRw`] container into a collection whose
/// consumers take items asynchronously.
///
/// Producers and consumers arbitrate through a signed balance counter instead
/// of a lock: an `offer` that observes a non-positive balance owes its element
/// to a parked consumer, a `take` that observes a negative balance parks
/// itself. Ordering follows the wrapped container (FIFO, LIFO, priority).
///
/// Clones share the same collection.
pub struct AwaitableCollection<Q, E>
where
  Q: QueueRw<E>,
  E: Element, {
  core: Arc<CollectionCore<Q, E>>,
}

impl<Q, E> AwaitableCollection<Q, E>
where
  Q: QueueRw<E>,
  E: Element,
{
  /// Wraps `items`, which may already be seeded.
  ///
  /// The balance starts at the seeded count, so takes issued right after
  /// construction consume the seeded elements instead of parking.
  pub fn new(items: Q) -> Self {
    let seeded = items.len().to_option().unwrap_or(0) as i64;
    Self {
      core: Arc::new(CollectionCore {
        items,
        waiters: SegQueue::new(),
        balance: CachePadded::new(AtomicI64::new(seeded)),
        pending: Arc::new(AtomicUsize::new(0)),
      }),
    }
  }

  /// Adds an element.
  ///
  /// If a consumer is parked, the element is delivered to it directly;
  /// cancelled consumers are discarded and the delivery retried, so an
  /// accepted element is never lost. A bounded container that is momentarily
  /// full makes the offer spin: the balance has already promised the element
  /// to the takes draining the container, so insertion must not be abandoned.
  /// Only a closed container surfaces an error.
  pub fn offer(&self, element: E) -> Result<(), QueueError<E>> {
    let mut element = element;
    loop {
      let balance = self.core.balance.fetch_add(1, Ordering::AcqRel) + 1;
      if balance > 0 {
        // No consumer outstanding; the element belongs to the item store.
        let backoff = Backoff::new();
        loop {
          match self.core.items.offer(element) {
            Ok(()) => return Ok(()),
            Err(QueueError::Full(returned)) => {
              element = returned;
              backoff.snooze();
            }
            Err(error) => {
              self.core.balance.fetch_sub(1, Ordering::AcqRel);
              return Err(error);
            }
          }
        }
      }
      // An awaiter is registered or mid-registration; its entry lands in the
      // FIFO right after its balance decrement.
      let waiter = {
        let backoff = Backoff::new();
        loop {
          if let Some(waiter) = self.core.waiters.pop() {
            break waiter;
          }
          backoff.snooze();
        }
      };
      let plain = waiter.is_plain();
      match waiter.try_complete(element) {
        Ok(()) => {
          if plain {
            self.core.pending.fetch_sub(1, Ordering::AcqRel);
          }
          return Ok(());
        }
        Err(returned) => {
          // Tombstone: the cancelled awaiter's balance decrement is reclaimed
          // by the fresh increment on the next loop turn.
          element = returned;
        }
      }
    }
  }

  /// Takes the next element per the wrapped container's ordering.
  pub fn take(&self) -> TakeFuture<E> {
    self.take_impl(None)
  }

  /// Like [`take`](AwaitableCollection::take), resolving with
  /// [`TakeError::Cancelled`] once `token` fires first. The cancelled
  /// registration stays in the awaiter FIFO as a tombstone until a producer
  /// discards it.
  pub fn take_until(&self, token: CancellationToken) -> TakeFuture<E> {
    self.take_impl(Some(token))
  }

  fn take_impl(&self, token: Option<CancellationToken>) -> TakeFuture<E> {
    if let Some(token) = &token {
      if token.is_cancelled() {
        return TakeFuture::cancelled();
      }
    }
    let balance = self.core.balance.fetch_sub(1, Ordering::AcqRel) - 1;
    if balance >= 0 {
      TakeFuture::ready(self.spin_poll())
    } else {
      let completion = Arc::new(TakeCompletion::new());
      self.core.pending.fetch_add(1, Ordering::AcqRel);
      self.core.waiters.push(Waiter::Completion(completion.clone()));
      TakeFuture::waiting(completion, token, Some(self.core.pending.clone()))
    }
  }

  /// Take-or-park entry used by `take_from_any`: either an element is
  /// immediately owed (and taken), or the waiter produced by `register` is
  /// parked in this collection.
  pub(crate) fn take_or_register(&self, register: impl FnOnce() -> Waiter<E>) -> Option<E> {
    let balance = self.core.balance.fetch_sub(1, Ordering::AcqRel) - 1;
    if balance >= 0 {
      Some(self.spin_poll())
    } else {
      self.core.pending.fetch_add(1, Ordering::AcqRel);
      self.core.waiters.push(register());
      None
    }
  }

  pub(crate) fn pending_handle(&self) -> Arc<AtomicUsize> {
    self.core.pending.clone()
  }

  /// An element is owed by the balance protocol; the producer that reserved
  /// it is at most an insertion away.
  fn spin_poll(&self) -> E {
    let backoff = Backoff::new();
    loop {
      if let Ok(Some(element)) = self.core.items.poll() {
        return element;
      }
      backoff.snooze();
    }
  }

  /// Number of elements resident in the wrapped container. Racy snapshot.
  pub fn count(&self) -> usize {
    self.core.items.len().to_usize()
  }

  /// Number of registered, unsettled awaiters. Racy snapshot.
  pub fn awaiter_count(&self) -> usize {
    self.core.pending.load(Ordering::Acquire)
  }
}

impl<Q, E> Clone for AwaitableCollection<Q, E>
where
  Q: QueueRw<E>,
  E: Element,
{
  fn clone(&self) -> Self {
    Self {
      core: self.core.clone(),
    }
  }
}

impl<Q, E> fmt::Debug for AwaitableCollection<Q, E>
where
  Q: QueueRw<E>,
  E: Element,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AwaitableCollection")
      .field("count", &self.count())
      .field("awaiter_count", &self.awaiter_count())
      .finish()
  }
}

impl<Q, E> QueueBase<E> for AwaitableCollection<Q, E>
where
  Q: QueueRw<E>,
  E: Element,
{
  fn len(&self) -> QueueSize {
    self.core.items.len()
  }

  fn capacity(&self) -> QueueSize {
    self.core.items.capacity()
  }
}

#[async_trait]
impl<Q, E> AsyncTake<E> for AwaitableCollection<Q, E>
where
  Q: QueueRw<E> + Send + Sync,
  E: Element,
{
  async fn take_async(&self) -> Result<E, TakeError> {
    self.take().await
  }
}


static_assertions::assert_impl_all!(AwaitableCollection<crate::collections::queue::RingQueue<u32>, u32>: Send, Sync, Clone);
