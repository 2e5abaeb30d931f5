use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};

use arc_swap::ArcSwapOption;
use crossbeam_utils::{Backoff, CachePadded};

use crate::collections::element::Element;
use crate::collections::queue::TakeCompletion;

pub(super) const SLOT_EMPTY: u8 = 0;
pub(super) const SLOT_ITEM: u8 = 1;
pub(super) const SLOT_WAITER: u8 = 2;
pub(super) const SLOT_CLEARED: u8 = 3;

/// A rendezvous point between one producer and one consumer claiming the same
/// index.
///
/// State transitions are monotonic for the lifetime of a claim:
/// `EMPTY -> ITEM` or `EMPTY -> WAITER` by the first arriver, then `-> CLEARED`
/// by the second. Only the controlled reset on pool reuse goes back to
/// `EMPTY`. The item and waiter cells are lock-free `Arc` swaps so that a
/// racing enumeration can observe an item without a data race with the
/// consumer detaching it.
pub(super) struct Slot<E: Element> {
  pub(super) state: AtomicU8,
  pub(super) item: ArcSwapOption<E>,
  pub(super) waiter: ArcSwapOption<TakeCompletion<E>>,
}

impl<E: Element> Slot<E> {
  fn new() -> Self {
    Self {
      state: AtomicU8::new(SLOT_EMPTY),
      item: ArcSwapOption::const_empty(),
      waiter: ArcSwapOption::const_empty(),
    }
  }
}

/// A fixed-capacity block of slots, the unit of allocation and pooling.
///
/// Producers and consumers reserve slots through separate monotonic claim
/// counters; a counter value in `[0, capacity)` is a valid claim, anything
/// above means the segment is exhausted on that side and the tail is about to
/// move. Counters start at -1 so the first fetch-add claims index 0.
pub(super) struct Segment<E: Element> {
  id: AtomicU64,
  item_claims: CachePadded<AtomicI64>,
  waiter_claims: CachePadded<AtomicI64>,
  pub(super) next: ArcSwapOption<Segment<E>>,
  slots: Box<[Slot<E>]>,
}

impl<E: Element> Segment<E> {
  pub(super) fn new(id: u64, capacity: usize) -> Self {
    let slots = (0..capacity).map(|_| Slot::new()).collect::<Vec<_>>().into_boxed_slice();
    Self {
      id: AtomicU64::new(id),
      item_claims: CachePadded::new(AtomicI64::new(-1)),
      waiter_claims: CachePadded::new(AtomicI64::new(-1)),
      next: ArcSwapOption::const_empty(),
      slots,
    }
  }

  pub(super) fn id(&self) -> u64 {
    self.id.load(Ordering::Acquire)
  }

  pub(super) fn capacity(&self) -> usize {
    self.slots.len()
  }

  pub(super) fn slot(&self, index: usize) -> &Slot<E> {
    &self.slots[index]
  }

  /// Reserves the next item index. Values at or above the capacity mean the
  /// caller lost the race for this segment and must restart at the new tail.
  pub(super) fn claim_item(&self) -> i64 {
    self.item_claims.fetch_add(1, Ordering::AcqRel) + 1
  }

  /// Reserves the next awaiter index; same exhaustion rule as [`claim_item`](Segment::claim_item).
  pub(super) fn claim_waiter(&self) -> i64 {
    self.waiter_claims.fetch_add(1, Ordering::AcqRel) + 1
  }

  /// Number of item slots claimed so far, clamped to the capacity.
  pub(super) fn item_claim_count(&self) -> usize {
    clamp_claims(self.item_claims.load(Ordering::Acquire), self.capacity())
  }

  /// Number of awaiter slots claimed so far, clamped to the capacity.
  pub(super) fn waiter_claim_count(&self) -> usize {
    clamp_claims(self.waiter_claims.load(Ordering::Acquire), self.capacity())
  }

  /// Prepares a pooled segment for relinking under a fresh identifier.
  ///
  /// Slot states are restored first: a claim counter reset re-exposes the
  /// segment to producers the instant the tail links it, so every slot must
  /// already read `EMPTY` by then. The CAS spin waits for the losing party of
  /// any still-in-flight rendezvous to finish its clear.
  pub(super) fn reset_for_reuse(&self, id: u64) {
    self.next.store(None);
    for slot in self.slots.iter() {
      let backoff = Backoff::new();
      while slot
        .state
        .compare_exchange(SLOT_CLEARED, SLOT_EMPTY, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
      {
        backoff.snooze();
      }
    }
    self.item_claims.store(-1, Ordering::Release);
    self.waiter_claims.store(-1, Ordering::Release);
    self.id.store(id, Ordering::Release);
  }
}

fn clamp_claims(last_claimed: i64, capacity: usize) -> usize {
  let claims = last_claimed + 1;
  if claims <= 0 {
    0
  } else {
    (claims as usize).min(capacity)
  }
}
