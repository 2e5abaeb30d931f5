use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use crossbeam_utils::Backoff;
use futures::future::poll_fn;
use tokio_util::sync::CancellationToken;

use crate::collections::element::Element;
use crate::collections::queue::{AwaitableCollection, QueueRw, TakeCompletion, TakeError, Waiter};

/// Maximum number of collections a single [`take_from_any`] may await.
pub const MAX_TAKE_FROM_ANY: usize = 32;

const GROUP_LOCKED: u32 = u32::MAX;
const GROUP_UNLOCKED: u32 = u32::MAX - 1;
const GROUP_CANCELLED: u32 = u32::MAX - 2;

/// Arbitration core shared by the members a [`take_from_any`] call parks in
/// its collections: at most one member (or the cancellation) publishes to the
/// single completion slot.
///
/// The group starts `Locked` so that no member can settle while the caller is
/// still running its priority-ordered pre-pass; producers that reach a member
/// of a locked group spin until the caller unlocks. The lock window never
/// spans a suspension point, so the spin is bounded by the pre-pass itself.
pub(crate) struct TakeGroupCore<E: Element> {
  /// `GROUP_LOCKED`, `GROUP_UNLOCKED`, `GROUP_CANCELLED`, or the index of the
  /// member that won.
  state: AtomicU32,
  completion: TakeCompletion<(E, usize)>,
  /// Bit per collection index with a member parked in it.
  created: AtomicU32,
  /// Unsettled-awaiter counters of the collections holding members, swept
  /// exactly once when the group reaches a terminal state.
  registrations: [OnceLock<Arc<AtomicUsize>>; MAX_TAKE_FROM_ANY],
}

impl<E: Element> TakeGroupCore<E> {
  fn new() -> Self {
    Self {
      state: AtomicU32::new(GROUP_LOCKED),
      completion: TakeCompletion::new(),
      created: AtomicU32::new(0),
      registrations: std::array::from_fn(|_| OnceLock::new()),
    }
  }

  fn awaiter_created(&self, index: usize) -> bool {
    self.created.load(Ordering::Acquire) & (1u32 << index) != 0
  }

  fn register(&self, index: usize, pending: Arc<AtomicUsize>) {
    let _ = self.registrations[index].set(pending);
    self.created.fetch_or(1u32 << index, Ordering::AcqRel);
  }

  /// Delivery attempt by the producer that dequeued the member for `index`.
  ///
  /// Spins while the group is locked; fails once another member, the
  /// synchronous pre-pass or a cancellation reached a terminal state first.
  pub(crate) fn try_complete_member(&self, index: usize, value: E) -> Result<(), E> {
    let backoff = Backoff::new();
    loop {
      match self
        .state
        .compare_exchange(GROUP_UNLOCKED, index as u32, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(_) => {
          // Sole winner; the completion cannot have been settled by anyone else.
          let _ = self.completion.try_complete((value, index));
          self.sweep();
          return Ok(());
        }
        Err(GROUP_LOCKED) => backoff.snooze(),
        Err(_) => return Err(value),
      }
    }
  }

  /// Synchronous resolution during the locked pre-pass. Members parked so far
  /// become tombstones and their registrations are swept.
  fn mark_resolved(&self, index: usize) {
    if self
      .state
      .compare_exchange(GROUP_LOCKED, index as u32, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
    {
      self.sweep();
    }
  }

  fn unlock(&self) {
    let _ = self
      .state
      .compare_exchange(GROUP_LOCKED, GROUP_UNLOCKED, Ordering::AcqRel, Ordering::Acquire);
  }

  /// Moves the group to `Cancelled` unless a member already won. Returns
  /// whether this call performed the cancellation.
  fn cancel(&self) -> bool {
    loop {
      let current = self.state.load(Ordering::Acquire);
      if current != GROUP_LOCKED && current != GROUP_UNLOCKED {
        return false;
      }
      if self
        .state
        .compare_exchange(current, GROUP_CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
      {
        self.completion.try_cancel();
        self.sweep();
        return true;
      }
    }
  }

  /// Settles the bookkeeping of every parked member. Called exactly once, by
  /// the unique transition into a terminal state.
  fn sweep(&self) {
    let created = self.created.load(Ordering::Acquire);
    for index in 0..MAX_TAKE_FROM_ANY {
      if created & (1u32 << index) != 0 {
        if let Some(pending) = self.registrations[index].get() {
          pending.fetch_sub(1, Ordering::AcqRel);
        }
      }
    }
    tracing::trace!(state = self.state.load(Ordering::Relaxed), "take group settled");
  }

  fn poll_result(&self, cx: &mut Context<'_>) -> Poll<Result<(E, usize), TakeError>> {
    self.completion.poll_take(cx)
  }
}

impl<E: Element> fmt::Debug for TakeGroupCore<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TakeGroupCore")
      .field("state", &self.state.load(Ordering::Relaxed))
      .field("created", &self.created.load(Ordering::Relaxed))
      .finish()
  }
}

struct GroupGuard<E: Element> {
  group: Arc<TakeGroupCore<E>>,
}

impl<E: Element> Drop for GroupGuard<E> {
  fn drop(&mut self) {
    // No-op once the group reached a terminal state; otherwise an abandoned
    // call would leave members parked and producers spinning on the lock.
    self.group.cancel();
  }
}

/// Takes the first available element from up to [`MAX_TAKE_FROM_ANY`]
/// collections, resolving to the element and the index of the collection that
/// produced it. At most one collection delivers.
///
/// Array order is priority order: collections that already hold elements are
/// tried first in index order before the call parks. Preconditions (a
/// non-empty array of at most 32 collections) are reported through the
/// returned future as [`TakeError::InvalidArgument`]; a token that is already
/// cancelled resolves to [`TakeError::Cancelled`] without touching any
/// collection.
pub async fn take_from_any<Q, E>(
  collections: &[AwaitableCollection<Q, E>],
  token: CancellationToken,
) -> Result<(E, usize), TakeError>
where
  Q: QueueRw<E>,
  E: Element,
{
  if collections.is_empty() {
    return Err(TakeError::InvalidArgument("collections must not be empty"));
  }
  if collections.len() > MAX_TAKE_FROM_ANY {
    return Err(TakeError::InvalidArgument("at most 32 collections are supported"));
  }
  if token.is_cancelled() {
    return Err(TakeError::Cancelled);
  }

  let group: Arc<TakeGroupCore<E>> = Arc::new(TakeGroupCore::new());
  let _guard = GroupGuard { group: group.clone() };

  // Locked pre-pass, preferring collections that look non-empty; the second
  // pass parks a member in every remaining collection. Nothing here suspends,
  // so the locked window is bounded.
  for (index, collection) in collections.iter().enumerate() {
    if collection.count() > 0 {
      if let Some(value) = attempt(&group, index, collection) {
        group.mark_resolved(index);
        return Ok((value, index));
      }
    }
  }
  for (index, collection) in collections.iter().enumerate() {
    if let Some(value) = attempt(&group, index, collection) {
      group.mark_resolved(index);
      return Ok((value, index));
    }
  }

  group.unlock();
  // Cancellation is armed only after the unlock store above.
  tokio::select! {
    result = poll_fn(|cx| group.poll_result(cx)) => result,
    _ = token.cancelled() => {
      if group.cancel() {
        Err(TakeError::Cancelled)
      } else {
        // A member won concurrently; its value is committed.
        poll_fn(|cx| group.poll_result(cx)).await
      }
    }
  }
}

/// Takes from `collection` if it owes an element, otherwise parks a group
/// member in it (at most once per index across both passes).
fn attempt<Q, E>(group: &Arc<TakeGroupCore<E>>, index: usize, collection: &AwaitableCollection<Q, E>) -> Option<E>
where
  Q: QueueRw<E>,
  E: Element,
{
  if group.awaiter_created(index) {
    return None;
  }
  collection.take_or_register(|| {
    group.register(index, collection.pending_handle());
    Waiter::GroupMember {
      group: group.clone(),
      index: index as u8,
    }
  })
}
