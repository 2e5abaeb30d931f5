use std::cell::UnsafeCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::task::AtomicWaker;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::collections::element::Element;
use crate::collections::queue::{TakeError, TakeGroupCore};

const STATE_PENDING: u8 = 0;
const STATE_WRITING: u8 = 1;
const STATE_READY: u8 = 2;
const STATE_TAKEN: u8 = 3;
const STATE_CANCELLED: u8 = 4;

/// A one-shot completion cell shared between one pending consumer and the
/// producer that eventually pairs with it.
///
/// At most one of [`try_complete`](TakeCompletion::try_complete) and
/// [`try_cancel`](TakeCompletion::try_cancel) wins; afterwards the cell is
/// inert and further attempts report failure without error. The consumer side
/// observes the outcome through [`poll_take`](TakeCompletion::poll_take).
///
/// Completion wakes the consumer through an [`AtomicWaker`], which schedules
/// the consumer task on its own runtime worker; the completing thread never
/// runs consumer code inline.
pub(crate) struct TakeCompletion<T> {
  state: AtomicU8,
  value: UnsafeCell<Option<T>>,
  waker: AtomicWaker,
}

unsafe impl<T: Send> Send for TakeCompletion<T> {}
unsafe impl<T: Send> Sync for TakeCompletion<T> {}

impl<T> TakeCompletion<T> {
  pub(crate) fn new() -> Self {
    Self {
      state: AtomicU8::new(STATE_PENDING),
      value: UnsafeCell::new(None),
      waker: AtomicWaker::new(),
    }
  }

  /// Attempts to settle the cell with `value`.
  ///
  /// Returns the value back if the cell was already completed or cancelled, so
  /// the producer can retry delivery elsewhere.
  pub(crate) fn try_complete(&self, value: T) -> Result<(), T> {
    match self
      .state
      .compare_exchange(STATE_PENDING, STATE_WRITING, Ordering::AcqRel, Ordering::Acquire)
    {
      Ok(_) => {
        // Exclusive: the WRITING claim keeps every other party out of `value`
        // until the READY store below publishes it.
        unsafe {
          *self.value.get() = Some(value);
        }
        self.state.store(STATE_READY, Ordering::Release);
        self.waker.wake();
        Ok(())
      }
      Err(_) => Err(value),
    }
  }

  /// Attempts to settle the cell as cancelled. Returns `false` if a value (or
  /// an earlier cancellation) got there first.
  pub(crate) fn try_cancel(&self) -> bool {
    if self
      .state
      .compare_exchange(STATE_PENDING, STATE_CANCELLED, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
    {
      self.waker.wake();
      true
    } else {
      false
    }
  }

  pub(crate) fn is_settled(&self) -> bool {
    self.state.load(Ordering::Acquire) != STATE_PENDING
  }

  /// Consumer-side poll. Must only be called by the single owner of the
  /// corresponding [`TakeFuture`].
  pub(crate) fn poll_take(&self, cx: &mut Context<'_>) -> Poll<Result<T, TakeError>> {
    // Register before inspecting the state so a concurrent settle cannot slip
    // between the load and the registration.
    self.waker.register(cx.waker());
    match self.state.load(Ordering::Acquire) {
      STATE_READY => {
        let value = unsafe { (*self.value.get()).take() };
        self.state.store(STATE_TAKEN, Ordering::Release);
        match value {
          Some(value) => Poll::Ready(Ok(value)),
          None => Poll::Pending,
        }
      }
      STATE_CANCELLED => Poll::Ready(Err(TakeError::Cancelled)),
      // PENDING, or WRITING with the READY store imminent; the writer wakes us.
      _ => Poll::Pending,
    }
  }
}

impl<T> fmt::Debug for TakeCompletion<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TakeCompletion")
      .field("state", &self.state.load(Ordering::Relaxed))
      .finish()
  }
}

/// A pending consumer registration as seen by producers.
///
/// Tagged union instead of a trait object so the producer hot path completes
/// without dynamic dispatch: either a plain one-shot completion, or a member
/// of an exclusive take-from-any group competing for a single result slot.
#[derive(Debug)]
pub(crate) enum Waiter<E: Element> {
  Completion(Arc<TakeCompletion<E>>),
  GroupMember { group: Arc<TakeGroupCore<E>>, index: u8 },
}

impl<E: Element> Waiter<E> {
  /// Delivers `value` to the pending consumer. On failure the value comes
  /// back and the producer retries with a fresh registration.
  pub(crate) fn try_complete(&self, value: E) -> Result<(), E> {
    match self {
      Waiter::Completion(completion) => completion.try_complete(value),
      Waiter::GroupMember { group, index } => group.try_complete_member(*index as usize, value),
    }
  }

  /// Whether completing this waiter settles a plain completion (as opposed to
  /// an exclusive group, whose bookkeeping is swept by the group itself).
  pub(crate) fn is_plain(&self) -> bool {
    matches!(self, Waiter::Completion(_))
  }
}

enum FutureInner<E> {
  /// Resolved at construction time (item was immediately available, or the
  /// cancellation signal had already fired).
  Settled(Option<Result<E, TakeError>>),
  Waiting {
    completion: Arc<TakeCompletion<E>>,
    cancellation: Option<BoxFuture<'static, ()>>,
    /// Unsettled-awaiter counter of the owning collection, decremented when
    /// this future cancels its own registration.
    registry: Option<Arc<AtomicUsize>>,
  },
}

/// The deferred result of a `take` call.
///
/// Resolves to the taken element, or to [`TakeError::Cancelled`] once the
/// associated cancellation signal fires first. Dropping a pending future
/// cancels its registration cooperatively: the queue slot is not reclaimed,
/// and the next producer that lands on it retries at a fresh slot.
pub struct TakeFuture<E> {
  inner: FutureInner<E>,
  done: bool,
}

impl<E: Element> TakeFuture<E> {
  pub(crate) fn ready(value: E) -> Self {
    Self {
      inner: FutureInner::Settled(Some(Ok(value))),
      done: false,
    }
  }

  pub(crate) fn cancelled() -> Self {
    Self {
      inner: FutureInner::Settled(Some(Err(TakeError::Cancelled))),
      done: false,
    }
  }

  pub(crate) fn waiting(
    completion: Arc<TakeCompletion<E>>,
    token: Option<CancellationToken>,
    registry: Option<Arc<AtomicUsize>>,
  ) -> Self {
    Self {
      inner: FutureInner::Waiting {
        completion,
        cancellation: token.map(|token| token.cancelled_owned().boxed()),
        registry,
      },
      done: false,
    }
  }

  /// Returns the value if the future resolved synchronously at creation.
  pub fn now_or_never_value(&mut self) -> Option<Result<E, TakeError>> {
    match &mut self.inner {
      FutureInner::Settled(slot) => {
        let taken = slot.take();
        if taken.is_some() {
          self.done = true;
        }
        taken
      }
      FutureInner::Waiting { .. } => None,
    }
  }
}

impl<E: Element> Future for TakeFuture<E> {
  type Output = Result<E, TakeError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    // SAFETY: `TakeFuture` never relies on pinning guarantees for `E` itself;
    // `E` is only ever stored behind `Option`/`Arc` and is never polled.
    let this = unsafe { self.get_unchecked_mut() };
    if this.done {
      return Poll::Pending;
    }
    match &mut this.inner {
      FutureInner::Settled(slot) => match slot.take() {
        Some(result) => {
          this.done = true;
          Poll::Ready(result)
        }
        None => Poll::Pending,
      },
      FutureInner::Waiting {
        completion,
        cancellation,
        registry,
      } => {
        if let Poll::Ready(result) = completion.poll_take(cx) {
          this.done = true;
          return Poll::Ready(result);
        }
        if let Some(cancel) = cancellation.as_mut() {
          if cancel.poll_unpin(cx).is_ready() {
            *cancellation = None;
            if completion.try_cancel() {
              if let Some(registry) = registry.as_ref() {
                registry.fetch_sub(1, Ordering::AcqRel);
              }
              this.done = true;
              return Poll::Ready(Err(TakeError::Cancelled));
            }
            // A producer beat the cancellation; the value is ready or being
            // written, and the writer wakes the waker registered above.
            if let Poll::Ready(result) = completion.poll_take(cx) {
              this.done = true;
              return Poll::Ready(result);
            }
          }
        }
        Poll::Pending
      }
    }
  }
}

impl<E> Drop for TakeFuture<E> {
  fn drop(&mut self) {
    if self.done {
      return;
    }
    if let FutureInner::Waiting {
      completion, registry, ..
    } = &self.inner
    {
      if !completion.is_settled() && completion.try_cancel() {
        if let Some(registry) = registry.as_ref() {
          registry.fetch_sub(1, Ordering::AcqRel);
        }
      }
    }
  }
}

impl<E> fmt::Debug for TakeFuture<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = match &self.inner {
      FutureInner::Settled(_) => "settled",
      FutureInner::Waiting { .. } => "waiting",
    };
    f.debug_struct("TakeFuture").field("state", &state).finish()
  }
}
