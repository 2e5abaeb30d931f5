use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::collections::element::Element;
use crate::collections::queue::{
  AsyncTake, AwaitableCollection, QueueBase, QueueError, QueueRw, QueueSize, TakeError, TakeFuture,
};

/// A plain LIFO buffer.
#[derive(Debug, Clone)]
pub struct Stack<E> {
  items: Vec<E>,
}

impl<E> Stack<E> {
  pub fn new() -> Self {
    Self { items: Vec::new() }
  }

  pub fn push(&mut self, item: E) {
    self.items.push(item);
  }

  pub fn pop(&mut self) -> Option<E> {
    self.items.pop()
  }

  pub fn peek(&self) -> Option<E>
  where
    E: Clone, {
    self.items.last().cloned()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn size(&self) -> usize {
    self.items.len()
  }

  pub fn clear(&mut self) {
    self.items.clear();
  }
}

impl<E> Default for Stack<E> {
  fn default() -> Self {
    Self::new()
  }
}

/// A thread-safe LIFO usable as an [`AwaitableCollection`] item store.
///
/// Clones share the same stack.
#[derive(Debug)]
pub struct SharedStack<E> {
  inner: Arc<Mutex<Stack<E>>>,
}

impl<E> SharedStack<E> {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Mutex::new(Stack::new())),
    }
  }

  pub fn push(&self, item: E) {
    self.inner.lock().push(item);
  }

  pub fn pop(&self) -> Option<E> {
    self.inner.lock().pop()
  }

  pub fn peek(&self) -> Option<E>
  where
    E: Clone, {
    self.inner.lock().peek()
  }
}

impl<E> Default for SharedStack<E> {
  fn default() -> Self {
    Self::new()
  }
}

impl<E> Clone for SharedStack<E> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<E> QueueBase<E> for SharedStack<E> {
  fn len(&self) -> QueueSize {
    QueueSize::limited(self.inner.lock().size())
  }

  fn capacity(&self) -> QueueSize {
    QueueSize::limitless()
  }
}

impl<E: Element> QueueRw<E> for SharedStack<E> {
  fn offer(&self, element: E) -> Result<(), QueueError<E>> {
    self.push(element);
    Ok(())
  }

  fn poll(&self) -> Result<Option<E>, QueueError<E>> {
    Ok(self.pop())
  }

  fn clean_up(&self) {
    self.inner.lock().clear();
  }
}

/// A LIFO whose consumers take items asynchronously.
///
/// `take` resolves with the most recently offered element still resident;
/// parked consumers are completed in arrival order as elements come in.
#[derive(Debug, Clone)]
pub struct AsyncStack<E: Element> {
  inner: AwaitableCollection<SharedStack<E>, E>,
}

impl<E: Element> AsyncStack<E> {
  pub fn new() -> Self {
    Self {
      inner: AwaitableCollection::new(SharedStack::new()),
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

impl<E: Element> Default for AsyncStack<E> {
  fn default() -> Self {
    Self::new()
  }
}

impl<E: Element> FromIterator<E> for AsyncStack<E> {
  fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
    let stack = SharedStack::new();
    for element in iter {
      stack.push(element);
    }
    Self {
      inner: AwaitableCollection::new(stack),
    }
  }
}

impl<E: Element> QueueBase<E> for AsyncStack<E> {
  fn len(&self) -> QueueSize {
    self.inner.len()
  }

  fn capacity(&self) -> QueueSize {
    self.inner.capacity()
  }
}

#[async_trait]
impl<E: Element> AsyncTake<E> for AsyncStack<E> {
  async fn take_async(&self) -> Result<E, TakeError> {
    self.inner.take().await
  }
}
