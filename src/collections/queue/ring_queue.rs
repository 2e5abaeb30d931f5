use std::sync::Arc;

use parking_lot::Mutex;

use crate::collections::element::Element;
use crate::collections::queue::{QueueBase, QueueError, QueueRw, QueueSize};

/// Plain ring buffer backing [`RingQueue`].
///
/// One slot is kept as a sentinel, so the allocated buffer is `capacity + 1`
/// long. With `dynamic` set, a full buffer doubles instead of rejecting.
#[derive(Debug)]
struct RingBuffer<E> {
  buffer: Vec<Option<E>>,
  head: usize,
  tail: usize,
  dynamic: bool,
}

impl<E> RingBuffer<E> {
  fn new(capacity: usize) -> Self {
    let mut buffer = Vec::with_capacity(capacity + 1);
    buffer.resize_with(capacity + 1, || None);
    Self {
      buffer,
      head: 0,
      tail: 0,
      dynamic: false,
    }
  }

  fn len(&self) -> usize {
    if self.tail >= self.head {
      self.tail - self.head
    } else {
      self.buffer.len() - self.head + self.tail
    }
  }

  fn capacity(&self) -> usize {
    self.buffer.len() - 1
  }

  fn is_full(&self) -> bool {
    (self.tail + 1) % self.buffer.len() == self.head
  }

  fn resize(&mut self) {
    let old_len = self.buffer.len();
    let mut buffer = Vec::with_capacity(old_len * 2);
    buffer.resize_with(old_len * 2, || None);
    let count = self.len();
    for offset in 0..count {
      buffer[offset] = self.buffer[(self.head + offset) % old_len].take();
    }
    self.buffer = buffer;
    self.head = 0;
    self.tail = count;
  }

  fn offer(&mut self, element: E) -> Result<(), QueueError<E>> {
    if self.is_full() {
      if self.dynamic {
        self.resize();
      } else {
        return Err(QueueError::Full(element));
      }
    }
    self.buffer[self.tail] = Some(element);
    self.tail = (self.tail + 1) % self.buffer.len();
    Ok(())
  }

  fn poll(&mut self) -> Option<E> {
    if self.head == self.tail {
      return None;
    }
    let element = self.buffer[self.head].take();
    self.head = (self.head + 1) % self.buffer.len();
    element
  }

  fn clear(&mut self) {
    self.buffer.iter_mut().for_each(|slot| *slot = None);
    self.head = 0;
    self.tail = 0;
  }
}

/// A thread-safe FIFO ring buffer.
///
/// Bounded by default; [`with_dynamic`](RingQueue::with_dynamic) switches to
/// doubling growth on overflow. Clones share the same buffer.
#[derive(Debug)]
pub struct RingQueue<E> {
  buffer: Arc<Mutex<RingBuffer<E>>>,
}

impl<E> RingQueue<E> {
  /// Creates a ring queue holding up to `capacity` elements.
  ///
  /// # Panics
  ///
  /// Panics if `capacity` is zero.
  pub fn new(capacity: usize) -> Self {
    assert!(capacity > 0, "capacity must be greater than zero");
    Self {
      buffer: Arc::new(Mutex::new(RingBuffer::new(capacity))),
    }
  }

  /// Enables or disables dynamic growth.
  pub fn with_dynamic(self, dynamic: bool) -> Self {
    self.buffer.lock().dynamic = dynamic;
    self
  }

  pub fn offer(&self, element: E) -> Result<(), QueueError<E>> {
    self.buffer.lock().offer(element)
  }

  pub fn poll(&self) -> Result<Option<E>, QueueError<E>> {
    Ok(self.buffer.lock().poll())
  }

  pub fn clean_up(&self) {
    self.buffer.lock().clear();
  }
}

impl<E> Clone for RingQueue<E> {
  fn clone(&self) -> Self {
    Self {
      buffer: self.buffer.clone(),
    }
  }
}

impl<E> QueueBase<E> for RingQueue<E> {
  fn len(&self) -> QueueSize {
    QueueSize::limited(self.buffer.lock().len())
  }

  fn capacity(&self) -> QueueSize {
    let guard = self.buffer.lock();
    if guard.dynamic {
      QueueSize::limitless()
    } else {
      QueueSize::limited(guard.capacity())
    }
  }
}

impl<E: Element> QueueRw<E> for RingQueue<E> {
  fn offer(&self, element: E) -> Result<(), QueueError<E>> {
    self.offer(element)
  }

  fn poll(&self) -> Result<Option<E>, QueueError<E>> {
    self.poll()
  }

  fn clean_up(&self) {
    self.clean_up();
  }
}
