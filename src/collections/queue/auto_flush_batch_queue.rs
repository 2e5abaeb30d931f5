use std::fmt;
use std::ops::Deref;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::collections::element::Element;
use crate::collections::queue::BatchQueue;

/// A [`BatchQueue`] overlay that flushes the accumulating batch on a fixed
/// period, so elements never sit unpublished longer than one period.
///
/// The flush task is aborted when the overlay is dropped. All queue operations
/// are available through `Deref`.
pub struct AutoFlushBatchQueue<E: Element + 'static> {
  queue: BatchQueue<E>,
  flusher: JoinHandle<()>,
}

impl<E: Element + 'static> AutoFlushBatchQueue<E> {
  /// Wraps `queue`, flushing it every `period`.
  ///
  /// Must be called within a tokio runtime.
  ///
  /// # Panics
  ///
  /// Panics if `period` is zero.
  pub fn new(queue: BatchQueue<E>, period: Duration) -> Self {
    assert!(!period.is_zero(), "flush period must be greater than zero");
    let flushed = queue.clone();
    let flusher = tokio::spawn(async move {
      let mut interval = tokio::time::interval(period);
      interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
      // The first tick resolves immediately; flushing an empty queue is a no-op.
      loop {
        interval.tick().await;
        flushed.flush();
      }
    });
    Self { queue, flusher }
  }
}

impl<E: Element + 'static> Deref for AutoFlushBatchQueue<E> {
  type Target = BatchQueue<E>;

  fn deref(&self) -> &BatchQueue<E> {
    &self.queue
  }
}

impl<E: Element + 'static> Drop for AutoFlushBatchQueue<E> {
  fn drop(&mut self) {
    self.flusher.abort();
  }
}

impl<E: Element + 'static> fmt::Debug for AutoFlushBatchQueue<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AutoFlushBatchQueue").field("queue", &self.queue).finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test(start_paused = true)]
  async fn periodic_flush_publishes_pending_elements() {
    let queue = AutoFlushBatchQueue::new(BatchQueue::new(10), Duration::from_millis(50));
    queue.offer(1u32);
    queue.offer(2u32);
    assert_eq!(queue.count(), 0);

    tokio::time::advance(Duration::from_millis(60)).await;
    tokio::task::yield_now().await;

    let batch = queue.take().await.unwrap();
    assert_eq!(batch.to_vec(), vec![1, 2]);
  }

  #[tokio::test(start_paused = true)]
  async fn idle_periods_publish_nothing() {
    let queue: AutoFlushBatchQueue<u32> = AutoFlushBatchQueue::new(BatchQueue::new(4), Duration::from_millis(20));
    tokio::time::advance(Duration::from_millis(200)).await;
    tokio::task::yield_now().await;
    assert_eq!(queue.count(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn full_batches_still_rotate_between_ticks() {
    let queue = AutoFlushBatchQueue::new(BatchQueue::new(2), Duration::from_secs(3600));
    queue.offer(1u32);
    queue.offer(2u32);
    assert_eq!(queue.count(), 1);
    let batch = queue.take().await.unwrap();
    assert_eq!(batch.len(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn dropping_the_overlay_stops_the_flusher() {
    let inner = BatchQueue::new(10);
    {
      let overlay = AutoFlushBatchQueue::new(inner.clone(), Duration::from_millis(10));
      overlay.offer(1u32);
      tokio::time::advance(Duration::from_millis(15)).await;
      tokio::task::yield_now().await;
      assert_eq!(inner.count(), 1);
    }
    inner.offer(2u32);
    tokio::time::advance(Duration::from_millis(100)).await;
    tokio::task::yield_now().await;
    // No further batches appear once the overlay is gone.
    assert_eq!(inner.count(), 1);
  }
}
