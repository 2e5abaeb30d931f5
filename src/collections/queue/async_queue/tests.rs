use std::collections::HashSet;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::AsyncQueue;
use crate::collections::queue::{QueueBase, QueueSize, TakeError};

#[tokio::test]
async fn producer_first_rendezvous() {
  let queue = AsyncQueue::new();
  queue.offer(42u32);
  assert_eq!(queue.count(), 1);
  assert_eq!(queue.take().await, Ok(42));
  assert_eq!(queue.count(), 0);
  assert_eq!(queue.awaiter_count(), 0);
}

#[tokio::test]
async fn consumer_first_rendezvous() {
  let queue = AsyncQueue::new();
  let pending = queue.take();
  assert_eq!(queue.awaiter_count(), 1);
  queue.offer(42u32);
  assert_eq!(pending.await, Ok(42));
  assert_eq!(queue.count(), 0);
  assert_eq!(queue.awaiter_count(), 0);
}

#[tokio::test]
async fn take_resolves_without_polling_before_offer() {
  let queue = AsyncQueue::new();
  let handle = {
    let queue = queue.clone();
    tokio::spawn(async move { queue.take().await })
  };
  tokio::task::yield_now().await;
  queue.offer(7u32);
  assert_eq!(handle.await.unwrap(), Ok(7));
}

#[tokio::test]
async fn pre_cancelled_token_rejects_without_claiming_a_slot() {
  let queue: AsyncQueue<u32> = AsyncQueue::new();
  let token = CancellationToken::new();
  token.cancel();
  assert_eq!(queue.take_until(token).await, Err(TakeError::Cancelled));
  assert_eq!(queue.awaiter_count(), 0);
}

#[tokio::test]
async fn cancelled_taker_is_skipped_by_the_next_producer() {
  let queue = AsyncQueue::new();
  let token = CancellationToken::new();
  let pending = queue.take_until(token.clone());
  let waiter = tokio::spawn(pending);
  tokio::task::yield_now().await;
  token.cancel();
  assert_eq!(waiter.await.unwrap(), Err(TakeError::Cancelled));

  // The burned slot makes the producer retry; the item lands at a fresh slot.
  queue.offer(42u32);
  assert_eq!(queue.count(), 1);
  assert_eq!(queue.take().await, Ok(42));
}

#[tokio::test]
async fn dropping_a_pending_take_behaves_like_cancellation() {
  let queue = AsyncQueue::new();
  drop(queue.take());
  queue.offer(1u32);
  assert_eq!(queue.take().await, Ok(1));
}

#[tokio::test]
async fn fifo_within_a_single_segment() {
  let queue = AsyncQueue::new();
  for value in 0..10u32 {
    queue.offer(value);
  }
  for expected in 0..10u32 {
    assert_eq!(queue.take().await, Ok(expected));
  }
}

#[tokio::test]
async fn segment_filled_by_producers_then_drained_by_consumers() {
  let queue = AsyncQueue::with_segment_capacity(4);
  for value in 0..13u32 {
    queue.offer(value);
  }
  assert_eq!(queue.count(), 13);
  for expected in 0..13u32 {
    assert_eq!(queue.take().await, Ok(expected));
  }
  assert_eq!(queue.count(), 0);
}

#[tokio::test]
async fn segment_filled_by_consumers_then_resolved_by_producers() {
  let queue = AsyncQueue::with_segment_capacity(4);
  let mut pending = Vec::new();
  for _ in 0..13 {
    pending.push(tokio::spawn({
      let queue = queue.clone();
      async move { queue.take().await }
    }));
  }
  tokio::task::yield_now().await;
  for value in 0..13u32 {
    queue.offer(value);
  }
  let mut received = Vec::new();
  for handle in pending {
    received.push(handle.await.unwrap().unwrap());
  }
  received.sort_unstable();
  assert_eq!(received, (0..13).collect::<Vec<_>>());
  assert_eq!(queue.awaiter_count(), 0);
}

#[tokio::test]
async fn counts_track_segment_boundaries() {
  let queue = AsyncQueue::with_segment_capacity(2);
  for value in 0..7u32 {
    queue.offer(value);
  }
  assert_eq!(queue.count(), 7);
  assert_eq!(queue.awaiter_count(), 0);
  for _ in 0..7 {
    queue.take().await.unwrap();
  }
  assert_eq!(queue.count(), 0);
}

#[tokio::test]
async fn drained_segments_are_reused_from_the_pool() {
  let queue = AsyncQueue::with_segment_capacity(2);
  // Run several segment generations through the queue; pooled segments come
  // back with reset slots, so values must keep flowing undisturbed.
  for round in 0..20u32 {
    for offset in 0..4 {
      queue.offer(round * 4 + offset);
    }
    for offset in 0..4 {
      assert_eq!(queue.take().await, Ok(round * 4 + offset));
    }
  }
  assert_eq!(queue.count(), 0);
}

#[tokio::test]
async fn from_iterator_preserves_order() {
  let queue: AsyncQueue<u32> = (0..5).collect();
  assert_eq!(queue.count(), 5);
  for expected in 0..5 {
    assert_eq!(queue.take().await, Ok(expected));
  }
}

#[tokio::test]
async fn queue_base_reports_limitless_capacity() {
  let queue: AsyncQueue<u32> = AsyncQueue::new();
  assert_eq!(queue.capacity(), QueueSize::limitless());
  assert!(queue.is_empty());
  queue.offer(1);
  assert_eq!(queue.len(), QueueSize::limited(1));
}

#[tokio::test]
async fn iteration_sees_resident_items_only() {
  let queue = AsyncQueue::with_segment_capacity(4);
  for value in 0..6u32 {
    queue.offer(value);
  }
  assert_eq!(queue.take().await, Ok(0));
  assert_eq!(queue.take().await, Ok(1));
  let seen: Vec<u32> = queue.iter().collect();
  assert_eq!(seen, vec![2, 3, 4, 5]);
}

#[tokio::test]
async fn iteration_skips_slots_paired_with_awaiters() {
  let queue: AsyncQueue<u32> = AsyncQueue::new();
  let pending = queue.take();
  assert_eq!(queue.iter().count(), 0);
  queue.offer(10);
  assert_eq!(pending.await, Ok(10));
  assert_eq!(queue.iter().count(), 0);
}

#[tokio::test]
async fn iteration_does_not_block_concurrent_operations() {
  let queue = AsyncQueue::with_segment_capacity(2);
  for value in 0..4u32 {
    queue.offer(value);
  }
  let iter = queue.iter();
  // Drain and refill while the enumeration is alive; pooling is suppressed
  // but the queue itself must stay fully operational.
  for _ in 0..4 {
    queue.take().await.unwrap();
  }
  for value in 10..14u32 {
    queue.offer(value);
  }
  drop(iter);
  assert_eq!(queue.count(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_and_consumers_conserve_items() {
  const PRODUCERS: usize = 4;
  const CONSUMERS: usize = 4;
  const PER_PRODUCER: usize = 250;

  let queue = AsyncQueue::with_segment_capacity(8);
  let mut producers = Vec::new();
  for producer in 0..PRODUCERS {
    let queue = queue.clone();
    producers.push(tokio::spawn(async move {
      for sequence in 0..PER_PRODUCER {
        queue.offer((producer * PER_PRODUCER + sequence) as u64);
        if sequence % 16 == 0 {
          tokio::task::yield_now().await;
        }
      }
    }));
  }

  let mut consumers = Vec::new();
  for _ in 0..CONSUMERS {
    let queue = queue.clone();
    consumers.push(tokio::spawn(async move {
      let mut received = Vec::new();
      for _ in 0..(PRODUCERS * PER_PRODUCER / CONSUMERS) {
        received.push(queue.take().await.unwrap());
      }
      received
    }));
  }

  for producer in producers {
    producer.await.unwrap();
  }
  let mut all = HashSet::new();
  for consumer in consumers {
    for value in consumer.await.unwrap() {
      assert!(all.insert(value), "duplicate delivery of {value}");
    }
  }
  assert_eq!(all.len(), PRODUCERS * PER_PRODUCER);
  assert_eq!(queue.count(), 0);
  assert_eq!(queue.awaiter_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_storm_does_not_lose_items() {
  const ITEMS: usize = 200;

  let queue: AsyncQueue<u64> = AsyncQueue::with_segment_capacity(4);
  // Burn a batch of slots with takers that cancel before any producer shows up.
  let token = CancellationToken::new();
  let mut doomed = Vec::new();
  for _ in 0..ITEMS {
    doomed.push(tokio::spawn({
      let future = queue.take_until(token.clone());
      async move { future.await }
    }));
  }
  tokio::time::sleep(Duration::from_millis(10)).await;
  token.cancel();
  for handle in doomed {
    assert_eq!(handle.await.unwrap(), Err(TakeError::Cancelled));
  }

  // Every offered item must still reach a live consumer.
  let producer = {
    let queue = queue.clone();
    tokio::spawn(async move {
      for value in 0..ITEMS as u64 {
        queue.offer(value);
      }
    })
  };
  let mut received = HashSet::new();
  for _ in 0..ITEMS {
    received.insert(queue.take().await.unwrap());
  }
  producer.await.unwrap();
  assert_eq!(received.len(), ITEMS);
}
