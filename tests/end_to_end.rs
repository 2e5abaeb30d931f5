use std::collections::HashSet;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;

use async_collections_rs::{take_from_any, AsyncQueue, AwaitableCollection, BatchQueue, RingQueue, TakeError};

fn fifo_pair() -> Vec<AwaitableCollection<RingQueue<u32>, u32>> {
  (0..2)
    .map(|_| AwaitableCollection::new(RingQueue::new(8).with_dynamic(true)))
    .collect()
}

#[tokio::test]
async fn single_threaded_offer_then_take() {
  let queue = AsyncQueue::new();
  queue.offer(42u32);
  assert_eq!(queue.take().await, Ok(42));
  assert_eq!(queue.count(), 0);
  assert_eq!(queue.awaiter_count(), 0);
}

#[tokio::test]
async fn consumer_before_producer() {
  let queue = AsyncQueue::new();
  let deferred = queue.take();
  queue.offer(42u32);
  assert_eq!(deferred.await, Ok(42));
  assert_eq!(queue.count(), 0);
}

#[tokio::test]
async fn cancellation_before_offer_leaves_the_item_resident() {
  let queue = AsyncQueue::new();
  let signal = CancellationToken::new();
  signal.cancel();
  let deferred = queue.take_until(signal);
  queue.offer(42u32);
  assert_eq!(queue.count(), 1);
  assert_eq!(deferred.await, Err(TakeError::Cancelled));
}

#[tokio::test]
async fn batch_queue_scenario() {
  let queue = BatchQueue::new(3);
  queue.offer(0u32);
  queue.offer(1u32);
  queue.offer(42u32);
  queue.offer(7u32);
  let first = queue.take();
  let mut second = queue.take();

  let batch = first.await.unwrap();
  assert_eq!(batch.len(), 3);
  assert_eq!(batch.to_vec(), vec![0, 1, 42]);

  // The second batch is still accumulating.
  assert!(second.now_or_never_value().is_none());
  queue.flush();
  assert_eq!(second.await.unwrap().to_vec(), vec![7]);
}

#[tokio::test]
async fn take_from_any_resolves_from_the_producing_collection() {
  let pair = fifo_pair();
  let token = CancellationToken::new();
  let deferred = {
    let pair = pair.clone();
    tokio::spawn(async move { take_from_any(&pair, token).await })
  };
  tokio::time::sleep(Duration::from_millis(5)).await;
  pair[1].offer(42).unwrap();
  assert_eq!(deferred.await.unwrap(), Ok((42, 1)));
  assert_eq!(pair[0].awaiter_count(), 0);
}

#[tokio::test]
async fn take_from_any_honors_priority_order() {
  let pair = fifo_pair();
  pair[0].offer(10).unwrap();
  pair[1].offer(20).unwrap();
  let token = CancellationToken::new();
  assert_eq!(take_from_any(&pair, token).await, Ok((10, 0)));
}

#[tokio::test]
async fn adding_then_taking_preserves_fifo_for_a_single_producer() {
  let queue = AsyncQueue::with_segment_capacity(4);
  let items: Vec<u32> = (0..40).collect();
  for &item in &items {
    queue.offer(item);
  }
  let mut taken = Vec::new();
  for _ in 0..items.len() {
    taken.push(queue.take().await.unwrap());
  }
  assert_eq!(taken, items);
}

#[tokio::test]
async fn quiescent_counts_are_never_simultaneously_positive() {
  let queue = AsyncQueue::new();
  assert_eq!(queue.count() * queue.awaiter_count(), 0);

  queue.offer(1u32);
  queue.offer(2u32);
  assert_eq!(queue.count() * queue.awaiter_count(), 0);

  queue.take().await.unwrap();
  queue.take().await.unwrap();
  let pending = queue.take();
  assert_eq!(queue.count() * queue.awaiter_count(), 0);
  assert_eq!(queue.awaiter_count(), 1);

  queue.offer(3u32);
  pending.await.unwrap();
  assert_eq!(queue.count() * queue.awaiter_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn multiset_of_offers_equals_multiset_of_takes() {
  const PRODUCERS: usize = 4;
  const CONSUMERS: usize = 4;
  const PER_PRODUCER: usize = 500;

  let queue = AsyncQueue::with_segment_capacity(8);

  let mut values: Vec<u64> = (0..(PRODUCERS * PER_PRODUCER) as u64).collect();
  values.shuffle(&mut rand::thread_rng());

  let mut producers = Vec::new();
  for chunk in values.chunks(PER_PRODUCER) {
    let queue = queue.clone();
    let chunk = chunk.to_vec();
    producers.push(tokio::spawn(async move {
      for value in chunk {
        queue.offer(value);
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
  let mut received = HashSet::new();
  for consumer in consumers {
    for value in consumer.await.unwrap() {
      assert!(received.insert(value), "value {value} delivered twice");
    }
  }
  assert_eq!(received.len(), PRODUCERS * PER_PRODUCER);
  assert_eq!(queue.count(), 0);
  assert_eq!(queue.awaiter_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn take_from_any_under_contention_delivers_exactly_once() {
  const ROUNDS: usize = 100;

  let pair = fifo_pair();
  for round in 0..ROUNDS {
    let token = CancellationToken::new();
    let deferred = {
      let pair = pair.clone();
      tokio::spawn(async move { take_from_any(&pair, token).await })
    };
    let target = round % 2;
    pair[target].offer(round as u32).unwrap();
    let (value, index) = deferred.await.unwrap().unwrap();
    assert_eq!(value, round as u32);
    // The value may be served by either collection's member depending on the
    // race, but it must come from the collection that received it.
    assert_eq!(index, target);
  }
  // Nothing left behind after the storm.
  assert_eq!(pair[0].count() + pair[1].count(), 0);
  assert_eq!(pair[0].awaiter_count(), 0);
  assert_eq!(pair[1].awaiter_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_pipeline_conserves_elements() {
  const ITEMS: usize = 1000;

  let queue = BatchQueue::new(16);
  let producer = {
    let queue = queue.clone();
    tokio::spawn(async move {
      for value in 0..ITEMS as u64 {
        queue.offer(value);
        if value % 64 == 0 {
          tokio::task::yield_now().await;
        }
      }
    })
  };

  let flusher = {
    let queue = queue.clone();
    tokio::spawn(async move {
      for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(1)).await;
        queue.flush();
      }
    })
  };

  producer.await.unwrap();
  flusher.await.unwrap();
  queue.flush();

  let mut received = HashSet::new();
  let mut total = 0;
  while total < ITEMS {
    let batch = queue.take().await.unwrap();
    // Every published batch exposes exactly its frozen count of elements.
    assert_eq!(batch.iter().count(), batch.len());
    for element in &batch {
      assert!(received.insert(*element));
      total += 1;
    }
  }
  assert_eq!(received.len(), ITEMS);
}
