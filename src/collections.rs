pub mod element;
pub mod queue;
pub mod stack;

pub use element::Element;
pub use queue::{
  take_from_any, AsyncPriorityQueue, AsyncQueue, AsyncQueueIter, AsyncTake, AutoFlushBatchQueue, AwaitableCollection,
  Batch, BatchIter, BatchQueue, PriorityBuffer, PriorityMessage, QueueBase, QueueError, QueueRw, QueueSize, RingQueue,
  TakeError, TakeFuture, DEFAULT_PRIORITY_LEVELS, DEFAULT_SEGMENT_CAPACITY, MAX_PRIORITY_LEVELS, MAX_TAKE_FROM_ANY,
};
pub use stack::{AsyncStack, SharedStack, Stack};
