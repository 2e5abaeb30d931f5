use std::fmt::Debug;
use std::sync::Arc;

/// Marker bound for values stored in the collections of this crate.
///
/// Cloning must be cheap enough to tolerate on the enumeration path: iterators
/// over live queues yield clones so that a concurrent consumer can detach the
/// original without invalidating the iteration.
pub trait Element: Debug + Clone + Send + Sync {}

impl Element for i8 {}

impl Element for i16 {}

impl Element for i32 {}

impl Element for i64 {}

impl Element for u8 {}

impl Element for u16 {}

impl Element for u32 {}

impl Element for u64 {}

impl Element for usize {}

impl Element for f32 {}

impl Element for f64 {}

impl Element for bool {}

impl Element for String {}

impl Element for &'static str {}

impl<T: Debug + Clone + Send + Sync> Element for Box<T> {}

impl<T: Debug + Clone + Send + Sync> Element for Arc<T> {}

impl<T: Debug + Clone + Send + Sync> Element for Option<T> {}

impl<T: Debug + Clone + Send + Sync> Element for Vec<T> {}
