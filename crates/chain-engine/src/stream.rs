//! Streams of items whose length is only known at runtime
//!
//! - [`Generator`]: a restartable factory for a lazy sequence of items
//! - [`Collector`]: folds a sequence into a final value
//! - [`Transformer`]: maps one item to zero or more items
//!
//! Items are [`Item<T>`], so a failure while producing one element is
//! carried in-band at its position. Consumers decide whether to stop.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::NodeError;
use crate::types::Value;

/// One element of a stream: a value or the error raised producing it
pub type Item<T> = std::result::Result<T, NodeError>;

/// Boxed iterator returned by a generator's supplier
pub type ItemIter<T> = Box<dyn Iterator<Item = Item<T>> + Send>;

type Supplier<T> = dyn Fn() -> ItemIter<T> + Send + Sync;

/// Run a per-item mapping, turning a panic into an error item
fn guarded<T>(index: usize, map: impl FnOnce() -> Item<T>) -> Item<T> {
    panic::catch_unwind(AssertUnwindSafe(map)).unwrap_or_else(|payload| {
        Err(NodeError::new(format!(
            "item {} panicked: {}",
            index,
            panic_message(payload.as_ref())
        )))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// A restartable, length-known stream of items
///
/// Calling [`Generator::iter`] again yields a fresh, independent
/// iteration.
pub struct Generator<T> {
    supplier: Arc<Supplier<T>>,
    /// Number of items the supplier is expected to yield
    pub expected_length: usize,
    /// Stop at the first failing item instead of recording it
    pub fail_fast: bool,
    pub metadata: Option<Value>,
}

impl<T: Send + 'static> Generator<T> {
    /// Create a generator from a supplier factory
    pub fn new<F, I>(expected_length: usize, supplier: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: IntoIterator<Item = Item<T>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            supplier: Arc::new(move || Box::new(supplier().into_iter()) as ItemIter<T>),
            expected_length,
            fail_fast: true,
            metadata: None,
        }
    }

    /// Map every element of a list, passing its index
    ///
    /// A failing or panicking `map` yields an error item at that position;
    /// the remaining elements are still produced.
    pub fn from_list<U, F>(list: Vec<U>, map: F) -> Self
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(U, usize) -> Item<T> + Send + Sync + 'static,
    {
        let list = Arc::new(list);
        let map = Arc::new(map);
        let length = list.len();
        Self::new(length, move || {
            let list = Arc::clone(&list);
            let map = Arc::clone(&map);
            (0..list.len()).map(move |index| guarded(index, || map(list[index].clone(), index)))
        })
    }

    /// Produce `count` items from their index
    ///
    /// Panics in `map` are yielded in-band like errors.
    pub fn from_range<F>(count: usize, map: F) -> Self
    where
        F: Fn(usize) -> Item<T> + Send + Sync + 'static,
    {
        let map = Arc::new(map);
        Self::new(count, move || {
            let map = Arc::clone(&map);
            (0..count).map(move |index| guarded(index, || map(index)))
        })
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl<T> Generator<T> {
    /// Start a new iteration
    pub fn iter(&self) -> ItemIter<T> {
        (self.supplier)()
    }
}

impl<T> Clone for Generator<T> {
    fn clone(&self) -> Self {
        Self {
            supplier: Arc::clone(&self.supplier),
            expected_length: self.expected_length,
            fail_fast: self.fail_fast,
            metadata: self.metadata.clone(),
        }
    }
}

impl<T> fmt::Debug for Generator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("expected_length", &self.expected_length)
            .field("fail_fast", &self.fail_fast)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Folds the items of a stream into a final value
///
/// The collector itself holds no state; everything lives in the closures
/// supplied by the node body.
pub struct Collector<T, R> {
    on_iterate: Box<dyn FnMut(T) -> Result<(), NodeError> + Send>,
    on_complete: Box<dyn FnOnce() -> Result<R, NodeError> + Send>,
}

impl<T, R> Collector<T, R> {
    pub fn new<I, C>(on_iterate: I, on_complete: C) -> Self
    where
        I: FnMut(T) -> Result<(), NodeError> + Send + 'static,
        C: FnOnce() -> Result<R, NodeError> + Send + 'static,
    {
        Self {
            on_iterate: Box::new(on_iterate),
            on_complete: Box::new(on_complete),
        }
    }

    /// Fold one item into the collector's state
    pub fn on_iterate(&mut self, item: T) -> Result<(), NodeError> {
        (self.on_iterate)(item)
    }

    /// Finalize the collected state
    pub fn on_complete(self) -> Result<R, NodeError> {
        (self.on_complete)()
    }
}

impl<T: 'static, R: 'static> Collector<T, R> {
    /// Build a collector from an accumulator and a step/finish pair
    pub fn fold<S, F, G>(init: S, mut step: F, finish: G) -> Self
    where
        S: Send + 'static,
        F: FnMut(&mut S, T) -> Result<(), NodeError> + Send + 'static,
        G: FnOnce(S) -> Result<R, NodeError> + Send + 'static,
    {
        let state = Arc::new(Mutex::new(Some(init)));
        let complete_state = Arc::clone(&state);
        Self::new(
            move |item| match state.lock().as_mut() {
                Some(acc) => step(acc, item),
                None => Err(NodeError::new("collector already completed")),
            },
            move || match complete_state.lock().take() {
                Some(acc) => finish(acc),
                None => Err(NodeError::new("collector already completed")),
            },
        )
    }
}

impl<T, R> fmt::Debug for Collector<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector").finish_non_exhaustive()
    }
}

/// Maps one item to zero or more items
pub struct Transformer<T> {
    transform: Arc<dyn Fn(T) -> Vec<Item<T>> + Send + Sync>,
}

impl<T: 'static> Transformer<T> {
    pub fn new<F>(transform: F) -> Self
    where
        F: Fn(T) -> Vec<Item<T>> + Send + Sync + 'static,
    {
        Self {
            transform: Arc::new(transform),
        }
    }

    /// Keep only items matching a predicate
    pub fn filter<F>(predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::new(move |item| {
            if predicate(&item) {
                vec![Ok(item)]
            } else {
                Vec::new()
            }
        })
    }

    pub fn apply(&self, item: T) -> Vec<Item<T>> {
        (self.transform)(item)
    }
}

impl<T> Clone for Transformer<T> {
    fn clone(&self) -> Self {
        Self {
            transform: Arc::clone(&self.transform),
        }
    }
}

impl<T> fmt::Debug for Transformer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double_failing_at_one(x: i64, index: usize) -> Item<i64> {
        if index == 1 {
            Err(NodeError::new("bad item"))
        } else {
            Ok(x * 2)
        }
    }

    #[test]
    fn test_from_list_yields_errors_in_band() {
        let generator = Generator::from_list(vec![1, 2, 3], double_failing_at_one);
        assert_eq!(generator.expected_length, 3);

        let items: Vec<_> = generator.iter().collect();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], Ok(2));
        assert_eq!(items[1], Err(NodeError::new("bad item")));
        assert_eq!(items[2], Ok(6));
    }

    #[test]
    fn test_panicking_item_yields_error() {
        let generator = Generator::from_list(vec![1, 2, 3], |x: i64, index| {
            if index == 1 {
                panic!("item exploded");
            }
            Ok(x)
        });

        let items: Vec<_> = generator.iter().collect();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], Ok(1));
        assert!(items[1]
            .as_ref()
            .unwrap_err()
            .message
            .contains("item exploded"));
        assert_eq!(items[2], Ok(3));

        let generator = Generator::from_range(2, |i| {
            if i == 0 {
                panic!("{} is unlucky", i);
            }
            Ok(i)
        });
        let items: Vec<_> = generator.iter().collect();
        assert!(items[0].as_ref().unwrap_err().message.contains("0 is unlucky"));
        assert_eq!(items[1], Ok(1));
    }

    #[test]
    fn test_generator_is_restartable() {
        let generator = Generator::from_range(4, |i| Ok(i * 10));
        let first: Vec<_> = generator.iter().collect();
        let second: Vec<_> = generator.iter().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn test_generator_options() {
        let generator = Generator::from_range(1, |i| Ok(i))
            .with_fail_fast(false)
            .with_metadata(serde_json::json!({"source": "test"}));
        assert!(!generator.fail_fast);
        assert_eq!(generator.metadata.unwrap()["source"], "test");
    }

    #[test]
    fn test_collector_fold() {
        let mut collector: Collector<i64, i64> =
            Collector::fold(0, |sum, item| { *sum += item; Ok(()) }, Ok);
        for i in 1..=4 {
            collector.on_iterate(i).unwrap();
        }
        assert_eq!(collector.on_complete().unwrap(), 10);
    }

    #[test]
    fn test_collector_closure_state() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut collector: Collector<&str, usize> = Collector::new(
            move |item| {
                sink.lock().push(item);
                Ok(())
            },
            {
                let seen = Arc::clone(&seen);
                move || Ok(seen.lock().len())
            },
        );
        collector.on_iterate("a").unwrap();
        collector.on_iterate("b").unwrap();
        assert_eq!(collector.on_complete().unwrap(), 2);
        assert_eq!(*seen.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_transformer_changes_length() {
        let evens = Transformer::filter(|x: &i64| x % 2 == 0);
        assert!(evens.apply(3).is_empty());
        assert_eq!(evens.apply(4), vec![Ok(4)]);

        let repeat = Transformer::new(|x: i64| (0..x).map(|_| Ok(x)).collect());
        assert_eq!(repeat.apply(3).len(), 3);
        assert!(repeat.apply(0).is_empty());
    }
}
