//! Lazy Value Module
//!
//! Values handed to the write operations, either ready or produced on demand.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by deferred producers.
pub type BoxFuture<'a, V> = Pin<Box<dyn Future<Output = V> + Send + 'a>>;

type Producer<'a, V> = Box<dyn FnOnce() -> V + Send + 'a>;
type Deferred<'a, V> = Box<dyn FnOnce() -> BoxFuture<'a, V> + Send + 'a>;

// == Value ==
/// A value to cache, or a function producing it.
///
/// Producers only run when the write actually needs the value.
pub enum Value<'a, V> {
    /// Already computed value
    Literal(V),
    /// Computed on demand
    Producer(Producer<'a, V>),
}

impl<'a, V> Value<'a, V> {
    /// Wraps a producer that runs only if the value is needed.
    pub fn lazy<F>(produce: F) -> Self
    where
        F: FnOnce() -> V + Send + 'a,
    {
        Self::Producer(Box::new(produce))
    }

    /// Returns the value, running the producer if needed.
    pub fn into_inner(self) -> V {
        match self {
            Self::Literal(value) => value,
            Self::Producer(produce) => produce(),
        }
    }

    /// Runs the producer now so the value can be inspected.
    pub(crate) fn force(self) -> Self {
        Self::Literal(self.into_inner())
    }

    pub(crate) fn as_literal(&self) -> Option<&V> {
        match self {
            Self::Literal(value) => Some(value),
            Self::Producer(_) => None,
        }
    }

    /// Converts into the async flavor accepted by `remember_async`.
    pub fn into_async(self) -> AsyncValue<'a, V> {
        match self {
            Self::Literal(value) => AsyncValue::Literal(value),
            Self::Producer(produce) => AsyncValue::Producer(produce),
        }
    }
}

impl<V> From<V> for Value<'_, V> {
    fn from(value: V) -> Self {
        Self::Literal(value)
    }
}

impl<V: fmt::Debug> fmt::Debug for Value<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Self::Producer(_) => f.write_str("Producer(<fn>)"),
        }
    }
}

// == Async Value ==
/// A value to cache, or a sync or async function producing it.
pub enum AsyncValue<'a, V> {
    /// Already computed value
    Literal(V),
    /// Computed on demand
    Producer(Producer<'a, V>),
    /// Computed on demand by awaiting the returned future
    Deferred(Deferred<'a, V>),
}

impl<'a, V> AsyncValue<'a, V> {
    /// Wraps a synchronous producer.
    pub fn lazy<F>(produce: F) -> Self
    where
        F: FnOnce() -> V + Send + 'a,
    {
        Self::Producer(Box::new(produce))
    }

    /// Wraps an asynchronous producer, e.g. an `async` closure or a network call.
    pub fn deferred<F, Fut>(produce: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = V> + Send + 'a,
    {
        Self::Deferred(Box::new(move || Box::pin(produce()) as BoxFuture<'a, V>))
    }

    /// Returns the value, running or awaiting the producer if needed.
    pub async fn resolve(self) -> V {
        match self {
            Self::Literal(value) => value,
            Self::Producer(produce) => produce(),
            Self::Deferred(produce) => produce().await,
        }
    }

    pub(crate) async fn force(self) -> Self {
        Self::Literal(self.resolve().await)
    }

    pub(crate) fn as_literal(&self) -> Option<&V> {
        match self {
            Self::Literal(value) => Some(value),
            _ => None,
        }
    }
}

impl<V> From<V> for AsyncValue<'_, V> {
    fn from(value: V) -> Self {
        Self::Literal(value)
    }
}

impl<V: fmt::Debug> fmt::Debug for AsyncValue<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Self::Producer(_) => f.write_str("Producer(<fn>)"),
            Self::Deferred(_) => f.write_str("Deferred(<fn>)"),
        }
    }
}
