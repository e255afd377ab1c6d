//! Value producers invoked by the cache on a miss or a revalidation.
//!
//! A producer is any `Fn(ProduceContext) -> Future<Output = Result<V, E>>`
//! that is `Send + Sync + 'static`; the cache may call it many times over its
//! lifetime, and hands it to a background task when revalidating. Synchronous
//! work can be wrapped with [`from_fn`].

use std::any::{type_name, Any};
use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};

use crate::error::CacheError;

/// Argument passed to every producer call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProduceContext {
    /// `true` when called from a background revalidation of a stale entry,
    /// `false` when the caller is waiting on the result.
    pub is_revalidating: bool,
}

impl ProduceContext {
    pub fn initial() -> Self {
        Self {
            is_revalidating: false,
        }
    }

    pub fn revalidating() -> Self {
        Self {
            is_revalidating: true,
        }
    }
}

/// Computes the value to cache.
pub trait Producer<V, E>: Send + Sync + 'static {
    fn produce(&self, ctx: ProduceContext) -> BoxFuture<'static, Result<V, E>>;
}

impl<V, E, F, Fut> Producer<V, E> for F
where
    F: Fn(ProduceContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
{
    fn produce(&self, ctx: ProduceContext) -> BoxFuture<'static, Result<V, E>> {
        (self)(ctx).boxed()
    }
}

/// Reference-counted producer, cheap to hand to background tasks.
pub type SharedProducer<V, E> = Arc<dyn Producer<V, E>>;

/// Wrap an async closure as a [`SharedProducer`].
pub fn shared<V, E, F, Fut>(f: F) -> SharedProducer<V, E>
where
    F: Fn(ProduceContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    V: 'static,
    E: 'static,
{
    Arc::new(f)
}

/// Wrap a synchronous closure as a [`SharedProducer`].
///
/// The closure runs inline when the returned future is first polled.
pub fn from_fn<V, E, F>(f: F) -> SharedProducer<V, E>
where
    F: Fn(ProduceContext) -> Result<V, E> + Send + Sync + 'static,
    V: Send + 'static,
    E: Send + 'static,
{
    Arc::new(move |ctx: ProduceContext| future::ready(f(ctx)))
}

/// Type-erased producer handle.
///
/// Lets producers travel through heterogeneous registries or plugin
/// boundaries. [`Cache::resolve_any`](crate::Cache::resolve_any) recovers the
/// typed producer and reports [`CacheError::InvalidProducer`] when the handle
/// holds something else.
pub struct AnyProducer {
    inner: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl AnyProducer {
    /// Erase a typed producer
    pub fn new<V, E>(producer: SharedProducer<V, E>) -> Self
    where
        V: 'static,
        E: 'static,
    {
        Self {
            inner: Box::new(producer),
            type_name: type_name::<SharedProducer<V, E>>(),
        }
    }

    /// Wrap an arbitrary value. Resolving with it fails unless the value is a
    /// [`SharedProducer`] of the right type.
    pub fn from_any<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Box::new(value),
            type_name: type_name::<T>(),
        }
    }

    /// Name of the erased type, for diagnostics
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn downcast<V, E>(self) -> Result<SharedProducer<V, E>, CacheError>
    where
        V: 'static,
        E: 'static,
    {
        self.inner
            .downcast::<SharedProducer<V, E>>()
            .map(|producer| *producer)
            .map_err(|_| CacheError::InvalidProducer {
                expected: type_name::<SharedProducer<V, E>>(),
            })
    }
}

impl std::fmt::Debug for AnyProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyProducer")
            .field("type_name", &self.type_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_shared_passes_context() {
        let producer = shared(|ctx: ProduceContext| async move {
            Ok::<_, CacheError>(ctx.is_revalidating)
        });

        assert!(!producer.produce(ProduceContext::initial()).await.unwrap());
        assert!(producer.produce(ProduceContext::revalidating()).await.unwrap());
    }

    #[tokio::test]
    async fn test_from_fn_is_reinvocable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let producer = from_fn(move |_ctx| {
            Ok::<_, CacheError>(counter.fetch_add(1, Ordering::SeqCst) + 1)
        });

        assert_eq!(producer.produce(ProduceContext::initial()).await.unwrap(), 1);
        assert_eq!(producer.produce(ProduceContext::initial()).await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_any_producer_round_trip() {
        let erased = AnyProducer::new(from_fn(|_ctx| Ok::<u32, CacheError>(7)));
        let producer = erased.downcast::<u32, CacheError>().unwrap();
        assert_eq!(producer.produce(ProduceContext::initial()).await.unwrap(), 7);
    }

    #[test]
    fn test_any_producer_wrong_type() {
        let erased = AnyProducer::from_any("not a function");
        assert_eq!(erased.type_name(), "&str");

        let err = erased.downcast::<u32, CacheError>().err().unwrap();
        assert!(matches!(err, CacheError::InvalidProducer { .. }));
    }

    #[test]
    fn test_any_producer_mismatched_value_type() {
        let erased = AnyProducer::new(from_fn(|_ctx| Ok::<String, CacheError>("x".into())));
        let result = erased.downcast::<u32, CacheError>();
        assert!(matches!(result, Err(CacheError::InvalidProducer { .. })));
    }
}
