use futures::future::{BoxFuture, FutureExt as _, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::errors::ResolveErrorKind;

type Construction<T> = Shared<BoxFuture<'static, Result<Arc<T>, Arc<ResolveErrorKind>>>>;

enum State<T> {
    Empty,
    Pending(Construction<T>),
    Ready(Arc<T>),
}

/// Promise-memoized singleton slot.
///
/// Concurrent requests while a construction is in flight join the same
/// construction. A failed construction resets the slot so the next request
/// starts over.
pub(crate) struct AsyncSingleton<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for AsyncSingleton<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> AsyncSingleton<T> {
    #[inline]
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Empty)),
        }
    }

    #[must_use]
    pub(crate) fn ready(&self) -> Option<Arc<T>> {
        match &*self.state.lock() {
            State::Ready(instance) => Some(instance.clone()),
            State::Empty | State::Pending(_) => None,
        }
    }

    /// Publishes an instance before its construction future completes,
    /// so post-construction steps can observe it.
    pub(crate) fn publish(&self, instance: Arc<T>) {
        *self.state.lock() = State::Ready(instance);
    }

    /// Returns the ready instance, joins the in-flight construction, or starts
    /// a new one built by `construct`.
    pub(crate) async fn get_or_construct<F>(&self, construct: F) -> Result<Arc<T>, ResolveErrorKind>
    where
        F: FnOnce() -> BoxFuture<'static, Result<Arc<T>, ResolveErrorKind>>,
    {
        let construction = {
            let mut guard = self.state.lock();
            match &*guard {
                State::Ready(instance) => return Ok(instance.clone()),
                State::Pending(construction) => {
                    debug!("Joined in-flight construction");
                    construction.clone()
                }
                State::Empty => {
                    let state = self.state.clone();
                    let future = construct();
                    let construction = async move {
                        match future.await {
                            Ok(instance) => {
                                *state.lock() = State::Ready(instance.clone());
                                Ok(instance)
                            }
                            Err(err) => {
                                *state.lock() = State::Empty;
                                debug!("Construction failed, slot reset");
                                Err(Arc::new(err))
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    *guard = State::Pending(construction.clone());
                    construction
                }
            }
        };

        construction.await.map_err(ResolveErrorKind::from_shared)
    }
}

#[cfg(test)]
mod tests {
    use super::AsyncSingleton;
    use crate::errors::{InstantiateErrorKind, ResolveErrorKind};

    use futures::{future::join_all, FutureExt as _};
    use std::sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    };
    use tokio::task::yield_now;

    #[tokio::test]
    async fn test_concurrent_requests_share_construction() {
        let slot = AsyncSingleton::<u8>::new();
        let calls = Arc::new(AtomicU8::new(0));

        let results = join_all((0..8).map(|_| {
            let calls = calls.clone();
            slot.get_or_construct(move || {
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    yield_now().await;
                    Ok(Arc::new(7))
                }
                .boxed()
            })
        }))
        .await;

        let first = results[0].as_ref().unwrap().clone();
        for result in &results {
            assert!(Arc::ptr_eq(result.as_ref().unwrap(), &first));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(slot.ready().is_some());
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let slot = AsyncSingleton::<u8>::new();

        let err = slot
            .get_or_construct(|| {
                async { Err(ResolveErrorKind::from(InstantiateErrorKind::from(anyhow::anyhow!("boom")))) }.boxed()
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(slot.ready().is_none());

        let value = slot.get_or_construct(|| async { Ok(Arc::new(1)) }.boxed()).await.unwrap();
        assert_eq!(*value, 1);
    }
}
