use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{Factory, PoolOptions, Resource, Validator};
use crate::error::{ClientError, ClientResult};
use crate::semaphore::AsyncSemaphore;

struct PoolState<T> {
    idle: Vec<T>,
    disposed: bool,
}

struct PoolInner<T> {
    state: Mutex<PoolState<T>>,
    // None when unbounded.
    capacity: Option<AsyncSemaphore>,
    factory: Factory<T>,
    validator: Option<Validator<T>>,
}

/// Pool handing each item to one borrower at a time.
///
/// Idle items are kept on a stack, so the most recently returned item is
/// reused first.
pub struct Pool<T: Resource> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Resource> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Pool {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Resource> Pool<T> {
    /// Creates an empty pool; items are created on demand by `factory`.
    pub fn new(factory: Factory<T>, validator: Option<Validator<T>>, options: PoolOptions) -> Self {
        let capacity = match options.max_count {
            0 => None,
            max => Some(AsyncSemaphore::new(max)),
        };
        Pool {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    disposed: false,
                }),
                capacity,
                factory,
                validator,
            }),
        }
    }

    /// Borrows an idle item or creates one, waiting for capacity if the
    /// pool is bounded.
    pub async fn borrow(&self) -> ClientResult<Lease<T>> {
        self.ensure_live()?;

        // Dropping the guard on an error path gives the unit back.
        let guard = match &self.inner.capacity {
            Some(capacity) => Some(capacity.wait_and_signal().await),
            None => None,
        };

        let idle = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return Err(ClientError::Disposed);
            }
            state.idle.pop()
        };
        let item = match idle {
            Some(item) => item,
            None => {
                let item = (self.inner.factory)().await?;
                debug!("pool created item");
                item
            }
        };

        if let Some(guard) = guard {
            guard.forget();
        }
        Ok(Lease {
            pool: self.inner.clone(),
            item: Some(item),
            corrupted: false,
        })
    }

    /// Number of items waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Marks the pool disposed and closes every idle item. Outstanding leases
    /// close their items when dropped.
    pub fn dispose(&self) {
        let idle = {
            let mut state = self.inner.state.lock();
            state.disposed = true;
            std::mem::take(&mut state.idle)
        };
        for item in &idle {
            item.close();
        }
        debug!(closed = idle.len(), "pool disposed");
    }

    fn ensure_live(&self) -> ClientResult<()> {
        if self.inner.state.lock().disposed {
            return Err(ClientError::Disposed);
        }
        Ok(())
    }
}

impl<T: Resource> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Pool")
            .field("idle", &state.idle.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}

/// Exclusive loan of a pooled item; returns it to the pool on drop.
pub struct Lease<T: Resource> {
    pool: Arc<PoolInner<T>>,
    item: Option<T>,
    corrupted: bool,
}

impl<T: Resource> Lease<T> {
    /// Discards the item on release instead of reusing it.
    pub fn mark_corrupted(&mut self) {
        self.corrupted = true;
    }

    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }
}

impl<T: Resource> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.item {
            Some(item) => item,
            // Only taken in drop.
            None => unreachable!("lease item already released"),
        }
    }
}

impl<T: Resource> Drop for Lease<T> {
    fn drop(&mut self) {
        let item = match self.item.take() {
            Some(item) => item,
            None => return,
        };

        let rejected = match &self.pool.validator {
            Some(validator) => !validator(&item),
            None => false,
        };
        let discard = {
            let mut state = self.pool.state.lock();
            if self.corrupted || rejected || state.disposed {
                Some(item)
            } else {
                state.idle.push(item);
                None
            }
        };
        if let Some(item) = discard {
            debug!(corrupted = self.corrupted, rejected, "pool discarded item");
            item.close();
        }

        if let Some(capacity) = &self.pool.capacity {
            capacity.signal(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::factory;
    use crate::pool::test_support::{counting_factory, poll_once, Probe};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn returned_items_are_reused() {
        let (factory, created) = counting_factory();
        let pool = Pool::new(factory, None, PoolOptions::default());

        let first = pool.borrow().await.unwrap();
        let id = first.id;
        drop(first);
        assert_eq!(pool.idle_count(), 1);

        let second = pool.borrow().await.unwrap();
        assert_eq!(second.id, id);
        assert_eq!(created.lock().len(), 1);
    }

    #[tokio::test]
    async fn corrupted_items_are_closed() {
        let (factory, created) = counting_factory();
        let pool = Pool::new(factory, None, PoolOptions::default());

        let mut lease = pool.borrow().await.unwrap();
        lease.mark_corrupted();
        drop(lease);
        assert_eq!(pool.idle_count(), 0);
        assert!(created.lock()[0].is_closed());

        let fresh = pool.borrow().await.unwrap();
        assert_eq!(fresh.id, 1);
    }

    #[tokio::test]
    async fn validator_rejects_on_release() {
        let (factory, created) = counting_factory();
        let validator: Validator<Arc<Probe>> = Arc::new(|probe: &Arc<Probe>| probe.id != 0);
        let pool = Pool::new(factory, Some(validator), PoolOptions::default());

        drop(pool.borrow().await.unwrap());
        assert_eq!(pool.idle_count(), 0);
        assert!(created.lock()[0].is_closed());

        let lease = pool.borrow().await.unwrap();
        assert_eq!(lease.id, 1);
        drop(lease);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn max_count_bounds_outstanding_leases() {
        let (factory, _) = counting_factory();
        let pool = Pool::new(factory, None, PoolOptions { max_count: 2 });

        let a = pool.borrow().await.unwrap();
        let _b = pool.borrow().await.unwrap();

        let mut third = Box::pin(pool.borrow());
        assert!(poll_once(&mut third).await.is_none());
        assert!(poll_once(&mut third).await.is_none());

        let reused = a.id;
        drop(a);
        let lease = third.await.unwrap();
        assert_eq!(lease.id, reused);
    }

    #[tokio::test]
    async fn failed_creation_releases_capacity() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let failing = factory(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<Arc<Probe>, _>(ClientError::EndOfStream) }
        });
        let pool = Pool::new(failing, None, PoolOptions { max_count: 1 });

        assert!(pool.borrow().await.is_err());
        assert!(pool.borrow().await.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dispose_closes_idle_and_rejects_borrow() {
        let (factory, created) = counting_factory();
        let pool = Pool::new(factory, None, PoolOptions::default());

        let idle = pool.borrow().await.unwrap();
        let held = pool.borrow().await.unwrap();
        drop(idle);
        pool.dispose();

        assert!(created.lock()[0].is_closed());
        assert!(matches!(pool.borrow().await, Err(ClientError::Disposed)));

        assert!(!held.is_closed());
        drop(held);
        assert!(created.lock()[1].is_closed());
    }
}
