//! # Connection Pools
//!
//! Purpose: Hand out connections to callers without reconnecting per
//! request. Two strategies share the same factory and validator hooks:
//!
//! - [`Pool`]: exclusive leases over a stack of idle items, optionally bounded.
//! - [`PipelinedPool`]: several concurrent leases per resident item, for
//!   connections that pipeline requests.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Items are created lazily and reused until a
//!    lease reports them corrupted or the validator rejects them.
//! 2. **Minimal Locking**: One mutex per pool guards only bookkeeping; it is
//!    never held across connect, send or receive.
//! 3. **RAII Leases**: Dropping a lease returns or discards its item on every
//!    exit path, including errors and cancelled futures.
//! 4. **FIFO Fairness**: Queued borrowers are served in arrival order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::ClientResult;

mod exclusive;
mod pipelined;

pub use exclusive::{Lease, Pool};
pub use pipelined::{PipelinedLease, PipelinedPool};

/// Boxed future returned by a [`Factory`].
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Creates a new pooled item.
pub type Factory<T> = Arc<dyn Fn() -> BoxFuture<ClientResult<T>> + Send + Sync>;

/// Decides on release whether an item may be reused.
pub type Validator<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// An item a pool can own and tear down.
pub trait Resource: Send + Sync + 'static {
    /// Releases the item's underlying resources. Called once, when the pool
    /// discards the item.
    fn close(&self) {}
}

impl<T: Resource> Resource for Arc<T> {
    fn close(&self) {
        T::close(self)
    }
}

/// Options for the exclusive [`Pool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    /// Maximum number of simultaneously borrowed items; `0` means unbounded.
    pub max_count: usize,
}

/// Options for the [`PipelinedPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelinedPoolOptions {
    /// Number of resident items kept open.
    pub target_item_count: usize,
    /// Concurrent leases allowed per resident item.
    pub max_requests_per_item: usize,
}

impl Default for PipelinedPoolOptions {
    fn default() -> Self {
        PipelinedPoolOptions {
            target_item_count: 2,
            max_requests_per_item: 10,
        }
    }
}

/// Wraps an async closure as a [`Factory`].
pub fn factory<T, F, Fut>(create: F) -> Factory<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ClientResult<T>> + Send + 'static,
{
    Arc::new(move || Box::pin(create()) as BoxFuture<ClientResult<T>>)
}
