use std::any::type_name;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::{oneshot, OnceCell};
use tracing::{debug, warn};

use super::{Factory, PipelinedPoolOptions, Resource, Validator};
use crate::error::{ClientError, ClientResult};

/// Outcome of a slot's one-time creation, shared by every lease on it.
type Created<T> = Result<Arc<T>, Arc<ClientError>>;
type SlotCell<T> = Arc<OnceCell<Created<T>>>;

struct Slot<T> {
    id: u64,
    in_flight: usize,
    // Removed slots take no new leases and are dropped once drained.
    removed: bool,
    cell: SlotCell<T>,
}

struct Assignment<T> {
    slot_id: u64,
    cell: SlotCell<T>,
}

type Handoff<T> = (oneshot::Sender<Assignment<T>>, Assignment<T>);

struct PipelinedState<T> {
    slots: Vec<Slot<T>>,
    waiters: VecDeque<oneshot::Sender<Assignment<T>>>,
    next_id: u64,
    disposed: bool,
}

impl<T> PipelinedState<T> {
    /// Picks the least loaded live slot with spare capacity, or opens a new
    /// slot while under the target count. The item itself is created later,
    /// outside the lock.
    fn try_assign(&mut self, options: &PipelinedPoolOptions) -> Option<Assignment<T>> {
        let max = options.max_requests_per_item;
        let best = self
            .slots
            .iter_mut()
            .filter(|slot| !slot.removed && slot.in_flight < max)
            .min_by_key(|slot| slot.in_flight);
        if let Some(slot) = best {
            slot.in_flight += 1;
            return Some(Assignment {
                slot_id: slot.id,
                cell: slot.cell.clone(),
            });
        }

        let live = self.slots.iter().filter(|slot| !slot.removed).count();
        if live >= options.target_item_count {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        let cell = Arc::new(OnceCell::new());
        self.slots.push(Slot {
            id,
            in_flight: 1,
            removed: false,
            cell: cell.clone(),
        });
        debug!(slot = id, live = live + 1, "pipelined slot opened");
        Some(Assignment { slot_id: id, cell })
    }

    /// Gives one unit of `slot_id` back. Returns a waiter hand-off to
    /// complete and a drained slot to close, both outside the lock.
    fn release(
        &mut self,
        slot_id: u64,
        corrupted: bool,
        options: &PipelinedPoolOptions,
    ) -> (Option<Handoff<T>>, Option<SlotCell<T>>) {
        let index = match self.slots.iter().position(|slot| slot.id == slot_id) {
            Some(index) => index,
            None => return (None, None),
        };

        let slot = &mut self.slots[index];
        if !corrupted && !slot.removed {
            // The unit goes straight to the oldest waiter.
            if let Some(waiter) = self.waiters.pop_front() {
                let assignment = Assignment {
                    slot_id,
                    cell: slot.cell.clone(),
                };
                return (Some((waiter, assignment)), None);
            }
        }

        slot.in_flight = slot.in_flight.saturating_sub(1);
        if corrupted && !slot.removed {
            slot.removed = true;
            debug!(slot = slot_id, in_flight = slot.in_flight, "pipelined slot removed");
        }
        let drained = if slot.removed && slot.in_flight == 0 {
            Some(self.slots.remove(index).cell)
        } else {
            None
        };

        let handoff = if self.waiters.is_empty() {
            None
        } else {
            self.try_assign(options)
                .and_then(|assignment| self.waiters.pop_front().map(|waiter| (waiter, assignment)))
        };
        (handoff, drained)
    }
}

struct PipelinedInner<T> {
    state: Mutex<PipelinedState<T>>,
    options: PipelinedPoolOptions,
    factory: Factory<T>,
    validator: Option<Validator<T>>,
}

impl<T: Resource> PipelinedInner<T> {
    fn release(&self, slot_id: u64, corrupted: bool) {
        let mut next = Some((slot_id, corrupted));
        while let Some((slot_id, corrupted)) = next.take() {
            let (handoff, drained) = self.state.lock().release(slot_id, corrupted, &self.options);
            if let Some(cell) = drained {
                close_slot(slot_id, &cell);
            }
            if let Some((waiter, assignment)) = handoff {
                // The waiter gave up; pass its unit on.
                if let Err(assignment) = waiter.send(assignment) {
                    next = Some((assignment.slot_id, false));
                }
            }
        }
    }
}

fn close_slot<T: Resource>(slot_id: u64, cell: &SlotCell<T>) {
    if let Some(Ok(item)) = cell.get() {
        item.close();
    }
    debug!(slot = slot_id, "pipelined slot closed");
}

/// Pool sharing each resident item between several concurrent leases.
///
/// Up to `target_item_count` items are kept, each carrying at most
/// `max_requests_per_item` leases. Borrowers beyond that wait in FIFO order.
pub struct PipelinedPool<T: Resource> {
    inner: Arc<PipelinedInner<T>>,
}

impl<T: Resource> Clone for PipelinedPool<T> {
    fn clone(&self) -> Self {
        PipelinedPool {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Resource> PipelinedPool<T> {
    pub fn new(
        factory: Factory<T>,
        validator: Option<Validator<T>>,
        options: PipelinedPoolOptions,
    ) -> Self {
        let options = PipelinedPoolOptions {
            target_item_count: options.target_item_count.max(1),
            max_requests_per_item: options.max_requests_per_item.max(1),
        };
        PipelinedPool {
            inner: Arc::new(PipelinedInner {
                state: Mutex::new(PipelinedState {
                    slots: Vec::new(),
                    waiters: VecDeque::new(),
                    next_id: 0,
                    disposed: false,
                }),
                options,
                factory,
                validator,
            }),
        }
    }

    /// Borrows a share of a resident item.
    ///
    /// Completes without suspending while capacity is available and the
    /// item already exists. A creation failure is cached on the slot and
    /// returned to every borrower that landed on it.
    pub async fn borrow(&self) -> ClientResult<PipelinedLease<T>> {
        let queued = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return Err(ClientError::Disposed);
            }
            match state.try_assign(&self.inner.options) {
                Some(assignment) => Ok(assignment),
                None => {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    debug!(waiting = state.waiters.len(), "borrower queued");
                    Err(rx)
                }
            }
        };
        let assignment = match queued {
            Ok(assignment) => assignment,
            Err(rx) => {
                PendingAssignment {
                    pool: &self.inner,
                    rx: Some(rx),
                }
                .await?
            }
        };

        let mut lease = PipelinedLease {
            pool: self.inner.clone(),
            slot_id: assignment.slot_id,
            item: None,
            corrupted: false,
        };
        let factory = &self.inner.factory;
        let created = assignment
            .cell
            .get_or_init(|| async {
                match factory().await {
                    Ok(item) => {
                        debug!(slot = assignment.slot_id, "pipelined item created");
                        Ok(Arc::new(item))
                    }
                    Err(err) => {
                        warn!(
                            slot = assignment.slot_id,
                            error = %err,
                            "pipelined item creation failed"
                        );
                        Err(Arc::new(err))
                    }
                }
            })
            .await;

        match created {
            Ok(item) => {
                lease.item = Some(item.clone());
                Ok(lease)
            }
            Err(source) => {
                // Retire the slot once everyone who landed on it has seen the error.
                lease.mark_corrupted();
                Err(ClientError::PoolCreation {
                    kind: short_type_name::<T>(),
                    source: source.clone(),
                })
            }
        }
    }

    /// In-flight lease count of each live slot, in creation order.
    pub fn slot_loads(&self) -> Vec<usize> {
        let state = self.inner.state.lock();
        state
            .slots
            .iter()
            .filter(|slot| !slot.removed)
            .map(|slot| slot.in_flight)
            .collect()
    }

    /// Number of queued borrowers.
    pub fn waiting(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    /// Marks every slot removed, fails queued borrowers with
    /// [`ClientError::Disposed`] and closes idle slots. Slots with
    /// outstanding leases close when their last lease is dropped.
    pub fn dispose(&self) {
        let (waiters, idle) = {
            let mut state = self.inner.state.lock();
            state.disposed = true;
            let mut idle = Vec::new();
            state.slots.retain_mut(|slot| {
                slot.removed = true;
                if slot.in_flight == 0 {
                    idle.push((slot.id, slot.cell.clone()));
                    false
                } else {
                    true
                }
            });
            (std::mem::take(&mut state.waiters), idle)
        };
        debug!(failed_waiters = waiters.len(), "pipelined pool disposed");
        drop(waiters);
        for (slot_id, cell) in &idle {
            close_slot(*slot_id, cell);
        }
    }
}

impl<T: Resource> fmt::Debug for PipelinedPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelinedPool")
            .field("options", &self.inner.options)
            .field("slot_loads", &self.slot_loads())
            .field("waiting", &self.waiting())
            .finish()
    }
}

fn short_type_name<T>() -> &'static str {
    let name = type_name::<T>();
    name.rsplit("::").next().unwrap_or(name)
}

/// A queued borrow. Gives back an assignment that arrives after the borrower
/// stopped waiting.
struct PendingAssignment<'a, T: Resource> {
    pool: &'a PipelinedInner<T>,
    rx: Option<oneshot::Receiver<Assignment<T>>>,
}

impl<T: Resource> Future for PendingAssignment<'_, T> {
    type Output = ClientResult<Assignment<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let rx = match this.rx.as_mut() {
            Some(rx) => rx,
            None => return Poll::Ready(Err(ClientError::Disposed)),
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(result) => {
                this.rx = None;
                // The sender is only dropped by dispose.
                Poll::Ready(result.map_err(|_| ClientError::Disposed))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T: Resource> Drop for PendingAssignment<'_, T> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if let Ok(assignment) = rx.try_recv() {
                self.pool.release(assignment.slot_id, false);
            }
        }
    }
}

/// Shared loan of a resident item. Other leases may use the same item
/// concurrently.
pub struct PipelinedLease<T: Resource> {
    pool: Arc<PipelinedInner<T>>,
    slot_id: u64,
    item: Option<Arc<T>>,
    corrupted: bool,
}

impl<T: Resource> PipelinedLease<T> {
    /// Retires the slot: no new leases land on it and its item is closed
    /// once every outstanding lease is dropped.
    pub fn mark_corrupted(&mut self) {
        self.corrupted = true;
    }

    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }
}

impl<T: Resource> Deref for PipelinedLease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.item {
            Some(item) => item,
            // Leases are only handed out once the item exists.
            None => unreachable!("pipelined lease without an item"),
        }
    }
}

impl<T: Resource> Drop for PipelinedLease<T> {
    fn drop(&mut self) {
        let rejected = match (&self.item, &self.pool.validator) {
            (Some(item), Some(validator)) => !validator(item.as_ref()),
            _ => false,
        };
        self.item = None;
        self.pool.release(self.slot_id, self.corrupted || rejected);
    }
}
