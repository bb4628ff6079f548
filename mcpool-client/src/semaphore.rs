//! # Async Semaphore
//!
//! Purpose: Count units of capacity and let tasks suspend, not block, until
//! a unit is free. Used both to bound pool usage and, with capacity 1, to
//! serialize response reads on a pipelined connection.
//!
//! ## Design Principles
//! 1. **FIFO Hand-Off**: `signal` gives a freed unit straight to the oldest
//!    waiter; the counter only grows once nobody is queued.
//! 2. **Eager Registration**: `wait` takes its place in the queue when it is
//!    called, not when the returned future is first polled, so callers can
//!    fix their order while holding another lock.
//! 3. **Short Critical Sections**: State changes happen under one mutex;
//!    waking a waiter happens after the mutex is released.
//! 4. **Cancellation Safe**: A dropped wait gives back any unit it was
//!    handed, so capacity never leaks.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

struct SemaphoreState {
    count: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Counting semaphore with FIFO wake-up order.
pub struct AsyncSemaphore {
    state: Mutex<SemaphoreState>,
}

impl AsyncSemaphore {
    /// Creates a semaphore holding `count` units.
    pub fn new(count: usize) -> Self {
        AsyncSemaphore {
            state: Mutex::new(SemaphoreState {
                count,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Units currently available without waiting.
    pub fn available(&self) -> usize {
        self.state.lock().count
    }

    /// Number of callers queued for a unit.
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Takes one unit, suspending until one is available.
    ///
    /// The caller's queue position is fixed by this call; awaiting the
    /// returned future only observes the outcome.
    pub fn wait(&self) -> Acquire<'_> {
        let mut state = self.state.lock();
        if state.count > 0 {
            state.count -= 1;
            return Acquire {
                semaphore: self,
                stage: Stage::Granted,
            };
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        Acquire {
            semaphore: self,
            stage: Stage::Queued(rx),
        }
    }

    /// Like `wait`, but resolves to a guard that calls `signal` when dropped.
    pub fn wait_and_signal(&self) -> AcquireGuard<'_> {
        AcquireGuard {
            acquire: self.wait(),
        }
    }

    /// Releases `count` units, waking queued callers oldest first.
    pub fn signal(&self, count: usize) {
        for _ in 0..count {
            self.release_one();
        }
    }

    fn release_one(&self) {
        loop {
            let waiter = {
                let mut state = self.state.lock();
                match state.waiters.pop_front() {
                    Some(waiter) => waiter,
                    None => {
                        state.count += 1;
                        return;
                    }
                }
            };
            // A closed receiver means the waiter gave up; try the next one.
            if waiter.send(()).is_ok() {
                return;
            }
        }
    }
}

enum Stage {
    Granted,
    Queued(oneshot::Receiver<()>),
    Done,
}

/// Future returned by [`AsyncSemaphore::wait`].
pub struct Acquire<'a> {
    semaphore: &'a AsyncSemaphore,
    stage: Stage,
}

impl Acquire<'_> {
    /// True when the unit was available at call time.
    pub fn is_ready(&self) -> bool {
        matches!(self.stage, Stage::Granted)
    }
}

impl Future for Acquire<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        match &mut this.stage {
            Stage::Granted => {
                this.stage = Stage::Done;
                Poll::Ready(())
            }
            Stage::Queued(rx) => match Pin::new(rx).poll(cx) {
                // The sender is only dropped after a successful send or when
                // the semaphore itself is gone, so both arms mean "acquired".
                Poll::Ready(_) => {
                    this.stage = Stage::Done;
                    Poll::Ready(())
                }
                Poll::Pending => Poll::Pending,
            },
            Stage::Done => Poll::Ready(()),
        }
    }
}

impl Drop for Acquire<'_> {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.stage, Stage::Done) {
            Stage::Granted => self.semaphore.signal(1),
            Stage::Queued(mut rx) => {
                rx.close();
                if rx.try_recv().is_ok() {
                    self.semaphore.signal(1);
                }
            }
            Stage::Done => {}
        }
    }
}

/// Future returned by [`AsyncSemaphore::wait_and_signal`].
pub struct AcquireGuard<'a> {
    acquire: Acquire<'a>,
}

impl<'a> Future for AcquireGuard<'a> {
    type Output = SemaphoreGuard<'a>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<SemaphoreGuard<'a>> {
        let this = self.get_mut();
        match Pin::new(&mut this.acquire).poll(cx) {
            Poll::Ready(()) => Poll::Ready(SemaphoreGuard {
                semaphore: Some(this.acquire.semaphore),
            }),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Holds one unit; signals the semaphore exactly once when dropped.
pub struct SemaphoreGuard<'a> {
    semaphore: Option<&'a AsyncSemaphore>,
}

impl SemaphoreGuard<'_> {
    /// Keeps the unit without signalling; the caller must `signal` later.
    pub fn forget(mut self) {
        self.semaphore = None;
    }
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        if let Some(semaphore) = self.semaphore.take() {
            semaphore.signal(1);
        }
    }
}
