//! Pending lease requests and the handles callers wait on

use crate::entry::PoolEntry;
use crate::errors::{PoolError, PoolResult};

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

static NEXT_WAITER_ID: AtomicU64 = AtomicU64::new(1);

enum Slot<R, C> {
    Pending,
    Fulfilled(PoolEntry<R, C>),
    Failed(PoolError),
    Cancelled,
    Taken,
}

/// A lease request parked on its route until capacity frees up
///
/// The slot moves out of `Pending` exactly once; whichever of fulfilment,
/// failure or cancellation gets there first wins.
pub(crate) struct Waiter<R, C> {
    id: u64,
    route: R,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    slot: Mutex<Slot<R, C>>,
    ready: Condvar,
    notify: Notify,
}

impl<R, C> Waiter<R, C> {
    pub fn new(route: R, timeout: Option<Duration>, now: Instant) -> Self {
        Self {
            id: NEXT_WAITER_ID.fetch_add(1, Ordering::Relaxed),
            route,
            timeout,
            deadline: timeout.map(|t| now + t),
            slot: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
            notify: Notify::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn route(&self) -> &R {
        &self.route
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn timeout_error(&self) -> PoolError {
        PoolError::LeaseTimeout(self.timeout.unwrap_or_default())
    }

    pub fn deadline_passed(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Pending)
    }

    /// Hands `entry` over; gives it back if the waiter is no longer pending
    pub fn fulfil(&self, entry: PoolEntry<R, C>) -> Result<(), PoolEntry<R, C>> {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Pending) {
            return Err(entry);
        }
        *slot = Slot::Fulfilled(entry);
        drop(slot);
        self.wake();
        Ok(())
    }

    pub fn fail(&self, error: PoolError) -> bool {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Pending) {
            return false;
        }
        *slot = Slot::Failed(error);
        drop(slot);
        self.wake();
        true
    }

    pub fn cancel(&self) -> bool {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Pending) {
            return false;
        }
        *slot = Slot::Cancelled;
        drop(slot);
        self.wake();
        true
    }

    /// Takes the outcome if the waiter has one
    pub fn take(&self) -> Option<PoolResult<PoolEntry<R, C>>> {
        Self::take_locked(&mut self.slot.lock())
    }

    fn take_locked(slot: &mut Slot<R, C>) -> Option<PoolResult<PoolEntry<R, C>>> {
        match std::mem::replace(slot, Slot::Taken) {
            Slot::Pending => {
                *slot = Slot::Pending;
                None
            }
            Slot::Fulfilled(entry) => Some(Ok(entry)),
            Slot::Failed(error) => Some(Err(error)),
            Slot::Cancelled => {
                *slot = Slot::Cancelled;
                Some(Err(PoolError::Cancelled))
            }
            Slot::Taken => Some(Err(PoolError::Cancelled)),
        }
    }

    /// Blocks the calling thread until an outcome arrives or `deadline` passes
    fn wait_until(&self, deadline: Option<Instant>) -> Option<PoolResult<PoolEntry<R, C>>> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(outcome) = Self::take_locked(&mut slot) {
                return Some(outcome);
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut slot, deadline).timed_out() {
                        return Self::take_locked(&mut slot);
                    }
                }
                None => self.ready.wait(&mut slot),
            }
        }
    }

    fn wake(&self) {
        self.ready.notify_all();
        // stores a permit when nobody is polling yet
        self.notify.notify_one();
    }
}

/// Pool side of a lease handle
pub(crate) trait LeaseRegistry<R, C>: Send + Sync {
    /// Removes a pending waiter from its route queue; false if it already completed
    fn cancel(&self, waiter: &Arc<Waiter<R, C>>) -> bool;

    /// Withdraws a waiter whose deadline passed; false if it already completed
    fn expire(&self, waiter: &Arc<Waiter<R, C>>) -> bool;

    /// Cancels the waiter, or returns its entry to the pool if it was already fulfilled
    fn abandon(&self, waiter: &Arc<Waiter<R, C>>);

    /// Returns a leased entry nobody will ever see back to the pool
    fn reclaim(&self, entry: PoolEntry<R, C>);
}

enum HandleState<R, C> {
    Ready(PoolResult<PoolEntry<R, C>>),
    Waiting(Arc<Waiter<R, C>>),
    Done,
}

/// Cancellable, timeout-bound handle to a lease request
///
/// Resolve it with [`wait`](Self::wait) from async code or
/// [`wait_blocking`](Self::wait_blocking) from a plain thread. Dropping an
/// unresolved handle cancels the request; an entry already handed to it goes
/// back to the pool.
pub struct LeaseHandle<R, C> {
    registry: Weak<dyn LeaseRegistry<R, C>>,
    state: HandleState<R, C>,
}

impl<R, C> fmt::Debug for LeaseHandle<R, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            HandleState::Ready(Ok(_)) => "ready",
            HandleState::Ready(Err(_)) => "failed",
            HandleState::Waiting(_) => "waiting",
            HandleState::Done => "done",
        };
        f.debug_struct("LeaseHandle").field("state", &state).finish()
    }
}

impl<R, C> LeaseHandle<R, C> {
    pub(crate) fn ready(
        registry: Weak<dyn LeaseRegistry<R, C>>,
        outcome: PoolResult<PoolEntry<R, C>>,
    ) -> Self {
        Self {
            registry,
            state: HandleState::Ready(outcome),
        }
    }

    pub(crate) fn waiting(registry: Weak<dyn LeaseRegistry<R, C>>, waiter: Arc<Waiter<R, C>>) -> Self {
        Self {
            registry,
            state: HandleState::Waiting(waiter),
        }
    }

    /// Whether the request was queued as a waiter rather than resolved at once
    pub fn is_waiting(&self) -> bool {
        matches!(&self.state, HandleState::Waiting(waiter) if waiter.is_pending())
    }

    /// Whether an outcome is available without waiting
    pub fn is_ready(&self) -> bool {
        match &self.state {
            HandleState::Ready(_) => true,
            HandleState::Waiting(waiter) => !waiter.is_pending(),
            HandleState::Done => false,
        }
    }

    /// Cancels a pending request
    ///
    /// Returns `false` if the request already has an outcome, in which case
    /// [`wait`](Self::wait) still yields it.
    pub fn cancel(&self) -> bool {
        match &self.state {
            HandleState::Waiting(waiter) => match self.registry.upgrade() {
                Some(registry) => registry.cancel(waiter),
                None => waiter.cancel(),
            },
            _ => false,
        }
    }

    /// Waits for the lease outcome
    ///
    /// Fails with [`PoolError::LeaseTimeout`] once the lease deadline passes
    /// and with [`PoolError::Cancelled`] if the request was cancelled.
    pub async fn wait(mut self) -> PoolResult<PoolEntry<R, C>> {
        loop {
            let waiter = match std::mem::replace(&mut self.state, HandleState::Done) {
                HandleState::Ready(outcome) => return outcome,
                HandleState::Done => return Err(PoolError::Cancelled),
                HandleState::Waiting(waiter) => waiter,
            };
            if let Some(outcome) = waiter.take() {
                return outcome;
            }
            self.state = HandleState::Waiting(Arc::clone(&waiter));

            let notified = waiter.notify.notified();
            match waiter.deadline() {
                Some(deadline) => {
                    let deadline = tokio::time::Instant::from_std(deadline);
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.expire(&waiter);
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Blocks the current thread until the lease outcome is known
    ///
    /// Must not be called from within an async runtime worker.
    pub fn wait_blocking(mut self) -> PoolResult<PoolEntry<R, C>> {
        let waiter = match std::mem::replace(&mut self.state, HandleState::Done) {
            HandleState::Ready(outcome) => return outcome,
            HandleState::Done => return Err(PoolError::Cancelled),
            HandleState::Waiting(waiter) => waiter,
        };
        self.state = HandleState::Waiting(Arc::clone(&waiter));
        match waiter.wait_until(waiter.deadline()) {
            Some(outcome) => {
                self.state = HandleState::Done;
                outcome
            }
            None => self.expire(&waiter),
        }
    }

    fn expire(&mut self, waiter: &Arc<Waiter<R, C>>) -> PoolResult<PoolEntry<R, C>> {
        self.state = HandleState::Done;
        let expired = match self.registry.upgrade() {
            Some(registry) => registry.expire(waiter),
            None => waiter.cancel(),
        };
        if expired {
            return Err(waiter.timeout_error());
        }
        // completed while the deadline fired; the outcome wins
        waiter.take().unwrap_or(Err(PoolError::Cancelled))
    }
}

impl<R, C> Drop for LeaseHandle<R, C> {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.state, HandleState::Done) {
            HandleState::Waiting(waiter) => match self.registry.upgrade() {
                Some(registry) => registry.abandon(&waiter),
                None => {
                    waiter.cancel();
                }
            },
            HandleState::Ready(Ok(entry)) => {
                if let Some(registry) = self.registry.upgrade() {
                    registry.reclaim(entry);
                }
            }
            HandleState::Ready(Err(_)) | HandleState::Done => {}
        }
    }
}
