//! Per-route bookkeeping and the lease/release algorithm shared by every policy
//!
//! A [`RouteState`] is only ever touched while its owning lock is held; the
//! admission strategy decides which lock that is and supplies the
//! [`CapacityGate`] used for global accounting.

use crate::admission::CapacityGate;
use crate::config::ReusePolicy;
use crate::disposal::CloseMode;
use crate::entry::PoolEntry;
use crate::errors::{PoolError, PoolResult};
use crate::eviction::Eviction;
use crate::waiter::Waiter;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pool-wide parameters an operation needs while holding a route lock
#[derive(Debug, Clone, Copy)]
pub(crate) struct RouteContext {
    pub default_max_per_route: usize,
    pub reuse_policy: ReusePolicy,
    pub time_to_live: Option<Duration>,
    pub now: Instant,
}

/// Work collected under a lock and settled once it is released
pub(crate) struct Ledger<R, C> {
    pub discards: Vec<(PoolEntry<R, C>, CloseMode)>,
    pub created: usize,
    pub reused: usize,
    pub handed_off: usize,
    pub timed_out: usize,
}

impl<R, C> Ledger<R, C> {
    pub fn new() -> Self {
        Self {
            discards: Vec::new(),
            created: 0,
            reused: 0,
            handed_off: 0,
            timed_out: 0,
        }
    }
}

/// Result of a lease attempt on one route
pub(crate) enum Admitted<R, C> {
    Entry(PoolEntry<R, C>),
    Queued(Arc<Waiter<R, C>>),
}

pub(crate) struct RouteState<R, C> {
    route: R,
    max_override: Option<usize>,
    // front holds the most recently released entry
    available: VecDeque<PoolEntry<R, C>>,
    leased: HashMap<u64, PoolEntry<R, C>>,
    waiters: VecDeque<Arc<Waiter<R, C>>>,
    retired: bool,
}

impl<R: Clone, C> RouteState<R, C> {
    pub fn new(route: R) -> Self {
        Self {
            route,
            max_override: None,
            available: VecDeque::new(),
            leased: HashMap::new(),
            waiters: VecDeque::new(),
            retired: false,
        }
    }

    pub fn route(&self) -> &R {
        &self.route
    }

    pub fn max_per_route(&self, default: usize) -> usize {
        self.max_override.unwrap_or(default)
    }

    pub fn set_max_per_route(&mut self, max: usize) {
        self.max_override = Some(max);
    }

    pub fn allocated(&self) -> usize {
        self.available.len() + self.leased.len()
    }

    pub fn leased_count(&self) -> usize {
        self.leased.len()
    }

    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    pub fn pending_count(&self) -> usize {
        self.waiters.len()
    }

    /// Nothing worth keeping: no entries, no waiters, no limit override
    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
            && self.leased.is_empty()
            && self.waiters.is_empty()
            && self.max_override.is_none()
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn retire(&mut self) {
        self.retired = true;
    }

    /// Serves the request from the available queue, a new entry, or parks it
    pub fn lease(
        &mut self,
        timeout: Option<Duration>,
        ctx: &RouteContext,
        gate: &mut dyn CapacityGate,
        ledger: &mut Ledger<R, C>,
    ) -> Admitted<R, C> {
        self.serve_waiters(ctx, gate, ledger);

        // earlier waiters keep their place in line
        if self.waiters.is_empty() {
            if let Some(entry) = self.take_available(ctx, gate, ledger) {
                ledger.reused += 1;
                return Admitted::Entry(entry);
            }
            if let Some(entry) = self.try_create(ctx, gate) {
                ledger.created += 1;
                return Admitted::Entry(entry);
            }
        }

        let waiter = Arc::new(Waiter::new(self.route.clone(), timeout, ctx.now));
        self.waiters.push_back(Arc::clone(&waiter));
        Admitted::Queued(waiter)
    }

    /// Returns a leased entry to this route
    pub fn release(
        &mut self,
        entry: &PoolEntry<R, C>,
        reusable: bool,
        ctx: &RouteContext,
        gate: &mut dyn CapacityGate,
        ledger: &mut Ledger<R, C>,
    ) -> PoolResult<()> {
        let entry = match self.leased.remove(&entry.id()) {
            Some(held) if held.same_lease(entry) => held,
            Some(other) => {
                self.leased.insert(other.id(), other);
                return Err(PoolError::InvalidEntry);
            }
            None => return Err(PoolError::InvalidEntry),
        };

        if reusable && !entry.is_expired(ctx.now) {
            entry.mark_released(ctx.now);
            let Some(entry) = self.hand_off(entry, ctx.now, ledger) else {
                return Ok(());
            };
            // a lowered route limit or an overshooting pool shrinks on release
            let route_full = self.allocated() >= self.max_per_route(ctx.default_max_per_route);
            if route_full || gate.over_target() {
                self.destroy(entry, CloseMode::Graceful, gate, ledger);
            } else {
                self.push_available(entry, ctx.now, gate);
            }
        } else {
            self.destroy(entry, CloseMode::Graceful, gate, ledger);
            self.serve_waiters(ctx, gate, ledger);
        }
        Ok(())
    }

    /// Creates entries for waiters while admission allows
    pub fn serve_waiters(
        &mut self,
        ctx: &RouteContext,
        gate: &mut dyn CapacityGate,
        ledger: &mut Ledger<R, C>,
    ) {
        self.expire_waiters(ctx.now, ledger);
        while !self.waiters.is_empty() {
            let Some(entry) = self.try_create(ctx, gate) else {
                break;
            };
            ledger.created += 1;
            if let Some(entry) = self.hand_off(entry, ctx.now, ledger) {
                // nobody left to take it; keep the slot warm instead of undoing it
                self.leased.remove(&entry.id());
                self.push_available(entry, ctx.now, gate);
                break;
            }
        }
    }

    /// Fails waiters whose deadline has passed and drops cancelled ones
    pub fn expire_waiters(&mut self, now: Instant, ledger: &mut Ledger<R, C>) {
        self.waiters.retain(|waiter| {
            if waiter.deadline_passed(now) {
                if waiter.fail(waiter.timeout_error()) {
                    ledger.timed_out += 1;
                }
                return false;
            }
            waiter.is_pending()
        });
    }

    pub fn remove_waiter(&mut self, id: u64) -> bool {
        let before = self.waiters.len();
        self.waiters.retain(|waiter| waiter.id() != id);
        self.waiters.len() != before
    }

    /// Discards available entries selected by `eviction`
    pub fn evict(
        &mut self,
        eviction: Eviction,
        now: Instant,
        gate: &mut dyn CapacityGate,
        ledger: &mut Ledger<R, C>,
    ) -> usize {
        let available = std::mem::take(&mut self.available);
        let mut evicted = 0;
        for entry in available {
            if eviction.selects(&entry, now) {
                gate.entry_unpooled();
                self.destroy(entry, CloseMode::Graceful, gate, ledger);
                evicted += 1;
            } else {
                self.available.push_back(entry);
            }
        }
        evicted
    }

    /// Release time of the least recently released available entry
    pub fn oldest_release(&self) -> Option<Instant> {
        self.available
            .back()
            .map(|entry| entry.last_released_at().unwrap_or_else(|| entry.created_at()))
    }

    /// Discards the least recently released available entry
    pub fn evict_oldest(&mut self, gate: &mut dyn CapacityGate, ledger: &mut Ledger<R, C>) -> bool {
        match self.available.pop_back() {
            Some(entry) => {
                gate.entry_unpooled();
                self.destroy(entry, CloseMode::Graceful, gate, ledger);
                true
            }
            None => false,
        }
    }

    /// Fails every waiter and discards every entry
    pub fn drain(&mut self, mode: CloseMode, gate: &mut dyn CapacityGate, ledger: &mut Ledger<R, C>) {
        for waiter in self.waiters.drain(..) {
            waiter.fail(PoolError::Cancelled);
        }
        for entry in std::mem::take(&mut self.available) {
            gate.entry_unpooled();
            self.destroy(entry, mode, gate, ledger);
        }
        let leased: Vec<_> = self.leased.drain().map(|(_, entry)| entry).collect();
        for entry in leased {
            self.destroy(entry, mode, gate, ledger);
        }
    }

    /// Fails every waiter with `error` without touching entries
    pub fn fail_waiters(&mut self, error: PoolError) {
        for waiter in self.waiters.drain(..) {
            waiter.fail(error.clone());
        }
    }

    fn take_available(
        &mut self,
        ctx: &RouteContext,
        gate: &mut dyn CapacityGate,
        ledger: &mut Ledger<R, C>,
    ) -> Option<PoolEntry<R, C>> {
        loop {
            let entry = match ctx.reuse_policy {
                ReusePolicy::Lifo => self.available.pop_front(),
                ReusePolicy::Fifo => self.available.pop_back(),
            }?;
            gate.entry_unpooled();
            if entry.is_expired(ctx.now) {
                self.destroy(entry, CloseMode::Graceful, gate, ledger);
                continue;
            }
            let entry = entry.lease_out();
            self.leased.insert(entry.id(), entry.clone());
            return Some(entry);
        }
    }

    fn try_create(&mut self, ctx: &RouteContext, gate: &mut dyn CapacityGate) -> Option<PoolEntry<R, C>> {
        let max = self.max_per_route(ctx.default_max_per_route);
        if !gate.try_admit(self.allocated(), max) {
            return None;
        }
        let entry = PoolEntry::new(self.route.clone(), ctx.now, ctx.time_to_live);
        tracing::debug!(entry = entry.id(), allocated = self.allocated() + 1, max, "pool entry created");
        self.leased.insert(entry.id(), entry.clone());
        Some(entry)
    }

    /// Gives `entry` to the longest-waiting pending waiter, or back to the caller
    fn hand_off(
        &mut self,
        mut entry: PoolEntry<R, C>,
        now: Instant,
        ledger: &mut Ledger<R, C>,
    ) -> Option<PoolEntry<R, C>> {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.deadline_passed(now) {
                if waiter.fail(waiter.timeout_error()) {
                    ledger.timed_out += 1;
                }
                continue;
            }
            // the releasing caller's handle must not reach the next holder
            entry = entry.lease_out();
            let held = entry.clone();
            match waiter.fulfil(entry) {
                Ok(()) => {
                    tracing::debug!(entry = held.id(), waiter = waiter.id(), "pool entry handed to waiter");
                    self.leased.insert(held.id(), held);
                    ledger.handed_off += 1;
                    return None;
                }
                Err(back) => entry = back,
            }
        }
        Some(entry)
    }

    fn push_available(&mut self, entry: PoolEntry<R, C>, now: Instant, gate: &mut dyn CapacityGate) {
        self.leased.remove(&entry.id());
        entry.mark_available(now);
        gate.entry_pooled();
        self.available.push_front(entry);
    }

    fn destroy(
        &mut self,
        entry: PoolEntry<R, C>,
        mode: CloseMode,
        gate: &mut dyn CapacityGate,
        ledger: &mut Ledger<R, C>,
    ) {
        entry.mark_disposed();
        gate.entry_destroyed();
        ledger.discards.push((entry, mode));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::Totals;
    use crate::strict::StrictGate;

    fn ctx(reuse_policy: ReusePolicy, now: Instant) -> RouteContext {
        RouteContext {
            default_max_per_route: 2,
            reuse_policy,
            time_to_live: None,
            now,
        }
    }

    fn lease_entry(
        state: &mut RouteState<&'static str, u32>,
        totals: &mut Totals,
        ctx: &RouteContext,
        ledger: &mut Ledger<&'static str, u32>,
    ) -> PoolEntry<&'static str, u32> {
        match state.lease(None, ctx, &mut StrictGate::new(totals), ledger) {
            Admitted::Entry(entry) => entry,
            Admitted::Queued(_) => panic!("expected an entry"),
        }
    }

    #[test]
    fn test_reuse_order_follows_policy() {
        for (policy, expect_second) in [(ReusePolicy::Lifo, true), (ReusePolicy::Fifo, false)] {
            let now = Instant::now();
            let mut totals = Totals::new(10);
            let mut ledger = Ledger::new();
            let mut state = RouteState::new("a");

            let first = lease_entry(&mut state, &mut totals, &ctx(policy, now), &mut ledger);
            let second = lease_entry(&mut state, &mut totals, &ctx(policy, now), &mut ledger);
            for entry in [&first, &second] {
                state
                    .release(entry, true, &ctx(policy, now), &mut StrictGate::new(&mut totals), &mut ledger)
                    .unwrap();
            }

            let next = lease_entry(&mut state, &mut totals, &ctx(policy, now), &mut ledger);
            assert_eq!(next.same_entry(&second), expect_second, "{policy:?}");
            assert_eq!(ledger.created, 2);
            assert_eq!(ledger.reused, 1);
        }
    }

    #[test]
    fn test_waiter_queue_blocks_new_leases() {
        let now = Instant::now();
        let ctx = ctx(ReusePolicy::Lifo, now);
        let mut totals = Totals::new(1);
        let mut ledger = Ledger::new();
        let mut state = RouteState::new("a");

        let held = lease_entry(&mut state, &mut totals, &ctx, &mut ledger);
        let Admitted::Queued(waiter) = state.lease(None, &ctx, &mut StrictGate::new(&mut totals), &mut ledger)
        else {
            panic!("expected to wait");
        };
        assert_eq!(state.pending_count(), 1);

        state
            .release(&held, true, &ctx, &mut StrictGate::new(&mut totals), &mut ledger)
            .unwrap();
        let handed = waiter.take().unwrap().unwrap();
        assert!(handed.same_entry(&held));
        assert!(!handed.same_lease(&held));
        assert_eq!(state.leased_count(), 1);
        assert_eq!(state.available_count(), 0);
        assert_eq!(ledger.handed_off, 1);

        let stale = state.release(&held, false, &ctx, &mut StrictGate::new(&mut totals), &mut ledger);
        assert_eq!(stale, Err(PoolError::InvalidEntry));
        assert_eq!(state.leased_count(), 1);
    }

    #[test]
    fn test_non_reusable_release_serves_waiter_with_new_entry() {
        let now = Instant::now();
        let ctx = ctx(ReusePolicy::Lifo, now);
        let mut totals = Totals::new(1);
        let mut ledger = Ledger::new();
        let mut state = RouteState::new("a");

        let held = lease_entry(&mut state, &mut totals, &ctx, &mut ledger);
        let Admitted::Queued(waiter) = state.lease(None, &ctx, &mut StrictGate::new(&mut totals), &mut ledger)
        else {
            panic!("expected to wait");
        };

        state
            .release(&held, false, &ctx, &mut StrictGate::new(&mut totals), &mut ledger)
            .unwrap();
        let fresh = waiter.take().unwrap().unwrap();
        assert!(!fresh.same_entry(&held));
        assert_eq!(held.state(), crate::entry::EntryState::Disposed);
        assert_eq!(ledger.discards.len(), 1);
        assert_eq!(totals.allocated, 1);
    }

    #[test]
    fn test_second_release_is_rejected() {
        let now = Instant::now();
        let ctx = ctx(ReusePolicy::Lifo, now);
        let mut totals = Totals::new(4);
        let mut ledger = Ledger::new();
        let mut state = RouteState::new("a");

        let entry = lease_entry(&mut state, &mut totals, &ctx, &mut ledger);
        state
            .release(&entry, false, &ctx, &mut StrictGate::new(&mut totals), &mut ledger)
            .unwrap();
        let again = state.release(&entry, false, &ctx, &mut StrictGate::new(&mut totals), &mut ledger);

        assert_eq!(again, Err(PoolError::InvalidEntry));
        assert_eq!(totals.allocated, 0);
        assert_eq!(ledger.discards.len(), 1);
    }

    #[test]
    fn test_expired_entries_skipped_on_lease() {
        let now = Instant::now();
        let mut totals = Totals::new(4);
        let mut ledger = Ledger::new();
        let mut state = RouteState::new("a");

        let entry = lease_entry(&mut state, &mut totals, &ctx(ReusePolicy::Lifo, now), &mut ledger);
        entry.update_expiry(Duration::from_millis(10), now).unwrap();
        state
            .release(&entry, true, &ctx(ReusePolicy::Lifo, now), &mut StrictGate::new(&mut totals), &mut ledger)
            .unwrap();

        let later = ctx(ReusePolicy::Lifo, now + Duration::from_millis(20));
        let next = lease_entry(&mut state, &mut totals, &later, &mut ledger);
        assert!(!next.same_entry(&entry));
        assert_eq!(ledger.discards.len(), 1);
        assert_eq!(state.allocated(), 1);
    }

    #[test]
    fn test_idle_eviction_only_touches_available() {
        let now = Instant::now();
        let ctx = ctx(ReusePolicy::Lifo, now);
        let mut totals = Totals::new(4);
        let mut ledger = Ledger::new();
        let mut state = RouteState::new("a");

        let idle = lease_entry(&mut state, &mut totals, &ctx, &mut ledger);
        let _busy = lease_entry(&mut state, &mut totals, &ctx, &mut ledger);
        state
            .release(&idle, true, &ctx, &mut StrictGate::new(&mut totals), &mut ledger)
            .unwrap();

        let evicted = state.evict(
            Eviction::Idle(Duration::from_millis(5)),
            now + Duration::from_millis(10),
            &mut StrictGate::new(&mut totals),
            &mut ledger,
        );
        assert_eq!(evicted, 1);
        assert_eq!(state.leased_count(), 1);
        assert_eq!(state.available_count(), 0);
        assert_eq!(totals.allocated, 1);
        assert_eq!(totals.available, 0);
    }
}
