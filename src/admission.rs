//! Admission strategies
//!
//! Every policy runs the same per-route algorithm in [`RouteState`]; what
//! differs is which lock guards a route and how global capacity is counted.
//! The policy exposes that through a [`CapacityGate`] handed to the route
//! while its lock is held.

use crate::config::ConcurrencyPolicy;
use crate::errors::{PoolError, PoolResult};
use crate::lax::{self, LaxGate};
use crate::route::{Ledger, RouteState};
use crate::segmented::{SegmentedGate, SegmentedRoutes};
use crate::strict::{GlobalLock, StrictGate};
use crate::Route;

/// Global capacity accounting as seen from inside a route's critical section
pub(crate) trait CapacityGate {
    /// Reserves a slot for a new entry; false means the caller must wait
    fn try_admit(&mut self, route_allocated: usize, route_max: usize) -> bool;

    /// An entry joined an available queue
    fn entry_pooled(&mut self);

    /// An entry left an available queue
    fn entry_unpooled(&mut self);

    /// An entry was discarded and its slot freed
    fn entry_destroyed(&mut self);

    /// Whether released entries should be discarded instead of pooled
    fn over_target(&self) -> bool;
}

/// Capacity counters guarded by the global lock
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Totals {
    pub max_total: usize,
    pub allocated: usize,
    pub available: usize,
}

impl Totals {
    pub fn new(max_total: usize) -> Self {
        Self {
            max_total,
            ..Self::default()
        }
    }

    pub fn leased(&self) -> usize {
        self.allocated.saturating_sub(self.available)
    }
}

pub(crate) enum Admission<R, C> {
    Strict(GlobalLock<R, C>),
    Lax(GlobalLock<R, C>),
    RouteSegmented(SegmentedRoutes<R, C>),
}

impl<R: Route, C> Admission<R, C> {
    pub fn new(policy: ConcurrencyPolicy, max_total: usize) -> Self {
        match policy {
            ConcurrencyPolicy::Strict => Admission::Strict(GlobalLock::new(max_total)),
            ConcurrencyPolicy::Lax => Admission::Lax(GlobalLock::new(max_total)),
            ConcurrencyPolicy::RouteSegmented => {
                Admission::RouteSegmented(SegmentedRoutes::new(max_total))
            }
        }
    }

    pub fn policy(&self) -> ConcurrencyPolicy {
        match self {
            Admission::Strict(_) => ConcurrencyPolicy::Strict,
            Admission::Lax(_) => ConcurrencyPolicy::Lax,
            Admission::RouteSegmented(_) => ConcurrencyPolicy::RouteSegmented,
        }
    }

    /// Runs `f` on the route's state under the policy's lock
    pub fn with_route<T, F>(&self, route: &R, ledger: &mut Ledger<R, C>, f: F) -> T
    where
        F: FnOnce(&mut RouteState<R, C>, &mut dyn CapacityGate, &mut Ledger<R, C>) -> T,
    {
        match self {
            Admission::Strict(shared) => {
                let mut guard = shared.lock();
                let (state, totals) = guard.route_mut(route);
                f(state, &mut StrictGate::new(totals), ledger)
            }
            Admission::Lax(shared) => {
                let mut guard = shared.lock();
                let out = {
                    let (state, totals) = guard.route_mut(route);
                    f(state, &mut LaxGate::new(totals), ledger)
                };
                lax::trim_excess(&mut guard, ledger);
                out
            }
            Admission::RouteSegmented(segments) => segments.with_route(route, |state, totals| {
                f(state, &mut SegmentedGate::new(totals), ledger)
            }),
        }
    }

    /// Runs `f` on the route, then `rest` on every route when `f` reports freed capacity
    ///
    /// Under the global-lock policies both steps share one critical section,
    /// so no new lease can take the freed slot ahead of a parked waiter.
    pub fn with_route_then_all<T, F, G>(&self, route: &R, ledger: &mut Ledger<R, C>, f: F, mut rest: G) -> T
    where
        F: FnOnce(&mut RouteState<R, C>, &mut dyn CapacityGate, &mut Ledger<R, C>) -> (T, bool),
        G: FnMut(&mut RouteState<R, C>, &mut dyn CapacityGate, &mut Ledger<R, C>),
    {
        match self {
            Admission::Strict(shared) => {
                let mut guard = shared.lock();
                let (out, freed) = {
                    let (state, totals) = guard.route_mut(route);
                    f(state, &mut StrictGate::new(totals), ledger)
                };
                if freed {
                    guard.for_each(|state, totals| rest(state, &mut StrictGate::new(totals), ledger));
                }
                out
            }
            Admission::Lax(shared) => {
                let mut guard = shared.lock();
                let (out, freed) = {
                    let (state, totals) = guard.route_mut(route);
                    f(state, &mut LaxGate::new(totals), ledger)
                };
                if freed {
                    guard.for_each(|state, totals| rest(state, &mut LaxGate::new(totals), ledger));
                }
                lax::trim_excess(&mut guard, ledger);
                out
            }
            Admission::RouteSegmented(segments) => {
                let (out, freed) = segments.with_route(route, |state, totals| {
                    f(state, &mut SegmentedGate::new(totals), ledger)
                });
                if freed {
                    segments.for_each_route(|state, totals| rest(state, &mut SegmentedGate::new(totals), ledger));
                }
                out
            }
        }
    }

    /// Runs `f` on every route in turn
    pub fn for_each_route<F>(&self, ledger: &mut Ledger<R, C>, mut f: F)
    where
        F: FnMut(&mut RouteState<R, C>, &mut dyn CapacityGate, &mut Ledger<R, C>),
    {
        match self {
            Admission::Strict(shared) => {
                shared.lock().for_each(|state, totals| {
                    f(state, &mut StrictGate::new(totals), ledger)
                });
            }
            Admission::Lax(shared) => {
                let mut guard = shared.lock();
                guard.for_each(|state, totals| f(state, &mut LaxGate::new(totals), ledger));
                lax::trim_excess(&mut guard, ledger);
            }
            Admission::RouteSegmented(segments) => segments.for_each_route(|state, totals| {
                f(state, &mut SegmentedGate::new(totals), ledger)
            }),
        }
    }

    /// Reads a route's state without creating it
    pub fn peek_route<T, F>(&self, route: &R, f: F) -> T
    where
        F: FnOnce(Option<&RouteState<R, C>>) -> T,
    {
        match self {
            Admission::Strict(shared) | Admission::Lax(shared) => shared.peek_route(route, f),
            Admission::RouteSegmented(segments) => segments.peek_route(route, f),
        }
    }

    pub fn routes(&self) -> Vec<R> {
        match self {
            Admission::Strict(shared) | Admission::Lax(shared) => shared.routes(),
            Admission::RouteSegmented(segments) => segments.routes(),
        }
    }

    /// Global counters; a consistent snapshot only under the global-lock policies
    pub fn totals(&self) -> Totals {
        match self {
            Admission::Strict(shared) | Admission::Lax(shared) => shared.totals(),
            Admission::RouteSegmented(segments) => segments.totals(),
        }
    }

    pub fn set_max_total(&self, max: usize, ledger: &mut Ledger<R, C>) -> PoolResult<()> {
        match self {
            Admission::Lax(shared) => {
                let mut guard = shared.lock();
                guard.totals.max_total = max;
                lax::trim_excess(&mut guard, ledger);
                Ok(())
            }
            other => Err(PoolError::Unsupported(other.policy().name())),
        }
    }

    /// Fails every pending waiter without touching entries
    pub fn fail_waiters(&self, error: PoolError) {
        match self {
            Admission::Strict(shared) | Admission::Lax(shared) => {
                shared.lock().for_each(|state, _| state.fail_waiters(error.clone()));
            }
            Admission::RouteSegmented(segments) => {
                segments.for_each_route(|state, _| state.fail_waiters(error.clone()));
            }
        }
    }

    /// Drops route states that hold nothing
    pub fn purge_empty(&self) -> usize {
        match self {
            Admission::Strict(shared) | Admission::Lax(shared) => shared.purge_empty(),
            Admission::RouteSegmented(segments) => segments.purge_empty(),
        }
    }
}
