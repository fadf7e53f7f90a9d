//! Strict admission: one critical section, exact limits
//!
//! Route states and the global counters live behind a single mutex, so an
//! admission decision and the bookkeeping it causes are one atomic step.
//! `max_total` and every per-route limit hold at all times.

use crate::admission::{CapacityGate, Totals};
use crate::route::RouteState;
use crate::Route;

use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;

pub(crate) struct SharedState<R, C> {
    pub routes: HashMap<R, RouteState<R, C>>,
    pub totals: Totals,
}

impl<R: Route, C> SharedState<R, C> {
    /// The route's state, created on first use, next to the global counters
    pub fn route_mut(&mut self, route: &R) -> (&mut RouteState<R, C>, &mut Totals) {
        let state = self
            .routes
            .entry(route.clone())
            .or_insert_with(|| RouteState::new(route.clone()));
        (state, &mut self.totals)
    }

    pub fn for_each<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut RouteState<R, C>, &mut Totals),
    {
        for state in self.routes.values_mut() {
            f(state, &mut self.totals);
        }
    }
}

/// Route states behind one lock, shared by the strict and lax policies
pub(crate) struct GlobalLock<R, C> {
    state: Mutex<SharedState<R, C>>,
}

impl<R: Route, C> GlobalLock<R, C> {
    pub fn new(max_total: usize) -> Self {
        Self {
            state: Mutex::new(SharedState {
                routes: HashMap::new(),
                totals: Totals::new(max_total),
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SharedState<R, C>> {
        self.state.lock()
    }

    pub fn peek_route<T, F>(&self, route: &R, f: F) -> T
    where
        F: FnOnce(Option<&RouteState<R, C>>) -> T,
    {
        f(self.state.lock().routes.get(route))
    }

    pub fn routes(&self) -> Vec<R> {
        self.state.lock().routes.keys().cloned().collect()
    }

    pub fn totals(&self) -> Totals {
        self.state.lock().totals
    }

    pub fn purge_empty(&self) -> usize {
        let mut state = self.state.lock();
        let before = state.routes.len();
        state.routes.retain(|_, route| !route.is_empty());
        before - state.routes.len()
    }
}

/// Exact admission against `max_total`
pub(crate) struct StrictGate<'a> {
    totals: &'a mut Totals,
}

impl<'a> StrictGate<'a> {
    pub fn new(totals: &'a mut Totals) -> Self {
        Self { totals }
    }
}

impl CapacityGate for StrictGate<'_> {
    fn try_admit(&mut self, route_allocated: usize, route_max: usize) -> bool {
        if route_allocated >= route_max || self.totals.allocated >= self.totals.max_total {
            return false;
        }
        self.totals.allocated += 1;
        true
    }

    fn entry_pooled(&mut self) {
        self.totals.available += 1;
    }

    fn entry_unpooled(&mut self) {
        self.totals.available -= 1;
    }

    fn entry_destroyed(&mut self) {
        self.totals.allocated -= 1;
    }

    fn over_target(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_admission() {
        let mut totals = Totals::new(2);
        let mut gate = StrictGate::new(&mut totals);

        assert!(gate.try_admit(0, 5));
        assert!(gate.try_admit(1, 5));
        assert!(!gate.try_admit(0, 5), "global limit is a hard ceiling");
        gate.entry_destroyed();
        assert!(!gate.try_admit(3, 3), "route limit is a hard ceiling");
        assert!(gate.try_admit(0, 1));
        assert!(!gate.over_target());
        assert_eq!(totals.allocated, 2);
    }

    #[test]
    fn test_routes_created_on_demand_and_purged() {
        let shared: GlobalLock<&str, u32> = GlobalLock::new(4);
        {
            let mut guard = shared.lock();
            let (state, _) = guard.route_mut(&"a");
            assert_eq!(state.route(), &"a");
        }
        assert_eq!(shared.routes(), vec!["a"]);
        assert!(shared.peek_route(&"b", |state| state.is_none()));

        assert_eq!(shared.purge_empty(), 1);
        assert!(shared.routes().is_empty());
    }
}
