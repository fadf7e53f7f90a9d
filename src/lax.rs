//! Lax admission: hard per-route limits, soft global target
//!
//! Shares the global lock with the strict policy but never parks a request
//! on global capacity. A new entry only needs per-route headroom; when that
//! pushes the pool past `max_total`, idle entries are trimmed (least recently
//! released first) after each operation until the pool is back under target
//! or nothing idle is left. Leased entries are never trimmed, so the pool
//! converges to the target as leases come back.

use crate::admission::{CapacityGate, Totals};
use crate::route::Ledger;
use crate::strict::SharedState;
use crate::Route;

pub(crate) struct LaxGate<'a> {
    totals: &'a mut Totals,
}

impl<'a> LaxGate<'a> {
    pub fn new(totals: &'a mut Totals) -> Self {
        Self { totals }
    }
}

impl CapacityGate for LaxGate<'_> {
    fn try_admit(&mut self, route_allocated: usize, route_max: usize) -> bool {
        if route_allocated >= route_max {
            return false;
        }
        self.totals.allocated += 1;
        if self.totals.allocated > self.totals.max_total {
            tracing::trace!(
                allocated = self.totals.allocated,
                max_total = self.totals.max_total,
                "lax admission above target"
            );
        }
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
        // released entries are pooled; the trim pass picks the victims
        false
    }
}

/// Discards idle entries while the pool is above its target
pub(crate) fn trim_excess<R: Route, C>(shared: &mut SharedState<R, C>, ledger: &mut Ledger<R, C>) -> usize {
    let mut trimmed = 0;
    while shared.totals.allocated > shared.totals.max_total && shared.totals.available > 0 {
        let victim = shared
            .routes
            .iter()
            .filter_map(|(route, state)| state.oldest_release().map(|at| (at, route)))
            .min_by_key(|(at, _)| *at)
            .map(|(_, route)| route.clone());
        let Some(route) = victim else {
            break;
        };
        let SharedState { routes, totals } = &mut *shared;
        let Some(state) = routes.get_mut(&route) else {
            break;
        };
        if !state.evict_oldest(&mut LaxGate::new(totals), ledger) {
            break;
        }
        trimmed += 1;
    }
    if trimmed > 0 {
        tracing::debug!(trimmed, max_total = shared.totals.max_total, "trimmed idle entries above target");
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReusePolicy;
    use crate::entry::PoolEntry;
    use crate::route::{Admitted, RouteContext};
    use std::time::{Duration, Instant};

    fn ctx(now: Instant) -> RouteContext {
        RouteContext {
            default_max_per_route: 2,
            reuse_policy: ReusePolicy::Lifo,
            time_to_live: None,
            now,
        }
    }

    fn lease(
        shared: &mut SharedState<&'static str, u32>,
        route: &'static str,
        ledger: &mut Ledger<&'static str, u32>,
    ) -> PoolEntry<&'static str, u32> {
        let (state, totals) = shared.route_mut(&route);
        match state.lease(None, &ctx(Instant::now()), &mut LaxGate::new(totals), ledger) {
            Admitted::Entry(entry) => entry,
            Admitted::Queued(_) => panic!("lax admission should not queue"),
        }
    }

    #[test]
    fn test_admits_past_target_with_route_headroom() {
        let mut totals = Totals::new(1);
        let mut gate = LaxGate::new(&mut totals);

        assert!(gate.try_admit(0, 2));
        assert!(gate.try_admit(0, 2));
        assert!(!gate.try_admit(2, 2));
        assert_eq!(totals.allocated, 2);
    }

    #[test]
    fn test_trim_takes_least_recently_released() {
        let mut shared: SharedState<&'static str, u32> = SharedState {
            routes: Default::default(),
            totals: Totals::new(1),
        };
        let mut ledger = Ledger::new();

        let a = lease(&mut shared, "a", &mut ledger);
        let b = lease(&mut shared, "b", &mut ledger);
        assert_eq!(shared.totals.allocated, 2);

        let now = Instant::now();
        for (entry, at) in [(&a, now), (&b, now + Duration::from_millis(1))] {
            let (state, totals) = shared.route_mut(entry.route());
            state
                .release(entry, true, &ctx(at), &mut LaxGate::new(totals), &mut ledger)
                .unwrap();
        }
        assert_eq!(trim_excess(&mut shared, &mut ledger), 1);

        assert_eq!(shared.totals.allocated, 1);
        assert_eq!(ledger.discards.len(), 1);
        assert!(ledger.discards[0].0.same_entry(&a));
    }
}
