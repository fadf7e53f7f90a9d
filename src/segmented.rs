//! Route-segmented admission: one lock per route, atomic global counters
//!
//! Routes never contend with each other. Global capacity is read from shared
//! counters before admitting and bumped afterwards, so two routes racing for
//! the last slot may both win. The overshoot is corrected on release: while
//! the pool is above `max_total`, released entries that no waiter takes are
//! discarded instead of pooled.

use crate::admission::{CapacityGate, Totals};
use crate::route::RouteState;
use crate::Route;

use crossbeam::utils::CachePadded;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Segment<R, C> = Arc<Mutex<RouteState<R, C>>>;

/// Global counters shared by all route segments
pub(crate) struct AtomicTotals {
    max_total: usize,
    allocated: CachePadded<AtomicUsize>,
    available: CachePadded<AtomicUsize>,
}

impl AtomicTotals {
    fn new(max_total: usize) -> Self {
        Self {
            max_total,
            allocated: CachePadded::new(AtomicUsize::new(0)),
            available: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    fn snapshot(&self) -> Totals {
        Totals {
            max_total: self.max_total,
            allocated: self.allocated.load(Ordering::Acquire),
            available: self.available.load(Ordering::Acquire),
        }
    }
}

pub(crate) struct SegmentedRoutes<R, C> {
    segments: DashMap<R, Segment<R, C>>,
    totals: AtomicTotals,
}

impl<R: Route, C> SegmentedRoutes<R, C> {
    pub fn new(max_total: usize) -> Self {
        Self {
            segments: DashMap::new(),
            totals: AtomicTotals::new(max_total),
        }
    }

    fn segment(&self, route: &R) -> Segment<R, C> {
        let existing = self.segments.get(route).map(|segment| Arc::clone(segment.value()));
        match existing {
            Some(segment) => segment,
            None => Arc::clone(
                self.segments
                    .entry(route.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(RouteState::new(route.clone()))))
                    .value(),
            ),
        }
    }

    pub fn with_route<T, F>(&self, route: &R, f: F) -> T
    where
        F: FnOnce(&mut RouteState<R, C>, &AtomicTotals) -> T,
    {
        loop {
            let segment = self.segment(route);
            let mut state = segment.lock();
            // purged between lookup and lock; fetch the replacement
            if state.is_retired() {
                continue;
            }
            return f(&mut state, &self.totals);
        }
    }

    pub fn for_each_route<F>(&self, mut f: F)
    where
        F: FnMut(&mut RouteState<R, C>, &AtomicTotals),
    {
        let segments: Vec<Segment<R, C>> = self
            .segments
            .iter()
            .map(|segment| Arc::clone(segment.value()))
            .collect();
        for segment in segments {
            let mut state = segment.lock();
            if !state.is_retired() {
                f(&mut state, &self.totals);
            }
        }
    }

    pub fn peek_route<T, F>(&self, route: &R, f: F) -> T
    where
        F: FnOnce(Option<&RouteState<R, C>>) -> T,
    {
        let segment = self.segments.get(route).map(|segment| Arc::clone(segment.value()));
        match segment {
            Some(segment) => {
                let state = segment.lock();
                f((!state.is_retired()).then_some(&*state))
            }
            None => f(None),
        }
    }

    pub fn routes(&self) -> Vec<R> {
        self.segments.iter().map(|segment| segment.key().clone()).collect()
    }

    pub fn totals(&self) -> Totals {
        self.totals.snapshot()
    }

    pub fn purge_empty(&self) -> usize {
        let before = self.segments.len();
        self.segments.retain(|_, segment| match segment.try_lock() {
            Some(mut state) if state.is_empty() => {
                state.retire();
                false
            }
            _ => true,
        });
        before.saturating_sub(self.segments.len())
    }
}

/// Advisory admission against the shared counters
pub(crate) struct SegmentedGate<'a> {
    totals: &'a AtomicTotals,
}

impl<'a> SegmentedGate<'a> {
    pub fn new(totals: &'a AtomicTotals) -> Self {
        Self { totals }
    }
}

impl CapacityGate for SegmentedGate<'_> {
    fn try_admit(&mut self, route_allocated: usize, route_max: usize) -> bool {
        if route_allocated >= route_max {
            return false;
        }
        if self.totals.allocated.load(Ordering::Acquire) >= self.totals.max_total {
            return false;
        }
        self.totals.allocated.fetch_add(1, Ordering::AcqRel);
        true
    }

    fn entry_pooled(&mut self) {
        self.totals.available.fetch_add(1, Ordering::AcqRel);
    }

    fn entry_unpooled(&mut self) {
        self.totals.available.fetch_sub(1, Ordering::AcqRel);
    }

    fn entry_destroyed(&mut self) {
        self.totals.allocated.fetch_sub(1, Ordering::AcqRel);
    }

    fn over_target(&self) -> bool {
        self.totals.allocated.load(Ordering::Acquire) > self.totals.max_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advisory_admission() {
        let totals = AtomicTotals::new(2);
        let mut gate = SegmentedGate::new(&totals);

        assert!(gate.try_admit(0, 2));
        assert!(gate.try_admit(0, 2));
        assert!(!gate.try_admit(0, 2));
        assert!(!gate.over_target());

        // a racing admission slipped through
        totals.allocated.fetch_add(1, Ordering::AcqRel);
        assert!(gate.over_target());
        gate.entry_destroyed();
        assert!(!gate.over_target());
    }

    #[test]
    fn test_retired_segment_is_replaced() {
        let routes: SegmentedRoutes<&str, u32> = SegmentedRoutes::new(4);
        let stale = routes.segment(&"a");
        assert_eq!(routes.purge_empty(), 1);
        assert!(stale.lock().is_retired());

        routes.with_route(&"a", |state, _| {
            assert!(!state.is_retired());
            state.set_max_per_route(3);
        });
        assert_eq!(routes.routes(), vec!["a"]);
        assert_eq!(routes.peek_route(&"a", |state| state.map(|s| s.max_per_route(1))), Some(3));
    }

    #[test]
    fn test_segments_do_not_block_each_other() {
        let routes: Arc<SegmentedRoutes<&str, u32>> = Arc::new(SegmentedRoutes::new(4));
        let held = routes.segment(&"a");
        let _guard = held.lock();

        let other = Arc::clone(&routes);
        let handle = std::thread::spawn(move || other.with_route(&"b", |state, _| state.allocated()));
        assert_eq!(handle.join().unwrap(), 0);
    }
}
