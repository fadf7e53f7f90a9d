//! The keyed connection pool

use crate::admission::Admission;
use crate::config::{ConcurrencyPolicy, PoolConfiguration, ReusePolicy};
use crate::connect::ConnFactory;
use crate::disposal::{CloseMode, DisposalCallback};
use crate::entry::PoolEntry;
use crate::errors::{PoolError, PoolResult};
use crate::eviction::Eviction;
use crate::health::HealthStatus;
#[cfg(feature = "metrics")]
use crate::metrics::MetricsExporter;
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::route::{Admitted, Ledger, RouteContext};
use crate::stats::PoolStats;
use crate::waiter::{LeaseHandle, LeaseRegistry, Waiter};
use crate::Route;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Thread-safe pool of connections grouped by route
///
/// Handles are cheap to clone and share one pool. Leasing hands out a
/// [`PoolEntry`] immediately when the route has an idle entry or spare
/// capacity, and otherwise parks the request until an entry is released on
/// the same route. The pool owns no background task; call
/// [`close_idle`](Self::close_idle) and [`close_expired`](Self::close_expired)
/// from your own scheduler.
///
/// # Examples
///
/// ```
/// use esox_connpool::{ConnPool, DropConnection, PoolConfiguration};
///
/// let pool: ConnPool<&'static str, String> = ConnPool::new(
///     PoolConfiguration::default().with_default_max_per_route(1),
///     DropConnection,
/// );
///
/// let entry = pool.lease("example.com:443", None).unwrap().wait_blocking().unwrap();
/// pool.assign_connection(&entry, "tcp-1".to_string()).unwrap();
/// pool.release(&entry, true).unwrap();
///
/// let again = pool.lease("example.com:443", None).unwrap().wait_blocking().unwrap();
/// assert!(again.same_entry(&entry));
/// # pool.release(&again, true).unwrap();
/// ```
pub struct ConnPool<R: Route, C: Send + 'static> {
    inner: Arc<PoolInner<R, C>>,
}

impl<R: Route, C: Send + 'static> Clone for ConnPool<R, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PoolInner<R: Route, C: Send + 'static> {
    admission: Admission<R, C>,
    reuse_policy: ReusePolicy,
    time_to_live: Option<Duration>,
    lease_timeout: Option<Duration>,
    default_max_per_route: AtomicUsize,
    disposal: Box<dyn DisposalCallback<C>>,
    metrics: MetricsTracker,
    shutdown: AtomicBool,
}

impl<R: Route, C: Send + 'static> ConnPool<R, C> {
    /// Create a pool that hands every discarded connection to `disposal`
    pub fn new<D>(config: PoolConfiguration, disposal: D) -> Self
    where
        D: DisposalCallback<C> + 'static,
    {
        tracing::debug!(
            policy = %config.concurrency_policy,
            max_total = config.max_total,
            default_max_per_route = config.default_max_per_route,
            "connection pool created"
        );
        Self {
            inner: Arc::new(PoolInner {
                admission: Admission::new(config.concurrency_policy, config.max_total),
                reuse_policy: config.reuse_policy,
                time_to_live: config.time_to_live,
                lease_timeout: config.lease_timeout,
                default_max_per_route: AtomicUsize::new(config.default_max_per_route),
                disposal: Box::new(disposal),
                metrics: MetricsTracker::new(),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Request an entry for `route`
    ///
    /// The handle resolves at once when an idle entry or free capacity exists,
    /// otherwise once an entry on the same route is released. `timeout` bounds
    /// the wait; `None` falls back to the configured lease timeout. Capacity
    /// exhaustion never fails this call, only the handle's wait.
    ///
    /// A fresh entry carries no connection: dial it and call
    /// [`assign_connection`](Self::assign_connection), or use
    /// [`lease_connected`](Self::lease_connected).
    pub fn lease(&self, route: R, timeout: Option<Duration>) -> PoolResult<LeaseHandle<R, C>> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let timeout = timeout.or(inner.lease_timeout);
        let ctx = inner.context(Instant::now());

        let mut ledger = Ledger::new();
        let admitted = inner.admission.with_route(&route, &mut ledger, |state, gate, ledger| -> PoolResult<Admitted<R, C>> {
            // shutdown may have drained this route while we waited for its lock
            inner.ensure_open()?;
            Ok(state.lease(timeout, &ctx, gate, ledger))
        });
        inner.settle(ledger);

        match admitted? {
            Admitted::Entry(entry) => {
                tracing::trace!(entry = entry.id(), route = ?route, "lease served immediately");
                Ok(LeaseHandle::ready(PoolInner::registry(inner), Ok(entry)))
            }
            Admitted::Queued(waiter) => {
                inner.metrics.lease_waits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(waiter = waiter.id(), route = ?route, ?timeout, "lease request queued");
                Ok(LeaseHandle::waiting(PoolInner::registry(inner), waiter))
            }
        }
    }

    /// Lease an entry and make sure it holds a connection
    ///
    /// Entries without a connection are dialed through `factory`. When dialing
    /// fails the entry is discarded and [`PoolError::Connect`] is returned.
    /// Dropping the returned future while it dials discards the entry, so its
    /// capacity goes back to the route.
    ///
    /// # Examples
    ///
    /// ```
    /// use async_trait::async_trait;
    /// use esox_connpool::{BoxError, ConnFactory, ConnPool, DropConnection, PoolConfiguration};
    ///
    /// struct Dialer;
    ///
    /// #[async_trait]
    /// impl ConnFactory<String, String> for Dialer {
    ///     async fn connect(&self, route: &String) -> Result<String, BoxError> {
    ///         Ok(format!("stream to {route}"))
    ///     }
    /// }
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let pool: ConnPool<String, String> = ConnPool::new(PoolConfiguration::default(), DropConnection);
    /// let entry = pool.lease_connected("db:5432".to_string(), None, &Dialer).await.unwrap();
    /// assert_eq!(entry.with_connection(|c| c.clone()).unwrap(), "stream to db:5432");
    /// pool.release(&entry, true).unwrap();
    /// # }
    /// ```
    pub async fn lease_connected<F>(
        &self,
        route: R,
        timeout: Option<Duration>,
        factory: &F,
    ) -> PoolResult<PoolEntry<R, C>>
    where
        F: ConnFactory<R, C> + ?Sized,
    {
        let entry = self.lease(route, timeout)?.wait().await?;
        if entry.has_connection() {
            return Ok(entry);
        }

        // discards the entry if this future is dropped mid-dial
        let mut guard = DialGuard {
            pool: self,
            entry: Some(entry.clone()),
        };
        let outcome = match factory.connect(entry.route()).await {
            Ok(connection) => self.assign_connection(&entry, connection),
            Err(err) => {
                tracing::warn!(entry = entry.id(), route = ?entry.route(), error = %err, "connection attempt failed");
                Err(PoolError::Connect(err.to_string()))
            }
        };
        if outcome.is_ok() {
            guard.entry = None;
        }
        drop(guard);
        outcome.map(|()| entry)
    }

    /// Return a leased entry
    ///
    /// A reusable entry goes to the longest-waiting request on its route, or
    /// back to the route's idle queue. A non-reusable or stale one is
    /// discarded and its capacity offered to waiters. Releasing an entry the
    /// pool no longer tracks as leased fails with [`PoolError::InvalidEntry`].
    pub fn release(&self, entry: &PoolEntry<R, C>, reusable: bool) -> PoolResult<()> {
        self.inner.release(entry, reusable)
    }

    /// Attach the dialed connection to a freshly leased entry
    ///
    /// Succeeds once per entry; a second call fails with
    /// [`PoolError::AlreadyAssigned`].
    pub fn assign_connection(&self, entry: &PoolEntry<R, C>, connection: C) -> PoolResult<()> {
        self.inner.ensure_open()?;
        entry.assign_connection(connection)?;
        tracing::trace!(entry = entry.id(), route = ?entry.route(), "connection assigned");
        Ok(())
    }

    /// Declare how long a leased entry stays reusable from now on
    ///
    /// The deadline never extends past the configured time to live.
    pub fn update_expiry(&self, entry: &PoolEntry<R, C>, ttl: Duration) -> PoolResult<()> {
        self.inner.ensure_open()?;
        entry.update_expiry(ttl, Instant::now())
    }

    /// Discard idle entries released longer than `idle` ago
    ///
    /// Also fails waiters whose deadline passed and forgets routes with
    /// nothing left in them. Returns the number of entries discarded, which
    /// is always 0 once the pool is shut down.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use esox_connpool::{ConnPool, DropConnection, PoolConfiguration};
    /// use std::time::Duration;
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let pool: ConnPool<String, u32> = ConnPool::new(PoolConfiguration::default(), DropConnection);
    ///
    /// let sweeper = pool.clone();
    /// tokio::spawn(async move {
    ///     let mut tick = tokio::time::interval(Duration::from_secs(5));
    ///     loop {
    ///         tick.tick().await;
    ///         sweeper.close_expired();
    ///         sweeper.close_idle(Duration::from_secs(30));
    ///     }
    /// });
    /// # }
    /// ```
    pub fn close_idle(&self, idle: Duration) -> usize {
        self.inner.sweep(Eviction::Idle(idle))
    }

    /// Discard idle entries whose expiry deadline has passed
    ///
    /// Returns 0 once the pool is shut down.
    pub fn close_expired(&self) -> usize {
        self.inner.sweep(Eviction::Expired)
    }

    /// Close the pool
    ///
    /// Pending requests fail with [`PoolError::Cancelled`], every idle and
    /// leased connection goes to the disposal callback, and later calls fail
    /// with [`PoolError::PoolShutdown`]. Calling it again does nothing.
    pub fn shutdown(&self, mode: CloseMode) {
        let inner = &self.inner;
        if inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut ledger = Ledger::new();
        let mut outstanding = 0;
        let mut cancelled = 0;
        inner.admission.for_each_route(&mut ledger, |state, gate, ledger| {
            outstanding += state.leased_count();
            cancelled += state.pending_count();
            state.drain(mode, gate, ledger);
        });
        let discarded = ledger.discards.len();
        inner.settle(ledger);

        if outstanding > 0 {
            tracing::warn!(outstanding, ?mode, "pool shut down with leased entries outstanding");
        }
        tracing::debug!(discarded, cancelled, ?mode, "connection pool shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shut_down()
    }

    /// Change the global target
    ///
    /// Only the lax policy supports this; idle entries above the new target
    /// are discarded right away.
    pub fn set_max_total(&self, max: usize) -> PoolResult<()> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let mut ledger = Ledger::new();
        let outcome = inner.admission.set_max_total(max, &mut ledger);
        inner.settle(ledger);
        outcome?;
        tracing::debug!(max_total = max, "global target changed");
        Ok(())
    }

    /// Override the capacity of one route
    pub fn set_max_per_route(&self, route: R, max: usize) -> PoolResult<()> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let ctx = inner.context(Instant::now());
        let mut ledger = Ledger::new();
        inner.admission.with_route(&route, &mut ledger, |state, gate, ledger| {
            state.set_max_per_route(max);
            state.serve_waiters(&ctx, gate, ledger);
        });
        inner.settle(ledger);
        tracing::debug!(route = ?route, max, "route limit changed");
        Ok(())
    }

    /// Change the capacity of routes without an override
    pub fn set_default_max_per_route(&self, max: usize) -> PoolResult<()> {
        let inner = &self.inner;
        inner.ensure_open()?;
        inner.default_max_per_route.store(max, Ordering::Release);
        let ctx = inner.context(Instant::now());
        let mut ledger = Ledger::new();
        inner.admission.for_each_route(&mut ledger, |state, gate, ledger| {
            state.serve_waiters(&ctx, gate, ledger);
        });
        inner.settle(ledger);
        tracing::debug!(max, "default route limit changed");
        Ok(())
    }

    pub fn max_total(&self) -> usize {
        self.inner.admission.totals().max_total
    }

    pub fn default_max_per_route(&self) -> usize {
        self.inner.default_max_per_route()
    }

    pub fn max_per_route(&self, route: &R) -> usize {
        let default = self.inner.default_max_per_route();
        self.inner
            .admission
            .peek_route(route, |state| state.map_or(default, |s| s.max_per_route(default)))
    }

    pub fn policy(&self) -> ConcurrencyPolicy {
        self.inner.admission.policy()
    }

    /// Occupancy of one route
    pub fn stats(&self, route: &R) -> PoolStats {
        let default = self.inner.default_max_per_route();
        self.inner.admission.peek_route(route, |state| match state {
            Some(state) => PoolStats {
                leased: state.leased_count(),
                pending: state.pending_count(),
                available: state.available_count(),
                max: state.max_per_route(default),
            },
            None => PoolStats {
                max: default,
                ..PoolStats::default()
            },
        })
    }

    /// Occupancy of the whole pool
    pub fn total_stats(&self) -> PoolStats {
        self.inner.total_stats()
    }

    /// Routes the pool currently keeps state for
    pub fn routes(&self) -> Vec<R> {
        self.inner.admission.routes()
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        self.inner.metrics.get_metrics(&self.inner.total_stats())
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> prometheus::Result<String> {
        MetricsExporter::export_prometheus(&self.get_metrics(), pool_name, tags)
    }

    /// Get health status
    pub fn get_health_status(&self) -> HealthStatus {
        HealthStatus::new(&self.inner.total_stats())
    }
}

struct DialGuard<'a, R: Route, C: Send + 'static> {
    pool: &'a ConnPool<R, C>,
    entry: Option<PoolEntry<R, C>>,
}

impl<R: Route, C: Send + 'static> Drop for DialGuard<'_, R, C> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            if let Err(err) = self.pool.release(&entry, false) {
                tracing::debug!(entry = entry.id(), error = %err, "could not discard undialed entry");
            }
        }
    }
}

impl<R: Route, C: Send + 'static> fmt::Debug for ConnPool<R, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnPool")
            .field("policy", &self.policy())
            .field("stats", &self.total_stats())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl<R: Route, C: Send + 'static> PoolInner<R, C> {
    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> PoolResult<()> {
        if self.is_shut_down() {
            return Err(PoolError::PoolShutdown);
        }
        Ok(())
    }

    fn default_max_per_route(&self) -> usize {
        self.default_max_per_route.load(Ordering::Acquire)
    }

    fn context(&self, now: Instant) -> RouteContext {
        RouteContext {
            default_max_per_route: self.default_max_per_route(),
            reuse_policy: self.reuse_policy,
            time_to_live: self.time_to_live,
            now,
        }
    }

    fn registry(this: &Arc<Self>) -> Weak<dyn LeaseRegistry<R, C>> {
        let registry: Arc<dyn LeaseRegistry<R, C>> = Arc::clone(this) as Arc<dyn LeaseRegistry<R, C>>;
        Arc::downgrade(&registry)
    }

    fn total_stats(&self) -> PoolStats {
        let totals = self.admission.totals();
        let pending: usize = self
            .admission
            .routes()
            .iter()
            .map(|route| self.admission.peek_route(route, |state| state.map_or(0, |s| s.pending_count())))
            .sum();
        PoolStats {
            leased: totals.leased(),
            pending,
            available: totals.available,
            max: totals.max_total,
        }
    }

    fn release(&self, entry: &PoolEntry<R, C>, reusable: bool) -> PoolResult<()> {
        self.ensure_open()?;
        let ctx = self.context(Instant::now());
        let mut ledger = Ledger::new();
        let outcome = self.admission.with_route_then_all(
            entry.route(),
            &mut ledger,
            |state, gate, ledger| {
                let discarded = ledger.discards.len();
                let outcome = state.release(entry, reusable, &ctx, gate, ledger);
                (outcome, ledger.discards.len() > discarded)
            },
            // a discarded entry frees global capacity that waiters on any route may be blocked on
            |state, gate, ledger| state.serve_waiters(&ctx, gate, ledger),
        );
        self.settle(ledger);
        outcome?;
        tracing::trace!(entry = entry.id(), route = ?entry.route(), reusable, "pool entry released");
        Ok(())
    }

    fn sweep(&self, eviction: Eviction) -> usize {
        if self.is_shut_down() {
            tracing::debug!(?eviction, "maintenance sweep skipped on a shut down pool");
            return 0;
        }
        let ctx = self.context(Instant::now());
        let mut ledger = Ledger::new();
        let mut evicted = 0;
        self.admission.for_each_route(&mut ledger, |state, gate, ledger| {
            state.expire_waiters(ctx.now, ledger);
            let count = state.evict(eviction, ctx.now, gate, ledger);
            if count > 0 {
                tracing::trace!(route = ?state.route(), evicted = count, "route swept");
            }
            evicted += count;
        });
        if evicted > 0 {
            // freed global capacity may unblock waiters on any route
            self.admission.for_each_route(&mut ledger, |state, gate, ledger| {
                state.serve_waiters(&ctx, gate, ledger);
            });
        }
        let purged = self.admission.purge_empty();
        self.settle(ledger);
        tracing::debug!(?eviction, evicted, purged, "maintenance sweep finished");
        evicted
    }

    /// Updates counters and disposes discarded connections outside any lock
    fn settle(&self, ledger: Ledger<R, C>) {
        let Ledger {
            discards,
            created,
            reused,
            handed_off,
            timed_out,
        } = ledger;
        let metrics = &self.metrics;
        metrics.entries_created.fetch_add(created, Ordering::Relaxed);
        metrics.entries_reused.fetch_add(reused, Ordering::Relaxed);
        metrics.handed_off.fetch_add(handed_off, Ordering::Relaxed);
        metrics.lease_timeouts.fetch_add(timed_out, Ordering::Relaxed);

        for (entry, mode) in discards {
            metrics.entries_disposed.fetch_add(1, Ordering::Relaxed);
            let Some(connection) = entry.take_connection() else {
                tracing::debug!(entry = entry.id(), route = ?entry.route(), "pool entry discarded without connection");
                continue;
            };
            match self.disposal.dispose(connection, mode) {
                Ok(()) => {
                    tracing::debug!(entry = entry.id(), route = ?entry.route(), ?mode, "pool entry discarded");
                }
                Err(err) => {
                    metrics.disposal_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(entry = entry.id(), route = ?entry.route(), error = %err, "connection disposal failed");
                }
            }
        }
    }

    /// Withdraws a pending waiter from its route queue
    fn withdraw(&self, waiter: &Arc<Waiter<R, C>>) -> bool {
        let mut ledger = Ledger::new();
        let withdrawn = self.admission.with_route(waiter.route(), &mut ledger, |state, _, _| {
            if !waiter.cancel() {
                return false;
            }
            state.remove_waiter(waiter.id());
            true
        });
        self.settle(ledger);
        withdrawn
    }
}

impl<R: Route, C: Send + 'static> LeaseRegistry<R, C> for PoolInner<R, C> {
    fn cancel(&self, waiter: &Arc<Waiter<R, C>>) -> bool {
        let cancelled = self.withdraw(waiter);
        if cancelled {
            tracing::debug!(waiter = waiter.id(), route = ?waiter.route(), "lease request cancelled");
        }
        cancelled
    }

    fn expire(&self, waiter: &Arc<Waiter<R, C>>) -> bool {
        let expired = self.withdraw(waiter);
        if expired {
            self.metrics.lease_timeouts.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(waiter = waiter.id(), route = ?waiter.route(), "lease request timed out");
        }
        expired
    }

    fn abandon(&self, waiter: &Arc<Waiter<R, C>>) {
        if self.withdraw(waiter) {
            tracing::debug!(waiter = waiter.id(), "lease handle dropped while waiting");
            return;
        }
        if let Some(Ok(entry)) = waiter.take() {
            self.reclaim(entry);
        }
    }

    fn reclaim(&self, entry: PoolEntry<R, C>) {
        if let Err(err) = self.release(&entry, true) {
            tracing::debug!(entry = entry.id(), error = %err, "unclaimed entry not returned");
        }
    }
}

impl<R: Route, C: Send + 'static> Drop for PoolInner<R, C> {
    fn drop(&mut self) {
        // handles only hold weak references; tell them the pool is gone
        self.admission.fail_waiters(PoolError::Cancelled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BoxError;

    use std::sync::Mutex;

    fn pool(policy: ConcurrencyPolicy, max_total: usize, per_route: usize) -> ConnPool<&'static str, u32> {
        ConnPool::new(
            PoolConfiguration::default()
                .with_concurrency_policy(policy)
                .with_max_total(max_total)
                .with_default_max_per_route(per_route),
            crate::disposal::DropConnection,
        )
    }

    fn lease_now(pool: &ConnPool<&'static str, u32>, route: &'static str) -> PoolEntry<&'static str, u32> {
        let handle = pool.lease(route, None).unwrap();
        assert!(handle.is_ready());
        handle.wait_blocking().unwrap()
    }

    #[test]
    fn test_waiter_gets_released_entry() {
        let pool = pool(ConcurrencyPolicy::Strict, 2, 2);
        let first = lease_now(&pool, "a");
        let _second = lease_now(&pool, "a");

        let handle = pool.lease("a", Some(Duration::from_secs(1))).unwrap();
        assert!(handle.is_waiting());
        assert_eq!(pool.stats(&"a").pending, 1);

        pool.release(&first, true).unwrap();
        let third = handle.wait_blocking().unwrap();
        assert!(third.same_entry(&first));
        assert_eq!(pool.get_metrics().handed_off, 1);
    }

    #[test]
    fn test_dropped_ready_handle_returns_entry() {
        let pool = pool(ConcurrencyPolicy::Strict, 2, 2);
        drop(pool.lease("a", None).unwrap());

        let stats = pool.stats(&"a");
        assert_eq!(stats.leased, 0);
        assert_eq!(stats.available, 1);
    }

    #[test]
    fn test_dropped_waiting_handle_cancels() {
        let pool = pool(ConcurrencyPolicy::Strict, 1, 1);
        let entry = lease_now(&pool, "a");

        drop(pool.lease("a", None).unwrap());
        assert_eq!(pool.stats(&"a").pending, 0);

        pool.release(&entry, true).unwrap();
        assert_eq!(pool.stats(&"a").available, 1);
    }

    #[test]
    fn test_disposal_errors_are_counted() {
        let closed: Arc<Mutex<Vec<(u32, CloseMode)>>> = Arc::default();
        let sink = Arc::clone(&closed);
        let pool: ConnPool<&'static str, u32> = ConnPool::new(
            PoolConfiguration::default(),
            move |conn: u32, mode: CloseMode| -> Result<(), BoxError> {
                sink.lock().unwrap().push((conn, mode));
                if conn == 2 {
                    return Err("reset by peer".into());
                }
                Ok(())
            },
        );

        let first = lease_now(&pool, "a");
        let second = lease_now(&pool, "a");
        pool.assign_connection(&first, 1).unwrap();
        pool.assign_connection(&second, 2).unwrap();
        pool.release(&first, false).unwrap();
        pool.release(&second, false).unwrap();

        let metrics = pool.get_metrics();
        assert_eq!(metrics.entries_disposed, 2);
        assert_eq!(metrics.disposal_failures, 1);
        assert_eq!(metrics.leased + metrics.available, 0);
        assert_eq!(
            *closed.lock().unwrap(),
            vec![(1, CloseMode::Graceful), (2, CloseMode::Graceful)]
        );
    }

    #[test]
    fn test_operations_fail_after_shutdown() {
        let pool = pool(ConcurrencyPolicy::RouteSegmented, 4, 2);
        let entry = lease_now(&pool, "a");
        pool.shutdown(CloseMode::Immediate);
        pool.shutdown(CloseMode::Immediate);

        assert!(pool.is_shutdown());
        assert_eq!(pool.lease("a", None).unwrap_err(), PoolError::PoolShutdown);
        assert_eq!(pool.release(&entry, true), Err(PoolError::PoolShutdown));
        assert_eq!(pool.assign_connection(&entry, 1), Err(PoolError::PoolShutdown));
        assert_eq!(pool.close_expired(), 0);
        assert_eq!(pool.close_idle(Duration::ZERO), 0);
        assert_eq!(pool.total_stats().allocated(), 0);
    }

    #[test]
    fn test_limits_are_adjustable() {
        let pool = pool(ConcurrencyPolicy::Strict, 10, 1);
        let _held = lease_now(&pool, "a");
        let handle = pool.lease("a", None).unwrap();
        assert!(handle.is_waiting());

        pool.set_max_per_route("a", 2).unwrap();
        assert!(handle.is_ready());
        assert_eq!(pool.max_per_route(&"a"), 2);
        assert_eq!(pool.max_per_route(&"b"), 1);

        pool.set_default_max_per_route(3).unwrap();
        assert_eq!(pool.default_max_per_route(), 3);
        assert_eq!(pool.stats(&"z").max, 3);
        assert_eq!(
            pool.set_max_total(5),
            Err(PoolError::Unsupported("strict"))
        );
        assert_eq!(pool.max_total(), 10);
    }

    #[test]
    fn test_sweep_purges_empty_routes() {
        let pool = pool(ConcurrencyPolicy::Strict, 4, 2);
        let entry = lease_now(&pool, "a");
        pool.release(&entry, false).unwrap();
        assert_eq!(pool.routes(), vec!["a"]);

        assert_eq!(pool.close_idle(Duration::from_secs(60)), 0);
        assert!(pool.routes().is_empty());
    }

    #[tokio::test]
    async fn test_async_wait_times_out() {
        let pool = pool(ConcurrencyPolicy::Lax, 4, 1);
        let _held = pool.lease("a", None).unwrap().wait().await.unwrap();

        let outcome = pool.lease("a", Some(Duration::from_millis(20))).unwrap().wait().await;
        assert_eq!(outcome.unwrap_err(), PoolError::LeaseTimeout(Duration::from_millis(20)));
        assert_eq!(pool.stats(&"a").pending, 0);
        assert_eq!(pool.get_metrics().lease_timeouts, 1);
    }
}
