//! Metrics collection and export for connection pools

use crate::stats::PoolStats;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "serde")]
use serde::Serialize;

/// Metrics snapshot for a pool
///
/// # Examples
///
/// ```
/// use esox_connpool::{ConnPool, DropConnection, PoolConfiguration};
///
/// let pool: ConnPool<&'static str, u32> =
///     ConnPool::new(PoolConfiguration::default(), DropConnection);
///
/// let entry = pool.lease("a", None).unwrap().wait_blocking().unwrap();
/// let metrics = pool.get_metrics();
/// assert_eq!(metrics.entries_created, 1);
/// assert_eq!(metrics.leased, 1);
/// # pool.release(&entry, true).unwrap();
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PoolMetrics {
    /// Entries created on a lease miss
    pub entries_created: usize,

    /// Leases served from an available entry
    pub entries_reused: usize,

    /// Released or new entries handed straight to a waiter
    pub handed_off: usize,

    /// Connections passed to the disposal callback or dropped unassigned
    pub entries_disposed: usize,

    /// Disposal callbacks that returned an error
    pub disposal_failures: usize,

    /// Lease requests that had to wait
    pub lease_waits: usize,

    /// Lease requests that failed with a timeout
    pub lease_timeouts: usize,

    /// Currently leased entries
    pub leased: usize,

    /// Currently available entries
    pub available: usize,

    /// Currently pending lease requests
    pub pending: usize,

    /// Global capacity
    pub max_total: usize,

    /// Allocated share of the global capacity (may exceed 1.0 under soft policies)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("entries_created".to_string(), self.entries_created.to_string());
        metrics.insert("entries_reused".to_string(), self.entries_reused.to_string());
        metrics.insert("handed_off".to_string(), self.handed_off.to_string());
        metrics.insert("entries_disposed".to_string(), self.entries_disposed.to_string());
        metrics.insert("disposal_failures".to_string(), self.disposal_failures.to_string());
        metrics.insert("lease_waits".to_string(), self.lease_waits.to_string());
        metrics.insert("lease_timeouts".to_string(), self.lease_timeouts.to_string());
        metrics.insert("leased".to_string(), self.leased.to_string());
        metrics.insert("available".to_string(), self.available.to_string());
        metrics.insert("pending".to_string(), self.pending.to_string());
        metrics.insert("max_total".to_string(), self.max_total.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_connpool::{ConnPool, DropConnection, PoolConfiguration};
    /// use std::collections::HashMap;
    ///
    /// let pool: ConnPool<&'static str, u32> =
    ///     ConnPool::new(PoolConfiguration::default(), DropConnection);
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = pool.export_metrics_prometheus("upstream", Some(&tags)).unwrap();
    /// assert!(output.contains("connpool_entries_leased"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> prometheus::Result<String> {
        use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let mut labels = HashMap::new();
        labels.insert("pool".to_string(), pool_name.to_string());
        if let Some(tags) = tags {
            labels.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let registry = Registry::new_custom(Some("connpool".to_string()), Some(labels))?;

        let gauges = [
            ("entries_leased", "Currently leased entries", metrics.leased),
            ("entries_available", "Currently available entries", metrics.available),
            ("requests_pending", "Lease requests waiting for capacity", metrics.pending),
            ("max_total", "Global capacity", metrics.max_total),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::with_opts(Opts::new(name, help))?;
            gauge.set(value as i64);
            registry.register(Box::new(gauge))?;
        }

        let counters = [
            ("entries_created_total", "Entries created", metrics.entries_created),
            ("entries_reused_total", "Leases served from the pool", metrics.entries_reused),
            ("entries_handed_off_total", "Entries handed to waiters", metrics.handed_off),
            ("entries_disposed_total", "Entries discarded", metrics.entries_disposed),
            ("disposal_failures_total", "Failed disposals", metrics.disposal_failures),
            ("lease_waits_total", "Lease requests that waited", metrics.lease_waits),
            ("lease_timeouts_total", "Lease requests that timed out", metrics.lease_timeouts),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::with_opts(Opts::new(name, help))?;
            counter.inc_by(value as u64);
            registry.register(Box::new(counter))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Internal metrics tracker
pub(crate) struct MetricsTracker {
    pub entries_created: AtomicUsize,
    pub entries_reused: AtomicUsize,
    pub handed_off: AtomicUsize,
    pub entries_disposed: AtomicUsize,
    pub disposal_failures: AtomicUsize,
    pub lease_waits: AtomicUsize,
    pub lease_timeouts: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            entries_created: AtomicUsize::new(0),
            entries_reused: AtomicUsize::new(0),
            handed_off: AtomicUsize::new(0),
            entries_disposed: AtomicUsize::new(0),
            disposal_failures: AtomicUsize::new(0),
            lease_waits: AtomicUsize::new(0),
            lease_timeouts: AtomicUsize::new(0),
        }
    }

    pub fn get_metrics(&self, totals: &PoolStats) -> PoolMetrics {
        let allocated = totals.leased + totals.available;
        let utilization = if totals.max > 0 {
            allocated as f64 / totals.max as f64
        } else {
            0.0
        };

        PoolMetrics {
            entries_created: self.entries_created.load(Ordering::Relaxed),
            entries_reused: self.entries_reused.load(Ordering::Relaxed),
            handed_off: self.handed_off.load(Ordering::Relaxed),
            entries_disposed: self.entries_disposed.load(Ordering::Relaxed),
            disposal_failures: self.disposal_failures.load(Ordering::Relaxed),
            lease_waits: self.lease_waits.load(Ordering::Relaxed),
            lease_timeouts: self.lease_timeouts.load(Ordering::Relaxed),
            leased: totals.leased,
            available: totals.available,
            pending: totals.pending,
            max_total: totals.max,
            utilization,
        }
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> PoolStats {
        PoolStats {
            leased: 3,
            pending: 1,
            available: 1,
            max: 8,
        }
    }

    #[test]
    fn test_snapshot_and_export() {
        let tracker = MetricsTracker::new();
        tracker.entries_created.fetch_add(4, Ordering::Relaxed);
        tracker.lease_waits.fetch_add(1, Ordering::Relaxed);

        let metrics = tracker.get_metrics(&stats());
        assert_eq!(metrics.entries_created, 4);
        assert_eq!(metrics.pending, 1);
        assert!((metrics.utilization - 0.5).abs() < f64::EPSILON);

        let exported = metrics.export();
        assert_eq!(exported["entries_created"], "4");
        assert_eq!(exported["utilization"], "0.50");
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_prometheus_text() {
        let metrics = MetricsTracker::new().get_metrics(&stats());
        let output = MetricsExporter::export_prometheus(&metrics, "edge", None).unwrap();

        assert!(output.contains("# TYPE connpool_entries_leased gauge"));
        assert!(output.contains("connpool_entries_leased{pool=\"edge\"} 3"));
        assert!(output.contains("connpool_lease_waits_total{pool=\"edge\"} 0"));
    }
}
