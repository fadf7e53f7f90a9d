//! Health monitoring for connection pools

use crate::stats::PoolStats;

/// Health status of a connection pool
///
/// # Examples
///
/// ```
/// use esox_connpool::{ConnPool, DropConnection, PoolConfiguration};
///
/// let pool: ConnPool<&'static str, u32> =
///     ConnPool::new(PoolConfiguration::default(), DropConnection);
///
/// let health = pool.get_health_status();
/// assert!(health.is_healthy());
/// assert_eq!(health.pending_requests, 0);
/// ```
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Allocated share of the global capacity
    pub utilization: f64,

    /// Leased entries
    pub leased_entries: usize,

    /// Available entries
    pub available_entries: usize,

    /// Lease requests waiting for capacity
    pub pending_requests: usize,

    /// Global capacity
    pub total_capacity: usize,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Derive a health status from the pool totals
    pub fn new(totals: &PoolStats) -> Self {
        let capacity = totals.max;
        let utilization = if capacity > 0 {
            totals.allocated() as f64 / capacity as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        if totals.pending > 0 {
            warnings.push(format!("{} lease requests waiting", totals.pending));
            is_healthy = false;
        }

        if totals.allocated() > capacity {
            warnings.push(format!(
                "Allocated entries ({}) above capacity ({})",
                totals.allocated(),
                capacity
            ));
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            leased_entries: totals.leased,
            available_entries: totals.available,
            pending_requests: totals.pending,
            total_capacity: capacity,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waiters_make_pool_unhealthy() {
        let status = HealthStatus::new(&PoolStats {
            leased: 4,
            pending: 2,
            available: 0,
            max: 4,
        });

        assert!(!status.is_healthy());
        assert_eq!(status.warning_count, 2);
        assert!(status.warnings.iter().any(|w| w.contains("2 lease requests")));
    }

    #[test]
    fn test_overshoot_reported() {
        let status = HealthStatus::new(&PoolStats {
            leased: 3,
            pending: 0,
            available: 0,
            max: 2,
        });
        assert!(status.warnings.iter().any(|w| w.contains("above capacity")));
    }
}
