//! Pool configuration options

use std::fmt;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How admission decisions are locked and how strictly `max_total` is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConcurrencyPolicy {
    /// One critical section; `max_total` and per-route limits are exact
    #[default]
    Strict,

    /// One critical section; per-route limits are exact, `max_total` is a soft target
    Lax,

    /// One lock per route plus atomic global counters
    RouteSegmented,
}

impl ConcurrencyPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            ConcurrencyPolicy::Strict => "strict",
            ConcurrencyPolicy::Lax => "lax",
            ConcurrencyPolicy::RouteSegmented => "route-segmented",
        }
    }
}

impl fmt::Display for ConcurrencyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Order in which available entries of a route are handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ReusePolicy {
    /// Most recently released entry first
    #[default]
    Lifo,

    /// Least recently released entry first
    Fifo,
}

/// Configuration for connection pool behavior
///
/// # Examples
///
/// ```
/// use esox_connpool::{ConcurrencyPolicy, PoolConfiguration, ReusePolicy};
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_max_total(100)
///     .with_default_max_per_route(10)
///     .with_concurrency_policy(ConcurrencyPolicy::Lax)
///     .with_reuse_policy(ReusePolicy::Fifo)
///     .with_lease_timeout(Duration::from_secs(5));
///
/// assert_eq!(config.max_total, 100);
/// assert_eq!(config.default_max_per_route, 10);
/// assert_eq!(config.lease_timeout, Some(Duration::from_secs(5)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfiguration {
    /// Maximum number of entries (leased + available) across all routes
    pub max_total: usize,

    /// Maximum number of entries per route unless overridden for that route
    pub default_max_per_route: usize,

    /// Admission and locking strategy
    pub concurrency_policy: ConcurrencyPolicy,

    /// Ordering of available entries on lease
    pub reuse_policy: ReusePolicy,

    /// Absolute validity of an entry from its creation
    pub time_to_live: Option<Duration>,

    /// Lease timeout used when `lease` is called without one
    pub lease_timeout: Option<Duration>,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            max_total: 25,
            default_max_per_route: 5,
            concurrency_policy: ConcurrencyPolicy::Strict,
            reuse_policy: ReusePolicy::Lifo,
            time_to_live: None,
            lease_timeout: None,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum total number of entries
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_connpool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new().with_max_total(50);
    ///
    /// assert_eq!(config.max_total, 50);
    /// ```
    pub fn with_max_total(mut self, max: usize) -> Self {
        self.max_total = max;
        self
    }

    /// Set the default per-route limit
    pub fn with_default_max_per_route(mut self, max: usize) -> Self {
        self.default_max_per_route = max;
        self
    }

    pub fn with_concurrency_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.concurrency_policy = policy;
        self
    }

    pub fn with_reuse_policy(mut self, policy: ReusePolicy) -> Self {
        self.reuse_policy = policy;
        self
    }

    /// Set the absolute time-to-live of entries
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Set the default lease timeout
    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfiguration::default();
        assert_eq!(config.max_total, 25);
        assert_eq!(config.default_max_per_route, 5);
        assert_eq!(config.concurrency_policy, ConcurrencyPolicy::Strict);
        assert_eq!(config.reuse_policy, ReusePolicy::Lifo);
        assert!(config.time_to_live.is_none());
        assert!(config.lease_timeout.is_none());
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(ConcurrencyPolicy::Strict.to_string(), "strict");
        assert_eq!(ConcurrencyPolicy::RouteSegmented.to_string(), "route-segmented");
    }
}
