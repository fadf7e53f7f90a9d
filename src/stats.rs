//! Point-in-time pool statistics

use std::fmt;

#[cfg(feature = "serde")]
use serde::Serialize;

/// Occupancy of one route or of the whole pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PoolStats {
    /// Entries checked out by callers
    pub leased: usize,

    /// Lease requests waiting for capacity
    pub pending: usize,

    /// Idle entries ready for reuse
    pub available: usize,

    /// Capacity limit (per-route or global)
    pub max: usize,
}

impl PoolStats {
    pub fn allocated(&self) -> usize {
        self.leased + self.available
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[leased: {}][available: {}][pending: {}][max: {}]",
            self.leased, self.available, self.pending, self.max
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let stats = PoolStats {
            leased: 2,
            pending: 1,
            available: 3,
            max: 10,
        };
        assert_eq!(stats.allocated(), 5);
        assert_eq!(stats.to_string(), "[leased: 2][available: 3][pending: 1][max: 10]");
    }
}
