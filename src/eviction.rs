//! Selection criteria for maintenance sweeps

use crate::entry::PoolEntry;

use std::time::{Duration, Instant};

/// Which available entries a maintenance sweep discards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Eviction {
    /// Released longer ago than the given duration
    Idle(Duration),

    /// Past their expiry deadline
    Expired,
}

impl Eviction {
    pub fn selects<R, C>(&self, entry: &PoolEntry<R, C>, now: Instant) -> bool {
        match self {
            Eviction::Idle(idle) => {
                let since = entry.last_released_at().unwrap_or_else(|| entry.created_at());
                now.saturating_duration_since(since) > *idle
            }
            Eviction::Expired => entry.is_expired(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_selection() {
        let now = Instant::now();
        let entry: PoolEntry<&str, u32> = PoolEntry::new("a", now, None);
        entry.mark_available(now);

        let idle = Eviction::Idle(Duration::from_millis(50));
        assert!(!idle.selects(&entry, now + Duration::from_millis(10)));
        assert!(idle.selects(&entry, now + Duration::from_millis(60)));
    }

    #[test]
    fn test_expired_selection() {
        let now = Instant::now();
        let entry: PoolEntry<&str, u32> = PoolEntry::new("a", now, None);
        assert!(!Eviction::Expired.selects(&entry, now + Duration::from_secs(3600)));

        entry.update_expiry(Duration::from_millis(10), now).unwrap();
        assert!(!Eviction::Expired.selects(&entry, now + Duration::from_millis(5)));
        assert!(Eviction::Expired.selects(&entry, now + Duration::from_millis(10)));
    }
}
