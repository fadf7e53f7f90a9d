//! Pool entries binding one connection slot to one route

use crate::errors::{PoolError, PoolResult};

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a pool entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Idle in its route's available queue
    Available,

    /// Checked out by a caller
    Leased,

    /// Discarded by the pool; every further operation on it fails
    Disposed,
}

#[derive(Debug)]
struct EntryMeta {
    state: EntryState,
    // bumped on every hand-out; stale handles carry an older value
    lease: u64,
    assigned: bool,
    last_released_at: Option<Instant>,
    expiry_deadline: Option<Instant>,
}

struct EntryInner<R, C> {
    id: u64,
    route: R,
    created_at: Instant,
    validity_deadline: Option<Instant>,
    connection: Mutex<Option<C>>,
    meta: Mutex<EntryMeta>,
}

/// A pool-owned slot for one connection to one route
///
/// Handles are cheap to clone; every clone refers to the same slot. The
/// connection is assigned at most once through [`ConnPool::assign_connection`].
///
/// A handle also records which lease it came from. Once the slot is released
/// and leased again, handles from the earlier lease can no longer release,
/// assign or update it.
///
/// [`ConnPool::assign_connection`]: crate::ConnPool::assign_connection
pub struct PoolEntry<R, C> {
    inner: Arc<EntryInner<R, C>>,
    lease: u64,
}

impl<R, C> Clone for PoolEntry<R, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            lease: self.lease,
        }
    }
}

impl<R: fmt::Debug, C> fmt::Debug for PoolEntry<R, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = self.inner.meta.lock();
        f.debug_struct("PoolEntry")
            .field("id", &self.inner.id)
            .field("lease", &self.lease)
            .field("route", &self.inner.route)
            .field("state", &meta.state)
            .field("assigned", &meta.assigned)
            .finish()
    }
}

impl<R, C> PoolEntry<R, C> {
    /// A new leased entry without a connection
    pub(crate) fn new(route: R, now: Instant, time_to_live: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(EntryInner {
                id: NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed),
                route,
                created_at: now,
                validity_deadline: time_to_live.map(|ttl| now + ttl),
                connection: Mutex::new(None),
                meta: Mutex::new(EntryMeta {
                    state: EntryState::Leased,
                    lease: 0,
                    assigned: false,
                    last_released_at: None,
                    expiry_deadline: None,
                }),
            }),
            lease: 0,
        }
    }

    /// Unique identifier of this entry
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn route(&self) -> &R {
        &self.inner.route
    }

    pub fn created_at(&self) -> Instant {
        self.inner.created_at
    }

    pub fn last_released_at(&self) -> Option<Instant> {
        self.inner.meta.lock().last_released_at
    }

    /// The instant after which the entry is stale, if any
    pub fn expiry_deadline(&self) -> Option<Instant> {
        let declared = self.inner.meta.lock().expiry_deadline;
        match (declared, self.inner.validity_deadline) {
            (Some(declared), Some(validity)) => Some(declared.min(validity)),
            (declared, validity) => declared.or(validity),
        }
    }

    pub fn state(&self) -> EntryState {
        self.inner.meta.lock().state
    }

    /// Whether a connection is currently held by this entry
    pub fn has_connection(&self) -> bool {
        self.inner.connection.lock().is_some()
    }

    /// Run `f` against the connection, if one is assigned
    ///
    /// The connection is locked for the duration of `f`.
    pub fn with_connection<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&mut C) -> T,
    {
        self.inner.connection.lock().as_mut().map(f)
    }

    /// Whether both handles refer to the same slot
    pub fn same_entry(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether both handles refer to the same slot and came from the same lease
    pub fn same_lease(&self, other: &Self) -> bool {
        self.same_entry(other) && self.lease == other.lease
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expiry_deadline().is_some_and(|deadline| deadline <= now)
    }

    pub(crate) fn assign_connection(&self, connection: C) -> PoolResult<()> {
        let mut meta = self.inner.meta.lock();
        if meta.state != EntryState::Leased || meta.lease != self.lease {
            return Err(PoolError::InvalidEntry);
        }
        if meta.assigned {
            return Err(PoolError::AlreadyAssigned);
        }
        meta.assigned = true;
        *self.inner.connection.lock() = Some(connection);
        Ok(())
    }

    pub(crate) fn update_expiry(&self, ttl: Duration, now: Instant) -> PoolResult<()> {
        let mut meta = self.inner.meta.lock();
        if meta.state != EntryState::Leased || meta.lease != self.lease {
            return Err(PoolError::InvalidEntry);
        }
        meta.expiry_deadline = Some(now + ttl);
        Ok(())
    }

    /// Starts a new lease on the slot and returns the handle that owns it
    pub(crate) fn lease_out(&self) -> Self {
        let mut meta = self.inner.meta.lock();
        meta.state = EntryState::Leased;
        meta.lease += 1;
        Self {
            inner: Arc::clone(&self.inner),
            lease: meta.lease,
        }
    }

    pub(crate) fn mark_released(&self, now: Instant) {
        self.inner.meta.lock().last_released_at = Some(now);
    }

    pub(crate) fn mark_available(&self, now: Instant) {
        let mut meta = self.inner.meta.lock();
        meta.state = EntryState::Available;
        meta.last_released_at = Some(now);
    }

    pub(crate) fn mark_disposed(&self) {
        self.inner.meta.lock().state = EntryState::Disposed;
    }

    /// Removes the connection for disposal
    pub(crate) fn take_connection(&self) -> Option<C> {
        self.inner.connection.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_once() {
        let entry: PoolEntry<&str, u32> = PoolEntry::new("a", Instant::now(), None);
        assert!(!entry.has_connection());

        entry.assign_connection(1).unwrap();
        assert_eq!(entry.assign_connection(2), Err(PoolError::AlreadyAssigned));
        assert_eq!(entry.with_connection(|c| *c), Some(1));
    }

    #[test]
    fn test_assign_after_dispose_fails() {
        let entry: PoolEntry<&str, u32> = PoolEntry::new("a", Instant::now(), None);
        entry.assign_connection(1).unwrap();
        entry.mark_disposed();
        assert_eq!(entry.take_connection(), Some(1));

        // a drained slot must not accept a second connection
        assert_eq!(entry.assign_connection(2), Err(PoolError::InvalidEntry));
    }

    #[test]
    fn test_expiry_capped_by_ttl() {
        let now = Instant::now();
        let entry: PoolEntry<&str, u32> = PoolEntry::new("a", now, Some(Duration::from_secs(10)));
        assert_eq!(entry.expiry_deadline(), Some(now + Duration::from_secs(10)));

        entry.update_expiry(Duration::from_secs(60), now).unwrap();
        assert_eq!(entry.expiry_deadline(), Some(now + Duration::from_secs(10)));

        entry.update_expiry(Duration::from_secs(2), now).unwrap();
        assert_eq!(entry.expiry_deadline(), Some(now + Duration::from_secs(2)));
        assert!(!entry.is_expired(now));
        assert!(entry.is_expired(now + Duration::from_secs(2)));
    }

    #[test]
    fn test_update_expiry_requires_lease() {
        let now = Instant::now();
        let entry: PoolEntry<&str, u32> = PoolEntry::new("a", now, None);
        entry.mark_available(now);
        assert_eq!(
            entry.update_expiry(Duration::from_secs(1), now),
            Err(PoolError::InvalidEntry)
        );
    }

    #[test]
    fn test_clones_share_slot() {
        let entry: PoolEntry<&str, u32> = PoolEntry::new("a", Instant::now(), None);
        let other = entry.clone();
        entry.assign_connection(5).unwrap();

        assert!(other.same_entry(&entry));
        assert_eq!(other.with_connection(|c| *c), Some(5));
        assert_ne!(PoolEntry::<&str, u32>::new("a", Instant::now(), None).id(), entry.id());
    }

    #[test]
    fn test_stale_lease_is_rejected() {
        let now = Instant::now();
        let first: PoolEntry<&str, u32> = PoolEntry::new("a", now, None);
        first.mark_available(now);
        let second = first.lease_out();

        assert!(second.same_entry(&first));
        assert!(!second.same_lease(&first));
        assert!(second.same_lease(&second.clone()));
        assert_eq!(first.assign_connection(1), Err(PoolError::InvalidEntry));
        assert_eq!(first.update_expiry(Duration::from_secs(1), now), Err(PoolError::InvalidEntry));
        second.assign_connection(2).unwrap();
        assert_eq!(second.with_connection(|c| *c), Some(2));
    }
}
