//! # Esox ConnPool
//!
//! Keyed, thread-safe connection pool for HTTP-style clients. Connections are
//! grouped by route (any hashable destination key), bounded by a global and a
//! per-route capacity, and handed from releasing callers straight to waiting
//! ones.
//!
//! ## Features
//!
//! - Per-route limits under a global capacity
//! - Three admission policies: strict, lax and route-segmented
//! - LIFO or FIFO reuse of idle connections
//! - Cancellable, timeout-bound lease handles for async and blocking callers
//! - Write-once connection assignment and caller-declared expiry
//! - Externally driven idle and expiry sweeps
//! - Disposal callback on every discard path
//! - Metrics, health status and Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use esox_connpool::{ConnPool, DropConnection, PoolConfiguration};
//!
//! let pool: ConnPool<&'static str, u32> = ConnPool::new(PoolConfiguration::default(), DropConnection);
//!
//! let entry = pool.lease("api.example.com:443", None).unwrap().wait_blocking().unwrap();
//! if !entry.has_connection() {
//!     // dial out of band, then hand the connection to the pool
//!     pool.assign_connection(&entry, 7).unwrap();
//! }
//! pool.release(&entry, true).unwrap();
//! assert_eq!(pool.stats(&"api.example.com:443").available, 1);
//! ```

mod admission;
mod config;
mod connect;
mod disposal;
mod entry;
mod errors;
mod eviction;
mod health;
mod lax;
mod metrics;
mod pool;
mod route;
mod segmented;
mod stats;
mod strict;
mod waiter;

use std::fmt::Debug;
use std::hash::Hash;

pub use config::{ConcurrencyPolicy, PoolConfiguration, ReusePolicy};
pub use connect::ConnFactory;
pub use disposal::{CloseMode, DisposalCallback, DropConnection};
pub use entry::{EntryState, PoolEntry};
pub use errors::{BoxError, PoolError, PoolResult};
pub use health::HealthStatus;
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::PoolMetrics;
pub use pool::ConnPool;
pub use stats::PoolStats;
pub use waiter::LeaseHandle;

/// Key identifying a destination; the pool only compares and hashes it
pub trait Route: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> Route for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}
