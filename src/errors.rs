//! Error types for the connection pool

use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by caller-supplied collaborators (disposal, dialing)
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Connection already assigned to this pool entry")]
    AlreadyAssigned,

    #[error("Pool entry is not leased from this pool")]
    InvalidEntry,

    #[error("Lease timed out after {0:?}")]
    LeaseTimeout(Duration),

    #[error("Lease request was cancelled")]
    Cancelled,

    #[error("Connection pool is shut down")]
    PoolShutdown,

    #[error("Operation not supported by the {0} concurrency policy")]
    Unsupported(&'static str),

    #[error("Failed to establish connection: {0}")]
    Connect(String),
}

pub type PoolResult<T> = Result<T, PoolError>;
