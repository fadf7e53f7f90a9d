//! Disposal of connections discarded by the pool

use crate::errors::BoxError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Hint passed to the disposal callback on how to close a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CloseMode {
    /// Allow the connection to shut down gracefully
    #[default]
    Graceful,

    /// Skip any graceful shutdown delay
    Immediate,
}

/// Invoked whenever the pool discards a connection
///
/// Errors are logged and counted by the pool; they never affect its bookkeeping.
///
/// # Examples
///
/// ```
/// use esox_connpool::{BoxError, CloseMode, ConnPool, PoolConfiguration};
///
/// let pool: ConnPool<&'static str, u32> = ConnPool::new(
///     PoolConfiguration::default(),
///     |conn: u32, mode: CloseMode| -> Result<(), BoxError> {
///         println!("closing {conn} ({mode:?})");
///         Ok(())
///     },
/// );
/// # drop(pool);
/// ```
pub trait DisposalCallback<C>: Send + Sync {
    fn dispose(&self, connection: C, mode: CloseMode) -> Result<(), BoxError>;
}

impl<C, F> DisposalCallback<C> for F
where
    F: Fn(C, CloseMode) -> Result<(), BoxError> + Send + Sync,
{
    fn dispose(&self, connection: C, mode: CloseMode) -> Result<(), BoxError> {
        self(connection, mode)
    }
}

/// Disposal that simply drops the connection
#[derive(Debug, Clone, Copy, Default)]
pub struct DropConnection;

impl<C> DisposalCallback<C> for DropConnection {
    fn dispose(&self, connection: C, _mode: CloseMode) -> Result<(), BoxError> {
        drop(connection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_callback() {
        let closed = Mutex::new(Vec::new());
        let callback = |conn: u32, mode: CloseMode| -> Result<(), BoxError> {
            closed.lock().unwrap().push((conn, mode));
            Ok(())
        };

        callback.dispose(7, CloseMode::Immediate).unwrap();
        assert_eq!(*closed.lock().unwrap(), vec![(7, CloseMode::Immediate)]);
    }

    #[test]
    fn test_failing_callback() {
        let callback = |_conn: u32, _mode: CloseMode| -> Result<(), BoxError> {
            Err("socket already closed".into())
        };

        let err = callback.dispose(1, CloseMode::Graceful).unwrap_err();
        assert_eq!(err.to_string(), "socket already closed");
    }
}
