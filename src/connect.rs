//! Dialing connections for freshly created entries

use crate::errors::BoxError;

use async_trait::async_trait;

/// Caller-supplied dialer invoked after a lease creates a new entry
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use esox_connpool::{BoxError, ConnFactory};
///
/// struct Loopback;
///
/// #[async_trait]
/// impl ConnFactory<String, String> for Loopback {
///     async fn connect(&self, route: &String) -> Result<String, BoxError> {
///         Ok(format!("conn-to-{route}"))
///     }
/// }
/// ```
#[async_trait]
pub trait ConnFactory<R, C>: Send + Sync {
    async fn connect(&self, route: &R) -> Result<C, BoxError>;
}
