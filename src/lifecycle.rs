//! Scoped release of connections, statements and result streams.
//!
//! Every resource that holds server-side state implements [`Release`]. A
//! [`Scoped`] guard releases its resource exactly once: explicitly through
//! [`Scoped::release`], or on drop when the scope exits early.
//!
//! # Example
//!
//! ```
//! use flightlink::adbc::Database;
//! use flightlink::error::DriverError;
//! use flightlink::lifecycle::Scoped;
//! use std::str::FromStr;
//!
//! # async fn example() -> Result<(), DriverError> {
//! let connection = Database::from_str("memory://local")?.connect().await?;
//!
//! let rows = Scoped::using(connection, |connection| {
//!     Box::pin(async move {
//!         let batches = connection.query("SELECT 7").await?;
//!         Ok::<_, DriverError>(batches.iter().map(|b| b.num_rows()).sum::<usize>())
//!     })
//! })
//! .await?;
//! assert_eq!(rows, 1);
//! # Ok(())
//! # }
//! ```

use crate::adbc::{Connection, Statement};
use crate::error::{ConnectionError, QueryError, StreamError};
use crate::query::ResultStream;
use async_trait::async_trait;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use tracing::{debug, warn};

/// A resource with server-side state that must be released.
#[async_trait]
pub trait Release: Send {
    /// Error reported by an explicit release.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Release the resource and report the first teardown failure.
    ///
    /// Releasing an already released resource returns `Ok(())`.
    async fn release(&mut self) -> Result<(), Self::Error>;

    /// Synchronous best-effort release used when the owner goes away
    /// without an explicit release. Failures are logged, not reported.
    fn release_on_drop(&mut self);
}

#[async_trait]
impl Release for Connection {
    type Error = ConnectionError;

    async fn release(&mut self) -> Result<(), ConnectionError> {
        self.close().await
    }

    fn release_on_drop(&mut self) {
        self.close_now();
    }
}

#[async_trait]
impl Release for Statement {
    type Error = QueryError;

    async fn release(&mut self) -> Result<(), QueryError> {
        self.close().await
    }

    fn release_on_drop(&mut self) {
        self.close_now();
    }
}

#[async_trait]
impl Release for ResultStream {
    type Error = StreamError;

    async fn release(&mut self) -> Result<(), StreamError> {
        self.close().await
    }

    fn release_on_drop(&mut self) {
        self.release_now();
    }
}

/// Future returned by the body passed to [`Scoped::using`].
pub type ScopedFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Guard that releases its resource exactly once.
///
/// Dereferences to the resource. Dropping an unreleased guard (early return,
/// `?`, panic unwind) performs [`Release::release_on_drop`].
pub struct Scoped<R: Release> {
    resource: R,
    released: bool,
}

impl<R: Release> Scoped<R> {
    /// Guard `resource`.
    pub fn new(resource: R) -> Self {
        Self {
            resource,
            released: false,
        }
    }

    /// Whether the resource has been released through this guard.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release the resource. Only the first call reaches the resource;
    /// later calls return `Ok(())`.
    pub async fn release(&mut self) -> Result<(), R::Error> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.resource.release().await
    }

    /// Run `body` against the resource and release it afterwards.
    ///
    /// The resource is released whether or not `body` succeeds. A body error
    /// is reported in preference to a release error.
    pub async fn using<T, E, F>(resource: R, body: F) -> Result<T, E>
    where
        F: for<'a> FnOnce(&'a mut R) -> ScopedFuture<'a, Result<T, E>>,
        E: From<R::Error>,
    {
        let mut scoped = Self::new(resource);
        let outcome = body(&mut scoped.resource).await;
        let released = scoped.release().await;

        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(E::from(e)),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_error)) => {
                warn!(error = %release_error, "release failed after scope error");
                Err(e)
            }
        }
    }
}

impl<R: Release> Deref for Scoped<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R: Release> DerefMut for Scoped<R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.resource
    }
}

impl<R: Release> Drop for Scoped<R> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            debug!("releasing scoped resource on drop");
            self.resource.release_on_drop();
        }
    }
}

impl<R: Release + std::fmt::Debug> std::fmt::Debug for Scoped<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scoped")
            .field("resource", &self.resource)
            .field("released", &self.released)
            .finish()
    }
}
