//! Database implementation.
//!
//! This module provides the `Database` type, which collects connection
//! options and acts as a factory for connections.

use crate::adbc::Connection;
use crate::connection::params::{apply_connection_uri, ConnectionParams, Scheme};
use crate::error::ConnectionError;
use crate::options::{OptionKey, OptionRegistry, OptionScope};
use crate::transport::{MemoryTransport, TransportProtocol};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Builds the transport for a new connection.
pub type TransportFactory = Arc<
    dyn Fn(&ConnectionParams) -> Result<Arc<Mutex<dyn TransportProtocol>>, ConnectionError>
        + Send
        + Sync,
>;

/// Connection factory.
///
/// A `Database` holds connection-scope options and, for network endpoints, a
/// [`TransportFactory`]. `memory://` endpoints are served by an in-process
/// [`MemoryTransport`] when no factory is set.
///
/// # Example
///
/// ```
/// use flightlink::adbc::Database;
/// use std::str::FromStr;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut database = Database::from_str("memory://local?queue_size=2")?;
/// database.set_option("fetch_size", "4")?;
///
/// let connection = database.connect().await?;
/// assert_eq!(connection.get_option("queue_size").as_deref(), Some("2"));
/// connection.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Database {
    options: OptionRegistry,
    factory: Option<TransportFactory>,
}

impl Database {
    /// Create a database with no options set.
    pub fn new() -> Self {
        Self {
            options: OptionRegistry::new(OptionScope::Connection),
            factory: None,
        }
    }

    /// Create a database from connection options.
    pub fn with_options(options: OptionRegistry) -> Result<Self, ConnectionError> {
        if options.scope() != OptionScope::Connection {
            return Err(ConnectionError::InvalidParameter {
                parameter: "options".to_string(),
                message: "database requires connection-scope options".to_string(),
            });
        }
        Ok(Self {
            options,
            factory: None,
        })
    }

    /// Use `factory` to build transports for new connections.
    pub fn with_transport<F>(mut self, factory: F) -> Self
    where
        F: Fn(&ConnectionParams) -> Result<Arc<Mutex<dyn TransportProtocol>>, ConnectionError>
            + Send
            + Sync
            + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Set a connection option. The `uri` key also accepts a full
    /// connection URI with credentials and query parameters.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::Option` for unknown or statement-only keys.
    pub fn set_option(&mut self, key: &str, value: impl Into<String>) -> Result<(), ConnectionError> {
        let value = value.into();
        if OptionKey::parse(key) == Some(OptionKey::Endpoint) && value.contains(['@', '?']) {
            return apply_connection_uri(&mut self.options, &value);
        }
        self.options.set(key, value)?;
        Ok(())
    }

    /// Get a connection option. Secret values are never returned.
    pub fn get_option(&self, key: &str) -> Option<&str> {
        let key = OptionKey::parse(key)?;
        if key.is_secret() {
            return None;
        }
        self.options.get(key)
    }

    /// Connection options collected so far.
    pub fn options(&self) -> &OptionRegistry {
        &self.options
    }

    /// Validate the options and return the connection parameters.
    pub fn params(&self) -> Result<ConnectionParams, ConnectionError> {
        ConnectionParams::from_options(&self.options)
    }

    /// Open a new connection.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` if the options are invalid, no transport is
    /// available for the endpoint scheme, or opening fails.
    pub async fn connect(&self) -> Result<Connection, ConnectionError> {
        let params = self.params()?;

        let transport: Arc<Mutex<dyn TransportProtocol>> = match (&self.factory, params.endpoint.scheme) {
            (Some(factory), _) => factory(&params)?,
            (None, Scheme::Memory) => Arc::new(Mutex::new(MemoryTransport::new())),
            (None, scheme) => {
                return Err(ConnectionError::ConnectionFailed {
                    endpoint: params.endpoint.to_string(),
                    message: format!("no transport registered for scheme '{}'", scheme.as_str()),
                })
            }
        };

        debug!(endpoint = %params.endpoint, "opening connection");
        Connection::connect_with(transport, self.options.clone()).await
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for Database {
    type Err = ConnectionError;

    /// Parse a connection URI:
    /// `scheme://[user[:password]@]host[:port][?key=value&...]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut options = OptionRegistry::new(OptionScope::Connection);
        apply_connection_uri(&mut options, s)?;
        ConnectionParams::from_options(&options)?;
        Self::with_options(options)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("options", &self.options)
            .field("transport_factory", &self.factory.is_some())
            .finish()
    }
}

impl std::fmt::Display for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.options.get(OptionKey::Endpoint) {
            Some(endpoint) => write!(f, "Database({})", endpoint),
            None => write!(f, "Database(<no endpoint>)"),
        }
    }
}
