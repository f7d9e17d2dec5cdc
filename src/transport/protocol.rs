//! Transport protocol abstraction trait.
//!
//! This module defines the `TransportProtocol` trait that abstracts the
//! mechanism used to reach the remote query engine. A network RPC client and
//! the in-process [`MemoryTransport`](super::MemoryTransport) are both
//! implementations of it.

use crate::connection::auth::Credentials;
use crate::connection::params::Endpoint;
use crate::error::TransportError;
use arrow::datatypes::SchemaRef;
use async_trait::async_trait;
use std::time::Duration;

use super::messages::{
    FetchResponse, PreparedHandle, PreparedInfo, QueryRequest, QueryResult, SessionInfo,
    StreamHandle, TableRef,
};

/// Parameters for establishing a transport connection.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Parsed endpoint
    pub endpoint: Endpoint,
    /// Skip server certificate verification
    pub tls_skip_verify: bool,
    /// Deadline for connect and authenticate
    pub connect_timeout: Duration,
}

impl TransportConfig {
    /// Create a configuration with the default connect timeout.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            tls_skip_verify: false,
            connect_timeout: crate::options::DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set whether to skip certificate verification.
    pub fn with_tls_skip_verify(mut self, skip: bool) -> Self {
        self.tls_skip_verify = skip;
        self
    }

    /// Set connection timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Whether the endpoint requires TLS.
    pub fn use_tls(&self) -> bool {
        self.endpoint.scheme.use_tls()
    }
}

/// Transport protocol trait for database communication.
///
/// Implementations are shared behind `Arc<tokio::sync::Mutex<dyn TransportProtocol>>`,
/// so every method takes `&mut self` and runs one request at a time.
#[async_trait]
pub trait TransportProtocol: Send + Sync {
    /// Connect to the database server.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Unreachable` if the endpoint cannot be reached.
    async fn connect(&mut self, config: &TransportConfig) -> Result<(), TransportError>;

    /// Authenticate with the database.
    ///
    /// # Returns
    ///
    /// Session information on successful authentication.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::AuthFailed` if the server rejects the credentials.
    async fn authenticate(
        &mut self,
        credentials: &Credentials,
    ) -> Result<SessionInfo, TransportError>;

    /// Submit a query.
    ///
    /// # Returns
    ///
    /// A stream handle and schema for row-returning queries, or a row count.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if submission fails.
    async fn execute(&mut self, request: &QueryRequest) -> Result<QueryResult, TransportError>;

    /// Fetch up to `max_batches` batches from a result stream.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::UnknownHandle` for a closed or unknown stream.
    async fn fetch(
        &mut self,
        handle: StreamHandle,
        max_batches: usize,
    ) -> Result<FetchResponse, TransportError>;

    /// Ask the server to abort a running stream.
    async fn cancel(&mut self, handle: StreamHandle) -> Result<(), TransportError>;

    /// Release a result stream on the server.
    async fn close_stream(&mut self, handle: StreamHandle) -> Result<(), TransportError>;

    /// Create a prepared plan for the query text.
    async fn prepare(&mut self, sql: &str) -> Result<PreparedInfo, TransportError>;

    /// Release a prepared plan.
    async fn close_prepared(&mut self, handle: PreparedHandle) -> Result<(), TransportError>;

    /// Open an explicit transaction.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::NotSupported` if the server has no transactions.
    async fn begin_transaction(&mut self) -> Result<(), TransportError>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> Result<(), TransportError>;

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> Result<(), TransportError>;

    /// Table types the server distinguishes, e.g. `TABLE` and `VIEW`.
    async fn table_types(&mut self) -> Result<Vec<String>, TransportError>;

    /// Arrow schema of one table.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::NotFound` if no such table exists.
    async fn table_schema(&mut self, table: &TableRef) -> Result<SchemaRef, TransportError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the connection is still active.
    fn is_connected(&self) -> bool;
}
