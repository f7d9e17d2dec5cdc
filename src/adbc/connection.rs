//! Connection implementation.
//!
//! This module provides the `Connection` type, which owns the transport and
//! session of one open connection and hands out statements bound to it.

use crate::adbc::Statement;
use crate::connection::params::ConnectionParams;
use crate::connection::session::Session;
use crate::error::{ConnectionError, QueryError, TransportError};
use crate::options::{OptionKey, OptionRegistry, OptionScope};
use crate::query::results::{QueryMetadata, ResultStream};
use crate::query::statement::{ExecutionContext, Statement as QueryStatement};
use crate::transport::{TableRef, TransportConfig, TransportProtocol};
use arrow::array::StringArray;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Driver and server identification of an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Driver name
    pub driver_name: String,
    /// Driver version
    pub driver_version: String,
    /// Server name reported at authentication
    pub server_name: String,
    /// Server version reported at authentication
    pub server_version: String,
    /// Server session identifier
    pub session_id: String,
    /// Endpoint the connection was opened against
    pub endpoint: String,
}

pub(crate) struct ConnectionInner {
    transport: Arc<Mutex<dyn TransportProtocol>>,
    session: Arc<Session>,
    params: ConnectionParams,
    options: RwLock<OptionRegistry>,
}

impl ConnectionInner {
    pub(crate) fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub(crate) fn transport(&self) -> Arc<Mutex<dyn TransportProtocol>> {
        Arc::clone(&self.transport)
    }

    fn options_snapshot(&self) -> OptionRegistry {
        self.options
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Current `timeout_cancel`, falling back to the value at open.
    fn cancel_timeout(&self) -> Duration {
        self.options
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .timeout_cancel()
            .unwrap_or(self.params.cancel_timeout)
    }

    pub(crate) fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::new(self.params.endpoint.to_string())
            .with_options(self.options_snapshot())
            .with_session(Arc::clone(&self.session))
            .with_cancel_timeout(self.cancel_timeout())
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        if !self.session.begin_close() {
            debug!("connection already closed");
            return Ok(());
        }

        let cancelled = self.session.cancel_all_streams();
        let endpoint = self.params.endpoint.to_string();
        let cancel_timeout = self.cancel_timeout();
        let release = teardown(
            Arc::clone(&self.transport),
            self.session.end_transaction(),
        );
        let outcome = timeout(cancel_timeout, release).await;
        self.session.finish_close();

        match outcome {
            Ok(Ok(())) => {
                info!(
                    session_id = self.session.session_id(),
                    cancelled_streams = cancelled,
                    "connection closed"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "transport close failed");
                Err(ConnectionError::CloseFailed {
                    endpoint,
                    message: e.to_string(),
                })
            }
            Err(_) => {
                warn!(
                    timeout_ms = cancel_timeout.as_millis() as u64,
                    "transport close timed out"
                );
                Err(ConnectionError::CloseFailed {
                    endpoint,
                    message: format!(
                        "transport close timed out after {}ms",
                        cancel_timeout.as_millis()
                    ),
                })
            }
        }
    }

    /// Best-effort close without awaiting: cancel streams, mark the session
    /// closed and schedule the transport close on the current runtime.
    pub(crate) fn close_now(&self) {
        if !self.session.begin_close() {
            return;
        }
        let cancelled = self.session.cancel_all_streams();
        self.session.finish_close();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let close = teardown(
                    Arc::clone(&self.transport),
                    self.session.end_transaction(),
                );
                let cancel_timeout = self.cancel_timeout();
                runtime.spawn(async move {
                    match timeout(cancel_timeout, close).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => debug!(error = %e, "transport close on drop failed"),
                        Err(_) => debug!("transport close on drop timed out"),
                    }
                });
            }
            Err(_) => warn!("no runtime available; transport dropped without close"),
        }
        debug!(cancelled_streams = cancelled, "connection released on drop");
    }
}

/// Roll back an open transaction, then close the transport. A failed
/// rollback does not prevent the close.
async fn teardown(
    transport: Arc<Mutex<dyn TransportProtocol>>,
    rollback: bool,
) -> Result<(), TransportError> {
    let mut transport = transport.lock().await;
    if rollback {
        match transport.rollback().await {
            Ok(()) => debug!("open transaction rolled back before close"),
            Err(e) => warn!(error = %e, "rollback before close failed"),
        }
    }
    transport.close().await
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.close_now();
    }
}

/// Open connection to a query engine.
///
/// `Connection` is cheap to clone and safe to share between tasks; clones
/// refer to the same session. Statements hold a non-owning reference and fail
/// with `QueryError::ConnectionClosed` once the connection is closed or every
/// clone has been dropped.
///
/// # Example
///
/// ```
/// use flightlink::adbc::Connection;
/// use flightlink::options::{OptionRegistry, OptionScope};
/// use flightlink::transport::MemoryTransport;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let options = OptionRegistry::new(OptionScope::Connection);
/// let connection = Connection::open(MemoryTransport::new(), "memory://local", options).await?;
///
/// let batches = connection.query("SELECT 1").await?;
/// assert_eq!(batches.len(), 1);
///
/// connection.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Open a connection over `transport` to `endpoint`.
    ///
    /// # Errors
    ///
    /// See [`Connection::connect_with`].
    pub async fn open<T>(
        transport: T,
        endpoint: &str,
        mut options: OptionRegistry,
    ) -> Result<Self, ConnectionError>
    where
        T: TransportProtocol + 'static,
    {
        options.set_key(OptionKey::Endpoint, endpoint)?;
        Self::connect_with(Arc::new(Mutex::new(transport)), options).await
    }

    /// Open a connection over a shared transport using connection options.
    ///
    /// Connect and authenticate together are bounded by `timeout_connect`.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidParameter` / `ParseError` / `Option` for bad options
    /// - `ConnectionError::Unreachable` if the endpoint cannot be reached
    /// - `ConnectionError::AuthenticationFailed` if the credentials are rejected
    /// - `ConnectionError::Timeout` if `timeout_connect` elapses
    /// - `ConnectionError::ConnectionFailed` for any other transport failure
    #[instrument(skip(transport, options), fields(endpoint))]
    pub async fn connect_with(
        transport: Arc<Mutex<dyn TransportProtocol>>,
        options: OptionRegistry,
    ) -> Result<Self, ConnectionError> {
        if options.scope() != OptionScope::Connection {
            return Err(ConnectionError::InvalidParameter {
                parameter: "options".to_string(),
                message: "connection requires connection-scope options".to_string(),
            });
        }

        let params = ConnectionParams::from_options(&options)?;
        let endpoint = params.endpoint.to_string();
        tracing::Span::current().record("endpoint", endpoint.as_str());

        let config = TransportConfig::new(params.endpoint.clone())
            .with_tls_skip_verify(params.tls_skip_verify)
            .with_timeout(params.connect_timeout);

        let handshake = async {
            let mut transport = transport.lock().await;
            transport
                .connect(&config)
                .await
                .map_err(|e| open_error(&endpoint, e))?;
            transport
                .authenticate(&params.credentials)
                .await
                .map_err(|e| open_error(&endpoint, e))
        };

        let outcome = match timeout(params.connect_timeout, handshake).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ConnectionError::Timeout {
                timeout_ms: params.connect_timeout.as_millis() as u64,
            }),
        };

        let session_info = match outcome {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "failed to open connection");
                let release = async { transport.lock().await.close().await };
                let _ = timeout(params.cancel_timeout, release).await;
                return Err(e);
            }
        };

        info!(
            session_id = %session_info.session_id,
            server = %session_info.server_name,
            credentials = %params.credentials,
            "connection established"
        );

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                transport,
                session: Arc::new(Session::new(session_info)),
                params,
                options: RwLock::new(options),
            }),
        })
    }

    /// Create an unbound statement.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::ConnectionClosed` after `close()`.
    pub fn new_statement(&self) -> Result<Statement, QueryError> {
        self.ensure_open()?;
        Ok(Statement::new(
            Arc::downgrade(&self.inner),
            QueryStatement::new(self.inner.transport()),
        ))
    }

    /// Create a statement bound to `sql`.
    pub fn create_statement(&self, sql: impl Into<String>) -> Result<Statement, QueryError> {
        let mut statement = self.new_statement()?;
        statement.set_sql_query(sql)?;
        Ok(statement)
    }

    /// Execute `sql` and return its result stream.
    ///
    /// The stream stays registered with the connection, so `close()` cancels
    /// it if it is still active.
    pub async fn execute(
        &self,
        sql: impl Into<String>,
    ) -> Result<(ResultStream, QueryMetadata), QueryError> {
        let mut statement = self.create_statement(sql)?;
        let result = statement.execute_query().await?;
        statement.detach();
        Ok(result)
    }

    /// Execute `sql` and collect every batch.
    pub async fn query(&self, sql: impl Into<String>) -> Result<Vec<RecordBatch>, QueryError> {
        let (stream, _) = self.execute(sql).await?;
        Ok(stream.fetch_all().await?)
    }

    /// Execute `sql` and return the affected row count.
    pub async fn execute_update(&self, sql: impl Into<String>) -> Result<i64, QueryError> {
        let mut statement = self.create_statement(sql)?;
        statement.execute_update().await
    }

    /// Start an explicit transaction.
    ///
    /// # Errors
    ///
    /// - `QueryError::TransactionError` if a transaction is already active
    /// - `QueryError::Transport` if the server refuses to open one
    pub async fn begin_transaction(&self) -> Result<(), QueryError> {
        self.ensure_open()?;
        if !self.inner.session.begin_transaction() {
            return Err(QueryError::TransactionError(
                "Transaction already active".to_string(),
            ));
        }

        let result = self.inner.transport.lock().await.begin_transaction().await;
        if let Err(source) = result {
            self.inner.session.end_transaction();
            return Err(self.transport_error("begin_transaction", source));
        }
        debug!(session_id = self.session_id(), "transaction started");
        Ok(())
    }

    /// Commit the active transaction.
    ///
    /// # Errors
    ///
    /// - `QueryError::TransactionError` if no transaction is active
    /// - `QueryError::Transport` if the commit fails; the transaction stays
    ///   active so it can be rolled back
    pub async fn commit(&self) -> Result<(), QueryError> {
        self.ensure_in_transaction()?;
        let result = self.inner.transport.lock().await.commit().await;
        result.map_err(|source| self.transport_error("commit", source))?;
        self.inner.session.end_transaction();
        debug!(session_id = self.session_id(), "transaction committed");
        Ok(())
    }

    /// Roll back the active transaction.
    ///
    /// # Errors
    ///
    /// - `QueryError::TransactionError` if no transaction is active
    /// - `QueryError::Transport` if the rollback fails
    pub async fn rollback(&self) -> Result<(), QueryError> {
        self.ensure_in_transaction()?;
        let result = self.inner.transport.lock().await.rollback().await;
        result.map_err(|source| self.transport_error("rollback", source))?;
        self.inner.session.end_transaction();
        debug!(session_id = self.session_id(), "transaction rolled back");
        Ok(())
    }

    /// Check if an explicit transaction is active.
    pub fn in_transaction(&self) -> bool {
        self.inner.session.in_transaction()
    }

    /// Table types known to the server, as a single `table_type` column.
    pub async fn get_table_types(&self) -> Result<RecordBatch, QueryError> {
        self.ensure_open()?;
        let result = self.inner.transport.lock().await.table_types().await;
        let types = result.map_err(|source| self.transport_error("get_table_types", source))?;

        let schema = Arc::new(Schema::new(vec![Field::new(
            "table_type",
            DataType::Utf8,
            false,
        )]));
        RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(types))]).map_err(|e| {
            self.transport_error(
                "get_table_types",
                TransportError::InvalidResponse(e.to_string()),
            )
        })
    }

    /// Arrow schema of a table.
    ///
    /// # Arguments
    ///
    /// * `catalog` - Catalog name, or `None` for any
    /// * `db_schema` - Schema name, or `None` for any
    /// * `table` - Table name
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Transport` wrapping `TransportError::NotFound` if
    /// the table does not exist.
    pub async fn get_table_schema(
        &self,
        catalog: Option<&str>,
        db_schema: Option<&str>,
        table: &str,
    ) -> Result<SchemaRef, QueryError> {
        self.ensure_open()?;
        let mut table = TableRef::new(table);
        table.catalog = catalog.map(str::to_string);
        table.db_schema = db_schema.map(str::to_string);

        let result = self.inner.transport.lock().await.table_schema(&table).await;
        result.map_err(|source| self.transport_error("get_table_schema", source))
    }

    /// Change a connection option after open.
    ///
    /// Statement defaults (`queue_size`, `fetch_size`, timeouts) may change and
    /// apply to statements executed afterwards.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Option` for unknown or statement-only keys
    /// - `ConnectionError::InvalidState` for keys that only apply at open
    /// - `ConnectionError::ConnectionClosed` after `close()`
    pub fn set_option(&self, key: &str, value: impl Into<String>) -> Result<(), ConnectionError> {
        self.inner.session.validate_ready()?;

        if let Some(parsed) = OptionKey::parse(key) {
            if parsed.is_init_only() {
                return Err(ConnectionError::InvalidState(format!(
                    "option '{}' can only be set before the connection is opened",
                    parsed
                )));
            }
        }

        self.inner
            .options
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .set(key, value)?;
        Ok(())
    }

    /// Get a connection option. Secret values are never returned.
    pub fn get_option(&self, key: &str) -> Option<String> {
        let key = OptionKey::parse(key)?;
        if key.is_secret() {
            return None;
        }
        self.inner
            .options
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .map(str::to_string)
    }

    /// Driver and server identification.
    pub fn info(&self) -> ConnectionInfo {
        let session = self.inner.session.info();
        ConnectionInfo {
            driver_name: crate::adbc::driver::DRIVER_NAME.to_string(),
            driver_version: env!("CARGO_PKG_VERSION").to_string(),
            server_name: session.server_name.clone(),
            server_version: session.server_version.clone(),
            session_id: session.session_id.clone(),
            endpoint: self.inner.params.endpoint.to_string(),
        }
    }

    /// Get the server session ID.
    pub fn session_id(&self) -> &str {
        self.inner.session.session_id()
    }

    /// Get connection parameters.
    pub fn params(&self) -> &ConnectionParams {
        &self.inner.params
    }

    /// Number of result streams still active on this connection.
    pub fn active_stream_count(&self) -> usize {
        self.inner.session.active_stream_count()
    }

    /// Check if the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.session.is_closed()
    }

    /// Close the connection. Idempotent.
    ///
    /// The first call marks the session closed, cancels every active result
    /// stream and closes the transport within the current `timeout_cancel`.
    /// An open transaction is rolled back first. Later calls return `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::CloseFailed` if the transport close fails or
    /// times out; the connection is closed regardless.
    #[instrument(skip(self), fields(endpoint = %self.inner.params.endpoint))]
    pub async fn close(&self) -> Result<(), ConnectionError> {
        self.inner.close().await
    }

    pub(crate) fn close_now(&self) {
        self.inner.close_now();
    }

    fn ensure_open(&self) -> Result<(), QueryError> {
        self.inner
            .session
            .validate_ready()
            .map_err(|_| QueryError::ConnectionClosed)
    }

    fn ensure_in_transaction(&self) -> Result<(), QueryError> {
        self.ensure_open()?;
        if self.inner.session.in_transaction() {
            Ok(())
        } else {
            Err(QueryError::TransactionError(
                "No active transaction".to_string(),
            ))
        }
    }

    fn transport_error(&self, operation: &'static str, source: TransportError) -> QueryError {
        QueryError::Transport {
            operation,
            endpoint: self.inner.params.endpoint.to_string(),
            source,
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session_id", &self.inner.session.session_id())
            .field("endpoint", &self.inner.params.endpoint.to_string())
            .field("credentials", &self.inner.params.credentials)
            .field("in_transaction", &self.in_transaction())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn open_error(endpoint: &str, error: TransportError) -> ConnectionError {
    match error {
        TransportError::Unreachable(message) => ConnectionError::Unreachable {
            endpoint: endpoint.to_string(),
            message,
        },
        TransportError::AuthFailed(message) => {
            ConnectionError::AuthenticationFailed(format!("{} ({})", message, endpoint))
        }
        TransportError::Timeout { timeout_ms } => ConnectionError::Timeout { timeout_ms },
        other => ConnectionError::ConnectionFailed {
            endpoint: endpoint.to_string(),
            message: other.to_string(),
        },
    }
}
