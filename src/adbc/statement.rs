//! Connection-bound statement.
//!
//! This module provides the `Statement` type which wraps the query execution
//! module and ties it to the connection that created it.

use crate::adbc::connection::ConnectionInner;
use crate::error::QueryError;
use crate::query::results::{QueryMetadata, ResultStream};
use crate::query::statement::{ExecutionContext, Parameter, Statement as QueryStatement, StatementState};
use arrow::datatypes::SchemaRef;
use std::sync::{Arc, Weak};

/// Statement created by a [`Connection`](crate::adbc::Connection).
///
/// The statement keeps a non-owning reference to its connection. Once the
/// connection is closed or dropped, executing fails with
/// `QueryError::ConnectionClosed`. Dropping the statement cancels its active
/// result stream and releases any prepared plan.
///
/// # Example
///
/// ```
/// use flightlink::adbc::Connection;
/// use flightlink::options::{OptionRegistry, OptionScope};
/// use flightlink::transport::MemoryTransport;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let connection = Connection::open(
///     MemoryTransport::new(),
///     "memory://local",
///     OptionRegistry::new(OptionScope::Connection),
/// )
/// .await?;
///
/// let mut stmt = connection.new_statement()?;
/// stmt.set_sql_query("SELECT 42")?;
/// stmt.set_option("adbc.rpc.result_queue_size", "2")?;
///
/// let (mut stream, _metadata) = stmt.execute_query().await?;
/// while let Some(batch) = stream.next().await? {
///     println!("{} rows", batch.num_rows());
/// }
/// stmt.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Statement {
    inner: QueryStatement,
    connection: Weak<ConnectionInner>,
}

impl Statement {
    pub(crate) fn new(connection: Weak<ConnectionInner>, inner: QueryStatement) -> Self {
        Self { inner, connection }
    }

    /// Resolve the owning connection for an operation that needs it.
    fn context(&self) -> Result<ExecutionContext, QueryError> {
        if self.inner.is_closed() {
            return Err(QueryError::StatementClosed);
        }
        let connection = self
            .connection
            .upgrade()
            .ok_or(QueryError::ConnectionClosed)?;
        connection
            .session()
            .validate_ready()
            .map_err(|_| QueryError::ConnectionClosed)?;
        Ok(connection.execution_context())
    }

    fn live_connection(&self) -> Option<Arc<ConnectionInner>> {
        self.connection
            .upgrade()
            .filter(|connection| !connection.session().is_closed())
    }

    /// Get the SQL text.
    pub fn sql(&self) -> Option<&str> {
        self.inner.sql()
    }

    /// Current state.
    pub fn state(&self) -> StatementState {
        self.inner.state()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Set the query text.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidState` once executed (until `reset`).
    pub fn set_sql_query(&mut self, sql: impl Into<String>) -> Result<(), QueryError> {
        self.inner.set_sql_query(sql)
    }

    /// Set a statement option. Statement values override connection values.
    pub fn set_option(&mut self, key: &str, value: impl Into<String>) -> Result<(), QueryError> {
        self.inner.set_option(key, value)
    }

    /// Set several statement options.
    pub fn set_options<I, K, V>(&mut self, options: I) -> Result<(), QueryError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        self.inner.set_options(options)
    }

    /// Get a statement option.
    pub fn get_option(&self, key: &str) -> Option<&str> {
        self.inner.get_option(key)
    }

    /// Bind a parameter at the given index (0-based).
    pub fn bind<T: Into<Parameter>>(&mut self, index: usize, value: T) -> Result<(), QueryError> {
        self.inner.bind(index, value)
    }

    /// Bind multiple parameters.
    pub fn bind_all<T: Into<Parameter> + Clone>(&mut self, params: &[T]) -> Result<(), QueryError> {
        self.inner.bind_all(params)
    }

    /// Clear all bound parameters.
    pub fn clear_parameters(&mut self) -> Result<(), QueryError> {
        self.inner.clear_parameters()
    }

    /// Parameter schema of the prepared plan, if prepared.
    pub fn parameter_schema(&self) -> Option<SchemaRef> {
        self.inner.parameter_schema()
    }

    /// Prepare the current query text.
    pub async fn prepare(&mut self) -> Result<SchemaRef, QueryError> {
        let ctx = self.context()?;
        self.inner.prepare(&ctx).await
    }

    /// Execute and hand back the result stream.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::ConnectionClosed` if the connection is gone, and
    /// everything [`QueryStatement::execute_query`] returns.
    pub async fn execute_query(&mut self) -> Result<(ResultStream, QueryMetadata), QueryError> {
        let ctx = self.context()?;
        self.inner.execute_query(&ctx).await
    }

    /// Execute and return the affected row count.
    pub async fn execute_update(&mut self) -> Result<i64, QueryError> {
        let ctx = self.context()?;
        self.inner.execute_update(&ctx).await
    }

    /// Cancel the active result stream. Returns `true` if one was active.
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    /// Cancel any active stream and return to `QueryBound`.
    pub fn reset(&mut self) -> Result<(), QueryError> {
        self.inner.reset()
    }

    /// Forget the active stream without cancelling it.
    pub(crate) fn detach(&mut self) {
        self.inner.detach();
    }

    /// Close the statement. Idempotent.
    pub async fn close(&mut self) -> Result<(), QueryError> {
        if self.inner.is_closed() {
            return Ok(());
        }
        match self.live_connection() {
            Some(connection) => {
                let ctx = connection.execution_context();
                self.inner.close(&ctx).await
            }
            None => {
                self.inner.abandon();
                Ok(())
            }
        }
    }

    pub(crate) fn close_now(&mut self) {
        if self.inner.is_closed() {
            return;
        }
        if self.live_connection().is_some() {
            self.inner.close_now();
        } else {
            self.inner.abandon();
        }
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        self.close_now();
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("inner", &self.inner)
            .field("connection_alive", &self.live_connection().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::adbc::Connection;
    use crate::error::QueryError;
    use crate::options::{OptionRegistry, OptionScope};
    use crate::query::StatementState;
    use crate::transport::MemoryTransport;

    async fn connect(transport: MemoryTransport) -> Connection {
        Connection::open(
            transport,
            "memory://statement",
            OptionRegistry::new(OptionScope::Connection),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_statement_after_connection_close() {
        let connection = connect(MemoryTransport::new()).await;
        let mut stmt = connection.create_statement("SELECT 1").unwrap();

        connection.close().await.unwrap();
        connection.close().await.unwrap();

        assert!(matches!(
            stmt.execute_query().await,
            Err(QueryError::ConnectionClosed)
        ));
        stmt.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_statement_after_connection_drop() {
        let connection = connect(MemoryTransport::new()).await;
        let mut stmt = connection.create_statement("SELECT 1").unwrap();
        drop(connection);

        assert!(matches!(
            stmt.execute_update().await,
            Err(QueryError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_closed_statement_takes_precedence() {
        let connection = connect(MemoryTransport::new()).await;
        let mut stmt = connection.create_statement("SELECT 1").unwrap();
        stmt.close().await.unwrap();
        connection.close().await.unwrap();

        assert!(matches!(
            stmt.execute_query().await,
            Err(QueryError::StatementClosed)
        ));
    }

    #[tokio::test]
    async fn test_connection_defaults_flow_into_requests() {
        let transport = MemoryTransport::new();
        let probe = transport.probe();
        let connection = connect(transport).await;
        connection.set_option("fetch_size", "3").unwrap();

        let mut stmt = connection.create_statement("SELECT 1").unwrap();
        stmt.set_option("fetch_size", "2").unwrap();
        stmt.set_option("timeout_query", "5000").unwrap();
        let (stream, _) = stmt.execute_query().await.unwrap();
        stream.fetch_all().await.unwrap();

        let request = probe.last_request().unwrap();
        assert_eq!(request.option("fetch_size"), Some("2"));
        assert_eq!(request.option("timeout_query"), Some("5000"));
        assert_eq!(stmt.state(), StatementState::Exhausted);
    }

    #[tokio::test]
    async fn test_drop_cancels_stream() {
        let connection = connect(MemoryTransport::new()).await;
        let mut stmt = connection.create_statement("SELECT 3").unwrap();
        let (mut stream, _) = stmt.execute_query().await.unwrap();

        drop(stmt);
        assert_eq!(
            stream.next().await.unwrap_err(),
            crate::error::StreamError::Cancelled
        );
    }

    #[tokio::test]
    async fn test_prepare_through_connection() {
        let transport = MemoryTransport::new();
        let probe = transport.probe();
        let connection = connect(transport).await;

        let mut stmt = connection.create_statement("SELECT 9").unwrap();
        let schema = stmt.prepare().await.unwrap();
        assert_eq!(schema.fields().len(), 0);

        stmt.close().await.unwrap();
        assert_eq!(probe.prepared_counts(), (1, 1));
    }
}
