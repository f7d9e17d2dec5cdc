//! Statement state machine and execution.
//!
//! This module provides the transport-level `Statement`: query text, bound
//! parameters, statement-scope options and an optional prepared plan. It is
//! executed against an [`ExecutionContext`] that carries what the owning
//! connection contributes (option defaults, session, endpoint).

use crate::connection::session::Session;
use crate::error::{QueryError, TransportError};
use crate::options::{OptionKey, OptionRegistry, OptionScope, DEFAULT_CANCEL_TIMEOUT};
use crate::query::results::{
    QueryMetadata, ResultStream, StreamControl, StreamRegistration, StreamSettings, StreamStatus,
};
use crate::transport::{PreparedHandle, PreparedInfo, QueryRequest, QueryResult, TransportProtocol};
use arrow::datatypes::{Schema, SchemaRef};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Parameter value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    /// NULL value
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Float value
    Float(f64),
    /// String value
    String(String),
    /// Binary data
    Binary(Vec<u8>),
}

impl Parameter {
    /// Convert parameter to SQL literal string.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::ParameterBindingError` for NaN and infinite floats.
    pub fn to_sql_literal(&self) -> Result<String, QueryError> {
        match self {
            Parameter::Null => Ok("NULL".to_string()),
            Parameter::Boolean(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
            Parameter::Integer(i) => Ok(i.to_string()),
            Parameter::Float(f) => {
                if f.is_nan() || f.is_infinite() {
                    Err(QueryError::ParameterBindingError {
                        index: 0,
                        message: "NaN and Infinity are not supported".to_string(),
                    })
                } else {
                    Ok(f.to_string())
                }
            }
            Parameter::String(s) => Ok(format!("'{}'", s.replace('\'', "''"))),
            Parameter::Binary(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
                Ok(format!("X'{}'", hex))
            }
        }
    }
}

impl From<bool> for Parameter {
    fn from(value: bool) -> Self {
        Parameter::Boolean(value)
    }
}

impl From<i32> for Parameter {
    fn from(value: i32) -> Self {
        Parameter::Integer(value as i64)
    }
}

impl From<i64> for Parameter {
    fn from(value: i64) -> Self {
        Parameter::Integer(value)
    }
}

impl From<f64> for Parameter {
    fn from(value: f64) -> Self {
        Parameter::Float(value)
    }
}

impl From<String> for Parameter {
    fn from(value: String) -> Self {
        Parameter::String(value)
    }
}

impl From<&str> for Parameter {
    fn from(value: &str) -> Self {
        Parameter::String(value.to_string())
    }
}

impl From<Vec<u8>> for Parameter {
    fn from(value: Vec<u8>) -> Self {
        Parameter::Binary(value)
    }
}

impl<T: Into<Parameter>> From<Option<T>> for Parameter {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Parameter::Null)
    }
}

/// Statement lifecycle.
///
/// `Unbound -> QueryBound -> Executing -> Exhausted | Error`. Once executed,
/// the reported state follows the result stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    /// No query text yet
    Unbound,
    /// Query text set, ready to execute
    QueryBound,
    /// A result stream is active
    Executing,
    /// The result was fully consumed
    Exhausted,
    /// Execution or streaming failed, or the stream was cancelled
    Error,
}

impl StatementState {
    /// Whether query text, options and parameters may still change.
    pub fn is_mutable(&self) -> bool {
        matches!(self, StatementState::Unbound | StatementState::QueryBound)
    }
}

/// What the owning connection contributes to an execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Connection-scope options providing statement defaults
    pub connection_options: OptionRegistry,
    /// Session that tracks active streams
    pub session: Option<Arc<Session>>,
    /// Endpoint named in transport errors
    pub endpoint: String,
    /// Deadline for cancel and release round trips
    pub cancel_timeout: Duration,
}

impl ExecutionContext {
    /// Context with no connection defaults.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            connection_options: OptionRegistry::new(OptionScope::Connection),
            session: None,
            endpoint: endpoint.into(),
            cancel_timeout: DEFAULT_CANCEL_TIMEOUT,
        }
    }

    /// Use `options` as statement defaults.
    pub fn with_options(mut self, options: OptionRegistry) -> Self {
        self.connection_options = options;
        self
    }

    /// Register streams with `session`.
    pub fn with_session(mut self, session: Arc<Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Set the cancel/release deadline.
    pub fn with_cancel_timeout(mut self, cancel_timeout: Duration) -> Self {
        self.cancel_timeout = cancel_timeout;
        self
    }
}

/// Executable unit of query text, options and parameters.
pub struct Statement {
    transport: Arc<Mutex<dyn TransportProtocol>>,
    sql: Option<String>,
    parameters: Vec<Option<Parameter>>,
    options: OptionRegistry,
    state: StatementState,
    active: Option<Arc<StreamControl>>,
    prepared: Option<PreparedInfo>,
    stale_plans: Vec<PreparedHandle>,
    closed: bool,
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql)
            .field("parameters", &self.parameters.len())
            .field("options", &self.options)
            .field("state", &self.state())
            .field("prepared", &self.prepared.as_ref().map(|p| p.handle))
            .field("closed", &self.closed)
            .finish()
    }
}

impl Statement {
    /// Create an unbound statement.
    pub fn new(transport: Arc<Mutex<dyn TransportProtocol>>) -> Self {
        Self {
            transport,
            sql: None,
            parameters: Vec::new(),
            options: OptionRegistry::new(OptionScope::Statement),
            state: StatementState::Unbound,
            active: None,
            prepared: None,
            stale_plans: Vec::new(),
            closed: false,
        }
    }

    /// Create a statement bound to `sql`.
    pub fn with_sql(transport: Arc<Mutex<dyn TransportProtocol>>, sql: impl Into<String>) -> Self {
        let mut statement = Self::new(transport);
        statement.sql = Some(sql.into());
        statement.state = StatementState::QueryBound;
        statement
    }

    /// Get the SQL text.
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    /// Current state. While executing, this follows the result stream.
    pub fn state(&self) -> StatementState {
        if self.state != StatementState::Executing {
            return self.state;
        }
        match self.active.as_ref().map(|control| control.status()) {
            Some(StreamStatus::Active) | None => StatementState::Executing,
            Some(StreamStatus::Exhausted) => StatementState::Exhausted,
            Some(StreamStatus::Failed) | Some(StreamStatus::Cancelled) => StatementState::Error,
        }
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Statement-scope options.
    pub fn options(&self) -> &OptionRegistry {
        &self.options
    }

    fn ensure_open(&self) -> Result<(), QueryError> {
        if self.closed {
            Err(QueryError::StatementClosed)
        } else {
            Ok(())
        }
    }

    fn ensure_mutable(&self, operation: &str) -> Result<(), QueryError> {
        self.ensure_open()?;
        let state = self.state();
        if state.is_mutable() {
            Ok(())
        } else {
            Err(QueryError::InvalidState(format!(
                "Cannot {} in state {:?}; call reset() first",
                operation, state
            )))
        }
    }

    /// Set the query text. Invalidates a prepared plan.
    pub fn set_sql_query(&mut self, sql: impl Into<String>) -> Result<(), QueryError> {
        self.ensure_mutable("set query text")?;
        if let Some(prepared) = self.prepared.take() {
            self.stale_plans.push(prepared.handle);
        }
        self.sql = Some(sql.into());
        self.state = StatementState::QueryBound;
        Ok(())
    }

    /// Set a statement option.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Option` for an unknown or connection-only key and
    /// `QueryError::InvalidState` once the statement has executed.
    pub fn set_option(&mut self, key: &str, value: impl Into<String>) -> Result<(), QueryError> {
        self.ensure_mutable("set options")?;
        self.options.set(key, value)?;
        Ok(())
    }

    /// Set several statement options.
    pub fn set_options<I, K, V>(&mut self, options: I) -> Result<(), QueryError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        self.ensure_mutable("set options")?;
        self.options.extend(options)?;
        Ok(())
    }

    /// Get a statement option by name or alias.
    pub fn get_option(&self, key: &str) -> Option<&str> {
        OptionKey::parse(key).and_then(|key| self.options.get(key))
    }

    /// Bind a parameter at the given index.
    ///
    /// # Arguments
    /// * `index` - Parameter index (0-based)
    /// * `value` - Parameter value
    ///
    /// # Errors
    /// Returns `QueryError::InvalidState` once the statement has executed.
    pub fn bind<T: Into<Parameter>>(&mut self, index: usize, value: T) -> Result<(), QueryError> {
        self.ensure_mutable("bind parameters")?;
        if index >= self.parameters.len() {
            self.parameters.resize(index + 1, None);
        }

        self.parameters[index] = Some(value.into());
        Ok(())
    }

    /// Bind multiple parameters.
    pub fn bind_all<T: Into<Parameter> + Clone>(&mut self, params: &[T]) -> Result<(), QueryError> {
        for (index, param) in params.iter().enumerate() {
            self.bind(index, param.clone())?;
        }
        Ok(())
    }

    /// Clear all bound parameters.
    ///
    /// # Errors
    /// Returns `QueryError::InvalidState` once the statement has executed.
    pub fn clear_parameters(&mut self) -> Result<(), QueryError> {
        self.ensure_mutable("clear parameters")?;
        self.parameters.clear();
        Ok(())
    }

    /// Parameter schema of the prepared plan, if prepared.
    pub fn parameter_schema(&self) -> Option<SchemaRef> {
        self.prepared
            .as_ref()
            .map(|prepared| Arc::clone(&prepared.parameter_schema))
    }

    /// Build the final SQL with parameters substituted.
    fn build_sql(&self) -> Result<String, QueryError> {
        let sql = self
            .sql
            .as_deref()
            .ok_or_else(|| QueryError::InvalidState("No query text set".to_string()))?;

        let mut out = String::with_capacity(sql.len());
        let mut param_index = 0;
        let mut in_string = false;

        for c in sql.chars() {
            if c == '\'' {
                in_string = !in_string;
            }
            if c != '?' || in_string {
                out.push(c);
                continue;
            }

            let param = self
                .parameters
                .get(param_index)
                .and_then(|p| p.as_ref())
                .ok_or_else(|| QueryError::ParameterBindingError {
                    index: param_index,
                    message: "Parameter not bound".to_string(),
                })?;

            let literal = param.to_sql_literal().map_err(|e| match e {
                QueryError::ParameterBindingError { message, .. } => {
                    QueryError::ParameterBindingError {
                        index: param_index,
                        message,
                    }
                }
                other => other,
            })?;
            out.push_str(&literal);
            param_index += 1;
        }

        Ok(out)
    }

    async fn release_stale_plans(&mut self, ctx: &ExecutionContext) {
        for handle in std::mem::take(&mut self.stale_plans) {
            let transport = Arc::clone(&self.transport);
            let release = async move { transport.lock().await.close_prepared(handle).await };
            match timeout(ctx.cancel_timeout, release).await {
                Ok(Ok(())) => debug!(handle = handle.as_u64(), "released prepared plan"),
                Ok(Err(e)) => warn!(handle = handle.as_u64(), error = %e, "failed to release prepared plan"),
                Err(_) => warn!(handle = handle.as_u64(), "timed out releasing prepared plan"),
            }
        }
    }

    /// Ask the transport for a prepared plan of the current query text.
    ///
    /// # Returns
    ///
    /// The parameter schema of the plan.
    pub async fn prepare(&mut self, ctx: &ExecutionContext) -> Result<SchemaRef, QueryError> {
        self.ensure_open()?;
        if self.state() != StatementState::QueryBound {
            return Err(QueryError::InvalidState(format!(
                "Cannot prepare in state {:?}",
                self.state()
            )));
        }

        if let Some(prepared) = self.prepared.take() {
            self.stale_plans.push(prepared.handle);
        }
        self.release_stale_plans(ctx).await;

        let sql = self.sql.clone().unwrap_or_default();
        let transport = Arc::clone(&self.transport);
        let prepared = async move { transport.lock().await.prepare(&sql).await }
            .await
            .map_err(|source| transport_error("prepare", ctx, source))?;

        debug!(
            handle = prepared.handle.as_u64(),
            parameters = prepared.parameter_schema.fields().len(),
            "prepared statement"
        );
        let schema = Arc::clone(&prepared.parameter_schema);
        self.prepared = Some(prepared);
        Ok(schema)
    }

    /// Execute the statement and hand back its result stream.
    ///
    /// Options are resolved (statement over connection) and validated first;
    /// then exactly one transport `execute` call is made, bounded by
    /// `timeout_query`. A statement that returns a row count yields an
    /// already-exhausted stream with an empty schema and
    /// `QueryMetadata::rows_affected` set.
    ///
    /// # Errors
    ///
    /// - `QueryError::InvalidState` unless the state is `QueryBound`
    /// - `QueryError::Option` for a malformed option value
    /// - `QueryError::ParameterBindingError` for missing or invalid parameters
    /// - `QueryError::Timeout` when `timeout_query` elapses
    /// - `QueryError::Transport` when the transport call fails
    pub async fn execute_query(
        &mut self,
        ctx: &ExecutionContext,
    ) -> Result<(ResultStream, QueryMetadata), QueryError> {
        self.ensure_open()?;
        match self.state() {
            StatementState::QueryBound => {}
            StatementState::Unbound => {
                return Err(QueryError::InvalidState("No query text set".to_string()))
            }
            state => {
                return Err(QueryError::InvalidState(format!(
                    "Statement already executed (state {:?}); call reset() first",
                    state
                )))
            }
        }

        let resolved = self.options.resolve(&ctx.connection_options);
        resolved.validate()?;
        let settings = StreamSettings {
            queue_size: resolved.queue_size()?,
            fetch_size: resolved.fetch_size()?,
            fetch_timeout: resolved.timeout_fetch()?,
            cancel_timeout: ctx.cancel_timeout,
        };
        let query_timeout = resolved.timeout_query()?;

        let sql = self.build_sql()?;
        self.release_stale_plans(ctx).await;

        let mut request = QueryRequest::new(sql).with_options(resolved.to_wire());
        if let Some(prepared) = &self.prepared {
            request = request.with_prepared(prepared.handle);
        }

        let started = Instant::now();
        let transport = Arc::clone(&self.transport);
        let call = async move { transport.lock().await.execute(&request).await };
        let outcome = match query_timeout {
            Some(limit) => match timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.state = StatementState::Error;
                    return Err(QueryError::Timeout {
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => call.await,
        };

        let result = match outcome {
            Ok(result) => result,
            Err(source) => {
                self.state = StatementState::Error;
                return Err(transport_error("execute", ctx, source));
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if let Some(session) = &ctx.session {
            session.increment_query_count();
        }

        match result {
            QueryResult::ResultSet {
                handle,
                schema,
                total_rows,
            } => {
                let control = Arc::new(match &ctx.session {
                    Some(session) => StreamControl::child_of(session.cancel_token()),
                    None => StreamControl::new(),
                });
                let registration = ctx
                    .session
                    .as_ref()
                    .map(|session| StreamRegistration::new(session, &control));
                let stream = ResultStream::spawn(
                    Arc::clone(&self.transport),
                    handle,
                    Arc::clone(&schema),
                    settings,
                    Arc::clone(&control),
                    registration,
                );
                debug!(
                    handle = handle.as_u64(),
                    columns = schema.fields().len(),
                    elapsed_ms,
                    "query returned a result set"
                );

                self.active = Some(control);
                self.state = StatementState::Executing;
                let metadata = QueryMetadata::new(schema, total_rows).with_execution_time(elapsed_ms);
                Ok((stream, metadata))
            }
            QueryResult::RowCount { count } => {
                debug!(count, elapsed_ms, "query returned a row count");
                self.active = None;
                self.state = StatementState::Exhausted;
                let metadata = QueryMetadata::for_row_count(count).with_execution_time(elapsed_ms);
                Ok((ResultStream::empty(Arc::new(Schema::empty())), metadata))
            }
        }
    }

    /// Execute and return the row count.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::UnexpectedResultSet` for row-returning queries;
    /// the result stream is released first.
    pub async fn execute_update(&mut self, ctx: &ExecutionContext) -> Result<i64, QueryError> {
        let (mut stream, metadata) = self.execute_query(ctx).await?;
        match metadata.rows_affected {
            Some(count) => Ok(count),
            None => {
                let _ = stream.close().await;
                Err(QueryError::UnexpectedResultSet)
            }
        }
    }

    /// Cancel the active result stream. Returns `true` if one was active.
    pub fn cancel(&self) -> bool {
        match &self.active {
            Some(control) => control.cancel(),
            None => false,
        }
    }

    /// Reset the statement for re-execution.
    ///
    /// Cancels an active stream and returns to `QueryBound` (or `Unbound`).
    /// Query text, parameters and options are kept.
    pub fn reset(&mut self) -> Result<(), QueryError> {
        self.ensure_open()?;
        if self.cancel() {
            debug!("reset cancelled the active result stream");
        }
        self.active = None;
        self.state = if self.sql.is_some() {
            StatementState::QueryBound
        } else {
            StatementState::Unbound
        };
        Ok(())
    }

    /// Stop tracking the active stream; it keeps running on its own.
    pub(crate) fn detach(&mut self) {
        self.active = None;
    }

    /// Close the statement: cancel the active stream and release prepared
    /// plans. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the first failure to release a prepared plan; the statement is
    /// closed regardless.
    pub async fn close(&mut self, ctx: &ExecutionContext) -> Result<(), QueryError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.cancel();
        self.active = None;

        let mut first_error = None;
        if let Some(prepared) = self.prepared.take() {
            let transport = Arc::clone(&self.transport);
            let handle = prepared.handle;
            let release = async move { transport.lock().await.close_prepared(handle).await };
            let outcome = match timeout(ctx.cancel_timeout, release).await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::Timeout {
                    timeout_ms: ctx.cancel_timeout.as_millis() as u64,
                }),
            };
            if let Err(source) = outcome {
                warn!(handle = handle.as_u64(), error = %source, "failed to release prepared plan");
                first_error = Some(transport_error("close_prepared", ctx, source));
            }
        }
        self.release_stale_plans(ctx).await;

        debug!("statement closed");
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Close without awaiting: cancel the stream and schedule prepared plan
    /// release on the current runtime, if there is one.
    pub(crate) fn close_now(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel();
        self.active = None;

        let mut handles = std::mem::take(&mut self.stale_plans);
        handles.extend(self.prepared.take().map(|p| p.handle));
        if handles.is_empty() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let transport = Arc::clone(&self.transport);
                runtime.spawn(async move {
                    let mut transport = transport.lock().await;
                    for handle in handles {
                        if let Err(e) = transport.close_prepared(handle).await {
                            debug!(handle = handle.as_u64(), error = %e, "prepared plan release on drop failed");
                        }
                    }
                });
            }
            Err(_) => warn!(
                plans = handles.len(),
                "no runtime available; prepared plans left for connection close"
            ),
        }
    }

    /// Mark closed without any transport traffic, for a statement whose
    /// connection is already gone.
    pub(crate) fn abandon(&mut self) {
        self.closed = true;
        self.cancel();
        self.active = None;
        self.prepared = None;
        self.stale_plans.clear();
    }
}

fn transport_error(
    operation: &'static str,
    ctx: &ExecutionContext,
    source: TransportError,
) -> QueryError {
    QueryError::Transport {
        operation,
        endpoint: ctx.endpoint.clone(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::auth::Credentials;
    use crate::connection::params::Endpoint;
    use crate::error::OptionError;
    use crate::transport::{
        FetchResponse, MemoryTransport, SessionInfo, StreamHandle, TableRef, TransportConfig,
        TransportProbe,
    };
    use async_trait::async_trait;
    use mockall::mock;

    mock! {
        pub Transport {}

        #[async_trait]
        impl TransportProtocol for Transport {
            async fn connect(&mut self, config: &TransportConfig) -> Result<(), TransportError>;
            async fn authenticate(&mut self, credentials: &Credentials) -> Result<SessionInfo, TransportError>;
            async fn execute(&mut self, request: &QueryRequest) -> Result<QueryResult, TransportError>;
            async fn fetch(&mut self, handle: StreamHandle, max_batches: usize) -> Result<FetchResponse, TransportError>;
            async fn cancel(&mut self, handle: StreamHandle) -> Result<(), TransportError>;
            async fn close_stream(&mut self, handle: StreamHandle) -> Result<(), TransportError>;
            async fn prepare(&mut self, sql: &str) -> Result<PreparedInfo, TransportError>;
            async fn close_prepared(&mut self, handle: PreparedHandle) -> Result<(), TransportError>;
            async fn begin_transaction(&mut self) -> Result<(), TransportError>;
            async fn commit(&mut self) -> Result<(), TransportError>;
            async fn rollback(&mut self) -> Result<(), TransportError>;
            async fn table_types(&mut self) -> Result<Vec<String>, TransportError>;
            async fn table_schema(&mut self, table: &TableRef) -> Result<SchemaRef, TransportError>;
            async fn close(&mut self) -> Result<(), TransportError>;
            fn is_connected(&self) -> bool;
        }
    }

    fn shared(mock: MockTransport) -> Arc<Mutex<dyn TransportProtocol>> {
        Arc::new(Mutex::new(mock))
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("grpc://db:32010")
    }

    async fn memory(transport: MemoryTransport) -> (Arc<Mutex<dyn TransportProtocol>>, TransportProbe) {
        let probe = transport.probe();
        let mut transport = transport;
        let endpoint: Endpoint = "memory://statement-test".parse().unwrap();
        transport.connect(&TransportConfig::new(endpoint)).await.unwrap();
        transport.authenticate(&Credentials::none()).await.unwrap();
        (Arc::new(Mutex::new(transport)), probe)
    }

    #[test]
    fn test_parameter_to_sql_literal() {
        assert_eq!(Parameter::Null.to_sql_literal().unwrap(), "NULL");
        assert_eq!(Parameter::Boolean(true).to_sql_literal().unwrap(), "TRUE");
        assert_eq!(Parameter::Integer(42).to_sql_literal().unwrap(), "42");
        assert_eq!(Parameter::Float(2.5).to_sql_literal().unwrap(), "2.5");
        assert_eq!(
            Parameter::String("O'Reilly".to_string())
                .to_sql_literal()
                .unwrap(),
            "'O''Reilly'"
        );
        assert_eq!(
            Parameter::Binary(vec![0xde, 0xad]).to_sql_literal().unwrap(),
            "X'DEAD'"
        );
        assert!(Parameter::Float(f64::NAN).to_sql_literal().is_err());
    }

    #[test]
    fn test_parameter_conversions() {
        assert_eq!(Parameter::from(true), Parameter::Boolean(true));
        assert_eq!(Parameter::from(7i32), Parameter::Integer(7));
        assert_eq!(Parameter::from("x"), Parameter::String("x".to_string()));
        assert_eq!(Parameter::from(None::<i64>), Parameter::Null);
        assert_eq!(Parameter::from(Some(3i64)), Parameter::Integer(3));
    }

    #[test]
    fn test_build_sql_substitutes_placeholders() {
        let mut stmt = Statement::with_sql(
            shared(MockTransport::new()),
            "SELECT * FROM users WHERE age > ? AND name = ? AND note = '?'",
        );
        stmt.bind(0, 18).unwrap();
        stmt.bind(1, "John").unwrap();

        assert_eq!(
            stmt.build_sql().unwrap(),
            "SELECT * FROM users WHERE age > 18 AND name = 'John' AND note = '?'"
        );
    }

    #[test]
    fn test_build_sql_reports_parameter_index() {
        let mut stmt = Statement::with_sql(shared(MockTransport::new()), "SELECT ?, ?");
        stmt.bind(0, 1).unwrap();
        assert!(matches!(
            stmt.build_sql(),
            Err(QueryError::ParameterBindingError { index: 1, .. })
        ));

        stmt.bind(1, f64::INFINITY).unwrap();
        assert!(matches!(
            stmt.build_sql(),
            Err(QueryError::ParameterBindingError { index: 1, .. })
        ));
    }

    #[test]
    fn test_state_transitions_before_execute() {
        let mut stmt = Statement::new(shared(MockTransport::new()));
        assert_eq!(stmt.state(), StatementState::Unbound);

        stmt.set_sql_query("SELECT 1").unwrap();
        assert_eq!(stmt.state(), StatementState::QueryBound);
        assert_eq!(stmt.sql(), Some("SELECT 1"));
    }

    #[test]
    fn test_set_option_scope() {
        let mut stmt = Statement::new(shared(MockTransport::new()));
        stmt.set_option("adbc.rpc.result_queue_size", "4").unwrap();
        assert_eq!(stmt.get_option("queue_size"), Some("4"));

        let err = stmt.set_option("password", "pw").unwrap_err();
        assert!(matches!(
            err,
            QueryError::Option(OptionError::InvalidOption { .. })
        ));
    }

    #[tokio::test]
    async fn test_execute_without_query() {
        let mut stmt = Statement::new(shared(MockTransport::new()));
        let result = stmt.execute_query(&ctx()).await;
        assert!(matches!(result, Err(QueryError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_execute_row_count_propagates_options() {
        let mut mock = MockTransport::new();
        mock.expect_execute()
            .withf(|request| {
                request.sql == "DELETE FROM t"
                    && request.option("queue_size") == Some("2")
                    && request.option("timeout_fetch") == Some("10")
                    && request.option("fetch_size") == Some("3")
                    && request.option("auth_token").is_none()
            })
            .times(1)
            .returning(|_| Ok(QueryResult::row_count(4)));

        let mut connection_options = OptionRegistry::new(OptionScope::Connection);
        connection_options.set("fetch_size", "3").unwrap();
        connection_options.set("auth_token", "secret").unwrap();
        let ctx = ctx().with_options(connection_options);

        let mut stmt = Statement::with_sql(shared(mock), "DELETE FROM t");
        stmt.set_option("queue_size", "2").unwrap();
        stmt.set_option("timeout_fetch", "10").unwrap();

        let (mut stream, metadata) = stmt.execute_query(&ctx).await.unwrap();
        assert_eq!(metadata.rows_affected, Some(4));
        assert!(stream.next().await.unwrap().is_none());
        assert_eq!(stmt.state(), StatementState::Exhausted);
    }

    #[tokio::test]
    async fn test_invalid_option_value_fails_before_transport() {
        let mut mock = MockTransport::new();
        mock.expect_execute().times(0);

        let mut stmt = Statement::with_sql(shared(mock), "SELECT 1");
        stmt.set_option("queue_size", "abc").unwrap();

        let err = stmt.execute_query(&ctx()).await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::Option(OptionError::InvalidOptionValue { .. })
        ));
        assert_eq!(stmt.state(), StatementState::QueryBound);

        stmt.set_option("queue_size", "2").unwrap();
        stmt.set_option("ingest_mode", "sideways").unwrap();
        let err = stmt.execute_query(&ctx()).await.unwrap_err();
        match err {
            QueryError::Option(OptionError::InvalidOptionValue { key, .. }) => {
                assert_eq!(key, "ingest_mode")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_double_execution_error() {
        let mut mock = MockTransport::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Ok(QueryResult::row_count(1)));

        let mut stmt = Statement::with_sql(shared(mock), "UPDATE users SET name = 'test'");
        stmt.execute_update(&ctx()).await.unwrap();

        let result = stmt.execute_query(&ctx()).await;
        assert!(matches!(result, Err(QueryError::InvalidState(_))));
        assert!(matches!(
            stmt.set_option("fetch_size", "2"),
            Err(QueryError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_parameters_requires_mutable_state() {
        let mut mock = MockTransport::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Ok(QueryResult::row_count(1)));

        let mut stmt = Statement::with_sql(shared(mock), "UPDATE users SET name = ?");
        stmt.bind(0, "alice").unwrap();
        stmt.execute_update(&ctx()).await.unwrap();

        assert!(matches!(
            stmt.clear_parameters(),
            Err(QueryError::InvalidState(_))
        ));
        assert_eq!(
            stmt.build_sql().unwrap(),
            "UPDATE users SET name = 'alice'"
        );

        stmt.reset().unwrap();
        stmt.clear_parameters().unwrap();
        assert!(matches!(
            stmt.build_sql(),
            Err(QueryError::ParameterBindingError { .. })
        ));

        stmt.close(&ctx()).await.unwrap();
        assert!(matches!(
            stmt.clear_parameters(),
            Err(QueryError::StatementClosed)
        ));
    }

    #[tokio::test]
    async fn test_reset_allows_reexecution() {
        let mut mock = MockTransport::new();
        mock.expect_execute()
            .times(2)
            .returning(|_| Ok(QueryResult::row_count(1)));

        let mut stmt = Statement::with_sql(shared(mock), "UPDATE users SET name = 'test'");
        stmt.execute_update(&ctx()).await.unwrap();

        stmt.reset().unwrap();
        assert_eq!(stmt.state(), StatementState::QueryBound);
        assert_eq!(stmt.execute_update(&ctx()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_moves_to_error() {
        let mut mock = MockTransport::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Err(TransportError::Unreachable("connection reset".to_string())));

        let mut stmt = Statement::with_sql(shared(mock), "SELECT 1");
        let err = stmt.execute_query(&ctx()).await.unwrap_err();

        match err {
            QueryError::Transport {
                operation,
                endpoint,
                source,
            } => {
                assert_eq!(operation, "execute");
                assert_eq!(endpoint, "grpc://db:32010");
                assert!(matches!(source, TransportError::Unreachable(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(stmt.state(), StatementState::Error);
    }

    #[tokio::test]
    async fn test_state_follows_stream() {
        let (transport, probe) = memory(MemoryTransport::new()).await;
        let mut stmt = Statement::with_sql(transport, "SELECT 1");

        let (mut stream, metadata) = stmt.execute_query(&ctx()).await.unwrap();
        assert_eq!(metadata.column_count, 1);
        assert_eq!(metadata.total_rows, Some(1));
        assert_eq!(stmt.state(), StatementState::Executing);

        assert!(stream.next().await.unwrap().is_some());
        assert!(stream.next().await.unwrap().is_none());
        assert_eq!(stmt.state(), StatementState::Exhausted);

        stream.close().await.unwrap();
        assert_eq!(probe.open_stream_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_moves_to_error() {
        let (transport, _probe) = memory(MemoryTransport::new()).await;
        let mut stmt = Statement::with_sql(transport, "SELECT 1");

        let (mut stream, _) = stmt.execute_query(&ctx()).await.unwrap();
        assert!(stmt.cancel());
        assert_eq!(stmt.state(), StatementState::Error);
        assert!(stream.next().await.is_err());
    }

    #[tokio::test]
    async fn test_reset_cancels_active_stream() {
        let (transport, _probe) = memory(MemoryTransport::new()).await;
        let mut stmt = Statement::with_sql(transport, "SELECT 5");

        let (mut stream, _) = stmt.execute_query(&ctx()).await.unwrap();
        stmt.reset().unwrap();
        assert_eq!(
            stream.next().await.unwrap_err(),
            crate::error::StreamError::Cancelled
        );
        assert_eq!(stmt.state(), StatementState::QueryBound);
    }

    #[tokio::test]
    async fn test_execute_update_rejects_result_set() {
        let (transport, probe) = memory(MemoryTransport::new()).await;
        let mut stmt = Statement::with_sql(transport, "SELECT 1");

        let err = stmt.execute_update(&ctx()).await.unwrap_err();
        assert!(matches!(err, QueryError::UnexpectedResultSet));
        assert_eq!(probe.open_stream_count(), 0);
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let (transport, _probe) = memory(
            MemoryTransport::new().with_execute_latency(Duration::from_millis(200)),
        )
        .await;
        let mut stmt = Statement::with_sql(transport, "SELECT 1");
        stmt.set_option("timeout_query", "10").unwrap();

        let err = stmt.execute_query(&ctx()).await.unwrap_err();
        assert!(matches!(err, QueryError::Timeout { timeout_ms: 10 }));
        assert_eq!(stmt.state(), StatementState::Error);
    }

    #[tokio::test]
    async fn test_prepare_and_requery_releases_plan() {
        let (transport, probe) =
            memory(MemoryTransport::new().with_row_count("DELETE FROM t WHERE id = 1", 1)).await;
        let mut stmt = Statement::with_sql(transport, "DELETE FROM t WHERE id = ?");

        let schema = stmt.prepare(&ctx()).await.unwrap();
        assert_eq!(schema.fields().len(), 1);
        assert!(stmt.parameter_schema().is_some());

        stmt.bind(0, 1).unwrap();
        assert_eq!(stmt.execute_update(&ctx()).await.unwrap(), 1);
        assert!(probe.last_request().unwrap().prepared.is_some());

        stmt.reset().unwrap();
        stmt.set_sql_query("SELECT 2").unwrap();
        assert!(stmt.parameter_schema().is_none());
        let (stream, _) = stmt.execute_query(&ctx()).await.unwrap();
        assert_eq!(stream.fetch_all().await.unwrap().len(), 1);
        assert_eq!(probe.prepared_counts(), (1, 1));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut mock = MockTransport::new();
        mock.expect_execute().times(0);

        let mut stmt = Statement::with_sql(shared(mock), "SELECT 1");
        stmt.close(&ctx()).await.unwrap();
        stmt.close(&ctx()).await.unwrap();
        assert!(stmt.is_closed());

        assert!(matches!(
            stmt.execute_query(&ctx()).await,
            Err(QueryError::StatementClosed)
        ));
        assert!(matches!(
            stmt.set_sql_query("SELECT 2"),
            Err(QueryError::StatementClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_releases_prepared_plan() {
        let (transport, probe) = memory(MemoryTransport::new()).await;
        let mut stmt = Statement::with_sql(transport, "SELECT 1");
        stmt.prepare(&ctx()).await.unwrap();

        stmt.close(&ctx()).await.unwrap();
        assert_eq!(probe.prepared_counts(), (1, 1));
    }
}
