//! In-process transport answering queries from registered results.
//!
//! `MemoryTransport` implements [`TransportProtocol`] without any network I/O.
//! Results are registered per query text; `SELECT <integer>` is answered
//! without registration. A [`TransportProbe`] records what the transport saw
//! so tests can assert on option propagation and resource release.

use super::messages::{
    FetchResponse, PreparedHandle, PreparedInfo, QueryRequest, QueryResult, SessionInfo,
    StreamHandle, TableRef,
};
use super::protocol::{TransportConfig, TransportProtocol};
use crate::arrow_conversion::json_to_batches;
use crate::connection::auth::Credentials;
use crate::error::{ConversionError, TransportError};
use arrow::array::Int64Array;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
enum CannedResult {
    Batches {
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    },
    RowCount(i64),
    Error(TransportError),
}

/// Catalog name reported for every registered table.
pub const MEMORY_CATALOG: &str = "memory";

const BUILTIN_TABLE_TYPES: [&str; 2] = ["TABLE", "VIEW"];

#[derive(Debug, Clone)]
struct CatalogTable {
    db_schema: String,
    name: String,
    table_type: String,
    schema: SchemaRef,
}

#[derive(Debug)]
struct OpenStream {
    pending: VecDeque<RecordBatch>,
    delivered: usize,
}

/// Shared record of the traffic a [`MemoryTransport`] has handled.
#[derive(Debug, Clone, Default)]
pub struct TransportProbe {
    state: Arc<Mutex<ProbeState>>,
}

#[derive(Debug, Default)]
struct ProbeState {
    requests: Vec<QueryRequest>,
    fetches: usize,
    cancels: Vec<StreamHandle>,
    closed_streams: Vec<StreamHandle>,
    open_streams: usize,
    prepared: usize,
    closed_prepared: usize,
    commits: usize,
    rollbacks: usize,
    closed: bool,
}

impl TransportProbe {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every request passed to `execute`, in order.
    pub fn requests(&self) -> Vec<QueryRequest> {
        self.lock().requests.clone()
    }

    /// The most recent request passed to `execute`.
    pub fn last_request(&self) -> Option<QueryRequest> {
        self.lock().requests.last().cloned()
    }

    /// Number of `execute` calls.
    pub fn execute_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Number of `fetch` calls.
    pub fn fetch_count(&self) -> usize {
        self.lock().fetches
    }

    /// Number of `cancel` calls.
    pub fn cancel_count(&self) -> usize {
        self.lock().cancels.len()
    }

    /// Number of streams released with `close_stream`.
    pub fn closed_stream_count(&self) -> usize {
        self.lock().closed_streams.len()
    }

    /// Streams created by `execute` and not yet released.
    pub fn open_stream_count(&self) -> usize {
        self.lock().open_streams
    }

    /// Number of prepared plans created and released.
    pub fn prepared_counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.prepared, state.closed_prepared)
    }

    /// Number of committed and rolled back transactions.
    pub fn transaction_counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.commits, state.rollbacks)
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// In-process [`TransportProtocol`] implementation.
///
/// # Example
///
/// ```
/// use flightlink::transport::{MemoryTransport, TransportProtocol};
///
/// let transport = MemoryTransport::new().with_row_count("DELETE FROM t", 3);
/// let probe = transport.probe();
/// assert_eq!(probe.execute_count(), 0);
/// ```
#[derive(Debug)]
pub struct MemoryTransport {
    results: HashMap<String, CannedResult>,
    required_token: Option<String>,
    unreachable: bool,
    connect_latency: Option<Duration>,
    execute_latency: Option<Duration>,
    fetch_latency: Option<Duration>,
    close_latency: Option<Duration>,
    fail_after: Option<usize>,
    tables: Vec<CatalogTable>,
    in_transaction: bool,
    connected: bool,
    authenticated: bool,
    next_handle: u64,
    streams: HashMap<StreamHandle, OpenStream>,
    prepared: HashMap<PreparedHandle, String>,
    probe: TransportProbe,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Create a transport with no registered results.
    pub fn new() -> Self {
        Self {
            results: HashMap::new(),
            required_token: None,
            unreachable: false,
            connect_latency: None,
            execute_latency: None,
            fetch_latency: None,
            close_latency: None,
            fail_after: None,
            tables: Vec::new(),
            in_transaction: false,
            connected: false,
            authenticated: false,
            next_handle: 1,
            streams: HashMap::new(),
            prepared: HashMap::new(),
            probe: TransportProbe::default(),
        }
    }

    /// Register a row-returning result.
    pub fn with_result(
        mut self,
        sql: impl AsRef<str>,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> Self {
        self.results
            .insert(normalize(sql.as_ref()), CannedResult::Batches { schema, batches });
        self
    }

    /// Register a row-returning result described as JSON columns and rows.
    ///
    /// # Errors
    ///
    /// Returns `ConversionError` if the JSON or its values are malformed.
    pub fn with_json_result(
        self,
        sql: impl AsRef<str>,
        json: &str,
        rows_per_batch: usize,
    ) -> Result<Self, ConversionError> {
        let (schema, batches) = json_to_batches(json, rows_per_batch)?;
        Ok(self.with_result(sql, schema, batches))
    }

    /// Register a row count result.
    pub fn with_row_count(mut self, sql: impl AsRef<str>, count: i64) -> Self {
        self.results
            .insert(normalize(sql.as_ref()), CannedResult::RowCount(count));
        self
    }

    /// Make `execute` of the query fail.
    pub fn with_error(mut self, sql: impl AsRef<str>, error: TransportError) -> Self {
        self.results
            .insert(normalize(sql.as_ref()), CannedResult::Error(error));
        self
    }

    /// Require a bearer token during authentication.
    pub fn with_required_token(mut self, token: impl Into<String>) -> Self {
        self.required_token = Some(token.into());
        self
    }

    /// Fail every `connect` as unreachable.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Delay every `connect`.
    pub fn with_connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = Some(latency);
        self
    }

    /// Delay every `execute`.
    pub fn with_execute_latency(mut self, latency: Duration) -> Self {
        self.execute_latency = Some(latency);
        self
    }

    /// Delay every `fetch`.
    pub fn with_fetch_latency(mut self, latency: Duration) -> Self {
        self.fetch_latency = Some(latency);
        self
    }

    /// Delay `close`.
    pub fn with_close_latency(mut self, latency: Duration) -> Self {
        self.close_latency = Some(latency);
        self
    }

    /// Register a table for catalog lookups under `db_schema`.
    pub fn with_table(
        mut self,
        db_schema: impl Into<String>,
        name: impl Into<String>,
        table_type: impl Into<String>,
        schema: SchemaRef,
    ) -> Self {
        self.tables.push(CatalogTable {
            db_schema: db_schema.into(),
            name: name.into(),
            table_type: table_type.into(),
            schema,
        });
        self
    }

    /// Fail `fetch` once `batches` batches of a stream have been delivered.
    pub fn with_failure_after(mut self, batches: usize) -> Self {
        self.fail_after = Some(batches);
        self
    }

    /// Probe sharing state with this transport.
    pub fn probe(&self) -> TransportProbe {
        self.probe.clone()
    }

    fn ensure_ready(&self) -> Result<(), TransportError> {
        if self.connected && self.authenticated {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn allocate_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn lookup(&self, sql: &str) -> Result<CannedResult, TransportError> {
        let key = normalize(sql);
        if let Some(result) = self.results.get(&key) {
            return Ok(result.clone());
        }

        if let Some(value) = select_literal(&key) {
            let schema = Arc::new(Schema::new(vec![Field::new(
                value.to_string(),
                DataType::Int64,
                false,
            )]));
            let batch = RecordBatch::try_new(
                Arc::clone(&schema),
                vec![Arc::new(Int64Array::from(vec![value]))],
            )
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
            return Ok(CannedResult::Batches {
                schema,
                batches: vec![batch],
            });
        }

        Err(TransportError::ProtocolError(format!(
            "no result registered for query: {}",
            sql
        )))
    }
}

#[async_trait]
impl TransportProtocol for MemoryTransport {
    async fn connect(&mut self, config: &TransportConfig) -> Result<(), TransportError> {
        if let Some(latency) = self.connect_latency {
            tokio::time::sleep(latency).await;
        }
        if self.unreachable {
            return Err(TransportError::Unreachable(format!(
                "no route to {}",
                config.endpoint
            )));
        }
        self.connected = true;
        Ok(())
    }

    async fn authenticate(
        &mut self,
        credentials: &Credentials,
    ) -> Result<SessionInfo, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        if let Some(required) = &self.required_token {
            match credentials.bearer_token() {
                Some(token) if token == required => {}
                Some(_) => return Err(TransportError::AuthFailed("invalid token".to_string())),
                None => return Err(TransportError::AuthFailed("token required".to_string())),
            }
        }

        self.authenticated = true;
        let session_id = format!("memory-{}", self.allocate_handle());
        Ok(SessionInfo {
            session_id,
            server_name: "flightlink-memory".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: 1,
        })
    }

    async fn execute(&mut self, request: &QueryRequest) -> Result<QueryResult, TransportError> {
        self.ensure_ready()?;
        self.probe.lock().requests.push(request.clone());

        if let Some(latency) = self.execute_latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(handle) = request.prepared {
            if !self.prepared.contains_key(&handle) {
                return Err(TransportError::UnknownHandle(handle.as_u64()));
            }
        }

        match self.lookup(&request.sql)? {
            CannedResult::Batches { schema, batches } => {
                let total_rows = batches.iter().map(|b| b.num_rows() as i64).sum();
                let handle = StreamHandle::new(self.allocate_handle());
                self.streams.insert(
                    handle,
                    OpenStream {
                        pending: batches.into(),
                        delivered: 0,
                    },
                );
                self.probe.lock().open_streams += 1;
                Ok(QueryResult::ResultSet {
                    handle,
                    schema,
                    total_rows: Some(total_rows),
                })
            }
            CannedResult::RowCount(count) => Ok(QueryResult::row_count(count)),
            CannedResult::Error(error) => Err(error),
        }
    }

    async fn fetch(
        &mut self,
        handle: StreamHandle,
        max_batches: usize,
    ) -> Result<FetchResponse, TransportError> {
        self.ensure_ready()?;
        self.probe.lock().fetches += 1;

        if let Some(latency) = self.fetch_latency {
            tokio::time::sleep(latency).await;
        }

        let fail_after = self.fail_after;
        let stream = self
            .streams
            .get_mut(&handle)
            .ok_or(TransportError::UnknownHandle(handle.as_u64()))?;

        if let Some(limit) = fail_after {
            if stream.delivered >= limit && !stream.pending.is_empty() {
                return Err(TransportError::IoError("connection reset by peer".to_string()));
            }
        }

        let mut take = max_batches.max(1).min(stream.pending.len());
        if let Some(limit) = fail_after {
            take = take.min(limit.saturating_sub(stream.delivered).max(1));
        }
        let batches: Vec<RecordBatch> = stream.pending.drain(..take).collect();
        stream.delivered += batches.len();

        Ok(FetchResponse::new(batches, stream.pending.is_empty()))
    }

    async fn cancel(&mut self, handle: StreamHandle) -> Result<(), TransportError> {
        self.probe.lock().cancels.push(handle);
        let stream = self
            .streams
            .get_mut(&handle)
            .ok_or(TransportError::UnknownHandle(handle.as_u64()))?;
        stream.pending.clear();
        Ok(())
    }

    async fn close_stream(&mut self, handle: StreamHandle) -> Result<(), TransportError> {
        self.streams
            .remove(&handle)
            .ok_or(TransportError::UnknownHandle(handle.as_u64()))?;
        let mut probe = self.probe.lock();
        probe.closed_streams.push(handle);
        probe.open_streams = probe.open_streams.saturating_sub(1);
        Ok(())
    }

    async fn prepare(&mut self, sql: &str) -> Result<PreparedInfo, TransportError> {
        self.ensure_ready()?;

        let result_schema = match self.lookup(sql) {
            Ok(CannedResult::Batches { schema, .. }) => Some(schema),
            _ => None,
        };

        let fields: Vec<Field> = (1..=count_placeholders(sql))
            .map(|i| Field::new(format!("${}", i), DataType::Utf8, true))
            .collect();

        let handle = PreparedHandle::new(self.allocate_handle());
        self.prepared.insert(handle, sql.to_string());
        self.probe.lock().prepared += 1;

        Ok(PreparedInfo {
            handle,
            parameter_schema: Arc::new(Schema::new(fields)),
            result_schema,
        })
    }

    async fn close_prepared(&mut self, handle: PreparedHandle) -> Result<(), TransportError> {
        self.prepared
            .remove(&handle)
            .ok_or(TransportError::UnknownHandle(handle.as_u64()))?;
        self.probe.lock().closed_prepared += 1;
        Ok(())
    }

    async fn begin_transaction(&mut self) -> Result<(), TransportError> {
        self.ensure_ready()?;
        if self.in_transaction {
            return Err(TransportError::ProtocolError(
                "transaction already active".to_string(),
            ));
        }
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), TransportError> {
        self.ensure_ready()?;
        if !std::mem::replace(&mut self.in_transaction, false) {
            return Err(TransportError::ProtocolError("no active transaction".to_string()));
        }
        self.probe.lock().commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), TransportError> {
        self.ensure_ready()?;
        if !std::mem::replace(&mut self.in_transaction, false) {
            return Err(TransportError::ProtocolError("no active transaction".to_string()));
        }
        self.probe.lock().rollbacks += 1;
        Ok(())
    }

    async fn table_types(&mut self) -> Result<Vec<String>, TransportError> {
        self.ensure_ready()?;
        let types: BTreeSet<String> = BUILTIN_TABLE_TYPES
            .iter()
            .map(|t| t.to_string())
            .chain(self.tables.iter().map(|t| t.table_type.clone()))
            .collect();
        Ok(types.into_iter().collect())
    }

    async fn table_schema(&mut self, table: &TableRef) -> Result<SchemaRef, TransportError> {
        self.ensure_ready()?;
        let in_catalog = table
            .catalog
            .as_deref()
            .map_or(true, |catalog| catalog == MEMORY_CATALOG);

        self.tables
            .iter()
            .filter(|_| in_catalog)
            .find(|t| {
                t.name == table.name
                    && table
                        .db_schema
                        .as_deref()
                        .map_or(true, |db_schema| db_schema == t.db_schema)
            })
            .map(|t| Arc::clone(&t.schema))
            .ok_or_else(|| TransportError::NotFound(format!("table {}", table)))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(latency) = self.close_latency {
            tokio::time::sleep(latency).await;
        }
        let released = self.streams.len();
        self.streams.clear();
        self.prepared.clear();
        self.in_transaction = false;
        self.connected = false;
        self.authenticated = false;

        let mut probe = self.probe.lock();
        probe.open_streams = probe.open_streams.saturating_sub(released);
        probe.closed = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

fn normalize(sql: &str) -> String {
    sql.trim().trim_end_matches(';').trim_end().to_string()
}

/// Recognizes `SELECT <integer>`.
fn select_literal(sql: &str) -> Option<i64> {
    let mut words = sql.split_whitespace();
    let keyword = words.next()?;
    let literal = words.next()?;
    if !keyword.eq_ignore_ascii_case("select") || words.next().is_some() {
        return None;
    }
    literal.parse().ok()
}

/// Counts `?` placeholders outside single-quoted literals.
fn count_placeholders(sql: &str) -> usize {
    let mut in_string = false;
    sql.chars()
        .filter(|c| {
            if *c == '\'' {
                in_string = !in_string;
            }
            *c == '?' && !in_string
        })
        .count()
}
