//! Request and response types exchanged with a transport.
//!
//! Requests carry opaque query text plus the canonical option map resolved for
//! the statement. Responses carry Arrow schemas and record batches.

use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Query submission request.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Query text, with bound parameters already substituted
    pub sql: String,
    /// Resolved statement options keyed by canonical name
    pub options: HashMap<String, String>,
    /// Prepared plan to execute, if the statement was prepared
    pub prepared: Option<PreparedHandle>,
}

impl QueryRequest {
    /// Create a new request with no options.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            options: HashMap::new(),
            prepared: None,
        }
    }

    /// Attach the resolved option map.
    pub fn with_options(mut self, options: HashMap<String, String>) -> Self {
        self.options = options;
        self
    }

    /// Execute through a prepared plan.
    pub fn with_prepared(mut self, handle: PreparedHandle) -> Self {
        self.prepared = Some(handle);
        self
    }

    /// Look up an option by canonical name.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// Result of a query submission.
#[derive(Debug, Clone)]
pub enum QueryResult {
    /// Row-returning query; batches are pulled with `fetch`
    ResultSet {
        /// Server-side stream handle
        handle: StreamHandle,
        /// Result schema, known before the first batch
        schema: SchemaRef,
        /// Total row count, when the server reports it
        total_rows: Option<i64>,
    },
    /// Row count from an INSERT/UPDATE/DELETE query
    RowCount {
        /// Number of affected rows
        count: i64,
    },
}

impl QueryResult {
    /// Create a result set query result.
    pub fn result_set(handle: StreamHandle, schema: SchemaRef) -> Self {
        Self::ResultSet {
            handle,
            schema,
            total_rows: None,
        }
    }

    /// Create a row count query result.
    pub fn row_count(count: i64) -> Self {
        Self::RowCount { count }
    }

    /// Check if this is a result set.
    pub fn is_result_set(&self) -> bool {
        matches!(self, Self::ResultSet { .. })
    }

    /// Check if this is a row count.
    pub fn is_row_count(&self) -> bool {
        matches!(self, Self::RowCount { .. })
    }

    /// Get the stream handle if this is a result set.
    pub fn handle(&self) -> Option<StreamHandle> {
        match self {
            Self::ResultSet { handle, .. } => Some(*handle),
            _ => None,
        }
    }

    /// Get the row count if this is a row count result.
    pub fn get_row_count(&self) -> Option<i64> {
        match self {
            Self::RowCount { count } => Some(*count),
            _ => None,
        }
    }
}

/// One fetch round trip.
#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    /// Batches returned by this round trip, possibly empty
    pub batches: Vec<RecordBatch>,
    /// No further batches remain on the server
    pub done: bool,
}

impl FetchResponse {
    /// A response carrying batches.
    pub fn new(batches: Vec<RecordBatch>, done: bool) -> Self {
        Self { batches, done }
    }

    /// The terminal response with no data.
    pub fn finished() -> Self {
        Self {
            batches: Vec::new(),
            done: true,
        }
    }
}

/// Prepared plan returned by `prepare`.
#[derive(Debug, Clone)]
pub struct PreparedInfo {
    /// Server-side plan handle
    pub handle: PreparedHandle,
    /// Schema of the plan's parameters, one field per placeholder
    pub parameter_schema: SchemaRef,
    /// Result schema, when the server knows it ahead of execution
    pub result_schema: Option<SchemaRef>,
}

impl PreparedInfo {
    /// A plan without parameters.
    pub fn new(handle: PreparedHandle) -> Self {
        Self {
            handle,
            parameter_schema: Arc::new(Schema::empty()),
            result_schema: None,
        }
    }
}

/// Session information returned after successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session ID
    pub session_id: String,
    /// Server product name
    pub server_name: String,
    /// Server version
    pub server_version: String,
    /// Negotiated protocol version
    pub protocol_version: i32,
}

impl SessionInfo {
    /// Create session info with unknown server identity.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            server_name: String::from("unknown"),
            server_version: String::from("unknown"),
            protocol_version: 1,
        }
    }
}

/// Handle of a server-side result stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u64);

impl StreamHandle {
    /// Create a new stream handle.
    pub fn new(handle: u64) -> Self {
        Self(handle)
    }

    /// Get the raw handle value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for StreamHandle {
    fn from(handle: u64) -> Self {
        Self(handle)
    }
}

/// Handle of a server-side prepared plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PreparedHandle(pub u64);

impl PreparedHandle {
    /// Create a new prepared plan handle.
    pub fn new(handle: u64) -> Self {
        Self(handle)
    }

    /// Get the raw handle value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Possibly qualified table name for catalog lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Catalog, or any catalog when `None`
    pub catalog: Option<String>,
    /// Schema within the catalog, or any schema when `None`
    pub db_schema: Option<String>,
    /// Table name
    pub name: String,
}

impl TableRef {
    /// Unqualified table name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            catalog: None,
            db_schema: None,
            name: name.into(),
        }
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    pub fn with_db_schema(mut self, db_schema: impl Into<String>) -> Self {
        self.db_schema = Some(db_schema.into());
        self
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for part in [&self.catalog, &self.db_schema].into_iter().flatten() {
            write!(f, "{}.", part)?;
        }
        write!(f, "{}", self.name)
    }
}

/// Tabular result described as JSON: column definitions plus row data.
///
/// ```json
/// {
///   "columns": [{"name": "ID", "dataType": {"type": "BIGINT"}}],
///   "data": [[1], [2]]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonResultSet {
    /// Column metadata
    pub columns: Vec<ColumnInfo>,
    /// Data rows
    #[serde(default)]
    pub data: Vec<Vec<serde_json::Value>>,
}

/// Column metadata.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Data type
    pub data_type: DataType,
}

/// SQL data type description.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataType {
    /// Type name
    #[serde(rename = "type")]
    pub type_name: String,
    /// Precision (for numeric types)
    pub precision: Option<i32>,
    /// Scale (for decimal types)
    pub scale: Option<i32>,
    /// Size (for string types)
    pub size: Option<i64>,
}
