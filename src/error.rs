//! Error types for flightlink.
//!
//! This module defines domain-specific error types organized by functional area.

use crate::options::OptionScope;
use std::fmt;
use thiserror::Error;

/// Top-level error type encompassing all possible errors.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Option registry errors
    #[error(transparent)]
    Option(#[from] OptionError),

    /// Connection-related errors
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Query execution errors
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Result stream errors
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Data conversion errors
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// Transport protocol errors
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors raised by the option registry.
///
/// Key validation happens when an option is set; value validation happens
/// when the consumer reads the option.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionError {
    /// Unknown key, or a key that is not allowed in this scope
    #[error("Invalid option '{key}' for {scope} scope")]
    InvalidOption { key: String, scope: OptionScope },

    /// Recognized key whose value cannot be interpreted
    #[error("Invalid value '{value}' for option '{key}': {message}")]
    InvalidOptionValue {
        key: String,
        value: String,
        message: String,
    },
}

/// Errors related to database connections.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish connection to the database
    #[error("Failed to connect to {endpoint}: {message}")]
    ConnectionFailed { endpoint: String, message: String },

    /// The endpoint could not be reached
    #[error("Endpoint {endpoint} is unreachable: {message}")]
    Unreachable { endpoint: String, message: String },

    /// Authentication failure
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid connection parameters
    #[error("Invalid connection parameter '{parameter}': {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Connection string parsing error
    #[error("Failed to parse connection string: {0}")]
    ParseError(String),

    /// Connection timeout
    #[error("Connection timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Connection is closed
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Operation not valid in the current connection state
    #[error("Invalid connection state: {0}")]
    InvalidState(String),

    /// Teardown failed; the connection is closed regardless
    #[error("Failed to close connection to {endpoint}: {message}")]
    CloseFailed { endpoint: String, message: String },

    /// Option error while configuring the connection
    #[error(transparent)]
    Option(#[from] OptionError),
}

/// Errors related to query execution.
#[derive(Error, Debug)]
pub enum QueryError {
    /// Query execution failed
    #[error("Query execution failed: {0}")]
    ExecutionFailed(String),

    /// Transport failure during a statement operation
    #[error("{operation} against {endpoint} failed: {source}")]
    Transport {
        operation: &'static str,
        endpoint: String,
        #[source]
        source: TransportError,
    },

    /// Query timeout
    #[error("Query timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Invalid query state
    #[error("Invalid query state: {0}")]
    InvalidState(String),

    /// Parameter binding error
    #[error("Parameter binding error for parameter {index}: {message}")]
    ParameterBindingError { index: usize, message: String },

    /// Result set not available
    #[error("Result set not available: {0}")]
    NoResultSet(String),

    /// Statement has been closed
    #[error("Statement has been closed")]
    StatementClosed,

    /// The owning connection has been closed or dropped
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Unexpected result set when row count was expected
    #[error("Expected row count but received result set")]
    UnexpectedResultSet,

    /// Transaction operation not valid in the current transaction state
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Option error detected at set time or use time
    #[error(transparent)]
    Option(#[from] OptionError),

    /// Result stream failure while draining results
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Errors surfaced while reading a result stream.
///
/// Stream errors are terminal. The stream keeps the first error and returns a
/// clone of it from every later read, hence `Clone`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The stream was cancelled before exhaustion
    #[error("Result stream was cancelled")]
    Cancelled,

    /// No batch arrived within the fetch timeout
    #[error("Fetch timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The transport failed mid-stream
    #[error("{operation} failed mid-stream: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    /// The stream was closed by its owner
    #[error("Result stream is closed")]
    Closed,

    /// A batch did not match the announced schema
    #[error("Batch does not match stream schema: {0}")]
    SchemaMismatch(String),
}

/// Errors related to data type conversion.
#[derive(Error, Debug)]
pub enum ConversionError {
    /// Unsupported column type
    #[error("Unsupported column type: {type_name}")]
    UnsupportedType { type_name: String },

    /// Failed to convert value
    #[error("Failed to convert value at row {row}, column {column}: {message}")]
    ValueConversionFailed {
        row: usize,
        column: usize,
        message: String,
    },

    /// Schema mismatch
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Invalid data format
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    /// Arrow error
    #[error("Arrow error: {0}")]
    ArrowError(String),
}

/// Errors related to the transport protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The remote endpoint could not be reached
    #[error("Unreachable: {0}")]
    Unreachable(String),

    /// The server rejected the credentials
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// A transport round trip exceeded its deadline
    #[error("Transport timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Protocol error
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Invalid response from server
    #[error("Invalid server response: {0}")]
    InvalidResponse(String),

    /// Handle does not refer to a live stream or prepared plan
    #[error("Unknown handle: {0}")]
    UnknownHandle(u64),

    /// Operation attempted before connect or after close
    #[error("Transport is not connected")]
    NotConnected,

    /// Catalog object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation the transport does not implement
    #[error("Not supported by this transport: {0}")]
    NotSupported(String),

    /// The server cancelled the operation
    #[error("Operation cancelled by server")]
    Cancelled,

    /// Network I/O error
    #[error("Network I/O error: {0}")]
    IoError(String),
}

/// ADBC-compatible error codes.
///
/// Status codes shared with ADBC drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdbcErrorCode {
    /// Unknown error
    Unknown = 1,
    /// Not implemented
    NotImplemented = 2,
    /// Not found
    NotFound = 3,
    /// Invalid argument
    InvalidArgument = 5,
    /// Invalid state
    InvalidState = 6,
    /// Invalid data
    InvalidData = 7,
    /// I/O error
    Io = 10,
    /// Cancelled
    Cancelled = 11,
    /// Timeout
    Timeout = 12,
    /// Unauthenticated
    Unauthenticated = 13,
}

impl fmt::Display for AdbcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdbcErrorCode::Unknown => write!(f, "UNKNOWN"),
            AdbcErrorCode::NotImplemented => write!(f, "NOT_IMPLEMENTED"),
            AdbcErrorCode::NotFound => write!(f, "NOT_FOUND"),
            AdbcErrorCode::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            AdbcErrorCode::InvalidState => write!(f, "INVALID_STATE"),
            AdbcErrorCode::InvalidData => write!(f, "INVALID_DATA"),
            AdbcErrorCode::Io => write!(f, "IO"),
            AdbcErrorCode::Cancelled => write!(f, "CANCELLED"),
            AdbcErrorCode::Timeout => write!(f, "TIMEOUT"),
            AdbcErrorCode::Unauthenticated => write!(f, "UNAUTHENTICATED"),
        }
    }
}

impl DriverError {
    /// Map to ADBC error code.
    pub fn to_adbc_code(&self) -> AdbcErrorCode {
        match self {
            DriverError::Option(e) => e.to_adbc_code(),
            DriverError::Connection(e) => e.to_adbc_code(),
            DriverError::Query(e) => e.to_adbc_code(),
            DriverError::Stream(e) => e.to_adbc_code(),
            DriverError::Conversion(_) => AdbcErrorCode::InvalidData,
            DriverError::Transport(e) => e.to_adbc_code(),
        }
    }
}

impl OptionError {
    /// Map to ADBC error code.
    pub fn to_adbc_code(&self) -> AdbcErrorCode {
        match self {
            OptionError::InvalidOption { .. } => AdbcErrorCode::NotImplemented,
            OptionError::InvalidOptionValue { .. } => AdbcErrorCode::InvalidArgument,
        }
    }
}

impl ConnectionError {
    /// Map to ADBC error code.
    pub fn to_adbc_code(&self) -> AdbcErrorCode {
        match self {
            ConnectionError::Timeout { .. } => AdbcErrorCode::Timeout,
            ConnectionError::AuthenticationFailed(_) => AdbcErrorCode::Unauthenticated,
            ConnectionError::InvalidParameter { .. } | ConnectionError::ParseError(_) => {
                AdbcErrorCode::InvalidArgument
            }
            ConnectionError::ConnectionClosed | ConnectionError::InvalidState(_) => {
                AdbcErrorCode::InvalidState
            }
            ConnectionError::Option(e) => e.to_adbc_code(),
            _ => AdbcErrorCode::Io,
        }
    }
}

impl QueryError {
    /// Map to ADBC error code.
    pub fn to_adbc_code(&self) -> AdbcErrorCode {
        match self {
            QueryError::Timeout { .. } => AdbcErrorCode::Timeout,
            QueryError::InvalidState(_)
            | QueryError::TransactionError(_)
            | QueryError::StatementClosed
            | QueryError::ConnectionClosed => AdbcErrorCode::InvalidState,
            QueryError::ParameterBindingError { .. } => AdbcErrorCode::InvalidArgument,
            QueryError::Transport { source, .. } => source.to_adbc_code(),
            QueryError::Option(e) => e.to_adbc_code(),
            QueryError::Stream(e) => e.to_adbc_code(),
            _ => AdbcErrorCode::Unknown,
        }
    }
}

impl StreamError {
    /// Map to ADBC error code.
    pub fn to_adbc_code(&self) -> AdbcErrorCode {
        match self {
            StreamError::Cancelled => AdbcErrorCode::Cancelled,
            StreamError::Timeout { .. } => AdbcErrorCode::Timeout,
            StreamError::Transport { .. } => AdbcErrorCode::Io,
            StreamError::Closed => AdbcErrorCode::InvalidState,
            StreamError::SchemaMismatch(_) => AdbcErrorCode::InvalidData,
        }
    }
}

impl TransportError {
    /// Map to ADBC error code.
    pub fn to_adbc_code(&self) -> AdbcErrorCode {
        match self {
            TransportError::AuthFailed(_) => AdbcErrorCode::Unauthenticated,
            TransportError::Timeout { .. } => AdbcErrorCode::Timeout,
            TransportError::UnknownHandle(_) | TransportError::NotFound(_) => {
                AdbcErrorCode::NotFound
            }
            TransportError::NotConnected => AdbcErrorCode::InvalidState,
            TransportError::NotSupported(_) => AdbcErrorCode::NotImplemented,
            TransportError::Cancelled => AdbcErrorCode::Cancelled,
            TransportError::InvalidResponse(_) => AdbcErrorCode::InvalidData,
            _ => AdbcErrorCode::Io,
        }
    }
}

// Conversions from external error types
impl From<arrow::error::ArrowError> for ConversionError {
    fn from(err: arrow::error::ArrowError) -> Self {
        ConversionError::ArrowError(err.to_string())
    }
}

impl From<serde_json::Error> for ConversionError {
    fn from(err: serde_json::Error) -> Self {
        ConversionError::InvalidFormat(err.to_string())
    }
}
