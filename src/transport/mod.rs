//! Transport layer between the client core and a remote query engine.
//!
//! The core never talks to the network directly. Everything goes through the
//! [`TransportProtocol`] trait, shared by a connection and all of its streams.
//!
//! # Architecture
//!
//! The transport layer is organized into:
//! - `protocol` - Transport protocol trait definition
//! - `messages` - Request and response types
//! - `memory` - In-process transport serving registered results
//!
//! # Example
//!
//! ```
//! use flightlink::connection::{Credentials, Endpoint};
//! use flightlink::transport::{MemoryTransport, QueryRequest, TransportConfig, TransportProtocol};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut transport = MemoryTransport::new();
//!
//! let endpoint: Endpoint = "memory://local".parse()?;
//! transport.connect(&TransportConfig::new(endpoint)).await?;
//! let session = transport.authenticate(&Credentials::none()).await?;
//! println!("Session: {}", session.session_id);
//!
//! let result = transport.execute(&QueryRequest::new("SELECT 1")).await?;
//! assert!(result.is_result_set());
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod messages;
pub mod protocol;

pub use memory::{MemoryTransport, TransportProbe, MEMORY_CATALOG};
pub use messages::{
    ColumnInfo, DataType, FetchResponse, JsonResultSet, PreparedHandle, PreparedInfo,
    QueryRequest, QueryResult, SessionInfo, StreamHandle, TableRef,
};
pub use protocol::{TransportConfig, TransportProtocol};
pub use tokio_util::sync::CancellationToken;
