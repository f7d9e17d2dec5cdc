//! # flightlink
//!
//! Client core for columnar query engines that return Apache Arrow data.
//!
//! The crate is organized around a small set of resources:
//!
//! - [`Database`] collects connection options and opens [`Connection`]s
//! - [`Connection`] owns one session over a [`transport::TransportProtocol`]
//! - [`Statement`] holds query text, options and parameters and runs a
//!   state machine from `Unbound` to `Exhausted`
//! - [`ResultStream`] delivers `RecordBatch`es with bounded prefetch,
//!   cancellation and fetch timeouts
//! - [`lifecycle::Scoped`] releases any of the above exactly once
//!
//! Options are plain string keys (`queue_size`, `fetch_size`,
//! `timeout_fetch`, ...) validated by the [`options::OptionRegistry`].
//!
//! ## Example
//!
//! ```
//! # use flightlink::*;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = Driver::new();
//! let database = driver.open("memory://local?queue_size=2&fetch_size=1")?;
//!
//! let connection = database.connect().await?;
//!
//! let mut statement = connection.create_statement("SELECT 1")?;
//! let (mut stream, metadata) = statement.execute_query().await?;
//! println!("columns: {:?}", metadata.column_names());
//!
//! while let Some(batch) = stream.next().await? {
//!     println!("Rows: {}", batch.num_rows());
//! }
//!
//! connection.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod adbc;
pub mod arrow_conversion;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod options;
pub mod query;
pub mod transport;
pub mod types;

pub use adbc::{Connection, ConnectionInfo, Database, Driver, Statement};
pub use arrow_conversion::ArrowConverter;
pub use error::{
    ConnectionError, ConversionError, DriverError, OptionError, QueryError, StreamError,
    TransportError,
};
pub use lifecycle::{Release, Scoped};
pub use options::{OptionKey, OptionRegistry, OptionScope};
pub use query::{Parameter, QueryMetadata, ResultStream, StatementState, StreamStatus};
pub use transport::{MemoryTransport, TransportProtocol};
pub use types::{SqlType, TypeMapper};
