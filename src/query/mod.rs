//! Query execution and result handling.
//!
//! # Overview
//!
//! The query module is organized into:
//! - `statement` - Statement state machine, parameter binding and execution
//! - `results` - Result streams and query metadata
//!
//! # Example
//!
//! ```
//! use flightlink::connection::{Credentials, Endpoint};
//! use flightlink::query::{ExecutionContext, Statement};
//! use flightlink::transport::{MemoryTransport, TransportConfig, TransportProtocol};
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut transport = MemoryTransport::new();
//! let endpoint: Endpoint = "memory://local".parse()?;
//! transport.connect(&TransportConfig::new(endpoint)).await?;
//! transport.authenticate(&Credentials::none()).await?;
//!
//! let mut stmt = Statement::with_sql(Arc::new(Mutex::new(transport)), "SELECT 1");
//! stmt.set_option("queue_size", "2")?;
//!
//! let (mut stream, metadata) = stmt.execute_query(&ExecutionContext::new("memory://local")).await?;
//! assert_eq!(metadata.column_count, 1);
//! while let Some(batch) = stream.next().await? {
//!     println!("Batch rows: {}", batch.num_rows());
//! }
//! # Ok(())
//! # }
//! ```

pub mod results;
pub mod statement;

pub use results::{QueryMetadata, ResultStream, ResultStreamReader, StreamStatus};
pub use statement::{ExecutionContext, Parameter, Statement, StatementState};
