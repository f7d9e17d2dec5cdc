//! Driver, database, connection and statement interface.
//!
//! # Architecture
//!
//! The interface is organized into four main components:
//! - `Driver` - Driver metadata and factory for databases
//! - `Database` - Connection options and connection factory
//! - `Connection` - Open session over a transport
//! - `Statement` - Query text, options and parameters bound to a connection
//!
//! # Example
//!
//! ```
//! use flightlink::adbc::Driver;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = Driver::new();
//! let database = driver.open("memory://local?queue_size=2")?;
//! let connection = database.connect().await?;
//!
//! let mut stmt = connection.create_statement("SELECT 1")?;
//! let (mut stream, _metadata) = stmt.execute_query().await?;
//! while let Some(batch) = stream.next().await? {
//!     println!("{} rows", batch.num_rows());
//! }
//!
//! connection.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod database;
pub mod driver;
pub mod statement;

pub use connection::{Connection, ConnectionInfo};
pub use database::{Database, TransportFactory};
pub use driver::Driver;
pub use statement::Statement;
