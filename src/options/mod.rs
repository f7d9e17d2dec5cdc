//! Option registry for connections and statements.
//!
//! Options are string key/value pairs at the API boundary. Keys come from the
//! closed [`OptionKey`] enumeration and are checked against a per-scope
//! allow-list when set; values are parsed only when a consumer reads them.
//!
//! # Example
//!
//! ```
//! use flightlink::options::{OptionRegistry, OptionScope};
//!
//! let connection = OptionRegistry::new(OptionScope::Connection);
//! let mut statement = OptionRegistry::new(OptionScope::Statement);
//! statement.set("queue_size", "2")?;
//! statement.set("timeout_fetch", "10")?;
//!
//! let resolved = statement.resolve(&connection);
//! assert_eq!(resolved.queue_size()?, 2);
//! # Ok::<(), flightlink::error::OptionError>(())
//! ```

mod keys;
mod registry;

pub use keys::{IngestMode, OptionKey, OptionScope};
pub use registry::{
    OptionRegistry, ResolvedOptions, DEFAULT_CANCEL_TIMEOUT, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_FETCH_SIZE, DEFAULT_QUEUE_SIZE,
};
