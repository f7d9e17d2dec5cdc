//! Common test utilities for flightlink integration tests.
//!
//! The integration suite runs end to end against the in-process
//! `MemoryTransport`, so no server is needed. Fixtures register canned
//! results on a transport and the helpers below open connections over it.
//!
//! # Configuration
//!
//! | Default Constant   | Environment Variable        | Default Value            |
//! |--------------------|-----------------------------|--------------------------|
//! | `DEFAULT_ENDPOINT` | `FLIGHTLINK_TEST_ENDPOINT`  | "memory://integration"   |
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration_tests
//! ```

#![allow(dead_code)]

use flightlink::adbc::Connection;
use flightlink::options::{OptionRegistry, OptionScope};
use flightlink::transport::MemoryTransport;
use std::env;

// ============================================================================
// Connection Constants with Default Values
// ============================================================================

/// Default endpoint for integration connections.
pub const DEFAULT_ENDPOINT: &str = "memory://integration";

/// Environment variable name for overriding the endpoint.
const ENV_ENDPOINT: &str = "FLIGHTLINK_TEST_ENDPOINT";

/// Query registered by [`numbers_transport`].
pub const NUMBERS_QUERY: &str = "SELECT n, label FROM numbers";

/// Statement registered as a row count by [`numbers_transport`].
pub const UPDATE_QUERY: &str = "UPDATE numbers SET label = 'x'";

// ============================================================================
// Configuration Helpers
// ============================================================================

/// Get the endpoint from environment or use default.
///
/// Only `memory://` endpoints are served without a transport factory.
pub fn get_endpoint() -> String {
    env::var(ENV_ENDPOINT)
        .ok()
        .filter(|endpoint| endpoint.starts_with("memory://"))
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
}

/// Connection URI with the given query parameters appended.
pub fn connection_uri(params: &[(&str, &str)]) -> String {
    let mut uri = get_endpoint();
    for (i, (key, value)) in params.iter().enumerate() {
        uri.push(if i == 0 { '?' } else { '&' });
        uri.push_str(key);
        uri.push('=');
        uri.push_str(value);
    }
    uri
}

// ============================================================================
// Fixtures
// ============================================================================

/// JSON result with `rows` rows of `(n BIGINT, label VARCHAR)`.
pub fn numbers_json(rows: usize) -> String {
    let data: Vec<String> = (1..=rows)
        .map(|n| format!(r#"[{}, "row-{}"]"#, n, n))
        .collect();
    format!(
        r#"{{"columns": [
              {{"name": "N", "dataType": {{"type": "BIGINT"}}}},
              {{"name": "LABEL", "dataType": {{"type": "VARCHAR", "size": 32}}}}
            ],
            "data": [{}]}}"#,
        data.join(", ")
    )
}

/// Transport serving [`NUMBERS_QUERY`] as `rows` rows split into batches of
/// `rows_per_batch`, and [`UPDATE_QUERY`] as a row count of `rows`.
pub fn numbers_transport(rows: usize, rows_per_batch: usize) -> MemoryTransport {
    MemoryTransport::new()
        .with_json_result(NUMBERS_QUERY, &numbers_json(rows), rows_per_batch)
        .expect("numbers fixture is valid JSON")
        .with_row_count(UPDATE_QUERY, rows as i64)
}

// ============================================================================
// Connection Helpers
// ============================================================================

/// Open a connection over `transport` with default options.
pub async fn open_connection(transport: MemoryTransport) -> Connection {
    open_connection_with(transport, &[]).await
}

/// Open a connection over `transport` with the given connection options.
pub async fn open_connection_with(
    transport: MemoryTransport,
    options: &[(&str, &str)],
) -> Connection {
    let mut registry = OptionRegistry::new(OptionScope::Connection);
    registry
        .extend(options.iter().copied())
        .expect("test options are valid connection options");

    Connection::open(transport, &get_endpoint(), registry)
        .await
        .expect("memory transport accepts the connection")
}
