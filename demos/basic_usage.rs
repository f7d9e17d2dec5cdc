//! Basic usage example for the flightlink client.

use arrow::util::pretty::pretty_format_batches;
use flightlink::adbc::Connection;
use flightlink::lifecycle::Scoped;
use flightlink::options::{OptionRegistry, OptionScope};
use flightlink::transport::MemoryTransport;
use std::error::Error;

const ENDPOINT: &str = "memory://demo";
const QUERY: &str = "SELECT id, name FROM people ORDER BY id";
const PEOPLE: &str = r#"{
    "columns": [
        {"name": "ID", "dataType": {"type": "BIGINT"}},
        {"name": "NAME", "dataType": {"type": "VARCHAR", "size": 100}}
    ],
    "data": [[1, "Alice"], [2, "Bob"], [3, "Charlie"]]
}"#;

/// Opens a connection over an in-process transport with a canned table.
async fn example_connection() -> Result<Connection, Box<dyn Error>> {
    let transport = MemoryTransport::new()
        .with_json_result(QUERY, PEOPLE, 2)?
        .with_row_count("DELETE FROM people", 3);

    let mut options = OptionRegistry::new(OptionScope::Connection);
    options.set("queue_size", "2")?;
    options.set("fetch_size", "1")?;

    Ok(Connection::open(transport, ENDPOINT, options).await?)
}

/// Executes a simple literal query and returns the row count.
async fn example_simple_select(conn: &Connection) -> Result<usize, Box<dyn Error>> {
    let results = conn.query("SELECT 2").await?;
    let row_count: usize = results.iter().map(|b| b.num_rows()).sum();
    Ok(row_count)
}

/// Streams a result batch by batch with a per-fetch timeout.
async fn example_streaming(conn: &Connection) -> Result<usize, Box<dyn Error>> {
    let mut statement = Scoped::new(conn.create_statement(QUERY)?);
    statement.set_option("timeout_fetch", "1000")?;

    let (mut stream, metadata) = statement.execute_query().await?;
    println!("Columns: {:?}", metadata.column_names());

    let mut batches = Vec::new();
    while let Some(batch) = stream.next().await? {
        batches.push(batch);
    }
    println!("{}", pretty_format_batches(&batches)?);

    statement.release().await?;
    Ok(stream.rows_read())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let conn = example_connection().await?;
    println!("Connected: session {}", conn.session_id());

    let rows = example_simple_select(&conn).await?;
    println!("Simple select: {} row(s)", rows);

    let rows = example_streaming(&conn).await?;
    println!("Streaming: {} row(s)", rows);

    let deleted = conn.execute_update("DELETE FROM people").await?;
    println!("Deleted: {} row(s)", deleted);

    conn.close().await?;
    println!("Done");

    Ok(())
}
