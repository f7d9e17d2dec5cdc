//! Result stream handling.
//!
//! A [`ResultStream`] is a pull-based, single-pass sequence of Arrow record
//! batches. A background task fetches batches from the transport and pushes
//! them into a bounded queue; the caller drains the queue with
//! [`ResultStream::next`], which is the only suspension point for data.
//!
//! Terminal states are sticky. After exhaustion `next()` returns `Ok(None)`
//! forever. After a failure, cancellation, timeout or close, `next()` returns
//! a clone of the first error forever.

use crate::connection::session::Session;
use crate::error::{StreamError, TransportError};
use crate::transport::{CancellationToken, StreamHandle, TransportProtocol};
use arrow::datatypes::{DataType, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::{RecordBatch, RecordBatchReader};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Metadata about a query execution.
#[derive(Debug, Clone)]
pub struct QueryMetadata {
    /// Schema of the result set
    pub schema: SchemaRef,
    /// Total number of rows (if known)
    pub total_rows: Option<i64>,
    /// Number of columns
    pub column_count: usize,
    /// Rows affected, for statements that return a row count
    pub rows_affected: Option<i64>,
    /// Execution time in milliseconds (if available)
    pub execution_time_ms: Option<u64>,
}

impl QueryMetadata {
    /// Create metadata from schema and row count.
    pub fn new(schema: SchemaRef, total_rows: Option<i64>) -> Self {
        Self {
            column_count: schema.fields().len(),
            schema,
            total_rows,
            rows_affected: None,
            execution_time_ms: None,
        }
    }

    /// Metadata for a statement that returned a row count.
    pub fn for_row_count(count: i64) -> Self {
        let mut metadata = Self::new(Arc::new(Schema::empty()), Some(0));
        metadata.rows_affected = Some(count);
        metadata
    }

    /// Set execution time.
    pub fn with_execution_time(mut self, execution_time_ms: u64) -> Self {
        self.execution_time_ms = Some(execution_time_ms);
        self
    }

    /// Get column names.
    pub fn column_names(&self) -> Vec<&str> {
        self.schema
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect()
    }

    /// Get column types.
    pub fn column_types(&self) -> Vec<&DataType> {
        self.schema.fields().iter().map(|f| f.data_type()).collect()
    }
}

/// Lifecycle state of a result stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Batches may still be read
    Active,
    /// All batches were read
    Exhausted,
    /// The stream failed, timed out or was closed
    Failed,
    /// The stream was cancelled
    Cancelled,
}

impl StreamStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StreamStatus::Active,
            1 => StreamStatus::Exhausted,
            2 => StreamStatus::Failed,
            _ => StreamStatus::Cancelled,
        }
    }

    /// Whether the stream can still produce data.
    pub fn is_active(&self) -> bool {
        matches!(self, StreamStatus::Active)
    }
}

/// State shared between a stream, its producer task, the statement that
/// created it and the connection session.
#[derive(Debug)]
pub(crate) struct StreamControl {
    token: CancellationToken,
    status: AtomicU8,
}

impl StreamControl {
    pub(crate) fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Control whose token is cancelled along with `parent`.
    pub(crate) fn child_of(parent: &CancellationToken) -> Self {
        Self::with_token(parent.child_token())
    }

    fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            status: AtomicU8::new(StreamStatus::Active as u8),
        }
    }

    pub(crate) fn status(&self) -> StreamStatus {
        StreamStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Move out of `Active`; later transitions are ignored.
    fn settle(&self, status: StreamStatus) -> bool {
        self.status
            .compare_exchange(
                StreamStatus::Active as u8,
                status as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Cancel the stream. Returns `true` if it was still active.
    pub(crate) fn cancel(&self) -> bool {
        let settled = self.settle(StreamStatus::Cancelled);
        self.token.cancel();
        settled
    }
}

/// Deregisters a stream from its session when dropped.
#[derive(Debug)]
pub(crate) struct StreamRegistration {
    session: Weak<Session>,
    id: u64,
}

impl StreamRegistration {
    pub(crate) fn new(session: &Arc<Session>, control: &Arc<StreamControl>) -> Self {
        let id = session.register_stream(Arc::clone(control));
        Self {
            session: Arc::downgrade(session),
            id,
        }
    }
}

impl Drop for StreamRegistration {
    fn drop(&mut self) {
        if let Some(session) = self.session.upgrade() {
            session.deregister_stream(self.id);
        }
    }
}

/// Producer settings resolved from the statement options.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StreamSettings {
    pub queue_size: usize,
    pub fetch_size: usize,
    pub fetch_timeout: Option<Duration>,
    pub cancel_timeout: Duration,
}

#[derive(Debug, Clone)]
enum Terminal {
    Exhausted,
    Failed(StreamError),
}

type BatchResult = Result<RecordBatch, StreamError>;

/// Pull-based stream of record batches.
///
/// # Example
///
/// ```no_run
/// # use flightlink::query::ResultStream;
/// # async fn example(mut stream: ResultStream) -> Result<(), Box<dyn std::error::Error>> {
/// println!("{} columns", stream.schema().fields().len());
/// while let Some(batch) = stream.next().await? {
///     println!("{} rows", batch.num_rows());
/// }
/// # Ok(())
/// # }
/// ```
pub struct ResultStream {
    schema: SchemaRef,
    receiver: Option<mpsc::Receiver<BatchResult>>,
    control: Arc<StreamControl>,
    terminal: Option<Terminal>,
    fetch_timeout: Option<Duration>,
    producer: Option<JoinHandle<()>>,
    registration: Option<StreamRegistration>,
    batches_read: usize,
    rows_read: usize,
}

impl std::fmt::Debug for ResultStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStream")
            .field("columns", &self.schema.fields().len())
            .field("status", &self.status())
            .field("batches_read", &self.batches_read)
            .field("rows_read", &self.rows_read)
            .finish()
    }
}

impl ResultStream {
    /// Start streaming a server-side result.
    pub(crate) fn spawn(
        transport: Arc<Mutex<dyn TransportProtocol>>,
        handle: StreamHandle,
        schema: SchemaRef,
        settings: StreamSettings,
        control: Arc<StreamControl>,
        registration: Option<StreamRegistration>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(settings.queue_size.max(1));
        let producer = tokio::spawn(produce(
            transport,
            handle,
            settings,
            control.token.clone(),
            sender,
        ));

        Self {
            schema,
            receiver: Some(receiver),
            control,
            terminal: None,
            fetch_timeout: settings.fetch_timeout,
            producer: Some(producer),
            registration,
            batches_read: 0,
            rows_read: 0,
        }
    }

    /// A stream that is already exhausted.
    pub fn empty(schema: SchemaRef) -> Self {
        let control = Arc::new(StreamControl::new());
        control.settle(StreamStatus::Exhausted);
        Self {
            schema,
            receiver: None,
            control,
            terminal: Some(Terminal::Exhausted),
            fetch_timeout: None,
            producer: None,
            registration: None,
            batches_read: 0,
            rows_read: 0,
        }
    }

    /// Result schema, available before the first batch.
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    /// Current lifecycle state.
    pub fn status(&self) -> StreamStatus {
        match &self.terminal {
            Some(Terminal::Exhausted) => StreamStatus::Exhausted,
            Some(Terminal::Failed(StreamError::Cancelled)) => StreamStatus::Cancelled,
            Some(Terminal::Failed(_)) => StreamStatus::Failed,
            None => self.control.status(),
        }
    }

    /// Number of batches returned so far.
    pub fn batches_read(&self) -> usize {
        self.batches_read
    }

    /// Number of rows returned so far.
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    /// Token that cancels this stream from another task.
    pub fn cancel_token(&self) -> CancellationToken {
        self.control.token.clone()
    }

    /// Cancel the stream.
    ///
    /// Every later `next()` returns `StreamError::Cancelled`, even if batches
    /// were already buffered. Cancelling an exhausted stream has no effect.
    pub fn cancel(&self) {
        if self.terminal.is_none() && self.control.cancel() {
            debug!("result stream cancelled");
        }
    }

    /// Wait for the next batch.
    ///
    /// # Returns
    ///
    /// `Ok(Some(batch))` while data remains, `Ok(None)` at and after
    /// exhaustion.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::Cancelled` after cancellation,
    /// `StreamError::Timeout` when no batch arrives within `timeout_fetch`,
    /// and `StreamError::Transport` for a mid-stream transport failure. The
    /// same error is returned by every later call.
    pub async fn next(&mut self) -> Result<Option<RecordBatch>, StreamError> {
        if let Some(terminal) = &self.terminal {
            return match terminal {
                Terminal::Exhausted => Ok(None),
                Terminal::Failed(error) => Err(error.clone()),
            };
        }

        let token = self.control.token.clone();
        if token.is_cancelled() {
            return Err(self.fail(StreamError::Cancelled));
        }

        let fetch_timeout = self.fetch_timeout;
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(self.fail(StreamError::Closed));
        };

        let recv = async {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(StreamError::Cancelled),
                item = receiver.recv() => Ok(item),
            }
        };

        let outcome = match fetch_timeout {
            Some(limit) => match tokio::time::timeout(limit, recv).await {
                Ok(outcome) => outcome,
                Err(_) => Err(StreamError::Timeout {
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => recv.await,
        };

        match outcome {
            Ok(Some(Ok(batch))) => {
                if token.is_cancelled() {
                    return Err(self.fail(StreamError::Cancelled));
                }
                if let Err(error) = check_schema(&self.schema, &batch) {
                    return Err(self.fail(error));
                }
                self.batches_read += 1;
                self.rows_read += batch.num_rows();
                Ok(Some(batch))
            }
            Ok(Some(Err(error))) | Err(error) => Err(self.fail(error)),
            Ok(None) => {
                self.finish();
                Ok(None)
            }
        }
    }

    /// Read every remaining batch.
    pub async fn fetch_all(mut self) -> Result<Vec<RecordBatch>, StreamError> {
        let mut batches = Vec::new();
        while let Some(batch) = self.next().await? {
            batches.push(batch);
        }
        Ok(batches)
    }

    /// Stop the stream and wait for the producer to release server-side
    /// resources. Idempotent.
    ///
    /// An active stream becomes terminal with `StreamError::Closed`; an
    /// exhausted or failed stream keeps its terminal state.
    pub async fn close(&mut self) -> Result<(), StreamError> {
        if self.terminal.is_none() {
            self.control.settle(StreamStatus::Failed);
            self.control.token.cancel();
            self.terminal = Some(Terminal::Failed(StreamError::Closed));
            self.receiver = None;
            self.registration = None;
        }

        if let Some(producer) = self.producer.take() {
            if let Err(e) = producer.await {
                warn!(error = %e, "result stream producer did not finish cleanly");
            }
        }
        Ok(())
    }

    /// Synchronous release used when the stream is dropped without `close`.
    pub(crate) fn release_now(&mut self) {
        if self.terminal.is_none() {
            self.control.settle(StreamStatus::Failed);
            self.control.token.cancel();
            self.terminal = Some(Terminal::Failed(StreamError::Closed));
        }
        self.receiver = None;
        self.registration = None;
    }

    /// Adapt the stream to a blocking iterator for synchronous consumers.
    ///
    /// The reader drives the stream on `runtime`; it must not be iterated
    /// from inside an async task.
    pub fn into_reader(self, runtime: tokio::runtime::Handle) -> ResultStreamReader {
        ResultStreamReader {
            stream: self,
            runtime,
            done: false,
        }
    }

    fn fail(&mut self, error: StreamError) -> StreamError {
        let status = if error == StreamError::Cancelled {
            StreamStatus::Cancelled
        } else {
            StreamStatus::Failed
        };
        self.control.settle(status);
        // Stops the producer and releases the server-side stream
        self.control.token.cancel();

        debug!(error = %error, batches_read = self.batches_read, "result stream failed");
        self.terminal = Some(Terminal::Failed(error.clone()));
        self.receiver = None;
        self.registration = None;
        error
    }

    fn finish(&mut self) {
        self.control.settle(StreamStatus::Exhausted);
        debug!(
            batches_read = self.batches_read,
            rows_read = self.rows_read,
            "result stream exhausted"
        );
        self.terminal = Some(Terminal::Exhausted);
        self.receiver = None;
        self.registration = None;
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        self.release_now();
    }
}

fn check_schema(schema: &Schema, batch: &RecordBatch) -> Result<(), StreamError> {
    let batch_schema = batch.schema();
    let expected = schema.fields().iter().map(|f| f.data_type());
    let actual = batch_schema.fields().iter().map(|f| f.data_type());

    if schema.fields().len() != batch_schema.fields().len() || !expected.eq(actual) {
        return Err(StreamError::SchemaMismatch(format!(
            "expected {} columns {:?}, got {:?}",
            schema.fields().len(),
            schema.fields().iter().map(|f| f.data_type()).collect::<Vec<_>>(),
            batch_schema.fields().iter().map(|f| f.data_type()).collect::<Vec<_>>()
        )));
    }
    Ok(())
}

enum Outcome {
    Done,
    Failed,
    Cancelled,
}

/// Background producer: fetch `fetch_size` batches per round trip and push
/// them into the queue until the server reports completion.
async fn produce(
    transport: Arc<Mutex<dyn TransportProtocol>>,
    handle: StreamHandle,
    settings: StreamSettings,
    token: CancellationToken,
    sender: mpsc::Sender<BatchResult>,
) {
    let outcome = pump(&transport, handle, settings.fetch_size, &token, sender).await;

    let cancel = matches!(outcome, Outcome::Cancelled);
    let release = async {
        let mut transport = transport.lock().await;
        if cancel {
            transport.cancel(handle).await?;
        }
        transport.close_stream(handle).await
    };

    match tokio::time::timeout(settings.cancel_timeout, release).await {
        Ok(Ok(())) => debug!(handle = handle.as_u64(), cancel, "released result stream"),
        Ok(Err(e)) => warn!(handle = handle.as_u64(), error = %e, "failed to release result stream"),
        Err(_) => warn!(
            handle = handle.as_u64(),
            timeout_ms = settings.cancel_timeout.as_millis() as u64,
            "timed out releasing result stream"
        ),
    }
}

async fn pump(
    transport: &Arc<Mutex<dyn TransportProtocol>>,
    handle: StreamHandle,
    fetch_size: usize,
    token: &CancellationToken,
    sender: mpsc::Sender<BatchResult>,
) -> Outcome {
    loop {
        let fetched: Result<_, TransportError> = tokio::select! {
            biased;
            _ = token.cancelled() => return Outcome::Cancelled,
            result = async { transport.lock().await.fetch(handle, fetch_size).await } => result,
        };

        let response = match fetched {
            Ok(response) => response,
            Err(e) => {
                warn!(handle = handle.as_u64(), error = %e, "fetch failed mid-stream");
                let error = StreamError::Transport {
                    operation: "fetch",
                    message: e.to_string(),
                };
                let _ = sender.send(Err(error)).await;
                return Outcome::Failed;
            }
        };

        for batch in response.batches {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Outcome::Cancelled,
                sent = sender.send(Ok(batch)) => {
                    // Receiver gone: the stream was dropped or closed
                    if sent.is_err() {
                        return Outcome::Cancelled;
                    }
                }
            }
        }

        if response.done {
            return Outcome::Done;
        }
    }
}

/// Blocking adapter over a [`ResultStream`].
///
/// Fused: after the end of the stream or the first error, `next` returns
/// `None`.
pub struct ResultStreamReader {
    stream: ResultStream,
    runtime: tokio::runtime::Handle,
    done: bool,
}

impl ResultStreamReader {
    /// Access the underlying stream.
    pub fn stream(&self) -> &ResultStream {
        &self.stream
    }
}

impl Iterator for ResultStreamReader {
    type Item = Result<RecordBatch, ArrowError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let stream = &mut self.stream;
        match self.runtime.block_on(stream.next()) {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(ArrowError::ExternalError(Box::new(e))))
            }
        }
    }
}

impl std::iter::FusedIterator for ResultStreamReader {}

impl RecordBatchReader for ResultStreamReader {
    fn schema(&self) -> SchemaRef {
        self.stream.schema()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::auth::Credentials;
    use crate::connection::params::Endpoint;
    use crate::transport::{MemoryTransport, QueryRequest, TransportConfig, TransportProbe};
    use arrow::array::Int64Array;
    use arrow::datatypes::Field;

    fn numbers(count: i64) -> (SchemaRef, Vec<RecordBatch>) {
        let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, false)]));
        let batches = (0..count)
            .map(|i| {
                RecordBatch::try_new(
                    Arc::clone(&schema),
                    vec![Arc::new(Int64Array::from(vec![i]))],
                )
                .unwrap()
            })
            .collect();
        (schema, batches)
    }

    fn settings(queue_size: usize) -> StreamSettings {
        StreamSettings {
            queue_size,
            fetch_size: 1,
            fetch_timeout: None,
            cancel_timeout: Duration::from_secs(1),
        }
    }

    async fn start(
        transport: MemoryTransport,
        sql: &str,
        settings: StreamSettings,
    ) -> (ResultStream, TransportProbe) {
        start_with(transport, sql, settings, StreamControl::new()).await
    }

    async fn start_with(
        transport: MemoryTransport,
        sql: &str,
        settings: StreamSettings,
        control: StreamControl,
    ) -> (ResultStream, TransportProbe) {
        let probe = transport.probe();
        let mut transport = transport;
        let endpoint: Endpoint = "memory://stream-test".parse().unwrap();
        transport.connect(&TransportConfig::new(endpoint)).await.unwrap();
        transport.authenticate(&Credentials::none()).await.unwrap();

        let result = transport.execute(&QueryRequest::new(sql)).await.unwrap();
        let (handle, schema) = match result {
            crate::transport::QueryResult::ResultSet { handle, schema, .. } => (handle, schema),
            other => panic!("unexpected result {:?}", other),
        };

        let transport: Arc<Mutex<dyn TransportProtocol>> = Arc::new(Mutex::new(transport));
        let stream = ResultStream::spawn(
            transport,
            handle,
            schema,
            settings,
            Arc::new(control),
            None,
        );
        (stream, probe)
    }

    #[tokio::test]
    async fn test_reads_all_batches_then_none_forever() {
        let (schema, batches) = numbers(3);
        let transport = MemoryTransport::new().with_result("SELECT n", schema, batches);
        let (mut stream, probe) = start(transport, "SELECT n", settings(2)).await;

        let mut seen = 0;
        while let Some(batch) = stream.next().await.unwrap() {
            assert_eq!(batch.num_rows(), 1);
            seen += 1;
        }
        assert_eq!(seen, 3);
        assert_eq!(stream.status(), StreamStatus::Exhausted);

        for _ in 0..3 {
            assert!(stream.next().await.unwrap().is_none());
        }

        stream.close().await.unwrap();
        assert_eq!(probe.closed_stream_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_discards_buffered_batches() {
        let (schema, batches) = numbers(10);
        let transport = MemoryTransport::new().with_result("SELECT n", schema, batches);
        let (mut stream, probe) = start(transport, "SELECT n", settings(5)).await;

        assert!(stream.next().await.unwrap().is_some());
        // Let the producer fill the queue
        tokio::time::sleep(Duration::from_millis(20)).await;

        stream.cancel();
        for _ in 0..3 {
            assert_eq!(stream.next().await.unwrap_err(), StreamError::Cancelled);
        }
        assert_eq!(stream.status(), StreamStatus::Cancelled);

        stream.close().await.unwrap();
        assert_eq!(probe.cancel_count(), 1);
        assert_eq!(probe.open_stream_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_token_from_other_task() {
        let (schema, batches) = numbers(10);
        let transport = MemoryTransport::new()
            .with_result("SELECT n", schema, batches)
            .with_fetch_latency(Duration::from_millis(50));
        let (mut stream, _probe) = start(transport, "SELECT n", settings(1)).await;

        let token = stream.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let result = stream.next().await;
        assert_eq!(result.unwrap_err(), StreamError::Cancelled);
    }

    #[tokio::test]
    async fn test_parent_token_cancels_stream() {
        let (schema, batches) = numbers(10);
        let transport = MemoryTransport::new()
            .with_result("SELECT n", schema, batches)
            .with_fetch_latency(Duration::from_millis(50));
        let parent = CancellationToken::new();
        let control = StreamControl::child_of(&parent);
        let (mut stream, probe) = start_with(transport, "SELECT n", settings(1), control).await;

        parent.cancel();
        assert!(stream.cancel_token().is_cancelled());
        assert_eq!(stream.next().await.unwrap_err(), StreamError::Cancelled);
        assert_eq!(stream.status(), StreamStatus::Cancelled);

        stream.close().await.unwrap();
        assert_eq!(probe.open_stream_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_terminal() {
        let (schema, batches) = numbers(2);
        let transport = MemoryTransport::new()
            .with_result("SELECT n", schema, batches)
            .with_fetch_latency(Duration::from_millis(200));
        let mut config = settings(1);
        config.fetch_timeout = Some(Duration::from_millis(10));
        let (mut stream, _probe) = start(transport, "SELECT n", config).await;

        let err = stream.next().await.unwrap_err();
        assert_eq!(err, StreamError::Timeout { timeout_ms: 10 });
        assert_eq!(stream.next().await.unwrap_err(), err);
        assert_eq!(stream.status(), StreamStatus::Failed);
    }

    #[tokio::test]
    async fn test_mid_stream_error_is_replayed() {
        let (schema, batches) = numbers(4);
        let transport = MemoryTransport::new()
            .with_result("SELECT n", schema, batches)
            .with_failure_after(2);
        let (mut stream, _probe) = start(transport, "SELECT n", settings(1)).await;

        assert!(stream.next().await.unwrap().is_some());
        assert!(stream.next().await.unwrap().is_some());

        let err = stream.next().await.unwrap_err();
        assert!(matches!(err, StreamError::Transport { operation: "fetch", .. }));
        assert_eq!(stream.next().await.unwrap_err(), err);
        assert_eq!(stream.next().await.unwrap_err(), err);
    }

    #[tokio::test]
    async fn test_close_active_stream() {
        let (schema, batches) = numbers(5);
        let transport = MemoryTransport::new().with_result("SELECT n", schema, batches);
        let (mut stream, probe) = start(transport, "SELECT n", settings(1)).await;

        stream.close().await.unwrap();
        stream.close().await.unwrap();
        assert_eq!(stream.next().await.unwrap_err(), StreamError::Closed);
        assert_eq!(probe.open_stream_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_all() {
        let (schema, batches) = numbers(4);
        let transport = MemoryTransport::new().with_result("SELECT n", schema, batches);
        let (stream, _probe) = start(transport, "SELECT n", settings(2)).await;

        let batches = stream.fetch_all().await.unwrap();
        assert_eq!(batches.len(), 4);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let mut stream = ResultStream::empty(Arc::new(Schema::empty()));
        assert_eq!(stream.status(), StreamStatus::Exhausted);
        assert!(stream.next().await.unwrap().is_none());
        assert!(stream.next().await.unwrap().is_none());
    }

    #[test]
    fn test_blocking_reader() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (schema, batches) = numbers(3);
        let transport = MemoryTransport::new().with_result("SELECT n", schema, batches);
        let (stream, _probe) = runtime.block_on(start(transport, "SELECT n", settings(1)));

        let reader = stream.into_reader(runtime.handle().clone());
        assert_eq!(reader.schema().fields().len(), 1);
        let batches: Vec<_> = reader.collect::<Result<_, _>>().unwrap();
        assert_eq!(batches.len(), 3);
    }

    #[test]
    fn test_blocking_reader_ends_after_error() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (schema, batches) = numbers(4);
        let transport = MemoryTransport::new()
            .with_result("SELECT n", schema, batches)
            .with_failure_after(1);
        let (stream, _probe) = runtime.block_on(start(transport, "SELECT n", settings(1)));

        let mut reader = stream.into_reader(runtime.handle().clone());
        assert!(reader.next().unwrap().is_ok());
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
        assert_eq!(reader.stream().status(), StreamStatus::Failed);

        // Terminates instead of looping on the replayed error
        let (schema, batches) = numbers(4);
        let transport = MemoryTransport::new()
            .with_result("SELECT n", schema, batches)
            .with_failure_after(1);
        let (stream, _probe) = runtime.block_on(start(transport, "SELECT n", settings(1)));
        let items: Vec<_> = stream.into_reader(runtime.handle().clone()).collect();
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[test]
    fn test_metadata_for_row_count() {
        let metadata = QueryMetadata::for_row_count(7);
        assert_eq!(metadata.rows_affected, Some(7));
        assert_eq!(metadata.column_count, 0);
        assert!(metadata.column_names().is_empty());
    }
}
