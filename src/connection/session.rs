//! Session bookkeeping for an open connection.
//!
//! A [`Session`] records what the server reported at authentication, tracks
//! the connection state and keeps a registry of active result streams so the
//! connection can cancel them on close. Stream cancellation tokens are children
//! of the session token. It uses std synchronization so that drop paths can
//! update it without an async context.

use crate::error::ConnectionError;
use crate::query::results::StreamControl;
use crate::transport::{CancellationToken, SessionInfo};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session is connected and ready
    Ready,

    /// Session is being closed
    Closing,

    /// Session is closed
    Closed,
}

impl SessionState {
    /// Check if the session can execute queries.
    pub fn can_execute(&self) -> bool {
        matches!(self, SessionState::Ready)
    }
}

/// Server session information and state tracking.
pub struct Session {
    info: SessionInfo,
    state: Mutex<SessionState>,
    query_count: AtomicU64,
    in_transaction: AtomicBool,
    cancel: CancellationToken,
    next_stream_id: AtomicU64,
    streams: Mutex<HashMap<u64, Arc<StreamControl>>>,
}

impl Session {
    /// Create a ready session.
    pub fn new(info: SessionInfo) -> Self {
        Self {
            info,
            state: Mutex::new(SessionState::Ready),
            query_count: AtomicU64::new(0),
            in_transaction: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            next_stream_id: AtomicU64::new(1),
            streams: Mutex::new(HashMap::new()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_streams(&self) -> MutexGuard<'_, HashMap<u64, Arc<StreamControl>>> {
        self.streams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get the session ID.
    pub fn session_id(&self) -> &str {
        &self.info.session_id
    }

    /// Server information reported at authentication.
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Get the current session state.
    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    /// Whether the session is closing or closed.
    pub fn is_closed(&self) -> bool {
        !self.state().can_execute()
    }

    /// Validate that the session can execute queries.
    pub fn validate_ready(&self) -> Result<(), ConnectionError> {
        match self.state() {
            SessionState::Ready => Ok(()),
            SessionState::Closing | SessionState::Closed => Err(ConnectionError::ConnectionClosed),
        }
    }

    /// Increment the query counter.
    pub fn increment_query_count(&self) -> u64 {
        self.query_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Get the number of queries executed in this session.
    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::SeqCst)
    }

    /// Whether an explicit transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    /// Mark a transaction open. Returns `false` if one already was.
    pub(crate) fn begin_transaction(&self) -> bool {
        self.in_transaction
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Mark the open transaction finished. Returns `false` if none was open.
    pub(crate) fn end_transaction(&self) -> bool {
        self.in_transaction.swap(false, Ordering::SeqCst)
    }

    /// Parent token of every stream opened on this session; cancelled on close.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Track a stream so `cancel_all_streams` reaches it. A stream
    /// registered after close began is cancelled at once.
    pub(crate) fn register_stream(&self, control: Arc<StreamControl>) -> u64 {
        let id = self.next_stream_id.fetch_add(1, Ordering::SeqCst);
        let mut streams = self.lock_streams();
        if self.is_closed() {
            control.cancel();
            return id;
        }
        streams.insert(id, control);
        id
    }

    pub(crate) fn deregister_stream(&self, id: u64) {
        self.lock_streams().remove(&id);
    }

    /// Number of registered streams that are still active.
    pub fn active_stream_count(&self) -> usize {
        self.lock_streams()
            .values()
            .filter(|control| control.status().is_active())
            .count()
    }

    /// Move from `Ready` to `Closing`. Returns `false` if the session was
    /// already closing or closed.
    pub fn begin_close(&self) -> bool {
        let mut state = self.lock_state();
        if *state != SessionState::Ready {
            return false;
        }
        *state = SessionState::Closing;
        true
    }

    /// Mark the session closed.
    pub fn finish_close(&self) {
        *self.lock_state() = SessionState::Closed;
    }

    /// Cancel every registered stream and the session token. Returns how
    /// many streams were still active.
    pub fn cancel_all_streams(&self) -> usize {
        let streams: Vec<Arc<StreamControl>> = self.lock_streams().drain().map(|(_, c)| c).collect();
        let cancelled = streams.iter().filter(|control| control.cancel()).count();
        self.cancel.cancel();
        cancelled
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.info.session_id)
            .field("server", &self.info.server_name)
            .field("state", &self.state())
            .field("query_count", &self.query_count())
            .field("in_transaction", &self.in_transaction())
            .field("active_streams", &self.active_stream_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(SessionInfo::new("session-1"))
    }

    #[test]
    fn test_new_session_is_ready() {
        let session = session();
        assert_eq!(session.session_id(), "session-1");
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.validate_ready().is_ok());
        assert_eq!(session.query_count(), 0);
    }

    #[test]
    fn test_query_count() {
        let session = session();
        assert_eq!(session.increment_query_count(), 1);
        assert_eq!(session.increment_query_count(), 2);
        assert_eq!(session.query_count(), 2);
    }

    #[test]
    fn test_close_transitions() {
        let session = session();
        assert!(session.begin_close());
        assert!(!session.begin_close());
        assert!(session.is_closed());
        assert!(matches!(
            session.validate_ready(),
            Err(ConnectionError::ConnectionClosed)
        ));

        session.finish_close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.begin_close());
    }

    #[test]
    fn test_transaction_flag() {
        let session = session();
        assert!(!session.in_transaction());
        assert!(!session.end_transaction());

        assert!(session.begin_transaction());
        assert!(!session.begin_transaction());
        assert!(session.in_transaction());

        assert!(session.end_transaction());
        assert!(!session.in_transaction());
    }

    #[test]
    fn test_stream_registry() {
        let session = session();
        let first = Arc::new(StreamControl::new());
        let second = Arc::new(StreamControl::new());

        let first_id = session.register_stream(Arc::clone(&first));
        let second_id = session.register_stream(Arc::clone(&second));
        assert_ne!(first_id, second_id);
        assert_eq!(session.active_stream_count(), 2);

        session.deregister_stream(first_id);
        assert_eq!(session.active_stream_count(), 1);

        assert_eq!(session.cancel_all_streams(), 1);
        assert!(!second.status().is_active());
        assert_eq!(session.active_stream_count(), 0);
    }

    #[test]
    fn test_cancel_all_streams_cancels_session_token() {
        let session = session();
        assert!(!session.cancel_token().is_cancelled());
        session.cancel_all_streams();
        assert!(session.cancel_token().is_cancelled());
    }
}
