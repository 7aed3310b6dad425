use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::Result;

/// Liveness of a coordination session as reported by the service client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The session is live and every lock it holds is still valid.
    Connected,
    /// The service could not be reached. Locks may or may not still be held;
    /// the session can recover if contact resumes before it expires.
    Suspended,
    /// The session expired. Every lock it held has been released and the
    /// session cannot be used again.
    Lost,
}

/// Callback invoked on every session state transition.
///
/// Listeners run on the client's background task, concurrently with whatever
/// the session owner is doing, and must not block.
pub type SessionListener = Arc<dyn Fn(SessionState) + Send + Sync>;

/// An exclusive lock held by a session. Pass it back to
/// [`CoordinationSession::unlock`] to release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub name: String,
    pub key: Vec<u8>,
}

/// Opens sessions against a coordination service.
#[async_trait]
pub trait CoordinationService: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn CoordinationSession>>;
}

/// A live session with the coordination service.
///
/// Node paths are `/`-separated. Locks are owned by the session: when the
/// session is lost every lock it held is released by the service. Dropping a
/// session without calling [`close`](CoordinationSession::close) stops its
/// keepalive so it expires on its own.
#[async_trait]
pub trait CoordinationSession: Send + Sync {
    /// Service-assigned identifier of this session.
    fn id(&self) -> i64;

    fn state(&self) -> SessionState;

    fn add_listener(&self, listener: SessionListener);

    /// Block until the exclusive lock `name` is granted to this session.
    async fn lock(&self, name: &str) -> Result<LockHandle>;

    async fn unlock(&self, lock: LockHandle) -> Result<()>;

    /// Names of the direct children of `path`.
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Create a node, failing with [`Error::NodeExists`](crate::Error::NodeExists)
    /// if one is already present at `path`.
    async fn create(&self, path: &str, value: &[u8]) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// End the session, releasing its locks. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// State and listener bookkeeping shared by the session implementations.
pub(crate) struct SessionEvents {
    state: Mutex<SessionState>,
    listeners: Mutex<Vec<SessionListener>>,
}

impl SessionEvents {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Connected),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *guard(&self.state)
    }

    pub(crate) fn add_listener(&self, listener: SessionListener) {
        guard(&self.listeners).push(listener);
    }

    /// Record a new state and notify listeners if it changed. `Lost` is
    /// terminal.
    pub(crate) fn transition(&self, next: SessionState) {
        let previous = {
            let mut state = guard(&self.state);
            if *state == next || *state == SessionState::Lost {
                return;
            }
            std::mem::replace(&mut *state, next)
        };

        tracing::debug!(?previous, state = ?next, "session state changed");

        let listeners: Vec<SessionListener> = guard(&self.listeners).clone();
        for listener in listeners {
            listener(next);
        }
    }
}

pub(crate) fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
