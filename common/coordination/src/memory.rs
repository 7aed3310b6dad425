use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::session::{
    guard, CoordinationService, CoordinationSession, LockHandle, SessionEvents, SessionListener,
    SessionState,
};
use crate::util;

/// Mutation applied to the stored nodes when a fault fires.
pub type NodeMutation = Box<dyn FnOnce(&mut BTreeMap<String, Vec<u8>>) + Send>;

struct ReadFault {
    after_read: usize,
    /// `None` only mutates the nodes.
    state: Option<SessionState>,
    /// Keep sessions `Suspended` until [`MemoryCoordination::resume_sessions`].
    sticky: bool,
    mutate: Option<NodeMutation>,
}

struct CreateConflict {
    owner: Vec<u8>,
}

#[derive(Default)]
struct MemoryState {
    nodes: BTreeMap<String, Vec<u8>>,
    /// lock name -> owning session id
    locks: HashMap<String, i64>,
    sessions: HashMap<i64, Arc<SessionEvents>>,
    next_session_id: i64,
    connects: usize,
    failing_connects: usize,
    reads: usize,
    faults: Vec<ReadFault>,
    create_conflict: Option<CreateConflict>,
}

impl MemoryState {
    fn release_locks(&mut self, session_id: i64) -> bool {
        let before = self.locks.len();
        self.locks.retain(|_, owner| *owner != session_id);
        before != self.locks.len()
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<MemoryState>,
    lock_released: Notify,
}

/// In-process coordination service.
///
/// Mirrors the semantics the coordinator relies on (blocking exclusive
/// locks owned by sessions, create-if-absent nodes, session listeners) and
/// lets tests inject connection failures and session interruptions at exact
/// points of the protocol.
#[derive(Clone, Default)]
pub struct MemoryCoordination {
    shared: Arc<Shared>,
}

impl MemoryCoordination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `connect` fail as if the service were
    /// unreachable.
    pub fn fail_next_connects(&self, count: usize) {
        guard(&self.shared.state).failing_connects = count;
    }

    /// Report `state` to every open session right after the `read`-th call to
    /// `children` (1-based, counted across all sessions) returns.
    ///
    /// `Suspended` is delivered as a blip: sessions go back to `Connected`
    /// immediately afterwards. `Lost` expires the sessions and releases their
    /// locks.
    pub fn interrupt_after_read(&self, read: usize, state: SessionState) {
        self.push_fault(read, Some(state), false, None);
    }

    /// Suspend every open session right after the `read`-th call to
    /// `children` and keep them suspended until
    /// [`resume_sessions`](Self::resume_sessions).
    pub fn suspend_after_read(&self, read: usize) {
        self.push_fault(read, Some(SessionState::Suspended), true, None);
    }

    /// Like [`interrupt_after_read`](Self::interrupt_after_read), and also
    /// apply `mutate` to the stored nodes at the same moment, standing in for
    /// another client that wrote while this one was cut off.
    pub fn interrupt_after_read_with(
        &self,
        read: usize,
        state: SessionState,
        mutate: impl FnOnce(&mut BTreeMap<String, Vec<u8>>) + Send + 'static,
    ) {
        self.push_fault(read, Some(state), false, Some(Box::new(mutate)));
    }

    /// Apply `mutate` to the stored nodes right after the `read`-th call to
    /// `children`, without disturbing any session. Stands in for a write that
    /// raced the lock.
    pub fn mutate_after_read(
        &self,
        read: usize,
        mutate: impl FnOnce(&mut BTreeMap<String, Vec<u8>>) + Send + 'static,
    ) {
        self.push_fault(read, None, false, Some(Box::new(mutate)));
    }

    /// Make the next `create` find its path already taken by `owner`: the
    /// node is stored with that value and the call fails with `NodeExists`.
    pub fn conflict_on_next_create(&self, owner: &[u8]) {
        guard(&self.shared.state).create_conflict = Some(CreateConflict {
            owner: owner.to_vec(),
        });
    }

    /// Bring every open session back to `Connected`.
    pub fn resume_sessions(&self) {
        let sessions: Vec<Arc<SessionEvents>> =
            guard(&self.shared.state).sessions.values().cloned().collect();
        for events in sessions {
            events.transition(SessionState::Connected);
        }
    }

    fn push_fault(
        &self,
        after_read: usize,
        state: Option<SessionState>,
        sticky: bool,
        mutate: Option<NodeMutation>,
    ) {
        guard(&self.shared.state).faults.push(ReadFault {
            after_read,
            state,
            sticky,
            mutate,
        });
    }

    pub fn put_node(&self, path: &str, value: &[u8]) {
        guard(&self.shared.state)
            .nodes
            .insert(path.to_string(), value.to_vec());
    }

    pub fn node(&self, path: &str) -> Option<Vec<u8>> {
        guard(&self.shared.state).nodes.get(path).cloned()
    }

    /// All stored nodes, ordered by path.
    pub fn nodes(&self) -> BTreeMap<String, Vec<u8>> {
        guard(&self.shared.state).nodes.clone()
    }

    /// Sessions that are neither closed nor expired.
    pub fn open_sessions(&self) -> usize {
        guard(&self.shared.state).sessions.len()
    }

    pub fn connects(&self) -> usize {
        guard(&self.shared.state).connects
    }

    pub fn reads(&self) -> usize {
        guard(&self.shared.state).reads
    }

    pub fn is_locked(&self, name: &str) -> bool {
        guard(&self.shared.state).locks.contains_key(name)
    }

    /// Open a session directly, bypassing injected connection failures.
    pub fn session(&self) -> MemorySession {
        let mut state = guard(&self.shared.state);
        state.next_session_id += 1;
        let id = state.next_session_id;
        let events = Arc::new(SessionEvents::new());
        state.sessions.insert(id, Arc::clone(&events));
        MemorySession {
            id,
            events,
            shared: Arc::clone(&self.shared),
        }
    }
}

#[async_trait]
impl CoordinationService for MemoryCoordination {
    async fn connect(&self) -> Result<Box<dyn CoordinationSession>> {
        {
            let mut state = guard(&self.shared.state);
            state.connects += 1;
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(Error::Disconnected("connection refused".to_string()));
            }
        }
        Ok(Box::new(self.session()))
    }
}

struct FiredFault {
    state: SessionState,
    sticky: bool,
    sessions: Vec<Arc<SessionEvents>>,
}

pub struct MemorySession {
    id: i64,
    events: Arc<SessionEvents>,
    shared: Arc<Shared>,
}

impl MemorySession {
    fn ensure_live(&self) -> Result<()> {
        match self.events.state() {
            SessionState::Lost => Err(Error::SessionLost(self.id)),
            _ => Ok(()),
        }
    }

    /// Remove the session and release its locks. Returns false if it was
    /// already gone.
    fn release(&self) -> bool {
        let (removed, released) = {
            let mut state = guard(&self.shared.state);
            let removed = state.sessions.remove(&self.id).is_some();
            (removed, state.release_locks(self.id))
        };
        if released {
            self.shared.lock_released.notify_waiters();
        }
        removed
    }

    fn fire_faults(&self, fired: Vec<FiredFault>) {
        for FiredFault {
            state,
            sticky,
            sessions,
        } in fired
        {
            for events in &sessions {
                events.transition(state);
                if state == SessionState::Suspended && !sticky {
                    events.transition(SessionState::Connected);
                }
            }
            if state == SessionState::Lost {
                self.shared.lock_released.notify_waiters();
            }
        }
    }
}

#[async_trait]
impl CoordinationSession for MemorySession {
    fn id(&self) -> i64 {
        self.id
    }

    fn state(&self) -> SessionState {
        self.events.state()
    }

    fn add_listener(&self, listener: SessionListener) {
        self.events.add_listener(listener);
    }

    async fn lock(&self, name: &str) -> Result<LockHandle> {
        loop {
            let notified = self.shared.lock_released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                self.ensure_live()?;
                let mut state = guard(&self.shared.state);
                let owner = *state.locks.entry(name.to_string()).or_insert(self.id);
                if owner == self.id {
                    return Ok(LockHandle {
                        name: name.to_string(),
                        key: format!("{name}/{:x}", self.id).into_bytes(),
                    });
                }
            }

            notified.await;
        }
    }

    async fn unlock(&self, lock: LockHandle) -> Result<()> {
        let released = {
            let mut state = guard(&self.shared.state);
            match state.locks.get(&lock.name) {
                Some(owner) if *owner == self.id => state.locks.remove(&lock.name).is_some(),
                _ => false,
            }
        };
        if released {
            self.shared.lock_released.notify_waiters();
        }
        Ok(())
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        self.ensure_live()?;
        let (names, fired) = {
            let mut state = guard(&self.shared.state);
            let names: Vec<String> = state
                .nodes
                .keys()
                .filter_map(|key| util::child_name(path, key))
                .map(str::to_string)
                .collect();

            state.reads += 1;
            let read = state.reads;
            let (due, pending): (Vec<ReadFault>, Vec<ReadFault>) = std::mem::take(&mut state.faults)
                .into_iter()
                .partition(|f| f.after_read == read);
            state.faults = pending;

            let mut fired = Vec::with_capacity(due.len());
            for fault in due {
                if let Some(mutate) = fault.mutate {
                    mutate(&mut state.nodes);
                }
                let Some(fault_state) = fault.state else {
                    continue;
                };
                let sessions: Vec<Arc<SessionEvents>> = if fault_state == SessionState::Lost {
                    // Expired sessions stop counting as open and lose their locks.
                    let expired: Vec<(i64, Arc<SessionEvents>)> =
                        state.sessions.drain().collect();
                    for (id, _) in &expired {
                        state.release_locks(*id);
                    }
                    expired.into_iter().map(|(_, events)| events).collect()
                } else {
                    state.sessions.values().cloned().collect()
                };
                fired.push(FiredFault {
                    state: fault_state,
                    sticky: fault.sticky,
                    sessions,
                });
            }
            (names, fired)
        };

        self.fire_faults(fired);
        Ok(names)
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_live()?;
        Ok(guard(&self.shared.state).nodes.get(path).cloned())
    }

    async fn create(&self, path: &str, value: &[u8]) -> Result<()> {
        self.ensure_live()?;
        let mut state = guard(&self.shared.state);
        if let Some(conflict) = state.create_conflict.take() {
            state.nodes.insert(path.to_string(), conflict.owner);
        }
        if state.nodes.contains_key(path) {
            return Err(Error::NodeExists(path.to_string()));
        }
        state.nodes.insert(path.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.ensure_live()?;
        guard(&self.shared.state).nodes.remove(path);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.release() {
            self.events.transition(SessionState::Lost);
        }
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.release();
    }
}
