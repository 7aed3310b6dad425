use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coordination::util::{validate_identifier, validate_segment};
use coordination::{CoordinationService, CoordinationSession, SessionState};
use metrics::counter;

use crate::error::{Error, Result};
use crate::metrics_constants::{
    ATTEMPTS, COMMITS, INTERRUPTED_ATTEMPTS, OVERWRITTEN_NODES, UNAVAILABLE_ATTEMPTS,
};
use crate::paths::{self, SequencerKey};
use crate::strategy::{SequenceStrategy, StrategyKind};
use crate::types::{AssignmentSnapshot, MembershipSet, SequenceId};

pub const DEFAULT_ROOT: &str = "/autoscaling-sequencer";

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Root path under which every group's assignments are stored.
    pub root: String,
    /// Pause before retrying after the coordination service could not be
    /// used. Interrupted attempts are retried immediately.
    pub retry_interval: Duration,
    /// Give up after this many attempts. `None` retries until an attempt
    /// commits or the caller cancels.
    pub max_attempts: Option<u32>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            root: DEFAULT_ROOT.to_string(),
            retry_interval: Duration::from_millis(500),
            max_attempts: None,
        }
    }
}

/// One request for a sequence id.
#[derive(Debug, Clone)]
pub struct SequenceRequest {
    pub group: String,
    pub instance_id: String,
    pub strategy: StrategyKind,
    /// Largest id that may be handed out (inclusive).
    pub max_sequence_id: SequenceId,
    /// Current members of the group. Assignments held by anything else are
    /// ignored when choosing an id.
    pub members: MembershipSet,
}

/// Where an attempt is in the lock / read / decide / write protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    SessionActive,
    LockHeld,
    Committed,
    Interrupted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::SessionActive => "session_active",
            Phase::LockHeld => "lock_held",
            Phase::Committed => "committed",
            Phase::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

/// Assigns sequence ids under a group-scoped distributed lock.
///
/// Each attempt takes the group lock, reads the persisted assignments,
/// chooses an id and writes it, assuming the session stays healthy
/// throughout. A session listener raises a flag whenever the session is
/// suspended or lost; if the flag was raised at any point during the attempt
/// the result is discarded and the whole read / decide / write sequence is
/// redone on fresh state. Strategies are idempotent for an instance that
/// already holds an id, so a redo after a write that did land returns the
/// same id.
pub struct DistributedSequenceCoordinator {
    service: Arc<dyn CoordinationService>,
    config: CoordinatorConfig,
}

impl DistributedSequenceCoordinator {
    pub fn new(service: Arc<dyn CoordinationService>, config: CoordinatorConfig) -> Self {
        Self { service, config }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Run attempts until one commits. Strategy failures abort immediately;
    /// coordination failures and interruptions are retried.
    ///
    /// The session is closed on every return path. If this future is dropped
    /// mid-attempt the session stops its keepalive and expires on its own.
    pub async fn execute(&self, request: &SequenceRequest) -> Result<SequenceId> {
        validate_segment(&request.group)?;
        validate_identifier(&request.instance_id)?;

        let interrupted = Arc::new(AtomicBool::new(false));
        let mut session: Option<Box<dyn CoordinationSession>> = None;

        let result = self.run_attempts(&mut session, request, &interrupted).await;

        if let Some(session) = session.take() {
            close_session(session.as_ref()).await;
        }
        tracing::debug!(phase = %Phase::Idle, "distributed operation finished");

        result
    }

    async fn run_attempts(
        &self,
        slot: &mut Option<Box<dyn CoordinationSession>>,
        request: &SequenceRequest,
        interrupted: &Arc<AtomicBool>,
    ) -> Result<SequenceId> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            interrupted.store(false, Ordering::SeqCst);
            counter!(ATTEMPTS, "strategy" => request.strategy.as_str()).increment(1);
            tracing::debug!(
                attempt,
                group = %request.group,
                instance_id = %request.instance_id,
                "distributed operation starting"
            );

            let outcome = match self.session(slot, interrupted).await {
                Ok(session) => self.attempt(session, request, interrupted).await,
                Err(e) => Err(e),
            };

            let error = match outcome {
                Ok(id) => {
                    counter!(COMMITS, "strategy" => request.strategy.as_str()).increment(1);
                    tracing::info!(
                        phase = %Phase::Committed,
                        sequence_id = id,
                        attempts = attempt,
                        group = %request.group,
                        instance_id = %request.instance_id,
                        "sequence id committed"
                    );
                    return Ok(id);
                }
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            if self.config.max_attempts.is_some_and(|max| attempt >= max) {
                tracing::error!(attempts = attempt, error = %error, "giving up on distributed operation");
                return Err(match error {
                    Error::SessionInterrupted => Error::CoordinationUnavailable(
                        coordination::Error::Disconnected(format!(
                            "session interrupted on each of {attempt} attempts"
                        )),
                    ),
                    other => other,
                });
            }

            match error {
                Error::SessionInterrupted => {
                    counter!(INTERRUPTED_ATTEMPTS).increment(1);
                    tracing::info!(
                        phase = %Phase::Interrupted,
                        attempt,
                        "distributed coordination interrupted, retrying"
                    );
                }
                error => {
                    counter!(UNAVAILABLE_ATTEMPTS).increment(1);
                    tracing::warn!(
                        attempt,
                        error = %error,
                        retry_in = ?self.config.retry_interval,
                        "encountered coordination error, retrying"
                    );
                    tokio::time::sleep(self.config.retry_interval).await;
                }
            }
        }
    }

    /// Reuse the current session unless it has been lost, in which case it is
    /// replaced by a fresh one. A session that is still suspended is not used
    /// until it reconnects.
    async fn session<'a>(
        &self,
        slot: &'a mut Option<Box<dyn CoordinationSession>>,
        interrupted: &Arc<AtomicBool>,
    ) -> Result<&'a dyn CoordinationSession> {
        let session = match slot.take() {
            Some(session) if session.state() != SessionState::Lost => session,
            stale => {
                if let Some(lost) = stale {
                    tracing::info!(session_id = lost.id(), "session lost, opening a new one");
                    close_session(lost.as_ref()).await;
                }
                self.open_session(interrupted).await?
            }
        };
        let session: &'a mut Box<dyn CoordinationSession> = slot.insert(session);
        if session.state() == SessionState::Suspended {
            return Err(Error::CoordinationUnavailable(
                coordination::Error::Disconnected(format!(
                    "session {} is suspended",
                    session.id()
                )),
            ));
        }
        Ok(&**session)
    }

    async fn open_session(
        &self,
        interrupted: &Arc<AtomicBool>,
    ) -> Result<Box<dyn CoordinationSession>> {
        let session = self.service.connect().await?;

        let flag = Arc::clone(interrupted);
        let session_id = session.id();
        session.add_listener(Arc::new(move |state| {
            if matches!(state, SessionState::Lost | SessionState::Suspended) {
                flag.store(true, Ordering::SeqCst);
                tracing::warn!(session_id, ?state, "coordination session interrupted");
            }
        }));

        tracing::debug!(session_id, phase = %Phase::SessionActive, "coordination session opened");
        Ok(session)
    }

    async fn attempt(
        &self,
        session: &dyn CoordinationSession,
        request: &SequenceRequest,
        interrupted: &AtomicBool,
    ) -> Result<SequenceId> {
        let lock_name = SequencerKey::GroupLock(&request.group).resolve(&self.config.root);
        let lock = session.lock(&lock_name).await?;
        tracing::debug!(phase = %Phase::LockHeld, lock = %lock_name, "entered group lock");

        let outcome = self.decide_and_commit(session, request, interrupted).await;

        if let Err(e) = session.unlock(lock).await {
            tracing::warn!(error = %e, lock = %lock_name, "failed to release group lock, it expires with the session");
        }

        let id = outcome?;
        if interrupted.load(Ordering::SeqCst) {
            tracing::info!(candidate = id, "session interrupted during attempt, discarding result");
            return Err(Error::SessionInterrupted);
        }
        Ok(id)
    }

    async fn decide_and_commit(
        &self,
        session: &dyn CoordinationSession,
        request: &SequenceRequest,
        interrupted: &AtomicBool,
    ) -> Result<SequenceId> {
        let snapshot = self.read_snapshot(session, request).await?;
        tracing::debug!(?snapshot, "active instances with assigned sequence ids");

        let strategy = SequenceStrategy::new(
            request.strategy,
            &request.instance_id,
            snapshot,
            request.max_sequence_id,
        )?;
        let candidate = strategy.compute()?;

        if interrupted.load(Ordering::SeqCst) {
            tracing::info!(candidate, "session interrupted before commit, skipping write");
            return Err(Error::SessionInterrupted);
        }

        self.persist(session, request, candidate).await?;
        Ok(candidate)
    }

    async fn read_snapshot(
        &self,
        session: &dyn CoordinationSession,
        request: &SequenceRequest,
    ) -> Result<AssignmentSnapshot> {
        let root = &self.config.root;
        let group_path = SequencerKey::Group(&request.group).resolve(root);

        let mut nodes = Vec::new();
        for name in session.children(&group_path).await? {
            let id = paths::parse_sequence_id(&name)?;
            let path = SequencerKey::Assignment {
                group: &request.group,
                id,
            }
            .resolve(root);

            let Some(value) = session.get(&path).await? else {
                continue;
            };
            let owner = String::from_utf8(value).map_err(|e| {
                Error::Configuration(format!("assignment node {path} has a non-utf8 owner: {e}"))
            })?;
            nodes.push((id, owner));
        }

        tracing::debug!(nodes = nodes.len(), path = %group_path, "read persisted assignments");
        Ok(build_snapshot(nodes, &request.members))
    }

    async fn persist(
        &self,
        session: &dyn CoordinationSession,
        request: &SequenceRequest,
        id: SequenceId,
    ) -> Result<()> {
        let path = SequencerKey::Assignment {
            group: &request.group,
            id,
        }
        .resolve(&self.config.root);
        let owner = request.instance_id.as_bytes();

        match session.get(&path).await? {
            Some(current) if current == owner => {
                tracing::debug!(%path, "assignment already persisted");
                return Ok(());
            }
            Some(current) => {
                let previous = String::from_utf8_lossy(&current);
                if request.members.contains(&*previous) {
                    counter!(OVERWRITTEN_NODES).increment(1);
                    tracing::warn!(%path, previous_owner = %previous, "overwriting assignment held by a current member");
                } else {
                    tracing::info!(%path, previous_owner = %previous, "reclaiming sequence id from departed instance");
                }
                session.delete(&path).await?;
            }
            None => {}
        }

        match session.create(&path, owner).await {
            Ok(()) => Ok(()),
            Err(coordination::Error::NodeExists(_)) => {
                counter!(OVERWRITTEN_NODES).increment(1);
                tracing::warn!(%path, "assignment node appeared while holding the group lock, recreating it");
                session.delete(&path).await?;
                session.create(&path, owner).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Build the decision snapshot from persisted `(id, owner)` pairs, keeping
/// only current members. An instance found owning several ids keeps the
/// lowest.
pub fn build_snapshot(
    nodes: impl IntoIterator<Item = (SequenceId, String)>,
    members: &MembershipSet,
) -> AssignmentSnapshot {
    let mut nodes: Vec<(SequenceId, String)> = nodes.into_iter().collect();
    nodes.sort_by_key(|(id, _)| *id);

    let mut snapshot = AssignmentSnapshot::with_capacity(nodes.len());
    for (id, owner) in nodes {
        if !members.contains(&owner) {
            tracing::debug!(sequence_id = id, owner = %owner, "ignoring assignment of departed instance");
            continue;
        }
        match snapshot.entry(owner) {
            Entry::Occupied(existing) => {
                tracing::warn!(
                    instance_id = %existing.key(),
                    kept = *existing.get(),
                    ignored = id,
                    "instance owns several sequence ids, keeping the lowest"
                );
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
    }
    snapshot
}

async fn close_session(session: &dyn CoordinationSession) {
    if let Err(e) = session.close().await {
        tracing::warn!(session_id = session.id(), error = %e, "failed to close coordination session");
    }
}
