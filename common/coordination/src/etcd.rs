use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, GetOptions, LeaseKeepAliveStream, LeaseKeeper,
    LockOptions, Txn, TxnOp,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::session::{
    guard, CoordinationService, CoordinationSession, LockHandle, SessionEvents, SessionListener,
    SessionState,
};
use crate::util;

#[derive(Debug, Clone)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    /// TTL of the session lease. Locks are released this long after the
    /// session stops sending keepalives.
    pub session_ttl: i64,
    /// How often to send keepalive pings. Should be well below `session_ttl`.
    pub keepalive_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://localhost:2379".to_string()],
            session_ttl: 10,
            keepalive_interval: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Coordination service backed by etcd.
///
/// A session is an etcd lease kept alive by a background task; locks are
/// taken through the etcd lock service and attached to that lease.
pub struct EtcdCoordination {
    config: EtcdConfig,
}

impl EtcdCoordination {
    pub fn new(config: EtcdConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CoordinationService for EtcdCoordination {
    async fn connect(&self) -> Result<Box<dyn CoordinationSession>> {
        if self.config.endpoints.is_empty() {
            return Err(Error::InvalidState(
                "no coordination endpoints configured".to_string(),
            ));
        }
        let options = ConnectOptions::new().with_connect_timeout(self.config.connect_timeout);
        let client = Client::connect(&self.config.endpoints, Some(options)).await?;
        let session = EtcdSession::start(
            client,
            self.config.session_ttl,
            self.config.keepalive_interval,
        )
        .await?;
        Ok(Box::new(session))
    }
}

pub struct EtcdSession {
    client: Client,
    lease_id: i64,
    events: Arc<SessionEvents>,
    cancel: CancellationToken,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

impl EtcdSession {
    /// Grant the session lease and start keeping it alive.
    pub async fn start(client: Client, ttl: i64, keepalive_interval: Duration) -> Result<Self> {
        let lease_id = client.clone().lease_grant(ttl, None).await?.id();
        let events = Arc::new(SessionEvents::new());
        let cancel = CancellationToken::new();

        let keepalive = {
            let client = client.clone();
            let events = Arc::clone(&events);
            let token = cancel.clone();
            let channel = EtcdKeepalive {
                client,
                lease_id,
                channel: None,
            };
            tokio::spawn(async move {
                run_keepalive(channel, lease_id, ttl, keepalive_interval, events, token).await
            })
        };

        tracing::debug!(lease_id, ttl, "coordination session started");

        Ok(Self {
            client,
            lease_id,
            events,
            cancel,
            keepalive: Mutex::new(Some(keepalive)),
        })
    }

    fn ensure_live(&self) -> Result<()> {
        match self.events.state() {
            SessionState::Lost => Err(Error::SessionLost(self.lease_id)),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl CoordinationSession for EtcdSession {
    fn id(&self) -> i64 {
        self.lease_id
    }

    fn state(&self) -> SessionState {
        self.events.state()
    }

    fn add_listener(&self, listener: SessionListener) {
        self.events.add_listener(listener);
    }

    async fn lock(&self, name: &str) -> Result<LockHandle> {
        self.ensure_live()?;
        let options = LockOptions::new().with_lease(self.lease_id);
        let resp = self.client.clone().lock(name, Some(options)).await?;
        Ok(LockHandle {
            name: name.to_string(),
            key: resp.key().to_vec(),
        })
    }

    async fn unlock(&self, lock: LockHandle) -> Result<()> {
        self.client.clone().unlock(lock.key).await?;
        Ok(())
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        self.ensure_live()?;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let options = GetOptions::new().with_prefix().with_keys_only();
        let resp = self.client.clone().get(prefix, Some(options)).await?;

        let mut names = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            let key = kv
                .key_str()
                .map_err(|e| Error::InvalidState(format!("non-utf8 key under {path}: {e}")))?;
            if let Some(name) = util::child_name(path, key) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_live()?;
        let resp = self.client.clone().get(path, None).await?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn create(&self, path: &str, value: &[u8]) -> Result<()> {
        self.ensure_live()?;
        // CAS: only succeed if the key does not exist (version == 0)
        let txn = Txn::new()
            .when(vec![Compare::version(path, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(path, value, None)]);
        let resp = self.client.clone().txn(txn).await?;
        if resp.succeeded() {
            Ok(())
        } else {
            Err(Error::NodeExists(path.to_string()))
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.ensure_live()?;
        self.client.clone().delete(path, None).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let handle = guard(&self.keepalive).take();
        let Some(handle) = handle else {
            return Ok(());
        };

        self.cancel.cancel();
        drop(handle.await);

        // Revoking the lease releases every lock held by this session
        // immediately instead of after the TTL.
        let revoked = self.client.clone().lease_revoke(self.lease_id).await;
        self.events.transition(SessionState::Lost);
        tracing::debug!(lease_id = self.lease_id, "coordination session closed");
        revoked.map(drop).map_err(Error::from)
    }
}

impl Drop for EtcdSession {
    fn drop(&mut self) {
        // Without keepalives the lease, and any lock attached to it, expires
        // after the session TTL.
        self.cancel.cancel();
    }
}

/// One keepalive exchange with the service.
#[async_trait]
trait KeepaliveChannel: Send {
    /// Send one keepalive and return the lease's remaining TTL in seconds.
    async fn round(&mut self) -> Result<i64>;

    /// Drop any half-open stream so the next round starts a fresh one.
    fn reset(&mut self);
}

struct EtcdKeepalive {
    client: Client,
    lease_id: i64,
    channel: Option<(LeaseKeeper, LeaseKeepAliveStream)>,
}

#[async_trait]
impl KeepaliveChannel for EtcdKeepalive {
    async fn round(&mut self) -> Result<i64> {
        if self.channel.is_none() {
            self.channel = Some(self.client.clone().lease_keep_alive(self.lease_id).await?);
        }
        let Some((keeper, stream)) = self.channel.as_mut() else {
            return Err(Error::Disconnected("keepalive channel unavailable".to_string()));
        };

        keeper.keep_alive().await?;
        match stream.message().await? {
            Some(resp) => Ok(resp.ttl()),
            None => Err(Error::Disconnected("keepalive stream ended".to_string())),
        }
    }

    fn reset(&mut self) {
        self.channel = None;
    }
}

/// Keep the lease alive and report session state. Each round must answer
/// within `interval`; a round that hangs counts as failed.
async fn run_keepalive<C: KeepaliveChannel>(
    mut channel: C,
    lease_id: i64,
    ttl: i64,
    interval: Duration,
    events: Arc<SessionEvents>,
    cancel: CancellationToken,
) {
    let expiry = Duration::from_secs(ttl.max(1).unsigned_abs());
    let mut last_ack = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        let round = tokio::select! {
            _ = cancel.cancelled() => return,
            round = tokio::time::timeout(interval, channel.round()) => round,
        };
        let round = round.unwrap_or_else(|_| {
            Err(Error::Disconnected(format!(
                "keepalive not acknowledged within {interval:?}"
            )))
        });

        match round {
            Ok(remaining) if remaining > 0 => {
                last_ack = Instant::now();
                events.transition(SessionState::Connected);
            }
            Ok(_) => {
                tracing::warn!(lease_id, "session lease expired");
                events.transition(SessionState::Lost);
                return;
            }
            Err(e) => {
                channel.reset();
                if last_ack.elapsed() >= expiry {
                    tracing::warn!(lease_id, error = %e, "no keepalive acknowledged within session ttl");
                    events.transition(SessionState::Lost);
                    return;
                }
                tracing::warn!(lease_id, error = %e, "session keepalive failed");
                events.transition(SessionState::Suspended);
            }
        }
    }
}
