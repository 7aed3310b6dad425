#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use coordination::etcd::{EtcdConfig, EtcdCoordination};
use coordination::memory::MemoryCoordination;
use coordination::CoordinationService;
use sequencer::coordinator::{
    CoordinatorConfig, DistributedSequenceCoordinator, SequenceRequest, DEFAULT_ROOT,
};
use sequencer::paths::SequencerKey;
use sequencer::strategy::StrategyKind;
use sequencer::types::{MembershipSet, SequenceId};

pub const ETCD_ENDPOINT: &str = "http://localhost:2379";
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub const GROUP: &str = "web";

pub fn members(ids: &[&str]) -> MembershipSet {
    ids.iter().map(|s| s.to_string()).collect()
}

pub fn request(
    instance_id: &str,
    strategy: StrategyKind,
    max_sequence_id: SequenceId,
    members: &MembershipSet,
) -> SequenceRequest {
    SequenceRequest {
        group: GROUP.to_string(),
        instance_id: instance_id.to_string(),
        strategy,
        max_sequence_id,
        members: members.clone(),
    }
}

pub fn test_config(root: &str) -> CoordinatorConfig {
    CoordinatorConfig {
        root: root.to_string(),
        retry_interval: Duration::from_millis(10),
        max_attempts: None,
    }
}

pub fn coordinator(service: &MemoryCoordination) -> DistributedSequenceCoordinator {
    coordinator_with(service, test_config(DEFAULT_ROOT))
}

pub fn coordinator_with(
    service: &MemoryCoordination,
    config: CoordinatorConfig,
) -> DistributedSequenceCoordinator {
    let service: Arc<dyn CoordinationService> = Arc::new(service.clone());
    DistributedSequenceCoordinator::new(service, config)
}

pub fn assignment_path(id: SequenceId) -> String {
    SequencerKey::Assignment { group: GROUP, id }.resolve(DEFAULT_ROOT)
}

pub fn lock_path() -> String {
    SequencerKey::GroupLock(GROUP).resolve(DEFAULT_ROOT)
}

/// Seed an assignment node as if another instance had committed it.
pub fn assign(service: &MemoryCoordination, id: SequenceId, instance_id: &str) {
    service.put_node(&assignment_path(id), instance_id.as_bytes());
}

/// Persisted assignments of [`GROUP`], keyed by sequence id.
pub fn assignments(service: &MemoryCoordination) -> BTreeMap<SequenceId, String> {
    let prefix = format!("{}/", SequencerKey::Group(GROUP).resolve(DEFAULT_ROOT));
    service
        .nodes()
        .into_iter()
        .filter_map(|(path, value)| {
            let id = path.strip_prefix(prefix.as_str())?.parse().ok()?;
            Some((id, String::from_utf8(value).ok()?))
        })
        .collect()
}

// ── etcd ────────────────────────────────────────────────────────

pub fn test_root(test_name: &str) -> String {
    format!("/test-{}-{}", test_name, uuid::Uuid::new_v4())
}

pub fn etcd_coordinator(root: &str) -> DistributedSequenceCoordinator {
    let service = EtcdCoordination::new(EtcdConfig {
        endpoints: vec![ETCD_ENDPOINT.to_string()],
        session_ttl: 5,
        keepalive_interval: Duration::from_secs(1),
        ..Default::default()
    });
    DistributedSequenceCoordinator::new(Arc::new(service), test_config(root))
}

pub async fn wait_for_condition<F, Fut>(timeout: Duration, interval: Duration, f: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if f().await {
            return;
        }
        tokio::time::sleep(interval).await;
    }
    panic!("condition not met within {timeout:?}");
}
