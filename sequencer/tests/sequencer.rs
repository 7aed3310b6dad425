mod common;

use std::sync::Arc;

use coordination::memory::MemoryCoordination;
use sequencer::group::MockGroupResolver;
use sequencer::sequencer::{GenerateRequest, Sequencer};
use sequencer::strategy::StrategyKind;
use sequencer::Error;

use common::{assign, assignments, coordinator, GROUP};

fn build_sequencer(service: &MemoryCoordination, resolver: MockGroupResolver) -> Sequencer {
    Sequencer::new(Arc::new(resolver), coordinator(service))
}

#[tokio::test]
async fn resolves_instance_and_group_by_default() {
    let service = MemoryCoordination::new();
    let resolver = MockGroupResolver::new()
        .local_instance_id_ret("i-2000")
        .members_ret(GROUP, &["i-1000", "i-2000"]);
    assign(&service, 0, "i-1000");

    let id = build_sequencer(&service, resolver)
        .generate(GenerateRequest::new(StrategyKind::FirstAvailable))
        .await
        .unwrap();

    assert_eq!(id, 1);
    assert_eq!(assignments(&service)[&1], "i-2000");
}

#[tokio::test]
async fn explicit_instance_and_group() {
    let service = MemoryCoordination::new();
    let resolver = MockGroupResolver::new().members_ret(GROUP, &["i-1000", "i-1234"]);

    let mut request = GenerateRequest::new(StrategyKind::LastUsed);
    request.instance_id = Some("i-1234".to_string());
    request.group = Some(GROUP.to_string());

    let id = build_sequencer(&service, resolver).generate(request).await.unwrap();
    assert_eq!(id, 0);
}

#[tokio::test]
async fn instance_outside_the_group_is_rejected() {
    let service = MemoryCoordination::new();
    // tagged with the group but no longer pending or running
    let resolver = MockGroupResolver::new()
        .members_ret(GROUP, &["i-1000"])
        .group_ret("i-stopped", GROUP);

    let mut request = GenerateRequest::new(StrategyKind::FirstAvailable);
    request.instance_id = Some("i-stopped".to_string());

    let err = build_sequencer(&service, resolver)
        .generate(request)
        .await
        .unwrap_err();

    assert!(
        matches!(err, Error::GroupMembership { ref instance_id, ref group } if instance_id == "i-stopped" && group == GROUP),
        "{err:?}"
    );
    assert_eq!(service.connects(), 0);
}

#[tokio::test]
async fn untagged_instance_has_no_group() {
    let service = MemoryCoordination::new();
    let resolver = MockGroupResolver::new().local_instance_id_ret("i-lonely");

    let err = build_sequencer(&service, resolver)
        .generate(GenerateRequest::new(StrategyKind::FirstAvailable))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::GroupNotFound(_)), "{err:?}");
}

#[tokio::test]
async fn max_ids_is_a_count() {
    let service = MemoryCoordination::new();
    let resolver = MockGroupResolver::new().members_ret(GROUP, &["i-1000", "i-2000", "i-3000"]);
    assign(&service, 0, "i-1000");
    assign(&service, 1, "i-2000");
    let sequencer = build_sequencer(&service, resolver);

    let mut request = GenerateRequest::new(StrategyKind::FirstAvailable);
    request.instance_id = Some("i-3000".to_string());
    request.max_ids = 2;
    let err = sequencer.generate(request.clone()).await.unwrap_err();
    assert!(matches!(err, Error::CapacityExhausted { max_sequence_id: 1 }), "{err:?}");

    request.max_ids = 3;
    assert_eq!(sequencer.generate(request).await.unwrap(), 2);
}

#[tokio::test]
async fn zero_max_ids_is_rejected() {
    let service = MemoryCoordination::new();
    let resolver = MockGroupResolver::new().members_ret(GROUP, &["i-1000"]);

    let mut request = GenerateRequest::new(StrategyKind::FirstAvailable);
    request.instance_id = Some("i-1000".to_string());
    request.max_ids = 0;

    let err = build_sequencer(&service, resolver)
        .generate(request)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{err:?}");
}
