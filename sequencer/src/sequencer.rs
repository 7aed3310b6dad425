use std::sync::Arc;

use crate::coordinator::{DistributedSequenceCoordinator, SequenceRequest};
use crate::error::{Error, Result};
use crate::group::GroupResolver;
use crate::strategy::StrategyKind;
use crate::types::SequenceId;

/// Default number of ids a group may hand out.
pub const DEFAULT_MAX_IDS: u32 = 1024;

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Instance to assign an id to. Defaults to the local instance.
    pub instance_id: Option<String>,
    /// Group to assign within. Defaults to the instance's group.
    pub group: Option<String>,
    pub strategy: StrategyKind,
    /// Number of ids available to the group, so ids range over
    /// `[0, max_ids - 1]`.
    pub max_ids: u32,
}

impl GenerateRequest {
    pub fn new(strategy: StrategyKind) -> Self {
        Self {
            instance_id: None,
            group: None,
            strategy,
            max_ids: DEFAULT_MAX_IDS,
        }
    }
}

/// Resolves who is asking and who else is in the group, then hands the
/// decision to the coordinator.
pub struct Sequencer {
    resolver: Arc<dyn GroupResolver>,
    coordinator: DistributedSequenceCoordinator,
}

impl Sequencer {
    pub fn new(resolver: Arc<dyn GroupResolver>, coordinator: DistributedSequenceCoordinator) -> Self {
        Self {
            resolver,
            coordinator,
        }
    }

    pub async fn generate(&self, request: GenerateRequest) -> Result<SequenceId> {
        if request.max_ids == 0 {
            return Err(Error::Configuration(
                "the number of sequence ids must be at least 1".to_string(),
            ));
        }
        let max_sequence_id = request.max_ids - 1;

        let instance_id = match request.instance_id {
            Some(id) => id,
            None => self.resolver.local_instance_id().await?,
        };
        let group = match request.group {
            Some(group) => group,
            None => self.resolver.resolve_group(&instance_id).await?,
        };

        let members = self.resolver.list_members(&group).await?;
        if !members.contains(&instance_id) {
            tracing::error!(
                instance_id = %instance_id,
                group = %group,
                "instance is not a member of the group"
            );
            return Err(Error::GroupMembership { instance_id, group });
        }

        tracing::info!(
            instance_id = %instance_id,
            group = %group,
            strategy = %request.strategy,
            members = members.len(),
            max_sequence_id,
            "generating sequence id"
        );

        self.coordinator
            .execute(&SequenceRequest {
                group,
                instance_id,
                strategy: request.strategy,
                max_sequence_id,
                members,
            })
            .await
    }
}
