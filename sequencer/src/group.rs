//! Group membership lookups against the cloud inventory.
//!
//! Follows the common-s3 pattern: a trait used by the sequencer, a real
//! implementation backed by the AWS SDK, and a mock that is always available
//! for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_ec2::types::Filter;

use crate::error::{Error, Result};
use crate::types::MembershipSet;

/// Tag that EC2 autoscaling puts on every instance it launches.
pub const AUTOSCALING_GROUP_TAG: &str = "aws:autoscaling:groupName";

#[async_trait]
pub trait GroupResolver: Send + Sync {
    /// Identity of the instance this process runs on.
    async fn local_instance_id(&self) -> Result<String>;

    /// Group the instance belongs to. Fails with [`Error::GroupNotFound`] if
    /// it is not associated with one.
    async fn resolve_group(&self, instance_id: &str) -> Result<String>;

    /// Instances currently in the group.
    async fn list_members(&self, group: &str) -> Result<MembershipSet>;
}

/// Resolves autoscaling groups through the EC2 API and the instance metadata
/// service.
pub struct Ec2GroupResolver {
    ec2: aws_sdk_ec2::Client,
    imds: aws_config::imds::Client,
}

impl Ec2GroupResolver {
    pub fn new(ec2: aws_sdk_ec2::Client, imds: aws_config::imds::Client) -> Self {
        Self { ec2, imds }
    }

    pub async fn from_region(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self::new(
            aws_sdk_ec2::Client::new(&config),
            aws_config::imds::Client::builder().build(),
        )
    }
}

#[async_trait]
impl GroupResolver for Ec2GroupResolver {
    async fn local_instance_id(&self) -> Result<String> {
        let instance_id = self
            .imds
            .get("/latest/meta-data/instance-id")
            .await
            .map_err(|e| Error::Resolver(format!("failed to read instance metadata: {e}")))?;
        let instance_id: &str = instance_id.as_ref();
        Ok(instance_id.to_string())
    }

    async fn resolve_group(&self, instance_id: &str) -> Result<String> {
        let resp = self
            .ec2
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| {
                Error::Resolver(format!(
                    "failed to describe instance {instance_id}: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        let group = resp
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .flat_map(|i| i.tags())
            .find(|tag| tag.key() == Some(AUTOSCALING_GROUP_TAG))
            .and_then(|tag| tag.value())
            .map(str::to_string);

        match group {
            Some(group) => {
                tracing::debug!(instance_id, group = %group, "resolved autoscaling group");
                Ok(group)
            }
            None => Err(Error::GroupNotFound(instance_id.to_string())),
        }
    }

    async fn list_members(&self, group: &str) -> Result<MembershipSet> {
        let group_filter = Filter::builder()
            .name(format!("tag:{AUTOSCALING_GROUP_TAG}"))
            .values(group)
            .build();
        let state_filter = Filter::builder()
            .name("instance-state-name")
            .values("pending")
            .values("running")
            .build();

        let mut members = MembershipSet::new();
        let mut next_token: Option<String> = None;
        loop {
            let resp = self
                .ec2
                .describe_instances()
                .filters(group_filter.clone())
                .filters(state_filter.clone())
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| {
                    Error::Resolver(format!(
                        "failed to list instances of group {group}: {}",
                        DisplayErrorContext(&e)
                    ))
                })?;

            members.extend(
                resp.reservations()
                    .iter()
                    .flat_map(|r| r.instances())
                    .filter_map(|i| i.instance_id())
                    .map(str::to_string),
            );

            match resp.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        tracing::debug!(group, members = ?members, "found instances in autoscaling group");
        Ok(members)
    }
}

/// Mock resolver for testing - always available, no conditional compilation needed
#[derive(Clone, Default)]
pub struct MockGroupResolver {
    local_instance_id: Option<String>,
    groups: HashMap<String, String>,
    members: HashMap<String, MembershipSet>,
}

impl MockGroupResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_instance_id_ret(mut self, instance_id: &str) -> Self {
        self.local_instance_id = Some(instance_id.to_string());
        self
    }

    /// Tag `instance_id` with `group` without adding it to the membership.
    pub fn group_ret(mut self, instance_id: &str, group: &str) -> Self {
        self.groups
            .insert(instance_id.to_string(), group.to_string());
        self
    }

    /// Set the members of `group`, tagging each of them with it.
    pub fn members_ret(mut self, group: &str, instance_ids: &[&str]) -> Self {
        for instance_id in instance_ids {
            self.groups
                .insert(instance_id.to_string(), group.to_string());
        }
        self.members.insert(
            group.to_string(),
            instance_ids.iter().map(|s| s.to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl GroupResolver for MockGroupResolver {
    async fn local_instance_id(&self) -> Result<String> {
        self.local_instance_id
            .clone()
            .ok_or_else(|| Error::Resolver("instance metadata unavailable".to_string()))
    }

    async fn resolve_group(&self, instance_id: &str) -> Result<String> {
        self.groups
            .get(instance_id)
            .cloned()
            .ok_or_else(|| Error::GroupNotFound(instance_id.to_string()))
    }

    async fn list_members(&self, group: &str) -> Result<MembershipSet> {
        Ok(self.members.get(group).cloned().unwrap_or_default())
    }
}
