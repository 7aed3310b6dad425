use coordination::util::join_path;

use crate::error::{Error, Result};
use crate::types::SequenceId;

/// All node paths used by the sequencer.
///
/// Full layout:
/// ```text
/// {root}/{group}/{sequence_id}   value: owning instance id (utf-8)
/// {root}/_locks/{group}          group lock
/// ```
///
/// Locks live outside `{root}/{group}` so that lock keys never show up as
/// children of the group.
pub enum SequencerKey<'a> {
    Group(&'a str),
    Assignment { group: &'a str, id: SequenceId },
    GroupLock(&'a str),
}

impl SequencerKey<'_> {
    pub fn resolve(&self, root: &str) -> String {
        match self {
            SequencerKey::Group(group) => join_path(root, group),
            SequencerKey::Assignment { group, id } => {
                join_path(&join_path(root, group), &id.to_string())
            }
            SequencerKey::GroupLock(group) => join_path(&join_path(root, "_locks"), group),
        }
    }
}

/// Parse an assignment node name. Only the canonical decimal form written by
/// the sequencer is accepted.
pub fn parse_sequence_id(name: &str) -> Result<SequenceId> {
    name.parse::<SequenceId>()
        .ok()
        .filter(|id| id.to_string() == name)
        .ok_or_else(|| Error::Configuration(format!("invalid sequence id node: {name:?}")))
}
