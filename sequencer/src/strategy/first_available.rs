use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::types::SequenceId;

/// Smallest id in `[0, max_sequence_id]` not present in `used`.
pub(super) fn choose(used: &HashSet<SequenceId>, max_sequence_id: SequenceId) -> Result<SequenceId> {
    match (0..=max_sequence_id).find(|id| !used.contains(id)) {
        Some(id) => Ok(id),
        None => {
            tracing::error!(max_sequence_id, "unable to assign a sequence id, all ids are in use");
            Err(Error::CapacityExhausted { max_sequence_id })
        }
    }
}
