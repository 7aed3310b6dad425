use std::collections::HashSet;

use crate::error::Result;
use crate::types::SequenceId;

use super::first_available;

/// One past the highest id in `used`, or the first free id once the top of
/// the range has been handed out.
pub(super) fn choose(used: &HashSet<SequenceId>, max_sequence_id: SequenceId) -> Result<SequenceId> {
    match used.iter().max() {
        None => Ok(0),
        Some(&top) if top < max_sequence_id => Ok(top + 1),
        Some(_) => first_available::choose(used, max_sequence_id),
    }
}
