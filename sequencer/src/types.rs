use std::collections::{HashMap, HashSet};

/// Small dense integer identity of an instance within its group.
pub type SequenceId = u32;

/// Current (instance id -> sequence id) assignments used for one decision.
pub type AssignmentSnapshot = HashMap<String, SequenceId>;

/// Instance ids currently belonging to a group.
pub type MembershipSet = HashSet<String>;
