pub const ATTEMPTS: &str = "sequencer_attempts_total";
pub const INTERRUPTED_ATTEMPTS: &str = "sequencer_interrupted_attempts_total";
pub const UNAVAILABLE_ATTEMPTS: &str = "sequencer_unavailable_attempts_total";
pub const COMMITS: &str = "sequencer_commits_total";

// Assignment nodes that were present when they should not have been and got overwritten
pub const OVERWRITTEN_NODES: &str = "sequencer_overwritten_nodes_total";
