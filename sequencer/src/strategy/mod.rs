mod first_available;
mod last_used;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::{AssignmentSnapshot, SequenceId};

/// The id-selection algorithms. New algorithms are registered here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum StrategyKind {
    /// Smallest id not currently in use.
    FirstAvailable,
    /// One past the highest id in use; fills gaps once the top of the range
    /// has been reached.
    LastUsed,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::FirstAvailable => "first-available",
            StrategyKind::LastUsed => "last-used",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "first-available" => Ok(StrategyKind::FirstAvailable),
            "last-used" => Ok(StrategyKind::LastUsed),
            other => {
                tracing::error!(strategy = other, "unable to find a strategy to execute");
                Err(Error::UnknownStrategy(other.to_string()))
            }
        }
    }
}

/// Picks a sequence id for one instance from a snapshot of current
/// assignments.
///
/// The snapshot must already be filtered to the group's current members.
/// `compute` is a pure function of the constructor arguments, so repeating
/// it against the same snapshot always yields the same answer.
#[derive(Debug, Clone)]
pub struct SequenceStrategy {
    kind: StrategyKind,
    instance_id: String,
    snapshot: AssignmentSnapshot,
    max_sequence_id: SequenceId,
}

impl SequenceStrategy {
    /// Fails with [`Error::Configuration`] if two instances in `snapshot`
    /// hold the same id.
    pub fn new(
        kind: StrategyKind,
        instance_id: impl Into<String>,
        snapshot: AssignmentSnapshot,
        max_sequence_id: SequenceId,
    ) -> Result<Self> {
        let distinct: HashSet<SequenceId> = snapshot.values().copied().collect();
        if distinct.len() != snapshot.len() {
            return Err(Error::Configuration(
                "precondition check failed: assignments contain duplicate sequence ids"
                    .to_string(),
            ));
        }

        Ok(Self {
            kind,
            instance_id: instance_id.into(),
            snapshot,
            max_sequence_id,
        })
    }

    /// Like [`new`](Self::new), resolving the strategy from its name.
    pub fn named(
        name: &str,
        instance_id: impl Into<String>,
        snapshot: AssignmentSnapshot,
        max_sequence_id: SequenceId,
    ) -> Result<Self> {
        let kind = name.parse()?;
        Self::new(kind, instance_id, snapshot, max_sequence_id)
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn compute(&self) -> Result<SequenceId> {
        // An instance that already holds an id keeps it.
        if let Some(existing) = self.snapshot.get(&self.instance_id) {
            return Ok(*existing);
        }

        let used: HashSet<SequenceId> = self.snapshot.values().copied().collect();
        match self.kind {
            StrategyKind::FirstAvailable => {
                first_available::choose(&used, self.max_sequence_id)
            }
            StrategyKind::LastUsed => last_used::choose(&used, self.max_sequence_id),
        }
    }
}
