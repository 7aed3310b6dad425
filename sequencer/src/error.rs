use thiserror::Error;

use crate::types::SequenceId;

#[derive(Error, Debug)]
pub enum Error {
    /// Persisted or supplied state is corrupt, e.g. two instances holding the
    /// same sequence id.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("unable to assign a sequence id: all ids in [0, {max_sequence_id}] are in use")]
    CapacityExhausted { max_sequence_id: SequenceId },

    #[error("instance {instance_id} is not a member of group {group}")]
    GroupMembership { instance_id: String, group: String },

    #[error("unable to find group for instance {0}")]
    GroupNotFound(String),

    #[error("group resolver failed: {0}")]
    Resolver(String),

    #[error(transparent)]
    CoordinationUnavailable(coordination::Error),

    #[error("coordination session interrupted")]
    SessionInterrupted,
}

impl Error {
    /// Transient errors drive another coordinator attempt; everything else
    /// aborts the operation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::CoordinationUnavailable(_) | Error::SessionInterrupted
        )
    }
}

impl From<coordination::Error> for Error {
    fn from(e: coordination::Error) -> Self {
        match e {
            coordination::Error::SessionLost(_) => Error::SessionInterrupted,
            coordination::Error::InvalidState(msg) => Error::Configuration(msg),
            other => Error::CoordinationUnavailable(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordination_errors_are_classified() {
        let lost: Error = coordination::Error::SessionLost(7).into();
        assert!(matches!(lost, Error::SessionInterrupted));
        assert!(lost.is_transient());

        let down: Error = coordination::Error::Disconnected("refused".to_string()).into();
        assert!(matches!(down, Error::CoordinationUnavailable(_)));
        assert!(down.is_transient());

        let invalid: Error = coordination::Error::InvalidState("bad name".to_string()).into();
        assert!(matches!(invalid, Error::Configuration(_)));
        assert!(!invalid.is_transient());
    }

    #[test]
    fn strategy_errors_are_fatal() {
        assert!(!Error::CapacityExhausted { max_sequence_id: 2 }.is_transient());
        assert!(!Error::UnknownStrategy("dummy".to_string()).is_transient());
        assert!(!Error::Configuration("dup".to_string()).is_transient());
    }
}
