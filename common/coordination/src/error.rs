use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("coordination service unavailable: {0}")]
    Unavailable(#[from] etcd_client::Error),

    #[error("coordination service unavailable: {0}")]
    Disconnected(String),

    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("session {0} is lost")]
    SessionLost(i64),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Whether retrying the same operation on a healthy session may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Unavailable(_) | Error::Disconnected(_) | Error::SessionLost(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
