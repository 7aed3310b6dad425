//! Session-scoped access to a distributed coordination service.
//!
//! Callers open a [`CoordinationSession`] through a [`CoordinationService`],
//! take group-scoped exclusive locks, and read or write small hierarchical
//! nodes. Session liveness is reported to registered listeners so callers can
//! detect that a lock may have been lost underneath them.
//!
//! Two implementations are provided: [`etcd::EtcdCoordination`] for real
//! deployments and [`memory::MemoryCoordination`], an in-process service with
//! fault injection for tests.

pub mod error;
pub mod etcd;
pub mod memory;
pub mod session;
pub mod util;

pub use error::{Error, Result};
pub use session::{
    CoordinationService, CoordinationSession, LockHandle, SessionListener, SessionState,
};
