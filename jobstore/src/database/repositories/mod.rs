//! Repository layer for database access.
//!
//! Repositories hide the SQL behind async traits; [`JobTxOps`] holds the
//! connection-level statements they share with transactional callers.

pub mod job;
pub mod job_tx;
pub mod tag;

pub use job::*;
pub use job_tx::*;
pub use tag::*;
