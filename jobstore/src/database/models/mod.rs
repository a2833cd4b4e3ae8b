//! Database models.

pub mod job;
pub mod tag;

pub use job::*;
pub use tag::*;
