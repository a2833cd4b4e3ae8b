//! jobstore library crate.
//!
//! Persistence and lifecycle management for HPC job records: a cache table
//! for fresh starts, a durable table for everything else, a background start
//! worker, a periodic commit service and a batched archive importer.

pub mod config;
pub mod database;
pub mod error;
pub mod hooks;
pub mod importer;
pub mod lifecycle;
pub mod logging;
pub mod worker;

pub use error::{Error, Result};
