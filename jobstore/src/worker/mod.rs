//! Background tasks: the start queue consumer and the periodic commit service.

pub mod commit_service;
pub mod start_worker;

pub use commit_service::CommitJobService;
pub use start_worker::{InsertMode, StartRequest, StartWorker, StartWorkerConfig};
