//! VM lifecycle orchestration business logic
//!
//! This crate owns the status machine over persisted VM records and drives
//! the external provisioning backend asynchronously: callers get "accepted"
//! back immediately, a detached bounded task does the provisioning with
//! retries, and the record's status is the source of truth for the outcome.
//! It is consumed by the request-dispatching service but can also be driven
//! by CLI commands, background workers, or other entry points.

pub mod config;
pub mod db;
pub mod entity;
pub mod event;
pub mod guard;
pub mod lifecycle;
pub mod pool;
pub mod retry;
pub mod store;
#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use config::LifecycleConfig;
pub use entity::{CreateVmRequest, Image, Operator, VmPatch, VmRecord, VmStatus};
pub use event::{EventKind, EventSink, VmEvent};
pub use lifecycle::LifecycleOrchestrator;
pub use retry::{RetryError, RetryPolicy};
pub use store::{NewVm, Page, VmStore};
