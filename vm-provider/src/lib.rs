//! Provisioner client abstraction.
//!
//! This crate defines the boundary to the external provisioning backend that
//! materializes a VM record as an actual compute workload (for example a
//! cluster scheduler running the VM as a pod). The orchestrator only ever
//! talks to the backend through the [`Provisioner`] trait; everything behind
//! it — scheduling, image pulls, networking — is the backend's business.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// When the `test-helpers` feature is enabled, include the mock provisioner.
#[cfg(feature = "test-helpers")]
pub mod mock;

pub type ProvisionerResult<T> = std::result::Result<T, ProvisionerError>;

/// Failure reported by the provisioning backend.
///
/// The retry executor treats every variant identically; the split exists for
/// logging and for backends that want to report a permanent rejection
/// distinctly from a flaky transport.
#[derive(Error, Debug)]
pub enum ProvisionerError {
    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// The subset of a VM record the backend needs to act on it.
///
/// Built by the orchestrator from the persisted entity; never contains
/// status or audit fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmDescriptor {
    /// External-facing identifier, stable for the VM's lifetime.
    pub uid: String,
    pub name: String,
    pub owner_uid: String,
    pub cpu: i64,
    pub memory_mb: i64,
    pub disk_gb: i64,
    /// Image reference the workload boots from. Immutable after creation.
    pub image_reference: String,
}

/// Placement and endpoint details the backend reports once a workload has
/// been materialized. The orchestrator persists these verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedWorkload {
    pub node_name: String,
    pub namespace: String,
    pub workload_name: String,
    pub ip: String,
    pub ssh_port: i64,
}

/// The core trait for provisioning backends.
///
/// All calls are awaited by the orchestrator's retry executor and may be
/// invoked more than once for the same logical operation; implementations
/// are expected (but not contractually guaranteed) to be idempotent.
#[async_trait::async_trait]
pub trait Provisioner: Send + Sync {
    /// Get the name of the backend (e.g. "k8s", "mock").
    fn name(&self) -> &'static str;

    /// Materialize the workload for a new VM and report its placement.
    async fn create_vm(&self, desc: &VmDescriptor) -> ProvisionerResult<ProvisionedWorkload>;

    /// Start a previously stopped workload.
    async fn start_vm(&self, desc: &VmDescriptor) -> ProvisionerResult<()>;

    /// Stop a running workload without releasing it.
    async fn stop_vm(&self, desc: &VmDescriptor) -> ProvisionerResult<()>;

    /// Release the workload entirely. Irreversible on the backend side.
    ///
    /// Soft deletion in the orchestrator deliberately calls [`stop_vm`]
    /// instead, so a recovered VM can be started again; this call is the
    /// hard-deletion hook for out-of-scope cleanup tooling.
    ///
    /// [`stop_vm`]: Provisioner::stop_vm
    async fn delete_vm(&self, desc: &VmDescriptor) -> ProvisionerResult<()>;
}
