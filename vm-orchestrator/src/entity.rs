use serde::{Deserialize, Serialize};
use vm_provider::VmDescriptor;

/// Lifecycle status of a VM record.
///
/// `Pending`, `Starting` and `Stopping` are transitional: written before the
/// provisioner call begins. `Running` and `Stopped` are settled: written only
/// after the backend confirmed the operation. `Error` carries a diagnostic
/// message on the record; no operation accepts it as a precondition directly,
/// but soft deletion does (its precondition is only "not already marked"),
/// so the escape path out of `Error` is delete, then recover, then start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    /// Created, workload being materialized.
    Pending,
    Starting,
    Running,
    Stopping,
    Stopped,
    MarkedForDeletion,
    Error,
}

impl VmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmStatus::Pending => "pending",
            VmStatus::Starting => "starting",
            VmStatus::Running => "running",
            VmStatus::Stopping => "stopping",
            VmStatus::Stopped => "stopped",
            VmStatus::MarkedForDeletion => "markedfordeletion",
            VmStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for VmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted VM entity.
///
/// Status and message are mutated exclusively by the orchestrator. The uid,
/// image reference and resource spec never change after creation. Placement
/// and endpoint fields are populated from the provisioner's create response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmRecord {
    pub id: i64,
    pub uid: String,
    pub name: String,
    pub owner_uid: String,
    pub owner_name: String,
    pub cpu: i64,
    pub memory_mb: i64,
    pub disk_gb: i64,
    pub image_id: i64,
    pub image_name: String,
    /// Boot reference copied from the image at create time, so descriptors
    /// stay buildable from the record even if the registry row changes.
    pub image_reference: String,
    pub node_name: Option<String>,
    pub namespace: Option<String>,
    pub workload_name: Option<String>,
    pub ip: Option<String>,
    pub ssh_port: Option<i64>,
    pub status: VmStatus,
    pub message: Option<String>,
    pub creator: String,
    pub updater: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
}

impl VmRecord {
    /// Build the descriptor the provisioning backend acts on.
    pub fn descriptor(&self) -> VmDescriptor {
        VmDescriptor {
            uid: self.uid.clone(),
            name: self.name.clone(),
            owner_uid: self.owner_uid.clone(),
            cpu: self.cpu,
            memory_mb: self.memory_mb,
            disk_gb: self.disk_gb,
            image_reference: self.image_reference.clone(),
        }
    }
}

/// Registered boot image: a display name plus the reference the backend
/// boots from (e.g. a registry path). Lookup-only from the orchestrator's
/// perspective; registry management is a separate service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: i64,
    pub name: String,
    pub reference: String,
    pub created_at: i64,
}

/// Acting identity forwarded by the dispatcher. Authorization has already
/// happened by the time this reaches the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub uid: String,
    pub username: String,
}

/// Payload of a create operation.
///
/// Owner defaults to the operator; the admin dispatcher path may create a
/// VM on another user's behalf by filling the owner fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVmRequest {
    pub name: String,
    pub image_id: i64,
    pub cpu: i64,
    pub memory_mb: i64,
    pub disk_gb: i64,
    #[serde(default)]
    pub owner_uid: Option<String>,
    #[serde(default)]
    pub owner_name: Option<String>,
}

/// Partial update of a VM record. Only fields set to `Some` are written;
/// `updated_at` is always refreshed by the store.
#[derive(Debug, Clone, Default)]
pub struct VmPatch {
    pub status: Option<VmStatus>,
    pub message: Option<Option<String>>,
    pub node_name: Option<String>,
    pub namespace: Option<String>,
    pub workload_name: Option<String>,
    pub ip: Option<String>,
    pub ssh_port: Option<i64>,
    pub updater: Option<String>,
}

impl VmPatch {
    pub fn status(status: VmStatus, updater: &str) -> Self {
        Self {
            status: Some(status),
            updater: Some(updater.to_string()),
            ..Self::default()
        }
    }

    /// Status write that also replaces the diagnostic message.
    pub fn status_with_message(status: VmStatus, message: impl Into<String>, updater: &str) -> Self {
        Self {
            status: Some(status),
            message: Some(Some(message.into())),
            updater: Some(updater.to_string()),
            ..Self::default()
        }
    }

    /// Status write that clears any stale diagnostic message.
    pub fn status_clearing_message(status: VmStatus, updater: &str) -> Self {
        Self {
            status: Some(status),
            message: Some(None),
            updater: Some(updater.to_string()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.message.is_none()
            && self.node_name.is_none()
            && self.namespace.is_none()
            && self.workload_name.is_none()
            && self.ip.is_none()
            && self.ssh_port.is_none()
            && self.updater.is_none()
    }
}

/// Current time in epoch milliseconds, the timestamp unit of all records.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
