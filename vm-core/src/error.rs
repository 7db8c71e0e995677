use thiserror::Error;

pub type Result<T> = std::result::Result<T, VmError>;

/// Error taxonomy shared across the lifecycle stack.
///
/// Synchronous failures (validation, preconditions, conflicts) are returned
/// directly to the caller. Failures inside a detached provisioning task are
/// never returned anywhere; they are persisted onto the VM record as an
/// `Error` status plus message, and a caller only observes them by
/// re-fetching the record.
#[derive(Error, Debug)]
pub enum VmError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Cannot {op} a VM in status '{from}'")]
    IllegalState { op: &'static str, from: String },

    #[error("Conflicting operation in flight: {0}")]
    Conflict(String),

    #[error("Operation canceled before completion")]
    Canceled,

    #[error("Provisioner error: {0}")]
    Provisioner(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VmError {
    /// True for errors a caller can fix by changing the request, as opposed
    /// to infrastructure failures.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            VmError::Validation(_)
                | VmError::NotFound(_)
                | VmError::PermissionDenied(_)
                | VmError::IllegalState { .. }
                | VmError::Conflict(_)
        )
    }
}
