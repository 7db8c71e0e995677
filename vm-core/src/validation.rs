//! Validation for lifecycle request inputs.
//!
//! Requests arrive pre-authorized from the dispatcher, but their payloads are
//! still untrusted. Everything here runs before any record is written.

use crate::error::{Result, VmError};

/// Maximum length of a VM display name (DNS label limit, since the name
/// flows into the backend workload name).
pub const MAX_VM_NAME_LEN: usize = 63;

/// Resource ceilings for a single VM. Requests above these are rejected
/// outright rather than forwarded to the provisioner.
pub const MAX_CPU: i64 = 64;
pub const MAX_MEMORY_MB: i64 = 512 * 1024;
pub const MAX_DISK_GB: i64 = 2048;

/// Validate a VM display name.
///
/// Names must be non-empty, at most 63 characters, lowercase alphanumeric
/// with interior hyphens (RFC 1123 label rules), because the provisioner
/// derives the workload name from them.
pub fn validate_vm_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_VM_NAME_LEN {
        return Err(VmError::Validation(format!(
            "VM name must be between 1 and {} characters",
            MAX_VM_NAME_LEN
        )));
    }

    if name.starts_with('-') || name.ends_with('-') {
        return Err(VmError::Validation(
            "VM name cannot start or end with a hyphen".to_string(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(VmError::Validation(format!(
            "VM name '{}' contains invalid characters (only lowercase alphanumeric and '-' allowed)",
            name
        )));
    }

    Ok(())
}

/// Validate the immutable resource spec of a create request.
pub fn validate_vm_resources(cpu: i64, memory_mb: i64, disk_gb: i64) -> Result<()> {
    if cpu <= 0 || cpu > MAX_CPU {
        return Err(VmError::Validation(format!(
            "CPU count must be between 1 and {}",
            MAX_CPU
        )));
    }

    if memory_mb <= 0 || memory_mb > MAX_MEMORY_MB {
        return Err(VmError::Validation(format!(
            "Memory must be between 1 and {} MB",
            MAX_MEMORY_MB
        )));
    }

    if disk_gb <= 0 || disk_gb > MAX_DISK_GB {
        return Err(VmError::Validation(format!(
            "Disk must be between 1 and {} GB",
            MAX_DISK_GB
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_vm_name_valid() {
        assert!(validate_vm_name("dev-box").is_ok());
        assert!(validate_vm_name("vm1").is_ok());
        assert!(validate_vm_name("a").is_ok());
    }

    #[test]
    fn test_validate_vm_name_invalid() {
        assert!(validate_vm_name("").is_err());
        assert!(validate_vm_name("-leading").is_err());
        assert!(validate_vm_name("trailing-").is_err());
        assert!(validate_vm_name("Uppercase").is_err());
        assert!(validate_vm_name("has space").is_err());
        assert!(validate_vm_name(&"x".repeat(64)).is_err());
    }

    #[test]
    fn test_validate_vm_resources() {
        assert!(validate_vm_resources(2, 2048, 20).is_ok());
        assert!(validate_vm_resources(0, 2048, 20).is_err());
        assert!(validate_vm_resources(2, 0, 20).is_err());
        assert!(validate_vm_resources(2, 2048, 0).is_err());
        assert!(validate_vm_resources(65, 2048, 20).is_err());
        assert!(validate_vm_resources(2, 2048, 4096).is_err());
    }
}
