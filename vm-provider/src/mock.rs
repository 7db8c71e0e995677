//! Scriptable in-memory provisioner for tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tokio::sync::Notify;

use crate::{Provisioner, ProvisionedWorkload, ProvisionerError, ProvisionerResult, VmDescriptor};

/// Sentinel for "fail every attempt".
pub const FAIL_ALWAYS: u32 = u32::MAX;

/// A provisioner whose failures are scripted per operation.
///
/// `fail_*` arms the next `n` calls of an operation to fail; [`FAIL_ALWAYS`]
/// never succeeds. Call counters let tests assert exactly how many attempts
/// the retry executor performed. `hold_create` parks create calls on a gate
/// until released, so tests can observe pre-dispatch state.
#[derive(Debug, Default)]
pub struct MockProvisioner {
    create_failures: AtomicU32,
    start_failures: AtomicU32,
    stop_failures: AtomicU32,
    delete_failures: AtomicU32,

    create_calls: AtomicU32,
    start_calls: AtomicU32,
    stop_calls: AtomicU32,
    delete_calls: AtomicU32,

    create_held: AtomicBool,
    gate: Notify,
}

impl MockProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(&self, times: u32) {
        self.create_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_start(&self, times: u32) {
        self.start_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_stop(&self, times: u32) {
        self.stop_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, times: u32) {
        self.delete_failures.store(times, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u32 {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> u32 {
        self.create_calls() + self.start_calls() + self.stop_calls() + self.delete_calls()
    }

    /// Park subsequent create calls until [`release_create`] runs.
    ///
    /// [`release_create`]: MockProvisioner::release_create
    pub fn hold_create(&self) {
        self.create_held.store(true, Ordering::SeqCst);
    }

    pub fn release_create(&self) {
        self.create_held.store(false, Ordering::SeqCst);
        self.gate.notify_waiters();
    }

    async fn wait_gate(&self) {
        loop {
            if !self.create_held.load(Ordering::SeqCst) {
                return;
            }
            let notified = self.gate.notified();
            // Re-check after registering so a release between the load and
            // the await is not missed.
            if !self.create_held.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    /// Consume one scripted failure if armed. FAIL_ALWAYS never decrements.
    fn should_fail(&self, counter: &AtomicU32) -> bool {
        let mut current = counter.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                return false;
            }
            if current == FAIL_ALWAYS {
                return true;
            }
            match counter.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

#[async_trait::async_trait]
impl Provisioner for MockProvisioner {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_vm(&self, desc: &VmDescriptor) -> ProvisionerResult<ProvisionedWorkload> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_gate().await;

        if self.should_fail(&self.create_failures) {
            return Err(ProvisionerError::Unavailable(
                "scripted create failure".to_string(),
            ));
        }

        Ok(ProvisionedWorkload {
            node_name: "mock-node-1".to_string(),
            namespace: "vms".to_string(),
            workload_name: format!("workload-{}", desc.name),
            ip: "10.0.0.2".to_string(),
            ssh_port: 30022,
        })
    }

    async fn start_vm(&self, _desc: &VmDescriptor) -> ProvisionerResult<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);

        if self.should_fail(&self.start_failures) {
            return Err(ProvisionerError::Unavailable(
                "scripted start failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn stop_vm(&self, _desc: &VmDescriptor) -> ProvisionerResult<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);

        if self.should_fail(&self.stop_failures) {
            return Err(ProvisionerError::Unavailable(
                "scripted stop failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn delete_vm(&self, _desc: &VmDescriptor) -> ProvisionerResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        if self.should_fail(&self.delete_failures) {
            return Err(ProvisionerError::Unavailable(
                "scripted delete failure".to_string(),
            ));
        }
        Ok(())
    }
}
