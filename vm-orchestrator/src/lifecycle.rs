//! The VM lifecycle orchestrator.
//!
//! Each operation runs in two halves. The synchronous half claims the VM's
//! in-flight slot, checks the status-machine precondition, writes the
//! transitional status, and returns — a precondition violation is rejected
//! with `IllegalState` before any side effect. The asynchronous half runs on
//! a detached task from the dispatch pool: it drives the provisioner call
//! through the bounded-retry executor, then writes the settled status on
//! confirmed success or `Error` plus a diagnostic message on failure.
//! Asynchronous failures are never returned to the caller; re-fetching the
//! record is the only way to observe them.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use vm_core::error::{Result, VmError};
use vm_core::validation;
use vm_provider::{Provisioner, ProvisionerError};

use crate::config::LifecycleConfig;
use crate::entity::{CreateVmRequest, Operator, VmPatch, VmRecord, VmStatus};
use crate::event::{EventKind, EventSink, VmEvent};
use crate::guard::InFlightOps;
use crate::pool::DispatchPool;
use crate::retry::{self, RetryError, RetryPolicy};
use crate::store::{NewVm, Page, VmStore};

#[derive(Clone)]
pub struct LifecycleOrchestrator {
    store: VmStore,
    provisioner: Arc<dyn Provisioner>,
    sink: EventSink,
    policy: RetryPolicy,
    pool: DispatchPool,
    in_flight: InFlightOps,
}

impl LifecycleOrchestrator {
    pub fn new(
        store: VmStore,
        provisioner: Arc<dyn Provisioner>,
        sink: EventSink,
        config: &LifecycleConfig,
    ) -> Self {
        Self {
            store,
            provisioner,
            sink,
            policy: config.retry_policy(),
            pool: DispatchPool::new(config.max_concurrent_ops, config.op_timeout()),
            in_flight: InFlightOps::new(),
        }
    }

    /// Create a VM: validate, resolve the image, persist the record in
    /// `Pending`, then provision asynchronously. Returns the persisted
    /// record before provisioning begins.
    pub async fn create(&self, req: CreateVmRequest, operator: &Operator) -> Result<VmRecord> {
        validation::validate_vm_name(&req.name)?;
        validation::validate_vm_resources(req.cpu, req.memory_mb, req.disk_gb)?;

        let image = self
            .store
            .get_image(req.image_id)
            .await?
            .ok_or_else(|| VmError::NotFound(format!("image {}", req.image_id)))?;

        let owner_uid = req.owner_uid.unwrap_or_else(|| operator.uid.clone());
        let owner_name = req.owner_name.unwrap_or_else(|| operator.username.clone());

        let record = self
            .store
            .insert_vm(NewVm {
                uid: format!("vm-{}", Uuid::new_v4()),
                name: req.name,
                owner_uid,
                owner_name,
                cpu: req.cpu,
                memory_mb: req.memory_mb,
                disk_gb: req.disk_gb,
                image_id: image.id,
                image_name: image.name,
                image_reference: image.reference,
                creator: operator.uid.clone(),
            })
            .await?;

        // Fresh id, so the claim cannot conflict.
        let guard = self.in_flight.try_begin(record.id)?;

        self.sink.emit(
            VmEvent::new(EventKind::Creation, &record.uid, operator).with_operation("requested"),
        );

        let this = self.clone();
        let vm = record.clone();
        let operator = operator.clone();
        self.pool.dispatch("create", move |token| async move {
            let _guard = guard;
            this.run_create(vm, operator, token).await;
        });

        Ok(record)
    }

    /// Start a stopped VM. Returns once the start has been accepted.
    pub async fn start(&self, id: i64, operator: &Operator) -> Result<()> {
        let guard = self.in_flight.try_begin(id)?;
        let vm = self.store.get_vm(id).await?;

        if vm.status != VmStatus::Stopped {
            return Err(VmError::IllegalState {
                op: "start",
                from: vm.status.to_string(),
            });
        }

        self.store
            .update_vm(
                id,
                VmPatch::status_clearing_message(VmStatus::Starting, &operator.uid),
            )
            .await?;

        let this = self.clone();
        let operator = operator.clone();
        self.pool.dispatch("start", move |token| async move {
            let _guard = guard;
            this.run_start(vm, operator, token).await;
        });

        Ok(())
    }

    /// Stop a running VM. Returns once the stop has been accepted.
    pub async fn stop(&self, id: i64, operator: &Operator) -> Result<()> {
        let guard = self.in_flight.try_begin(id)?;
        let vm = self.store.get_vm(id).await?;

        if vm.status != VmStatus::Running {
            return Err(VmError::IllegalState {
                op: "stop",
                from: vm.status.to_string(),
            });
        }

        self.store
            .update_vm(
                id,
                VmPatch::status_clearing_message(VmStatus::Stopping, &operator.uid),
            )
            .await?;

        let this = self.clone();
        let operator = operator.clone();
        self.pool.dispatch("stop", move |token| async move {
            let _guard = guard;
            this.run_stop(vm, operator, token).await;
        });

        Ok(())
    }

    /// Restart a running VM: a strict stop-then-start sequence. If the stop
    /// phase fails, the start phase never runs.
    pub async fn restart(&self, id: i64, operator: &Operator) -> Result<()> {
        let guard = self.in_flight.try_begin(id)?;
        let vm = self.store.get_vm(id).await?;

        if vm.status != VmStatus::Running {
            return Err(VmError::IllegalState {
                op: "restart",
                from: vm.status.to_string(),
            });
        }

        self.store
            .update_vm(
                id,
                VmPatch::status_clearing_message(VmStatus::Stopping, &operator.uid),
            )
            .await?;

        let this = self.clone();
        let operator = operator.clone();
        self.pool.dispatch("restart", move |token| async move {
            let _guard = guard;
            this.run_restart(vm, operator, token).await;
        });

        Ok(())
    }

    /// Soft-delete: mark the record `MarkedForDeletion` and stop the backend
    /// workload. The record is never physically removed and stays marked
    /// even if the stop fails, so it remains recoverable.
    pub async fn delete(&self, id: i64, operator: &Operator) -> Result<()> {
        let guard = self.in_flight.try_begin(id)?;
        let vm = self.store.get_vm(id).await?;

        if vm.status == VmStatus::MarkedForDeletion {
            return Err(VmError::IllegalState {
                op: "delete",
                from: vm.status.to_string(),
            });
        }

        self.store
            .update_vm(
                id,
                VmPatch::status_clearing_message(VmStatus::MarkedForDeletion, &operator.uid),
            )
            .await?;

        let this = self.clone();
        let operator = operator.clone();
        self.pool.dispatch("delete", move |token| async move {
            let _guard = guard;
            this.run_delete(vm, operator, token).await;
        });

        Ok(())
    }

    /// Recover a soft-deleted VM back to `Stopped`. Purely a store
    /// transition: the workload was already stopped when the VM was marked,
    /// so there is no provisioner call.
    pub async fn recover(&self, id: i64, operator: &Operator) -> Result<VmRecord> {
        let _guard = self.in_flight.try_begin(id)?;
        let vm = self.store.get_vm(id).await?;

        if vm.status != VmStatus::MarkedForDeletion {
            return Err(VmError::IllegalState {
                op: "recover",
                from: vm.status.to_string(),
            });
        }

        self.store
            .update_vm(
                id,
                VmPatch::status_clearing_message(VmStatus::Stopped, &operator.uid),
            )
            .await?;

        self.sink
            .emit(VmEvent::new(EventKind::Update, &vm.uid, operator).with_operation("recover"));

        self.store.get_vm(id).await
    }

    /// Whether an operation currently holds the VM's in-flight slot.
    /// Dispatchers can use this to report a busy resource without issuing
    /// an operation.
    pub fn is_busy(&self, id: i64) -> bool {
        self.in_flight.is_in_flight(id)
    }

    pub async fn get(&self, id: i64) -> Result<VmRecord> {
        self.store.get_vm(id).await
    }

    pub async fn get_by_uid(&self, uid: &str) -> Result<VmRecord> {
        self.store.get_vm_by_uid(uid).await
    }

    pub async fn list_by_owner(&self, owner_uid: &str, page: Page) -> Result<(Vec<VmRecord>, i64)> {
        self.store.list_vms_by_owner(owner_uid, page).await
    }

    // Detached halves. Every path below ends in a status write, never a
    // return value: callers observe outcomes by re-fetching the record.

    async fn run_create(&self, vm: VmRecord, operator: Operator, token: CancellationToken) {
        info!("Provisioning VM: {} ({})", vm.name, vm.uid);

        let desc = vm.descriptor();
        let result =
            retry::execute(&self.policy, &token, || self.provisioner.create_vm(&desc)).await;

        match result {
            Ok(workload) => {
                let patch = VmPatch {
                    status: Some(VmStatus::Running),
                    message: Some(None),
                    node_name: Some(workload.node_name),
                    namespace: Some(workload.namespace),
                    workload_name: Some(workload.workload_name),
                    ip: Some(workload.ip),
                    ssh_port: Some(workload.ssh_port),
                    updater: Some(operator.uid.clone()),
                };

                if let Err(e) = self.store.update_vm(vm.id, patch).await {
                    error!("Failed to record provisioned VM {}: {}", vm.id, e);
                    return;
                }

                info!("Successfully provisioned VM: {}", vm.uid);
                self.sink.emit(
                    VmEvent::new(EventKind::Creation, &vm.uid, &operator)
                        .with_operation("settled"),
                );
            }
            Err(err) => self.settle_failure(&vm, &operator, "create vm", err).await,
        }
    }

    async fn run_start(&self, vm: VmRecord, operator: Operator, token: CancellationToken) {
        let desc = vm.descriptor();
        let result =
            retry::execute(&self.policy, &token, || self.provisioner.start_vm(&desc)).await;

        match result {
            Ok(()) => {
                if let Err(e) = self
                    .store
                    .update_vm(
                        vm.id,
                        VmPatch::status_clearing_message(VmStatus::Running, &operator.uid),
                    )
                    .await
                {
                    error!("Failed to update VM {} status: {}", vm.id, e);
                    return;
                }
                self.sink
                    .emit(VmEvent::new(EventKind::Start, &vm.uid, &operator));
            }
            Err(err) => self.settle_failure(&vm, &operator, "start vm", err).await,
        }
    }

    async fn run_stop(&self, vm: VmRecord, operator: Operator, token: CancellationToken) {
        let desc = vm.descriptor();
        let result =
            retry::execute(&self.policy, &token, || self.provisioner.stop_vm(&desc)).await;

        match result {
            Ok(()) => {
                if let Err(e) = self
                    .store
                    .update_vm(
                        vm.id,
                        VmPatch::status_clearing_message(VmStatus::Stopped, &operator.uid),
                    )
                    .await
                {
                    error!("Failed to update VM {} status: {}", vm.id, e);
                    return;
                }
                self.sink
                    .emit(VmEvent::new(EventKind::Stop, &vm.uid, &operator));
            }
            Err(err) => self.settle_failure(&vm, &operator, "stop vm", err).await,
        }
    }

    async fn run_restart(&self, vm: VmRecord, operator: Operator, token: CancellationToken) {
        let desc = vm.descriptor();

        let stop_result =
            retry::execute(&self.policy, &token, || self.provisioner.stop_vm(&desc)).await;
        if let Err(err) = stop_result {
            self.settle_failure(&vm, &operator, "restart vm (stop phase)", err)
                .await;
            return;
        }

        if let Err(e) = self
            .store
            .update_vm(vm.id, VmPatch::status(VmStatus::Starting, &operator.uid))
            .await
        {
            error!("Failed to update VM {} status: {}", vm.id, e);
            return;
        }

        let start_result =
            retry::execute(&self.policy, &token, || self.provisioner.start_vm(&desc)).await;
        match start_result {
            Ok(()) => {
                if let Err(e) = self
                    .store
                    .update_vm(
                        vm.id,
                        VmPatch::status_clearing_message(VmStatus::Running, &operator.uid),
                    )
                    .await
                {
                    error!("Failed to update VM {} status: {}", vm.id, e);
                    return;
                }
                self.sink
                    .emit(VmEvent::new(EventKind::Restart, &vm.uid, &operator));
            }
            Err(err) => {
                self.settle_failure(&vm, &operator, "restart vm (start phase)", err)
                    .await
            }
        }
    }

    async fn run_delete(&self, vm: VmRecord, operator: Operator, token: CancellationToken) {
        let desc = vm.descriptor();
        let result =
            retry::execute(&self.policy, &token, || self.provisioner.stop_vm(&desc)).await;

        match result {
            Ok(()) => {
                self.sink
                    .emit(VmEvent::new(EventKind::Deletion, &vm.uid, &operator));
            }
            Err(err) => {
                // The record stays MarkedForDeletion either way; only the
                // message records that the workload may still be up.
                let message = failure_message("delete vm", err);
                warn!("VM {}: {}", vm.id, message);

                let patch = VmPatch {
                    message: Some(Some(message)),
                    updater: Some(operator.uid.clone()),
                    ..VmPatch::default()
                };
                if let Err(e) = self.store.update_vm(vm.id, patch).await {
                    error!("Failed to update VM {} message: {}", vm.id, e);
                }
            }
        }
    }

    /// Persist a detached-task failure as `Error` plus diagnostic message.
    async fn settle_failure(
        &self,
        vm: &VmRecord,
        operator: &Operator,
        label: &str,
        err: RetryError<ProvisionerError>,
    ) {
        let message = failure_message(label, err);
        error!("VM {} ({}): {}", vm.id, vm.uid, message);

        if let Err(e) = self
            .store
            .update_vm(
                vm.id,
                VmPatch::status_with_message(VmStatus::Error, message, &operator.uid),
            )
            .await
        {
            error!("Failed to update VM {} status: {}", vm.id, e);
        }
    }
}

fn failure_message(label: &str, err: RetryError<ProvisionerError>) -> String {
    match err {
        RetryError::Canceled => format!("{} canceled: operation timeout exceeded", label),
        RetryError::Exhausted(e) => format!("{} failed: {}", label, e),
    }
}
