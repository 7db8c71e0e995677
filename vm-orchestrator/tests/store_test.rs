//! Integration tests for the record store: insertion, point lookups,
//! partial updates, and owner pagination.

use vm_orchestrator::test_utils::create_test_db;
use vm_orchestrator::{NewVm, Page, VmPatch, VmStatus, VmStore};

fn new_vm(name: &str, owner_uid: &str) -> NewVm {
    NewVm {
        uid: format!("vm-{}", name),
        name: name.to_string(),
        owner_uid: owner_uid.to_string(),
        owner_name: owner_uid.to_string(),
        cpu: 2,
        memory_mb: 2048,
        disk_gb: 20,
        image_id: 1,
        image_name: "ubuntu-22".to_string(),
        image_reference: "registry/ubuntu:22.04".to_string(),
        creator: owner_uid.to_string(),
    }
}

#[tokio::test]
async fn test_insert_assigns_id_and_defaults() {
    let store = VmStore::new(create_test_db().await);

    let vm = store
        .insert_vm(new_vm("dev-box", "alice"))
        .await
        .expect("Failed to insert VM");

    assert!(vm.id > 0);
    assert_eq!(vm.uid, "vm-dev-box");
    assert_eq!(vm.status, VmStatus::Pending);
    assert_eq!(vm.creator, "alice");
    assert_eq!(vm.updater, "alice");
    assert!(vm.created_at > 0);
    assert_eq!(vm.created_at, vm.updated_at);
    assert!(vm.node_name.is_none());
    assert!(vm.message.is_none());
}

#[tokio::test]
async fn test_get_by_uid() {
    let store = VmStore::new(create_test_db().await);

    let inserted = store
        .insert_vm(new_vm("dev-box", "alice"))
        .await
        .expect("Failed to insert VM");

    let fetched = store
        .get_vm_by_uid(&inserted.uid)
        .await
        .expect("Failed to fetch by uid");
    assert_eq!(fetched.id, inserted.id);

    assert!(store.get_vm_by_uid("vm-missing").await.is_err());
    assert!(store.get_vm(9999).await.is_err());
}

#[tokio::test]
async fn test_partial_update_touches_only_supplied_fields() {
    let store = VmStore::new(create_test_db().await);

    let vm = store
        .insert_vm(new_vm("dev-box", "alice"))
        .await
        .expect("Failed to insert VM");

    // Ensure the refreshed updated_at is observably newer.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    store
        .update_vm(
            vm.id,
            VmPatch::status_with_message(VmStatus::Error, "backend exploded", "bob"),
        )
        .await
        .expect("Failed to update VM");

    let updated = store.get_vm(vm.id).await.expect("Failed to fetch VM");
    assert_eq!(updated.status, VmStatus::Error);
    assert_eq!(updated.message.as_deref(), Some("backend exploded"));
    assert_eq!(updated.updater, "bob");
    assert!(updated.updated_at > vm.updated_at);

    // Everything not in the patch is untouched.
    assert_eq!(updated.uid, vm.uid);
    assert_eq!(updated.name, vm.name);
    assert_eq!(updated.cpu, vm.cpu);
    assert_eq!(updated.memory_mb, vm.memory_mb);
    assert_eq!(updated.disk_gb, vm.disk_gb);
    assert_eq!(updated.image_name, vm.image_name);
    assert_eq!(updated.image_reference, vm.image_reference);
    assert_eq!(updated.creator, vm.creator);
    assert_eq!(updated.created_at, vm.created_at);
}

#[tokio::test]
async fn test_patch_can_clear_message() {
    let store = VmStore::new(create_test_db().await);

    let vm = store
        .insert_vm(new_vm("dev-box", "alice"))
        .await
        .expect("Failed to insert VM");

    store
        .update_vm(
            vm.id,
            VmPatch::status_with_message(VmStatus::Error, "transient", "alice"),
        )
        .await
        .expect("Failed to update VM");

    store
        .update_vm(
            vm.id,
            VmPatch::status_clearing_message(VmStatus::Stopped, "alice"),
        )
        .await
        .expect("Failed to update VM");

    let updated = store.get_vm(vm.id).await.expect("Failed to fetch VM");
    assert_eq!(updated.status, VmStatus::Stopped);
    assert!(updated.message.is_none());
}

#[tokio::test]
async fn test_empty_patch_is_a_no_op() {
    let store = VmStore::new(create_test_db().await);

    let vm = store
        .insert_vm(new_vm("dev-box", "alice"))
        .await
        .expect("Failed to insert VM");

    store
        .update_vm(vm.id, VmPatch::default())
        .await
        .expect("Empty patch should succeed");

    let unchanged = store.get_vm(vm.id).await.expect("Failed to fetch VM");
    assert_eq!(unchanged.updated_at, vm.updated_at);
}

#[tokio::test]
async fn test_update_missing_vm_is_not_found() {
    let store = VmStore::new(create_test_db().await);

    let result = store
        .update_vm(4242, VmPatch::status(VmStatus::Stopped, "alice"))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_list_by_owner_paginates_with_total() {
    let store = VmStore::new(create_test_db().await);

    for i in 0..5 {
        store
            .insert_vm(new_vm(&format!("alice-{}", i), "alice"))
            .await
            .expect("Failed to insert VM");
    }
    store
        .insert_vm(new_vm("bob-0", "bob"))
        .await
        .expect("Failed to insert VM");

    let (page1, total) = store
        .list_vms_by_owner("alice", Page { page: 1, limit: 2 })
        .await
        .expect("Failed to list VMs");
    assert_eq!(page1.len(), 2);
    assert_eq!(total, 5);
    assert!(page1.iter().all(|vm| vm.owner_uid == "alice"));

    let (page3, total) = store
        .list_vms_by_owner("alice", Page { page: 3, limit: 2 })
        .await
        .expect("Failed to list VMs");
    assert_eq!(page3.len(), 1);
    assert_eq!(total, 5);

    let (bob_vms, bob_total) = store
        .list_vms_by_owner("bob", Page::default())
        .await
        .expect("Failed to list VMs");
    assert_eq!(bob_vms.len(), 1);
    assert_eq!(bob_total, 1);

    // Out-of-range pages are normalized rather than erroring.
    let (normalized, _) = store
        .list_vms_by_owner("alice", Page { page: 0, limit: 0 })
        .await
        .expect("Failed to list VMs");
    assert_eq!(normalized.len(), 1);
}

#[tokio::test]
async fn test_image_lookup() {
    let store = VmStore::new(create_test_db().await);

    let image = store
        .insert_image("ubuntu-22", "registry/ubuntu:22.04")
        .await
        .expect("Failed to insert image");

    let found = store
        .get_image(image.id)
        .await
        .expect("Failed to query image")
        .expect("Image should exist");
    assert_eq!(found.name, "ubuntu-22");
    assert_eq!(found.reference, "registry/ubuntu:22.04");

    let missing = store.get_image(999).await.expect("Failed to query image");
    assert!(missing.is_none());
}
