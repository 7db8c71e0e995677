//! SQLite-backed record store for VM entities and the image lookup table.
//!
//! Writes are blind partial updates of only the supplied fields; the per-VM
//! operation guard (not the store) serializes conflicting writers.

use sqlx::SqlitePool;
use vm_core::error::{Result, VmError};

use crate::entity::{now_millis, Image, VmPatch, VmRecord, VmStatus};

/// Page parameters for owner listings.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self { page: 1, limit: 10 }
    }
}

impl Page {
    fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            limit: self.limit.max(1),
        }
    }
}

/// Fields supplied when inserting a new record; id and timestamps are
/// assigned by the store.
#[derive(Debug, Clone)]
pub struct NewVm {
    pub uid: String,
    pub name: String,
    pub owner_uid: String,
    pub owner_name: String,
    pub cpu: i64,
    pub memory_mb: i64,
    pub disk_gb: i64,
    pub image_id: i64,
    pub image_name: String,
    pub image_reference: String,
    pub creator: String,
}

#[derive(Clone)]
pub struct VmStore {
    pool: SqlitePool,
}

impl VmStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new VM record in `Pending` status and return it with its
    /// store-assigned id.
    pub async fn insert_vm(&self, new: NewVm) -> Result<VmRecord> {
        let now = now_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO vms (uid, name, owner_uid, owner_name, cpu, memory_mb, disk_gb,
                             image_id, image_name, image_reference, status, creator, updater,
                             created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.uid)
        .bind(&new.name)
        .bind(&new.owner_uid)
        .bind(&new.owner_name)
        .bind(new.cpu)
        .bind(new.memory_mb)
        .bind(new.disk_gb)
        .bind(new.image_id)
        .bind(&new.image_name)
        .bind(&new.image_reference)
        .bind(VmStatus::Pending)
        .bind(&new.creator)
        .bind(&new.creator)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_vm(result.last_insert_rowid()).await
    }

    /// Get a single VM by its store-assigned id.
    pub async fn get_vm(&self, id: i64) -> Result<VmRecord> {
        let row = sqlx::query_as::<_, VmRow>("SELECT * FROM vms WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| VmError::NotFound(format!("VM {}", id)))?;

        Ok(row.into())
    }

    /// Get a single VM by its external-facing uid.
    pub async fn get_vm_by_uid(&self, uid: &str) -> Result<VmRecord> {
        let row = sqlx::query_as::<_, VmRow>("SELECT * FROM vms WHERE uid = ?")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| VmError::NotFound(format!("VM {}", uid)))?;

        Ok(row.into())
    }

    /// Apply a partial update, writing only the supplied fields and
    /// refreshing `updated_at`.
    pub async fn update_vm(&self, id: i64, patch: VmPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut query = "UPDATE vms SET updated_at = ?".to_string();

        if patch.status.is_some() {
            query.push_str(", status = ?");
        }
        if patch.message.is_some() {
            query.push_str(", message = ?");
        }
        if patch.node_name.is_some() {
            query.push_str(", node_name = ?");
        }
        if patch.namespace.is_some() {
            query.push_str(", namespace = ?");
        }
        if patch.workload_name.is_some() {
            query.push_str(", workload_name = ?");
        }
        if patch.ip.is_some() {
            query.push_str(", ip = ?");
        }
        if patch.ssh_port.is_some() {
            query.push_str(", ssh_port = ?");
        }
        if patch.updater.is_some() {
            query.push_str(", updater = ?");
        }
        query.push_str(" WHERE id = ?");

        let mut q = sqlx::query(&query).bind(now_millis());

        if let Some(status) = patch.status {
            q = q.bind(status);
        }
        if let Some(message) = patch.message {
            q = q.bind(message);
        }
        if let Some(node_name) = patch.node_name {
            q = q.bind(node_name);
        }
        if let Some(namespace) = patch.namespace {
            q = q.bind(namespace);
        }
        if let Some(workload_name) = patch.workload_name {
            q = q.bind(workload_name);
        }
        if let Some(ip) = patch.ip {
            q = q.bind(ip);
        }
        if let Some(ssh_port) = patch.ssh_port {
            q = q.bind(ssh_port);
        }
        if let Some(updater) = patch.updater {
            q = q.bind(updater);
        }

        let result = q.bind(id).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(VmError::NotFound(format!("VM {}", id)));
        }

        Ok(())
    }

    /// List one page of an owner's VMs, newest first, with the total count.
    pub async fn list_vms_by_owner(&self, owner_uid: &str, page: Page) -> Result<(Vec<VmRecord>, i64)> {
        let page = page.normalized();

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vms WHERE owner_uid = ?")
            .bind(owner_uid)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, VmRow>(
            "SELECT * FROM vms WHERE owner_uid = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(owner_uid)
        .bind(page.limit)
        .bind((page.page - 1) * page.limit)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows.into_iter().map(|row| row.into()).collect(), total))
    }

    /// Look up a registered image. Returns `None` rather than an error so
    /// the caller decides the failure semantics.
    pub async fn get_image(&self, id: i64) -> Result<Option<Image>> {
        let row = sqlx::query_as::<_, ImageRow>("SELECT * FROM images WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.into()))
    }

    /// Register an image. Used by fixtures and bootstrap tooling; the image
    /// registry's own CRUD service lives elsewhere.
    pub async fn insert_image(&self, name: &str, reference: &str) -> Result<Image> {
        let now = now_millis();

        let result =
            sqlx::query("INSERT INTO images (name, reference, created_at) VALUES (?, ?, ?)")
                .bind(name)
                .bind(reference)
                .bind(now)
                .execute(&self.pool)
                .await?;

        Ok(Image {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            reference: reference.to_string(),
            created_at: now,
        })
    }
}

// Internal row types for sqlx
#[derive(sqlx::FromRow)]
struct VmRow {
    id: i64,
    uid: String,
    name: String,
    owner_uid: String,
    owner_name: String,
    cpu: i64,
    memory_mb: i64,
    disk_gb: i64,
    image_id: i64,
    image_name: String,
    image_reference: String,
    node_name: Option<String>,
    namespace: Option<String>,
    workload_name: Option<String>,
    ip: Option<String>,
    ssh_port: Option<i64>,
    status: VmStatus,
    message: Option<String>,
    creator: String,
    updater: String,
    created_at: i64,
    updated_at: i64,
}

#[derive(sqlx::FromRow)]
struct ImageRow {
    id: i64,
    name: String,
    reference: String,
    created_at: i64,
}

impl From<VmRow> for VmRecord {
    fn from(row: VmRow) -> Self {
        Self {
            id: row.id,
            uid: row.uid,
            name: row.name,
            owner_uid: row.owner_uid,
            owner_name: row.owner_name,
            cpu: row.cpu,
            memory_mb: row.memory_mb,
            disk_gb: row.disk_gb,
            image_id: row.image_id,
            image_name: row.image_name,
            image_reference: row.image_reference,
            node_name: row.node_name,
            namespace: row.namespace,
            workload_name: row.workload_name,
            ip: row.ip,
            ssh_port: row.ssh_port,
            status: row.status,
            message: row.message,
            creator: row.creator,
            updater: row.updater,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<ImageRow> for Image {
    fn from(row: ImageRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            reference: row.reference,
            created_at: row.created_at,
        }
    }
}
