//! redb-backed implementation of the metadata store.
//!
//! Values are JSON-serialized into redb's `&[u8]` value columns under
//! composite string keys (see [`crate::tables`]). The conditional-check
//! semantics of [`MetaStore`] are enforced inside a single write
//! transaction per operation, which is what the rest of the control plane
//! leans on as its compare-and-set primitive.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error};

use moor_core::{ConfigFile, Device, Service, ServiceAttr, ServiceMember, ServiceStaticIp};

use crate::error::{DbError, DbResult};
use crate::store::MetaStore;
use crate::tables::{
    CONFIG_FILES, DEVICES, SERVICES, SERVICE_ATTRS, SERVICE_MEMBERS, STATIC_IPS,
};

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Fold any storage-layer failure into `DbError::Internal`, keeping the
/// cause in the log.
fn internal<E: std::fmt::Display>(err: E) -> DbError {
    error!(%err, "metadata store internal error");
    DbError::Internal
}

fn require(field: &str) -> DbResult<()> {
    if field.is_empty() {
        return Err(DbError::InvalidRequest);
    }
    Ok(())
}

fn device_key(cluster: &str, device_name: &str) -> String {
    format!("{cluster}/{device_name}")
}

fn service_key(cluster: &str, service_name: &str) -> String {
    format!("{cluster}/{service_name}")
}

fn member_key(service_uuid: &str, member_name: &str) -> String {
    format!("{service_uuid}/{member_name}")
}

fn config_file_key(service_uuid: &str, file_id: &str) -> String {
    format!("{service_uuid}/{file_id}")
}

/// Thread-safe metadata store backed by redb.
#[derive(Clone)]
pub struct DbStore {
    db: Arc<Database>,
}

impl DbStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> DbResult<Self> {
        let db = Database::create(path).map_err(internal)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "metadata store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(internal)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory metadata store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> DbResult<()> {
        let txn = self.db.begin_write().map_err(internal)?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(DEVICES).map_err(internal)?;
        txn.open_table(SERVICES).map_err(internal)?;
        txn.open_table(SERVICE_ATTRS).map_err(internal)?;
        txn.open_table(SERVICE_MEMBERS).map_err(internal)?;
        txn.open_table(CONFIG_FILES).map_err(internal)?;
        txn.open_table(STATIC_IPS).map_err(internal)?;
        txn.commit().map_err(internal)?;
        Ok(())
    }

    /// Conditional insert: absent inserts, identical re-create is a no-op
    /// success, a differing stored value fails the check.
    fn create_row<T>(&self, table: Table, key: &str, value: &T) -> DbResult<()>
    where
        T: Serialize + DeserializeOwned + PartialEq,
    {
        let bytes = serde_json::to_vec(value).map_err(internal)?;
        let txn = self.db.begin_write().map_err(internal)?;
        let inserted = {
            let mut t = txn.open_table(table).map_err(internal)?;
            let existing: Option<T> = match t.get(key).map_err(internal)? {
                Some(guard) => Some(serde_json::from_slice(guard.value()).map_err(internal)?),
                None => None,
            };
            match existing {
                Some(stored) if stored == *value => false,
                Some(_) => return Err(DbError::ConditionalCheckFailed),
                None => {
                    t.insert(key, bytes.as_slice()).map_err(internal)?;
                    true
                }
            }
        };
        if inserted {
            txn.commit().map_err(internal)?;
        }
        Ok(())
    }

    /// Conditional update: the stored value must equal `old`.
    fn update_row<T>(&self, table: Table, key: &str, old: &T, new: &T) -> DbResult<()>
    where
        T: Serialize + DeserializeOwned + PartialEq,
    {
        let bytes = serde_json::to_vec(new).map_err(internal)?;
        let txn = self.db.begin_write().map_err(internal)?;
        {
            let mut t = txn.open_table(table).map_err(internal)?;
            let stored: T = match t.get(key).map_err(internal)? {
                Some(guard) => serde_json::from_slice(guard.value()).map_err(internal)?,
                None => return Err(DbError::RecordNotFound),
            };
            if stored != *old {
                return Err(DbError::ConditionalCheckFailed);
            }
            t.insert(key, bytes.as_slice()).map_err(internal)?;
        }
        txn.commit().map_err(internal)?;
        Ok(())
    }

    fn get_row<T: DeserializeOwned>(&self, table: Table, key: &str) -> DbResult<T> {
        let txn = self.db.begin_read().map_err(internal)?;
        let t = txn.open_table(table).map_err(internal)?;
        match t.get(key).map_err(internal)? {
            Some(guard) => serde_json::from_slice(guard.value()).map_err(internal),
            None => Err(DbError::RecordNotFound),
        }
    }

    fn delete_row(&self, table: Table, key: &str) -> DbResult<()> {
        let txn = self.db.begin_write().map_err(internal)?;
        let removed = {
            let mut t = txn.open_table(table).map_err(internal)?;
            let existed = t.remove(key).map_err(internal)?.is_some();
            existed
        };
        if !removed {
            return Err(DbError::RecordNotFound);
        }
        txn.commit().map_err(internal)?;
        Ok(())
    }

    /// Key-ordered scan of every row whose key starts with `prefix`.
    fn list_rows<T: DeserializeOwned>(&self, table: Table, prefix: &str) -> DbResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(internal)?;
        let t = txn.open_table(table).map_err(internal)?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(internal)? {
            let (key, value) = entry.map_err(internal)?;
            if key.value().starts_with(prefix) {
                results.push(serde_json::from_slice(value.value()).map_err(internal)?);
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl MetaStore for DbStore {
    // ── Devices ────────────────────────────────────────────────────

    async fn create_device(&self, dev: &Device) -> DbResult<()> {
        require(&dev.cluster)?;
        require(&dev.device_name)?;
        require(&dev.service_name)?;
        self.create_row(DEVICES, &device_key(&dev.cluster, &dev.device_name), dev)
    }

    async fn get_device(&self, cluster: &str, device_name: &str) -> DbResult<Device> {
        require(cluster)?;
        require(device_name)?;
        self.get_row(DEVICES, &device_key(cluster, device_name))
    }

    async fn delete_device(&self, cluster: &str, device_name: &str) -> DbResult<()> {
        require(cluster)?;
        require(device_name)?;
        self.delete_row(DEVICES, &device_key(cluster, device_name))
    }

    async fn list_devices(&self, cluster: &str) -> DbResult<Vec<Device>> {
        require(cluster)?;
        self.list_rows(DEVICES, &format!("{cluster}/"))
    }

    // ── Services ───────────────────────────────────────────────────

    async fn create_service(&self, svc: &Service) -> DbResult<()> {
        require(&svc.cluster)?;
        require(&svc.service_name)?;
        require(&svc.service_uuid)?;
        self.create_row(SERVICES, &service_key(&svc.cluster, &svc.service_name), svc)
    }

    async fn get_service(&self, cluster: &str, service_name: &str) -> DbResult<Service> {
        require(cluster)?;
        require(service_name)?;
        self.get_row(SERVICES, &service_key(cluster, service_name))
    }

    async fn delete_service(&self, cluster: &str, service_name: &str) -> DbResult<()> {
        require(cluster)?;
        require(service_name)?;
        self.delete_row(SERVICES, &service_key(cluster, service_name))
    }

    async fn list_services(&self, cluster: &str) -> DbResult<Vec<Service>> {
        require(cluster)?;
        self.list_rows(SERVICES, &format!("{cluster}/"))
    }

    // ── Service attributes ─────────────────────────────────────────

    async fn create_service_attr(&self, attr: &ServiceAttr) -> DbResult<()> {
        require(&attr.service_uuid)?;
        require(&attr.cluster)?;
        require(&attr.service_name)?;
        if attr.replicas == 0 {
            return Err(DbError::InvalidRequest);
        }
        self.create_row(SERVICE_ATTRS, &attr.service_uuid, attr)
    }

    async fn update_service_attr(&self, old: &ServiceAttr, new: &ServiceAttr) -> DbResult<()> {
        require(&old.service_uuid)?;
        if old.service_uuid != new.service_uuid {
            return Err(DbError::InvalidRequest);
        }
        self.update_row(SERVICE_ATTRS, &old.service_uuid, old, new)
    }

    async fn get_service_attr(&self, service_uuid: &str) -> DbResult<ServiceAttr> {
        require(service_uuid)?;
        self.get_row(SERVICE_ATTRS, service_uuid)
    }

    async fn delete_service_attr(&self, service_uuid: &str) -> DbResult<()> {
        require(service_uuid)?;
        self.delete_row(SERVICE_ATTRS, service_uuid)
    }

    // ── Service members ────────────────────────────────────────────

    async fn create_service_member(&self, member: &ServiceMember) -> DbResult<()> {
        require(&member.service_uuid)?;
        require(&member.member_name)?;
        self.create_row(
            SERVICE_MEMBERS,
            &member_key(&member.service_uuid, &member.member_name),
            member,
        )
    }

    async fn update_service_member(
        &self,
        old: &ServiceMember,
        new: &ServiceMember,
    ) -> DbResult<()> {
        require(&old.service_uuid)?;
        require(&old.member_name)?;
        if old.service_uuid != new.service_uuid || old.member_name != new.member_name {
            return Err(DbError::InvalidRequest);
        }
        self.update_row(
            SERVICE_MEMBERS,
            &member_key(&old.service_uuid, &old.member_name),
            old,
            new,
        )
    }

    async fn get_service_member(
        &self,
        service_uuid: &str,
        member_name: &str,
    ) -> DbResult<ServiceMember> {
        require(service_uuid)?;
        require(member_name)?;
        self.get_row(SERVICE_MEMBERS, &member_key(service_uuid, member_name))
    }

    async fn delete_service_member(
        &self,
        service_uuid: &str,
        member_name: &str,
    ) -> DbResult<()> {
        require(service_uuid)?;
        require(member_name)?;
        self.delete_row(SERVICE_MEMBERS, &member_key(service_uuid, member_name))
    }

    async fn list_service_members(&self, service_uuid: &str) -> DbResult<Vec<ServiceMember>> {
        require(service_uuid)?;
        self.list_rows(SERVICE_MEMBERS, &format!("{service_uuid}/"))
    }

    // ── Config files ───────────────────────────────────────────────

    async fn create_config_file(&self, file: &ConfigFile) -> DbResult<()> {
        require(&file.service_uuid)?;
        require(&file.file_id)?;
        require(&file.file_name)?;
        self.create_row(
            CONFIG_FILES,
            &config_file_key(&file.service_uuid, &file.file_id),
            file,
        )
    }

    async fn get_config_file(&self, service_uuid: &str, file_id: &str) -> DbResult<ConfigFile> {
        require(service_uuid)?;
        require(file_id)?;
        self.get_row(CONFIG_FILES, &config_file_key(service_uuid, file_id))
    }

    async fn delete_config_file(&self, service_uuid: &str, file_id: &str) -> DbResult<()> {
        require(service_uuid)?;
        require(file_id)?;
        self.delete_row(CONFIG_FILES, &config_file_key(service_uuid, file_id))
    }

    // ── Static IPs ─────────────────────────────────────────────────

    async fn create_static_ip(&self, ip: &ServiceStaticIp) -> DbResult<()> {
        require(&ip.static_ip)?;
        require(&ip.service_uuid)?;
        self.create_row(STATIC_IPS, &ip.static_ip, ip)
    }

    async fn update_static_ip(
        &self,
        old: &ServiceStaticIp,
        new: &ServiceStaticIp,
    ) -> DbResult<()> {
        require(&old.static_ip)?;
        if old.static_ip != new.static_ip {
            return Err(DbError::InvalidRequest);
        }
        self.update_row(STATIC_IPS, &old.static_ip, old, new)
    }

    async fn get_static_ip(&self, static_ip: &str) -> DbResult<ServiceStaticIp> {
        require(static_ip)?;
        self.get_row(STATIC_IPS, static_ip)
    }

    async fn delete_static_ip(&self, static_ip: &str) -> DbResult<()> {
        require(static_ip)?;
        self.delete_row(STATIC_IPS, static_ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moor_core::{
        MemberVolumes, ServiceStatus, ServiceVolume, ServiceVolumes, VolumeType,
    };
    use std::collections::BTreeMap;

    fn test_store() -> DbStore {
        DbStore::open_in_memory().unwrap()
    }

    fn test_device(cluster: &str, name: &str, service: &str) -> Device {
        Device {
            cluster: cluster.to_string(),
            device_name: name.to_string(),
            service_name: service.to_string(),
        }
    }

    fn test_attr(uuid: &str) -> ServiceAttr {
        ServiceAttr {
            service_uuid: uuid.to_string(),
            status: ServiceStatus::Creating,
            cluster: "c1".to_string(),
            service_name: "svc".to_string(),
            replicas: 3,
            volumes: ServiceVolumes {
                primary_device_name: "/dev/loop1".to_string(),
                primary_volume: ServiceVolume {
                    volume_type: VolumeType::GeneralPurpose,
                    size_gb: 1,
                    iops: 0,
                },
                journal: None,
            },
            register_dns: true,
            domain: "example.com".to_string(),
            hosted_zone_id: "zone-1".to_string(),
            require_static_ip: false,
            tags: BTreeMap::new(),
        }
    }

    fn test_member(uuid: &str, name: &str) -> ServiceMember {
        ServiceMember {
            service_uuid: uuid.to_string(),
            member_name: name.to_string(),
            zone: "az-west".to_string(),
            static_ip: None,
            volumes: MemberVolumes {
                primary_volume_id: "vol-1".to_string(),
                primary_device_name: "/dev/loop1".to_string(),
                journal: None,
            },
            config_files: Vec::new(),
        }
    }

    // ── Conditional create ─────────────────────────────────────────

    #[tokio::test]
    async fn create_is_idempotent_for_identical_row() {
        let store = test_store();
        let dev = test_device("c1", "/dev/loop1", "svc-a");

        store.create_device(&dev).await.unwrap();
        store.create_device(&dev).await.unwrap();

        assert_eq!(store.get_device("c1", "/dev/loop1").await.unwrap(), dev);
    }

    #[tokio::test]
    async fn create_fails_check_for_differing_row() {
        let store = test_store();
        store
            .create_device(&test_device("c1", "/dev/loop1", "svc-a"))
            .await
            .unwrap();

        let err = store
            .create_device(&test_device("c1", "/dev/loop1", "svc-b"))
            .await
            .unwrap_err();
        assert_eq!(err, DbError::ConditionalCheckFailed);

        // The original binding is untouched.
        let stored = store.get_device("c1", "/dev/loop1").await.unwrap();
        assert_eq!(stored.service_name, "svc-a");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = test_store();
        assert_eq!(
            store.get_device("c1", "/dev/loop1").await.unwrap_err(),
            DbError::RecordNotFound
        );
        assert_eq!(
            store.get_service_attr("nope").await.unwrap_err(),
            DbError::RecordNotFound
        );
    }

    #[tokio::test]
    async fn empty_key_component_is_invalid() {
        let store = test_store();
        assert_eq!(
            store.get_device("", "/dev/loop1").await.unwrap_err(),
            DbError::InvalidRequest
        );
        assert_eq!(
            store
                .create_device(&test_device("c1", "", "svc"))
                .await
                .unwrap_err(),
            DbError::InvalidRequest
        );
    }

    // ── Conditional update ─────────────────────────────────────────

    #[tokio::test]
    async fn update_compares_full_old_value() {
        let store = test_store();
        let attr = test_attr("uuid-1");
        store.create_service_attr(&attr).await.unwrap();

        let mut active = attr.clone();
        active.status = ServiceStatus::Active;
        store.update_service_attr(&attr, &active).await.unwrap();
        assert_eq!(
            store.get_service_attr("uuid-1").await.unwrap().status,
            ServiceStatus::Active
        );

        // A second update from the stale old value fails the check.
        let mut deleting = attr.clone();
        deleting.status = ServiceStatus::Deleting;
        assert_eq!(
            store.update_service_attr(&attr, &deleting).await.unwrap_err(),
            DbError::ConditionalCheckFailed
        );
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store = test_store();
        let attr = test_attr("uuid-1");
        let mut active = attr.clone();
        active.status = ServiceStatus::Active;
        assert_eq!(
            store.update_service_attr(&attr, &active).await.unwrap_err(),
            DbError::RecordNotFound
        );
    }

    #[tokio::test]
    async fn update_cannot_move_keys() {
        let store = test_store();
        let attr = test_attr("uuid-1");
        store.create_service_attr(&attr).await.unwrap();

        let mut moved = attr.clone();
        moved.service_uuid = "uuid-2".to_string();
        assert_eq!(
            store.update_service_attr(&attr, &moved).await.unwrap_err(),
            DbError::InvalidRequest
        );
    }

    // ── Delete ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn delete_then_not_found() {
        let store = test_store();
        let dev = test_device("c1", "/dev/loop1", "svc");
        store.create_device(&dev).await.unwrap();

        store.delete_device("c1", "/dev/loop1").await.unwrap();
        assert_eq!(
            store.delete_device("c1", "/dev/loop1").await.unwrap_err(),
            DbError::RecordNotFound
        );
    }

    // ── Lists ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn lists_are_scoped_and_key_ordered() {
        let store = test_store();
        store
            .create_device(&test_device("c1", "/dev/loop2", "svc-b"))
            .await
            .unwrap();
        store
            .create_device(&test_device("c1", "/dev/loop1", "svc-a"))
            .await
            .unwrap();
        store
            .create_device(&test_device("c2", "/dev/loop1", "svc-c"))
            .await
            .unwrap();

        let devices = store.list_devices("c1").await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].device_name, "/dev/loop1");
        assert_eq!(devices[1].device_name, "/dev/loop2");

        assert!(store.list_devices("c3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn member_list_scoped_to_service() {
        let store = test_store();
        store
            .create_service_member(&test_member("uuid-1", "svc-0"))
            .await
            .unwrap();
        store
            .create_service_member(&test_member("uuid-1", "svc-1"))
            .await
            .unwrap();
        store
            .create_service_member(&test_member("uuid-2", "other-0"))
            .await
            .unwrap();

        assert_eq!(store.list_service_members("uuid-1").await.unwrap().len(), 2);
        assert_eq!(store.list_service_members("uuid-2").await.unwrap().len(), 1);
    }

    // ── Persistence ────────────────────────────────────────────────

    #[tokio::test]
    async fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("meta.redb");

        {
            let store = DbStore::open(&db_path).unwrap();
            store.create_service_attr(&test_attr("uuid-1")).await.unwrap();
        }

        let store = DbStore::open(&db_path).unwrap();
        let attr = store.get_service_attr("uuid-1").await.unwrap();
        assert_eq!(attr.service_name, "svc");
    }
}
