//! The typed metadata store interface.

use async_trait::async_trait;
use moor_core::{
    ConfigFile, Device, Service, ServiceAttr, ServiceMember, ServiceStaticIp,
};

use crate::error::DbResult;

/// Typed CRUD over the durable metadata store.
///
/// Implemented by the redb-backed [`crate::DbStore`] and by the gRPC
/// [`crate::StoreClient`]; the management layer only ever sees this trait.
///
/// Create operations are conditional on absence but idempotent for an
/// identical re-create; update operations compare the full old value.
/// List operations return the complete result set in key order; partial
/// results never surface.
#[async_trait]
pub trait MetaStore: Send + Sync {
    // ── Devices ────────────────────────────────────────────────────

    async fn create_device(&self, dev: &Device) -> DbResult<()>;
    async fn get_device(&self, cluster: &str, device_name: &str) -> DbResult<Device>;
    async fn delete_device(&self, cluster: &str, device_name: &str) -> DbResult<()>;
    async fn list_devices(&self, cluster: &str) -> DbResult<Vec<Device>>;

    // ── Services ───────────────────────────────────────────────────

    async fn create_service(&self, svc: &Service) -> DbResult<()>;
    async fn get_service(&self, cluster: &str, service_name: &str) -> DbResult<Service>;
    async fn delete_service(&self, cluster: &str, service_name: &str) -> DbResult<()>;
    async fn list_services(&self, cluster: &str) -> DbResult<Vec<Service>>;

    // ── Service attributes ─────────────────────────────────────────

    async fn create_service_attr(&self, attr: &ServiceAttr) -> DbResult<()>;
    async fn update_service_attr(&self, old: &ServiceAttr, new: &ServiceAttr) -> DbResult<()>;
    async fn get_service_attr(&self, service_uuid: &str) -> DbResult<ServiceAttr>;
    async fn delete_service_attr(&self, service_uuid: &str) -> DbResult<()>;

    // ── Service members ────────────────────────────────────────────

    async fn create_service_member(&self, member: &ServiceMember) -> DbResult<()>;
    async fn update_service_member(
        &self,
        old: &ServiceMember,
        new: &ServiceMember,
    ) -> DbResult<()>;
    async fn get_service_member(
        &self,
        service_uuid: &str,
        member_name: &str,
    ) -> DbResult<ServiceMember>;
    async fn delete_service_member(&self, service_uuid: &str, member_name: &str) -> DbResult<()>;
    async fn list_service_members(&self, service_uuid: &str) -> DbResult<Vec<ServiceMember>>;

    // ── Config files ───────────────────────────────────────────────

    async fn create_config_file(&self, file: &ConfigFile) -> DbResult<()>;
    async fn get_config_file(&self, service_uuid: &str, file_id: &str) -> DbResult<ConfigFile>;
    async fn delete_config_file(&self, service_uuid: &str, file_id: &str) -> DbResult<()>;

    // ── Static IPs ─────────────────────────────────────────────────

    async fn create_static_ip(&self, ip: &ServiceStaticIp) -> DbResult<()>;
    async fn update_static_ip(
        &self,
        old: &ServiceStaticIp,
        new: &ServiceStaticIp,
    ) -> DbResult<()>;
    async fn get_static_ip(&self, static_ip: &str) -> DbResult<ServiceStaticIp>;
    async fn delete_static_ip(&self, static_ip: &str) -> DbResult<()>;
}
