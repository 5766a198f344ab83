//! redb table definitions for the metadata store.
//!
//! All tables map composite string keys to JSON-serialized values:
//!
//! - `devices`: `{cluster}/{device_name}`
//! - `services`: `{cluster}/{service_name}`
//! - `service_attrs`: `{service_uuid}`
//! - `service_members`: `{service_uuid}/{member_name}`
//! - `config_files`: `{service_uuid}/{file_id}`
//! - `static_ips`: `{static_ip}`
//!
//! The scoped keys make cluster- and service-level lists a key-ordered
//! prefix scan.

use redb::TableDefinition;

pub const DEVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("devices");
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");
pub const SERVICE_ATTRS: TableDefinition<&str, &[u8]> = TableDefinition::new("service_attrs");
pub const SERVICE_MEMBERS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("service_members");
pub const CONFIG_FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("config_files");
pub const STATIC_IPS: TableDefinition<&str, &[u8]> = TableDefinition::new("static_ips");
