//! Domain types persisted in the metadata store.
//!
//! These records mirror the store's table layout: devices and services are
//! keyed within a cluster, attributes by service UUID, members and config
//! files by `(service UUID, name)`, static IPs by the address itself.
//! Conditional updates compare the full old value against the stored value,
//! so all record types derive `PartialEq`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A block-device name reserved for a service within a cluster.
///
/// Device names are allocated densely in the platform's device sequence
/// and are never reassigned while the owning service exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub cluster: String,
    /// Platform block-device path, e.g. `/dev/loop1`.
    pub device_name: String,
    /// The service this device is reserved for.
    pub service_name: String,
}

/// The lightweight "name exists" record mapping a service name to its UUID.
///
/// Immutable after creation; the UUID identifies all downstream records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Service {
    pub cluster: String,
    pub service_name: String,
    pub service_uuid: String,
}

/// Lifecycle status of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Creating,
    Active,
    Deleting,
    Deleted,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Creating => "creating",
            ServiceStatus::Active => "active",
            ServiceStatus::Deleting => "deleting",
            ServiceStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<ServiceStatus> {
        match s {
            "creating" => Some(ServiceStatus::Creating),
            "active" => Some(ServiceStatus::Active),
            "deleting" => Some(ServiceStatus::Deleting),
            "deleted" => Some(ServiceStatus::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Volume performance class offered by the block-storage platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeType {
    GeneralPurpose,
    ProvisionedIops,
    ThroughputOptimized,
}

impl VolumeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeType::GeneralPurpose => "general_purpose",
            VolumeType::ProvisionedIops => "provisioned_iops",
            VolumeType::ThroughputOptimized => "throughput_optimized",
        }
    }

    pub fn parse(s: &str) -> Option<VolumeType> {
        match s {
            "general_purpose" => Some(VolumeType::GeneralPurpose),
            "provisioned_iops" => Some(VolumeType::ProvisionedIops),
            "throughput_optimized" => Some(VolumeType::ThroughputOptimized),
            _ => None,
        }
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested shape of a single volume: type, size, and provisioned IOPS.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceVolume {
    pub volume_type: VolumeType,
    pub size_gb: u64,
    /// Provisioned IOPS; 0 for volume types without an IOPS knob.
    pub iops: u64,
}

/// The journal half of a service's volume plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalVolume {
    pub device_name: String,
    pub volume: ServiceVolume,
}

/// The logical volume plan of a service: a primary volume bound to a
/// device name, and an optional journal with the same shape.
///
/// The journal device, when present, is the cluster-next free device after
/// the primary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceVolumes {
    pub primary_device_name: String,
    pub primary_volume: ServiceVolume,
    pub journal: Option<JournalVolume>,
}

/// The authoritative attribute record for a service.
///
/// Mutated only through conditional updates (full old-value compare).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceAttr {
    pub service_uuid: String,
    pub status: ServiceStatus,
    pub cluster: String,
    pub service_name: String,
    pub replicas: u64,
    pub volumes: ServiceVolumes,
    /// Whether member DNS records are published in the hosted zone.
    pub register_dns: bool,
    pub domain: String,
    pub hosted_zone_id: String,
    pub require_static_ip: bool,
    /// Free-form user tags.
    pub tags: BTreeMap<String, String>,
}

/// A journal volume attached to one member: the concrete cloud volume ID
/// plus the device name inherited from the service's volume plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalAttachment {
    pub volume_id: String,
    pub device_name: String,
}

/// Concrete volumes attached to one member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberVolumes {
    pub primary_volume_id: String,
    pub primary_device_name: String,
    pub journal: Option<JournalAttachment>,
}

/// Reference from a member to one of its config files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigFileRef {
    pub file_name: String,
    /// Content-addressed file ID, see [`crate::naming::gen_config_file_id`].
    pub file_id: String,
}

/// One replica of a service.
///
/// Member names are `<service>-<ordinal>` with ordinals dense from 0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceMember {
    pub service_uuid: String,
    pub member_name: String,
    /// Availability zone this member is pinned to.
    pub zone: String,
    /// Stable IP, present iff the service requires static IPs.
    pub static_ip: Option<String>,
    pub volumes: MemberVolumes,
    /// Ordered config-file references for this member.
    pub config_files: Vec<ConfigFileRef>,
}

/// An immutable, content-addressed configuration blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigFile {
    pub service_uuid: String,
    pub file_id: String,
    pub file_name: String,
    pub content: String,
}

/// A reserved static IP.
///
/// Minted bound to a service but unassigned (`member_name: None`); a
/// conditional update binds it to a member when that member is created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceStaticIp {
    pub static_ip: String,
    pub service_uuid: String,
    pub member_name: Option<String>,
    pub zone: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [
            ServiceStatus::Creating,
            ServiceStatus::Active,
            ServiceStatus::Deleting,
            ServiceStatus::Deleted,
        ] {
            assert_eq!(ServiceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ServiceStatus::parse("bogus"), None);
    }

    #[test]
    fn volume_type_round_trip() {
        for vt in [
            VolumeType::GeneralPurpose,
            VolumeType::ProvisionedIops,
            VolumeType::ThroughputOptimized,
        ] {
            assert_eq!(VolumeType::parse(vt.as_str()), Some(vt));
        }
        assert_eq!(VolumeType::parse(""), None);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ServiceStatus::Creating).unwrap();
        assert_eq!(json, "\"creating\"");
    }

    #[test]
    fn service_attr_json_round_trip() {
        let attr = ServiceAttr {
            service_uuid: "uuid-1".to_string(),
            status: ServiceStatus::Creating,
            cluster: "c1".to_string(),
            service_name: "db-0".to_string(),
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
        };
        let bytes = serde_json::to_vec(&attr).unwrap();
        let back: ServiceAttr = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, attr);
    }
}
