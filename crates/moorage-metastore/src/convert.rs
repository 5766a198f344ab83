//! Conversions between domain records and their wire messages.
//!
//! Domain to wire is infallible. Wire to domain validates enum strings and
//! optional sub-messages and fails with [`DbError::InvalidRequest`] on a
//! malformed message, so neither client nor server ever holds a
//! half-formed record.

use moor_core::{
    ConfigFile, ConfigFileRef, Device, JournalAttachment, JournalVolume, MemberVolumes,
    Service, ServiceAttr, ServiceMember, ServiceStaticIp, ServiceStatus, ServiceVolume,
    ServiceVolumes, VolumeType,
};

use crate::error::{DbError, DbResult};
use crate::pb;

// ── Domain → wire ──────────────────────────────────────────────────

impl From<Device> for pb::Device {
    fn from(d: Device) -> Self {
        pb::Device {
            cluster: d.cluster,
            device_name: d.device_name,
            service_name: d.service_name,
        }
    }
}

impl From<Service> for pb::Service {
    fn from(s: Service) -> Self {
        pb::Service {
            cluster: s.cluster,
            service_name: s.service_name,
            service_uuid: s.service_uuid,
        }
    }
}

impl From<ServiceVolume> for pb::ServiceVolume {
    fn from(v: ServiceVolume) -> Self {
        pb::ServiceVolume {
            volume_type: v.volume_type.as_str().to_string(),
            size_gb: v.size_gb,
            iops: v.iops,
        }
    }
}

impl From<ServiceVolumes> for pb::ServiceVolumes {
    fn from(v: ServiceVolumes) -> Self {
        let (journal_device_name, journal_volume) = match v.journal {
            Some(j) => (j.device_name, Some(j.volume.into())),
            None => (String::new(), None),
        };
        pb::ServiceVolumes {
            primary_device_name: v.primary_device_name,
            primary_volume: Some(v.primary_volume.into()),
            journal_device_name,
            journal_volume,
        }
    }
}

impl From<ServiceAttr> for pb::ServiceAttr {
    fn from(a: ServiceAttr) -> Self {
        pb::ServiceAttr {
            service_uuid: a.service_uuid,
            status: a.status.as_str().to_string(),
            cluster: a.cluster,
            service_name: a.service_name,
            replicas: a.replicas,
            volumes: Some(a.volumes.into()),
            register_dns: a.register_dns,
            domain: a.domain,
            hosted_zone_id: a.hosted_zone_id,
            require_static_ip: a.require_static_ip,
            tags: a.tags.into_iter().collect(),
        }
    }
}

impl From<MemberVolumes> for pb::MemberVolumes {
    fn from(v: MemberVolumes) -> Self {
        let (journal_volume_id, journal_device_name) = match v.journal {
            Some(j) => (j.volume_id, j.device_name),
            None => (String::new(), String::new()),
        };
        pb::MemberVolumes {
            primary_volume_id: v.primary_volume_id,
            primary_device_name: v.primary_device_name,
            journal_volume_id,
            journal_device_name,
        }
    }
}

impl From<ConfigFileRef> for pb::ConfigFileRef {
    fn from(r: ConfigFileRef) -> Self {
        pb::ConfigFileRef {
            file_name: r.file_name,
            file_id: r.file_id,
        }
    }
}

impl From<ServiceMember> for pb::ServiceMember {
    fn from(m: ServiceMember) -> Self {
        pb::ServiceMember {
            service_uuid: m.service_uuid,
            member_name: m.member_name,
            zone: m.zone,
            static_ip: m.static_ip.unwrap_or_default(),
            volumes: Some(m.volumes.into()),
            config_files: m.config_files.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<ConfigFile> for pb::ConfigFile {
    fn from(f: ConfigFile) -> Self {
        pb::ConfigFile {
            service_uuid: f.service_uuid,
            file_id: f.file_id,
            file_name: f.file_name,
            content: f.content,
        }
    }
}

impl From<ServiceStaticIp> for pb::StaticIp {
    fn from(ip: ServiceStaticIp) -> Self {
        pb::StaticIp {
            static_ip: ip.static_ip,
            service_uuid: ip.service_uuid,
            member_name: ip.member_name.unwrap_or_default(),
            zone: ip.zone,
        }
    }
}

// ── Wire → domain ──────────────────────────────────────────────────

pub fn device_from_pb(p: &pb::Device) -> DbResult<Device> {
    Ok(Device {
        cluster: p.cluster.clone(),
        device_name: p.device_name.clone(),
        service_name: p.service_name.clone(),
    })
}

pub fn service_from_pb(p: &pb::Service) -> DbResult<Service> {
    Ok(Service {
        cluster: p.cluster.clone(),
        service_name: p.service_name.clone(),
        service_uuid: p.service_uuid.clone(),
    })
}

fn service_volume_from_pb(p: &pb::ServiceVolume) -> DbResult<ServiceVolume> {
    Ok(ServiceVolume {
        volume_type: VolumeType::parse(&p.volume_type).ok_or(DbError::InvalidRequest)?,
        size_gb: p.size_gb,
        iops: p.iops,
    })
}

pub fn service_volumes_from_pb(p: &pb::ServiceVolumes) -> DbResult<ServiceVolumes> {
    let primary_volume =
        service_volume_from_pb(p.primary_volume.as_ref().ok_or(DbError::InvalidRequest)?)?;
    let journal = match (&p.journal_volume, p.journal_device_name.is_empty()) {
        (Some(vol), false) => Some(JournalVolume {
            device_name: p.journal_device_name.clone(),
            volume: service_volume_from_pb(vol)?,
        }),
        (None, true) => None,
        // Half-set journal fields.
        _ => return Err(DbError::InvalidRequest),
    };
    Ok(ServiceVolumes {
        primary_device_name: p.primary_device_name.clone(),
        primary_volume,
        journal,
    })
}

pub fn service_attr_from_pb(p: &pb::ServiceAttr) -> DbResult<ServiceAttr> {
    let status = ServiceStatus::parse(&p.status).ok_or(DbError::InvalidRequest)?;
    let volumes = service_volumes_from_pb(p.volumes.as_ref().ok_or(DbError::InvalidRequest)?)?;
    Ok(ServiceAttr {
        service_uuid: p.service_uuid.clone(),
        status,
        cluster: p.cluster.clone(),
        service_name: p.service_name.clone(),
        replicas: p.replicas,
        volumes,
        register_dns: p.register_dns,
        domain: p.domain.clone(),
        hosted_zone_id: p.hosted_zone_id.clone(),
        require_static_ip: p.require_static_ip,
        tags: p.tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
    })
}

fn member_volumes_from_pb(p: &pb::MemberVolumes) -> DbResult<MemberVolumes> {
    let journal = match (p.journal_volume_id.is_empty(), p.journal_device_name.is_empty()) {
        (false, false) => Some(JournalAttachment {
            volume_id: p.journal_volume_id.clone(),
            device_name: p.journal_device_name.clone(),
        }),
        (true, true) => None,
        _ => return Err(DbError::InvalidRequest),
    };
    Ok(MemberVolumes {
        primary_volume_id: p.primary_volume_id.clone(),
        primary_device_name: p.primary_device_name.clone(),
        journal,
    })
}

pub fn service_member_from_pb(p: &pb::ServiceMember) -> DbResult<ServiceMember> {
    let volumes = member_volumes_from_pb(p.volumes.as_ref().ok_or(DbError::InvalidRequest)?)?;
    let static_ip = if p.static_ip.is_empty() {
        None
    } else {
        Some(p.static_ip.clone())
    };
    Ok(ServiceMember {
        service_uuid: p.service_uuid.clone(),
        member_name: p.member_name.clone(),
        zone: p.zone.clone(),
        static_ip,
        volumes,
        config_files: p
            .config_files
            .iter()
            .map(|r| ConfigFileRef {
                file_name: r.file_name.clone(),
                file_id: r.file_id.clone(),
            })
            .collect(),
    })
}

pub fn config_file_from_pb(p: &pb::ConfigFile) -> DbResult<ConfigFile> {
    Ok(ConfigFile {
        service_uuid: p.service_uuid.clone(),
        file_id: p.file_id.clone(),
        file_name: p.file_name.clone(),
        content: p.content.clone(),
    })
}

pub fn static_ip_from_pb(p: &pb::StaticIp) -> DbResult<ServiceStaticIp> {
    let member_name = if p.member_name.is_empty() {
        None
    } else {
        Some(p.member_name.clone())
    };
    Ok(ServiceStaticIp {
        static_ip: p.static_ip.clone(),
        service_uuid: p.service_uuid.clone(),
        member_name,
        zone: p.zone.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn attr_with_journal() -> ServiceAttr {
        ServiceAttr {
            service_uuid: "uuid-1".to_string(),
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
                journal: Some(JournalVolume {
                    device_name: "/dev/loop2".to_string(),
                    volume: ServiceVolume {
                        volume_type: VolumeType::ProvisionedIops,
                        size_gb: 1,
                        iops: 100,
                    },
                }),
            },
            register_dns: true,
            domain: "example.com".to_string(),
            hosted_zone_id: "zone-1".to_string(),
            require_static_ip: true,
            tags: BTreeMap::from([("team".to_string(), "storage".to_string())]),
        }
    }

    #[test]
    fn attr_round_trip() {
        let attr = attr_with_journal();
        let wire: pb::ServiceAttr = attr.clone().into();
        assert_eq!(service_attr_from_pb(&wire).unwrap(), attr);
    }

    #[test]
    fn attr_without_journal_round_trip() {
        let mut attr = attr_with_journal();
        attr.volumes.journal = None;
        let wire: pb::ServiceAttr = attr.clone().into();
        assert!(wire.volumes.as_ref().unwrap().journal_volume.is_none());
        assert_eq!(service_attr_from_pb(&wire).unwrap(), attr);
    }

    #[test]
    fn half_set_journal_is_invalid() {
        let mut wire: pb::ServiceAttr = attr_with_journal().into();
        wire.volumes.as_mut().unwrap().journal_device_name.clear();
        assert_eq!(service_attr_from_pb(&wire).unwrap_err(), DbError::InvalidRequest);
    }

    #[test]
    fn bad_status_is_invalid() {
        let mut wire: pb::ServiceAttr = attr_with_journal().into();
        wire.status = "bogus".to_string();
        assert_eq!(service_attr_from_pb(&wire).unwrap_err(), DbError::InvalidRequest);
    }

    #[test]
    fn member_static_ip_empty_means_none() {
        let member = ServiceMember {
            service_uuid: "uuid-1".to_string(),
            member_name: "svc-0".to_string(),
            zone: "az-west".to_string(),
            static_ip: None,
            volumes: MemberVolumes {
                primary_volume_id: "vol-1".to_string(),
                primary_device_name: "/dev/loop1".to_string(),
                journal: None,
            },
            config_files: vec![ConfigFileRef {
                file_name: "svc.conf".to_string(),
                file_id: "abc".to_string(),
            }],
        };
        let wire: pb::ServiceMember = member.clone().into();
        assert!(wire.static_ip.is_empty());
        assert_eq!(service_member_from_pb(&wire).unwrap(), member);
    }

    #[test]
    fn static_ip_round_trip() {
        let ip = ServiceStaticIp {
            static_ip: "10.0.0.4".to_string(),
            service_uuid: "uuid-1".to_string(),
            member_name: None,
            zone: "az-west".to_string(),
        };
        let wire: pb::StaticIp = ip.clone().into();
        assert_eq!(static_ip_from_pb(&wire).unwrap(), ip);

        let bound = ServiceStaticIp {
            member_name: Some("svc-0".to_string()),
            ..ip
        };
        let wire: pb::StaticIp = bound.clone().into();
        assert_eq!(static_ip_from_pb(&wire).unwrap(), bound);
    }
}
