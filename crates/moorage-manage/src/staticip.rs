//! Static-IP allocation and member binding.
//!
//! Addresses are reserved from the zone's CIDR block in ascending numeric
//! order, recorded in the metadata store bound to the service but not yet
//! to a member. Binding to a member happens later via conditional update
//! when that member is created, which lets an interrupted run reclaim
//! addresses it minted but never bound.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use moor_core::ServiceAttr;
use moor_core::ServiceStaticIp;
use moorage_metastore::DbError;
use moorage_platform::PlatformError;

use crate::error::ManageResult;
use crate::ManageService;

impl ManageService {
    /// Reserve `count` addresses in `zone` for the service, skipping the
    /// already-assigned addresses in `assigned` (address → member name)
    /// and any address held by a host.
    ///
    /// Returned addresses are the numerically lowest free ones, in
    /// ascending order, each recorded unassigned (`member_name: None`).
    /// An address this service reserved earlier but never bound counts as
    /// free for it and is returned again.
    pub async fn create_static_ips_for_zone(
        &self,
        attr: &ServiceAttr,
        assigned: &HashMap<String, String>,
        count: usize,
        zone: &str,
    ) -> ManageResult<Vec<ServiceStaticIp>> {
        let cidr = self.host.cidr_block();
        let host_ips: HashSet<String> = self.host.list_host_ips(zone).await?.into_iter().collect();

        let mut reserved = Vec::with_capacity(count);
        let mut host_num = cidr.first_host;
        while reserved.len() < count {
            if host_num > cidr.last_host {
                return Err(PlatformError::Exhausted(format!(
                    "no free address left in zone {zone}"
                ))
                .into());
            }
            let ip = cidr.host_ip(host_num);
            host_num += 1;

            if assigned.contains_key(&ip) || host_ips.contains(&ip) {
                continue;
            }

            let row = ServiceStaticIp {
                static_ip: ip.clone(),
                service_uuid: attr.service_uuid.clone(),
                member_name: None,
                zone: zone.to_string(),
            };
            match self.db.create_static_ip(&row).await {
                Ok(()) => {
                    debug!(service_uuid = %attr.service_uuid, %ip, "reserved static ip");
                    reserved.push(row);
                }
                Err(DbError::ConditionalCheckFailed) => {
                    // The address is recorded already. Reclaim it if it is
                    // ours and still unbound; otherwise keep scanning.
                    let existing = self.db.get_static_ip(&ip).await?;
                    if existing.service_uuid == attr.service_uuid
                        && existing.member_name.is_none()
                        && existing.zone == zone
                    {
                        debug!(service_uuid = %attr.service_uuid, %ip, "reclaimed unbound static ip");
                        reserved.push(existing);
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        if let Some(first) = reserved.first() {
            info!(
                service_uuid = %attr.service_uuid,
                zone,
                count = reserved.len(),
                first = %first.static_ip,
                "reserved static ips"
            );
        }
        Ok(reserved)
    }

    /// Bind a reserved address to a member: conditional update from
    /// unbound to `member_name`. Already bound to this member is success;
    /// bound elsewhere is a failed check.
    pub(crate) async fn ensure_ip_assigned(
        &self,
        static_ip: &str,
        service_uuid: &str,
        member_name: &str,
    ) -> ManageResult<()> {
        let row = self.db.get_static_ip(static_ip).await?;
        if row.service_uuid != service_uuid {
            return Err(DbError::ConditionalCheckFailed.into());
        }
        match row.member_name.as_deref() {
            Some(bound) if bound == member_name => Ok(()),
            Some(_) => Err(DbError::ConditionalCheckFailed.into()),
            None => {
                let mut bound = row.clone();
                bound.member_name = Some(member_name.to_string());
                match self.db.update_static_ip(&row, &bound).await {
                    Ok(()) => {
                        debug!(%static_ip, member = member_name, "bound static ip");
                        Ok(())
                    }
                    Err(DbError::ConditionalCheckFailed) => {
                        // Raced a concurrent binder; success only if it
                        // bound the same member.
                        let current = self.db.get_static_ip(static_ip).await?;
                        if current.member_name.as_deref() == Some(member_name) {
                            Ok(())
                        } else {
                            Err(DbError::ConditionalCheckFailed.into())
                        }
                    }
                    Err(err) => Err(err.into()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use moor_core::{ServiceStatus, ServiceVolume, ServiceVolumes, VolumeType};
    use moorage_metastore::{DbStore, MetaStore};
    use moorage_platform::{LoopbackDns, LoopbackHost, LoopbackVolumes};

    use super::*;
    use crate::ManageService;

    fn manage_with_host(host: LoopbackHost) -> ManageService {
        ManageService::new(
            Arc::new(DbStore::open_in_memory().unwrap()),
            Arc::new(LoopbackVolumes::new()),
            Arc::new(LoopbackDns::new()),
            Arc::new(host),
        )
    }

    fn manage() -> ManageService {
        manage_with_host(LoopbackHost::new())
    }

    fn attr(uuid: &str) -> ServiceAttr {
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
            register_dns: false,
            domain: String::new(),
            hosted_zone_id: String::new(),
            require_static_ip: true,
            tags: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn reserves_lowest_free_addresses_in_order() {
        let m = manage();
        let ips = m
            .create_static_ips_for_zone(&attr("uuid-1"), &HashMap::new(), 3, "az-west")
            .await
            .unwrap();
        let addrs: Vec<_> = ips.iter().map(|r| r.static_ip.as_str()).collect();
        assert_eq!(addrs, ["10.0.0.4", "10.0.0.5", "10.0.0.6"]);
        assert!(ips.iter().all(|r| r.member_name.is_none()));
    }

    #[tokio::test]
    async fn skips_assigned_and_host_addresses() {
        let m = manage_with_host(
            LoopbackHost::new().with_host_ips("az-west", vec!["10.0.0.5".to_string()]),
        );
        let assigned =
            HashMap::from([("10.0.0.4".to_string(), "svc-0".to_string())]);
        let ips = m
            .create_static_ips_for_zone(&attr("uuid-1"), &assigned, 2, "az-west")
            .await
            .unwrap();
        let addrs: Vec<_> = ips.iter().map(|r| r.static_ip.as_str()).collect();
        assert_eq!(addrs, ["10.0.0.6", "10.0.0.7"]);
    }

    #[tokio::test]
    async fn skips_addresses_of_other_services_and_reclaims_own() {
        let m = manage();
        // Another service holds the first two addresses.
        m.create_static_ips_for_zone(&attr("uuid-other"), &HashMap::new(), 2, "az-west")
            .await
            .unwrap();

        // This service minted one earlier but never bound it.
        let first = m
            .create_static_ips_for_zone(&attr("uuid-1"), &HashMap::new(), 1, "az-west")
            .await
            .unwrap();
        assert_eq!(first[0].static_ip, "10.0.0.6");

        // A re-entered run reclaims the unbound address instead of
        // burning a new one.
        let again = m
            .create_static_ips_for_zone(&attr("uuid-1"), &HashMap::new(), 1, "az-west")
            .await
            .unwrap();
        assert_eq!(again[0].static_ip, "10.0.0.6");
    }

    #[tokio::test]
    async fn exhausted_range_errors() {
        let host = LoopbackHost::new().with_cidr(moorage_platform::CidrBlock {
            ip_prefix: "10.0.0.".to_string(),
            first_host: 4,
            last_host: 5,
            prefix_len: 24,
        });
        let m = manage_with_host(host);
        let err = m
            .create_static_ips_for_zone(&attr("uuid-1"), &HashMap::new(), 3, "az-west")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::ManageError::Platform(PlatformError::Exhausted(_))
        ));
    }

    #[tokio::test]
    async fn binding_is_idempotent_and_exclusive() {
        let m = manage();
        let ips = m
            .create_static_ips_for_zone(&attr("uuid-1"), &HashMap::new(), 1, "az-west")
            .await
            .unwrap();
        let ip = &ips[0].static_ip;

        m.ensure_ip_assigned(ip, "uuid-1", "svc-0").await.unwrap();
        // Re-binding the same member is a no-op success.
        m.ensure_ip_assigned(ip, "uuid-1", "svc-0").await.unwrap();
        // Binding a different member fails the check.
        assert!(m
            .ensure_ip_assigned(ip, "uuid-1", "svc-1")
            .await
            .unwrap_err()
            .is_conditional_check_failed());
        // So does binding from a different service.
        assert!(m
            .ensure_ip_assigned(ip, "uuid-2", "svc-0")
            .await
            .unwrap_err()
            .is_conditional_check_failed());
    }
}
