//! The service-creation workflow, lifecycle transitions, and queries.
//!
//! `create_service` is a chain of idempotent steps. Each step either finds
//! its precondition already satisfied and skips, or performs exactly the
//! remaining work, so the workflow can be interrupted anywhere and
//! re-entered by a later call with the same request. The determinism of
//! the allocators (devices primary-then-journal, members in ascending
//! ordinal order, addresses ascending) is part of the contract: a retry
//! reproduces the same device names, volume tags, file IDs and addresses.

use std::collections::HashMap;

use tracing::{debug, error, info};

use moor_core::{
    gen_config_file_id, gen_member_name, gen_service_uuid, member_fqdn, member_ordinal,
    ConfigFile, ConfigFileRef, Device, JournalAttachment, JournalVolume, MemberVolumes, Service,
    ServiceAttr, ServiceMember, ServiceStatus, ServiceVolumes, MEMBER_DNS_TTL_SECS,
};
use moorage_metastore::DbError;
use moorage_platform::{CreateVolumeOptions, PlatformError, VolumeRole, VolumeTags};

use crate::error::{ManageError, ManageResult};
use crate::request::{CreateServiceRequest, ReplicaConfig};
use crate::ManageService;

/// Treat a missing record as already gone during teardown.
fn tolerate_not_found(result: Result<(), DbError>) -> Result<(), DbError> {
    match result {
        Err(DbError::RecordNotFound) => Ok(()),
        other => other,
    }
}

impl ManageService {
    // ── Creation workflow ──────────────────────────────────────────

    /// Create a service: devices, name row, hosted zone, attribute
    /// record, members (volumes, config files, static IPs, DNS), and the
    /// flip to `Active`. Returns the service UUID.
    ///
    /// Safe to retry from any point of failure; a retried call converges
    /// to the same terminal state and returns the same UUID.
    pub async fn create_service(
        &self,
        req: &CreateServiceRequest,
        domain: &str,
        vpc_id: &str,
    ) -> ManageResult<String> {
        req.validate()?;
        info!(
            cluster = %req.cluster,
            service = %req.service_name,
            replicas = req.replicas,
            "creating service"
        );

        // Devices and the logical volume plan. No cloud volumes yet.
        let volumes = self.create_service_volumes(req).await?;

        // The name row; later arrivals reuse the stored UUID.
        let service_uuid = self
            .check_and_create_service(&req.cluster, &req.service_name)
            .await?;

        // The DNS authority member records are published in.
        let hosted_zone_id = self
            .dns
            .get_or_create_hosted_zone(domain, vpc_id, &req.region, true)
            .await?;

        let attr = self
            .check_and_create_service_attr(&service_uuid, req, volumes, domain, &hosted_zone_id)
            .await?;

        self.create_service_members(&attr, req).await?;

        // A re-entered call finds this already done.
        self.set_service_initialized(&req.cluster, &req.service_name)
            .await?;

        info!(cluster = %req.cluster, service = %req.service_name, %service_uuid, "service created");
        Ok(service_uuid)
    }

    /// Allocate the service's devices and compose its logical volume
    /// plan. The journal device, when requested, is allocated with the
    /// primary as the exclusion hint so it binds to the next slot.
    pub async fn create_service_volumes(
        &self,
        req: &CreateServiceRequest,
    ) -> ManageResult<ServiceVolumes> {
        let primary_device_name = self
            .create_device(&req.cluster, &req.service_name, "")
            .await?;
        let journal = match &req.journal_volume {
            Some(volume) => {
                let device_name = self
                    .create_device(&req.cluster, &req.service_name, &primary_device_name)
                    .await?;
                Some(JournalVolume {
                    device_name,
                    volume: volume.clone(),
                })
            }
            None => None,
        };
        Ok(ServiceVolumes {
            primary_device_name,
            primary_volume: req.volume.clone(),
            journal,
        })
    }

    async fn check_and_create_service(
        &self,
        cluster: &str,
        service_name: &str,
    ) -> ManageResult<String> {
        match self.db.get_service(cluster, service_name).await {
            Ok(svc) => {
                debug!(service = service_name, uuid = %svc.service_uuid, "service row exists");
                return Ok(svc.service_uuid);
            }
            Err(DbError::RecordNotFound) => {}
            Err(err) => return Err(err.into()),
        }

        let svc = Service {
            cluster: cluster.to_string(),
            service_name: service_name.to_string(),
            service_uuid: gen_service_uuid(),
        };
        match self.db.create_service(&svc).await {
            Ok(()) => {
                info!(service = service_name, uuid = %svc.service_uuid, "created service row");
                Ok(svc.service_uuid)
            }
            Err(DbError::ConditionalCheckFailed) => {
                // Lost the insert race; the winner's UUID is authoritative.
                let stored = self.db.get_service(cluster, service_name).await?;
                Ok(stored.service_uuid)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn check_and_create_service_attr(
        &self,
        service_uuid: &str,
        req: &CreateServiceRequest,
        volumes: ServiceVolumes,
        domain: &str,
        hosted_zone_id: &str,
    ) -> ManageResult<ServiceAttr> {
        match self.db.get_service_attr(service_uuid).await {
            Ok(existing) => {
                match existing.status {
                    ServiceStatus::Deleting | ServiceStatus::Deleted => {
                        return Err(ManageError::InvalidRequest(format!(
                            "service {} is {}",
                            req.service_name, existing.status
                        )));
                    }
                    ServiceStatus::Creating | ServiceStatus::Active => {}
                }
                // A request that disagrees with the persisted intent is
                // not reconciled silently.
                if existing.replicas != req.replicas
                    || existing.require_static_ip != req.require_static_ip
                    || existing.register_dns != req.register_dns
                    || existing.hosted_zone_id != hosted_zone_id
                {
                    error!(
                        service = %req.service_name,
                        "request does not match stored service attributes"
                    );
                    return Err(DbError::ConditionalCheckFailed.into());
                }
                debug!(service = %req.service_name, status = %existing.status, "service attr exists");
                Ok(existing)
            }
            Err(DbError::RecordNotFound) => {
                let attr = ServiceAttr {
                    service_uuid: service_uuid.to_string(),
                    status: ServiceStatus::Creating,
                    cluster: req.cluster.clone(),
                    service_name: req.service_name.clone(),
                    replicas: req.replicas,
                    volumes,
                    register_dns: req.register_dns,
                    domain: domain.to_string(),
                    hosted_zone_id: hosted_zone_id.to_string(),
                    require_static_ip: req.require_static_ip,
                    tags: req.tags.clone(),
                };
                self.db.create_service_attr(&attr).await?;
                info!(service = %req.service_name, %service_uuid, "created service attr");
                Ok(attr)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Materialise one replica's config files, reusing any row that the
    /// content hash says already exists.
    pub async fn check_and_create_config_file(
        &self,
        service_uuid: &str,
        replica: &ReplicaConfig,
    ) -> ManageResult<Vec<ConfigFileRef>> {
        let mut refs = Vec::with_capacity(replica.configs.len());
        for file in &replica.configs {
            let file_id = gen_config_file_id(&file.content);
            match self.db.get_config_file(service_uuid, &file_id).await {
                Ok(_) => debug!(%file_id, "config file exists"),
                Err(DbError::RecordNotFound) => {
                    let record = ConfigFile {
                        service_uuid: service_uuid.to_string(),
                        file_id: file_id.clone(),
                        file_name: file.file_name.clone(),
                        content: file.content.clone(),
                    };
                    self.db.create_config_file(&record).await?;
                    debug!(%file_id, file = %file.file_name, "created config file");
                }
                Err(err) => return Err(err.into()),
            }
            refs.push(ConfigFileRef {
                file_name: file.file_name.clone(),
                file_id,
            });
        }
        Ok(refs)
    }

    async fn create_service_members(
        &self,
        attr: &ServiceAttr,
        req: &CreateServiceRequest,
    ) -> ManageResult<()> {
        let existing = self.db.list_service_members(&attr.service_uuid).await?;
        let mut members_by_name: HashMap<String, ServiceMember> = existing
            .into_iter()
            .map(|m| (m.member_name.clone(), m))
            .collect();
        // Addresses already bound to members of this service, so the
        // allocator never hands them out again.
        let mut assigned: HashMap<String, String> = members_by_name
            .values()
            .filter_map(|m| m.static_ip.clone().map(|ip| (ip, m.member_name.clone())))
            .collect();

        for ordinal in 0..attr.replicas {
            let member_name = gen_member_name(&attr.service_name, ordinal);
            let replica = &req.replica_configs[ordinal as usize];

            if let Some(member) = members_by_name.remove(&member_name) {
                // Re-entry: the row exists; heal the address binding and
                // DNS record, which a crash may have left behind.
                if let Some(ip) = &member.static_ip {
                    self.ensure_ip_assigned(ip, &attr.service_uuid, &member_name)
                        .await?;
                    self.upsert_member_dns(attr, &member_name, ip).await?;
                }
                debug!(member = %member_name, "member exists");
                continue;
            }

            let config_files = self
                .check_and_create_config_file(&attr.service_uuid, replica)
                .await?;

            let static_ip = if attr.require_static_ip {
                let minted = self
                    .create_static_ips_for_zone(attr, &assigned, 1, &replica.zone)
                    .await?;
                let first = minted.into_iter().next().ok_or(DbError::Internal)?;
                Some(first.static_ip)
            } else {
                None
            };

            let member = self
                .create_service_member(attr, &replica.zone, &member_name, static_ip, config_files)
                .await?;
            if let Some(ip) = &member.static_ip {
                assigned.insert(ip.clone(), member_name.clone());
            }
        }
        Ok(())
    }

    /// Provision one member: cloud volumes (tag-deduped), the member row,
    /// the static-IP binding, and the DNS record.
    pub async fn create_service_member(
        &self,
        attr: &ServiceAttr,
        zone: &str,
        member_name: &str,
        static_ip: Option<String>,
        config_files: Vec<ConfigFileRef>,
    ) -> ManageResult<ServiceMember> {
        let primary_volume_id = self
            .volumes
            .create_volume(&CreateVolumeOptions {
                tags: VolumeTags {
                    service_uuid: attr.service_uuid.clone(),
                    member_name: member_name.to_string(),
                    role: VolumeRole::Primary,
                },
                volume_type: attr.volumes.primary_volume.volume_type,
                size_gb: attr.volumes.primary_volume.size_gb,
                iops: attr.volumes.primary_volume.iops,
                zone: zone.to_string(),
            })
            .await?;

        let journal = match &attr.volumes.journal {
            Some(plan) => {
                let volume_id = self
                    .volumes
                    .create_volume(&CreateVolumeOptions {
                        tags: VolumeTags {
                            service_uuid: attr.service_uuid.clone(),
                            member_name: member_name.to_string(),
                            role: VolumeRole::Journal,
                        },
                        volume_type: plan.volume.volume_type,
                        size_gb: plan.volume.size_gb,
                        iops: plan.volume.iops,
                        zone: zone.to_string(),
                    })
                    .await?;
                Some(JournalAttachment {
                    volume_id,
                    device_name: plan.device_name.clone(),
                })
            }
            None => None,
        };

        let member = ServiceMember {
            service_uuid: attr.service_uuid.clone(),
            member_name: member_name.to_string(),
            zone: zone.to_string(),
            static_ip,
            volumes: MemberVolumes {
                primary_volume_id,
                primary_device_name: attr.volumes.primary_device_name.clone(),
                journal,
            },
            config_files,
        };
        // Conditional on absence; an identical row from an earlier
        // attempt is a no-op success.
        self.db.create_service_member(&member).await?;

        if let Some(ip) = &member.static_ip {
            self.ensure_ip_assigned(ip, &attr.service_uuid, member_name)
                .await?;
            self.upsert_member_dns(attr, member_name, ip).await?;
        }
        info!(member = %member.member_name, zone, "created service member");
        Ok(member)
    }

    async fn upsert_member_dns(
        &self,
        attr: &ServiceAttr,
        member_name: &str,
        target: &str,
    ) -> ManageResult<()> {
        if !attr.register_dns {
            return Ok(());
        }
        let fqdn = member_fqdn(member_name, &attr.domain);
        self.dns
            .upsert_record(&attr.hosted_zone_id, &fqdn, target, MEMBER_DNS_TTL_SECS)
            .await?;
        debug!(%fqdn, target, "registered member dns");
        Ok(())
    }

    // ── Status transitions ─────────────────────────────────────────

    /// Flip the service from `Creating` to `Active`. Already `Active` is
    /// success; any other status fails the check.
    pub async fn set_service_initialized(
        &self,
        cluster: &str,
        service_name: &str,
    ) -> ManageResult<()> {
        let svc = self.db.get_service(cluster, service_name).await?;
        let attr = self.db.get_service_attr(&svc.service_uuid).await?;
        match attr.status {
            ServiceStatus::Active => Ok(()),
            ServiceStatus::Creating => {
                let mut active = attr.clone();
                active.status = ServiceStatus::Active;
                match self.db.update_service_attr(&attr, &active).await {
                    Ok(()) => {
                        info!(cluster, service = service_name, "service initialized");
                        Ok(())
                    }
                    Err(DbError::ConditionalCheckFailed) => {
                        // Raced a concurrent finaliser.
                        let current = self.db.get_service_attr(&svc.service_uuid).await?;
                        if current.status == ServiceStatus::Active {
                            Ok(())
                        } else {
                            Err(DbError::ConditionalCheckFailed.into())
                        }
                    }
                    Err(err) => Err(err.into()),
                }
            }
            _ => Err(DbError::ConditionalCheckFailed.into()),
        }
    }

    // ── Deletion ───────────────────────────────────────────────────

    /// Tear a service down and return its members' volume IDs for the
    /// caller to detach and destroy. Every sub-step tolerates records
    /// already gone, so an interrupted deletion can be retried.
    pub async fn delete_service(
        &self,
        cluster: &str,
        service_name: &str,
    ) -> ManageResult<Vec<String>> {
        let svc = self.db.get_service(cluster, service_name).await?;
        let mut attr = self.db.get_service_attr(&svc.service_uuid).await?;

        if attr.status != ServiceStatus::Deleting {
            let mut deleting = attr.clone();
            deleting.status = ServiceStatus::Deleting;
            match self.db.update_service_attr(&attr, &deleting).await {
                Ok(()) => attr = deleting,
                Err(DbError::ConditionalCheckFailed) => {
                    attr = self.db.get_service_attr(&svc.service_uuid).await?;
                    if attr.status != ServiceStatus::Deleting {
                        return Err(DbError::ConditionalCheckFailed.into());
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        let members = self.db.list_service_members(&svc.service_uuid).await?;
        let mut volume_ids = Vec::new();
        for member in &members {
            volume_ids.push(member.volumes.primary_volume_id.clone());
            if let Some(journal) = &member.volumes.journal {
                volume_ids.push(journal.volume_id.clone());
            }

            if attr.register_dns && member.static_ip.is_some() {
                let fqdn = member_fqdn(&member.member_name, &attr.domain);
                match self.dns.delete_record(&attr.hosted_zone_id, &fqdn).await {
                    Ok(()) | Err(PlatformError::NotFound(_)) => {}
                    Err(err) => return Err(err.into()),
                }
            }
            for file in &member.config_files {
                tolerate_not_found(
                    self.db
                        .delete_config_file(&svc.service_uuid, &file.file_id)
                        .await,
                )?;
            }
            if let Some(ip) = &member.static_ip {
                tolerate_not_found(self.db.delete_static_ip(ip).await)?;
            }
            tolerate_not_found(
                self.db
                    .delete_service_member(&svc.service_uuid, &member.member_name)
                    .await,
            )?;
        }

        tolerate_not_found(self.db.delete_service_attr(&svc.service_uuid).await)?;
        tolerate_not_found(self.db.delete_service(cluster, service_name).await)?;
        tolerate_not_found(
            self.db
                .delete_device(cluster, &attr.volumes.primary_device_name)
                .await,
        )?;
        if let Some(journal) = &attr.volumes.journal {
            tolerate_not_found(self.db.delete_device(cluster, &journal.device_name).await)?;
        }

        info!(cluster, service = service_name, volumes = volume_ids.len(), "deleted service");
        Ok(volume_ids)
    }

    // ── Queries ────────────────────────────────────────────────────

    pub async fn get_service(&self, cluster: &str, service_name: &str) -> ManageResult<Service> {
        Ok(self.db.get_service(cluster, service_name).await?)
    }

    pub async fn get_service_attr(&self, service_uuid: &str) -> ManageResult<ServiceAttr> {
        Ok(self.db.get_service_attr(service_uuid).await?)
    }

    pub async fn list_services(&self, cluster: &str) -> ManageResult<Vec<Service>> {
        Ok(self.db.list_services(cluster).await?)
    }

    pub async fn list_devices(&self, cluster: &str) -> ManageResult<Vec<Device>> {
        Ok(self.db.list_devices(cluster).await?)
    }

    /// Members of a service, sorted by ordinal so callers never re-sort.
    pub async fn list_service_members(
        &self,
        service_uuid: &str,
    ) -> ManageResult<Vec<ServiceMember>> {
        let mut members = self.db.list_service_members(service_uuid).await?;
        members.sort_by_key(|m| member_ordinal(&m.member_name).unwrap_or(u64::MAX));
        Ok(members)
    }

    /// Volume IDs of every member (primary first, then journal), in
    /// member ordinal order.
    pub async fn list_service_volumes(
        &self,
        cluster: &str,
        service_name: &str,
    ) -> ManageResult<Vec<String>> {
        let svc = self.db.get_service(cluster, service_name).await?;
        let members = self.list_service_members(&svc.service_uuid).await?;
        let mut volume_ids = Vec::new();
        for member in &members {
            volume_ids.push(member.volumes.primary_volume_id.clone());
            if let Some(journal) = &member.volumes.journal {
                volume_ids.push(journal.volume_id.clone());
            }
        }
        Ok(volume_ids)
    }
}
