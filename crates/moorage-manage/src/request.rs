//! Service-creation request types.

use std::collections::BTreeMap;

use moor_core::ServiceVolume;

use crate::error::{ManageError, ManageResult};

/// One config file attached to one replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaConfigFile {
    pub file_name: String,
    pub content: String,
}

/// Per-replica placement and configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaConfig {
    /// Availability zone the replica is pinned to.
    pub zone: String,
    pub configs: Vec<ReplicaConfigFile>,
}

/// Request to create a service.
#[derive(Debug, Clone)]
pub struct CreateServiceRequest {
    pub region: String,
    pub cluster: String,
    pub service_name: String,
    pub replicas: u64,
    pub volume: ServiceVolume,
    /// Optional journal volume; when present, a second device is
    /// allocated for it.
    pub journal_volume: Option<ServiceVolume>,
    pub register_dns: bool,
    pub require_static_ip: bool,
    /// One entry per replica, in ordinal order.
    pub replica_configs: Vec<ReplicaConfig>,
    /// Free-form user tags recorded on the service attributes.
    pub tags: BTreeMap<String, String>,
}

impl CreateServiceRequest {
    pub(crate) fn validate(&self) -> ManageResult<()> {
        if self.cluster.is_empty() {
            return Err(ManageError::InvalidRequest("empty cluster name".to_string()));
        }
        if self.service_name.is_empty() {
            return Err(ManageError::InvalidRequest("empty service name".to_string()));
        }
        if self.replicas == 0 {
            return Err(ManageError::InvalidRequest("zero replicas".to_string()));
        }
        if self.volume.size_gb == 0 {
            return Err(ManageError::InvalidRequest("zero volume size".to_string()));
        }
        if let Some(journal) = &self.journal_volume {
            if journal.size_gb == 0 {
                return Err(ManageError::InvalidRequest(
                    "zero journal volume size".to_string(),
                ));
            }
        }
        if self.replica_configs.len() as u64 != self.replicas {
            return Err(ManageError::InvalidRequest(format!(
                "{} replica configs for {} replicas",
                self.replica_configs.len(),
                self.replicas
            )));
        }
        if self.replica_configs.iter().any(|c| c.zone.is_empty()) {
            return Err(ManageError::InvalidRequest(
                "replica config with empty zone".to_string(),
            ));
        }
        Ok(())
    }
}
