//! moorage-manage: the service-creation orchestrator and lifecycle core.
//!
//! [`ManageService`] composes the metadata store and the platform adapters
//! into the control plane's operations:
//!
//! - `create_service`: a chain of idempotent steps (device allocation,
//!   service row, hosted zone, attribute record, members with volumes,
//!   config files, static IPs and DNS records, finalisation). Any step may
//!   be interrupted and re-entered; a retried call converges to the same
//!   terminal state and returns the same service UUID.
//! - `set_service_initialized` / `delete_service`: status transitions and
//!   the cascading, NotFound-tolerant teardown.
//! - query operations: services, devices, members (sorted by ordinal),
//!   and member volume IDs.
//!
//! All cross-request coordination goes through the metadata store's
//! conditional writes; the orchestrator holds no in-process allocator
//! state, so it survives restarts and concurrent writers.

use std::sync::Arc;

use moorage_metastore::MetaStore;
use moorage_platform::{DnsService, HostPlatform, VolumeService};

pub mod device;
pub mod error;
pub mod request;
pub mod service;
pub mod staticip;

pub use error::{ManageError, ManageResult};
pub use request::{CreateServiceRequest, ReplicaConfig, ReplicaConfigFile};

/// The management core of the control plane.
///
/// Cheap to share: all fields are `Arc`s of the injected collaborators.
pub struct ManageService {
    db: Arc<dyn MetaStore>,
    volumes: Arc<dyn VolumeService>,
    dns: Arc<dyn DnsService>,
    host: Arc<dyn HostPlatform>,
}

impl ManageService {
    pub fn new(
        db: Arc<dyn MetaStore>,
        volumes: Arc<dyn VolumeService>,
        dns: Arc<dyn DnsService>,
        host: Arc<dyn HostPlatform>,
    ) -> Self {
        Self {
            db,
            volumes,
            dns,
            host,
        }
    }
}
