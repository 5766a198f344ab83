//! Device-name allocation.
//!
//! Device names come from the host platform's deterministic sequence
//! (`/dev/loop1`, `/dev/loop2`, …) and are recorded in the metadata store
//! before they are handed out. Allocation is idempotent per
//! `(cluster, service)`: a service that already holds a device gets the
//! same name back on every call.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use moor_core::Device;
use moorage_metastore::DbError;

use crate::error::{ManageError, ManageResult};
use crate::ManageService;

/// Bound on rescans when racing other allocators for the same names.
const MAX_ALLOC_ATTEMPTS: usize = 8;

impl ManageService {
    /// Allocate (or re-find) a device name for a service.
    ///
    /// `exclude_name` skips a name already held by the same service, so a
    /// second allocation within one workflow step binds to the next
    /// device slot instead of returning the first one again; pass `""`
    /// for the first allocation.
    pub async fn create_device(
        &self,
        cluster: &str,
        service_name: &str,
        exclude_name: &str,
    ) -> ManageResult<String> {
        for _ in 0..MAX_ALLOC_ATTEMPTS {
            let devices = self.db.list_devices(cluster).await?;

            // Reuse an existing binding: allocation is idempotent for a
            // given service and role.
            let owned: Vec<&Device> = devices
                .iter()
                .filter(|d| d.service_name == service_name && d.device_name != exclude_name)
                .collect();
            if let Some(name) = self.earliest_owned_device(&owned)? {
                debug!(
                    cluster,
                    service = service_name,
                    device = %name,
                    "reusing allocated device"
                );
                return Ok(name);
            }

            // First free name in the platform sequence.
            let taken: HashSet<&str> = devices.iter().map(|d| d.device_name.as_str()).collect();
            let mut name = self.host.first_device_name();
            while taken.contains(name.as_str()) || name == exclude_name {
                name = self.host.next_device_name(&name)?;
            }

            let dev = Device {
                cluster: cluster.to_string(),
                device_name: name.clone(),
                service_name: service_name.to_string(),
            };
            match self.db.create_device(&dev).await {
                Ok(()) => {
                    info!(cluster, service = service_name, device = %name, "created device");
                    return Ok(name);
                }
                Err(DbError::ConditionalCheckFailed) => {
                    // Raced another allocator to this name. If the row now
                    // binds to us, reuse it; otherwise rescan.
                    let existing = self.db.get_device(cluster, &name).await?;
                    if existing.service_name == service_name {
                        return Ok(name);
                    }
                    warn!(
                        cluster,
                        device = %name,
                        holder = %existing.service_name,
                        "device name taken, rescanning"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        warn!(cluster, service = service_name, "device allocation kept losing races");
        Err(ManageError::Db(DbError::Internal))
    }

    /// The service's device that comes first in the platform's allocation
    /// sequence.
    ///
    /// The store lists keys lexicographically, which disagrees with the
    /// numeric sequence once names cross a digit-width boundary
    /// (`/dev/loop10` sorts before `/dev/loop9`). Both of a service's
    /// devices can match when no exclusion is given, and the primary is
    /// the one allocated first in the sequence, so role stability on
    /// re-entry has to come from the sequence, not the iterator.
    fn earliest_owned_device(&self, owned: &[&Device]) -> ManageResult<Option<String>> {
        match owned {
            [] => Ok(None),
            [only] => Ok(Some(only.device_name.clone())),
            _ => {
                let names: HashSet<&str> =
                    owned.iter().map(|d| d.device_name.as_str()).collect();
                let mut name = self.host.first_device_name();
                loop {
                    if names.contains(name.as_str()) {
                        return Ok(Some(name));
                    }
                    name = self.host.next_device_name(&name)?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use moorage_metastore::{DbStore, MetaStore};
    use moorage_platform::{LoopbackDns, LoopbackHost, LoopbackVolumes};

    use super::*;

    fn manage() -> ManageService {
        ManageService::new(
            Arc::new(DbStore::open_in_memory().unwrap()),
            Arc::new(LoopbackVolumes::new()),
            Arc::new(LoopbackDns::new()),
            Arc::new(LoopbackHost::new()),
        )
    }

    #[tokio::test]
    async fn allocates_densely_from_first_name() {
        let m = manage();
        assert_eq!(m.create_device("c1", "svc-a", "").await.unwrap(), "/dev/loop1");
        assert_eq!(m.create_device("c1", "svc-b", "").await.unwrap(), "/dev/loop2");
        assert_eq!(m.create_device("c1", "svc-c", "").await.unwrap(), "/dev/loop3");
    }

    #[tokio::test]
    async fn allocation_is_idempotent_per_service() {
        let m = manage();
        let first = m.create_device("c1", "svc-a", "").await.unwrap();
        let again = m.create_device("c1", "svc-a", "").await.unwrap();
        assert_eq!(first, again);
        assert_eq!(m.db.list_devices("c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exclusion_binds_the_next_slot() {
        let m = manage();
        let primary = m.create_device("c1", "svc-a", "").await.unwrap();
        let journal = m.create_device("c1", "svc-a", &primary).await.unwrap();
        assert_eq!(primary, "/dev/loop1");
        assert_eq!(journal, "/dev/loop2");

        // Both allocations are stable on re-entry.
        assert_eq!(m.create_device("c1", "svc-a", "").await.unwrap(), primary);
        assert_eq!(m.create_device("c1", "svc-a", &primary).await.unwrap(), journal);
    }

    #[tokio::test]
    async fn skips_names_taken_by_other_services() {
        let m = manage();
        // Seed a binding as if another writer created it.
        m.db.create_device(&Device {
            cluster: "c1".to_string(),
            device_name: "/dev/loop1".to_string(),
            service_name: "other".to_string(),
        })
        .await
        .unwrap();

        assert_eq!(m.create_device("c1", "svc-a", "").await.unwrap(), "/dev/loop2");
    }

    #[tokio::test]
    async fn reuse_is_stable_across_the_digit_width_boundary() {
        let m = manage();
        // Fill the cluster so the next service straddles loop9/loop10.
        for i in 0..8 {
            m.create_device("c1", &format!("svc-{i}"), "").await.unwrap();
        }
        let primary = m.create_device("c1", "svc-j", "").await.unwrap();
        assert_eq!(primary, "/dev/loop9");
        let journal = m.create_device("c1", "svc-j", &primary).await.unwrap();
        assert_eq!(journal, "/dev/loop10");

        // On re-entry both rows exist, and "/dev/loop10" sorts before
        // "/dev/loop9" in the store's key order; the roles must not flip.
        assert_eq!(m.create_device("c1", "svc-j", "").await.unwrap(), "/dev/loop9");
        assert_eq!(
            m.create_device("c1", "svc-j", &primary).await.unwrap(),
            "/dev/loop10"
        );
    }

    #[tokio::test]
    async fn clusters_are_independent() {
        let m = manage();
        assert_eq!(m.create_device("c1", "svc-a", "").await.unwrap(), "/dev/loop1");
        assert_eq!(m.create_device("c2", "svc-a", "").await.unwrap(), "/dev/loop1");
    }
}
