//! DNS adapter: hosted zones and member records.

use async_trait::async_trait;

use crate::error::PlatformResult;

/// DNS effects used by the orchestrator.
///
/// All operations are idempotent at the adapter: resolving a hosted zone
/// that already exists returns its ID, and record upserts overwrite.
#[async_trait]
pub trait DnsService: Send + Sync {
    /// Resolve or create the hosted zone for a domain bound to a VPC.
    async fn get_or_create_hosted_zone(
        &self,
        domain: &str,
        vpc_id: &str,
        region: &str,
        private: bool,
    ) -> PlatformResult<String>;

    /// Create or overwrite a record in the zone.
    async fn upsert_record(
        &self,
        zone_id: &str,
        name: &str,
        target: &str,
        ttl_secs: u64,
    ) -> PlatformResult<()>;

    /// Delete a record from the zone. Absent records are not an error.
    async fn delete_record(&self, zone_id: &str, name: &str) -> PlatformResult<()>;
}
