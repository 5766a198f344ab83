//! Block-storage volume adapter.

use async_trait::async_trait;
use moor_core::VolumeType;
use std::fmt;

use crate::error::PlatformResult;

/// Which role a volume plays for a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeRole {
    Primary,
    Journal,
}

impl fmt::Display for VolumeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeRole::Primary => f.write_str("primary"),
            VolumeRole::Journal => f.write_str("journal"),
        }
    }
}

/// Deterministic tags identifying a volume.
///
/// The adapter must dedupe creation on these tags: creating a volume with
/// tags that already exist returns the existing volume ID instead of
/// provisioning a second one, which is what makes a retried orchestrator
/// step safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeTags {
    pub service_uuid: String,
    pub member_name: String,
    pub role: VolumeRole,
}

impl VolumeTags {
    /// Canonical string form used as the dedupe key.
    pub fn dedupe_key(&self) -> String {
        format!("{}/{}/{}", self.service_uuid, self.member_name, self.role)
    }
}

/// Parameters for provisioning one volume.
#[derive(Debug, Clone)]
pub struct CreateVolumeOptions {
    pub tags: VolumeTags,
    pub volume_type: VolumeType,
    pub size_gb: u64,
    pub iops: u64,
    pub zone: String,
}

/// Provisioning state of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeState {
    Creating,
    Available,
    InUse,
    Deleting,
}

/// Block-storage effects used by the orchestrator.
#[async_trait]
pub trait VolumeService: Send + Sync {
    /// Provision a volume, or return the ID of the volume already carrying
    /// these tags.
    async fn create_volume(&self, opts: &CreateVolumeOptions) -> PlatformResult<String>;

    /// Release a volume.
    async fn delete_volume(&self, volume_id: &str) -> PlatformResult<()>;

    /// Current provisioning state of a volume.
    async fn describe_volume(&self, volume_id: &str) -> PlatformResult<VolumeState>;
}
