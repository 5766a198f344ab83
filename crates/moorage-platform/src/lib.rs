//! moorage-platform: adapters for the non-transactional collaborators.
//!
//! The control plane composes three external effect surfaces:
//!
//! - [`VolumeService`]: block-storage volumes, deduplicated on tags so a
//!   retried provisioning step never leaks a volume
//! - [`DnsService`]: hosted zones and member DNS records
//! - [`HostPlatform`]: the zone CIDR block, host IPs, and the platform's
//!   block-device name sequence
//!
//! Each surface is a narrow capability trait injected as an `Arc<dyn …>`.
//! The [`loopback`] module provides deterministic in-memory implementations
//! used by tests and local development.

pub mod dns;
pub mod error;
pub mod host;
pub mod loopback;
pub mod volume;

pub use dns::DnsService;
pub use error::{PlatformError, PlatformResult};
pub use host::{CidrBlock, HostPlatform};
pub use loopback::{LoopbackDns, LoopbackHost, LoopbackVolumes};
pub use volume::{CreateVolumeOptions, VolumeRole, VolumeService, VolumeState, VolumeTags};
