//! Host platform adapter: CIDR block, host IPs, device-name sequence.

use async_trait::async_trait;

use crate::error::PlatformResult;

/// The address block of a zone, in the split form the allocators consume.
///
/// Host IPs are `<ip_prefix><n>` for `n` in `first_host..=last_host`; the
/// static-IP allocator walks this range in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrBlock {
    /// Dotted prefix including the trailing dot, e.g. `10.0.0.`.
    pub ip_prefix: String,
    /// First assignable host number.
    pub first_host: u32,
    /// Last assignable host number.
    pub last_host: u32,
    /// Network prefix length.
    pub prefix_len: u8,
}

impl CidrBlock {
    /// The address of host `n` in this block.
    pub fn host_ip(&self, n: u32) -> String {
        format!("{}{}", self.ip_prefix, n)
    }
}

/// Host-level facts and conventions of the container platform.
#[async_trait]
pub trait HostPlatform: Send + Sync {
    /// The zone-local CIDR block static IPs are drawn from.
    fn cidr_block(&self) -> CidrBlock;

    /// IPs already held by hosts in the zone; the static-IP allocator
    /// never hands these out.
    async fn list_host_ips(&self, zone: &str) -> PlatformResult<Vec<String>>;

    /// First name in the platform's block-device sequence.
    fn first_device_name(&self) -> String;

    /// Successor of `prev` in the device sequence; errors when the
    /// sequence is exhausted.
    fn next_device_name(&self, prev: &str) -> PlatformResult<String>;
}
