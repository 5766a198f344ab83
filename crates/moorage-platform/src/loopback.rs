//! Deterministic in-memory platform implementations.
//!
//! Used by tests and local single-node development. Volume IDs, zone IDs
//! and device names are minted from counters so test oracles can predict
//! them: `vol-1`, `zone-1`, `/dev/loop1`, addresses from `10.0.0.4`.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::dns::DnsService;
use crate::error::{PlatformError, PlatformResult};
use crate::host::{CidrBlock, HostPlatform};
use crate::volume::{CreateVolumeOptions, VolumeService, VolumeState};

const LOOP_DEVICE_PREFIX: &str = "/dev/loop";
const MAX_LOOP_DEVICES: u32 = 255;

// ── Volumes ────────────────────────────────────────────────────────

#[derive(Default)]
struct VolumesInner {
    /// Dedupe key → volume ID.
    by_tags: HashMap<String, String>,
    states: HashMap<String, VolumeState>,
    next_id: u64,
}

/// In-memory volume service with tag-based dedupe.
#[derive(Default)]
pub struct LoopbackVolumes {
    inner: Mutex<VolumesInner>,
}

impl LoopbackVolumes {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VolumeService for LoopbackVolumes {
    async fn create_volume(&self, opts: &CreateVolumeOptions) -> PlatformResult<String> {
        if opts.size_gb == 0 {
            return Err(PlatformError::InvalidInput(
                "volume size must be non-zero".to_string(),
            ));
        }
        let key = opts.tags.dedupe_key();
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.by_tags.get(&key) {
            debug!(volume_id = %existing, tags = %key, "volume already provisioned");
            return Ok(existing.clone());
        }
        inner.next_id += 1;
        let volume_id = format!("vol-{}", inner.next_id);
        inner.by_tags.insert(key.clone(), volume_id.clone());
        inner.states.insert(volume_id.clone(), VolumeState::Available);
        debug!(%volume_id, tags = %key, "volume provisioned");
        Ok(volume_id)
    }

    async fn delete_volume(&self, volume_id: &str) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.states.remove(volume_id).is_none() {
            return Err(PlatformError::NotFound(volume_id.to_string()));
        }
        inner.by_tags.retain(|_, id| id != volume_id);
        Ok(())
    }

    async fn describe_volume(&self, volume_id: &str) -> PlatformResult<VolumeState> {
        let inner = self.inner.lock().await;
        inner
            .states
            .get(volume_id)
            .copied()
            .ok_or_else(|| PlatformError::NotFound(volume_id.to_string()))
    }
}

// ── DNS ────────────────────────────────────────────────────────────

#[derive(Default)]
struct DnsInner {
    /// `(domain, vpc)` → zone ID.
    zones: HashMap<(String, String), String>,
    /// `(zone ID, record name)` → target.
    records: HashMap<(String, String), String>,
    next_zone: u64,
}

/// In-memory DNS service.
#[derive(Default)]
pub struct LoopbackDns {
    inner: Mutex<DnsInner>,
}

impl LoopbackDns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a record target, for test assertions.
    pub async fn record_target(&self, zone_id: &str, name: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        inner
            .records
            .get(&(zone_id.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl DnsService for LoopbackDns {
    async fn get_or_create_hosted_zone(
        &self,
        domain: &str,
        vpc_id: &str,
        _region: &str,
        _private: bool,
    ) -> PlatformResult<String> {
        let key = (domain.to_string(), vpc_id.to_string());
        let mut inner = self.inner.lock().await;
        if let Some(zone) = inner.zones.get(&key) {
            return Ok(zone.clone());
        }
        inner.next_zone += 1;
        let zone_id = format!("zone-{}", inner.next_zone);
        inner.zones.insert(key, zone_id.clone());
        debug!(%zone_id, %domain, %vpc_id, "hosted zone created");
        Ok(zone_id)
    }

    async fn upsert_record(
        &self,
        zone_id: &str,
        name: &str,
        target: &str,
        _ttl_secs: u64,
    ) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .records
            .insert((zone_id.to_string(), name.to_string()), target.to_string());
        Ok(())
    }

    async fn delete_record(&self, zone_id: &str, name: &str) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .records
            .remove(&(zone_id.to_string(), name.to_string()));
        Ok(())
    }
}

// ── Host ───────────────────────────────────────────────────────────

/// In-memory host platform serving the `/dev/loop<n>` device sequence and
/// a fixed zone CIDR block.
pub struct LoopbackHost {
    cidr: CidrBlock,
    /// Host IPs per zone, reported as already in use.
    host_ips: HashMap<String, Vec<String>>,
}

impl LoopbackHost {
    pub fn new() -> Self {
        Self {
            cidr: CidrBlock {
                ip_prefix: "10.0.0.".to_string(),
                first_host: 4,
                last_host: 250,
                prefix_len: 24,
            },
            host_ips: HashMap::new(),
        }
    }

    /// Override the CIDR block.
    pub fn with_cidr(mut self, cidr: CidrBlock) -> Self {
        self.cidr = cidr;
        self
    }

    /// Mark IPs as already held by hosts in a zone.
    pub fn with_host_ips(mut self, zone: &str, ips: Vec<String>) -> Self {
        self.host_ips.insert(zone.to_string(), ips);
        self
    }
}

impl Default for LoopbackHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostPlatform for LoopbackHost {
    fn cidr_block(&self) -> CidrBlock {
        self.cidr.clone()
    }

    async fn list_host_ips(&self, zone: &str) -> PlatformResult<Vec<String>> {
        Ok(self.host_ips.get(zone).cloned().unwrap_or_default())
    }

    fn first_device_name(&self) -> String {
        format!("{LOOP_DEVICE_PREFIX}1")
    }

    fn next_device_name(&self, prev: &str) -> PlatformResult<String> {
        let n: u32 = prev
            .strip_prefix(LOOP_DEVICE_PREFIX)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| PlatformError::InvalidInput(format!("bad device name: {prev}")))?;
        if n >= MAX_LOOP_DEVICES {
            return Err(PlatformError::Exhausted(format!(
                "device sequence ended at {prev}"
            )));
        }
        Ok(format!("{LOOP_DEVICE_PREFIX}{}", n + 1))
    }
}
