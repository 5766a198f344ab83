//! gRPC client for the metadata store.
//!
//! Implements [`MetaStore`] against a remote server. Every call mints a
//! request UUID (sent as `x-request-id` metadata and logged on both ends)
//! and runs inside a retry envelope: up to three attempts with a fixed 2 s
//! back-off. Application errors arrive as status code `Unknown` with a
//! stable description and are returned without retry; any other status
//! marks the shared connection failed and retries.
//!
//! # Connection management
//!
//! All in-flight requests share one connection handle behind a mutex. The
//! happy path is an Arc clone plus one atomic load of the `healthy` flag.
//! Reconnection double-checks under the mutex, so concurrent failure
//! discovery dials at most once. A caller whose `mark_failed` observes
//! that the handle was already replaced skips the back-off sleep: someone
//! else has reconnected and the retry can go straight through.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status};
use tracing::{debug, warn};

use moor_core::{
    gen_request_uuid, ConfigFile, Device, Service, ServiceAttr, ServiceMember, ServiceStaticIp,
};

use crate::convert;
use crate::error::{DbError, DbResult};
use crate::pb;
use crate::store::MetaStore;

/// Metadata header carrying the per-call request UUID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_RETRIES: usize = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

type PbClient = pb::meta_db_client::MetaDbClient<Channel>;

/// One dialed connection. `healthy` flips to false exactly once, when the
/// first caller discovers a transport fault on it.
struct Handle {
    healthy: AtomicBool,
    client: PbClient,
}

/// Metadata store client over gRPC.
pub struct StoreClient {
    addr: String,
    handle: Mutex<Arc<Handle>>,
}

impl StoreClient {
    /// Create a client for the server at `addr` (scheme required, e.g.
    /// `http://10.0.0.7:27030`). The connection is dialed lazily.
    pub fn new(addr: impl Into<String>) -> DbResult<Self> {
        let addr = addr.into();
        let handle = Self::dial(&addr)?;
        Ok(Self {
            addr,
            handle: Mutex::new(handle),
        })
    }

    fn dial(addr: &str) -> DbResult<Arc<Handle>> {
        let endpoint = Endpoint::from_shared(addr.to_string())
            .map_err(|e| DbError::Transport(e.to_string()))?;
        let channel = endpoint.connect_lazy();
        Ok(Arc::new(Handle {
            healthy: AtomicBool::new(true),
            client: PbClient::new(channel),
        }))
    }

    /// The current handle if healthy, else reconnect.
    async fn client(&self) -> Arc<Handle> {
        let current = { self.handle.lock().await.clone() };
        if current.healthy.load(Ordering::Acquire) {
            return current;
        }
        self.reconnect().await
    }

    async fn reconnect(&self) -> Arc<Handle> {
        let mut guard = self.handle.lock().await;
        // Double-check: another caller may have reconnected while this one
        // waited on the lock.
        if guard.healthy.load(Ordering::Acquire) {
            return guard.clone();
        }
        match Self::dial(&self.addr) {
            Ok(handle) => {
                debug!(addr = %self.addr, "reconnected to metadata server");
                *guard = handle;
            }
            Err(err) => {
                // Keep the failed handle; the retry envelope backs off.
                warn!(addr = %self.addr, error = %err, "redial failed");
            }
        }
        guard.clone()
    }

    /// Mark `handle` failed. Returns true when the shared handle had
    /// already been replaced by another caller, in which case the retry
    /// can proceed without sleeping.
    async fn mark_failed(&self, handle: &Arc<Handle>) -> bool {
        let guard = self.handle.lock().await;
        if !guard.healthy.load(Ordering::Acquire) {
            // Already marked by an earlier caller.
            return false;
        }
        if !Arc::ptr_eq(&guard, handle) {
            // The current handle is healthy and is not the one that
            // failed: another request already reconnected.
            return true;
        }
        guard.healthy.store(false, Ordering::Release);
        false
    }

    async fn mark_failed_and_sleep(&self, handle: &Arc<Handle>) {
        if !self.mark_failed(handle).await {
            tokio::time::sleep(RETRY_BACKOFF).await;
        }
    }

    /// The retry envelope shared by every RPC.
    async fn call<Req, Resp, F, Fut>(&self, op: &'static str, req: Req, f: F) -> DbResult<Resp>
    where
        Req: Clone + Send,
        Resp: Send,
        F: Fn(PbClient, Request<Req>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<Resp, Status>> + Send,
    {
        let requuid = gen_request_uuid();
        let mut last = DbError::Transport("no attempt made".to_string());
        for attempt in 0..MAX_RETRIES {
            let handle = self.client().await;
            let mut request = Request::new(req.clone());
            if let Ok(value) = MetadataValue::try_from(requuid.as_str()) {
                request.metadata_mut().insert(REQUEST_ID_HEADER, value);
            }
            match f(handle.client.clone(), request).await {
                Ok(resp) => {
                    debug!(%op, %requuid, attempt, "rpc ok");
                    return Ok(resp);
                }
                Err(status) if status.code() == Code::Unknown => {
                    // Application-level error from the server; translate
                    // and return without retry.
                    let err = DbError::from_wire_message(status.message());
                    warn!(%op, %requuid, error = %err, "rpc application error");
                    return Err(err);
                }
                Err(status) => {
                    warn!(%op, %requuid, attempt, error = %status, "rpc transport error");
                    last = DbError::Transport(status.to_string());
                    self.mark_failed_and_sleep(&handle).await;
                }
            }
        }
        Err(last)
    }
}

#[async_trait]
impl MetaStore for StoreClient {
    // ── Devices ────────────────────────────────────────────────────

    async fn create_device(&self, dev: &Device) -> DbResult<()> {
        let msg: pb::Device = dev.clone().into();
        self.call("CreateDevice", msg, |mut cli, req| async move {
            cli.create_device(req).await.map(|_| ())
        })
        .await
    }

    async fn get_device(&self, cluster: &str, device_name: &str) -> DbResult<Device> {
        let key = pb::DeviceKey {
            cluster: cluster.to_string(),
            device_name: device_name.to_string(),
        };
        let msg = self
            .call("GetDevice", key, |mut cli, req| async move {
                cli.get_device(req).await.map(|r| r.into_inner())
            })
            .await?;
        convert::device_from_pb(&msg)
    }

    async fn delete_device(&self, cluster: &str, device_name: &str) -> DbResult<()> {
        let key = pb::DeviceKey {
            cluster: cluster.to_string(),
            device_name: device_name.to_string(),
        };
        self.call("DeleteDevice", key, |mut cli, req| async move {
            cli.delete_device(req).await.map(|_| ())
        })
        .await
    }

    async fn list_devices(&self, cluster: &str) -> DbResult<Vec<Device>> {
        let req = pb::ListDevicesRequest {
            cluster: cluster.to_string(),
        };
        // A transport fault mid-stream fails the whole attempt; partial
        // results never leave the closure.
        let items = self
            .call("ListDevices", req, |mut cli, req| async move {
                let mut stream = cli.list_devices(req).await?.into_inner();
                let mut items = Vec::new();
                while let Some(item) = stream.message().await? {
                    items.push(item);
                }
                Ok(items)
            })
            .await?;
        items.iter().map(convert::device_from_pb).collect()
    }

    // ── Services ───────────────────────────────────────────────────

    async fn create_service(&self, svc: &Service) -> DbResult<()> {
        let msg: pb::Service = svc.clone().into();
        self.call("CreateService", msg, |mut cli, req| async move {
            cli.create_service(req).await.map(|_| ())
        })
        .await
    }

    async fn get_service(&self, cluster: &str, service_name: &str) -> DbResult<Service> {
        let key = pb::ServiceKey {
            cluster: cluster.to_string(),
            service_name: service_name.to_string(),
        };
        let msg = self
            .call("GetService", key, |mut cli, req| async move {
                cli.get_service(req).await.map(|r| r.into_inner())
            })
            .await?;
        convert::service_from_pb(&msg)
    }

    async fn delete_service(&self, cluster: &str, service_name: &str) -> DbResult<()> {
        let key = pb::ServiceKey {
            cluster: cluster.to_string(),
            service_name: service_name.to_string(),
        };
        self.call("DeleteService", key, |mut cli, req| async move {
            cli.delete_service(req).await.map(|_| ())
        })
        .await
    }

    async fn list_services(&self, cluster: &str) -> DbResult<Vec<Service>> {
        let req = pb::ListServicesRequest {
            cluster: cluster.to_string(),
        };
        let items = self
            .call("ListServices", req, |mut cli, req| async move {
                let mut stream = cli.list_services(req).await?.into_inner();
                let mut items = Vec::new();
                while let Some(item) = stream.message().await? {
                    items.push(item);
                }
                Ok(items)
            })
            .await?;
        items.iter().map(convert::service_from_pb).collect()
    }

    // ── Service attributes ─────────────────────────────────────────

    async fn create_service_attr(&self, attr: &ServiceAttr) -> DbResult<()> {
        let msg: pb::ServiceAttr = attr.clone().into();
        self.call("CreateServiceAttr", msg, |mut cli, req| async move {
            cli.create_service_attr(req).await.map(|_| ())
        })
        .await
    }

    async fn update_service_attr(&self, old: &ServiceAttr, new: &ServiceAttr) -> DbResult<()> {
        let req = pb::UpdateServiceAttrRequest {
            old_attr: Some(old.clone().into()),
            new_attr: Some(new.clone().into()),
        };
        self.call("UpdateServiceAttr", req, |mut cli, req| async move {
            cli.update_service_attr(req).await.map(|_| ())
        })
        .await
    }

    async fn get_service_attr(&self, service_uuid: &str) -> DbResult<ServiceAttr> {
        let key = pb::ServiceAttrKey {
            service_uuid: service_uuid.to_string(),
        };
        let msg = self
            .call("GetServiceAttr", key, |mut cli, req| async move {
                cli.get_service_attr(req).await.map(|r| r.into_inner())
            })
            .await?;
        convert::service_attr_from_pb(&msg)
    }

    async fn delete_service_attr(&self, service_uuid: &str) -> DbResult<()> {
        let key = pb::ServiceAttrKey {
            service_uuid: service_uuid.to_string(),
        };
        self.call("DeleteServiceAttr", key, |mut cli, req| async move {
            cli.delete_service_attr(req).await.map(|_| ())
        })
        .await
    }

    // ── Service members ────────────────────────────────────────────

    async fn create_service_member(&self, member: &ServiceMember) -> DbResult<()> {
        let msg: pb::ServiceMember = member.clone().into();
        self.call("CreateServiceMember", msg, |mut cli, req| async move {
            cli.create_service_member(req).await.map(|_| ())
        })
        .await
    }

    async fn update_service_member(
        &self,
        old: &ServiceMember,
        new: &ServiceMember,
    ) -> DbResult<()> {
        let req = pb::UpdateServiceMemberRequest {
            old_member: Some(old.clone().into()),
            new_member: Some(new.clone().into()),
        };
        self.call("UpdateServiceMember", req, |mut cli, req| async move {
            cli.update_service_member(req).await.map(|_| ())
        })
        .await
    }

    async fn get_service_member(
        &self,
        service_uuid: &str,
        member_name: &str,
    ) -> DbResult<ServiceMember> {
        let key = pb::ServiceMemberKey {
            service_uuid: service_uuid.to_string(),
            member_name: member_name.to_string(),
        };
        let msg = self
            .call("GetServiceMember", key, |mut cli, req| async move {
                cli.get_service_member(req).await.map(|r| r.into_inner())
            })
            .await?;
        convert::service_member_from_pb(&msg)
    }

    async fn delete_service_member(
        &self,
        service_uuid: &str,
        member_name: &str,
    ) -> DbResult<()> {
        let key = pb::ServiceMemberKey {
            service_uuid: service_uuid.to_string(),
            member_name: member_name.to_string(),
        };
        self.call("DeleteServiceMember", key, |mut cli, req| async move {
            cli.delete_service_member(req).await.map(|_| ())
        })
        .await
    }

    async fn list_service_members(&self, service_uuid: &str) -> DbResult<Vec<ServiceMember>> {
        let req = pb::ListServiceMembersRequest {
            service_uuid: service_uuid.to_string(),
        };
        let items = self
            .call("ListServiceMembers", req, |mut cli, req| async move {
                let mut stream = cli.list_service_members(req).await?.into_inner();
                let mut items = Vec::new();
                while let Some(item) = stream.message().await? {
                    items.push(item);
                }
                Ok(items)
            })
            .await?;
        items.iter().map(convert::service_member_from_pb).collect()
    }

    // ── Config files ───────────────────────────────────────────────

    async fn create_config_file(&self, file: &ConfigFile) -> DbResult<()> {
        let msg: pb::ConfigFile = file.clone().into();
        self.call("CreateConfigFile", msg, |mut cli, req| async move {
            cli.create_config_file(req).await.map(|_| ())
        })
        .await
    }

    async fn get_config_file(&self, service_uuid: &str, file_id: &str) -> DbResult<ConfigFile> {
        let key = pb::ConfigFileKey {
            service_uuid: service_uuid.to_string(),
            file_id: file_id.to_string(),
        };
        let msg = self
            .call("GetConfigFile", key, |mut cli, req| async move {
                cli.get_config_file(req).await.map(|r| r.into_inner())
            })
            .await?;
        convert::config_file_from_pb(&msg)
    }

    async fn delete_config_file(&self, service_uuid: &str, file_id: &str) -> DbResult<()> {
        let key = pb::ConfigFileKey {
            service_uuid: service_uuid.to_string(),
            file_id: file_id.to_string(),
        };
        self.call("DeleteConfigFile", key, |mut cli, req| async move {
            cli.delete_config_file(req).await.map(|_| ())
        })
        .await
    }

    // ── Static IPs ─────────────────────────────────────────────────

    async fn create_static_ip(&self, ip: &ServiceStaticIp) -> DbResult<()> {
        let msg: pb::StaticIp = ip.clone().into();
        self.call("CreateStaticIp", msg, |mut cli, req| async move {
            cli.create_static_ip(req).await.map(|_| ())
        })
        .await
    }

    async fn update_static_ip(
        &self,
        old: &ServiceStaticIp,
        new: &ServiceStaticIp,
    ) -> DbResult<()> {
        let req = pb::UpdateStaticIpRequest {
            old_ip: Some(old.clone().into()),
            new_ip: Some(new.clone().into()),
        };
        self.call("UpdateStaticIp", req, |mut cli, req| async move {
            cli.update_static_ip(req).await.map(|_| ())
        })
        .await
    }

    async fn get_static_ip(&self, static_ip: &str) -> DbResult<ServiceStaticIp> {
        let key = pb::StaticIpKey {
            static_ip: static_ip.to_string(),
        };
        let msg = self
            .call("GetStaticIp", key, |mut cli, req| async move {
                cli.get_static_ip(req).await.map(|r| r.into_inner())
            })
            .await?;
        convert::static_ip_from_pb(&msg)
    }

    async fn delete_static_ip(&self, static_ip: &str) -> DbResult<()> {
        let key = pb::StaticIpKey {
            static_ip: static_ip.to_string(),
        };
        self.call("DeleteStaticIp", key, |mut cli, req| async move {
            cli.delete_static_ip(req).await.map(|_| ())
        })
        .await
    }
}
