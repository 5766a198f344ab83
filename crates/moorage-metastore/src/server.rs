//! gRPC server exposing a [`MetaStore`] implementation.
//!
//! Application errors cross the wire as status code `Unknown` with the
//! stable description strings from [`crate::error`]; clients translate
//! them back and treat every other status as a transport fault. List RPCs
//! stream the fully-materialised result set.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::debug;

use crate::client::REQUEST_ID_HEADER;
use crate::convert;
use crate::error::DbError;
use crate::pb;
use crate::store::MetaStore;

fn to_status(err: DbError) -> Status {
    Status::unknown(err.wire_message())
}

/// The caller's request UUID, for log correlation.
fn request_id<T>(req: &Request<T>) -> String {
    req.metadata()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string()
}

/// Stream a materialised list back to the caller.
fn stream_items<T: Send + 'static>(items: Vec<T>) -> ReceiverStream<Result<T, Status>> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        for item in items {
            if tx.send(Ok(item)).await.is_err() {
                break;
            }
        }
    });
    ReceiverStream::new(rx)
}

/// gRPC implementation of the metadata service over any [`MetaStore`].
pub struct StoreServer<S> {
    store: Arc<S>,
}

impl<S: MetaStore + 'static> StoreServer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The tonic service for mounting on a gRPC server.
    pub fn into_service(self) -> pb::meta_db_server::MetaDbServer<Self> {
        pb::meta_db_server::MetaDbServer::new(self)
    }
}

#[tonic::async_trait]
impl<S: MetaStore + 'static> pb::meta_db_server::MetaDb for StoreServer<S> {
    // ── Devices ────────────────────────────────────────────────────

    async fn create_device(
        &self,
        request: Request<pb::Device>,
    ) -> Result<Response<pb::Device>, Status> {
        let requuid = request_id(&request);
        let msg = request.into_inner();
        let dev = convert::device_from_pb(&msg).map_err(to_status)?;
        self.store.create_device(&dev).await.map_err(to_status)?;
        debug!(%requuid, cluster = %dev.cluster, device = %dev.device_name, "created device");
        Ok(Response::new(msg))
    }

    async fn get_device(
        &self,
        request: Request<pb::DeviceKey>,
    ) -> Result<Response<pb::Device>, Status> {
        let key = request.into_inner();
        let dev = self
            .store
            .get_device(&key.cluster, &key.device_name)
            .await
            .map_err(to_status)?;
        Ok(Response::new(dev.into()))
    }

    async fn delete_device(
        &self,
        request: Request<pb::DeviceKey>,
    ) -> Result<Response<pb::Device>, Status> {
        let requuid = request_id(&request);
        let key = request.into_inner();
        let dev = self
            .store
            .get_device(&key.cluster, &key.device_name)
            .await
            .map_err(to_status)?;
        self.store
            .delete_device(&key.cluster, &key.device_name)
            .await
            .map_err(to_status)?;
        debug!(%requuid, cluster = %key.cluster, device = %key.device_name, "deleted device");
        Ok(Response::new(dev.into()))
    }

    type ListDevicesStream = ReceiverStream<Result<pb::Device, Status>>;

    async fn list_devices(
        &self,
        request: Request<pb::ListDevicesRequest>,
    ) -> Result<Response<Self::ListDevicesStream>, Status> {
        let requuid = request_id(&request);
        let req = request.into_inner();
        let devices = self.store.list_devices(&req.cluster).await.map_err(to_status)?;
        debug!(%requuid, cluster = %req.cluster, count = devices.len(), "streaming devices");
        let items = devices.into_iter().map(pb::Device::from).collect();
        Ok(Response::new(stream_items(items)))
    }

    // ── Services ───────────────────────────────────────────────────

    async fn create_service(
        &self,
        request: Request<pb::Service>,
    ) -> Result<Response<pb::Service>, Status> {
        let requuid = request_id(&request);
        let msg = request.into_inner();
        let svc = convert::service_from_pb(&msg).map_err(to_status)?;
        self.store.create_service(&svc).await.map_err(to_status)?;
        debug!(%requuid, cluster = %svc.cluster, service = %svc.service_name, "created service");
        Ok(Response::new(msg))
    }

    async fn get_service(
        &self,
        request: Request<pb::ServiceKey>,
    ) -> Result<Response<pb::Service>, Status> {
        let key = request.into_inner();
        let svc = self
            .store
            .get_service(&key.cluster, &key.service_name)
            .await
            .map_err(to_status)?;
        Ok(Response::new(svc.into()))
    }

    async fn delete_service(
        &self,
        request: Request<pb::ServiceKey>,
    ) -> Result<Response<pb::Service>, Status> {
        let requuid = request_id(&request);
        let key = request.into_inner();
        let svc = self
            .store
            .get_service(&key.cluster, &key.service_name)
            .await
            .map_err(to_status)?;
        self.store
            .delete_service(&key.cluster, &key.service_name)
            .await
            .map_err(to_status)?;
        debug!(%requuid, cluster = %key.cluster, service = %key.service_name, "deleted service");
        Ok(Response::new(svc.into()))
    }

    type ListServicesStream = ReceiverStream<Result<pb::Service, Status>>;

    async fn list_services(
        &self,
        request: Request<pb::ListServicesRequest>,
    ) -> Result<Response<Self::ListServicesStream>, Status> {
        let requuid = request_id(&request);
        let req = request.into_inner();
        let services = self.store.list_services(&req.cluster).await.map_err(to_status)?;
        debug!(%requuid, cluster = %req.cluster, count = services.len(), "streaming services");
        let items = services.into_iter().map(pb::Service::from).collect();
        Ok(Response::new(stream_items(items)))
    }

    // ── Service attributes ─────────────────────────────────────────

    async fn create_service_attr(
        &self,
        request: Request<pb::ServiceAttr>,
    ) -> Result<Response<pb::ServiceAttr>, Status> {
        let requuid = request_id(&request);
        let msg = request.into_inner();
        let attr = convert::service_attr_from_pb(&msg).map_err(to_status)?;
        self.store.create_service_attr(&attr).await.map_err(to_status)?;
        debug!(%requuid, service_uuid = %attr.service_uuid, "created service attr");
        Ok(Response::new(msg))
    }

    async fn update_service_attr(
        &self,
        request: Request<pb::UpdateServiceAttrRequest>,
    ) -> Result<Response<pb::ServiceAttr>, Status> {
        let requuid = request_id(&request);
        let req = request.into_inner();
        let old_msg = req.old_attr.ok_or_else(|| to_status(DbError::InvalidRequest))?;
        let new_msg = req.new_attr.ok_or_else(|| to_status(DbError::InvalidRequest))?;
        let old = convert::service_attr_from_pb(&old_msg).map_err(to_status)?;
        let new = convert::service_attr_from_pb(&new_msg).map_err(to_status)?;
        self.store.update_service_attr(&old, &new).await.map_err(to_status)?;
        debug!(%requuid, service_uuid = %new.service_uuid, status = %new.status, "updated service attr");
        Ok(Response::new(new_msg))
    }

    async fn get_service_attr(
        &self,
        request: Request<pb::ServiceAttrKey>,
    ) -> Result<Response<pb::ServiceAttr>, Status> {
        let key = request.into_inner();
        let attr = self
            .store
            .get_service_attr(&key.service_uuid)
            .await
            .map_err(to_status)?;
        Ok(Response::new(attr.into()))
    }

    async fn delete_service_attr(
        &self,
        request: Request<pb::ServiceAttrKey>,
    ) -> Result<Response<pb::ServiceAttr>, Status> {
        let requuid = request_id(&request);
        let key = request.into_inner();
        let attr = self
            .store
            .get_service_attr(&key.service_uuid)
            .await
            .map_err(to_status)?;
        self.store
            .delete_service_attr(&key.service_uuid)
            .await
            .map_err(to_status)?;
        debug!(%requuid, service_uuid = %key.service_uuid, "deleted service attr");
        Ok(Response::new(attr.into()))
    }

    // ── Service members ────────────────────────────────────────────

    async fn create_service_member(
        &self,
        request: Request<pb::ServiceMember>,
    ) -> Result<Response<pb::ServiceMember>, Status> {
        let requuid = request_id(&request);
        let msg = request.into_inner();
        let member = convert::service_member_from_pb(&msg).map_err(to_status)?;
        self.store.create_service_member(&member).await.map_err(to_status)?;
        debug!(%requuid, member = %member.member_name, "created service member");
        Ok(Response::new(msg))
    }

    async fn update_service_member(
        &self,
        request: Request<pb::UpdateServiceMemberRequest>,
    ) -> Result<Response<pb::ServiceMember>, Status> {
        let requuid = request_id(&request);
        let req = request.into_inner();
        let old_msg = req.old_member.ok_or_else(|| to_status(DbError::InvalidRequest))?;
        let new_msg = req.new_member.ok_or_else(|| to_status(DbError::InvalidRequest))?;
        let old = convert::service_member_from_pb(&old_msg).map_err(to_status)?;
        let new = convert::service_member_from_pb(&new_msg).map_err(to_status)?;
        self.store.update_service_member(&old, &new).await.map_err(to_status)?;
        debug!(%requuid, member = %new.member_name, "updated service member");
        Ok(Response::new(new_msg))
    }

    async fn get_service_member(
        &self,
        request: Request<pb::ServiceMemberKey>,
    ) -> Result<Response<pb::ServiceMember>, Status> {
        let key = request.into_inner();
        let member = self
            .store
            .get_service_member(&key.service_uuid, &key.member_name)
            .await
            .map_err(to_status)?;
        Ok(Response::new(member.into()))
    }

    async fn delete_service_member(
        &self,
        request: Request<pb::ServiceMemberKey>,
    ) -> Result<Response<pb::ServiceMember>, Status> {
        let requuid = request_id(&request);
        let key = request.into_inner();
        let member = self
            .store
            .get_service_member(&key.service_uuid, &key.member_name)
            .await
            .map_err(to_status)?;
        self.store
            .delete_service_member(&key.service_uuid, &key.member_name)
            .await
            .map_err(to_status)?;
        debug!(%requuid, member = %key.member_name, "deleted service member");
        Ok(Response::new(member.into()))
    }

    type ListServiceMembersStream = ReceiverStream<Result<pb::ServiceMember, Status>>;

    async fn list_service_members(
        &self,
        request: Request<pb::ListServiceMembersRequest>,
    ) -> Result<Response<Self::ListServiceMembersStream>, Status> {
        let requuid = request_id(&request);
        let req = request.into_inner();
        let members = self
            .store
            .list_service_members(&req.service_uuid)
            .await
            .map_err(to_status)?;
        debug!(%requuid, service_uuid = %req.service_uuid, count = members.len(), "streaming members");
        let items = members.into_iter().map(pb::ServiceMember::from).collect();
        Ok(Response::new(stream_items(items)))
    }

    // ── Config files ───────────────────────────────────────────────

    async fn create_config_file(
        &self,
        request: Request<pb::ConfigFile>,
    ) -> Result<Response<pb::ConfigFile>, Status> {
        let requuid = request_id(&request);
        let msg = request.into_inner();
        let file = convert::config_file_from_pb(&msg).map_err(to_status)?;
        self.store.create_config_file(&file).await.map_err(to_status)?;
        debug!(%requuid, file_id = %file.file_id, "created config file");
        Ok(Response::new(msg))
    }

    async fn get_config_file(
        &self,
        request: Request<pb::ConfigFileKey>,
    ) -> Result<Response<pb::ConfigFile>, Status> {
        let key = request.into_inner();
        let file = self
            .store
            .get_config_file(&key.service_uuid, &key.file_id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(file.into()))
    }

    async fn delete_config_file(
        &self,
        request: Request<pb::ConfigFileKey>,
    ) -> Result<Response<pb::ConfigFile>, Status> {
        let requuid = request_id(&request);
        let key = request.into_inner();
        let file = self
            .store
            .get_config_file(&key.service_uuid, &key.file_id)
            .await
            .map_err(to_status)?;
        self.store
            .delete_config_file(&key.service_uuid, &key.file_id)
            .await
            .map_err(to_status)?;
        debug!(%requuid, file_id = %key.file_id, "deleted config file");
        Ok(Response::new(file.into()))
    }

    // ── Static IPs ─────────────────────────────────────────────────

    async fn create_static_ip(
        &self,
        request: Request<pb::StaticIp>,
    ) -> Result<Response<pb::StaticIp>, Status> {
        let requuid = request_id(&request);
        let msg = request.into_inner();
        let ip = convert::static_ip_from_pb(&msg).map_err(to_status)?;
        self.store.create_static_ip(&ip).await.map_err(to_status)?;
        debug!(%requuid, static_ip = %ip.static_ip, "created static ip");
        Ok(Response::new(msg))
    }

    async fn update_static_ip(
        &self,
        request: Request<pb::UpdateStaticIpRequest>,
    ) -> Result<Response<pb::StaticIp>, Status> {
        let requuid = request_id(&request);
        let req = request.into_inner();
        let old_msg = req.old_ip.ok_or_else(|| to_status(DbError::InvalidRequest))?;
        let new_msg = req.new_ip.ok_or_else(|| to_status(DbError::InvalidRequest))?;
        let old = convert::static_ip_from_pb(&old_msg).map_err(to_status)?;
        let new = convert::static_ip_from_pb(&new_msg).map_err(to_status)?;
        self.store.update_static_ip(&old, &new).await.map_err(to_status)?;
        debug!(%requuid, static_ip = %new.static_ip, "updated static ip");
        Ok(Response::new(new_msg))
    }

    async fn get_static_ip(
        &self,
        request: Request<pb::StaticIpKey>,
    ) -> Result<Response<pb::StaticIp>, Status> {
        let key = request.into_inner();
        let ip = self.store.get_static_ip(&key.static_ip).await.map_err(to_status)?;
        Ok(Response::new(ip.into()))
    }

    async fn delete_static_ip(
        &self,
        request: Request<pb::StaticIpKey>,
    ) -> Result<Response<pb::StaticIp>, Status> {
        let requuid = request_id(&request);
        let key = request.into_inner();
        let ip = self.store.get_static_ip(&key.static_ip).await.map_err(to_status)?;
        self.store
            .delete_static_ip(&key.static_ip)
            .await
            .map_err(to_status)?;
        debug!(%requuid, static_ip = %key.static_ip, "deleted static ip");
        Ok(Response::new(ip.into()))
    }
}
