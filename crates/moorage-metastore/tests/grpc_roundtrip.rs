//! Client/server round-trip tests.
//!
//! Runs a real gRPC server over an in-memory store on an ephemeral local
//! port and drives it through `StoreClient`, covering CRUD, conditional
//! semantics across the wire, error translation, and streamed lists.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_stream::wrappers::TcpListenerStream;

use moor_core::{
    ConfigFile, Device, Service, ServiceAttr, ServiceStaticIp, ServiceStatus, ServiceVolume,
    ServiceVolumes, VolumeType,
};
use moorage_metastore::{DbError, DbStore, MetaStore, StoreClient, StoreServer};

async fn start_server() -> StoreClient {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let store = Arc::new(DbStore::open_in_memory().unwrap());
    let service = StoreServer::new(store).into_service();
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(service)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    StoreClient::new(format!("http://{addr}")).unwrap()
}

fn device(cluster: &str, name: &str, service: &str) -> Device {
    Device {
        cluster: cluster.to_string(),
        device_name: name.to_string(),
        service_name: service.to_string(),
    }
}

fn attr(uuid: &str) -> ServiceAttr {
    ServiceAttr {
        service_uuid: uuid.to_string(),
        status: ServiceStatus::Creating,
        cluster: "c1".to_string(),
        service_name: "svc-0".to_string(),
        replicas: 3,
        volumes: ServiceVolumes {
            primary_device_name: "/dev/loop1".to_string(),
            primary_volume: ServiceVolume {
                volume_type: VolumeType::GeneralPurpose,
                size_gb: 1,
                iops: 0,
            },
            journal: None,
        },
        register_dns: true,
        domain: "example.com".to_string(),
        hosted_zone_id: "zone-1".to_string(),
        require_static_ip: false,
        tags: BTreeMap::new(),
    }
}

#[tokio::test]
async fn device_crud_over_the_wire() {
    let client = start_server().await;
    let dev = device("c1", "/dev/loop1", "svc-a");

    client.create_device(&dev).await.unwrap();
    assert_eq!(client.get_device("c1", "/dev/loop1").await.unwrap(), dev);

    // Identical re-create is an idempotent success.
    client.create_device(&dev).await.unwrap();

    // Differing create fails the conditional check, translated across the
    // wire without retry.
    let err = client
        .create_device(&device("c1", "/dev/loop1", "svc-b"))
        .await
        .unwrap_err();
    assert_eq!(err, DbError::ConditionalCheckFailed);

    client.delete_device("c1", "/dev/loop1").await.unwrap();
    assert_eq!(
        client.get_device("c1", "/dev/loop1").await.unwrap_err(),
        DbError::RecordNotFound
    );
}

#[tokio::test]
async fn attr_conditional_update_over_the_wire() {
    let client = start_server().await;
    let creating = attr("uuid-1");
    client.create_service_attr(&creating).await.unwrap();

    let mut active = creating.clone();
    active.status = ServiceStatus::Active;
    client.update_service_attr(&creating, &active).await.unwrap();

    let stored = client.get_service_attr("uuid-1").await.unwrap();
    assert_eq!(stored.status, ServiceStatus::Active);

    // Updating from the stale old value loses the compare.
    let mut deleting = creating.clone();
    deleting.status = ServiceStatus::Deleting;
    assert_eq!(
        client
            .update_service_attr(&creating, &deleting)
            .await
            .unwrap_err(),
        DbError::ConditionalCheckFailed
    );

    assert_eq!(
        client.get_service_attr("missing").await.unwrap_err(),
        DbError::RecordNotFound
    );
}

#[tokio::test]
async fn streamed_lists_drain_to_completion() {
    let client = start_server().await;

    for i in 0..3 {
        let svc = Service {
            cluster: "c1".to_string(),
            service_name: format!("svc-{i}"),
            service_uuid: format!("uuid-{i}"),
        };
        client.create_service(&svc).await.unwrap();
    }
    client
        .create_service(&Service {
            cluster: "c2".to_string(),
            service_name: "other".to_string(),
            service_uuid: "uuid-x".to_string(),
        })
        .await
        .unwrap();

    let services = client.list_services("c1").await.unwrap();
    assert_eq!(services.len(), 3);
    // Key-ordered.
    assert_eq!(services[0].service_name, "svc-0");
    assert_eq!(services[2].service_name, "svc-2");

    assert!(client.list_services("c9").await.unwrap().is_empty());

    for i in 0..4 {
        client
            .create_device(&device("c1", &format!("/dev/loop{}", i + 1), &format!("svc-{i}")))
            .await
            .unwrap();
    }
    assert_eq!(client.list_devices("c1").await.unwrap().len(), 4);
}

#[tokio::test]
async fn config_file_and_static_ip_round_trip() {
    let client = start_server().await;

    let file = ConfigFile {
        service_uuid: "uuid-1".to_string(),
        file_id: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
        file_name: "svc.conf".to_string(),
        content: "listen_port = 5432".to_string(),
    };
    client.create_config_file(&file).await.unwrap();
    assert_eq!(
        client
            .get_config_file("uuid-1", &file.file_id)
            .await
            .unwrap(),
        file
    );

    let unassigned = ServiceStaticIp {
        static_ip: "10.0.0.4".to_string(),
        service_uuid: "uuid-1".to_string(),
        member_name: None,
        zone: "az-west".to_string(),
    };
    client.create_static_ip(&unassigned).await.unwrap();

    // Bind the address to a member via conditional update.
    let bound = ServiceStaticIp {
        member_name: Some("svc-0-0".to_string()),
        ..unassigned.clone()
    };
    client.update_static_ip(&unassigned, &bound).await.unwrap();
    assert_eq!(client.get_static_ip("10.0.0.4").await.unwrap(), bound);

    // Rebinding from the unassigned old value now fails.
    assert_eq!(
        client
            .update_static_ip(&unassigned, &bound)
            .await
            .unwrap_err(),
        DbError::ConditionalCheckFailed
    );

    client.delete_static_ip("10.0.0.4").await.unwrap();
    client.delete_config_file("uuid-1", &file.file_id).await.unwrap();
    assert_eq!(
        client.get_static_ip("10.0.0.4").await.unwrap_err(),
        DbError::RecordNotFound
    );
}
