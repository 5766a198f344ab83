//! moorage-metastore: the durable metadata store of the control plane.
//!
//! All persistent control-plane state (devices, services, attributes,
//! members, config files, static IPs) lives behind the [`MetaStore`]
//! trait: typed CRUD with conditional-check semantics plus list
//! operations. The trait has two implementations:
//!
//! - [`DbStore`]: redb-backed, used by the metadata server itself and by
//!   tests (in-memory backend)
//! - [`StoreClient`]: gRPC client that talks to a remote metadata server
//!   through a retry envelope with transparent reconnection
//!
//! [`StoreServer`] exposes any `MetaStore` over gRPC, so the daemon is
//! `StoreServer<DbStore>` and every other process uses `StoreClient`.
//!
//! # Conditional-check semantics
//!
//! The store's compare-and-set is the only cross-request coordination
//! primitive of the control plane:
//!
//! - creating a record that already exists with identical contents is an
//!   idempotent success; with different contents it fails with
//!   [`DbError::ConditionalCheckFailed`]
//! - updates carry the full expected old value; a mismatch fails with
//!   `ConditionalCheckFailed`

pub mod client;
pub mod convert;
pub mod db;
pub mod error;
pub mod server;
pub mod store;
pub mod tables;

/// Generated protobuf types and gRPC service stubs.
pub mod pb {
    tonic::include_proto!("moorage.metastore");
}

pub use client::StoreClient;
pub use db::DbStore;
pub use error::{DbError, DbResult};
pub use server::StoreServer;
pub use store::MetaStore;
