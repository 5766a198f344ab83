//! moor-core: shared domain types for the Moorage control plane.
//!
//! Everything persisted in the metadata store lives here, along with the
//! naming conventions that the rest of the workspace relies on: member
//! names (`<service>-<ordinal>`), member DNS names, request UUIDs, and
//! content-addressed config-file IDs.
//!
//! All domain types are serde-serializable; the metadata store persists
//! them as JSON values and compares them field-for-field for its
//! conditional-update semantics, so every record type derives `PartialEq`.

pub mod naming;
pub mod types;

pub use naming::*;
pub use types::*;
