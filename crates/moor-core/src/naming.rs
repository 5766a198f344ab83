//! Naming conventions and generated identifiers.
//!
//! Member names are `<service>-<ordinal>` with the ordinal as an unpadded
//! decimal; the ordinal parses back out of the name, which the query layer
//! relies on to sort members. DNS names for members are
//! `<member>.<domain>` with a short TTL so failovers propagate quickly.

use thiserror::Error;

/// Separator between a service name and a member ordinal.
pub const NAME_SEPARATOR: char = '-';

/// TTL for member DNS records, in seconds.
pub const MEMBER_DNS_TTL_SECS: u64 = 5;

/// Default port of the metadata store server.
pub const METADB_SERVER_PORT: u16 = 27030;

/// UUID prefix of the bootstrap metadata service itself.
///
/// The metadata service is created before the store exists, so its UUID is
/// derived from its volume instead of minted: `controldb-<volume_id>`.
pub const CONTROLDB_UUID_PREFIX: &str = "controldb-";

/// Error parsing a member name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("malformed member name: {0}")]
    MalformedMemberName(String),
}

/// Build the member name for the given ordinal: `<service>-<ordinal>`.
pub fn gen_member_name(service_name: &str, ordinal: u64) -> String {
    format!("{service_name}{NAME_SEPARATOR}{ordinal}")
}

/// Parse the ordinal back out of a member name.
pub fn member_ordinal(member_name: &str) -> Result<u64, NameError> {
    let (_, ordinal) = member_name
        .rsplit_once(NAME_SEPARATOR)
        .ok_or_else(|| NameError::MalformedMemberName(member_name.to_string()))?;
    ordinal
        .parse()
        .map_err(|_| NameError::MalformedMemberName(member_name.to_string()))
}

/// The DNS name a member is published under.
pub fn member_fqdn(member_name: &str, domain: &str) -> String {
    format!("{member_name}.{domain}")
}

/// UUID of the bootstrap metadata service, derived from its volume ID.
pub fn gen_controldb_service_uuid(volume_id: &str) -> String {
    format!("{CONTROLDB_UUID_PREFIX}{volume_id}")
}

/// Mint a fresh request UUID for RPC correlation.
pub fn gen_request_uuid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Mint a fresh service UUID.
pub fn gen_service_uuid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Content-addressed config-file ID: the hex MD5 of the file content.
///
/// Identical content yields the same ID, so replicas sharing a config file
/// share one stored row.
pub fn gen_config_file_id(content: &str) -> String {
    format!("{:x}", md5::compute(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_name_round_trip() {
        for ordinal in [0, 1, 9, 10, 123] {
            let name = gen_member_name("pg-main", ordinal);
            assert_eq!(member_ordinal(&name), Ok(ordinal));
        }
    }

    #[test]
    fn member_name_with_dashes_in_service() {
        // The ordinal is the suffix after the last separator.
        let name = gen_member_name("service-0", 2);
        assert_eq!(name, "service-0-2");
        assert_eq!(member_ordinal(&name), Ok(2));
    }

    #[test]
    fn malformed_member_names() {
        assert!(member_ordinal("nodash").is_err());
        assert!(member_ordinal("svc-abc").is_err());
        assert!(member_ordinal("svc-").is_err());
    }

    #[test]
    fn member_fqdn_format() {
        assert_eq!(member_fqdn("pg-main-0", "example.com"), "pg-main-0.example.com");
    }

    #[test]
    fn config_file_id_is_content_addressed() {
        let a = gen_config_file_id("listen_port = 5432");
        let b = gen_config_file_id("listen_port = 5432");
        let c = gen_config_file_id("listen_port = 5433");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn controldb_uuid_prefix() {
        assert_eq!(gen_controldb_service_uuid("vol-0042"), "controldb-vol-0042");
    }

    #[test]
    fn request_uuids_are_unique() {
        assert_ne!(gen_request_uuid(), gen_request_uuid());
    }
}
