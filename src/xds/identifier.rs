//! API identifiers used as keys in the deployment state store.
//!
//! A deployed API instance is keyed by `vhost:uuid`; the group of all
//! versions of one logical API at one vhost is keyed by `vhost:name`.
//! Generation and extraction must round-trip exactly; the separator never
//! appears inside a vhost (a domain name) or a UUID by construction.

use crate::errors::{Error, Result};

/// Separator between the vhost and the UUID/name component.
pub const API_KEY_FIELD_SEPARATOR: char = ':';

/// Identifier of one concrete deployed API version at one vhost.
pub fn generate_api_identifier(vhost: &str, uuid: &str) -> String {
    format!("{vhost}{API_KEY_FIELD_SEPARATOR}{uuid}")
}

/// Identifier of the version-competition range of a logical API at one
/// vhost: all versions sharing this key compete for the same floating
/// aliases.
pub fn generate_api_range_identifier(vhost: &str, api_name: &str) -> String {
    format!("{vhost}{API_KEY_FIELD_SEPARATOR}{api_name}")
}

fn split_identifier(identifier: &str) -> Result<(&str, &str)> {
    let mut parts = identifier.split(API_KEY_FIELD_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(vhost), Some(suffix), None) => Ok((vhost, suffix)),
        _ => Err(Error::identifier(identifier, API_KEY_FIELD_SEPARATOR)),
    }
}

/// Extract the vhost component of an API identifier.
pub fn extract_vhost(identifier: &str) -> Result<&str> {
    split_identifier(identifier).map(|(vhost, _)| vhost)
}

/// Extract the UUID component of an API identifier.
pub fn extract_uuid(identifier: &str) -> Result<&str> {
    split_identifier(identifier).map(|(_, uuid)| uuid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trips() {
        let id = generate_api_identifier("prod1.gw.abc.com", "api-1-uuid");
        assert_eq!(id, "prod1.gw.abc.com:api-1-uuid");
        assert_eq!(extract_vhost(&id).unwrap(), "prod1.gw.abc.com");
        assert_eq!(extract_uuid(&id).unwrap(), "api-1-uuid");
    }

    #[test]
    fn malformed_identifiers_are_errors() {
        assert!(extract_vhost("no-separator").is_err());
        assert!(extract_uuid("too:many:separators").is_err());
    }

    proptest! {
        #[test]
        fn generate_extract_round_trip(
            vhost in "[a-z0-9][a-z0-9.-]{0,40}",
            uuid in "[a-zA-Z0-9-]{1,40}",
        ) {
            let id = generate_api_identifier(&vhost, &uuid);
            prop_assert_eq!(extract_vhost(&id).unwrap(), vhost.as_str());
            prop_assert_eq!(extract_uuid(&id).unwrap(), uuid.as_str());
        }
    }
}
