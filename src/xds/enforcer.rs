//! Configuration channel for the policy-enforcement sidecar.
//!
//! A family of label-keyed snapshot caches parallel to the proxy cache:
//! main runtime config, deployed-API descriptors, JWT issuers,
//! application/subscription policies, key managers, revoked tokens and
//! throttle data. The API descriptor cache is keyed per gateway label;
//! everything else targets the single fixed enforcer label. All of them
//! publish through the same mutex-guarded snapshot publisher.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::error;

use crate::domain::{
    ApplicationPolicy, EnforcerApi, EnforcerConfig, JwtIssuer, KeyManager, RevokedToken,
    SubscriptionPolicy,
};
use crate::domain::ThrottleConfig;
use crate::xds::identifier::generate_api_identifier;
use crate::xds::snapshot::{json_resource, NamedResource, ResourceKind, SnapshotCache};

/// The single enforcer instance label all sidecar caches publish under.
pub const ENFORCER_LABEL: &str = "enforcer";

/// Snapshot caches consumed by the policy-enforcement sidecar.
#[derive(Debug)]
pub struct EnforcerCaches {
    config: SnapshotCache,
    apis: SnapshotCache,
    jwt_issuers: SnapshotCache,
    application_policies: SnapshotCache,
    subscription_policies: SnapshotCache,
    key_managers: SnapshotCache,
    revoked_tokens: SnapshotCache,
    throttle_data: SnapshotCache,
}

impl Default for EnforcerCaches {
    fn default() -> Self {
        Self::new()
    }
}

impl EnforcerCaches {
    pub fn new() -> Self {
        Self {
            config: SnapshotCache::new("enforcer-config"),
            apis: SnapshotCache::new("enforcer-apis"),
            jwt_issuers: SnapshotCache::new("enforcer-jwt-issuers"),
            application_policies: SnapshotCache::new("enforcer-application-policies"),
            subscription_policies: SnapshotCache::new("enforcer-subscription-policies"),
            key_managers: SnapshotCache::new("enforcer-key-managers"),
            revoked_tokens: SnapshotCache::new("enforcer-revoked-tokens"),
            throttle_data: SnapshotCache::new("enforcer-throttle-data"),
        }
    }

    pub fn config(&self) -> &SnapshotCache {
        &self.config
    }

    pub fn apis(&self) -> &SnapshotCache {
        &self.apis
    }

    pub fn jwt_issuers(&self) -> &SnapshotCache {
        &self.jwt_issuers
    }

    pub fn application_policies(&self) -> &SnapshotCache {
        &self.application_policies
    }

    pub fn subscription_policies(&self) -> &SnapshotCache {
        &self.subscription_policies
    }

    pub fn key_managers(&self) -> &SnapshotCache {
        &self.key_managers
    }

    pub fn revoked_tokens(&self) -> &SnapshotCache {
        &self.revoked_tokens
    }

    pub fn throttle_data(&self) -> &SnapshotCache {
        &self.throttle_data
    }

    /// Publish the enforcer runtime configuration.
    pub fn update_config(&self, config: &EnforcerConfig) -> bool {
        publish_set(
            &self.config,
            ENFORCER_LABEL,
            ResourceKind::EnforcerConfig,
            [("config".to_string(), config)],
        )
    }

    /// Publish the API descriptor list for one gateway label.
    pub fn update_apis(&self, label: &str, apis: &[EnforcerApi]) -> bool {
        publish_set(
            &self.apis,
            label,
            ResourceKind::EnforcerApi,
            apis.iter().map(|api| (generate_api_identifier(&api.vhost, &api.uuid), api)),
        )
    }

    pub fn update_jwt_issuers(&self, issuers: &[JwtIssuer]) -> bool {
        publish_set(
            &self.jwt_issuers,
            ENFORCER_LABEL,
            ResourceKind::EnforcerJwtIssuer,
            issuers.iter().map(|issuer| (issuer.name.clone(), issuer)),
        )
    }

    pub fn update_application_policies(&self, policies: &[ApplicationPolicy]) -> bool {
        publish_set(
            &self.application_policies,
            ENFORCER_LABEL,
            ResourceKind::EnforcerApplicationPolicy,
            policies.iter().map(|policy| (policy.name.clone(), policy)),
        )
    }

    pub fn update_subscription_policies(&self, policies: &[SubscriptionPolicy]) -> bool {
        publish_set(
            &self.subscription_policies,
            ENFORCER_LABEL,
            ResourceKind::EnforcerSubscriptionPolicy,
            policies.iter().map(|policy| (policy.name.clone(), policy)),
        )
    }

    pub fn update_key_managers(&self, key_managers: &[KeyManager]) -> bool {
        publish_set(
            &self.key_managers,
            ENFORCER_LABEL,
            ResourceKind::EnforcerKeyManager,
            key_managers.iter().map(|manager| (manager.name.clone(), manager)),
        )
    }

    pub fn update_revoked_tokens(&self, tokens: &[RevokedToken]) -> bool {
        publish_set(
            &self.revoked_tokens,
            ENFORCER_LABEL,
            ResourceKind::EnforcerRevokedToken,
            tokens.iter().map(|token| (token.jti.clone(), token)),
        )
    }

    pub fn update_throttle_data(&self, throttle: &ThrottleConfig) -> bool {
        publish_set(
            &self.throttle_data,
            ENFORCER_LABEL,
            ResourceKind::EnforcerThrottleData,
            [("throttle-data".to_string(), throttle)],
        )
    }
}

fn publish_set<'a, T: Serialize + 'a>(
    cache: &SnapshotCache,
    label: &str,
    kind: ResourceKind,
    items: impl IntoIterator<Item = (String, &'a T)>,
) -> bool {
    let mut resources: Vec<NamedResource> = Vec::new();
    for (name, item) in items {
        match json_resource(&name, kind.type_url(), item) {
            Ok(resource) => resources.push(resource),
            Err(e) => {
                error!(label = %label, error = %e, "Failed to encode enforcer resource");
                return false;
            }
        }
    }
    let mut bundle = BTreeMap::new();
    bundle.insert(kind, resources);
    cache.publish(label, bundle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_publishes_under_fixed_label() {
        let caches = EnforcerCaches::new();
        assert!(caches.update_config(&EnforcerConfig::default()));
        let snapshot = caches.config().snapshot(ENFORCER_LABEL).expect("snapshot");
        assert_eq!(snapshot.resources_of(ResourceKind::EnforcerConfig).len(), 1);
    }

    #[test]
    fn api_descriptors_publish_per_gateway_label() {
        let caches = EnforcerCaches::new();
        let api = EnforcerApi {
            uuid: "api-1-uuid".to_string(),
            name: "Test API".to_string(),
            version: "v1.0".to_string(),
            organization_id: "org1".to_string(),
            vhost: "gw.com".to_string(),
            base_path: "/test-api/v1.0".to_string(),
            environment_type: "prod".to_string(),
            is_default_version: false,
        };
        assert!(caches.update_apis("default", std::slice::from_ref(&api)));
        let snapshot = caches.apis().snapshot("default").expect("snapshot");
        let resources = snapshot.resources_of(ResourceKind::EnforcerApi);
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].name, "gw.com:api-1-uuid");
    }

    #[test]
    fn revoked_tokens_replace_previous_set() {
        let caches = EnforcerCaches::new();
        let first = RevokedToken { jti: "token-1".to_string(), expiry_time: 100 };
        let second = RevokedToken { jti: "token-2".to_string(), expiry_time: 200 };
        assert!(caches.update_revoked_tokens(std::slice::from_ref(&first)));
        assert!(caches.update_revoked_tokens(std::slice::from_ref(&second)));
        let snapshot = caches.revoked_tokens().snapshot(ENFORCER_LABEL).expect("snapshot");
        let resources = snapshot.resources_of(ResourceKind::EnforcerRevokedToken);
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].name, "token-2");
    }
}
