//! Rate-limit descriptor cache for the external rate-limiting service.
//!
//! Kept separately from route data: a per-organization/vhost/API tree of
//! descriptors built from the declarative policies, plus an
//! organization-keyed custom-policy map. `generate_config` flattens both
//! into the single descriptor tree one gateway label ships to the rate
//! limiter.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::domain::{CustomRateLimitPolicy, DeployedApiSpec, RateLimitPolicySpec};

pub const DESCRIPTOR_KEY_ORG: &str = "org";
pub const DESCRIPTOR_KEY_VHOST: &str = "vhost";
pub const DESCRIPTOR_KEY_PATH: &str = "path";
pub const DESCRIPTOR_KEY_METHOD: &str = "method";
/// Synthetic method value carrying an API-level policy.
pub const DESCRIPTOR_VALUE_ALL_METHODS: &str = "ALL";

/// Time unit of a rate-limit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RateLimitUnit {
    Second,
    Minute,
    Hour,
    Day,
    Unknown,
}

impl RateLimitUnit {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "SECOND" => Self::Second,
            "MINUTE" => Self::Minute,
            "HOUR" => Self::Hour,
            "DAY" => Self::Day,
            other => {
                error!(unit = %other, "Unknown rate limit unit");
                Self::Unknown
            }
        }
    }
}

/// Resolved rate limit: requests per unit of time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RateLimit {
    pub unit: RateLimitUnit,
    pub requests_per_unit: u32,
}

impl From<&RateLimitPolicySpec> for RateLimit {
    fn from(spec: &RateLimitPolicySpec) -> Self {
        Self { unit: RateLimitUnit::from_name(&spec.unit), requests_per_unit: spec.requests_per_unit }
    }
}

/// One node of the descriptor tree the rate limiter consumes.
///
/// A leaf carries a policy; a group carries children. The distinction is a
/// compile-time invariant rather than a pair of optional fields.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateLimitDescriptor {
    Leaf { key: String, value: String, rate_limit: RateLimit },
    Group { key: String, value: String, descriptors: Vec<RateLimitDescriptor> },
}

impl RateLimitDescriptor {
    pub fn key(&self) -> &str {
        match self {
            Self::Leaf { key, .. } | Self::Group { key, .. } => key,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Leaf { value, .. } | Self::Group { value, .. } => value,
        }
    }

    pub fn children(&self) -> &[RateLimitDescriptor] {
        match self {
            Self::Leaf { .. } => &[],
            Self::Group { descriptors, .. } => descriptors,
        }
    }
}

/// The complete descriptor tree shipped to the rate limiter for one label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfigTree {
    pub name: String,
    pub domain: String,
    pub descriptors: Vec<RateLimitDescriptor>,
}

#[derive(Debug, Default)]
struct RateLimitPolicies {
    /// org -> vhost -> API identifier (`vhost:uuid`) -> descriptors
    api_level: HashMap<String, HashMap<String, HashMap<String, Vec<RateLimitDescriptor>>>>,
    /// org -> `key_value` -> descriptor. Replaced wholesale, never merged.
    custom: HashMap<String, BTreeMap<String, RateLimitDescriptor>>,
}

/// Cache of rate-limit descriptor trees, flattened per gateway label on
/// demand.
#[derive(Debug)]
pub struct RateLimitPolicyCache {
    domain: String,
    inner: RwLock<RateLimitPolicies>,
}

impl RateLimitPolicyCache {
    pub fn new(domain: String) -> Self {
        Self { domain, inner: RwLock::new(RateLimitPolicies::default()) }
    }

    /// Build and store the descriptor tree for an API's inline policies,
    /// one entry per vhost. APIs without any policy leave no entry.
    pub fn add_api_level_policies(
        &self,
        vhosts: &[String],
        api_identifiers: &[String],
        spec: &DeployedApiSpec,
    ) {
        let mut descriptors: Vec<RateLimitDescriptor> = Vec::new();

        // path -> methods already seen, to drop duplicate method entries.
        let mut seen_methods: HashMap<String, HashSet<String>> = HashMap::new();
        for operation in &spec.operations {
            let path = format!("{}{}", spec.base_path, operation.path);
            let seen = seen_methods.entry(path.clone()).or_default();
            let mut method_descriptors = Vec::new();
            for method in &operation.methods {
                if !seen.insert(method.method.clone()) {
                    // Unreachable with a valid API definition.
                    warn!(
                        path = %path,
                        method = %method.method,
                        "Duplicate operation method, skipping its rate limit policy"
                    );
                    continue;
                }
                if let Some(policy) = &method.rate_limit {
                    method_descriptors.push(RateLimitDescriptor::Leaf {
                        key: DESCRIPTOR_KEY_METHOD.to_string(),
                        value: method.method.clone(),
                        rate_limit: policy.into(),
                    });
                }
            }
            if !method_descriptors.is_empty() {
                descriptors.push(RateLimitDescriptor::Group {
                    key: DESCRIPTOR_KEY_PATH.to_string(),
                    value: path,
                    descriptors: method_descriptors,
                });
            }
        }

        if let Some(policy) = &spec.rate_limit {
            descriptors.push(RateLimitDescriptor::Group {
                key: DESCRIPTOR_KEY_PATH.to_string(),
                value: spec.base_path.clone(),
                descriptors: vec![RateLimitDescriptor::Leaf {
                    key: DESCRIPTOR_KEY_METHOD.to_string(),
                    value: DESCRIPTOR_VALUE_ALL_METHODS.to_string(),
                    rate_limit: policy.into(),
                }],
            });
        }

        if descriptors.is_empty() {
            return;
        }

        let mut policies = self.inner.write().expect("rate limit cache lock poisoned");
        let org_policies = policies.api_level.entry(spec.organization_id.clone()).or_default();
        for (vhost, api_identifier) in vhosts.iter().zip(api_identifiers) {
            org_policies
                .entry(vhost.clone())
                .or_default()
                .insert(api_identifier.clone(), descriptors.clone());
        }
    }

    /// Remove the entry for one API at one vhost. No-op for unknown keys.
    pub fn delete_api_level_policies(&self, org: &str, vhost: &str, api_identifier: &str) {
        let mut policies = self.inner.write().expect("rate limit cache lock poisoned");
        if let Some(org_policies) = policies.api_level.get_mut(org) {
            if let Some(vhost_policies) = org_policies.get_mut(vhost) {
                vhost_policies.remove(api_identifier);
                if vhost_policies.is_empty() {
                    org_policies.remove(vhost);
                }
            }
            if org_policies.is_empty() {
                policies.api_level.remove(org);
            }
        }
    }

    /// Replace the entire custom-policy map. This is not a merge: policies
    /// absent from `custom_policies` disappear.
    pub fn set_custom_policies(&self, custom_policies: &[CustomRateLimitPolicy]) {
        let mut replacement: HashMap<String, BTreeMap<String, RateLimitDescriptor>> =
            HashMap::new();
        for policy in custom_policies {
            replacement
                .entry(policy.organization_id.clone())
                .or_default()
                .insert(
                    format!("{}_{}", policy.key, policy.value),
                    RateLimitDescriptor::Leaf {
                        key: policy.key.clone(),
                        value: policy.value.clone(),
                        rate_limit: (&policy.policy).into(),
                    },
                );
        }
        let mut policies = self.inner.write().expect("rate limit cache lock poisoned");
        policies.custom = replacement;
    }

    /// Flatten everything deployed to one gateway label into a descriptor
    /// tree.
    ///
    /// `is_deployed` resolves whether an API identifier of an organization is
    /// currently assigned to the label; the deployment store provides it.
    /// Sibling order within a node is not guaranteed stable across calls.
    pub fn generate_config(
        &self,
        is_deployed: impl Fn(&str, &str) -> bool,
    ) -> RateLimitConfigTree {
        let policies = self.inner.read().expect("rate limit cache lock poisoned");

        let mut org_descriptors: Vec<RateLimitDescriptor> = Vec::new();
        for (org, vhosts) in &policies.api_level {
            let mut vhost_descriptors = Vec::new();
            for (vhost, apis) in vhosts {
                let mut api_descriptors = Vec::new();
                for (api_identifier, descriptors) in apis {
                    if is_deployed(org, api_identifier) {
                        api_descriptors.extend(descriptors.iter().cloned());
                    }
                }
                if !api_descriptors.is_empty() {
                    vhost_descriptors.push(RateLimitDescriptor::Group {
                        key: DESCRIPTOR_KEY_VHOST.to_string(),
                        value: vhost.clone(),
                        descriptors: api_descriptors,
                    });
                }
            }
            if !vhost_descriptors.is_empty() {
                org_descriptors.push(RateLimitDescriptor::Group {
                    key: DESCRIPTOR_KEY_ORG.to_string(),
                    value: org.clone(),
                    descriptors: vhost_descriptors,
                });
            }
        }

        for (org, custom) in &policies.custom {
            org_descriptors.push(RateLimitDescriptor::Group {
                key: DESCRIPTOR_KEY_ORG.to_string(),
                value: org.clone(),
                descriptors: custom.values().cloned().collect(),
            });
        }

        RateLimitConfigTree {
            name: self.domain.clone(),
            domain: self.domain.clone(),
            descriptors: org_descriptors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ApiOperation, BackendEndpoint, MethodPolicy};

    fn policy(count: u32) -> RateLimitPolicySpec {
        RateLimitPolicySpec { unit: "MINUTE".to_string(), requests_per_unit: count }
    }

    fn spec_with_policies(uuid: &str, base_path: &str) -> DeployedApiSpec {
        DeployedApiSpec {
            uuid: uuid.to_string(),
            name: "Test API".to_string(),
            version: "v1.0".to_string(),
            organization_id: "org1".to_string(),
            base_path: base_path.to_string(),
            environment_type: "prod".to_string(),
            is_default_version: false,
            backends: vec![BackendEndpoint { host: "backend".to_string(), port: 80 }],
            operations: vec![ApiOperation {
                path: "/orders".to_string(),
                methods: vec![
                    MethodPolicy { method: "GET".to_string(), rate_limit: Some(policy(10)) },
                    MethodPolicy { method: "POST".to_string(), rate_limit: None },
                ],
            }],
            rate_limit: Some(policy(100)),
        }
    }

    fn sorted_children(node: &RateLimitDescriptor) -> Vec<RateLimitDescriptor> {
        let mut children = node.children().to_vec();
        children.sort();
        children
    }

    #[test]
    fn flatten_groups_apis_under_vhost_and_org() {
        let cache = RateLimitPolicyCache::new("Default".to_string());
        let vhosts = vec!["gw.com".to_string()];
        cache.add_api_level_policies(
            &vhosts,
            &["gw.com:uuid-1".to_string()],
            &spec_with_policies("uuid-1", "/test-api/v1.0"),
        );
        cache.add_api_level_policies(
            &vhosts,
            &["gw.com:uuid-2".to_string()],
            &spec_with_policies("uuid-2", "/mock-api/v1.0"),
        );

        let tree = cache.generate_config(|_, _| true);
        assert_eq!(tree.domain, "Default");
        assert_eq!(tree.descriptors.len(), 1);
        let org = &tree.descriptors[0];
        assert_eq!((org.key(), org.value()), (DESCRIPTOR_KEY_ORG, "org1"));
        assert_eq!(org.children().len(), 1);
        let vhost = &org.children()[0];
        assert_eq!((vhost.key(), vhost.value()), (DESCRIPTOR_KEY_VHOST, "gw.com"));

        // Both APIs contribute a path group for the operation and one for the
        // API-level ALL policy; sibling order is map-iteration order, so
        // compare as sets.
        let mut values: Vec<&str> = vhost.children().iter().map(|d| d.value()).collect();
        values.sort_unstable();
        assert_eq!(
            values,
            vec!["/mock-api/v1.0", "/mock-api/v1.0/orders", "/test-api/v1.0", "/test-api/v1.0/orders"]
        );
        // Sorted structural comparison of one path subtree.
        let all_node = vhost
            .children()
            .iter()
            .find(|d| d.value() == "/test-api/v1.0")
            .expect("api-level node");
        assert_eq!(
            sorted_children(all_node),
            vec![RateLimitDescriptor::Leaf {
                key: DESCRIPTOR_KEY_METHOD.to_string(),
                value: DESCRIPTOR_VALUE_ALL_METHODS.to_string(),
                rate_limit: RateLimit { unit: RateLimitUnit::Minute, requests_per_unit: 100 },
            }]
        );
    }

    #[test]
    fn flatten_skips_apis_not_on_label() {
        let cache = RateLimitPolicyCache::new("Default".to_string());
        cache.add_api_level_policies(
            &["gw.com".to_string()],
            &["gw.com:uuid-1".to_string()],
            &spec_with_policies("uuid-1", "/test-api/v1.0"),
        );
        let tree = cache.generate_config(|_, _| false);
        assert!(tree.descriptors.is_empty());
    }

    #[test]
    fn custom_policies_replace_not_merge() {
        let cache = RateLimitPolicyCache::new("Default".to_string());
        let p1 = CustomRateLimitPolicy {
            organization_id: "org1".to_string(),
            key: "tier".to_string(),
            value: "gold".to_string(),
            policy: policy(1000),
        };
        let p2 = CustomRateLimitPolicy {
            organization_id: "org1".to_string(),
            key: "tier".to_string(),
            value: "silver".to_string(),
            policy: policy(100),
        };
        cache.set_custom_policies(std::slice::from_ref(&p1));
        cache.set_custom_policies(std::slice::from_ref(&p2));

        let tree = cache.generate_config(|_, _| false);
        assert_eq!(tree.descriptors.len(), 1);
        let org = &tree.descriptors[0];
        assert_eq!(org.children().len(), 1);
        assert_eq!(org.children()[0].value(), "silver");
    }

    #[test]
    fn duplicate_method_is_skipped() {
        let cache = RateLimitPolicyCache::new("Default".to_string());
        let mut spec = spec_with_policies("uuid-1", "/test-api/v1.0");
        spec.operations[0]
            .methods
            .push(MethodPolicy { method: "GET".to_string(), rate_limit: Some(policy(5)) });

        cache.add_api_level_policies(
            &["gw.com".to_string()],
            &["gw.com:uuid-1".to_string()],
            &spec,
        );
        let tree = cache.generate_config(|_, _| true);
        let org = &tree.descriptors[0];
        let vhost = &org.children()[0];
        let path_node = vhost
            .children()
            .iter()
            .find(|d| d.value() == "/test-api/v1.0/orders")
            .expect("path node");
        // First GET wins, the duplicate is dropped.
        assert_eq!(path_node.children().len(), 1);
        assert_eq!(
            path_node.children()[0],
            RateLimitDescriptor::Leaf {
                key: DESCRIPTOR_KEY_METHOD.to_string(),
                value: "GET".to_string(),
                rate_limit: RateLimit { unit: RateLimitUnit::Minute, requests_per_unit: 10 },
            }
        );
    }

    #[test]
    fn delete_is_noop_for_unknown_keys() {
        let cache = RateLimitPolicyCache::new("Default".to_string());
        cache.delete_api_level_policies("org-none", "gw.com", "gw.com:uuid");

        cache.add_api_level_policies(
            &["gw.com".to_string()],
            &["gw.com:uuid-1".to_string()],
            &spec_with_policies("uuid-1", "/test-api/v1.0"),
        );
        cache.delete_api_level_policies("org1", "gw.com", "gw.com:uuid-1");
        let tree = cache.generate_config(|_, _| true);
        assert!(tree.descriptors.is_empty());
    }
}
