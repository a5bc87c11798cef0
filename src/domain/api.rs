//! The parsed API model handed to the deployment store.
//!
//! This is the control plane's view of one declarative API definition after
//! the ingestion layer has resolved it: identity, versioning, backend
//! endpoints and the per-operation policy attachments the snapshot engine
//! cares about. Construction of the definition itself (CRD/OpenAPI parsing)
//! happens upstream.

use serde::{Deserialize, Serialize};

/// One declarative API definition, resolved and ready to deploy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployedApiSpec {
    /// Stable identity of the API across versions and vhosts.
    pub uuid: String,
    /// Human-readable API name; all versions of one logical API share it.
    pub name: String,
    /// Version string, e.g. `v1.2` or `v1.2.3`. May be non-semantic.
    pub version: String,
    pub organization_id: String,
    /// Context path the gateway exposes the API under, version included,
    /// e.g. `/test-api/v1.0`.
    pub base_path: String,
    /// Deployment environment of this definition (`prod`, `sand`, ...).
    pub environment_type: String,
    /// Default-version APIs also answer on the un-versioned context path;
    /// their routes must sort after all version-specific routes.
    pub is_default_version: bool,
    pub backends: Vec<BackendEndpoint>,
    pub operations: Vec<ApiOperation>,
    /// API-level rate limit, applied to the whole base path.
    pub rate_limit: Option<RateLimitPolicySpec>,
}

impl DeployedApiSpec {
    /// Name of the upstream cluster serving this API.
    pub fn cluster_name(&self) -> String {
        format!("{}_{}_{}_cluster", self.organization_id, self.uuid, self.environment_type)
    }
}

/// One upstream endpoint address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendEndpoint {
    pub host: String,
    pub port: u32,
}

/// One resource path of the API with its allowed methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiOperation {
    /// Path template relative to the base path, e.g. `/orders`.
    pub path: String,
    pub methods: Vec<MethodPolicy>,
}

/// One HTTP method of an operation plus its optional rate limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodPolicy {
    pub method: String,
    pub rate_limit: Option<RateLimitPolicySpec>,
}

/// Declarative rate-limit policy: request count per time unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicySpec {
    /// Time unit name: SECOND, MINUTE, HOUR or DAY (case-insensitive).
    pub unit: String,
    pub requests_per_unit: u32,
}

/// An organization-scoped custom rate-limit policy matched on an arbitrary
/// descriptor key/value pair rather than an API path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRateLimitPolicy {
    pub organization_id: String,
    pub key: String,
    pub value: String,
    pub policy: RateLimitPolicySpec,
}
