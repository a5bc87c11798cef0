//! Payload types for the policy-enforcement sidecar configuration channel.
//!
//! The enforcer receives its configuration through the same label-keyed
//! snapshot mechanism as the proxy, but the payloads are apiplane-owned
//! documents rather than Envoy protobufs. They are serialized to JSON and
//! wrapped in `Any` with `type.apiplane.dev/...` type URLs.

use serde::{Deserialize, Serialize};

/// Enforcer-facing descriptor of one deployed API version at one vhost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcerApi {
    pub uuid: String,
    pub name: String,
    pub version: String,
    pub organization_id: String,
    pub vhost: String,
    pub base_path: String,
    pub environment_type: String,
    pub is_default_version: bool,
}

/// Global enforcer runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnforcerConfig {
    pub event_hub_enabled: bool,
    pub analytics_enabled: bool,
    pub jwt_generator_enabled: bool,
}

/// A trusted token issuer the enforcer validates JWTs against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtIssuer {
    pub name: String,
    pub issuer: String,
    pub consumer_key_claim: String,
    pub jwks_endpoint: Option<String>,
    pub certificate: Option<String>,
}

/// Application-level throttling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationPolicy {
    pub id: i32,
    pub name: String,
    pub quota_type: String,
    pub request_count: i64,
    pub unit_time: i64,
    pub time_unit: String,
}

/// Subscription-level throttling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionPolicy {
    pub id: i32,
    pub name: String,
    pub quota_type: String,
    pub request_count: i64,
    pub unit_time: i64,
    pub time_unit: String,
    pub rate_limit_count: i32,
    pub rate_limit_time_unit: String,
}

/// An external key manager the enforcer resolves keys against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyManager {
    pub name: String,
    pub organization: String,
    pub enabled: bool,
    pub token_type: String,
    pub configuration: serde_json::Value,
}

/// A revoked token entry, identified by JTI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokedToken {
    pub jti: String,
    pub expiry_time: i64,
}

/// Throttle-data connectivity configuration for the enforcer.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ThrottleConfig {
    pub global_publishing_enabled: bool,
    pub receiver_url: Option<String>,
}
