//! The xDS snapshot engine.
//!
//! Translates deployed API definitions into complete, versioned
//! configuration snapshots per gateway label:
//!
//! - [`deployment`] — the deployment state store and [`GatewayController`]
//! - [`semantic_versioning`] — floating version-alias registry and route
//!   rewriting
//! - [`ratelimit`] — rate-limit descriptor trees per label
//! - [`snapshot`] — immutable snapshot bundles and the label-keyed cache
//! - [`enforcer`] — the policy-enforcement sidecar channel
//! - [`server`] — the ADS gRPC server gateways connect to

pub mod deployment;
pub mod enforcer;
pub mod identifier;
pub mod ratelimit;
pub mod resources;
pub mod semantic_versioning;
pub mod server;
pub mod snapshot;

pub use deployment::{DeployOutcome, DeployedApi, DeploymentStats, GatewayController, GatewayResources};
pub use enforcer::{EnforcerCaches, ENFORCER_LABEL};
pub use identifier::{
    extract_uuid, extract_vhost, generate_api_identifier, generate_api_range_identifier,
};
pub use ratelimit::{RateLimitConfigTree, RateLimitDescriptor, RateLimitPolicyCache};
pub use semantic_versioning::VersionRegistry;
pub use server::start_ads_server;
pub use snapshot::{NamedResource, ResourceKind, Snapshot, SnapshotCache, SnapshotEvent};
