//! # apiplane
//!
//! apiplane is the control-plane half of an API gateway: it translates
//! declarative API deployments (routes, versions, rate limits) into
//! complete Envoy xDS snapshots per gateway label, and feeds a parallel
//! configuration channel to the policy-enforcement sidecar.
//!
//! ## Architecture
//!
//! ```text
//! Reconciliation driver → GatewayController → Snapshot caches → xDS server → Gateways
//!                              ↓                    ↓
//!                       Version registry      Enforcer / rate-limiter channels
//! ```
//!
//! ## Core Components
//!
//! - **GatewayController**: the deployment state store, one coarse mutex
//!   over org → `vhost:uuid` → deployed-API records
//! - **Semantic versioning**: floating `/v1`-style aliases rewritten in
//!   place whenever a range's latest version changes
//! - **Snapshot caches**: immutable versioned bundles per gateway label,
//!   serialized publication, broadcast fan-out to connected nodes
//! - **ADS server**: tonic-based gRPC server implementing the aggregated
//!   discovery protocol

pub mod api;
pub mod config;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod semver;
pub mod xds;

// Re-export commonly used types
pub use config::Settings;
pub use errors::{Error, Result};
pub use observability::init_tracing;
pub use semver::SemanticVersion;
pub use xds::{GatewayController, SnapshotCache};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_available() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "apiplane");
    }
}
