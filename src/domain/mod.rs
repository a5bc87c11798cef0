//! Domain model shared between the deployment store, the rate-limit cache
//! and the sidecar-facing configuration channel.

pub mod api;
pub mod enforcer;

pub use api::{
    ApiOperation, BackendEndpoint, CustomRateLimitPolicy, DeployedApiSpec, MethodPolicy,
    RateLimitPolicySpec,
};
pub use enforcer::{
    ApplicationPolicy, EnforcerApi, EnforcerConfig, JwtIssuer, KeyManager, RevokedToken,
    SubscriptionPolicy, ThrottleConfig,
};
