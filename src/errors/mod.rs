//! # Error Handling
//!
//! Error types for the apiplane control plane, defined with `thiserror`.
//! The taxonomy mirrors the failure modes of the snapshot engine: malformed
//! identifiers, unparseable API versions, resource construction failures,
//! and snapshot build/publish problems. None of these are fatal to the
//! process; callers log and keep the previous state in effect.

/// Custom result type for apiplane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the apiplane control plane
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// An API identifier did not split into exactly `vhost:uuid`
    #[error("Malformed API identifier {identifier:?}: expected exactly one {separator:?} separator")]
    Identifier { identifier: String, separator: char },

    /// An API version string did not match `v<major>.<minor>[.<patch>]`
    #[error("Invalid API version {version:?}: {reason}")]
    Version { version: String, reason: String },

    /// Route/cluster/endpoint construction failed for one vhost
    #[error("Resource build error for vhost {vhost:?}: {message}")]
    ResourceBuild { vhost: String, message: String },

    /// A snapshot bundle failed to assemble or validate
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// A gateway label was referenced before it was created
    #[error("Unknown gateway label {0:?}")]
    UnknownGateway(String),

    /// Network transport errors (gRPC, HTTP)
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violations
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a malformed-identifier error
    pub fn identifier<S: Into<String>>(identifier: S, separator: char) -> Self {
        Self::Identifier { identifier: identifier.into(), separator }
    }

    /// Create an invalid-version error
    pub fn version<V: Into<String>, R: Into<String>>(version: V, reason: R) -> Self {
        Self::Version { version: version.into(), reason: reason.into() }
    }

    /// Create a per-vhost resource build error
    pub fn resource_build<V: Into<String>, M: Into<String>>(vhost: V, message: M) -> Self {
        Self::ResourceBuild { vhost: vhost.into(), message: message.into() }
    }

    /// Create a snapshot error
    pub fn snapshot<S: Into<String>>(message: S) -> Self {
        Self::Snapshot(message.into())
    }

    /// Create a transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}
