//! # Configuration Management
//!
//! Settings for the control plane, loaded from an optional TOML file with
//! `APIPLANE_`-prefixed environment variable overrides (double underscore as
//! the section separator, e.g. `APIPLANE_XDS__PORT=18000`).

use serde::Deserialize;

use crate::errors::Result;

/// Top-level application settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub xds: XdsSettings,
    pub admin: AdminSettings,
    pub gateway: GatewaySettings,
}

/// xDS gRPC server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct XdsSettings {
    pub bind_address: String,
    pub port: u16,
}

impl Default for XdsSettings {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0".to_string(), port: 18000 }
    }
}

/// Admin/introspection HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdminSettings {
    pub bind_address: String,
    pub port: u16,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self { bind_address: "127.0.0.1".to_string(), port: 9095 }
    }
}

/// Gateway-facing behavior toggles and static listener layout.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// When enabled, floating version aliases (`/v1`, `/v1.2`) are rewritten
    /// to always route to the latest deployed sibling version.
    pub enable_semantic_versioning: bool,
    /// Domain reported to the rate-limiter service.
    pub rate_limiter_domain: String,
    /// Listener sections every gateway label starts from.
    pub listener_sections: Vec<ListenerSection>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            enable_semantic_versioning: true,
            rate_limiter_domain: "Default".to_string(),
            listener_sections: vec![ListenerSection::default()],
        }
    }
}

/// One listener section of the gateway: a named port bound to a hostname
/// pattern (wildcards allowed, e.g. `*.gw.example.com`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerSection {
    pub name: String,
    pub hostname: String,
    pub port: u32,
    pub protocol: String,
}

impl Default for ListenerSection {
    fn default() -> Self {
        Self {
            name: "httpslistener".to_string(),
            hostname: "*".to_string(),
            port: 9095,
            protocol: "HTTPS".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the given TOML file (if any) plus environment
    /// overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let loaded = builder
            .add_source(config::Environment::with_prefix("APIPLANE").separator("__"))
            .build()?;
        Ok(loaded.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.xds.port, 18000);
        assert_eq!(settings.xds.bind_address, "0.0.0.0");
        assert!(settings.gateway.enable_semantic_versioning);
        assert_eq!(settings.gateway.listener_sections.len(), 1);
        assert_eq!(settings.gateway.listener_sections[0].name, "httpslistener");
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let settings = Settings::load(None).expect("load");
        assert_eq!(settings.admin.port, 9095);
        assert_eq!(settings.gateway.rate_limiter_domain, "Default");
    }
}
