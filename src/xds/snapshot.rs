//! Immutable configuration snapshots and the label-keyed snapshot cache.
//!
//! A [`Snapshot`] is a complete, versioned bundle of resources for one
//! gateway label. Publication always replaces the whole bundle; there is no
//! partial update. The cache serializes publications through a single
//! publish mutex so a subscriber can never observe a half-built resource
//! set, and fans out update events to the streaming server over a broadcast
//! channel.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use envoy_types::pb::envoy::config::route::v3::{route, route_action, RouteConfiguration};
use envoy_types::pb::google::protobuf::Any;
use prost::Message;
use rand::Rng;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::errors::{Error, Result};

pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ENDPOINT_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const RATELIMIT_CONFIG_TYPE_URL: &str = "type.apiplane.dev/ratelimit.v1.RateLimitConfig";

/// Resource categories a snapshot may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Cluster,
    Endpoint,
    Route,
    Listener,
    RateLimitConfig,
    EnforcerConfig,
    EnforcerApi,
    EnforcerJwtIssuer,
    EnforcerApplicationPolicy,
    EnforcerSubscriptionPolicy,
    EnforcerKeyManager,
    EnforcerRevokedToken,
    EnforcerThrottleData,
}

impl ResourceKind {
    pub fn type_url(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => CLUSTER_TYPE_URL,
            ResourceKind::Endpoint => ENDPOINT_TYPE_URL,
            ResourceKind::Route => ROUTE_TYPE_URL,
            ResourceKind::Listener => LISTENER_TYPE_URL,
            ResourceKind::RateLimitConfig => RATELIMIT_CONFIG_TYPE_URL,
            ResourceKind::EnforcerConfig => "type.apiplane.dev/enforcer.v1.Config",
            ResourceKind::EnforcerApi => "type.apiplane.dev/enforcer.v1.Api",
            ResourceKind::EnforcerJwtIssuer => "type.apiplane.dev/enforcer.v1.JwtIssuer",
            ResourceKind::EnforcerApplicationPolicy => {
                "type.apiplane.dev/enforcer.v1.ApplicationPolicy"
            }
            ResourceKind::EnforcerSubscriptionPolicy => {
                "type.apiplane.dev/enforcer.v1.SubscriptionPolicy"
            }
            ResourceKind::EnforcerKeyManager => "type.apiplane.dev/enforcer.v1.KeyManager",
            ResourceKind::EnforcerRevokedToken => "type.apiplane.dev/enforcer.v1.RevokedToken",
            ResourceKind::EnforcerThrottleData => "type.apiplane.dev/enforcer.v1.ThrottleData",
        }
    }
}

/// A named resource body, ready to ship in a `DiscoveryResponse`.
#[derive(Debug, Clone)]
pub struct NamedResource {
    pub name: String,
    pub body: Any,
}

/// Encode a protobuf message as a named `Any` resource.
pub fn proto_resource<M: Message>(name: &str, type_url: &str, message: &M) -> NamedResource {
    NamedResource {
        name: name.to_string(),
        body: Any { type_url: type_url.to_string(), value: message.encode_to_vec() },
    }
}

/// Encode a serde-serializable document as a named `Any` resource with an
/// apiplane-owned type URL.
pub fn json_resource<T: Serialize>(name: &str, type_url: &str, value: &T) -> Result<NamedResource> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| Error::snapshot(format!("failed to encode {name}: {e}")))?;
    Ok(NamedResource {
        name: name.to_string(),
        body: Any { type_url: type_url.to_string(), value: bytes },
    })
}

/// An immutable, versioned bundle of resources for one gateway label.
#[derive(Debug, Default)]
pub struct Snapshot {
    version: String,
    resources: BTreeMap<ResourceKind, Vec<NamedResource>>,
}

impl Snapshot {
    pub fn new(version: String, resources: BTreeMap<ResourceKind, Vec<NamedResource>>) -> Self {
        Self { version, resources }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn resources_of(&self, kind: ResourceKind) -> &[NamedResource] {
        self.resources.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Validate internal consistency of the bundle: every cluster referenced
    /// by a route configuration must exist in the bundle itself.
    pub fn consistent(&self) -> Result<()> {
        let routes = self.resources_of(ResourceKind::Route);
        if routes.is_empty() {
            return Ok(());
        }

        let cluster_names: HashSet<&str> = self
            .resources_of(ResourceKind::Cluster)
            .iter()
            .map(|resource| resource.name.as_str())
            .collect();

        for resource in routes {
            let route_config =
                RouteConfiguration::decode(resource.body.value.as_slice()).map_err(|e| {
                    Error::snapshot(format!(
                        "route configuration {} does not decode: {e}",
                        resource.name
                    ))
                })?;
            for virtual_host in &route_config.virtual_hosts {
                for route in &virtual_host.routes {
                    let Some(route::Action::Route(action)) = &route.action else {
                        continue;
                    };
                    if let Some(route_action::ClusterSpecifier::Cluster(cluster)) =
                        &action.cluster_specifier
                    {
                        if !cluster_names.contains(cluster.as_str()) {
                            return Err(Error::snapshot(format!(
                                "route {} in {} references missing cluster {cluster:?}",
                                route.name, resource.name
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Update event emitted after a successful publication.
#[derive(Debug, Clone)]
pub struct SnapshotEvent {
    pub label: String,
    pub version: String,
}

/// Label-keyed snapshot cache with serialized publication.
#[derive(Debug)]
pub struct SnapshotCache {
    name: &'static str,
    snapshots: RwLock<HashMap<String, Arc<Snapshot>>>,
    publish_lock: Mutex<()>,
    update_tx: broadcast::Sender<SnapshotEvent>,
}

impl SnapshotCache {
    pub fn new(name: &'static str) -> Self {
        let (update_tx, _) = broadcast::channel(128);
        Self {
            name,
            snapshots: RwLock::new(HashMap::new()),
            publish_lock: Mutex::new(()),
            update_tx,
        }
    }

    /// Current snapshot for a label, if one has been published.
    pub fn snapshot(&self, label: &str) -> Option<Arc<Snapshot>> {
        self.snapshots.read().expect("snapshot cache lock poisoned").get(label).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotEvent> {
        self.update_tx.subscribe()
    }

    /// Build, validate and publish a new snapshot for `label`.
    ///
    /// Publication is serialized through the publish mutex; on `false` no
    /// external state has changed and the previous snapshot stays in effect.
    pub fn publish(
        &self,
        label: &str,
        resources: BTreeMap<ResourceKind, Vec<NamedResource>>,
    ) -> bool {
        let version = new_snapshot_version();
        let snapshot = Snapshot::new(version.clone(), resources);
        if let Err(e) = snapshot.consistent() {
            error!(cache = self.name, label = %label, error = %e, "Snapshot failed consistency check");
            return false;
        }

        let _publish_guard = self.publish_lock.lock().expect("publish lock poisoned");
        {
            let mut snapshots = self.snapshots.write().expect("snapshot cache lock poisoned");
            snapshots.insert(label.to_string(), Arc::new(snapshot));
        }
        let _ = self.update_tx.send(SnapshotEvent { label: label.to_string(), version: version.clone() });

        metrics::counter!("apiplane_snapshots_published_total", "cache" => self.name)
            .increment(1);
        info!(cache = self.name, label = %label, version = %version, "Published new snapshot");
        true
    }
}

fn new_snapshot_version() -> String {
    rand::thread_rng().gen_range(0..999_999_999u32).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::envoy::config::cluster::v3::Cluster;
    use envoy_types::pb::envoy::config::route::v3::{
        route_match, Route, RouteAction, RouteMatch, VirtualHost,
    };

    fn route_config(name: &str, cluster: &str) -> RouteConfiguration {
        RouteConfiguration {
            name: name.to_string(),
            virtual_hosts: vec![VirtualHost {
                name: "vh".to_string(),
                domains: vec!["*".to_string()],
                routes: vec![Route {
                    name: "r".to_string(),
                    r#match: Some(RouteMatch {
                        path_specifier: Some(route_match::PathSpecifier::Prefix("/".to_string())),
                        ..Default::default()
                    }),
                    action: Some(route::Action::Route(RouteAction {
                        cluster_specifier: Some(route_action::ClusterSpecifier::Cluster(
                            cluster.to_string(),
                        )),
                        ..Default::default()
                    })),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn bundle(route_cluster: &str, cluster_name: &str) -> BTreeMap<ResourceKind, Vec<NamedResource>> {
        let mut resources = BTreeMap::new();
        resources.insert(
            ResourceKind::Route,
            vec![proto_resource("rc", ROUTE_TYPE_URL, &route_config("rc", route_cluster))],
        );
        resources.insert(
            ResourceKind::Cluster,
            vec![proto_resource(
                cluster_name,
                CLUSTER_TYPE_URL,
                &Cluster { name: cluster_name.to_string(), ..Default::default() },
            )],
        );
        resources
    }

    #[test]
    fn consistent_bundle_publishes() {
        let cache = SnapshotCache::new("test");
        assert!(cache.publish("default", bundle("c1", "c1")));
        let snapshot = cache.snapshot("default").expect("snapshot");
        assert_eq!(snapshot.resources_of(ResourceKind::Route).len(), 1);
    }

    #[test]
    fn missing_cluster_reference_rejects_publish() {
        let cache = SnapshotCache::new("test");
        assert!(!cache.publish("default", bundle("missing", "c1")));
        assert!(cache.snapshot("default").is_none());
    }

    #[test]
    fn publish_replaces_previous_snapshot_entirely() {
        let cache = SnapshotCache::new("test");
        assert!(cache.publish("default", bundle("c1", "c1")));
        let first = cache.snapshot("default").expect("snapshot");

        let mut smaller = BTreeMap::new();
        smaller.insert(
            ResourceKind::Cluster,
            vec![proto_resource(
                "c2",
                CLUSTER_TYPE_URL,
                &Cluster { name: "c2".to_string(), ..Default::default() },
            )],
        );
        assert!(cache.publish("default", smaller));
        let second = cache.snapshot("default").expect("snapshot");
        assert_ne!(first.version(), second.version());
        assert!(second.resources_of(ResourceKind::Route).is_empty());
    }

    #[tokio::test]
    async fn subscribers_observe_publications() {
        let cache = SnapshotCache::new("test");
        let mut rx = cache.subscribe();
        assert!(cache.publish("default", bundle("c1", "c1")));
        let event = rx.recv().await.expect("event");
        assert_eq!(event.label, "default");
    }
}
