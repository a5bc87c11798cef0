//! The deployment state store and the gateway controller.
//!
//! `GatewayController` is the single source of truth for "what is deployed
//! to which gateway label". All deployment state lives behind one coarse
//! mutex: deploy/undeploy rates are low, and a single lock keeps the
//! store / version-registry / route-rewriter triangle atomic with respect
//! to concurrent mutations. Snapshot publication recomputes the full
//! resource set for a label from current state, so readers racing a
//! publish only ever see either the previous or the next complete bundle.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::endpoint::v3::ClusterLoadAssignment;
use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::config::route::v3::{Route, RouteConfiguration, VirtualHost};
use tracing::{debug, error, info};

use crate::config::Settings;
use crate::domain::{CustomRateLimitPolicy, DeployedApiSpec, EnforcerApi};
use crate::errors::Error;
use crate::xds::enforcer::EnforcerCaches;
use crate::xds::identifier::{extract_uuid, extract_vhost, generate_api_identifier};
use crate::xds::ratelimit::RateLimitPolicyCache;
use crate::xds::resources::{
    build_api_resources, build_gateway_listeners, matches_hostname, route_config_name,
    system_routes,
};
use crate::xds::semantic_versioning::{
    update_routing_rules_on_api_delete, update_routing_rules_on_api_update, VersionRegistry,
};
use crate::xds::snapshot::{
    json_resource, proto_resource, NamedResource, ResourceKind, SnapshotCache, CLUSTER_TYPE_URL,
    ENDPOINT_TYPE_URL, LISTENER_TYPE_URL, RATELIMIT_CONFIG_TYPE_URL, ROUTE_TYPE_URL,
};

/// One deployed API version at one vhost: the record the rewriter mutates
/// in place and the snapshot generator reads.
#[derive(Debug, Clone)]
pub struct DeployedApi {
    pub(crate) spec: Arc<DeployedApiSpec>,
    pub(crate) gateway_labels: HashSet<String>,
    pub(crate) routes: Vec<Route>,
    pub(crate) clusters: Vec<Cluster>,
    pub(crate) endpoints: Vec<ClusterLoadAssignment>,
    pub(crate) enforcer_api: EnforcerApi,
}

impl DeployedApi {
    pub fn spec(&self) -> &DeployedApiSpec {
        &self.spec
    }

    pub fn gateway_labels(&self) -> &HashSet<String> {
        &self.gateway_labels
    }
}

/// Per-label listener layout and label-global resources.
#[derive(Debug, Clone, Default)]
pub struct GatewayLabelConfig {
    pub(crate) listeners: Vec<Listener>,
    pub(crate) global_clusters: Vec<Cluster>,
    pub(crate) global_endpoints: Vec<ClusterLoadAssignment>,
}

#[derive(Debug, Default)]
struct DeploymentState {
    /// org -> `vhost:uuid` -> deployed record
    org_apis: HashMap<String, HashMap<String, DeployedApi>>,
    version_registry: VersionRegistry,
    /// org -> uuid -> vhosts the API is deployed at
    org_api_vhosts: HashMap<String, HashMap<String, HashSet<String>>>,
    gateway_labels: HashMap<String, GatewayLabelConfig>,
    /// Set once after the initial full API load; gates the readiness route.
    ready: bool,
}

/// The complete proxy-facing resource set for one gateway label.
#[derive(Debug, Clone, Default)]
pub struct GatewayResources {
    pub listeners: Vec<Listener>,
    pub routes: Vec<RouteConfiguration>,
    pub clusters: Vec<Cluster>,
    pub endpoints: Vec<ClusterLoadAssignment>,
}

/// Outcome of a deploy call: labels whose snapshots must be regenerated,
/// plus any per-vhost build failures. Successfully built vhosts stay
/// applied even when others fail.
#[derive(Debug, Default)]
pub struct DeployOutcome {
    pub affected_labels: HashSet<String>,
    pub errors: Vec<Error>,
}

/// Read-only counters for introspection.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct DeploymentStats {
    pub apis: usize,
    pub routes: usize,
    pub clusters: usize,
    pub labels: usize,
}

/// Top-level owner of all control-plane state and snapshot caches.
#[derive(Debug)]
pub struct GatewayController {
    settings: Arc<Settings>,
    state: Mutex<DeploymentState>,
    ratelimits: RateLimitPolicyCache,
    proxy_cache: SnapshotCache,
    ratelimit_cache: SnapshotCache,
    enforcer: EnforcerCaches,
}

impl GatewayController {
    pub fn new(settings: Arc<Settings>) -> Self {
        let domain = settings.gateway.rate_limiter_domain.clone();
        Self {
            settings,
            state: Mutex::new(DeploymentState::default()),
            ratelimits: RateLimitPolicyCache::new(domain),
            proxy_cache: SnapshotCache::new("proxy"),
            ratelimit_cache: SnapshotCache::new("ratelimit"),
            enforcer: EnforcerCaches::new(),
        }
    }

    pub fn proxy_cache(&self) -> &SnapshotCache {
        &self.proxy_cache
    }

    pub fn ratelimit_cache(&self) -> &SnapshotCache {
        &self.ratelimit_cache
    }

    pub fn enforcer(&self) -> &EnforcerCaches {
        &self.enforcer
    }

    /// Ensure a gateway label exists. With `create_if_missing` the label is
    /// initialized from the configured listener sections; otherwise a
    /// reference to an unknown label is an error.
    pub fn sanitize_gateway(&self, label: &str, create_if_missing: bool) -> crate::Result<()> {
        let mut state = self.state.lock().expect("deployment state lock poisoned");
        if state.gateway_labels.contains_key(label) {
            return Ok(());
        }
        if !create_if_missing {
            return Err(Error::UnknownGateway(label.to_string()));
        }
        let listeners = build_gateway_listeners(&self.settings.gateway.listener_sections);
        state
            .gateway_labels
            .insert(label.to_string(), GatewayLabelConfig { listeners, ..Default::default() });
        info!(label = %label, "Initialized gateway label");
        Ok(())
    }

    /// Register label-global (non-API-specific) clusters and endpoints,
    /// replacing any previously registered set for the label.
    pub fn set_gateway_global_resources(
        &self,
        label: &str,
        clusters: Vec<Cluster>,
        endpoints: Vec<ClusterLoadAssignment>,
    ) -> crate::Result<()> {
        let mut state = self.state.lock().expect("deployment state lock poisoned");
        let Some(label_config) = state.gateway_labels.get_mut(label) else {
            return Err(Error::UnknownGateway(label.to_string()));
        };
        label_config.global_clusters = clusters;
        label_config.global_endpoints = endpoints;
        Ok(())
    }

    /// Mark the initial API load as complete; from here on the readiness
    /// system route is exposed in generated snapshots.
    pub fn set_ready(&self) {
        let mut state = self.state.lock().expect("deployment state lock poisoned");
        state.ready = true;
        info!("Gateway deployment set marked ready");
    }

    /// Deploy (or re-deploy) an API definition to a set of vhosts and
    /// gateway labels.
    ///
    /// Each vhost is processed independently: a build failure for one vhost
    /// is reported in the outcome but does not roll back the others. When
    /// semantic versioning is enabled, floating-alias routes of sibling
    /// versions are rewritten under the same lock before the call returns.
    pub fn deploy(
        &self,
        spec: DeployedApiSpec,
        vhosts: &[String],
        labels: &HashSet<String>,
    ) -> DeployOutcome {
        let spec = Arc::new(spec);
        let org = spec.organization_id.clone();
        let semver_enabled = self.settings.gateway.enable_semantic_versioning;

        let mut outcome = DeployOutcome::default();
        outcome.affected_labels.extend(labels.iter().cloned());
        let mut deployed_vhosts: Vec<String> = Vec::new();
        let mut deployed_identifiers: Vec<String> = Vec::new();

        {
            let mut guard = self.state.lock().expect("deployment state lock poisoned");
            let state = &mut *guard;
            for vhost in vhosts {
                let api_identifier = generate_api_identifier(vhost, &spec.uuid);
                let resources = match build_api_resources(&spec, vhost) {
                    Ok(resources) => resources,
                    Err(e) => {
                        error!(
                            org = %org,
                            api = %spec.name,
                            vhost = %vhost,
                            error = %e,
                            "Failed to build resources for vhost, skipping it"
                        );
                        outcome.errors.push(e);
                        continue;
                    }
                };

                let org_map = state.org_apis.entry(org.clone()).or_default();
                if let Some(previous) = org_map.get(&api_identifier) {
                    outcome.affected_labels.extend(previous.gateway_labels.iter().cloned());
                }
                org_map.insert(
                    api_identifier.clone(),
                    DeployedApi {
                        spec: spec.clone(),
                        gateway_labels: labels.clone(),
                        routes: resources.routes,
                        clusters: resources.clusters,
                        endpoints: resources.endpoints,
                        enforcer_api: enforcer_api(&spec, vhost),
                    },
                );
                state
                    .org_api_vhosts
                    .entry(org.clone())
                    .or_default()
                    .entry(spec.uuid.clone())
                    .or_default()
                    .insert(vhost.clone());

                if semver_enabled {
                    if let Some(org_map) = state.org_apis.get_mut(&org) {
                        update_routing_rules_on_api_update(
                            org_map,
                            &mut state.version_registry,
                            &org,
                            &api_identifier,
                            &spec.name,
                            &spec.version,
                            vhost,
                        );
                    }
                }

                deployed_vhosts.push(vhost.clone());
                deployed_identifiers.push(api_identifier);
            }
            refresh_metrics(state);
        }

        if !deployed_vhosts.is_empty() {
            self.ratelimits.add_api_level_policies(&deployed_vhosts, &deployed_identifiers, &spec);
        }

        info!(
            org = %org,
            api = %spec.name,
            version = %spec.version,
            uuid = %spec.uuid,
            vhosts = deployed_vhosts.len(),
            failed_vhosts = outcome.errors.len(),
            "Deployed API"
        );
        outcome
    }

    /// Remove every deployed record of the API identified by `uuid`, across
    /// all organizations and vhosts.
    ///
    /// Returns the set of gateway labels that were serving the API; callers
    /// must regenerate snapshots for these labels.
    pub fn undeploy(&self, uuid: &str) -> HashSet<String> {
        let semver_enabled = self.settings.gateway.enable_semantic_versioning;
        let mut affected: HashSet<String> = HashSet::new();
        let mut removed: Vec<(String, String)> = Vec::new();

        {
            let mut guard = self.state.lock().expect("deployment state lock poisoned");
            let state = &mut *guard;
            for (org, org_map) in state.org_apis.iter_mut() {
                let matching: Vec<String> = org_map
                    .keys()
                    .filter(|identifier| match extract_uuid(identifier) {
                        Ok(record_uuid) => record_uuid == uuid,
                        Err(e) => {
                            error!(org = %org, error = %e, "Skipping record with malformed identifier");
                            false
                        }
                    })
                    .cloned()
                    .collect();

                for identifier in matching {
                    let Some(record) = org_map.remove(&identifier) else {
                        continue;
                    };
                    affected.extend(record.gateway_labels.iter().cloned());
                    if semver_enabled {
                        update_routing_rules_on_api_delete(
                            org_map,
                            &mut state.version_registry,
                            org,
                            &identifier,
                            &record.spec.name,
                            &record.spec.version,
                        );
                    }
                    if let Some(api_vhosts) = state.org_api_vhosts.get_mut(org) {
                        api_vhosts.remove(uuid);
                    }
                    removed.push((org.clone(), identifier));
                }
            }
            state.org_apis.retain(|_, org_map| !org_map.is_empty());
            state.org_api_vhosts.retain(|_, api_vhosts| !api_vhosts.is_empty());
            refresh_metrics(state);
        }

        for (org, identifier) in &removed {
            match extract_vhost(identifier) {
                Ok(vhost) => self.ratelimits.delete_api_level_policies(org, vhost, identifier),
                Err(e) => error!(org = %org, error = %e, "Cannot clean rate limit policies"),
            }
        }

        info!(uuid = %uuid, records = removed.len(), "Undeployed API");
        affected
    }

    /// Assemble the full proxy resource set for one gateway label.
    ///
    /// Returns `None` when the label has no registered listeners. Routes are
    /// grouped per vhost with default-versioned APIs' routes appended last,
    /// so more specific version-prefixed routes match first; route
    /// configurations are then assembled per listener section by wildcard
    /// hostname matching.
    pub fn generate_resources_for_label(&self, label: &str) -> Option<GatewayResources> {
        let guard = self.state.lock().expect("deployment state lock poisoned");
        let label_config = guard.gateway_labels.get(label)?;
        if label_config.listeners.is_empty() {
            return None;
        }

        let mut clusters = label_config.global_clusters.clone();
        let mut endpoints = label_config.global_endpoints.clone();
        let mut vhost_routes: HashMap<String, Vec<Route>> = HashMap::new();
        let mut default_version_routes: HashMap<String, Vec<Route>> = HashMap::new();

        for (org, org_map) in &guard.org_apis {
            for (identifier, record) in org_map {
                if !record.gateway_labels.contains(label) {
                    continue;
                }
                let vhost = match extract_vhost(identifier) {
                    Ok(vhost) => vhost.to_string(),
                    Err(e) => {
                        error!(org = %org, error = %e, "Skipping record with malformed identifier");
                        continue;
                    }
                };
                let bucket = if record.spec.is_default_version {
                    &mut default_version_routes
                } else {
                    &mut vhost_routes
                };
                bucket.entry(vhost).or_default().extend(record.routes.iter().cloned());
                clusters.extend(record.clusters.iter().cloned());
                endpoints.extend(record.endpoints.iter().cloned());
            }
        }
        // Default-version routes answer the un-versioned context path; they
        // must sort after every version-specific route of their vhost.
        for (vhost, routes) in default_version_routes {
            vhost_routes.entry(vhost).or_default().extend(routes);
        }

        let mut route_configs = Vec::new();
        for section in &self.settings.gateway.listener_sections {
            let mut virtual_hosts: Vec<VirtualHost> = vhost_routes
                .iter()
                .filter(|(vhost, _)| matches_hostname(vhost, &section.hostname))
                .map(|(vhost, routes)| VirtualHost {
                    name: vhost.clone(),
                    domains: vec![vhost.clone()],
                    routes: routes.clone(),
                    ..Default::default()
                })
                .collect();
            virtual_hosts.push(VirtualHost {
                name: "system".to_string(),
                domains: vec!["*".to_string()],
                routes: system_routes(guard.ready),
                ..Default::default()
            });
            route_configs.push(RouteConfiguration {
                name: route_config_name(section),
                virtual_hosts,
                ..Default::default()
            });
        }

        Some(GatewayResources {
            listeners: label_config.listeners.clone(),
            routes: route_configs,
            clusters,
            endpoints,
        })
    }

    /// Recompute and publish snapshots (proxy, rate limiter, enforcer API
    /// list) for every affected label. Returns true when at least one
    /// label's proxy snapshot published successfully.
    pub fn update_caches_on_api_change(&self, labels: &HashSet<String>) -> bool {
        let mut any_published = false;
        for label in labels {
            if self.update_proxy_cache(label) {
                any_published = true;
            }
            self.update_ratelimit_cache(label);
            self.update_enforcer_api_cache(label);
        }
        any_published
    }

    fn update_proxy_cache(&self, label: &str) -> bool {
        let Some(resources) = self.generate_resources_for_label(label) else {
            debug!(label = %label, "Label has no listeners; skipping proxy snapshot");
            return false;
        };

        let mut bundle: BTreeMap<ResourceKind, Vec<NamedResource>> = BTreeMap::new();
        bundle.insert(
            ResourceKind::Listener,
            resources
                .listeners
                .iter()
                .map(|listener| proto_resource(&listener.name, LISTENER_TYPE_URL, listener))
                .collect(),
        );
        bundle.insert(
            ResourceKind::Route,
            resources
                .routes
                .iter()
                .map(|route_config| proto_resource(&route_config.name, ROUTE_TYPE_URL, route_config))
                .collect(),
        );
        bundle.insert(
            ResourceKind::Cluster,
            resources
                .clusters
                .iter()
                .map(|cluster| proto_resource(&cluster.name, CLUSTER_TYPE_URL, cluster))
                .collect(),
        );
        bundle.insert(
            ResourceKind::Endpoint,
            resources
                .endpoints
                .iter()
                .map(|cla| proto_resource(&cla.cluster_name, ENDPOINT_TYPE_URL, cla))
                .collect(),
        );
        self.proxy_cache.publish(label, bundle)
    }

    fn update_ratelimit_cache(&self, label: &str) -> bool {
        let deployed = self.identifiers_on_label(label);
        let tree = self
            .ratelimits
            .generate_config(|org, identifier| deployed.contains(&(org.to_string(), identifier.to_string())));

        let resource = match json_resource(&tree.name, RATELIMIT_CONFIG_TYPE_URL, &tree) {
            Ok(resource) => resource,
            Err(e) => {
                error!(label = %label, error = %e, "Failed to encode rate limit config");
                return false;
            }
        };
        let mut bundle = BTreeMap::new();
        bundle.insert(ResourceKind::RateLimitConfig, vec![resource]);
        self.ratelimit_cache.publish(label, bundle)
    }

    fn update_enforcer_api_cache(&self, label: &str) -> bool {
        let apis: Vec<EnforcerApi> = {
            let guard = self.state.lock().expect("deployment state lock poisoned");
            guard
                .org_apis
                .values()
                .flat_map(|org_map| org_map.values())
                .filter(|record| record.gateway_labels.contains(label))
                .map(|record| record.enforcer_api.clone())
                .collect()
        };
        self.enforcer.update_apis(label, &apis)
    }

    fn identifiers_on_label(&self, label: &str) -> HashSet<(String, String)> {
        let guard = self.state.lock().expect("deployment state lock poisoned");
        let mut deployed = HashSet::new();
        for (org, org_map) in &guard.org_apis {
            for (identifier, record) in org_map {
                if record.gateway_labels.contains(label) {
                    deployed.insert((org.clone(), identifier.clone()));
                }
            }
        }
        deployed
    }

    /// Inline rate-limit policies of an API, stored per vhost.
    pub fn add_api_rate_limit_policies(&self, vhosts: &[String], spec: &DeployedApiSpec) {
        let identifiers: Vec<String> = vhosts
            .iter()
            .map(|vhost| generate_api_identifier(vhost, &spec.uuid))
            .collect();
        self.ratelimits.add_api_level_policies(vhosts, &identifiers, spec);
    }

    pub fn delete_api_rate_limit_policies(&self, org: &str, vhost: &str, uuid: &str) {
        let identifier = generate_api_identifier(vhost, uuid);
        self.ratelimits.delete_api_level_policies(org, vhost, &identifier);
    }

    /// Replace the whole custom rate-limit policy set.
    pub fn set_custom_rate_limit_policies(&self, policies: &[CustomRateLimitPolicy]) {
        self.ratelimits.set_custom_policies(policies);
    }

    /// Lock-protected counters over the deployment maps.
    pub fn stats(&self) -> DeploymentStats {
        let guard = self.state.lock().expect("deployment state lock poisoned");
        deployment_stats(&guard)
    }
}

fn deployment_stats(state: &DeploymentState) -> DeploymentStats {
    let mut stats = DeploymentStats {
        apis: 0,
        routes: 0,
        clusters: 0,
        labels: state.gateway_labels.len(),
    };
    for org_map in state.org_apis.values() {
        stats.apis += org_map.len();
        for record in org_map.values() {
            stats.routes += record.routes.len();
            stats.clusters += record.clusters.len();
        }
    }
    stats
}

fn refresh_metrics(state: &DeploymentState) {
    let stats = deployment_stats(state);
    metrics::gauge!("apiplane_deployed_apis").set(stats.apis as f64);
    metrics::gauge!("apiplane_deployed_routes").set(stats.routes as f64);
    metrics::gauge!("apiplane_deployed_clusters").set(stats.clusters as f64);
}

fn enforcer_api(spec: &DeployedApiSpec, vhost: &str) -> EnforcerApi {
    EnforcerApi {
        uuid: spec.uuid.clone(),
        name: spec.name.clone(),
        version: spec.version.clone(),
        organization_id: spec.organization_id.clone(),
        vhost: vhost.to_string(),
        base_path: spec.base_path.clone(),
        environment_type: spec.environment_type.clone(),
        is_default_version: spec.is_default_version,
    }
}
