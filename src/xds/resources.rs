//! Construction of Envoy resources from the domain model.
//!
//! Deliberately mechanical: routes with safe-regex matchers, strict-DNS
//! clusters, listener shells per configured section. The one obligation
//! that matters to the rest of the engine is the route regex shape —
//! `^<base-path><operation-path>([/]{0,1})` with dots escaped — because the
//! semantic-versioning rewriter performs substring surgery on it.

use envoy_types::pb::envoy::config::core::v3::{
    address, data_source, socket_address, Address, DataSource, SocketAddress,
};
use envoy_types::pb::envoy::config::cluster::v3::{
    cluster::{ClusterDiscoveryType, DiscoveryType},
    Cluster,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints,
};
use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::config::route::v3::{
    header_matcher, route, route_match, DirectResponseAction, HeaderMatcher, Route, RouteAction,
    RouteMatch,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{RegexMatchAndSubstitute, RegexMatcher};
use envoy_types::pb::google::protobuf::Duration;
use tracing::debug;

use crate::config::ListenerSection;
use crate::domain::DeployedApiSpec;
use crate::errors::{Error, Result};

/// Routes, clusters and endpoint addresses built for one API at one vhost.
#[derive(Debug, Clone, Default)]
pub struct ApiResources {
    pub routes: Vec<Route>,
    pub clusters: Vec<Cluster>,
    pub endpoints: Vec<ClusterLoadAssignment>,
}

fn escape_dots(value: &str) -> String {
    value.replace('.', "\\.")
}

fn safe_regex(regex: String) -> RegexMatcher {
    RegexMatcher { regex, ..Default::default() }
}

/// Build the full resource set for one API definition at one vhost.
pub fn build_api_resources(spec: &DeployedApiSpec, vhost: &str) -> Result<ApiResources> {
    if spec.backends.is_empty() {
        return Err(Error::resource_build(vhost, "API definition has no backend endpoints"));
    }
    if spec.operations.is_empty() {
        return Err(Error::resource_build(vhost, "API definition has no operations"));
    }

    let cluster_name = spec.cluster_name();
    let mut routes = Vec::with_capacity(spec.operations.len());
    for operation in &spec.operations {
        let match_regex = format!("^{}{}([/]{{0,1}})", escape_dots(&spec.base_path), operation.path);
        let methods: Vec<&str> =
            operation.methods.iter().map(|method| method.method.as_str()).collect();
        let method_regex = format!("^({})$", methods.join("|"));

        routes.push(Route {
            name: format!("{}{}", spec.base_path, operation.path),
            r#match: Some(RouteMatch {
                path_specifier: Some(route_match::PathSpecifier::SafeRegex(safe_regex(
                    match_regex.clone(),
                ))),
                headers: vec![HeaderMatcher {
                    name: ":method".to_string(),
                    header_match_specifier: Some(
                        header_matcher::HeaderMatchSpecifier::SafeRegexMatch(safe_regex(
                            method_regex,
                        )),
                    ),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            action: Some(route::Action::Route(RouteAction {
                cluster_specifier: Some(
                    envoy_types::pb::envoy::config::route::v3::route_action::ClusterSpecifier::Cluster(
                        cluster_name.clone(),
                    ),
                ),
                regex_rewrite: Some(RegexMatchAndSubstitute {
                    pattern: Some(safe_regex(match_regex)),
                    substitution: format!("{}\\1", operation.path),
                }),
                ..Default::default()
            })),
            ..Default::default()
        });
    }

    let load_assignment = ClusterLoadAssignment {
        cluster_name: cluster_name.clone(),
        endpoints: vec![LocalityLbEndpoints {
            lb_endpoints: spec
                .backends
                .iter()
                .map(|backend| LbEndpoint {
                    host_identifier: Some(lb_endpoint::HostIdentifier::Endpoint(Endpoint {
                        address: Some(socket_addr(&backend.host, backend.port)),
                        ..Default::default()
                    })),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }],
        ..Default::default()
    };

    let cluster = Cluster {
        name: cluster_name,
        connect_timeout: Some(Duration { seconds: 5, nanos: 0 }),
        cluster_discovery_type: Some(ClusterDiscoveryType::Type(DiscoveryType::StrictDns as i32)),
        load_assignment: Some(load_assignment.clone()),
        ..Default::default()
    };

    debug!(
        api = %spec.name,
        version = %spec.version,
        vhost = %vhost,
        routes = routes.len(),
        "Built Envoy resources for API"
    );

    Ok(ApiResources { routes, clusters: vec![cluster], endpoints: vec![load_assignment] })
}

fn socket_addr(host: &str, port: u32) -> Address {
    Address {
        address: Some(address::Address::SocketAddress(SocketAddress {
            address: host.to_string(),
            port_specifier: Some(socket_address::PortSpecifier::PortValue(port)),
            ..Default::default()
        })),
        ..Default::default()
    }
}

/// Build the listener shells for every configured listener section.
pub fn build_gateway_listeners(sections: &[ListenerSection]) -> Vec<Listener> {
    sections
        .iter()
        .map(|section| Listener {
            name: section.name.clone(),
            address: Some(socket_addr("0.0.0.0", section.port)),
            ..Default::default()
        })
        .collect()
}

/// Route configuration name for a listener section.
pub fn route_config_name(section: &ListenerSection) -> String {
    format!("{}_routes", section.name)
}

/// Fixed system routes served by every gateway: liveness always, readiness
/// only once the initial API load has completed.
pub fn system_routes(include_ready: bool) -> Vec<Route> {
    let mut routes = vec![direct_response_route("/health", "{\"status\": \"healthy\"}")];
    if include_ready {
        routes.push(direct_response_route("/ready", "{\"status\": \"ready\"}"));
    }
    routes
}

fn direct_response_route(path: &str, body: &str) -> Route {
    Route {
        name: path.to_string(),
        r#match: Some(RouteMatch {
            path_specifier: Some(route_match::PathSpecifier::Path(path.to_string())),
            ..Default::default()
        }),
        action: Some(route::Action::DirectResponse(DirectResponseAction {
            status: 200,
            body: Some(DataSource {
                specifier: Some(data_source::Specifier::InlineString(body.to_string())),
                ..Default::default()
            }),
            ..Default::default()
        })),
        ..Default::default()
    }
}

/// Wildcard-aware hostname matching: `*` in the pattern matches any run of
/// characters, everything else matches literally.
pub fn matches_hostname(domain: &str, pattern: &str) -> bool {
    let pattern = format!("^{}$", regex::escape(pattern).replace("\\*", ".*"));
    match regex::Regex::new(&pattern) {
        Ok(re) => re.is_match(domain),
        Err(_) => false,
    }
}
