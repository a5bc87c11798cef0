//! End-to-end controller scenarios driven through the public API: deploy,
//! sibling-version rewrites, undeploy, rate-limit flattening and the
//! sidecar channel.

use std::collections::HashSet;
use std::sync::Arc;

use apiplane::domain::{
    ApiOperation, BackendEndpoint, CustomRateLimitPolicy, DeployedApiSpec, MethodPolicy,
    RateLimitPolicySpec,
};
use apiplane::xds::{GatewayResources, RateLimitConfigTree, ResourceKind};
use apiplane::{GatewayController, Settings};
use envoy_types::pb::envoy::config::route::v3::route_match;

fn controller() -> Arc<GatewayController> {
    let controller = Arc::new(GatewayController::new(Arc::new(Settings::default())));
    controller.sanitize_gateway("default", true).expect("create label");
    controller
}

fn default_labels() -> HashSet<String> {
    HashSet::from(["default".to_string()])
}

fn api_spec(uuid: &str, name: &str, version: &str, base_path: &str) -> DeployedApiSpec {
    DeployedApiSpec {
        uuid: uuid.to_string(),
        name: name.to_string(),
        version: version.to_string(),
        organization_id: "org1".to_string(),
        base_path: base_path.to_string(),
        environment_type: "prod".to_string(),
        is_default_version: false,
        backends: vec![BackendEndpoint { host: "backend.svc".to_string(), port: 8080 }],
        operations: vec![ApiOperation {
            path: "/orders".to_string(),
            methods: vec![MethodPolicy { method: "GET".to_string(), rate_limit: None }],
        }],
        rate_limit: None,
    }
}

fn vhost_route_regexes(resources: &GatewayResources, vhost: &str) -> Vec<String> {
    let virtual_host = resources.routes[0]
        .virtual_hosts
        .iter()
        .find(|vh| vh.name == vhost)
        .unwrap_or_else(|| panic!("no virtual host {vhost}"));
    virtual_host
        .routes
        .iter()
        .map(|route| {
            let Some(route_match::PathSpecifier::SafeRegex(matcher)) =
                &route.r#match.as_ref().unwrap().path_specifier
            else {
                panic!("expected safe regex matcher");
            };
            matcher.regex.clone()
        })
        .collect()
}

#[test]
fn sibling_deploy_rewrites_floating_aliases() {
    let controller = controller();

    controller.deploy(
        api_spec("api-1-uuid", "Test API", "v1.0", "/test-api/v1.0"),
        &["gw.com".to_string()],
        &default_labels(),
    );
    let resources = controller.generate_resources_for_label("default").expect("resources");
    // The first version owns the whole v1 range.
    assert_eq!(
        vhost_route_regexes(&resources, "gw.com"),
        vec!["^/test-api/v1(?:\\.0)?/orders([/]{0,1})".to_string()]
    );

    controller.deploy(
        api_spec("api-2-uuid", "Test API", "v1.1", "/test-api/v1.1"),
        &["gw.com".to_string()],
        &default_labels(),
    );
    let resources = controller.generate_resources_for_label("default").expect("resources");
    let mut regexes = vhost_route_regexes(&resources, "gw.com");
    regexes.sort();
    // v1.0 narrows to exact matching; v1.1 inherits the floating alias.
    assert_eq!(
        regexes,
        vec![
            "^/test-api/v1(?:\\.1)?/orders([/]{0,1})".to_string(),
            "^/test-api/v1\\.0/orders([/]{0,1})".to_string(),
        ]
    );
}

#[test]
fn undeploying_the_winner_promotes_the_survivor() {
    let controller = controller();
    controller.deploy(
        api_spec("api-1-uuid", "Test API", "v1.0", "/test-api/v1.0"),
        &["gw.com".to_string()],
        &default_labels(),
    );
    controller.deploy(
        api_spec("api-2-uuid", "Test API", "v1.5", "/test-api/v1.5"),
        &["gw.com".to_string()],
        &default_labels(),
    );

    let affected = controller.undeploy("api-2-uuid");
    assert_eq!(affected, default_labels());

    let resources = controller.generate_resources_for_label("default").expect("resources");
    // v1.0 is the only version left and answers the whole v1 range again.
    assert_eq!(
        vhost_route_regexes(&resources, "gw.com"),
        vec!["^/test-api/v1(?:\\.0)?/orders([/]{0,1})".to_string()]
    );
}

#[test]
fn deploy_undeploy_round_trip_clears_all_state() {
    let controller = controller();
    let outcome = controller.deploy(
        api_spec("api-1-uuid", "Test API", "v1.0", "/test-api/v1.0"),
        &["gw.com".to_string()],
        &default_labels(),
    );
    assert!(outcome.errors.is_empty());
    assert_eq!(controller.stats().apis, 1);

    controller.undeploy("api-1-uuid");
    let resources = controller.generate_resources_for_label("default").expect("resources");
    assert!(resources.clusters.is_empty());
    assert!(resources.endpoints.is_empty());
    assert_eq!(controller.stats().apis, 0);
    assert_eq!(controller.stats().routes, 0);
}

fn rate_limited_spec(uuid: &str, base_path: &str) -> DeployedApiSpec {
    let mut spec = api_spec(uuid, "Test API", "v1.0", base_path);
    spec.operations[0].methods[0].rate_limit =
        Some(RateLimitPolicySpec { unit: "MINUTE".to_string(), requests_per_unit: 10 });
    spec.rate_limit = Some(RateLimitPolicySpec { unit: "HOUR".to_string(), requests_per_unit: 1000 });
    spec
}

fn published_ratelimit_tree(controller: &GatewayController) -> RateLimitConfigTree {
    let snapshot = controller.ratelimit_cache().snapshot("default").expect("snapshot");
    let resources = snapshot.resources_of(ResourceKind::RateLimitConfig);
    assert_eq!(resources.len(), 1);
    serde_json::from_slice(&resources[0].body.value).expect("decodes")
}

#[test]
fn flattened_descriptors_group_both_apis_under_one_vhost() {
    let controller = controller();
    for (uuid, base_path) in [("uuid-1", "/test-api/v1.0"), ("uuid-2", "/mock-api/v1.0")] {
        let outcome = controller.deploy(
            rate_limited_spec(uuid, base_path),
            &["gw.com".to_string()],
            &default_labels(),
        );
        assert!(outcome.errors.is_empty());
    }
    controller.update_caches_on_api_change(&default_labels());

    let tree = published_ratelimit_tree(&controller);
    assert_eq!(tree.domain, "Default");
    assert_eq!(tree.descriptors.len(), 1);
    let org = &tree.descriptors[0];
    assert_eq!(org.value(), "org1");
    assert_eq!(org.children().len(), 1);
    let vhost = &org.children()[0];
    assert_eq!(vhost.value(), "gw.com");

    // Sibling order is unstable; compare the path values as a set.
    let mut paths: Vec<&str> = vhost.children().iter().map(|d| d.value()).collect();
    paths.sort_unstable();
    assert_eq!(
        paths,
        vec!["/mock-api/v1.0", "/mock-api/v1.0/orders", "/test-api/v1.0", "/test-api/v1.0/orders"]
    );
}

#[test]
fn custom_policy_set_is_a_replacement() {
    let controller = controller();
    let policy = |value: &str, count: u32| CustomRateLimitPolicy {
        organization_id: "org1".to_string(),
        key: "tier".to_string(),
        value: value.to_string(),
        policy: RateLimitPolicySpec { unit: "MINUTE".to_string(), requests_per_unit: count },
    };

    controller.set_custom_rate_limit_policies(&[policy("gold", 1000)]);
    controller.update_caches_on_api_change(&default_labels());
    controller.set_custom_rate_limit_policies(&[policy("silver", 100)]);
    controller.update_caches_on_api_change(&default_labels());

    let tree = published_ratelimit_tree(&controller);
    assert_eq!(tree.descriptors.len(), 1);
    let org = &tree.descriptors[0];
    assert_eq!(org.children().len(), 1);
    assert_eq!(org.children()[0].value(), "silver");
}

#[test]
fn enforcer_receives_api_descriptors_for_the_label() {
    let controller = controller();
    controller.deploy(
        api_spec("api-1-uuid", "Test API", "v1.0", "/test-api/v1.0"),
        &["gw.com".to_string()],
        &default_labels(),
    );
    controller.update_caches_on_api_change(&default_labels());

    let snapshot = controller.enforcer().apis().snapshot("default").expect("snapshot");
    let resources = snapshot.resources_of(ResourceKind::EnforcerApi);
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].name, "gw.com:api-1-uuid");

    let api: serde_json::Value = serde_json::from_slice(&resources[0].body.value).expect("decodes");
    assert_eq!(api["name"], "Test API");
    assert_eq!(api["vhost"], "gw.com");
}

#[test]
fn proxy_snapshot_is_complete_and_consistent() {
    let controller = controller();
    controller.deploy(
        api_spec("api-1-uuid", "Test API", "v1.0", "/test-api/v1.0"),
        &["gw.com".to_string()],
        &default_labels(),
    );
    assert!(controller.update_caches_on_api_change(&default_labels()));

    let snapshot = controller.proxy_cache().snapshot("default").expect("snapshot");
    assert_eq!(snapshot.resources_of(ResourceKind::Listener).len(), 1);
    assert_eq!(snapshot.resources_of(ResourceKind::Route).len(), 1);
    assert_eq!(snapshot.resources_of(ResourceKind::Cluster).len(), 1);
    assert_eq!(snapshot.resources_of(ResourceKind::Endpoint).len(), 1);
    assert!(snapshot.consistent().is_ok());
}
