//! Floating version-alias routing.
//!
//! When several semantic versions of one API are deployed at the same vhost,
//! the latest version under each major (`/v1`) and minor (`/v1.2`) range
//! answers for the whole range. The registry tracks the current winner per
//! range; the rewrite functions mutate the deployed route regexes in place
//! whenever a winner changes, so the floating alias always points at the
//! correct concrete version. Getting this wrong produces silently wrong
//! routing, so the regex construction rules are pinned by tests.

use std::collections::HashMap;

use envoy_types::pb::envoy::config::route::v3::{route, route_match, Route};
use tracing::{error, warn};

use crate::semver::SemanticVersion;
use crate::xds::deployment::DeployedApi;
use crate::xds::identifier::{extract_vhost, generate_api_range_identifier};

/// Regex matching exactly one version string: dots escaped, nothing else.
pub fn version_match_regex(version: &str) -> String {
    version.replace('.', "\\.")
}

/// Regex matching any patch under the version's minor range.
///
/// Without a patch component this is just the exact-version regex; with one,
/// the patch becomes optional: `v1.2.3` -> `v1\.2(?:\.3)?`.
pub fn minor_range_regex(version: &SemanticVersion) -> String {
    match version.patch {
        None => version_match_regex(version.raw()),
        Some(patch) => {
            format!("v{}\\.{}(?:\\.{})?", version.major, version.minor, patch)
        }
    }
}

/// Regex matching any minor/patch under the version's major range:
/// `v1.2` -> `v1(?:\.2)?`, `v1.2.3` -> `v1(?:\.2(?:\.3)?)?`.
pub fn major_minor_range_regex(version: &SemanticVersion) -> String {
    match version.patch {
        None => format!("v{}(?:\\.{})?", version.major, version.minor),
        Some(patch) => {
            format!("v{}(?:\\.{}(?:\\.{})?)?", version.major, version.minor, patch)
        }
    }
}

/// Winner bookkeeping per `(organization, vhost:api-name)` range.
///
/// Only current winners are retained; when a winner is undeployed the new
/// winner is re-derived by scanning the remaining sibling records.
#[derive(Debug, Default)]
pub struct VersionRegistry {
    orgs: HashMap<String, HashMap<String, HashMap<String, SemanticVersion>>>,
}

impl VersionRegistry {
    /// Current winner of `range_key` (e.g. `v1` or `v1.2`) for the range.
    pub fn winner(&self, org: &str, range_id: &str, range_key: &str) -> Option<&SemanticVersion> {
        self.orgs.get(org)?.get(range_id)?.get(range_key)
    }

    pub fn set(&mut self, org: &str, range_id: &str, range_key: String, version: SemanticVersion) {
        self.orgs
            .entry(org.to_string())
            .or_default()
            .entry(range_id.to_string())
            .or_default()
            .insert(range_key, version);
    }

    pub fn remove_key(&mut self, org: &str, range_id: &str, range_key: &str) {
        if let Some(ranges) = self.orgs.get_mut(org) {
            if let Some(winners) = ranges.get_mut(range_id) {
                winners.remove(range_key);
            }
        }
    }

    /// Drop the range when it has no winners left, and the organization when
    /// it has no ranges left.
    pub fn cleanup(&mut self, org: &str, range_id: &str) {
        if let Some(ranges) = self.orgs.get_mut(org) {
            if ranges.get(range_id).is_some_and(HashMap::is_empty) {
                ranges.remove(range_id);
            }
            if ranges.is_empty() {
                self.orgs.remove(org);
            }
        }
    }

    pub fn contains_range(&self, org: &str, range_id: &str) -> bool {
        self.orgs.get(org).is_some_and(|ranges| ranges.contains_key(range_id))
    }

    pub fn is_empty(&self) -> bool {
        self.orgs.is_empty()
    }
}

/// Replace the first occurrence of `needle` in `haystack`.
///
/// The caller relies on the pattern appearing exactly once; zero or multiple
/// occurrences indicate the stored regex drifted from the expected shape, so
/// both are logged instead of silently trusted.
fn replace_version_pattern(haystack: &str, needle: &str, replacement: &str) -> String {
    let occurrences = haystack.matches(needle).count();
    if occurrences != 1 {
        warn!(
            occurrences,
            pattern = %needle,
            regex = %haystack,
            "Version pattern occurs an unexpected number of times in route regex"
        );
    }
    haystack.replacen(needle, replacement, 1)
}

/// Rewrite the match regex and the rewrite-substitution regex of every route,
/// replacing the first occurrence of `old_pattern` with `new_pattern`.
fn rewrite_routes(routes: &mut [Route], old_pattern: &str, new_pattern: &str) {
    for envoy_route in routes.iter_mut() {
        if let Some(route_match) = envoy_route.r#match.as_mut() {
            if let Some(route_match::PathSpecifier::SafeRegex(matcher)) =
                route_match.path_specifier.as_mut()
            {
                matcher.regex = replace_version_pattern(&matcher.regex, old_pattern, new_pattern);
            }
        }
        if let Some(route::Action::Route(action)) = envoy_route.action.as_mut() {
            if let Some(rewrite) = action.regex_rewrite.as_mut() {
                if let Some(pattern) = rewrite.pattern.as_mut() {
                    pattern.regex =
                        replace_version_pattern(&pattern.regex, old_pattern, new_pattern);
                }
            }
        }
    }
}

/// Adjust routing rules after `api_identifier` was deployed (or re-deployed)
/// with `api_version`.
///
/// Previous winners the new version displaces get their routes demoted
/// (major-range alias narrows to a minor-range alias, minor-range alias
/// narrows to an exact match), then the new version's own routes are widened
/// to the alias ranges it now owns. The record for `api_identifier` must
/// already be present in `org_apis`.
pub(crate) fn update_routing_rules_on_api_update(
    org_apis: &mut HashMap<String, DeployedApi>,
    registry: &mut VersionRegistry,
    org: &str,
    api_identifier: &str,
    api_name: &str,
    api_version: &str,
    vhost: &str,
) {
    let api_sem: SemanticVersion = match api_version.parse() {
        Ok(parsed) => parsed,
        Err(e) => {
            // Non-semantic versions route by their exact version string only.
            warn!(org = %org, api = %api_name, error = %e, "Skipping version-alias routing");
            return;
        }
    };

    let range_id = generate_api_range_identifier(vhost, api_name);
    let major_key = api_sem.major_range_key();
    let minor_key = api_sem.minor_range_key();

    let existing_major = registry.winner(org, &range_id, &major_key).cloned();
    let existing_minor = registry.winner(org, &range_id, &minor_key).cloned();
    let is_latest_major = existing_major.as_ref().is_none_or(|winner| api_sem >= *winner);
    let is_latest_minor = existing_minor.as_ref().is_none_or(|winner| api_sem >= *winner);

    // Demote the routes of the winners this version displaces.
    if (existing_major.is_some() || existing_minor.is_some())
        && (is_latest_major || is_latest_minor)
    {
        for (identifier, record) in org_apis.iter_mut() {
            if record.spec.name != api_name {
                continue;
            }
            match extract_vhost(identifier) {
                Ok(record_vhost) if record_vhost == vhost => {}
                Ok(_) => continue,
                Err(e) => {
                    error!(org = %org, error = %e, "Skipping record with malformed identifier");
                    continue;
                }
            }

            if is_latest_major {
                if let Some(old_major) = existing_major.as_ref() {
                    if record.spec.version == old_major.raw() {
                        rewrite_routes(
                            &mut record.routes,
                            &major_minor_range_regex(old_major),
                            &minor_range_regex(old_major),
                        );
                    }
                }
            }
            if is_latest_minor {
                if let Some(old_minor) = existing_minor.as_ref() {
                    if record.spec.version == old_minor.raw() {
                        rewrite_routes(
                            &mut record.routes,
                            &minor_range_regex(old_minor),
                            &version_match_regex(old_minor.raw()),
                        );
                    }
                }
            }
        }
    }

    // Record the new winners and widen the new version's own routes.
    if is_latest_major || is_latest_minor {
        registry.set(org, &range_id, minor_key, api_sem.clone());
        if is_latest_major {
            registry.set(org, &range_id, major_key, api_sem.clone());
        }

        if let Some(record) = org_apis.get_mut(api_identifier) {
            let exact = version_match_regex(api_sem.raw());
            let alias = if is_latest_major {
                major_minor_range_regex(&api_sem)
            } else {
                minor_range_regex(&api_sem)
            };
            rewrite_routes(&mut record.routes, &exact, &alias);
        }
    }
}

/// Adjust routing rules after the API behind `api_identifier` was removed.
///
/// If the removed version owned the major or minor alias of its range, the
/// highest remaining sibling is promoted (its routes widened to the alias it
/// inherits); with no sibling left the alias entry is dropped.
pub(crate) fn update_routing_rules_on_api_delete(
    org_apis: &mut HashMap<String, DeployedApi>,
    registry: &mut VersionRegistry,
    org: &str,
    api_identifier: &str,
    api_name: &str,
    api_version: &str,
) {
    let vhost = match extract_vhost(api_identifier) {
        Ok(vhost) => vhost.to_string(),
        Err(e) => {
            error!(org = %org, error = %e, "Cannot update routing rules for removed API");
            return;
        }
    };
    let range_id = generate_api_range_identifier(&vhost, api_name);
    if !registry.contains_range(org, &range_id) {
        return;
    }
    let Ok(deleted_sem) = api_version.parse::<SemanticVersion>() else {
        return;
    };

    let major_key = deleted_sem.major_range_key();
    let mut promoted_major_identifier: Option<String> = None;

    if registry
        .winner(org, &range_id, &major_key)
        .is_some_and(|winner| winner.raw() == api_version)
    {
        let new_major = highest_sibling(org_apis, api_identifier, api_name, &vhost, |candidate| {
            candidate.major == deleted_sem.major
        });
        match new_major {
            Some((identifier, version)) => {
                registry.set(org, &range_id, major_key, version.clone());
                if let Some(record) = org_apis.get_mut(&identifier) {
                    // The heir may have held its own minor-range alias; narrow
                    // that to an exact match before widening to the major range.
                    rewrite_routes(
                        &mut record.routes,
                        &minor_range_regex(&version),
                        &version_match_regex(version.raw()),
                    );
                    rewrite_routes(
                        &mut record.routes,
                        &version_match_regex(version.raw()),
                        &major_minor_range_regex(&version),
                    );
                }
                promoted_major_identifier = Some(identifier);
            }
            None => registry.remove_key(org, &range_id, &major_key),
        }
    }

    let minor_key = deleted_sem.minor_range_key();
    if registry
        .winner(org, &range_id, &minor_key)
        .is_some_and(|winner| winner.raw() == api_version)
    {
        let new_minor = highest_sibling(org_apis, api_identifier, api_name, &vhost, |candidate| {
            candidate.major == deleted_sem.major && candidate.minor == deleted_sem.minor
        });
        match new_minor {
            Some((identifier, version))
                if promoted_major_identifier.as_deref() != Some(identifier.as_str()) =>
            {
                registry.set(org, &range_id, minor_key, version.clone());
                if let Some(record) = org_apis.get_mut(&identifier) {
                    rewrite_routes(
                        &mut record.routes,
                        &version_match_regex(version.raw()),
                        &minor_range_regex(&version),
                    );
                }
            }
            Some(_) => {
                // The same record just inherited the major alias, which
                // already covers the minor range.
                registry.remove_key(org, &range_id, &minor_key);
            }
            None => registry.remove_key(org, &range_id, &minor_key),
        }
    }

    registry.cleanup(org, &range_id);
}

/// Highest remaining sibling version in the range, excluding the record
/// being removed. Ties resolve to whichever record is seen last, matching
/// the `>=` winner comparison used on deploy.
fn highest_sibling(
    org_apis: &HashMap<String, DeployedApi>,
    excluded_identifier: &str,
    api_name: &str,
    vhost: &str,
    in_range: impl Fn(&SemanticVersion) -> bool,
) -> Option<(String, SemanticVersion)> {
    let mut best: Option<(String, SemanticVersion)> = None;
    for (identifier, record) in org_apis {
        if identifier == excluded_identifier || record.spec.name != api_name {
            continue;
        }
        if extract_vhost(identifier).map(|record_vhost| record_vhost != vhost).unwrap_or(true) {
            continue;
        }
        let Ok(candidate) = record.spec.version.parse::<SemanticVersion>() else {
            continue;
        };
        if !in_range(&candidate) {
            continue;
        }
        if best.as_ref().is_none_or(|(_, current)| candidate >= *current) {
            best = Some((identifier.clone(), candidate));
        }
    }
    best
}
