//! Deterministic names for synthesized resources.
//!
//! These names double as identity keys across translation passes: a filter
//! entry already present under its computed name is never appended again.
//! Every function here is pure.

use crate::ir::{Api, RouteRule, Stage};

/// `{tenant}_cluster{Stage}_{listenerHost}_{apiDisplayName}{apiVersion}[_{ruleDiscriminator}]`
///
/// Whitespace is removed from the display name.
pub fn cluster_name(
    tenant: &str,
    stage: Stage,
    listener_host: &str,
    api: &Api,
    rule_discriminator: Option<&str>,
) -> String {
    let mut name = format!(
        "{}_cluster{}_{}_{}",
        tenant,
        stage.cluster_token(),
        listener_host,
        api_cluster_key(api)
    );
    if let Some(discriminator) = rule_discriminator {
        name.push('_');
        name.push_str(discriminator);
    }
    name
}

/// `{apiDisplayName}{apiVersion}` with whitespace removed from the display name
pub fn api_cluster_key(api: &Api) -> String {
    let display_name: String = api.display_name.chars().filter(|c| !c.is_whitespace()).collect();
    format!("{}{}", display_name, api.version)
}

/// Rule name when set, otherwise `rule{index}`
pub fn rule_discriminator(rule: &RouteRule, index: usize) -> String {
    match rule.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("rule{}", index),
    }
}

/// `{namespace}/{api}/{ruleDiscriminator}`
pub fn route_owner_name(api: &Api, rule: &RouteRule, index: usize) -> String {
    format!("{}/{}/{}", api.namespace, api.name, rule_discriminator(rule, index))
}

/// Name of one Envoy route: owner, stage and match position
pub fn envoy_route_name(owner: &str, stage: Stage, match_index: usize) -> String {
    format!("{}/{}/match/{}", owner, stage.as_str(), match_index)
}

/// `{filterType}_{ownerRouteName}`
pub fn per_route_filter_name(filter_type: &str, owner_route_name: &str) -> String {
    format!("{}_{}", filter_type, owner_route_name)
}

/// Cluster serving a remote JWKS endpoint
pub fn jwks_cluster_name(host: &str, port: u16) -> String {
    format!("jwks_{}_{}", host.replace('.', "_"), port)
}

/// Virtual host per listener and stage
pub fn virtual_host_name(listener: &str, stage: Stage) -> String {
    format!("{}_{}", listener, stage.as_str())
}
