//! Route synthesis using envoy-types
//!
//! Path matches always compile to anchored `safe_regex` matchers so that
//! prefix semantics are segment aware: `/orders` matches `/orders` and
//! `/orders/42` but never `/ordersummary`.

use envoy_types::pb::envoy::config::core::v3::{
    header_value_option::HeaderAppendAction, HeaderValue, HeaderValueOption,
};
use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier, route, route_action, route_match::PathSpecifier,
    HeaderMatcher, Route, RouteAction, RouteMatch, VirtualHost,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{
    string_matcher::MatchPattern, RegexMatchAndSubstitute, RegexMatcher, StringMatcher,
};
use tracing::{debug, warn};

use crate::config::TranslatorConfig;
use crate::errors::{Error, Partial, Result};
use crate::ir::{
    Api, HeaderModifier, HttpListener, PathMatch, PathMatchType, PathModifier, RouteFilter,
    RouteRule, Stage,
};
use crate::xds::cluster::rule_cluster_target;
use crate::xds::naming;

/// Matches any deeper path segment after a prefix
const SUB_PATH_SUFFIX: &str = "(/.*)*";

/// Where a synthesized route came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteOrigin {
    pub api_index: usize,
    pub rule_index: usize,
    pub stage: Stage,
    pub match_index: usize,
}

/// Synthesized routes with an index-correlated origin list
#[derive(Debug, Clone, Default)]
pub struct RouteSet {
    pub routes: Vec<Route>,
    pub origins: Vec<RouteOrigin>,
}

impl RouteSet {
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn push(&mut self, route: Route, origin: RouteOrigin) {
        self.routes.push(route);
        self.origins.push(origin);
    }

    pub fn extend(&mut self, other: RouteSet) {
        self.routes.extend(other.routes);
        self.origins.extend(other.origins);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Route, &RouteOrigin)> {
        self.routes.iter().zip(self.origins.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&mut Route, &RouteOrigin)> {
        self.routes.iter_mut().zip(self.origins.iter())
    }

    /// Routes of one stage, in synthesis order
    pub fn for_stage(&self, stage: Stage) -> Vec<Route> {
        self.iter().filter(|(_, origin)| origin.stage == stage).map(|(r, _)| r.clone()).collect()
    }
}

/// Escape RE2 metacharacters in a literal path.
pub fn escape_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        if matches!(
            c,
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// `^{path}(/.*)*` with any trailing slash dropped
pub fn prefix_regex(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    format!("^{}{}", escape_path(trimmed), SUB_PATH_SUFFIX)
}

/// `^{path}$`
pub fn exact_regex(path: &str) -> String {
    format!("^{}$", escape_path(path))
}

/// Anchor a user supplied pattern and check that it compiles.
pub fn anchored_regex(pattern: &str) -> Result<String> {
    let mut anchored = String::with_capacity(pattern.len() + 2);
    if !pattern.starts_with('^') {
        anchored.push('^');
    }
    anchored.push_str(pattern);
    if !pattern.ends_with('$') {
        anchored.push('$');
    }
    regex::Regex::new(&anchored)
        .map_err(|e| Error::invalid_input(format!("Invalid path regex '{}': {}", pattern, e)))?;
    Ok(anchored)
}

/// Regex matching a rule path, relative to the API base path for literals
pub fn path_regex(api: &Api, path_match: &PathMatch) -> Result<String> {
    match path_match.kind {
        PathMatchType::PathPrefix => Ok(prefix_regex(&api.full_path(&path_match.value))),
        PathMatchType::Exact => Ok(exact_regex(&api.full_path(&path_match.value))),
        PathMatchType::RegularExpression => anchored_regex(&path_match.value),
    }
}

fn to_envoy_route_match(regex: String, method: Option<&str>) -> RouteMatch {
    let mut route_match = RouteMatch {
        path_specifier: Some(PathSpecifier::SafeRegex(RegexMatcher {
            regex,
            ..Default::default()
        })),
        ..Default::default()
    };

    if let Some(method) = method {
        route_match.headers.push(HeaderMatcher {
            name: ":method".to_string(),
            header_match_specifier: Some(HeaderMatchSpecifier::StringMatch(StringMatcher {
                match_pattern: Some(MatchPattern::Exact(method.to_ascii_uppercase())),
                ignore_case: false,
            })),
            ..Default::default()
        });
    }

    route_match
}

/// Regex rewrite replacing the matched literal with `replacement`.
///
/// An empty replacement behaves like `/` so the rewritten path is never empty.
fn prefix_rewrite(matched: &str, replacement: &str) -> RegexMatchAndSubstitute {
    let trimmed = matched.trim_end_matches('/');
    let (pattern, substitution) = if replacement.is_empty() || replacement == "/" {
        // Collapse the prefix with its trailing slashes so `/orders/42` becomes `/42`.
        (format!("^{}/*", escape_path(trimmed)), "/".to_string())
    } else {
        (format!("^{}", escape_path(trimmed)), replacement.trim_end_matches('/').to_string())
    };

    RegexMatchAndSubstitute {
        pattern: Some(RegexMatcher { regex: pattern, ..Default::default() }),
        substitution,
    }
}

fn full_path_rewrite(replacement: &str) -> RegexMatchAndSubstitute {
    RegexMatchAndSubstitute {
        pattern: Some(RegexMatcher { regex: "^.*$".to_string(), ..Default::default() }),
        substitution: replacement.to_string(),
    }
}

fn header_option(name: &str, value: &str, action: HeaderAppendAction) -> HeaderValueOption {
    HeaderValueOption {
        header: Some(HeaderValue {
            key: name.to_string(),
            value: value.to_string(),
            ..Default::default()
        }),
        append_action: action as i32,
        ..Default::default()
    }
}

fn header_options(modifier: &HeaderModifier) -> Vec<HeaderValueOption> {
    let set = modifier
        .set
        .iter()
        .map(|h| header_option(&h.name, &h.value, HeaderAppendAction::OverwriteIfExistsOrAdd));
    let add = modifier
        .add
        .iter()
        .map(|h| header_option(&h.name, &h.value, HeaderAppendAction::AppendIfExistsOrAdd));
    set.chain(add).collect()
}

/// Builds Envoy routes from the IR.
pub struct RouteSynthesizer<'a> {
    config: &'a TranslatorConfig,
}

impl<'a> RouteSynthesizer<'a> {
    pub fn new(config: &'a TranslatorConfig) -> Self {
        Self { config }
    }

    /// Routes for every API on the listener
    pub fn synthesize(&self, listener: &HttpListener) -> Partial<RouteSet> {
        let mut result = Partial::new(RouteSet::default());
        for (api_index, api) in listener.apis.iter().enumerate() {
            let routes = result.absorb(self.synthesize_api(api_index, api));
            result.value.extend(routes);
        }
        result
    }

    /// Routes in rule order, then stage (production first), then match order.
    ///
    /// A rule yields one route per path match for every stage that has at
    /// least one declared backend, whether or not those backends resolve.
    pub fn synthesize_api(&self, api_index: usize, api: &Api) -> Partial<RouteSet> {
        let mut result = Partial::new(RouteSet::default());

        for (rule_index, rule) in api.rules.iter().enumerate() {
            let owner = naming::route_owner_name(api, rule, rule_index);
            for stage in Stage::ALL {
                let Some(target) = rule_cluster_target(self.config, api, rule, rule_index, stage)
                else {
                    continue;
                };

                for (match_index, path_match) in rule.matches.iter().enumerate() {
                    let name = naming::envoy_route_name(&owner, stage, match_index);
                    match self.build_route(api, rule, path_match, &name, &target.name) {
                        Ok(route) => result.value.push(
                            route,
                            RouteOrigin { api_index, rule_index, stage, match_index },
                        ),
                        Err(error) => {
                            warn!(route = %name, error = %error, "Skipping route");
                            result.push_error(error);
                        }
                    }
                }
            }
        }

        debug!(
            api = %api.name,
            routes = result.value.len(),
            errors = result.errors.len(),
            "Synthesized routes"
        );
        result
    }

    fn build_route(
        &self,
        api: &Api,
        rule: &RouteRule,
        path_match: &PathMatch,
        name: &str,
        cluster: &str,
    ) -> Result<Route> {
        let regex = path_regex(api, path_match)?;

        #[allow(deprecated)]
        let mut action = RouteAction {
            cluster_specifier: Some(route_action::ClusterSpecifier::Cluster(cluster.to_string())),
            ..Default::default()
        };

        let mut route = Route {
            name: name.to_string(),
            r#match: Some(to_envoy_route_match(regex, path_match.method.as_deref())),
            ..Default::default()
        };

        for filter in &rule.filters {
            match filter {
                RouteFilter::UrlRewrite(rewrite) => {
                    if let Some(hostname) = &rewrite.hostname {
                        action.host_rewrite_specifier =
                            Some(route_action::HostRewriteSpecifier::HostRewriteLiteral(
                                hostname.clone(),
                            ));
                    }
                    match &rewrite.path {
                        Some(PathModifier::ReplacePrefixMatch { value }) => {
                            if path_match.kind == PathMatchType::RegularExpression {
                                return Err(Error::invalid_input(format!(
                                    "Route '{}': prefix replacement needs a literal path match",
                                    name
                                )));
                            }
                            let matched = api.full_path(&path_match.value);
                            action.regex_rewrite = Some(prefix_rewrite(&matched, value));
                        }
                        Some(PathModifier::ReplaceFullPath { value }) => {
                            action.regex_rewrite = Some(full_path_rewrite(value));
                        }
                        None => {}
                    }
                }
                RouteFilter::RequestHeaderModifier(modifier) => {
                    route.request_headers_to_add.extend(header_options(modifier));
                    route.request_headers_to_remove.extend(modifier.remove.iter().cloned());
                }
                RouteFilter::ResponseHeaderModifier(modifier) => {
                    route.response_headers_to_add.extend(header_options(modifier));
                    route.response_headers_to_remove.extend(modifier.remove.iter().cloned());
                }
                // Enabled later by the filter patch pass.
                RouteFilter::Policy { .. } => {}
            }
        }

        route.action = Some(route::Action::Route(action));
        Ok(route)
    }

    /// One virtual host per stage that has routes; the health route goes first.
    pub fn virtual_hosts(
        &self,
        listener: &HttpListener,
        routes: &RouteSet,
        health: Option<&Route>,
    ) -> Vec<VirtualHost> {
        Stage::ALL
            .into_iter()
            .filter_map(|stage| {
                let stage_routes = routes.for_stage(stage);
                if stage_routes.is_empty() {
                    return None;
                }
                let mut all = Vec::with_capacity(stage_routes.len() + 1);
                all.extend(health.cloned());
                all.extend(stage_routes);
                Some(VirtualHost {
                    name: naming::virtual_host_name(&listener.name, stage),
                    domains: self.config.domains(stage).to_vec(),
                    routes: all,
                    ..Default::default()
                })
            })
            .collect()
    }
}

/// Path regex of a synthesized route, if it uses one
pub fn route_regex(route: &Route) -> Option<&str> {
    match route.r#match.as_ref()?.path_specifier.as_ref()? {
        PathSpecifier::SafeRegex(matcher) => Some(matcher.regex.as_str()),
        _ => None,
    }
}

/// Target cluster of a synthesized route
pub fn route_cluster(route: &Route) -> Option<&str> {
    match route.action.as_ref()? {
        route::Action::Route(action) => match action.cluster_specifier.as_ref()? {
            route_action::ClusterSpecifier::Cluster(name) => Some(name.as_str()),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BackendRef, BackendSet, HttpHeader, StageBackends, UrlRewrite};

    fn api(rules: Vec<RouteRule>) -> Api {
        Api {
            name: "test-api".into(),
            namespace: "default".into(),
            display_name: "test-api".into(),
            version: "1.0.0".into(),
            base_path: "/test-api/1.0.0".into(),
            rules,
            backends: StageBackends::production(BackendSet::new(vec![BackendRef::new("svc", 80)])),
            policies: vec![],
        }
    }

    fn route_action(route: &Route) -> &RouteAction {
        match route.action.as_ref().unwrap() {
            route::Action::Route(action) => action,
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn prefix_regex_is_segment_aware() {
        let regex = prefix_regex("/test-api/1.0.0/orders/");
        assert_eq!(regex, r"^/test-api/1\.0\.0/orders(/.*)*");

        let compiled = regex::Regex::new(&format!("{}$", regex)).unwrap();
        assert!(compiled.is_match("/test-api/1.0.0/orders"));
        assert!(compiled.is_match("/test-api/1.0.0/orders/42/items"));
        assert!(!compiled.is_match("/test-api/1.0.0/ordersummary"));
        assert!(!compiled.is_match("/test-api/1x0x0/orders"));
    }

    #[test]
    fn distinct_prefixes_give_distinct_regexes() {
        assert_eq!(prefix_regex("/orders"), "^/orders(/.*)*");
        assert_eq!(prefix_regex("/users"), "^/users(/.*)*");
        assert_ne!(prefix_regex("/orders"), prefix_regex("/users"));
    }

    #[test]
    fn exact_and_regex_matches_are_anchored() {
        assert_eq!(exact_regex("/health"), "^/health$");
        assert_eq!(anchored_regex("/items/[0-9]+").unwrap(), "^/items/[0-9]+$");
        assert_eq!(anchored_regex("^/items$").unwrap(), "^/items$");
        assert!(matches!(anchored_regex("/items/(").unwrap_err(), Error::InvalidInput { .. }));
    }

    #[test]
    fn routes_bind_to_rule_clusters_in_order() {
        let config = TranslatorConfig::default();
        let users = StageBackends {
            production: BackendSet::new(vec![BackendRef::new("users", 80)]),
            sandbox: BackendSet::new(vec![BackendRef::new("users-sandbox", 80)]),
        };
        let api = api(vec![
            RouteRule::new(vec![PathMatch::prefix("/orders"), PathMatch::exact("/orders/count")]),
            RouteRule::new(vec![PathMatch::prefix("/users")]).with_backends(users),
        ]);

        let result = RouteSynthesizer::new(&config).synthesize_api(0, &api);
        assert!(result.is_complete());
        let set = result.value;

        let summary: Vec<(usize, Stage, usize)> =
            set.origins.iter().map(|o| (o.rule_index, o.stage, o.match_index)).collect();
        assert_eq!(
            summary,
            vec![
                (0, Stage::Production, 0),
                (0, Stage::Production, 1),
                (1, Stage::Production, 0),
                (1, Stage::Sandbox, 0),
            ]
        );

        assert_eq!(route_regex(&set.routes[0]), Some(r"^/test-api/1\.0\.0/orders(/.*)*"));
        assert_eq!(route_regex(&set.routes[1]), Some(r"^/test-api/1\.0\.0/orders/count$"));
        assert_eq!(
            route_cluster(&set.routes[0]),
            Some("carbon.super_clusterProd_prod.gw.wso2.com_test-api1.0.0")
        );
        assert_eq!(
            route_cluster(&set.routes[3]),
            Some("carbon.super_clusterSand_localhost_test-api1.0.0_rule1")
        );
        assert_eq!(set.routes[0].name, "default/test-api/rule0/production/match/0");
    }

    #[test]
    fn prefix_rewrite_keeps_remainder() {
        let config = TranslatorConfig::default();
        let rule = RouteRule::new(vec![PathMatch::prefix("/orders")]).with_filter(
            RouteFilter::UrlRewrite(UrlRewrite {
                hostname: Some("orders.internal".into()),
                path: Some(PathModifier::ReplacePrefixMatch { value: "/v2/orders".into() }),
            }),
        );
        let set = RouteSynthesizer::new(&config).synthesize_api(0, &api(vec![rule])).value;

        let action = route_action(&set.routes[0]);
        let rewrite = action.regex_rewrite.as_ref().unwrap();
        let pattern = &rewrite.pattern.as_ref().unwrap().regex;
        assert_eq!(pattern, r"^/test-api/1\.0\.0/orders");
        assert_eq!(rewrite.substitution, "/v2/orders");
        assert_eq!(
            action.host_rewrite_specifier,
            Some(route_action::HostRewriteSpecifier::HostRewriteLiteral("orders.internal".into()))
        );

        let rewritten = regex::Regex::new(pattern)
            .unwrap()
            .replace("/test-api/1.0.0/orders/7", rewrite.substitution.as_str())
            .into_owned();
        assert_eq!(rewritten, "/v2/orders/7");
    }

    #[test]
    fn root_prefix_rewrite_collapses_slashes() {
        let rewrite = prefix_rewrite("/orders", "/");
        let pattern = regex::Regex::new(&rewrite.pattern.unwrap().regex).unwrap();
        assert_eq!(pattern.replace("/orders/42", "/"), "/42");
        assert_eq!(pattern.replace("/orders", "/"), "/");
    }

    #[test]
    fn empty_prefix_replacement_rewrites_to_root() {
        let rewrite = prefix_rewrite("/orders", "");
        assert_eq!(rewrite.substitution, "/");

        let pattern = regex::Regex::new(&rewrite.pattern.unwrap().regex).unwrap();
        assert_eq!(pattern.replace("/orders", rewrite.substitution.as_str()), "/");
        assert_eq!(pattern.replace("/orders/7", rewrite.substitution.as_str()), "/7");
    }

    #[test]
    fn prefix_rewrite_on_regex_match_is_rejected() {
        let config = TranslatorConfig::default();
        let rules = vec![
            RouteRule::new(vec![PathMatch::regex("/a/[0-9]+")]).with_filter(RouteFilter::UrlRewrite(
                UrlRewrite {
                    hostname: None,
                    path: Some(PathModifier::ReplacePrefixMatch { value: "/".into() }),
                },
            )),
            RouteRule::new(vec![PathMatch::prefix("/b")]),
        ];
        let result = RouteSynthesizer::new(&config).synthesize_api(0, &api(rules));
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.value.len(), 1);
        assert_eq!(result.value.origins[0].rule_index, 1);
    }

    #[test]
    fn header_modifiers_and_method_match() {
        let config = TranslatorConfig::default();
        let rule = RouteRule::new(vec![PathMatch::prefix("/orders").with_method("post")])
            .with_filter(RouteFilter::RequestHeaderModifier(HeaderModifier {
                set: vec![HttpHeader { name: "x-env".into(), value: "prod".into() }],
                add: vec![HttpHeader { name: "x-trace".into(), value: "1".into() }],
                remove: vec!["x-internal".into()],
            }))
            .with_filter(RouteFilter::ResponseHeaderModifier(HeaderModifier {
                remove: vec!["server".into()],
                ..Default::default()
            }));
        let set = RouteSynthesizer::new(&config).synthesize_api(0, &api(vec![rule])).value;
        let route = &set.routes[0];

        assert_eq!(route.request_headers_to_add.len(), 2);
        assert_eq!(
            route.request_headers_to_add[0].append_action,
            HeaderAppendAction::OverwriteIfExistsOrAdd as i32
        );
        assert_eq!(
            route.request_headers_to_add[1].append_action,
            HeaderAppendAction::AppendIfExistsOrAdd as i32
        );
        assert_eq!(route.request_headers_to_remove, vec!["x-internal".to_string()]);
        assert_eq!(route.response_headers_to_remove, vec!["server".to_string()]);

        let headers = &route.r#match.as_ref().unwrap().headers;
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].name, ":method");
    }

    #[test]
    fn unresolvable_backends_still_route() {
        let config = TranslatorConfig::default();
        let rule = RouteRule::new(vec![PathMatch::prefix("/ghost")]).with_backends(
            StageBackends::production(BackendSet::new(vec![BackendRef::new("nowhere", 80)])),
        );
        // Route synthesis never consults the resolver.
        let set = RouteSynthesizer::new(&config).synthesize_api(0, &api(vec![rule])).value;
        assert_eq!(set.len(), 1);
        assert_eq!(
            route_cluster(&set.routes[0]),
            Some("carbon.super_clusterProd_prod.gw.wso2.com_test-api1.0.0_rule0")
        );
    }

    #[test]
    fn virtual_hosts_per_stage() {
        let config = TranslatorConfig::default();
        let listener = HttpListener::new(
            "gw",
            vec![api(vec![RouteRule::new(vec![PathMatch::prefix("/orders")])])],
        );
        let synthesizer = RouteSynthesizer::new(&config);
        let routes = synthesizer.synthesize(&listener).value;
        let health = crate::xds::health::health_route();

        let hosts = synthesizer.virtual_hosts(&listener, &routes, Some(&health));
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].name, "gw_production");
        assert_eq!(hosts[0].domains, vec!["prod.gw.wso2.com".to_string()]);
        assert_eq!(hosts[0].routes[0].name, "/health");
        assert_eq!(hosts[0].routes.len(), 2);
    }
}
