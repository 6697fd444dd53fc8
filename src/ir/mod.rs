//! Intermediate representation consumed by the synthesizers.
//!
//! Values here are passive: they are built by an external model builder (or
//! deserialized from a YAML/JSON fixture) and only read during translation.

mod bytes;
mod policy;

pub use bytes::Base64Bytes;
pub use policy::{BasicAuthPolicy, JwtPolicy, Policy, PolicyKind, RateLimitPolicy, RateLimitUnit};

use std::collections::HashMap;

use crate::errors::{Error, Result};
use crate::xds::naming;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Lifecycle stage a backend set serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Production,
    Sandbox,
}

impl Stage {
    /// Synthesis order
    pub const ALL: [Stage; 2] = [Stage::Production, Stage::Sandbox];

    /// Token used inside cluster names (`clusterProd`, `clusterSand`)
    pub fn cluster_token(self) -> &'static str {
        match self {
            Stage::Production => "Prod",
            Stage::Sandbox => "Sand",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Production => "production",
            Stage::Sandbox => "sandbox",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an upstream service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BackendRef {
    #[validate(length(min = 1, message = "Backend name cannot be empty"))]
    pub name: String,

    #[serde(default)]
    pub namespace: Option<String>,

    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u32,

    /// Relative share among backends of the same tier; 1 when absent
    #[serde(default)]
    pub weight: Option<u32>,
}

impl BackendRef {
    pub fn new(name: impl Into<String>, port: u32) -> Self {
        Self { name: name.into(), namespace: None, port, weight: None }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn namespace_or<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        self.namespace.as_deref().filter(|ns| !ns.is_empty()).unwrap_or(default_namespace)
    }

    pub fn effective_weight(&self) -> u32 {
        self.weight.unwrap_or(1)
    }
}

impl std::fmt::Display for BackendRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}:{}", ns, self.name, self.port),
            None => write!(f, "{}:{}", self.name, self.port),
        }
    }
}

/// Backends used only when every backend of the lower tiers is unhealthy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FailoverGroup {
    #[serde(default)]
    #[validate(nested)]
    pub backend_refs: Vec<BackendRef>,
}

/// Backends of one stage. `backend_refs` is tier 0, `failover[i]` is tier `i + 1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BackendSet {
    #[serde(default)]
    #[validate(nested)]
    pub backend_refs: Vec<BackendRef>,

    #[serde(default)]
    #[validate(nested)]
    pub failover: Vec<FailoverGroup>,
}

impl BackendSet {
    pub fn new(backend_refs: Vec<BackendRef>) -> Self {
        Self { backend_refs, failover: Vec::new() }
    }

    pub fn with_failover(mut self, backend_refs: Vec<BackendRef>) -> Self {
        self.failover.push(FailoverGroup { backend_refs });
        self
    }

    /// No backend is declared in any tier
    pub fn is_empty(&self) -> bool {
        self.backend_refs.is_empty() && self.failover.iter().all(|g| g.backend_refs.is_empty())
    }

    /// Every declared backend with its priority tier, in declaration order
    pub fn tiers(&self) -> impl Iterator<Item = (u32, &BackendRef)> + '_ {
        let primary = self.backend_refs.iter().map(|b| (0, b));
        let failover = self.failover.iter().enumerate().flat_map(|(position, group)| {
            let tier = position as u32 + 1;
            group.backend_refs.iter().map(move |b| (tier, b))
        });
        primary.chain(failover)
    }
}

/// Backends per lifecycle stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StageBackends {
    #[serde(default)]
    #[validate(nested)]
    pub production: BackendSet,

    #[serde(default)]
    #[validate(nested)]
    pub sandbox: BackendSet,
}

impl StageBackends {
    pub fn production(set: BackendSet) -> Self {
        Self { production: set, sandbox: BackendSet::default() }
    }

    pub fn for_stage(&self, stage: Stage) -> &BackendSet {
        match stage {
            Stage::Production => &self.production,
            Stage::Sandbox => &self.sandbox,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.production.is_empty() && self.sandbox.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathMatchType {
    Exact,
    #[default]
    PathPrefix,
    RegularExpression,
}

/// One request match of a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PathMatch {
    #[serde(rename = "type", default)]
    pub kind: PathMatchType,

    #[validate(length(min = 1, message = "Path match value cannot be empty"))]
    pub value: String,

    /// Restricts the match to one HTTP method
    #[serde(default)]
    pub method: Option<String>,
}

impl PathMatch {
    pub fn prefix(value: impl Into<String>) -> Self {
        Self { kind: PathMatchType::PathPrefix, value: value.into(), method: None }
    }

    pub fn exact(value: impl Into<String>) -> Self {
        Self { kind: PathMatchType::Exact, value: value.into(), method: None }
    }

    pub fn regex(value: impl Into<String>) -> Self {
        Self { kind: PathMatchType::RegularExpression, value: value.into(), method: None }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }
}

/// How a URL rewrite replaces the request path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PathModifier {
    /// Substitute the matched prefix, keep the remainder
    ReplacePrefixMatch { value: String },
    /// Replace the whole path
    ReplaceFullPath { value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlRewrite {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub path: Option<PathModifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderModifier {
    /// Overwrite or add
    #[serde(default)]
    pub set: Vec<HttpHeader>,
    /// Append to existing values or add
    #[serde(default)]
    pub add: Vec<HttpHeader>,
    #[serde(default)]
    pub remove: Vec<String>,
}

/// Ordered per-rule filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RouteFilter {
    #[serde(rename = "URLRewrite")]
    UrlRewrite(UrlRewrite),
    RequestHeaderModifier(HeaderModifier),
    ResponseHeaderModifier(HeaderModifier),
    /// Authentication or traffic policy attachment
    Policy { policy: Policy },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RouteRule {
    /// Stable discriminator for cluster and route names; the rule index is used when absent
    #[serde(default)]
    pub name: Option<String>,

    #[validate(length(min = 1, message = "A rule needs at least one path match"), nested)]
    pub matches: Vec<PathMatch>,

    #[serde(default)]
    pub filters: Vec<RouteFilter>,

    /// Backends for this rule; an empty stage falls back to the API-level set
    #[serde(default)]
    #[validate(nested)]
    pub backends: StageBackends,
}

impl RouteRule {
    pub fn new(matches: Vec<PathMatch>) -> Self {
        Self { name: None, matches, filters: Vec::new(), backends: StageBackends::default() }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_filter(mut self, filter: RouteFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_backends(mut self, backends: StageBackends) -> Self {
        self.backends = backends;
        self
    }

    /// Policy of the given kind attached directly to this rule
    pub fn policy(&self, kind: PolicyKind) -> Option<&Policy> {
        self.filters.iter().find_map(|filter| match filter {
            RouteFilter::Policy { policy } if policy.kind() == kind => Some(policy),
            _ => None,
        })
    }

    /// First URL rewrite; Gateway API allows at most one per rule
    pub fn url_rewrite(&self) -> Option<&UrlRewrite> {
        self.filters.iter().find_map(|filter| match filter {
            RouteFilter::UrlRewrite(rewrite) => Some(rewrite),
            _ => None,
        })
    }
}

/// An API exposed through the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Api {
    #[validate(length(min = 1, message = "API name cannot be empty"))]
    pub name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[validate(length(min = 1, message = "API display name cannot be empty"))]
    pub display_name: String,

    #[validate(length(min = 1, message = "API version cannot be empty"))]
    pub version: String,

    /// Context path prepended to rule paths that are not already under it
    #[serde(default)]
    pub base_path: String,

    #[serde(default)]
    #[validate(nested)]
    pub rules: Vec<RouteRule>,

    /// API-level backends shared by rules that declare none of their own
    #[serde(default)]
    #[validate(nested)]
    pub backends: StageBackends,

    /// Global policy attachments, overridden per rule by a policy of the same kind
    #[serde(default)]
    pub policies: Vec<Policy>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl Api {
    pub fn from_yaml(document: &str) -> Result<Self> {
        let api: Api = serde_yaml::from_str(document)?;
        api.validate_model()?;
        Ok(api)
    }

    pub fn validate_model(&self) -> Result<()> {
        self.validate()?;
        self.check_rule_identities()
    }

    /// Two rules with the same discriminator would share cluster, route and
    /// filter names, so the second would silently bind to the first.
    pub fn check_rule_identities(&self) -> Result<()> {
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut errors = Vec::new();
        for (index, rule) in self.rules.iter().enumerate() {
            let discriminator = naming::rule_discriminator(rule, index);
            if let Some(first) = seen.get(&discriminator) {
                errors.push(Error::invalid_input(format!(
                    "API '{}/{}': rules {} and {} both resolve to '{}'",
                    self.namespace, self.name, first, index, discriminator
                )));
            } else {
                seen.insert(discriminator, index);
            }
        }
        Error::join(errors).map_or(Ok(()), Err)
    }

    pub fn policy(&self, kind: PolicyKind) -> Option<&Policy> {
        self.policies.iter().find(|policy| policy.kind() == kind)
    }

    /// Backend set a rule actually routes to for `stage`
    pub fn effective_backends<'a>(&'a self, rule: &'a RouteRule, stage: Stage) -> &'a BackendSet {
        let own = rule.backends.for_stage(stage);
        if own.is_empty() {
            self.backends.for_stage(stage)
        } else {
            own
        }
    }

    /// Join a literal rule path onto the base path unless it already lives there.
    pub fn full_path(&self, path: &str) -> String {
        let base = self.base_path.trim_end_matches('/');
        if base.is_empty() || path == base || path.starts_with(&format!("{}/", base)) {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }
}

/// The APIs served by one gateway listener
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct HttpListener {
    #[validate(length(min = 1, message = "Listener name cannot be empty"))]
    pub name: String,

    #[serde(default)]
    #[validate(nested)]
    pub apis: Vec<Api>,
}

impl HttpListener {
    pub fn new(name: impl Into<String>, apis: Vec<Api>) -> Self {
        Self { name: name.into(), apis }
    }

    pub fn from_yaml(document: &str) -> Result<Self> {
        let listener: HttpListener = serde_yaml::from_str(document)?;
        listener.validate_model()?;
        Ok(listener)
    }

    pub fn from_json(document: &str) -> Result<Self> {
        let listener: HttpListener = serde_json::from_str(document)?;
        listener.validate_model()?;
        Ok(listener)
    }

    pub fn validate_model(&self) -> Result<()> {
        self.validate()?;
        self.check_identities()
    }

    /// Reject names that would make two rules or two APIs share generated
    /// resources: duplicate rule discriminators within an API, duplicate
    /// `namespace/name` pairs and duplicate display name and version pairs.
    pub fn check_identities(&self) -> Result<()> {
        let mut errors = Vec::new();
        let mut owners: HashMap<(&str, &str), usize> = HashMap::new();
        let mut cluster_keys: HashMap<String, usize> = HashMap::new();

        for (index, api) in self.apis.iter().enumerate() {
            if let Err(error) = api.check_rule_identities() {
                errors.push(error);
            }
            if let Some(first) = owners.insert((api.namespace.as_str(), api.name.as_str()), index) {
                errors.push(Error::invalid_input(format!(
                    "listener '{}': APIs {} and {} are both named '{}/{}'",
                    self.name, first, index, api.namespace, api.name
                )));
            }
            if let Some(first) = cluster_keys.insert(naming::api_cluster_key(api), index) {
                errors.push(Error::invalid_input(format!(
                    "listener '{}': APIs {} and {} share display name '{}' and version '{}'",
                    self.name, first, index, api.display_name, api.version
                )));
            }
        }

        Error::join(errors).map_or(Ok(()), Err)
    }

    /// Every rule of every API, in declaration order
    pub fn routes(&self) -> impl Iterator<Item = HttpRoute<'_>> + '_ {
        self.apis.iter().enumerate().flat_map(|(api_index, api)| {
            api.rules.iter().enumerate().map(move |(rule_index, rule)| HttpRoute {
                api,
                rule,
                api_index,
                rule_index,
            })
        })
    }

    pub fn route(&self, api_index: usize, rule_index: usize) -> Option<HttpRoute<'_>> {
        let api = self.apis.get(api_index)?;
        let rule = api.rules.get(rule_index)?;
        Some(HttpRoute { api, rule, api_index, rule_index })
    }
}

/// Borrowed view of one rule in the context of its API
#[derive(Debug, Clone, Copy)]
pub struct HttpRoute<'a> {
    pub api: &'a Api,
    pub rule: &'a RouteRule,
    pub api_index: usize,
    pub rule_index: usize,
}

impl<'a> HttpRoute<'a> {
    /// Owner name shared by every Envoy route synthesized from this rule
    pub fn name(&self) -> String {
        naming::route_owner_name(self.api, self.rule, self.rule_index)
    }

    /// Rule-level attachment, else the API-level one
    pub fn policy(&self, kind: PolicyKind) -> Option<&'a Policy> {
        self.rule.policy(kind).or_else(|| self.api.policy(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(name: &str) -> BackendRef {
        BackendRef::new(name, 80)
    }

    #[test]
    fn tiers_follow_failover_position() {
        let set = BackendSet::new(vec![backend("a"), backend("b")])
            .with_failover(vec![backend("c")])
            .with_failover(vec![backend("d"), backend("e")]);

        let tiers: Vec<(u32, &str)> = set.tiers().map(|(t, b)| (t, b.name.as_str())).collect();
        assert_eq!(tiers, vec![(0, "a"), (0, "b"), (1, "c"), (2, "d"), (2, "e")]);
    }

    #[test]
    fn empty_failover_groups_do_not_count() {
        let set = BackendSet { backend_refs: vec![], failover: vec![FailoverGroup::default()] };
        assert!(set.is_empty());
    }

    #[test]
    fn full_path_joins_base_path() {
        let api = Api {
            name: "test-api".into(),
            namespace: "default".into(),
            display_name: "test-api".into(),
            version: "1.0.0".into(),
            base_path: "/test-api/1.0.0".into(),
            rules: vec![],
            backends: StageBackends::default(),
            policies: vec![],
        };

        assert_eq!(api.full_path("/orders"), "/test-api/1.0.0/orders");
        assert_eq!(api.full_path("orders"), "/test-api/1.0.0/orders");
        assert_eq!(api.full_path("/test-api/1.0.0/orders"), "/test-api/1.0.0/orders");
        assert_eq!(api.full_path("/test-api/1.0.0"), "/test-api/1.0.0");
    }

    #[test]
    fn rule_policy_overrides_api_policy() {
        let api_policy = Policy::BasicAuth(BasicAuthPolicy::from_htpasswd("api:{SHA}x"));
        let rule_policy = Policy::BasicAuth(BasicAuthPolicy::from_htpasswd("rule:{SHA}y"));

        let mut api = Api {
            name: "orders".into(),
            namespace: "default".into(),
            display_name: "orders".into(),
            version: "v1".into(),
            base_path: String::new(),
            rules: vec![
                RouteRule::new(vec![PathMatch::prefix("/a")]),
                RouteRule::new(vec![PathMatch::prefix("/b")])
                    .with_filter(RouteFilter::Policy { policy: rule_policy.clone() }),
            ],
            backends: StageBackends::default(),
            policies: vec![api_policy.clone()],
        };
        api.rules[0].name = Some("first".into());

        let listener = HttpListener::new("http", vec![api]);
        let routes: Vec<_> = listener.routes().collect();

        assert_eq!(routes[0].policy(PolicyKind::BasicAuth), Some(&api_policy));
        assert_eq!(routes[1].policy(PolicyKind::BasicAuth), Some(&rule_policy));
        assert!(routes[1].policy(PolicyKind::JwtAuth).is_none());
        assert_eq!(routes[0].name(), "default/orders/first");
        assert_eq!(routes[1].name(), "default/orders/rule1");
    }

    #[test]
    fn parses_yaml_document() {
        let yaml = r#"
name: orders-api
displayName: Orders API
version: v1
basePath: /orders-api/v1
backends:
  production:
    backendRefs:
      - name: order-service
        port: 80
rules:
  - matches:
      - type: PathPrefix
        value: /orders
        method: GET
    filters:
      - type: URLRewrite
        path:
          type: ReplacePrefixMatch
          value: /
      - type: Policy
        policy:
          type: BasicAuth
          users: dXNlcjp7U0hBfXg=
    backends:
      production:
        backendRefs:
          - name: order-service
            namespace: shop
            port: 8080
            weight: 3
        failover:
          - backendRefs:
              - name: order-dr
                port: 8080
"#;
        let api = Api::from_yaml(yaml).expect("parse");
        assert_eq!(api.namespace, "default");
        let rule = &api.rules[0];
        assert_eq!(rule.matches[0].kind, PathMatchType::PathPrefix);
        assert_eq!(rule.matches[0].method.as_deref(), Some("GET"));
        assert!(matches!(
            rule.url_rewrite().and_then(|r| r.path.as_ref()),
            Some(PathModifier::ReplacePrefixMatch { value }) if value == "/"
        ));
        assert!(rule.policy(PolicyKind::BasicAuth).is_some());
        let tiers: Vec<u32> = rule.backends.production.tiers().map(|(t, _)| t).collect();
        assert_eq!(tiers, vec![0, 1]);
    }

    fn shop_api(name: &str, rules: Vec<RouteRule>) -> Api {
        Api {
            name: name.into(),
            namespace: "default".into(),
            display_name: "shop".into(),
            version: "v1".into(),
            base_path: String::new(),
            rules,
            backends: StageBackends::default(),
            policies: vec![],
        }
    }

    #[test]
    fn explicit_name_colliding_with_index_name_is_rejected() {
        let api = shop_api(
            "shop",
            vec![
                RouteRule::new(vec![PathMatch::prefix("/orders")]).with_name("rule1"),
                RouteRule::new(vec![PathMatch::prefix("/users")]),
            ],
        );
        let err = api.validate_model().unwrap_err();
        assert!(err.is_invalid_input());
        assert!(err.to_string().contains("'rule1'"));
    }

    #[test]
    fn duplicate_rule_names_are_rejected() {
        let api = shop_api(
            "shop",
            vec![
                RouteRule::new(vec![PathMatch::prefix("/a")]).with_name("list"),
                RouteRule::new(vec![PathMatch::prefix("/b")]).with_name("list"),
            ],
        );
        assert!(api.check_rule_identities().is_err());

        let distinct = shop_api(
            "shop",
            vec![
                RouteRule::new(vec![PathMatch::prefix("/a")]).with_name("list"),
                RouteRule::new(vec![PathMatch::prefix("/b")]),
            ],
        );
        assert!(distinct.check_rule_identities().is_ok());
    }

    #[test]
    fn apis_sharing_display_name_and_version_are_rejected() {
        let listener = HttpListener::new(
            "gw",
            vec![
                shop_api("shop", vec![RouteRule::new(vec![PathMatch::prefix("/a")])]),
                shop_api("shop-copy", vec![RouteRule::new(vec![PathMatch::prefix("/b")])]),
            ],
        );
        let err = listener.check_identities().unwrap_err();
        assert!(err.is_invalid_input());
        assert_eq!(err.leaves().len(), 1);

        let mut renamed = listener.clone();
        renamed.apis[1].version = "v2".into();
        assert!(renamed.check_identities().is_ok());
    }

    #[test]
    fn parses_json_listener() {
        let json = r#"{
            "name": "gw",
            "apis": [{
                "name": "orders",
                "displayName": "Orders",
                "version": "v1",
                "rules": [{ "matches": [{ "type": "Exact", "value": "/orders" }] }]
            }]
        }"#;
        let listener = HttpListener::from_json(json).unwrap();
        assert_eq!(listener.apis[0].namespace, "default");
        assert_eq!(listener.apis[0].rules[0].matches[0].kind, PathMatchType::Exact);

        let duplicated = r#"{"name": "gw", "apis": [
            {"name": "a", "displayName": "A", "version": "v1"},
            {"name": "a", "displayName": "B", "version": "v1"}
        ]}"#;
        assert!(HttpListener::from_json(duplicated).unwrap_err().is_invalid_input());
    }

    #[test]
    fn rule_without_matches_is_rejected() {
        let yaml = "name: a\ndisplayName: a\nversion: v1\nrules:\n  - matches: []\n";
        let err = Api::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, crate::Error::Validation { .. }));
    }
}
