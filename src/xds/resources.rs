//! Auxiliary resource table filled by filter plugins.
//!
//! Filters that need supporting xDS resources (a JWKS cluster, for example)
//! register them here keyed by type URL. Registration is idempotent by name.

use std::collections::BTreeMap;

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::google::protobuf::Any;
use prost::Message;
use tracing::debug;

pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";

/// Wrapper for a built Envoy resource along with its name.
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltResource {
    pub name: String,
    pub resource: Any,
}

impl BuiltResource {
    pub fn from_cluster(cluster: &Cluster) -> Self {
        Self {
            name: cluster.name.clone(),
            resource: Any {
                type_url: CLUSTER_TYPE_URL.to_string(),
                value: cluster.encode_to_vec(),
            },
        }
    }

    pub fn type_url(&self) -> &str {
        &self.resource.type_url
    }
}

/// Resources grouped by type URL, each group in registration order
#[derive(Clone, Debug, Default)]
pub struct ResourceTable {
    entries: BTreeMap<String, Vec<BuiltResource>>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when a resource of the same type and name is already present.
    pub fn insert(&mut self, resource: BuiltResource) -> bool {
        let group = self.entries.entry(resource.type_url().to_string()).or_default();
        if group.iter().any(|existing| existing.name == resource.name) {
            return false;
        }
        debug!(
            name = %resource.name,
            type_url = %resource.resource.type_url,
            "Registered auxiliary resource"
        );
        group.push(resource);
        true
    }

    pub fn insert_cluster(&mut self, cluster: &Cluster) -> bool {
        self.insert(BuiltResource::from_cluster(cluster))
    }

    pub fn contains(&self, type_url: &str, name: &str) -> bool {
        self.get(type_url, name).is_some()
    }

    pub fn get(&self, type_url: &str, name: &str) -> Option<&BuiltResource> {
        self.entries.get(type_url)?.iter().find(|r| r.name == name)
    }

    pub fn resources(&self, type_url: &str) -> &[BuiltResource] {
        self.entries.get(type_url).map(Vec::as_slice).unwrap_or_default()
    }

    /// Decoded clusters registered in the table
    pub fn clusters(&self) -> Vec<Cluster> {
        self.resources(CLUSTER_TYPE_URL)
            .iter()
            .filter_map(|r| Cluster::decode(r.resource.value.as_slice()).ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
