//! Helper for patching the HTTP connection managers inside an Envoy Listener.

use crate::Result;
use envoy_types::pb::envoy::config::listener::v3::filter::ConfigType;
use envoy_types::pb::envoy::config::listener::v3::{Filter, FilterChain, Listener};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpConnectionManager;
use envoy_types::pb::google::protobuf::Any;
use prost::Message;

pub const HCM_FILTER_NAME: &str = "envoy.filters.network.http_connection_manager";
pub const HCM_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";

/// Decodes each connection manager of a listener, hands it to a callback and
/// re-encodes it when the callback reports a change.
///
/// ```rust,ignore
/// let mut modifier = ListenerModifier::new(listener);
/// modifier.for_each_hcm(|hcm, _| filters::http::patch_hcm(hcm, Some(&ir)).map(|_| true))?;
/// let listener = modifier.into_listener();
/// ```
pub struct ListenerModifier {
    listener: Listener,
}

impl ListenerModifier {
    pub fn new(listener: Listener) -> Self {
        Self { listener }
    }

    pub fn name(&self) -> &str {
        &self.listener.name
    }

    /// Number of connection manager filters across all filter chains
    pub fn hcm_count(&self) -> usize {
        self.listener
            .filter_chains
            .iter()
            .flat_map(|chain| chain.filters.iter())
            .filter(|filter| is_hcm(filter))
            .count()
    }

    /// Apply `f` to every connection manager.
    ///
    /// The callback receives the filter chain index and returns `Ok(true)` if it
    /// changed the HCM. Returns how many HCMs were changed.
    pub fn for_each_hcm<F>(&mut self, mut f: F) -> Result<usize>
    where
        F: FnMut(&mut HttpConnectionManager, usize) -> Result<bool>,
    {
        let mut modified_count = 0;

        for (fc_idx, filter_chain) in self.listener.filter_chains.iter_mut().enumerate() {
            for filter in filter_chain.filters.iter_mut() {
                if filter.name != HCM_FILTER_NAME {
                    continue;
                }
                if let Some(ConfigType::TypedConfig(typed_config)) = &mut filter.config_type {
                    let mut hcm = HttpConnectionManager::decode(&typed_config.value[..]).map_err(
                        |e| {
                            crate::Error::internal(format!(
                                "Failed to decode HCM for listener '{}': {}",
                                self.listener.name, e
                            ))
                        },
                    )?;

                    if f(&mut hcm, fc_idx)? {
                        typed_config.value = hcm.encode_to_vec();
                        modified_count += 1;
                    }
                }
            }
        }

        Ok(modified_count)
    }

    /// Decoded copies of every connection manager
    pub fn hcms(&self) -> Result<Vec<HttpConnectionManager>> {
        self.listener
            .filter_chains
            .iter()
            .flat_map(|chain| chain.filters.iter())
            .filter_map(|filter| match (&filter.name, &filter.config_type) {
                (name, Some(ConfigType::TypedConfig(any))) if name == HCM_FILTER_NAME => Some(any),
                _ => None,
            })
            .map(|any| {
                HttpConnectionManager::decode(&any.value[..]).map_err(|e| {
                    crate::Error::internal(format!("Failed to decode HCM: {}", e))
                })
            })
            .collect()
    }

    pub fn into_listener(self) -> Listener {
        self.listener
    }
}

fn is_hcm(filter: &Filter) -> bool {
    filter.name == HCM_FILTER_NAME
        && matches!(filter.config_type, Some(ConfigType::TypedConfig(_)))
}

/// Listener with a single filter chain holding `hcm`
pub fn listener_with_hcm(name: &str, hcm: &HttpConnectionManager) -> Listener {
    let filter = Filter {
        name: HCM_FILTER_NAME.to_string(),
        config_type: Some(ConfigType::TypedConfig(Any {
            type_url: HCM_TYPE_URL.to_string(),
            value: hcm.encode_to_vec(),
        })),
    };

    Listener {
        name: name.to_string(),
        filter_chains: vec![FilterChain { filters: vec![filter], ..Default::default() }],
        ..Default::default()
    }
}
