//! Shared helpers for Envoy HTTP filter configuration.
//!
//! Filter plugins live under [`http`]. Each converts a policy attachment into
//! an Envoy protobuf message wrapped in `google.protobuf.Any`.

pub mod http;

use envoy_types::pb::google::protobuf::Any;
use prost::Message;

/// Encode a prost message as an Envoy `Any`.
pub fn any_from_message<M: Message>(type_url: impl Into<String>, msg: &M) -> Any {
    Any { type_url: type_url.into(), value: msg.encode_to_vec() }
}

/// Error helper for invalid filter configuration.
pub fn invalid_config(msg: impl Into<String>) -> crate::Error {
    crate::Error::config(msg.into())
}
