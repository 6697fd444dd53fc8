//! Helper utilities for xDS resource manipulation.

mod listener_modifier;

pub use listener_modifier::{listener_with_hcm, ListenerModifier, HCM_FILTER_NAME, HCM_TYPE_URL};
