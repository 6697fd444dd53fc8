//! # Configuration Management
//!
//! Translator settings loaded with the `config` crate and checked with `validator`.

pub mod settings;

pub use settings::{LoggingConfig, StageHosts, TranslatorConfig, ENV_PREFIX};
