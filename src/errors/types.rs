//! # Error Types
//!
//! Error types for the routeplane translation core using `thiserror`.

/// Custom result type for translation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the translation core
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A required argument was absent or malformed
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// The injected host resolver could not produce an address for a backend
    #[error("Failed to resolve backend '{backend}': {message}")]
    Resolution { backend: String, message: String },

    /// A filter plugin could not build its configuration for one route
    #[error("Failed to build filter '{filter}' for route '{route}': {message}")]
    FilterBuild { filter: String, route: String, message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// I/O errors while reading IR or configuration documents
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// Several independent failures collected during one pass
    #[error("{}", join_messages(.errors))]
    Joined { errors: Vec<Error> },
}

fn join_messages(errors: &[Error]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
}

impl Error {
    /// Create an invalid-input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput { message: message.into() }
    }

    /// Create a backend resolution error
    pub fn resolution<B: Into<String>, S: Into<String>>(backend: B, message: S) -> Self {
        Self::Resolution { backend: backend.into(), message: message.into() }
    }

    /// Create a per-route filter build error
    pub fn filter_build<F, R, S>(filter: F, route: R, message: S) -> Self
    where
        F: Into<String>,
        R: Into<String>,
        S: Into<String>,
    {
        Self::FilterBuild { filter: filter.into(), route: route.into(), message: message.into() }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Combine collected errors into one value.
    ///
    /// Nested joins are flattened. Returns `None` for an empty list and the
    /// error itself when only one was collected.
    pub fn join(errors: impl IntoIterator<Item = Error>) -> Option<Error> {
        let mut flat = Vec::new();
        for error in errors {
            match error {
                Error::Joined { errors } => flat.extend(errors),
                other => flat.push(other),
            }
        }

        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Error::Joined { errors: flat }),
        }
    }

    /// Individual errors carried by this value, in collection order.
    pub fn leaves(&self) -> Vec<&Error> {
        match self {
            Error::Joined { errors } => errors.iter().flat_map(Error::leaves).collect(),
            other => vec![other],
        }
    }

    /// Whether this error (or any joined member) reports invalid input
    pub fn is_invalid_input(&self) -> bool {
        self.leaves().iter().any(|e| matches!(e, Error::InvalidInput { .. }))
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            context: "JSON document is invalid".to_string(),
            source: Box::new(error),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Serialization {
            context: "YAML document is invalid".to_string(),
            source: Box::new(error),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}
