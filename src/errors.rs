use crate::container::ScopeId;
use thiserror::Error;

/// Errors raised while registering, locating or disposing exports.
#[derive(Debug, Error)]
pub enum LocateError {
    /// No eligible strategy anywhere in the scope chain and no fallback supplied a value
    #[error("Export '{key}' could not be located (scope chain: {})", .scope_chain.join(" -> "))]
    NotLocated {
        key: String,
        scope_chain: Vec<String>,
    },

    /// An activation re-entered a capability already on the resolution stack
    #[error("Circular resolution detected at '{key}': {}", .chain.join(" -> "))]
    CircularResolution { key: String, chain: Vec<String> },

    #[error("Resolution depth {depth} exceeded the limit of {limit} while locating '{key}'")]
    ResolutionDepthExceeded {
        key: String,
        depth: usize,
        limit: usize,
    },

    #[error("Scope '{scope_name}' ({scope_id}) is disposed and cannot {operation}")]
    ScopeDisposed {
        scope_id: ScopeId,
        scope_name: String,
        operation: &'static str,
    },

    /// A factory or constructor failed
    #[error("Failed to activate '{key}': {reason}")]
    ActivationFailed {
        key: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Type mismatch for '{key}': expected '{expected}', activation produced {actual}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: String,
    },

    #[error("Lifetime '{lifetime}' found no owning scope from '{scope_name}' upwards")]
    NoOwningScope {
        lifetime: String,
        scope_name: String,
    },

    #[error("Parent of scope '{scope_name}' is no longer available")]
    ParentUnavailable { scope_name: String },
}

impl LocateError {
    /// Activation failure without an underlying error.
    pub fn activation(key: impl Into<String>, reason: impl Into<String>) -> Self {
        LocateError::ActivationFailed {
            key: key.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Activation failure wrapping the error that caused it.
    pub fn activation_with_source<E>(key: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        LocateError::ActivationFailed {
            key: key.into(),
            reason: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn is_not_located(&self) -> bool {
        matches!(self, LocateError::NotLocated { .. })
    }

    pub fn is_circular(&self) -> bool {
        matches!(self, LocateError::CircularResolution { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file '{0}': {1}")]
    FileRead(String, #[source] std::io::Error),
    #[error("Failed to parse TOML from '{0}': {1}")]
    TomlParse(String, #[source] toml::de::Error),
    #[error("Invalid value '{value}' for '{field}'")]
    InvalidValue { field: String, value: String },
}

pub type LocateResult<T> = Result<T, LocateError>;
