//! Error hierarchy for MCP Bridge.

use thiserror::Error;

/// Top-level error type for bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Inference server error: {0}")]
    Api(#[from] ApiError),

    #[error("{0}")]
    Registry(#[from] RegistryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Conversation exceeded the turn limit of {limit}")]
    TurnLimitExceeded { limit: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Errors from the inference-server exchange.
///
/// Every variant is fatal to the conversation that produced it. Nothing in
/// the bridge retries these.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Server error: {status} {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid response from inference server: {message}")]
    InvalidResponse { message: String },

    #[error("Inference server returned no choices")]
    MissingChoice,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Errors from the client registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("MCP server '{name}' is already registered")]
    DuplicateConnection { name: String },

    #[error("Tool '{name}' not found")]
    UnknownTool { name: String },

    #[error("MCP server '{name}' not found")]
    UnknownServer { name: String },
}

impl RegistryError {
    /// Whether this error should surface as a not-found result to callers.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RegistryError::UnknownTool { .. } | RegistryError::UnknownServer { .. }
        )
    }
}

/// Errors from the interaction log. Callers in the conversation path catch
/// and discard these.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Completion not found: {id}")]
    NotFound { id: String },

    #[error("Ambiguous completion prefix '{prefix}': matches {count} completions")]
    AmbiguousPrefix { prefix: String, count: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Backend(String),
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Missing required configuration: {key}")]
    MissingKey { key: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_not_found_classification() {
        assert!(
            RegistryError::UnknownTool {
                name: "x".into()
            }
            .is_not_found()
        );
        assert!(
            RegistryError::UnknownServer {
                name: "x".into()
            }
            .is_not_found()
        );
        assert!(
            !RegistryError::DuplicateConnection {
                name: "x".into()
            }
            .is_not_found()
        );
    }

    #[test]
    fn bridge_error_wraps_api_error() {
        let err: BridgeError = ApiError::MissingChoice.into();
        assert_eq!(
            err.to_string(),
            "Inference server error: Inference server returned no choices"
        );
    }

    #[test]
    fn turn_limit_display() {
        let err = BridgeError::TurnLimitExceeded { limit: 3 };
        assert_eq!(err.to_string(), "Conversation exceeded the turn limit of 3");
    }
}
