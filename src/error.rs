//! Error types for the movies gateway

use async_graphql::ErrorExtensions;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway
///
/// Schema and configuration errors are fatal at startup. Validation errors
/// reject a whole request. Everything else is scoped to the field whose
/// resolver produced it.
#[derive(Error, Debug)]
pub enum Error {
    /// The SDL document or resolver table could not be turned into a schema
    #[error("Schema parse error: {0}")]
    SchemaParse(String),

    /// The incoming query document does not match the schema
    #[error("Validation error: {0}")]
    Validation(String),

    /// The upstream origin could not be reached
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The upstream answered with a non-2xx status
    #[error("Upstream returned HTTP {status} for {url}")]
    UpstreamHttp { status: u16, url: String },

    /// The upstream answered 404
    #[error("Upstream resource not found: {url}")]
    UpstreamNotFound { url: String },

    /// The upstream body was not JSON of the expected shape
    #[error("Upstream decode error: {0}")]
    UpstreamDecode(String),

    /// A resolved value does not satisfy the declared field type
    #[error("Schema coercion error: {0}")]
    SchemaCoercion(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable code exposed under `extensions.code`
    pub fn code(&self) -> &'static str {
        match self {
            Error::SchemaParse(_) => "SCHEMA_PARSE_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            Error::UpstreamHttp { .. } => "UPSTREAM_HTTP_ERROR",
            Error::UpstreamNotFound { .. } => "UPSTREAM_NOT_FOUND",
            Error::UpstreamDecode(_) => "UPSTREAM_DECODE_ERROR",
            Error::SchemaCoercion(_) => "SCHEMA_COERCION_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Convert into a field-level GraphQL error carrying the error code.
    ///
    /// The schema adds the field path and location when it records the
    /// error for a failed field.
    pub fn to_field_error(&self) -> async_graphql::Error {
        let status = match self {
            Error::UpstreamHttp { status, .. } => Some(*status),
            Error::UpstreamNotFound { .. } => Some(404),
            _ => None,
        };

        async_graphql::Error::new(self.to_string()).extend_with(|_, ext| {
            ext.set("code", self.code());
            if let Some(status) = status {
                ext.set("status", status);
            }
        })
    }
}
