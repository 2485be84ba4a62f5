//! Error types for SMS to Mail.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored record did not match its schema.
    #[error("Failed to decode {entity}: {reason}")]
    Decode { entity: String, reason: String },
}

/// Outbound mail errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Transport {transport} failed: {reason}")]
    Transport { transport: String, reason: String },

    #[error("Mail API rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),
}

/// OAuth2 errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No signed-in account")]
    NotSignedIn,

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Token endpoint request failed: {0}")]
    Request(String),

    #[error("Token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },

    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    #[error("Token storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Pipeline-related errors.
///
/// Only preconditions end up here. Failures of individual groups or sends are
/// reported in `ProcessingResult::errors` instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Configuration incomplete: {missing}")]
    ConfigurationIncomplete { missing: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}
