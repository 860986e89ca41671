//! Error types shared by the core and every adapter crate

use thiserror::Error;

/// Result type alias for DDNS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the DDNS system
#[derive(Error, Debug)]
pub enum Error {
    /// Current-IP discovery failed
    #[error("IP source error: {0}")]
    IpSource(String),

    /// DNS resolution errors (anything other than a clean NXDOMAIN)
    #[error("Resolver error: {0}")]
    Resolver(String),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed JSON (config file or API payload)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport failure talking to a provider API
    #[error("HTTP error: {0}")]
    Http(String),

    /// Provider rejected the credentials (401/403)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Provider throttled the request (429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Record or zone not found at the provider
    #[error("Not found: {0}")]
    NotFound(String),

    /// A record or argument the adapter cannot work with
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Any other provider-reported failure
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an IP source error
    pub fn ip_source(msg: impl Into<String>) -> Self {
        Self::IpSource(msg.into())
    }

    /// Create a resolver error
    pub fn resolver(msg: impl Into<String>) -> Self {
        Self::Resolver(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Map a non-success HTTP status from a provider API onto an error.
    ///
    /// Shared by the REST adapters so every provider reports auth failures,
    /// missing zones and throttling the same way.
    pub fn from_status(provider: &str, status: u16, context: &str, body: &str) -> Self {
        match status {
            401 | 403 => Self::auth(format!(
                "{provider}: invalid credentials or insufficient permissions ({status})"
            )),
            404 => Self::not_found(format!("{provider}: {context}")),
            429 => Self::rate_limited(format!("{provider}: {context} ({status})")),
            500..=599 => Self::provider(
                provider,
                format!("server error (transient) during {context}: {status} - {body}"),
            ),
            _ => Self::provider(provider, format!("{context} failed: {status} - {body}")),
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
