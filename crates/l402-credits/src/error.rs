use thiserror::Error;

/// Errors returned by L402 credit operations.
#[derive(Debug, Error)]
pub enum L402Error {
    /// Bad offer, rail, or rail parameters. Never has side effects.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("insufficient credits: balance {balance}, requested {requested}")]
    InsufficientCredits { balance: i64, requested: i64 },

    /// Remote charge creation (or lookup) failed at a payment provider.
    #[error("provider error ({rail}): {message}")]
    Provider { rail: String, message: String },

    #[error("webhook auth error: {0}")]
    WebhookAuth(String),

    #[error("price unavailable: {0}")]
    PriceUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl L402Error {
    pub fn provider(rail: impl std::fmt::Display, message: impl Into<String>) -> Self {
        L402Error::Provider {
            rail: rail.to_string(),
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for L402Error {
    fn from(e: rusqlite::Error) -> Self {
        L402Error::Storage(e.to_string())
    }
}
