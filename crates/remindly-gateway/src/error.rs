/// Inbound envelope could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("missing required field <{0}>")]
    MissingField(&'static str),

    #[error("invalid value for <{tag}>: {value}")]
    InvalidField { tag: &'static str, value: String },
}

/// The AI reply service did not produce a usable answer.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Timed out after {0} ms")]
    Timeout(u128),

    #[error("No API key configured for reply service")]
    NotConfigured,
}

/// Access-credential request was refused or unreachable.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider error {code}: {message}")]
    Provider { code: i64, message: String },

    #[error("app id / app secret not configured")]
    NotConfigured,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server IP is not in the provider's whitelist")]
    IpNotWhitelisted,

    #[error("account is not authorized for this API")]
    Unauthorized,

    #[error("provider error {code}: {message}")]
    Provider { code: i64, message: String },

    #[error("provider response carried no errcode")]
    MissingErrcode,
}
