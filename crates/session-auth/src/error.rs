//! Error taxonomy for session and credential operations

/// Errors from session and credential operations.
///
/// Payloads are plain strings so the type is `Clone`: a single renewal
/// failure is handed to every caller waiting on that renewal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Login/register rejected by the backend. No session state changes.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Rejected locally before any request was sent.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Renewal requested but no refresh credential is stored.
    #[error("no refresh credential available")]
    NoRefreshCredential,

    /// Refresh exchange rejected or failed in transit. The session is logged out.
    #[error("credential renewal failed: {0}")]
    RenewalFailed(String),

    /// Network error or timeout unrelated to authorization.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Backend answered with an unexpected status.
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Classify a reqwest failure as a transport error, keeping timeouts visible.
    pub fn transport(context: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Transport(format!("{context}: request timed out"))
        } else {
            Error::Transport(format!("{context}: {err}"))
        }
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
