//! API error types.

/// The identity service rejected the credential exchange, or could not be
/// reached. Fatal for the whole run.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Token request rejected: {error}: {description}")]
    Rejected { error: String, description: String },
    #[error("Token endpoint unreachable: {0}")]
    Transport(String),
    #[error("Malformed token response: {0}")]
    Malformed(String),
}

/// A request to the remote API did not produce a usable response.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Request to {url} still unauthorized after token refresh")]
    Unauthorized { url: String },
    #[error("Request to {url} failed with status {status}: {body}")]
    Status { url: String, status: u16, body: String },
    #[error("Request to {url} failed after {attempts} attempt(s): {message}")]
    Transport {
        url: String,
        attempts: u32,
        message: String,
    },
    #[error("Malformed response from {url}: {message}")]
    Malformed { url: String, message: String },
    #[error("Invalid request URL '{0}'")]
    InvalidUrl(String),
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Any failure of an [`ApiClient`](super::ApiClient) call.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Request(#[from] RequestError),
}
