use crate::api::{ApiError, AuthError, RequestError};
use crate::db::StoreError;

/// Why one table's sync failed.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Credential exchange rejected. Fatal to the whole run.
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("Request failed: {0}")]
    Request(#[from] RequestError),
    /// Insert or update failed; the table's transaction was rolled back.
    #[error("Persisting {table} failed: {source}")]
    Persistence {
        table: String,
        #[source]
        source: StoreError,
    },
    /// A fetched record lacks one of the table's business-key fields.
    #[error("Record for {table} is missing business key field '{field}'")]
    ReconciliationInput { table: String, field: String },
    /// Reading the sync window failed.
    #[error("Store error: {0}")]
    Store(#[source] StoreError),
    #[error("Sync of {table} timed out after {secs}s")]
    Timeout { table: String, secs: u64 },
}

impl SyncError {
    /// True when no further table can make progress in this run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }

    /// Short error kind, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Auth(_) => "auth",
            SyncError::Request(_) => "request",
            SyncError::Persistence { .. } => "persistence",
            SyncError::ReconciliationInput { .. } => "reconciliation_input",
            SyncError::Store(_) => "store",
            SyncError::Timeout { .. } => "timeout",
        }
    }
}

impl From<ApiError> for SyncError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Auth(e) => SyncError::Auth(e),
            ApiError::Request(e) => SyncError::Request(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_auth_is_fatal() {
        let auth = SyncError::from(ApiError::Auth(AuthError::Transport("down".into())));
        assert!(auth.is_fatal());
        assert_eq!(auth.kind(), "auth");

        let request = SyncError::from(ApiError::Request(RequestError::Unauthorized {
            url: "https://example.test/items".into(),
        }));
        assert!(!request.is_fatal());
        assert_eq!(request.kind(), "request");

        let timeout = SyncError::Timeout {
            table: "item".into(),
            secs: 5,
        };
        assert!(!timeout.is_fatal());
        assert_eq!(timeout.to_string(), "Sync of item timed out after 5s");
    }
}
