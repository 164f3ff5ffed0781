//! Remote Business Central API access.
//!
//! - [`TokenProvider`] caches a bearer token and refreshes it single-flight.
//! - [`ApiClient`] issues authenticated requests, retries transient failures
//!   and follows `@odata.nextLink` pagination.
//! - [`DeltaQuery`] turns a sync window into OData query parameters.

pub(crate) mod auth;
mod client;
mod error;
mod query;

pub use auth::{AccessToken, ClientCredentials, CredentialExchange, TokenProvider};
pub use client::{ApiClient, ApiClientConfig};
pub use error::{ApiError, AuthError, RequestError};
pub use query::{format_timestamp, DeltaQuery};
