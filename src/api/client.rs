//! Authenticated, paginated client for the Business Central API.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Method, Response, StatusCode, Url};
use serde::Deserialize;

use super::auth::{AccessToken, TokenProvider};
use super::error::{ApiError, RequestError};
use super::query::DeltaQuery;
use crate::models::Record;

/// Longest error body kept in a [`RequestError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Connection settings for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base URL that entity paths are resolved against.
    pub base_url: String,
    pub request_timeout: Duration,
    /// Attempts per request for transient failures (>= 1).
    pub max_attempts: u32,
    /// Delay before the first retry; doubled on each further retry.
    pub retry_backoff: Duration,
    /// Sent as `$schemaversion` on delta queries when set.
    pub schema_version: Option<String>,
}

/// One page of an OData collection response.
#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    value: Vec<Record>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// HTTP client for the remote API.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    tokens: Arc<TokenProvider>,
    max_attempts: u32,
    retry_backoff: Duration,
    schema_version: Option<String>,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig, tokens: Arc<TokenProvider>) -> Result<Self, ApiError> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|_| RequestError::InvalidUrl(base.clone()))?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RequestError::Client(e.to_string()))?;

        tracing::info!("API client created for {}", base_url);

        Ok(Self {
            http,
            base_url,
            tokens,
            max_attempts: config.max_attempts.max(1),
            retry_backoff: config.retry_backoff,
            schema_version: config.schema_version,
        })
    }

    /// Issues an authenticated request.
    ///
    /// `target` is either a path relative to the base URL or an absolute URL
    /// (a next-page link), which is used verbatim. An unauthorized response
    /// triggers one token refresh and one retry of the same request; a
    /// second unauthorized response is a [`RequestError::Unauthorized`].
    pub async fn request(
        &self,
        method: Method,
        target: &str,
        params: &[(String, String)],
    ) -> Result<Response, ApiError> {
        self.send_authorized(method, target, params, None).await
    }

    async fn send_authorized(
        &self,
        method: Method,
        target: &str,
        params: &[(String, String)],
        body: Option<&Record>,
    ) -> Result<Response, ApiError> {
        let url = self.resolve(target)?;
        tracing::debug!("{} {} params={:?}", method, url, params);

        let token = self.tokens.get_token().await?;
        let response = self
            .send_with_retry(&method, &url, params, body, &token)
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(check_status(&url, response).await?);
        }

        tracing::warn!("401 Unauthorized from {}, refreshing access token", url);
        let token = self.tokens.refresh(&token).await?;
        let response = self
            .send_with_retry(&method, &url, params, body, &token)
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::error!("Still unauthorized after token refresh: {}", url);
            return Err(RequestError::Unauthorized {
                url: url.to_string(),
            }
            .into());
        }

        Ok(check_status(&url, response).await?)
    }

    /// GETs `target` and follows `@odata.nextLink` until exhausted,
    /// returning all records in arrival order.
    pub async fn fetch_all(
        &self,
        target: &str,
        params: &[(String, String)],
    ) -> Result<Vec<Record>, ApiError> {
        let mut page = self.get_page(target, params).await?;
        let mut records = Vec::new();
        let mut pages = 1;
        let mut previous: Option<String> = None;

        loop {
            records.append(&mut page.value);
            let Some(next) = page.next_link.take() else {
                break;
            };
            if previous.as_deref() == Some(next.as_str()) {
                tracing::warn!("Server repeated next link {}, stopping pagination", next);
                break;
            }
            tracing::debug!("Following next link (page {}): {}", pages + 1, next);
            page = self.get_page(&next, &[]).await?;
            previous = Some(next);
            pages += 1;
        }

        tracing::debug!(
            "Fetched {} record(s) in {} page(s) from {}",
            records.len(),
            pages,
            target
        );
        Ok(records)
    }

    /// Fetches every record of `entity` matching `query`.
    pub async fn fetch_delta(
        &self,
        entity: &str,
        query: DeltaQuery,
    ) -> Result<Vec<Record>, ApiError> {
        let params = query
            .schema_version(self.schema_version.clone())
            .to_params();
        let records = self.fetch_all(entity, &params).await?;

        if records.is_empty() {
            tracing::info!("No items in response for entity {}", entity);
        } else {
            tracing::info!("Obtained {} item(s) from entity {}", records.len(), entity);
        }
        Ok(records)
    }

    /// POSTs `record` to `entity` and returns the record as created.
    pub async fn post(&self, entity: &str, record: &Record) -> Result<Record, ApiError> {
        let response = self
            .send_authorized(Method::POST, entity, &[], Some(record))
            .await?;
        let url = response.url().to_string();
        let created = response
            .json::<Record>()
            .await
            .map_err(|e| RequestError::Malformed {
                url,
                message: e.to_string(),
            })?;
        tracing::info!("Created 1 item in entity {}", entity);
        Ok(created)
    }

    /// Posts the exchange rate of `currency_code` against the local
    /// currency, effective from `starting_date`.
    pub async fn post_exchange_rate(
        &self,
        currency_code: &str,
        starting_date: NaiveDate,
        amount: f64,
    ) -> Result<Record, ApiError> {
        let record = Record::new()
            .with("currencyCode", currency_code)
            .with("relationalCurrencyCode", "")
            .with("exchangeRateAmount", amount)
            .with("startingDate", starting_date.format("%Y-%m-%d").to_string());
        self.post("exchangeRates", &record).await
    }

    async fn get_page(&self, target: &str, params: &[(String, String)]) -> Result<Page, ApiError> {
        let response = self.request(Method::GET, target, params).await?;
        let url = response.url().to_string();
        let page = response
            .json::<Page>()
            .await
            .map_err(|e| RequestError::Malformed {
                url,
                message: e.to_string(),
            })?;
        Ok(page)
    }

    fn resolve(&self, target: &str) -> Result<Url, RequestError> {
        let parsed = if target.starts_with("http://") || target.starts_with("https://") {
            Url::parse(target)
        } else {
            self.base_url.join(target.trim_start_matches('/'))
        };
        parsed.map_err(|_| RequestError::InvalidUrl(target.to_string()))
    }

    /// Sends one logical request, retrying transport failures, 5xx and 429
    /// with exponential backoff. Any other response is returned as-is.
    async fn send_with_retry(
        &self,
        method: &Method,
        url: &Url,
        params: &[(String, String)],
        body: Option<&Record>,
        token: &AccessToken,
    ) -> Result<Response, RequestError> {
        let mut attempt = 1;
        loop {
            let mut builder = self
                .http
                .request(method.clone(), url.clone())
                .header(AUTHORIZATION, token.authorization())
                .header(ACCEPT, "application/json");
            if !params.is_empty() {
                builder = builder.query(params);
            }
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let retry_reason = match builder.send().await {
                Ok(response) if is_transient_status(response.status()) => {
                    if attempt >= self.max_attempts {
                        return Ok(response);
                    }
                    format!("status {}", response.status())
                }
                Ok(response) => return Ok(response),
                Err(e) if is_transient_error(&e) && attempt < self.max_attempts => e.to_string(),
                Err(e) => {
                    return Err(RequestError::Transport {
                        url: url.to_string(),
                        attempts: attempt,
                        message: e.to_string(),
                    })
                }
            };

            let delay = self.retry_backoff * 2u32.saturating_pow(attempt - 1);
            tracing::warn!(
                "Transient failure on {} ({}), retrying in {:?} (attempt {}/{})",
                url,
                retry_reason,
                delay,
                attempt + 1,
                self.max_attempts
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn is_transient_error(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request()
}

async fn check_status(url: &Url, response: Response) -> Result<Response, RequestError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    tracing::error!("HTTP {} from {}", status, url);
    Err(RequestError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body,
    })
}
