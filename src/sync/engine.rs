use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::Instrument;

use super::reconcile::dedupe;
use super::report::{RunReport, SyncResult};
use super::SyncError;
use crate::api::{ApiClient, DeltaQuery};
use crate::db::StoreGateway;
use crate::models::{RecordSet, SyncCounts, SyncWindow};
use crate::schema::TableSchema;

/// States a table passes through during one sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    WindowRead,
    Fetching,
    Reconciling,
    Persisting,
    Committed,
    RolledBack,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::WindowRead => "window-read",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Reconciling => "reconciling",
            SyncPhase::Persisting => "persisting",
            SyncPhase::Committed => "committed",
            SyncPhase::RolledBack => "rolled-back",
        };
        f.write_str(name)
    }
}

/// Drives incremental sync of tables from the API into the store.
pub struct SyncEngine {
    client: Arc<ApiClient>,
    store: StoreGateway,
    concurrency: usize,
    table_timeout: Duration,
}

impl SyncEngine {
    pub fn new(client: Arc<ApiClient>, store: StoreGateway) -> Self {
        Self {
            client,
            store,
            concurrency: 4,
            table_timeout: Duration::from_secs(600),
        }
    }

    /// Max tables synced at once within a priority group.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_table_timeout(mut self, timeout: Duration) -> Self {
        self.table_timeout = timeout;
        self
    }

    /// Current sync window of `schema`, read from the store.
    pub async fn compute_window(&self, schema: &TableSchema) -> Result<SyncWindow, SyncError> {
        self.store.window_for(schema).await.map_err(SyncError::Store)
    }

    /// Syncs one table. Failures are reported in the result, never raised.
    pub async fn sync_table(&self, schema: &TableSchema) -> SyncResult {
        let span = tracing::info_span!("table", name = schema.table);
        let outcome = self.try_sync_table(schema).instrument(span).await;
        SyncResult {
            table: schema.table.to_string(),
            entity: schema.entity.to_string(),
            outcome,
        }
    }

    async fn try_sync_table(&self, schema: &TableSchema) -> Result<SyncCounts, SyncError> {
        let window = self.compute_window(schema).await?;
        tracing::debug!(
            phase = %SyncPhase::WindowRead,
            "created > {:?}, modified > {:?}",
            window.last_created_at,
            window.last_modified_at
        );
        if window.is_unset() {
            tracing::info!("No sync window for {}, pulling full table", schema.table);
        }

        tracing::debug!(phase = %SyncPhase::Fetching, "Fetching {}", schema.entity);
        let fields = schema.api_fields();
        let inserts = self
            .client
            .fetch_delta(
                schema.entity,
                DeltaQuery::new()
                    .created_after(window.last_created_at)
                    .select(fields.iter().copied()),
            )
            .await?;
        let raw_updates = self
            .client
            .fetch_delta(
                schema.entity,
                DeltaQuery::new()
                    .modified_after(window.last_modified_at)
                    .select(fields.iter().copied()),
            )
            .await?;

        tracing::debug!(
            phase = %SyncPhase::Reconciling,
            "{} insert(s), {} update candidate(s)",
            inserts.len(),
            raw_updates.len()
        );
        let updates = dedupe(&raw_updates, &inserts, schema.business_key()).map_err(|e| {
            SyncError::ReconciliationInput {
                table: schema.table.to_string(),
                field: e.field,
            }
        })?;
        let delta = RecordSet { inserts, updates };

        if delta.is_empty() {
            tracing::info!("{} is up to date", schema.table);
            return Ok(SyncCounts::default());
        }

        tracing::debug!(phase = %SyncPhase::Persisting, "Applying delta to {}", schema.table);
        match self
            .store
            .apply_delta(schema, delta.inserts, delta.updates)
            .await
        {
            Ok(counts) => {
                tracing::info!(
                    phase = %SyncPhase::Committed,
                    "{}: {} inserted, {} updated",
                    schema.table,
                    counts.inserted,
                    counts.updated
                );
                Ok(counts)
            }
            Err(source) => {
                tracing::error!(phase = %SyncPhase::RolledBack, "{}: {}", schema.table, source);
                Err(SyncError::Persistence {
                    table: schema.table.to_string(),
                    source,
                })
            }
        }
    }

    /// Syncs one table, giving up once the table timeout elapses. Dropping
    /// the unfinished sync rolls back its open transaction.
    async fn sync_table_with_timeout(&self, schema: &TableSchema) -> SyncResult {
        match tokio::time::timeout(self.table_timeout, self.sync_table(schema)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("Sync of {} timed out", schema.table);
                SyncResult {
                    table: schema.table.to_string(),
                    entity: schema.entity.to_string(),
                    outcome: Err(SyncError::Timeout {
                        table: schema.table.to_string(),
                        secs: self.table_timeout.as_secs(),
                    }),
                }
            }
        }
    }

    /// Syncs `schemas` group by group in ascending priority. Tables within a
    /// group run concurrently. A fatal error stops dispatching further
    /// tables; other failures only affect their own table.
    pub async fn run(&self, schemas: &[&TableSchema]) -> RunReport {
        let mut groups: BTreeMap<u8, Vec<&TableSchema>> = BTreeMap::new();
        for &schema in schemas {
            groups.entry(schema.priority()).or_default().push(schema);
        }

        let abort = AtomicBool::new(false);
        let mut report = RunReport::default();

        for (priority, group) in groups {
            if abort.load(Ordering::SeqCst) {
                report.skipped.extend(group.iter().map(|s| s.table.to_string()));
                continue;
            }
            tracing::info!("Syncing {} table(s) at priority {}", group.len(), priority);

            let abort = &abort;
            let mut outcomes: Vec<(usize, Result<SyncResult, String>)> =
                stream::iter(group.into_iter().enumerate())
                    .map(|(index, schema)| async move {
                        if abort.load(Ordering::SeqCst) {
                            return (index, Err(schema.table.to_string()));
                        }
                        let result = self.sync_table_with_timeout(schema).await;
                        if let Err(e) = &result.outcome {
                            if e.is_fatal() {
                                tracing::error!("Fatal error, aborting run: {}", e);
                                abort.store(true, Ordering::SeqCst);
                            }
                        }
                        (index, Ok(result))
                    })
                    .buffer_unordered(self.concurrency)
                    .collect()
                    .await;
            outcomes.sort_by_key(|(index, _)| *index);

            for (_, outcome) in outcomes {
                match outcome {
                    Ok(result) => report.results.push(result),
                    Err(table) => report.skipped.push(table),
                }
            }
        }

        report.aborted = abort.load(Ordering::SeqCst);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::tests::{CountingExchange, RejectingExchange};
    use crate::api::{ApiClientConfig, TokenProvider};
    use crate::db::init_db;
    use crate::schema::SchemaRegistry;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn config(server: &MockServer) -> ApiClientConfig {
        ApiClientConfig {
            base_url: format!("{}/api/", server.uri()),
            request_timeout: Duration::from_secs(5),
            max_attempts: 1,
            retry_backoff: Duration::from_millis(1),
            schema_version: Some("1.0".to_string()),
        }
    }

    async fn engine_with(
        server: &MockServer,
        provider: TokenProvider,
    ) -> (TempDir, SyncEngine) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(&temp_dir.path().join("test.db")).await.unwrap();
        let client = ApiClient::new(config(server), Arc::new(provider)).unwrap();
        let engine = SyncEngine::new(Arc::new(client), StoreGateway::new(pool)).with_concurrency(2);
        (temp_dir, engine)
    }

    async fn engine(server: &MockServer) -> (TempDir, SyncEngine) {
        let (exchange, _) = CountingExchange::new();
        engine_with(server, TokenProvider::new(exchange)).await
    }

    fn filter_of(req: &Request) -> Option<String> {
        req.url
            .query_pairs()
            .find(|(k, _)| k == "$filter")
            .map(|(_, v)| v.into_owned())
    }

    fn unfiltered(req: &Request) -> bool {
        filter_of(req).is_none()
    }

    fn created_filter(req: &Request) -> bool {
        filter_of(req).is_some_and(|f| f.starts_with("systemCreatedAt gt "))
    }

    fn modified_filter(req: &Request) -> bool {
        filter_of(req).is_some_and(|f| f.starts_with("systemModifiedAt gt "))
    }

    fn page(values: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "value": values }))
    }

    fn currency(code: &str, name: &str, modified: &str) -> serde_json::Value {
        json!({
            "@odata.etag": "W/\"JzQ0OzE=\"",
            "code": code,
            "description": name,
            "systemCreatedAt": "2024-01-01T00:00:00Z",
            "systemModifiedAt": modified
        })
    }

    fn schema(name: &str) -> TableSchema {
        SchemaRegistry::builtin().get(name).unwrap().clone()
    }

    async fn mount_currencies_first_sync(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/currencies"))
            .and(unfiltered)
            .respond_with(page(json!([
                currency("USD", "US Dollar", "2024-01-01T00:00:00Z"),
                currency("EUR", "Euro", "2024-01-02T00:00:00Z"),
            ])))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_first_sync_inserts_and_second_is_noop() {
        let server = MockServer::start().await;
        mount_currencies_first_sync(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/currencies"))
            .and(|req: &Request| created_filter(req) || modified_filter(req))
            .respond_with(page(json!([])))
            .expect(2)
            .mount(&server)
            .await;

        let (_dir, engine) = engine(&server).await;
        let schema = schema("currencies");

        let first = engine.sync_table(&schema).await;
        assert_eq!(first.outcome.unwrap(), SyncCounts::new(2, 0));

        let window = engine.compute_window(&schema).await.unwrap();
        assert!(!window.is_unset());

        let second = engine.sync_table(&schema).await;
        assert_eq!(second.outcome.unwrap(), SyncCounts::new(0, 0));
    }

    #[tokio::test]
    async fn test_modified_records_are_updated() {
        let server = MockServer::start().await;
        mount_currencies_first_sync(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/currencies"))
            .and(created_filter)
            .respond_with(page(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/currencies"))
            .and(|req: &Request| {
                filter_of(req).as_deref()
                    == Some("systemModifiedAt gt 2024-01-02T00:00:00.000Z")
            })
            .respond_with(page(json!([currency("USD", "Dollar", "2024-02-01T00:00:00Z")])))
            .mount(&server)
            .await;

        let (_dir, engine) = engine(&server).await;
        let schema = schema("currencies");
        engine.sync_table(&schema).await.outcome.unwrap();

        let second = engine.sync_table(&schema).await;
        assert_eq!(second.outcome.unwrap(), SyncCounts::new(0, 1));

        let (name,): (String,) =
            sqlx::query_as("SELECT currency_name FROM currency WHERE currency_code = 'USD'")
                .fetch_one(engine.store.pool())
                .await
                .unwrap();
        assert_eq!(name, "Dollar");
    }

    #[tokio::test]
    async fn test_missing_business_key_is_reconciliation_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/currencies"))
            .respond_with(page(json!([{ "description": "keyless" }])))
            .mount(&server)
            .await;

        let (_dir, engine) = engine(&server).await;
        let result = engine.sync_table(&schema("currencies")).await;
        assert!(matches!(
            result.outcome,
            Err(SyncError::ReconciliationInput { ref field, .. }) if field == "code"
        ));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_isolated_to_its_table() {
        let server = MockServer::start().await;
        mount_currencies_first_sync(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/countries"))
            .respond_with(page(json!([
                { "code": "DK", "name": "Denmark" },
                { "code": "DK", "name": "Denmark again" }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/paymentTerms"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (_dir, engine) = engine(&server).await;
        let (currencies, countries, terms) =
            (schema("currencies"), schema("countries"), schema("paymentTerms"));
        let report = engine.run(&[&countries, &currencies, &terms]).await;

        assert!(!report.aborted);
        assert!(!report.is_success());
        assert_eq!(report.results.len(), 3);
        let by_table = |t: &str| report.results.iter().find(|r| r.table == t).unwrap();
        assert!(matches!(
            by_table("country").outcome,
            Err(SyncError::Persistence { .. })
        ));
        assert!(matches!(
            by_table("payment_terms").outcome,
            Err(SyncError::Request(_))
        ));
        assert_eq!(
            by_table("currency").outcome.as_ref().unwrap(),
            &SyncCounts::new(2, 0)
        );

        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM country")
            .fetch_one(engine.store.pool())
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_run() {
        let server = MockServer::start().await;
        let (_dir, engine) = engine_with(&server, TokenProvider::new(RejectingExchange)).await;
        let engine = engine.with_concurrency(1);

        let registry = SchemaRegistry::builtin();
        let tables = registry
            .select(&[
                "currencies".to_string(),
                "countries".to_string(),
                "items".to_string(),
            ])
            .unwrap();
        let report = engine.run(&tables).await;

        assert!(report.aborted);
        assert_eq!(report.results.len(), 1);
        assert!(matches!(report.results[0].outcome, Err(SyncError::Auth(_))));
        assert_eq!(report.skipped, vec!["country".to_string(), "item".to_string()]);
    }

    #[tokio::test]
    async fn test_table_timeout_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/currencies"))
            .respond_with(page(json!([])).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let (_dir, engine) = engine(&server).await;
        let engine = engine.with_table_timeout(Duration::from_millis(100));
        let currencies = schema("currencies");
        let report = engine.run(&[&currencies]).await;

        assert!(!report.aborted);
        assert!(matches!(
            report.results[0].outcome,
            Err(SyncError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_orders_groups_by_priority() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(page(json!([])))
            .mount(&server)
            .await;

        let (_dir, engine) = engine(&server).await;
        let (lines, rates, currencies) = (
            schema("salesInvoiceLines"),
            schema("exchangeRates"),
            schema("currencies"),
        );
        let report = engine.run(&[&lines, &rates, &currencies]).await;

        let order: Vec<&str> = report.results.iter().map(|r| r.table.as_str()).collect();
        assert_eq!(order, vec!["currency", "exchange_rate", "sales_invoice_line"]);
        assert!(report.is_success());
    }
}
