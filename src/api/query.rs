//! OData query parameters for delta pulls.

use chrono::{DateTime, Utc};

use crate::schema::{CREATED_FIELD, ID_COLUMN, MODIFIED_FIELD};

/// Builder for the query parameters of one delta fetch.
///
/// Predicates are ANDed in a fixed order: created-after, modified-after,
/// then the extra filter. With no predicate at all the fetch is an
/// unbounded full-table pull.
#[derive(Debug, Clone, Default)]
pub struct DeltaQuery {
    created_after: Option<DateTime<Utc>>,
    modified_after: Option<DateTime<Utc>>,
    order_by: Option<String>,
    select: Vec<String>,
    offset: Option<u64>,
    limit: Option<u64>,
    extra_filter: Option<String>,
    schema_version: Option<String>,
}

/// Renders a timestamp as OData expects it: UTC, millisecond precision.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

impl DeltaQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created_after(mut self, ts: Option<DateTime<Utc>>) -> Self {
        self.created_after = ts;
        self
    }

    pub fn modified_after(mut self, ts: Option<DateTime<Utc>>) -> Self {
        self.modified_after = ts;
        self
    }

    pub fn order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    /// Fields to request. The store's surrogate `id` is always left out.
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = fields
            .into_iter()
            .map(Into::into)
            .filter(|f| f != ID_COLUMN)
            .collect();
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Additional predicate, ANDed after the timestamp filters.
    pub fn filter(mut self, predicate: impl Into<String>) -> Self {
        self.extra_filter = Some(predicate.into());
        self
    }

    pub fn schema_version(mut self, version: Option<String>) -> Self {
        self.schema_version = version;
        self
    }

    /// The composed `$filter` expression, if any predicate is set.
    pub fn filter_expression(&self) -> Option<String> {
        let mut predicates = Vec::new();
        if let Some(ts) = &self.created_after {
            predicates.push(format!("{} gt {}", CREATED_FIELD, format_timestamp(ts)));
        }
        if let Some(ts) = &self.modified_after {
            predicates.push(format!("{} gt {}", MODIFIED_FIELD, format_timestamp(ts)));
        }
        if let Some(extra) = &self.extra_filter {
            predicates.push(extra.clone());
        }
        if predicates.is_empty() {
            None
        } else {
            Some(predicates.join(" and "))
        }
    }

    /// Query parameters, in a stable order.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(version) = &self.schema_version {
            params.push(("$schemaversion".to_string(), version.clone()));
        }
        if let Some(filter) = self.filter_expression() {
            params.push(("$filter".to_string(), filter));
        }
        if let Some(order_by) = &self.order_by {
            params.push(("$orderby".to_string(), order_by.clone()));
        }
        if !self.select.is_empty() {
            params.push(("$select".to_string(), self.select.join(",")));
        }
        if let Some(offset) = self.offset {
            params.push(("$skip".to_string(), offset.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("$top".to_string(), limit.to_string()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap() + chrono::Duration::microseconds(123_456)
    }

    #[test]
    fn test_unset_window_has_no_filter() {
        let params = DeltaQuery::new()
            .created_after(None)
            .modified_after(None)
            .select(["code", "description"])
            .to_params();
        assert!(param(&params, "$filter").is_none());
        assert_eq!(param(&params, "$select"), Some("code,description"));
    }

    #[test]
    fn test_created_filter_millisecond_utc() {
        let params = DeltaQuery::new().created_after(Some(ts())).to_params();
        assert_eq!(
            param(&params, "$filter"),
            Some("systemCreatedAt gt 2024-05-06T07:08:09.123Z")
        );
    }

    #[test]
    fn test_filter_composition_order() {
        let query = DeltaQuery::new()
            .filter("currencyCode eq 'USD'")
            .modified_after(Some(ts()))
            .created_after(Some(ts()));
        assert_eq!(
            query.filter_expression().unwrap(),
            "systemCreatedAt gt 2024-05-06T07:08:09.123Z \
             and systemModifiedAt gt 2024-05-06T07:08:09.123Z \
             and currencyCode eq 'USD'"
        );
    }

    #[test]
    fn test_extra_filter_alone() {
        let query = DeltaQuery::new().filter("blocked eq false");
        assert_eq!(query.filter_expression().unwrap(), "blocked eq false");
    }

    #[test]
    fn test_select_excludes_surrogate_id() {
        let params = DeltaQuery::new().select(["id", "no", "name"]).to_params();
        assert_eq!(param(&params, "$select"), Some("no,name"));
    }

    #[test]
    fn test_paging_and_ordering_params() {
        let params = DeltaQuery::new()
            .order_by("systemModifiedAt desc")
            .offset(40)
            .limit(20)
            .schema_version(Some("1.0".to_string()))
            .to_params();
        assert_eq!(param(&params, "$orderby"), Some("systemModifiedAt desc"));
        assert_eq!(param(&params, "$skip"), Some("40"));
        assert_eq!(param(&params, "$top"), Some("20"));
        assert_eq!(param(&params, "$schemaversion"), Some("1.0"));
    }
}
