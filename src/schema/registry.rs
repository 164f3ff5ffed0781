//! The enumerated set of tables this tool keeps in sync.

use std::collections::HashSet;

use super::{FieldType, TableSchema};
use FieldType::{Boolean, Date, Float, Integer, Text};

/// Errors raised while building or querying the registry.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Duplicate table in registry: {0}")]
    Duplicate(String),
    #[error("Business key field '{field}' is not a field of table '{table}'")]
    UnknownKeyField { table: String, field: String },
    #[error("Table '{0}' has no business key")]
    MissingKey(String),
    #[error("Unknown table: {0}")]
    UnknownTable(String),
}

/// Static registry of table schemas, held in run order.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    tables: Vec<TableSchema>,
}

impl SchemaRegistry {
    /// Builds a registry from explicit schemas, validating them.
    ///
    /// Tables are ordered by priority; ties keep declaration order.
    pub fn new(mut tables: Vec<TableSchema>) -> Result<Self, RegistryError> {
        let mut entities = HashSet::new();
        let mut relations = HashSet::new();
        for schema in &tables {
            if !entities.insert(schema.entity) || !relations.insert(schema.table) {
                return Err(RegistryError::Duplicate(schema.entity.to_string()));
            }
            if schema.business_key().is_empty() {
                return Err(RegistryError::MissingKey(schema.table.to_string()));
            }
            for key in schema.business_key() {
                if schema.field(key).is_none() {
                    return Err(RegistryError::UnknownKeyField {
                        table: schema.table.to_string(),
                        field: key.to_string(),
                    });
                }
            }
        }
        tables.sort_by_key(|t| t.priority());
        Ok(Self { tables })
    }

    /// The built-in table set, matching `migrations/`.
    pub fn builtin() -> Self {
        Self::new(builtin_tables()).expect("built-in table schemas are valid")
    }

    /// All tables in run order.
    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    /// Finds a table by API entity name or store table name.
    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables
            .iter()
            .find(|t| t.entity.eq_ignore_ascii_case(name) || t.table.eq_ignore_ascii_case(name))
    }

    /// Selects the named tables in run order. An empty filter selects all.
    pub fn select(&self, names: &[String]) -> Result<Vec<&TableSchema>, RegistryError> {
        if names.is_empty() {
            return Ok(self.tables.iter().collect());
        }
        let mut wanted = HashSet::new();
        for name in names {
            let schema = self
                .get(name)
                .ok_or_else(|| RegistryError::UnknownTable(name.clone()))?;
            wanted.insert(schema.table);
        }
        Ok(self
            .tables
            .iter()
            .filter(|t| wanted.contains(t.table))
            .collect())
    }
}

fn code_and_name(
    entity: &'static str,
    table: &'static str,
    code_column: &'static str,
    name_field: &'static str,
    name_column: &'static str,
) -> TableSchema {
    TableSchema::builder(entity, table)
        .key("code", code_column, Text)
        .field(name_field, name_column, Text)
        .build()
}

fn builtin_tables() -> Vec<TableSchema> {
    vec![
        code_and_name("currencies", "currency", "currency_code", "description", "currency_name"),
        TableSchema::builder("exchangeRates", "exchange_rate")
            .key("startingDate", "starting_date", Date)
            .key("currencyCode", "currency_code", Text)
            .optional_key("relationalCurrencyCode", "related_currency_code", Text)
            .field("exchangeRateAmount", "amount", Float)
            .priority(2)
            .build(),
        code_and_name(
            "paymentTerms",
            "payment_terms",
            "payment_terms_code",
            "description",
            "payment_terms_name",
        ),
        code_and_name("countries", "country", "country_code", "name", "country_name"),
        code_and_name(
            "shipmentMethods",
            "shipment_method",
            "shipment_method_code",
            "description",
            "shipment_method_name",
        ),
        code_and_name(
            "priceGroups",
            "customer_price_group",
            "customer_price_group_code",
            "description",
            "customer_price_group_name",
        ),
        TableSchema::builder("locations", "location")
            .key("code", "location_code", Text)
            .field("name", "location_name", Text)
            .field("countryRegionCode", "country_code", Text)
            .build(),
        code_and_name(
            "paymentMethods",
            "payment_method",
            "payment_method_code",
            "description",
            "payment_method_name",
        ),
        TableSchema::builder("itemCategories", "item_category")
            .key("code", "item_category_code", Text)
            .field("description", "item_category_name", Text)
            .field("hasChildren", "has_children", Boolean)
            .field("parentCategory", "parent_category", Text)
            .build(),
        code_and_name(
            "customerPostingGroups",
            "customer_posting_group",
            "customer_posting_group_code",
            "description",
            "customer_posting_group_name",
        ),
        code_and_name(
            "vendorPostingGroups",
            "vendor_posting_group",
            "vendor_posting_group_code",
            "description",
            "vendor_posting_group_name",
        ),
        code_and_name(
            "inventoryPostingGroups",
            "inventory_posting_group",
            "inventory_posting_group_code",
            "description",
            "inventory_posting_group_name",
        ),
        TableSchema::builder("salesmen", "salesperson")
            .key("code", "salesperson_code", Text)
            .field("name", "salesperson_name", Text)
            .field("blocked", "is_blocked", Boolean)
            .priority(2)
            .build(),
        TableSchema::builder("items", "item")
            .key("no", "item_code", Text)
            .field("description", "item_name", Text)
            .field("baseUnitOfMeasure", "measure_unit", Text)
            .field("type", "item_type", Text)
            .field("inventoryPostingGroup", "inventory_posting_group_code", Text)
            .field("itemCategoryCode", "item_category_code", Text)
            .field("unitPrice", "unit_price", Float)
            .field("unitCost", "unit_cost", Float)
            .field("grossWeight", "gross_weight", Float)
            .field("netWeight", "net_weight", Float)
            .field("blocked", "is_blocked", Boolean)
            .field("salesBlocked", "sales_blocked", Boolean)
            .field("purchasingBlocked", "purchase_blocked", Boolean)
            .priority(2)
            .build(),
        TableSchema::builder("customers", "customer")
            .key("no", "customer_code", Text)
            .field("name", "customer_name", Text)
            .field("contact", "contact_code", Text)
            .field("customerPostingGroup", "customer_posting_group_code", Text)
            .field("customerPriceGroup", "customer_price_group_code", Text)
            .field("paymentTermsCode", "payment_terms_code", Text)
            .field("countryRegionCode", "country_code", Text)
            .field("locationCode", "location_code", Text)
            .field("salespersonCode", "salesperson_code", Text)
            .field("rfcNo", "rfc_code", Text)
            .field("blocked", "is_blocked", Text)
            .priority(3)
            .build(),
        TableSchema::builder("vendors", "vendor")
            .key("no", "vendor_code", Text)
            .field("name", "vendor_name", Text)
            .field("primaryContactNo", "contact_code", Text)
            .field("vendorPostingGroup", "vendor_posting_group", Text)
            .field("paymentTermsCode", "payment_terms_code", Text)
            .field("countryRegionCode", "country_code", Text)
            .field("locationCode", "location_code", Text)
            .field("purchaserCode", "purchaser_code", Text)
            .field("rfcNo", "rfc_code", Text)
            .field("blocked", "is_blocked", Text)
            .priority(3)
            .build(),
        ledger("customerLedgerEntries", "customer_ledger", "customerNo", "customer_code"),
        ledger("vendorLedgerEntries", "vendor_ledger", "vendorNo", "vendor_code"),
        sales_document("salesInvoices", "sales_invoice", "orderNo", "order_no"),
        document_line("salesInvoiceLines", "sales_invoice_line", "unitPrice", "unit_price"),
        sales_document("salesCreditMemos", "sales_cr_memo", "returnOrderNo", "return_order_no"),
        document_line("salesCreditMemoLines", "sales_cr_memo_line", "unitPrice", "unit_price"),
        purchase_document("purchaseInvoices", "purchase_invoice", "orderNo", "order_no"),
        document_line("purchaseInvoiceLines", "purchase_invoice_line", "unitCost", "unit_cost"),
        purchase_document(
            "purchaseCreditMemos",
            "purchase_cr_memo",
            "returnOrderNo",
            "return_order_no",
        ),
        document_line(
            "purchaseCreditMemoLines",
            "purchase_cr_memo_line",
            "unitCost",
            "unit_cost",
        ),
    ]
}

fn ledger(
    entity: &'static str,
    table: &'static str,
    party_field: &'static str,
    party_column: &'static str,
) -> TableSchema {
    TableSchema::builder(entity, table)
        .key("entryNo", "entry_id", Integer)
        .field("postingDate", "posting_date", Date)
        .field("documentDate", "document_date", Date)
        .field("documentType", "document_type", Text)
        .field("documentNo", "document_no", Text)
        .field(party_field, party_column, Text)
        .field("currencyCode", "currency_code", Text)
        .field("amount", "amount", Float)
        .field("remainingAmount", "remaining_amount", Float)
        .field("positive", "is_positive", Boolean)
        .field("transactionNo", "transaction_no", Integer)
        .field("externalDocumentNo", "external_document_no", Text)
        .field("appliesToExtDocNo", "apply_to_external_document_no", Text)
        .field("closedByEntryNo", "closed_by_entry", Integer)
        .field("open", "is_open", Boolean)
        .field("reversed", "is_reversed", Boolean)
        .field("reversedByEntryNo", "reversed_by_entry", Integer)
        .field("reversedEntryNo", "reversed_entry", Integer)
        .priority(4)
        .build()
}

/// Posted sales invoice or credit memo header.
fn sales_document(
    entity: &'static str,
    table: &'static str,
    order_field: &'static str,
    order_column: &'static str,
) -> TableSchema {
    TableSchema::builder(entity, table)
        .key("no", "document_no", Text)
        .required("custLedgerEntryNo", "entry_id", Integer)
        .field("postingDate", "posting_date", Date)
        .field("documentDate", "document_date", Date)
        .field("sellToCustomerNo", "customer_code", Text)
        .field("shipToCode", "ship_to_code", Text)
        .field("paymentMethodCode", "payment_method_code", Text)
        .field("shipmentMethodCode", "shipment_method_code", Text)
        .field("locationCode", "location_code", Text)
        .field("currencyCode", "currency_code", Text)
        .field("salespersonCode", "salesperson_code", Text)
        .field("amount", "amount", Float)
        .field("amountIncludingVAT", "amount_with_vat", Float)
        .field(order_field, order_column, Text)
        .priority(5)
        .build()
}

/// Posted purchase invoice or credit memo header.
fn purchase_document(
    entity: &'static str,
    table: &'static str,
    order_field: &'static str,
    order_column: &'static str,
) -> TableSchema {
    TableSchema::builder(entity, table)
        .key("no", "document_no", Text)
        .required("vendorLedgerEntryNo", "entry_id", Integer)
        .field("postingDate", "posting_date", Date)
        .field("documentDate", "document_date", Date)
        .field("buyFromVendorNo", "vendor_code", Text)
        .field("paymentMethodCode", "payment_method_code", Text)
        .field("currencyCode", "currency_code", Text)
        .field("purchaserCode", "purchaser_code", Text)
        .field("amount", "amount", Float)
        .field("amountIncludingVAT", "amount_with_vat", Float)
        .field(order_field, order_column, Text)
        .priority(5)
        .build()
}

/// Line of a posted document, keyed by document and line number.
fn document_line(
    entity: &'static str,
    table: &'static str,
    price_field: &'static str,
    price_column: &'static str,
) -> TableSchema {
    TableSchema::builder(entity, table)
        .key("documentNo", "document_no", Text)
        .key("lineNo", "line_no", Integer)
        .field("type", "item_type", Text)
        .field("no", "item_code", Text)
        .field("quantity", "quantity", Float)
        .field(price_field, price_column, Float)
        .field("lineDiscount", "discount_percentage", Float)
        .field("lineDiscountAmount", "discount_amount", Float)
        .field("amount", "amount", Float)
        .field("amountIncludingVAT", "amount_with_vat", Float)
        .priority(6)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_is_priority_ordered() {
        let registry = SchemaRegistry::builtin();
        let priorities: Vec<u8> = registry.tables().iter().map(|t| t.priority()).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
        assert_eq!(registry.tables()[0].entity, "currencies");
    }

    #[test]
    fn test_document_lines_follow_their_headers() {
        let registry = SchemaRegistry::builtin();
        for (header, lines) in [
            ("salesInvoices", "salesInvoiceLines"),
            ("salesCreditMemos", "salesCreditMemoLines"),
            ("purchaseInvoices", "purchaseInvoiceLines"),
            ("purchaseCreditMemos", "purchaseCreditMemoLines"),
        ] {
            let header = registry.get(header).unwrap();
            let lines = registry.get(lines).unwrap();
            assert_eq!(header.business_key(), &["no"]);
            assert_eq!(lines.business_key(), &["documentNo", "lineNo"]);
            assert!(header.priority() < lines.priority());
            assert!(registry.get("customerLedgerEntries").unwrap().priority() < header.priority());
        }
        assert_eq!(registry.tables().len(), 26);
    }

    #[test]
    fn test_get_by_entity_or_table() {
        let registry = SchemaRegistry::builtin();
        assert_eq!(registry.get("exchangeRates").unwrap().table, "exchange_rate");
        assert_eq!(registry.get("exchange_rate").unwrap().entity, "exchangeRates");
        assert_eq!(registry.get("CURRENCY").unwrap().entity, "currencies");
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn test_select_keeps_run_order() {
        let registry = SchemaRegistry::builtin();
        let selected = registry
            .select(&["salesInvoiceLines".to_string(), "currency".to_string()])
            .unwrap();
        let names: Vec<&str> = selected.iter().map(|t| t.entity).collect();
        assert_eq!(names, vec!["currencies", "salesInvoiceLines"]);
    }

    #[test]
    fn test_select_unknown_table() {
        let registry = SchemaRegistry::builtin();
        let err = registry.select(&["bogus".to_string()]).unwrap_err();
        assert_eq!(err, RegistryError::UnknownTable("bogus".to_string()));
    }

    #[test]
    fn test_select_empty_means_all() {
        let registry = SchemaRegistry::builtin();
        assert_eq!(registry.select(&[]).unwrap().len(), registry.tables().len());
    }

    #[test]
    fn test_rejects_duplicates() {
        let table = TableSchema::builder("a", "a_table").key("code", "code", Text).build();
        let err = SchemaRegistry::new(vec![table.clone(), table]).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("a".to_string()));
    }

    #[test]
    fn test_rejects_missing_key() {
        let table = TableSchema::builder("a", "a_table").field("code", "code", Text).build();
        let err = SchemaRegistry::new(vec![table]).unwrap_err();
        assert_eq!(err, RegistryError::MissingKey("a_table".to_string()));
    }
}
