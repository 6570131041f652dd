//! Domain Rules
//!
//! Business-schema knowledge that string similarity cannot recover: which
//! deduction table a percentage column belongs to, and which tables are
//! expected to own which columns. Loaded from JSON; the default is the demo
//! financial schema (fact_sales_monthly, pre/post invoice deductions, ...).

use crate::error::{MendError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Exact rewrite for one known-bad `alias.column` reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Failing reference, e.g. `fpid.discounts_pct`
    pub reference: String,
    /// Replacement reference, e.g. `fpid2.discounts_pct`
    pub target: String,
    /// Wrap the replacement in the NULL-coalescing function
    #[serde(default)]
    pub null_safe: bool,
}

impl ColumnMapping {
    pub fn target_alias(&self) -> &str {
        self.target.split('.').next().unwrap_or(&self.target)
    }
}

/// Generalised move of a column family from one table kind to another,
/// e.g. discount columns found under the pre-invoice alias belong on the
/// post-invoice alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetargetRule {
    pub name: String,
    /// Substring of the failing alias's table name
    pub from_table: String,
    /// Substring of the table name the column should move to
    pub to_table: String,
    /// Column must contain one of these
    pub column_terms: Vec<String>,
    /// ...and none of these
    #[serde(default)]
    pub exclude_terms: Vec<String>,
    #[serde(default = "default_true")]
    pub null_safe: bool,
}

fn default_true() -> bool {
    true
}

impl RetargetRule {
    pub fn applies_to_column(&self, column: &str) -> bool {
        let column = column.to_lowercase();
        self.column_terms.iter().any(|t| column.contains(&t.to_lowercase()))
            && !self.exclude_terms.iter().any(|t| column.contains(&t.to_lowercase()))
    }
}

/// Columns a table (or table-name pattern) is known to own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableAffinity {
    pub table: String,
    pub columns: Vec<String>,
}

impl TableAffinity {
    fn owns(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRules {
    /// NULL-coalescing function of the target dialect
    #[serde(default = "default_null_function")]
    pub null_function: String,
    #[serde(default)]
    pub column_mappings: Vec<ColumnMapping>,
    #[serde(default)]
    pub retarget_rules: Vec<RetargetRule>,
    /// Matched by exact name first, then by containment in either direction
    #[serde(default)]
    pub table_affinities: Vec<TableAffinity>,
    /// Matched when the table name contains `table`
    #[serde(default)]
    pub keyword_affinities: Vec<TableAffinity>,
}

fn default_null_function() -> String {
    "IFNULL".to_string()
}

impl DomainRules {
    /// No domain knowledge at all.
    pub fn empty() -> Self {
        Self {
            null_function: default_null_function(),
            column_mappings: Vec::new(),
            retarget_rules: Vec::new(),
            table_affinities: Vec::new(),
            keyword_affinities: Vec::new(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| MendError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| MendError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// `IFNULL(expr, 0)` in the configured dialect.
    pub fn coalesce(&self, expr: &str) -> String {
        format!("{}({}, 0)", self.null_function, expr)
    }

    pub fn mapping_for(&self, reference: &str) -> Option<&ColumnMapping> {
        self.column_mappings
            .iter()
            .find(|m| m.reference.eq_ignore_ascii_case(reference))
    }

    /// Whether `table` is expected to own `column`.
    pub fn owns_column(&self, table: &str, column: &str) -> bool {
        let table = crate::aliases::strip_qualifier(table).to_lowercase();

        if let Some(exact) = self
            .table_affinities
            .iter()
            .find(|a| a.table.eq_ignore_ascii_case(&table))
        {
            return exact.owns(column);
        }

        let partial = self.table_affinities.iter().any(|a| {
            let pattern = a.table.to_lowercase();
            (pattern.contains(&table) || table.contains(&pattern)) && a.owns(column)
        });
        if partial {
            return true;
        }

        self.keyword_affinities
            .iter()
            .any(|a| table.contains(&a.table.to_lowercase()) && a.owns(column))
    }
}

impl Default for DomainRules {
    fn default() -> Self {
        let mapping = |reference: &str, target: &str, null_safe: bool| ColumnMapping {
            reference: reference.to_string(),
            target: target.to_string(),
            null_safe,
        };
        let affinity = |table: &str, columns: &[&str]| TableAffinity {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        };
        let terms = |t: &[&str]| t.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        Self {
            null_function: default_null_function(),
            column_mappings: vec![
                mapping("fpid.discounts_pct", "fpid2.discounts_pct", true),
                mapping("fpid.other_deductions_pct", "fpid2.other_deductions_pct", true),
                mapping("fpid.post_invoice_discount_pct", "fpid2.post_invoice_discount_pct", true),
                mapping("fpid.freight_pct", "fpid2.freight_pct", true),
                mapping("fpid2.pre_invoice_discount_pct", "fpid.pre_invoice_discount_pct", true),
                mapping("fp.product_code", "fs.product_code", false),
                mapping("fp.customer_code", "fs.customer_code", false),
                mapping("fp.date", "fs.date", false),
                mapping("fc.product_code", "fs.product_code", false),
                mapping("fc.customer_code", "fs.customer_code", false),
            ],
            retarget_rules: vec![
                RetargetRule {
                    name: "post-invoice deduction".to_string(),
                    from_table: "pre_invoice".to_string(),
                    to_table: "post_invoice".to_string(),
                    column_terms: terms(&["discount", "deduction", "freight"]),
                    exclude_terms: terms(&["pre_invoice"]),
                    null_safe: true,
                },
                RetargetRule {
                    name: "pre-invoice deduction".to_string(),
                    from_table: "post_invoice".to_string(),
                    to_table: "pre_invoice".to_string(),
                    column_terms: terms(&["pre_invoice"]),
                    exclude_terms: Vec::new(),
                    null_safe: true,
                },
            ],
            table_affinities: vec![
                affinity("fact_sales_monthly", &["product_code", "customer_code", "date", "sold_quantity"]),
                affinity("fact_gross_price", &["product_code", "fiscal_year", "gross_price"]),
                affinity("fact_manufacturing_cost", &["product_code", "cost_year", "manufacturing_cost"]),
                affinity("fact_pre_invoice_deductions", &["customer_code", "fiscal_year", "pre_invoice_discount_pct"]),
                affinity(
                    "fact_post_invoice_deductions",
                    &["customer_code", "product_code", "date", "discounts_pct", "other_deductions_pct"],
                ),
                affinity("dim_product", &["product_code", "product", "variant", "category", "segment"]),
                affinity("dim_customer", &["customer_code", "customer", "platform", "channel"]),
            ],
            keyword_affinities: vec![
                affinity("sales", &["product_code", "customer_code", "date", "quantity"]),
                affinity("price", &["product_code", "price", "fiscal_year"]),
                affinity("cost", &["product_code", "cost", "cost_year"]),
                affinity("deduction", &["customer_code", "product_code", "discount", "deduction"]),
            ],
        }
    }
}
