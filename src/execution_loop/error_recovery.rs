//! Error Recovery
//!
//! Repair strategies applied after a classified failure. Each strategy is
//! a pure function of (query, error, context) and returns `None` when it has
//! nothing to offer.

use crate::alias_dedup::deduplicate;
use crate::aliases::{column_references, replace_bare_column, replace_column_reference, AliasTable};
use crate::column_resolver::ColumnAliasResolver;
use crate::config::RecoveryConfig;
use crate::deduction_mapper::DeductionMapper;
use crate::domain_rules::DomainRules;
use crate::execution_loop::error_classifier::{ErrorRecord, SqlErrorClass};
use crate::fallback::FallbackQueryGenerator;
use crate::fuzzy_matcher::FuzzyMatcher;
use crate::schema::SchemaInfo;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    StandardFix,
    DeductionMapping,
    DomainAffinity,
    Fallback,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::StandardFix => write!(f, "standard fix"),
            StrategyKind::DeductionMapping => write!(f, "deduction mapping"),
            StrategyKind::DomainAffinity => write!(f, "domain affinity"),
            StrategyKind::Fallback => write!(f, "fallback"),
        }
    }
}

/// A rewritten candidate and a human-readable account of the change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repair {
    pub sql: String,
    pub description: String,
}

/// Read-only inputs shared by every strategy.
pub struct RepairContext<'a> {
    pub rules: &'a DomainRules,
    pub schema: Option<&'a SchemaInfo>,
    pub config: &'a RecoveryConfig,
}

pub trait RepairStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn repair(&self, ctx: &RepairContext<'_>, sql: &str, error: &ErrorRecord) -> Option<Repair>;

    /// Plausible replacements too uncertain to apply automatically.
    fn suggestions(&self, _ctx: &RepairContext<'_>, _sql: &str, _error: &ErrorRecord) -> Vec<String> {
        Vec::new()
    }
}

/// Strategies in their fixed priority order.
pub fn default_strategies() -> Vec<Box<dyn RepairStrategy>> {
    vec![
        Box::new(StandardFixes),
        Box::new(DeductionMappingRepair),
        Box::new(DomainAffinityRepair),
        Box::new(FallbackRepair),
    ]
}

/// Alias/column, table and duplicate-alias fixes that need no domain knowledge.
pub struct StandardFixes;

impl RepairStrategy for StandardFixes {
    fn kind(&self) -> StrategyKind {
        StrategyKind::StandardFix
    }

    fn repair(&self, ctx: &RepairContext<'_>, sql: &str, error: &ErrorRecord) -> Option<Repair> {
        match &error.class {
            SqlErrorClass::UnknownColumn { alias: Some(alias), column } => {
                qualified_column_fix(ctx, sql, alias, column)
            }
            SqlErrorClass::UnknownColumn { alias: None, column } => bare_column_fix(ctx, sql, column),
            SqlErrorClass::UnknownTable { table } => table_fix(ctx, sql, table),
            SqlErrorClass::DuplicateAlias { .. } => {
                let rewritten = deduplicate(sql);
                (rewritten != sql).then(|| Repair {
                    sql: rewritten,
                    description: "Renamed duplicate table aliases".to_string(),
                })
            }
            SqlErrorClass::Unclassified => None,
        }
    }

    fn suggestions(&self, ctx: &RepairContext<'_>, sql: &str, error: &ErrorRecord) -> Vec<String> {
        let SqlErrorClass::UnknownColumn { alias: Some(alias), column } = &error.class else {
            return Vec::new();
        };
        ColumnAliasResolver::new(ctx.rules, ctx.config.suggestion_threshold)
            .similar_columns(sql, alias, column)
            .into_iter()
            .filter(|c| !c.is_auto_applicable(ctx.config.auto_apply_threshold))
            .map(|c| c.reference())
            .collect()
    }
}

fn qualified_column_fix(ctx: &RepairContext<'_>, sql: &str, alias: &str, column: &str) -> Option<Repair> {
    let resolver = ColumnAliasResolver::new(ctx.rules, ctx.config.suggestion_threshold);
    let failing = format!("{}.{}", alias, column);

    let candidate = resolver
        .same_column_other_alias(sql, alias, column)
        .into_iter()
        .next()
        .or_else(|| {
            resolver
                .similar_columns(sql, alias, column)
                .into_iter()
                .find(|c| c.is_auto_applicable(ctx.config.auto_apply_threshold))
        })?;

    let replacement = candidate.reference();
    let rewritten = replace_column_reference(sql, alias, column, &replacement);
    (rewritten != sql).then(|| Repair {
        sql: rewritten,
        description: format!("Replaced {} with {}", failing, replacement),
    })
}

fn bare_column_fix(ctx: &RepairContext<'_>, sql: &str, column: &str) -> Option<Repair> {
    let matcher = FuzzyMatcher::new(ctx.config.suggestion_threshold);
    let mut names: Vec<String> = column_references(sql).into_iter().map(|r| r.column).collect();
    if let Some(schema) = ctx.schema {
        for decl in AliasTable::parse(sql).declarations() {
            if let Some(table) = schema.table(&decl.table) {
                names.extend(table.columns.iter().cloned());
            }
        }
    }

    let (best, _) = matcher.find_best_match(
        column,
        names.iter().map(String::as_str).filter(|n| !n.eq_ignore_ascii_case(column)),
        ctx.config.auto_apply_threshold,
    )?;
    let rewritten = replace_bare_column(sql, column, best);
    (rewritten != sql).then(|| Repair {
        description: format!("Replaced column {} with {}", column, best),
        sql: rewritten,
    })
}

fn table_fix(ctx: &RepairContext<'_>, sql: &str, table: &str) -> Option<Repair> {
    let schema = ctx.schema?;
    let matcher = FuzzyMatcher::new(ctx.config.suggestion_threshold);
    let bare = table.rsplit('.').next().unwrap_or(table);

    let (best, _) = matcher.find_best_match(
        bare,
        schema.table_names().filter(|n| !n.eq_ignore_ascii_case(bare)),
        ctx.config.auto_apply_threshold,
    )?;
    let rewritten = crate::aliases::replace_table(sql, table, best);
    (rewritten != sql).then(|| Repair {
        description: format!("Replaced table {} with {}", table, best),
        sql: rewritten,
    })
}

pub struct DeductionMappingRepair;

impl RepairStrategy for DeductionMappingRepair {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DeductionMapping
    }

    fn repair(&self, ctx: &RepairContext<'_>, sql: &str, error: &ErrorRecord) -> Option<Repair> {
        let SqlErrorClass::UnknownColumn { alias: Some(_), .. } = &error.class else {
            return None;
        };
        let reference = error.extracted_entity()?;
        DeductionMapper::new(ctx.rules)
            .apply(sql, &reference)
            .map(|rewrite| Repair {
                sql: rewrite.sql,
                description: rewrite.description,
            })
    }
}

pub struct DomainAffinityRepair;

impl RepairStrategy for DomainAffinityRepair {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DomainAffinity
    }

    fn repair(&self, ctx: &RepairContext<'_>, sql: &str, error: &ErrorRecord) -> Option<Repair> {
        let SqlErrorClass::UnknownColumn { alias: Some(alias), column } = &error.class else {
            return None;
        };
        let resolver = ColumnAliasResolver::new(ctx.rules, ctx.config.suggestion_threshold);
        let candidate = resolver.domain_affinity(sql, alias, column).into_iter().next()?;
        let replacement = candidate.reference();
        let rewritten = replace_column_reference(sql, alias, column, &replacement);
        (rewritten != sql).then(|| Repair {
            description: format!("Moved {}.{} to {} by table affinity", alias, column, replacement),
            sql: rewritten,
        })
    }
}

/// Last resort for unknown columns: browse the primary table.
pub struct FallbackRepair;

impl RepairStrategy for FallbackRepair {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Fallback
    }

    fn repair(&self, ctx: &RepairContext<'_>, sql: &str, error: &ErrorRecord) -> Option<Repair> {
        if !matches!(error.class, SqlErrorClass::UnknownColumn { .. }) {
            return None;
        }
        let fallback = FallbackQueryGenerator::new(ctx.config.fallback_limit).generate(sql)?;
        (fallback != sql).then(|| Repair {
            sql: fallback,
            description: "Replaced query with a simple table preview".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution_loop::error_classifier::ErrorClassifier;
    use crate::schema::TableSchema;

    fn context<'a>(rules: &'a DomainRules, schema: Option<&'a SchemaInfo>, config: &'a RecoveryConfig) -> RepairContext<'a> {
        RepairContext { rules, schema, config }
    }

    #[test]
    fn test_standard_fix_prefers_same_column_other_alias() {
        let rules = DomainRules::empty();
        let config = RecoveryConfig::default();
        let ctx = context(&rules, None, &config);
        let sql = "SELECT s.market, c.market FROM fact_sales_monthly s JOIN dim_customer c ON c.customer_code = s.customer_code";
        let error = ErrorClassifier::new().classify("no such column: s.market");
        let repair = StandardFixes.repair(&ctx, sql, &error).unwrap();
        assert_eq!(
            repair.sql,
            "SELECT c.market, c.market FROM fact_sales_monthly s JOIN dim_customer c ON c.customer_code = s.customer_code"
        );
    }

    #[test]
    fn test_low_confidence_fuzzy_match_is_not_applied() {
        let rules = DomainRules::empty();
        let config = RecoveryConfig::default();
        let ctx = context(&rules, None, &config);
        let sql = "SELECT a.price, b.price_list FROM t a JOIN u b ON a.id = b.id";
        let error = ErrorClassifier::new().classify("no such column: a.price");
        assert!(StandardFixes.repair(&ctx, sql, &error).is_none());
        assert_eq!(StandardFixes.suggestions(&ctx, sql, &error), vec!["b.price_list".to_string()]);
    }

    #[test]
    fn test_unknown_table_uses_schema() {
        let rules = DomainRules::empty();
        let config = RecoveryConfig::default();
        let schema = SchemaInfo::new(vec![
            TableSchema { name: "fact_sales_monthly".to_string(), columns: vec![] },
            TableSchema { name: "dim_customer".to_string(), columns: vec![] },
        ]);
        let sql = "SELECT COUNT(*) FROM fact_sale_monthly fs";
        let error = ErrorClassifier::new().classify("no such table: fact_sale_monthly");

        let without_schema = context(&rules, None, &config);
        assert!(StandardFixes.repair(&without_schema, sql, &error).is_none());

        let with_schema = context(&rules, Some(&schema), &config);
        let repair = StandardFixes.repair(&with_schema, sql, &error).unwrap();
        assert_eq!(repair.sql, "SELECT COUNT(*) FROM fact_sales_monthly fs");
    }

    #[test]
    fn test_bare_column_fix() {
        let rules = DomainRules::empty();
        let config = RecoveryConfig::default();
        let ctx = context(&rules, None, &config);
        let sql = "SELECT s.sold_quantity FROM fact_sales_monthly s WHERE sold_quantit > 10";
        let error = ErrorClassifier::new().classify("no such column: sold_quantit");
        let repair = StandardFixes.repair(&ctx, sql, &error).unwrap();
        assert_eq!(
            repair.sql,
            "SELECT s.sold_quantity FROM fact_sales_monthly s WHERE sold_quantity > 10"
        );
    }

    #[test]
    fn test_duplicate_alias_fix() {
        let rules = DomainRules::empty();
        let config = RecoveryConfig::default();
        let ctx = context(&rules, None, &config);
        let sql = "SELECT a.name FROM customers a JOIN orders a ON a.customer_id = a.id";
        let error = ErrorClassifier::new().classify("Not unique table/alias 'a'");
        let repair = StandardFixes.repair(&ctx, sql, &error).unwrap();
        assert!(repair.sql.contains("JOIN orders a2"));
    }

    #[test]
    fn test_fallback_only_for_unknown_column() {
        let rules = DomainRules::empty();
        let config = RecoveryConfig::default();
        let ctx = context(&rules, None, &config);
        let sql = "SELECT weird.stuff FROM fact_sales_monthly fsm WHERE fsm.fiscal_year = 2021";
        let classifier = ErrorClassifier::new();

        let column = classifier.classify("Unknown column 'weird.stuff' in 'field list'");
        assert_eq!(
            FallbackRepair.repair(&ctx, sql, &column).unwrap().sql,
            "SELECT * FROM fact_sales_monthly LIMIT 10"
        );
        let table = classifier.classify("no such table: fact_sales_monthly");
        assert!(FallbackRepair.repair(&ctx, sql, &table).is_none());
    }

    #[test]
    fn test_strategies_are_idempotent_on_their_output() {
        let rules = DomainRules::default();
        let config = RecoveryConfig::default();
        let ctx = context(&rules, None, &config);
        let sql = "SELECT fpid.discounts_pct FROM fact_pre_invoice_deductions fpid \
                   JOIN fact_post_invoice_deductions fpid2 ON fpid2.customer_code = fpid.customer_code";
        let error = ErrorClassifier::new().classify("no such column: fpid.discounts_pct");
        let repaired = DeductionMappingRepair.repair(&ctx, sql, &error).unwrap();
        assert!(DeductionMappingRepair.repair(&ctx, &repaired.sql, &error).is_none());
        assert!(StandardFixes.repair(&ctx, &repaired.sql, &error).is_none());
    }
}
