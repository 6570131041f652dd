//! Deduction Mapping
//!
//! Domain rewrites for financial deduction columns referenced under the
//! wrong table alias. Heuristic: a rewrite that executes is not proof that
//! the business meaning was preserved, which is why repaired results carry
//! a provenance marker.

use crate::aliases::{column_references, quoted_ranges, in_ranges, replace_column_reference, AliasTable};
use crate::domain_rules::DomainRules;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// `(1 - a.x - b.y ...)`
    static ref DEDUCTION_GROUP: Regex = Regex::new(r"\(\s*1(?:\s*-\s*\w+\.\w+)+\s*\)").unwrap();
    static ref QUALIFIED_TERM: Regex = Regex::new(r"(\w+)\.(\w+)").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRewrite {
    pub sql: String,
    pub description: String,
}

#[derive(Debug, Clone)]
struct Target {
    reference: String,
    null_safe: bool,
    rule: String,
}

pub struct DeductionMapper<'a> {
    rules: &'a DomainRules,
}

impl<'a> DeductionMapper<'a> {
    pub fn new(rules: &'a DomainRules) -> Self {
        Self { rules }
    }

    /// Rewrite `failing_reference` (`alias.column`) using domain knowledge.
    /// Returns `None` when no rule applies or nothing would change.
    pub fn apply(&self, sql: &str, failing_reference: &str) -> Option<DomainRewrite> {
        let (alias, column) = failing_reference.split_once('.')?;
        if !column_references(sql).iter().any(|r| r.matches(alias, column)) {
            return None;
        }

        let aliases = AliasTable::parse(sql);
        let target = self.resolve_target(&aliases, alias, column)?;

        let (rewritten, compound) = self.rewrite_deduction_groups(sql, alias, column, &target);
        let rendered = if target.null_safe {
            self.rules.coalesce(&target.reference)
        } else {
            target.reference.clone()
        };
        let rewritten = replace_column_reference(&rewritten, alias, column, &rendered);

        if rewritten == sql {
            return None;
        }

        let description = if compound {
            format!(
                "Coalesced deduction terms and mapped {} -> {} ({})",
                failing_reference, target.reference, target.rule
            )
        } else {
            format!("Mapped {} -> {} ({})", failing_reference, rendered, target.rule)
        };
        Some(DomainRewrite {
            sql: rewritten,
            description,
        })
    }

    fn resolve_target(&self, aliases: &AliasTable, alias: &str, column: &str) -> Option<Target> {
        let reference = format!("{}.{}", alias, column);
        if let Some(mapping) = self.rules.mapping_for(&reference) {
            if aliases.contains(mapping.target_alias()) {
                return Some(Target {
                    reference: mapping.target.clone(),
                    null_safe: mapping.null_safe,
                    rule: "known column mapping".to_string(),
                });
            }
        }

        let from_table = aliases.table_for(alias)?.to_lowercase();
        for rule in &self.rules.retarget_rules {
            if !from_table.contains(&rule.from_table.to_lowercase()) || !rule.applies_to_column(column) {
                continue;
            }
            let to = aliases.declarations().iter().find(|d| {
                !d.alias.eq_ignore_ascii_case(alias)
                    && d.table.to_lowercase().contains(&rule.to_table.to_lowercase())
            });
            if let Some(to) = to {
                return Some(Target {
                    reference: format!("{}.{}", to.alias, column),
                    null_safe: rule.null_safe,
                    rule: rule.name.clone(),
                });
            }
        }
        None
    }

    /// Coalesce every term of each `(1 - ...)` group when one of the groups
    /// holds the failing reference, retargeting that reference on the way.
    fn rewrite_deduction_groups(&self, sql: &str, alias: &str, column: &str, target: &Target) -> (String, bool) {
        let quoted = quoted_ranges(sql);
        let groups: Vec<regex::Match> = DEDUCTION_GROUP
            .find_iter(sql)
            .filter(|m| !in_ranges(&quoted, m.start()))
            .collect();

        let involved = groups.iter().any(|g| {
            QUALIFIED_TERM
                .captures_iter(g.as_str())
                .any(|c| c[1].eq_ignore_ascii_case(alias) && c[2].eq_ignore_ascii_case(column))
        });
        if !involved {
            return (sql.to_string(), false);
        }

        let mut out = String::with_capacity(sql.len() + 64);
        let mut last = 0;
        for group in &groups {
            out.push_str(&sql[last..group.start()]);
            let terms: Vec<String> = QUALIFIED_TERM
                .captures_iter(group.as_str())
                .map(|c| {
                    if c[1].eq_ignore_ascii_case(alias) && c[2].eq_ignore_ascii_case(column) {
                        self.rules.coalesce(&target.reference)
                    } else {
                        self.rules.coalesce(&c[0])
                    }
                })
                .collect();
            out.push_str("(1 - ");
            out.push_str(&terms.join(" - "));
            out.push(')');
            last = group.end();
        }
        out.push_str(&sql[last..]);
        (out, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "FROM fact_sales_monthly fs \
        JOIN fact_pre_invoice_deductions fpid ON fpid.customer_code = fs.customer_code \
        JOIN fact_post_invoice_deductions fpid2 ON fpid2.customer_code = fs.customer_code";

    #[test]
    fn test_known_mapping_is_null_safe() {
        let rules = DomainRules::default();
        let sql = format!("SELECT fs.sold_quantity * fpid.discounts_pct AS d {}", BASE);
        let rewrite = DeductionMapper::new(&rules).apply(&sql, "fpid.discounts_pct").unwrap();
        assert!(rewrite.sql.contains("fs.sold_quantity * IFNULL(fpid2.discounts_pct, 0) AS d"));
        assert!(!rewrite.sql.contains("fpid.discounts_pct"));
    }

    #[test]
    fn test_compound_expression_coalesces_each_term() {
        let rules = DomainRules::default();
        let sql = format!(
            "SELECT SUM(fs.sold_quantity * (1 - fpid.pre_invoice_discount_pct - fpid.discounts_pct)) {}",
            BASE
        );
        let rewrite = DeductionMapper::new(&rules).apply(&sql, "fpid.discounts_pct").unwrap();
        assert!(rewrite.sql.contains(
            "(1 - IFNULL(fpid.pre_invoice_discount_pct, 0) - IFNULL(fpid2.discounts_pct, 0))"
        ));
    }

    #[test]
    fn test_retarget_rule_uses_table_names_not_alias_names() {
        let rules = DomainRules::default();
        let sql = "SELECT pre.freight_pct FROM fact_pre_invoice_deductions pre \
                   JOIN fact_post_invoice_deductions post ON post.customer_code = pre.customer_code";
        let rewrite = DeductionMapper::new(&rules).apply(sql, "pre.freight_pct").unwrap();
        assert!(rewrite.sql.starts_with("SELECT IFNULL(post.freight_pct, 0) FROM"));
    }

    #[test]
    fn test_mapping_requires_target_alias_in_query() {
        let rules = DomainRules::default();
        let sql = "SELECT fpid.discounts_pct FROM fact_pre_invoice_deductions fpid";
        assert!(DeductionMapper::new(&rules).apply(sql, "fpid.discounts_pct").is_none());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let rules = DomainRules::default();
        let sql = format!("SELECT fpid.discounts_pct {}", BASE);
        let mapper = DeductionMapper::new(&rules);
        let first = mapper.apply(&sql, "fpid.discounts_pct").unwrap();
        assert!(mapper.apply(&first.sql, "fpid.discounts_pct").is_none());
    }
}
