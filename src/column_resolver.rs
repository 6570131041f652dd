//! Column Alias Resolver
//!
//! Finds where a failing `alias.column` reference most likely belongs.
//! Strategies are tried in order and the first non-empty one wins:
//! 1. same column under another alias
//! 2. similar column names anywhere in the query
//! 3. domain affinity between declared tables and the column
//!
//! Output order is deterministic: score descending, then declaration order
//! of the alias in FROM/JOIN, then first occurrence.

use crate::aliases::{column_references, AliasTable};
use crate::domain_rules::DomainRules;
use crate::fuzzy_matcher::FuzzyMatcher;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchSource {
    SameColumn,
    Fuzzy,
    DomainAffinity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnCandidate {
    pub alias: String,
    pub column: String,
    pub score: f64,
    pub source: MatchSource,
}

impl ColumnCandidate {
    pub fn reference(&self) -> String {
        format!("{}.{}", self.alias, self.column)
    }

    /// Safe to apply without a human in the loop.
    pub fn is_auto_applicable(&self, auto_threshold: f64) -> bool {
        match self.source {
            MatchSource::SameColumn | MatchSource::DomainAffinity => true,
            MatchSource::Fuzzy => self.score > auto_threshold,
        }
    }
}

pub struct ColumnAliasResolver<'a> {
    matcher: FuzzyMatcher,
    rules: &'a DomainRules,
}

impl<'a> ColumnAliasResolver<'a> {
    pub fn new(rules: &'a DomainRules, suggestion_threshold: f64) -> Self {
        Self {
            matcher: FuzzyMatcher::new(suggestion_threshold),
            rules,
        }
    }

    pub fn resolve(&self, sql: &str, failing_alias: &str, failing_column: &str) -> Vec<ColumnCandidate> {
        let same = self.same_column_other_alias(sql, failing_alias, failing_column);
        if !same.is_empty() {
            return same;
        }
        let fuzzy = self.similar_columns(sql, failing_alias, failing_column);
        if !fuzzy.is_empty() {
            return fuzzy;
        }
        self.domain_affinity(sql, failing_alias, failing_column)
    }

    /// `x.column` for any alias `x` other than the failing one, in order of
    /// first occurrence.
    pub fn same_column_other_alias(&self, sql: &str, failing_alias: &str, failing_column: &str) -> Vec<ColumnCandidate> {
        let mut out: Vec<ColumnCandidate> = Vec::new();
        for r in column_references(sql) {
            if !r.column.eq_ignore_ascii_case(failing_column) || r.alias.eq_ignore_ascii_case(failing_alias) {
                continue;
            }
            if out.iter().any(|c| c.alias.eq_ignore_ascii_case(&r.alias)) {
                continue;
            }
            out.push(ColumnCandidate {
                alias: r.alias,
                column: r.column,
                score: 1.0,
                source: MatchSource::SameColumn,
            });
        }
        out
    }

    /// Columns referenced in the query whose names resemble `failing_column`.
    pub fn similar_columns(&self, sql: &str, failing_alias: &str, failing_column: &str) -> Vec<ColumnCandidate> {
        let aliases = AliasTable::parse(sql);
        let mut out: Vec<(usize, ColumnCandidate)> = Vec::new();

        for r in column_references(sql) {
            if r.matches(failing_alias, failing_column) {
                continue;
            }
            if out.iter().any(|(_, c)| r.matches(&c.alias, &c.column)) {
                continue;
            }
            if !self.matcher.is_similar(failing_column, &r.column) {
                continue;
            }
            let score = self.matcher.similarity(failing_column, &r.column);
            out.push((
                declaration_index(&aliases, &r.alias),
                ColumnCandidate {
                    alias: r.alias,
                    column: r.column,
                    score,
                    source: MatchSource::Fuzzy,
                },
            ));
        }

        // stable: equal keys keep first-occurrence order
        out.sort_by(|(ia, a), (ib, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(ia.cmp(ib))
        });
        out.into_iter().map(|(_, c)| c).collect()
    }

    /// Declared aliases whose table is known to own `failing_column`.
    pub fn domain_affinity(&self, sql: &str, failing_alias: &str, failing_column: &str) -> Vec<ColumnCandidate> {
        let aliases = AliasTable::parse(sql);
        let mut out: Vec<ColumnCandidate> = Vec::new();
        for decl in aliases.declarations() {
            if decl.alias.eq_ignore_ascii_case(failing_alias) || decl.table_span.is_none() {
                continue;
            }
            if out.iter().any(|c| c.alias.eq_ignore_ascii_case(&decl.alias)) {
                continue;
            }
            if self.rules.owns_column(&decl.table, failing_column) {
                out.push(ColumnCandidate {
                    alias: decl.alias.clone(),
                    column: failing_column.to_string(),
                    score: 1.0,
                    source: MatchSource::DomainAffinity,
                });
            }
        }
        out
    }
}

fn declaration_index(aliases: &AliasTable, alias: &str) -> usize {
    aliases
        .declarations()
        .iter()
        .position(|d| d.alias.eq_ignore_ascii_case(alias))
        .unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_column_other_alias_wins() {
        let rules = DomainRules::empty();
        let resolver = ColumnAliasResolver::new(&rules, 0.6);
        let sql = "SELECT fpid.discounts_pct, fpid2.discounts_pct FROM a fpid JOIN b fpid2 ON fpid.k = fpid2.k";
        let ranked = resolver.resolve(sql, "fpid", "discounts_pct");
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].reference(), "fpid2.discounts_pct");
        assert_eq!(ranked[0].source, MatchSource::SameColumn);
    }

    #[test]
    fn test_fuzzy_ranking_is_sorted_and_excludes_self() {
        let rules = DomainRules::empty();
        let resolver = ColumnAliasResolver::new(&rules, 0.6);
        let sql = "SELECT s.sold_qty, s.sold_quantity, p.discount_pct, s.qty \
                   FROM fact_sales_monthly s JOIN dim_product p ON s.product_code = p.product_code";
        let ranked = resolver.resolve(sql, "s", "sold_qty");
        let refs: Vec<String> = ranked.iter().map(|c| c.reference()).collect();
        // "qty" is only contained in "sold_qty", so it ranks below the close spelling
        assert_eq!(refs, vec!["s.sold_quantity", "s.qty"]);
        assert!(!refs.contains(&"s.sold_qty".to_string()));
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(ranked.iter().all(|c| c.source == MatchSource::Fuzzy));
    }

    #[test]
    fn test_fuzzy_threshold_separates_suggestion_from_fix() {
        let rules = DomainRules::empty();
        let resolver = ColumnAliasResolver::new(&rules, 0.6);
        let sql = "SELECT a.discount_pct FROM t1 a JOIN t2 b ON a.id = b.id WHERE b.discounts_pct > 0";
        let ranked = resolver.similar_columns(sql, "a", "discount_pct");
        assert_eq!(ranked[0].reference(), "b.discounts_pct");
        assert!(ranked[0].is_auto_applicable(0.8));
    }

    #[test]
    fn test_domain_affinity_in_declaration_order() {
        let rules = DomainRules::default();
        let resolver = ColumnAliasResolver::new(&rules, 0.6);
        let sql = "SELECT fp.region FROM fact_gross_price fp \
                   JOIN fact_sales_monthly fs ON fs.product_code = fp.product_code \
                   JOIN dim_customer c ON c.customer_code = fs.customer_code";
        let ranked = resolver.domain_affinity(sql, "fp", "customer_code");
        let aliases: Vec<&str> = ranked.iter().map(|c| c.alias.as_str()).collect();
        assert_eq!(aliases, vec!["fs", "c"]);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let rules = DomainRules::default();
        let resolver = ColumnAliasResolver::new(&rules, 0.6);
        let sql = "SELECT x.amount, y.amounts, z.amount_x FROM t x JOIN u y ON x.id = y.id JOIN v z ON z.id = x.id";
        let first = resolver.resolve(sql, "q", "amount_");
        let second = resolver.resolve(sql, "q", "amount_");
        assert_eq!(first, second);
    }
}
