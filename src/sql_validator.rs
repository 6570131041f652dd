//! Static SQL Validation
//!
//! Advisory checks run once before the first execution. Findings are
//! reported and logged, never corrected here.

use crate::aliases::{column_references, in_ranges, quoted_ranges, AliasTable};
use crate::schema::SchemaInfo;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    static ref JOIN_KEYWORD: Regex = Regex::new(r"(?i)\bJOIN\b").unwrap();
    static ref ON_KEYWORD: Regex = Regex::new(r"(?i)\bON\b").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    UnknownAlias { alias: String, reference: String },
    MissingColumn { reference: String, table: String },
    MissingJoinCondition { joins: usize, conditions: usize },
}

impl ValidationIssue {
    pub fn severity(&self) -> Severity {
        match self {
            ValidationIssue::UnknownAlias { .. } | ValidationIssue::MissingColumn { .. } => Severity::Error,
            ValidationIssue::MissingJoinCondition { .. } => Severity::Warning,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::UnknownAlias { alias, reference } => write!(
                f,
                "Unknown alias '{}' used in column reference '{}'",
                alias, reference
            ),
            ValidationIssue::MissingColumn { reference, table } => {
                write!(f, "Column '{}' does not exist in table '{}'", reference, table)
            }
            ValidationIssue::MissingJoinCondition { joins, conditions } => write!(
                f,
                "Possible missing join condition: {} JOIN(s) but {} ON clause(s)",
                joins, conditions
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// True when no hard errors were found; warnings do not count.
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(|i| i.severity() == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity() == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity() == Severity::Warning)
    }

    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.to_string()).collect()
    }
}

#[derive(Debug, Default, Clone)]
pub struct SqlStaticValidator;

impl SqlStaticValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, sql: &str, schema: Option<&SchemaInfo>) -> ValidationReport {
        let mut issues = self.check_alias_consistency(sql, schema);
        issues.extend(self.check_join_conditions(sql));
        ValidationReport { issues }
    }

    fn check_alias_consistency(&self, sql: &str, schema: Option<&SchemaInfo>) -> Vec<ValidationIssue> {
        let aliases = AliasTable::parse(sql);
        let mut issues: Vec<ValidationIssue> = Vec::new();

        for r in column_references(sql) {
            let reference = r.qualified();
            let issue = match aliases.lookup(&r.alias) {
                None => Some(ValidationIssue::UnknownAlias {
                    alias: r.alias.clone(),
                    reference,
                }),
                Some(decl) if decl.table_span.is_some() => schema
                    .and_then(|s| s.table(&decl.table))
                    .filter(|t| !t.has_column(&r.column))
                    .map(|t| ValidationIssue::MissingColumn {
                        reference,
                        table: t.name.clone(),
                    }),
                Some(_) => None,
            };
            if let Some(issue) = issue {
                if !issues.contains(&issue) {
                    issues.push(issue);
                }
            }
        }
        issues
    }

    fn check_join_conditions(&self, sql: &str) -> Option<ValidationIssue> {
        let quoted = quoted_ranges(sql);
        let count = |re: &Regex| re.find_iter(sql).filter(|m| !in_ranges(&quoted, m.start())).count();
        let joins = count(&JOIN_KEYWORD);
        let conditions = count(&ON_KEYWORD);
        (joins > conditions).then_some(ValidationIssue::MissingJoinCondition { joins, conditions })
    }
}
