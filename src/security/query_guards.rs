//! Query Guards
//!
//! Best-effort keyword and pattern screening before execution. A blacklist
//! is not a security boundary; read-only database credentials are.

use crate::aliases::quoted_ranges;
use crate::config::RecoveryConfig;
use crate::error::{MendError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref STACKED_STATEMENT: Regex = Regex::new(r";\s*\w").unwrap();
    static ref TAUTOLOGY: Regex = Regex::new(r"(?i)\bOR\s+'?(\w+)'?\s*=\s*'?(\w+)'?").unwrap();
    static ref SUBQUERY: Regex = Regex::new(r"(?i)\(\s*SELECT\b").unwrap();
    static ref JOIN: Regex = Regex::new(r"(?i)\bJOIN\b").unwrap();
    static ref SELECT_STAR: Regex = Regex::new(r"(?i)\bSELECT\s+\*").unwrap();
}

const MAX_SUBQUERIES: usize = 3;
const MAX_JOINS: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardReport {
    pub warnings: Vec<String>,
}

pub struct QueryGuards {
    pub allow_modification_queries: bool,
    pub blocked_keywords: Vec<String>,
    keyword_patterns: Vec<(String, Regex)>,
}

impl Default for QueryGuards {
    fn default() -> Self {
        Self::from_config(&RecoveryConfig::default())
    }
}

impl QueryGuards {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RecoveryConfig) -> Self {
        let keyword_patterns = config
            .blocked_keywords
            .iter()
            .filter_map(|k| {
                Regex::new(&format!(r"(?i)\b{}\b", regex::escape(k)))
                    .ok()
                    .map(|re| (k.to_uppercase(), re))
            })
            .collect();
        Self {
            allow_modification_queries: config.allow_modification_queries,
            blocked_keywords: config.blocked_keywords.clone(),
            keyword_patterns,
        }
    }

    /// Reject obviously unsafe statements; return complexity warnings for
    /// the rest.
    pub fn check(&self, sql: &str) -> Result<GuardReport> {
        let code = mask_literals(sql);
        let body = code.trim().trim_end_matches(';');

        if STACKED_STATEMENT.is_match(body) {
            return Err(MendError::Blocked("Multiple statements are not allowed".to_string()));
        }

        if let Some(caps) = TAUTOLOGY
            .captures_iter(body)
            .find(|c| c[1].eq_ignore_ascii_case(&c[2]))
        {
            return Err(MendError::Blocked(format!(
                "Suspicious always-true condition: {}",
                caps[0].trim()
            )));
        }

        if !self.allow_modification_queries {
            if let Some((keyword, _)) = self.keyword_patterns.iter().find(|(_, re)| re.is_match(body)) {
                return Err(MendError::Blocked(format!(
                    "Keyword {} is not allowed; modification queries are disabled",
                    keyword
                )));
            }
        }

        Ok(GuardReport {
            warnings: complexity_warnings(body),
        })
    }
}

fn complexity_warnings(sql: &str) -> Vec<String> {
    let mut warnings = Vec::new();
    let subqueries = SUBQUERY.find_iter(sql).count();
    if subqueries > MAX_SUBQUERIES {
        warnings.push(format!("Query has {} subqueries, which may be slow", subqueries));
    }
    let joins = JOIN.find_iter(sql).count();
    if joins > MAX_JOINS {
        warnings.push(format!("Query has {} joins, which may be slow", joins));
    }
    if SELECT_STAR.is_match(sql) {
        warnings.push("SELECT * returns every column; consider naming the columns you need".to_string());
    }
    warnings
}

/// Blank out string literals so their contents never match keywords.
fn mask_literals(sql: &str) -> String {
    let mut out = sql.to_string();
    for range in quoted_ranges(sql) {
        let blank = format!("'{}'", " ".repeat(range.len().saturating_sub(2)));
        out.replace_range(range, &blank);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_passes_with_warning() {
        let report = QueryGuards::new().check("SELECT * FROM dim_customer;").unwrap();
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_blocked_keyword() {
        let err = QueryGuards::new().check("DELETE FROM dim_customer").unwrap_err();
        assert!(matches!(err, MendError::Blocked(_)));
        assert!(err.to_string().contains("DELETE"));
    }

    #[test]
    fn test_keywords_inside_names_and_literals_are_fine() {
        let guards = QueryGuards::new();
        assert!(guards
            .check("SELECT c.created_at, c.updated_by FROM dim_customer c WHERE c.note = 'drop table'")
            .is_ok());
    }

    #[test]
    fn test_stacked_statements_are_rejected() {
        let config = RecoveryConfig {
            allow_modification_queries: true,
            ..RecoveryConfig::default()
        };
        let guards = QueryGuards::from_config(&config);
        assert!(guards.check("SELECT 1 FROM t; DROP TABLE t").is_err());
        assert!(guards.check("UPDATE t SET a = 1;").is_ok());
    }

    #[test]
    fn test_tautology_is_rejected() {
        assert!(QueryGuards::new()
            .check("SELECT * FROM users WHERE name = 'x' OR 1=1")
            .is_err());
    }

    #[test]
    fn test_complexity_warnings() {
        let sql = "SELECT a.x FROM a JOIN b ON 1 JOIN c ON 1 JOIN d ON 1 JOIN e ON 1 JOIN f ON 1 JOIN g ON 1";
        let report = QueryGuards::new().check(sql).unwrap();
        assert_eq!(report.warnings, vec!["Query has 6 joins, which may be slow".to_string()]);
    }
}
