//! Error Classifier
//!
//! Maps raw driver error text onto a small taxonomy. Classification is a
//! table of (pattern, kind, entity group) so new dialects are added as data.

use crate::error::{MendError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownColumn,
    UnknownTable,
    DuplicateAlias,
    Unclassified,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::UnknownColumn => write!(f, "UnknownColumn"),
            ErrorKind::UnknownTable => write!(f, "UnknownTable"),
            ErrorKind::DuplicateAlias => write!(f, "DuplicateAlias"),
            ErrorKind::Unclassified => write!(f, "Unclassified"),
        }
    }
}

/// Classification with only the fields each kind needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SqlErrorClass {
    UnknownColumn { alias: Option<String>, column: String },
    UnknownTable { table: String },
    DuplicateAlias { alias: Option<String> },
    Unclassified,
}

impl SqlErrorClass {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SqlErrorClass::UnknownColumn { .. } => ErrorKind::UnknownColumn,
            SqlErrorClass::UnknownTable { .. } => ErrorKind::UnknownTable,
            SqlErrorClass::DuplicateAlias { .. } => ErrorKind::DuplicateAlias,
            SqlErrorClass::Unclassified => ErrorKind::Unclassified,
        }
    }

    fn from_entity(kind: ErrorKind, entity: Option<String>) -> Option<Self> {
        match kind {
            ErrorKind::UnknownColumn => {
                let entity = entity?;
                Some(match entity.rsplit_once('.') {
                    Some((qualifier, column)) => SqlErrorClass::UnknownColumn {
                        // `db.table.column` keeps only the nearest qualifier
                        alias: Some(qualifier.rsplit('.').next().unwrap_or(qualifier).to_string()),
                        column: column.to_string(),
                    },
                    None => SqlErrorClass::UnknownColumn { alias: None, column: entity },
                })
            }
            ErrorKind::UnknownTable => Some(SqlErrorClass::UnknownTable { table: entity? }),
            ErrorKind::DuplicateAlias => Some(SqlErrorClass::DuplicateAlias { alias: entity }),
            ErrorKind::Unclassified => Some(SqlErrorClass::Unclassified),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub raw_message: String,
    pub class: SqlErrorClass,
}

impl ErrorRecord {
    pub fn kind(&self) -> ErrorKind {
        self.class.kind()
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind() != ErrorKind::Unclassified
    }

    /// `alias.column`, a bare column, or a table name. `None` for
    /// whole-query errors.
    pub fn extracted_entity(&self) -> Option<String> {
        match &self.class {
            SqlErrorClass::UnknownColumn { alias: Some(a), column } => Some(format!("{}.{}", a, column)),
            SqlErrorClass::UnknownColumn { alias: None, column } => Some(column.clone()),
            SqlErrorClass::UnknownTable { table } => Some(table.clone()),
            SqlErrorClass::DuplicateAlias { .. } | SqlErrorClass::Unclassified => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorPattern {
    regex: Regex,
    kind: ErrorKind,
    entity_group: Option<usize>,
}

impl ErrorPattern {
    pub fn new(pattern: &str, kind: ErrorKind, entity_group: Option<usize>) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| MendError::Config(format!("Invalid error pattern '{}': {}", pattern, e)))?;
        Ok(Self {
            regex,
            kind,
            entity_group,
        })
    }

    fn classify(&self, message: &str) -> Option<SqlErrorClass> {
        let caps = self.regex.captures(message)?;
        let entity = self
            .entity_group
            .and_then(|g| caps.get(g))
            .map(|m| clean_entity(m.as_str()))
            .filter(|e| !e.is_empty());
        SqlErrorClass::from_entity(self.kind, entity)
    }
}

fn clean_entity(raw: &str) -> String {
    raw.chars().filter(|c| !matches!(c, '`' | '"' | '\'')).collect()
}

/// (pattern, kind, entity group) rows for MySQL, SQLite and PostgreSQL.
const DEFAULT_PATTERNS: &[(&str, ErrorKind, Option<usize>)] = &[
    (r"Unknown column '([^']+)'", ErrorKind::UnknownColumn, Some(1)),
    (r"no such column: ([\w.`]+)", ErrorKind::UnknownColumn, Some(1)),
    (r#"column "?([\w.]+)"? does not exist"#, ErrorKind::UnknownColumn, Some(1)),
    (r"Table '([^']+)' doesn't exist", ErrorKind::UnknownTable, Some(1)),
    (r"no such table: ([\w.`]+)", ErrorKind::UnknownTable, Some(1)),
    (r#"relation "([\w.]+)" does not exist"#, ErrorKind::UnknownTable, Some(1)),
    (r"Not unique table/alias(?::?\s*'([^']+)')?", ErrorKind::DuplicateAlias, Some(1)),
];

#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    patterns: Vec<ErrorPattern>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        let patterns = DEFAULT_PATTERNS
            .iter()
            .filter_map(|(p, kind, group)| ErrorPattern::new(p, *kind, *group).ok())
            .collect();
        Self { patterns }
    }
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self { patterns: Vec::new() }
    }

    /// Appends a pattern; earlier patterns take precedence.
    pub fn with_pattern(mut self, pattern: &str, kind: ErrorKind, entity_group: Option<usize>) -> Result<Self> {
        self.patterns.push(ErrorPattern::new(pattern, kind, entity_group)?);
        Ok(self)
    }

    pub fn classify(&self, error_message: &str) -> ErrorRecord {
        let class = self
            .patterns
            .iter()
            .find_map(|p| p.classify(error_message))
            .unwrap_or(SqlErrorClass::Unclassified);
        ErrorRecord {
            raw_message: error_message.to_string(),
            class,
        }
    }
}
