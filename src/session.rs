//! Query Session
//!
//! Per-user history and favorites. Owned by the caller and passed in
//! explicitly; nothing here is global.

use crate::config::RecoveryConfig;
use crate::error::{MendError, Result};
use crate::execution_loop::QueryProvenance;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub generated_sql: String,
    pub effective_sql: String,
    pub provenance: QueryProvenance,
    pub row_count: usize,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteQuery {
    pub id: Uuid,
    pub name: String,
    pub question: String,
    pub sql: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub query_count: usize,
    history: VecDeque<HistoryEntry>,
    favorites: Vec<FavoriteQuery>,
    max_history: usize,
    max_favorites: usize,
}

impl QuerySession {
    pub fn new(max_history: usize, max_favorites: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            query_count: 0,
            history: VecDeque::new(),
            favorites: Vec::new(),
            max_history,
            max_favorites,
        }
    }

    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self::new(config.max_history, config.max_favorites)
    }

    /// Appends an entry, dropping the oldest ones beyond the limit.
    pub fn record(&mut self, entry: HistoryEntry) {
        self.query_count += 1;
        self.history.push_back(entry);
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }

    /// Oldest first.
    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    pub fn last_entry(&self) -> Option<&HistoryEntry> {
        self.history.back()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn add_favorite(&mut self, question: &str, sql: &str, name: Option<&str>) -> Result<&FavoriteQuery> {
        if self.favorites.len() >= self.max_favorites {
            return Err(MendError::Session(format!(
                "Favorites limit of {} reached",
                self.max_favorites
            )));
        }
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("Query {}", self.favorites.len() + 1));
        self.favorites.push(FavoriteQuery {
            id: Uuid::new_v4(),
            name,
            question: question.to_string(),
            sql: sql.to_string(),
            created_at: Utc::now(),
        });
        let added = self.favorites.len() - 1;
        Ok(&self.favorites[added])
    }

    pub fn remove_favorite(&mut self, id: Uuid) -> bool {
        let before = self.favorites.len();
        self.favorites.retain(|f| f.id != id);
        self.favorites.len() != before
    }

    pub fn favorites(&self) -> &[FavoriteQuery] {
        &self.favorites
    }

    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for QuerySession {
    fn default() -> Self {
        Self::from_config(&RecoveryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(question: &str) -> HistoryEntry {
        HistoryEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            question: question.to_string(),
            generated_sql: "SELECT 1 FROM t".to_string(),
            effective_sql: "SELECT 1 FROM t".to_string(),
            provenance: QueryProvenance::AsGenerated,
            row_count: 1,
            elapsed_ms: 3,
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut session = QuerySession::new(2, 5);
        for q in ["first", "second", "third"] {
            session.record(entry(q));
        }
        let questions: Vec<&str> = session.history().map(|e| e.question.as_str()).collect();
        assert_eq!(questions, vec!["second", "third"]);
        assert_eq!(session.query_count, 3);
        assert_eq!(session.last_entry().unwrap().question, "third");
    }

    #[test]
    fn test_favorites_limit_and_removal() {
        let mut session = QuerySession::new(10, 1);
        let id = session.add_favorite("top products", "SELECT * FROM dim_product", None).unwrap().id;
        assert_eq!(session.favorites()[0].name, "Query 1");
        assert!(matches!(
            session.add_favorite("again", "SELECT 2 FROM t", Some("two")),
            Err(MendError::Session(_))
        ));
        assert!(session.remove_favorite(id));
        assert!(!session.remove_favorite(id));
        assert!(session.favorites().is_empty());
    }

    #[test]
    fn test_export_json() {
        let mut session = QuerySession::default();
        session.record(entry("markets"));
        let exported = session.export_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&exported).unwrap();
        assert_eq!(value["history"][0]["question"], "markets");
        assert_eq!(value["history"][0]["provenance"]["status"], "as_generated");
    }
}
