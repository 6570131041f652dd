//! Runtime configuration, read from the environment.

use crate::error::{MendError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const DEFAULT_BLOCKED_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "TRUNCATE", "ALTER", "INSERT", "UPDATE", "CREATE", "GRANT", "REVOKE",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Re-executions allowed after the initial attempt.
    pub max_retries: usize,
    pub fallback_limit: usize,
    /// Fuzzy matches above this ratio are applied without review.
    pub auto_apply_threshold: f64,
    /// Fuzzy matches above this ratio are reported as suggestions.
    pub suggestion_threshold: f64,
    pub enable_sql_validation: bool,
    pub allow_modification_queries: bool,
    pub blocked_keywords: Vec<String>,
    pub max_history: usize,
    pub max_favorites: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            fallback_limit: 10,
            auto_apply_threshold: 0.8,
            suggestion_threshold: 0.6,
            enable_sql_validation: true,
            allow_modification_queries: false,
            blocked_keywords: DEFAULT_BLOCKED_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            max_history: 100,
            max_favorites: 50,
        }
    }
}

impl RecoveryConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            max_retries: parse_var(&lookup, "SQLMEND_MAX_RETRIES", defaults.max_retries)?,
            fallback_limit: parse_var(&lookup, "SQLMEND_FALLBACK_LIMIT", defaults.fallback_limit)?,
            enable_sql_validation: parse_flag(&lookup, "ENABLE_SQL_VALIDATION", defaults.enable_sql_validation)?,
            allow_modification_queries: parse_flag(
                &lookup,
                "ALLOW_MODIFICATION_QUERIES",
                defaults.allow_modification_queries,
            )?,
            max_history: parse_var(&lookup, "MAX_QUERY_HISTORY", defaults.max_history)?,
            max_favorites: parse_var(&lookup, "MAX_FAVORITES", defaults.max_favorites)?,
            ..defaults
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

pub const DEFAULT_LLM_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.groq.com/openai/v1";

impl LlmConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("GROQ_API_KEY")
            .or_else(|| lookup("OPENAI_API_KEY"))
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| MendError::Config("GROQ_API_KEY (or OPENAI_API_KEY) is not set".to_string()))?;

        Ok(Self {
            api_key,
            model: lookup("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            base_url: lookup("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            temperature: parse_var(&lookup, "LLM_TEMPERATURE", 0.1)?,
            max_tokens: parse_var(&lookup, "LLM_MAX_TOKENS", 1000)?,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| MendError::Config(format!("Invalid value for {}: '{}' ({})", key, raw, e))),
    }
}

fn parse_flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(MendError::Config(format!("Invalid boolean for {}: '{}'", key, raw))),
        },
    }
}
