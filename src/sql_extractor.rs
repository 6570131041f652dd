//! SQL Extraction
//!
//! Pulls one executable statement out of a verbose LLM response. Methods
//! run in priority order and the first candidate that passes `check_sql`
//! wins.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Keywords a statement may start with.
pub const LEADING_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP", "SHOW", "DESCRIBE",
    "EXPLAIN",
];

/// Prose that never appears in real SQL.
const EXPLANATORY_PHRASES: &[&str] = &[
    "however",
    "to calculate",
    "this query",
    "note that",
    "assuming",
    "the following",
    "we can use",
    "here is",
    "you can use",
    "to address",
    "the issue",
    "the problem",
];

/// Phrases that end a captured block in line-scan mode.
const STOP_PHRASES: &[&str] = &["however", "this query", "note that", "to address"];

/// Spans removed by the strip-everything fallback.
const STRIP_PHRASES: &[&str] = &[
    "to calculate",
    "however",
    "this query",
    "note that",
    "explanation",
    "to address",
    "assuming",
    "the following query",
    "we can use",
    "here is",
    "here's",
    "the query would be",
    "you can use",
];

lazy_static! {
    static ref LINE_COMMENT: Regex = Regex::new(r"(?m)--.*$").unwrap();
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
    static ref THINK_BLOCK: Regex = Regex::new(r"(?s)<think>.*?(?:</think>|$)").unwrap();
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?is)```(?:sql)?\s*(.*?)```").unwrap();
    static ref FENCE_MARKER: Regex = Regex::new(r"(?i)```(?:sql)?\s*").unwrap();
    static ref ANY_KEYWORD: Regex = Regex::new(&format!(r"(?i)\b(?:{})\b", LEADING_KEYWORDS.join("|"))).unwrap();
    static ref STRIP_STOP_KEYWORD: Regex = Regex::new(r"(?i)SELECT|WITH|INSERT|UPDATE|DELETE|SHOW").unwrap();
    static ref TERMINATED_STATEMENT: Regex =
        Regex::new(r"(?is)(?:SELECT|WITH|INSERT|UPDATE|DELETE|SHOW|DESCRIBE|EXPLAIN).*?;").unwrap();
    static ref FROM_TOKEN: Regex = Regex::new(r"(?i)\bFROM\b").unwrap();
    static ref EXPLANATORY: Vec<(&'static str, Regex)> = EXPLANATORY_PHRASES
        .iter()
        .map(|p| (*p, phrase_regex(p)))
        .collect();
    static ref STOPS: Vec<Regex> = STOP_PHRASES.iter().map(|p| phrase_regex(p)).collect();
    static ref STRIPS: Vec<Regex> = STRIP_PHRASES.iter().map(|p| phrase_regex(p)).collect();
}

fn phrase_regex(phrase: &str) -> Regex {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(phrase))).unwrap()
}

/// Why a string was rejected as SQL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlRejection {
    Empty,
    EmptyAfterComments,
    NoSqlKeyword,
    ExplanatoryText(String),
    UnbalancedParentheses,
    SelectWithoutFrom,
}

impl fmt::Display for SqlRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlRejection::Empty => write!(f, "Empty query"),
            SqlRejection::EmptyAfterComments => write!(f, "Query is empty after removing comments"),
            SqlRejection::NoSqlKeyword => write!(f, "No valid SQL keywords found"),
            SqlRejection::ExplanatoryText(p) => write!(f, "Contains explanatory text: '{}'", p),
            SqlRejection::UnbalancedParentheses => write!(f, "Unbalanced parentheses"),
            SqlRejection::SelectWithoutFrom => write!(f, "SELECT query missing FROM clause"),
        }
    }
}

/// Single source of truth for "looks like real SQL". Pure.
pub fn check_sql(candidate: &str) -> Result<(), SqlRejection> {
    if candidate.trim().is_empty() {
        return Err(SqlRejection::Empty);
    }

    let without_lines = LINE_COMMENT.replace_all(candidate, "");
    let cleaned = BLOCK_COMMENT.replace_all(&without_lines, "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Err(SqlRejection::EmptyAfterComments);
    }

    if !ANY_KEYWORD.is_match(cleaned) {
        return Err(SqlRejection::NoSqlKeyword);
    }

    if let Some((phrase, _)) = EXPLANATORY.iter().find(|(_, re)| re.is_match(cleaned)) {
        return Err(SqlRejection::ExplanatoryText(phrase.to_string()));
    }

    if cleaned.matches('(').count() != cleaned.matches(')').count() {
        return Err(SqlRejection::UnbalancedParentheses);
    }

    if starts_with_keyword(cleaned, "SELECT") && !FROM_TOKEN.is_match(cleaned) {
        return Err(SqlRejection::SelectWithoutFrom);
    }

    Ok(())
}

pub fn is_valid_sql(candidate: &str) -> bool {
    check_sql(candidate).is_ok()
}

fn starts_with_keyword(text: &str, keyword: &str) -> bool {
    text.len() >= keyword.len()
        && text.is_char_boundary(keyword.len())
        && text[..keyword.len()].eq_ignore_ascii_case(keyword)
}

fn starts_with_leading_keyword(line: &str) -> bool {
    LEADING_KEYWORDS.iter().any(|k| starts_with_keyword(line, k))
}

/// Which method produced the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionMethod {
    FencedBlock,
    LineScan,
    SingleLine,
    StrippedText,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedSql {
    pub sql: String,
    pub method: ExtractionMethod,
}

#[derive(Debug, Default, Clone)]
pub struct SqlExtractor;

impl SqlExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, raw_text: &str) -> Option<String> {
        self.extract_with_method(raw_text).map(|e| e.sql)
    }

    pub fn extract_with_method(&self, raw_text: &str) -> Option<ExtractedSql> {
        let text = THINK_BLOCK.replace_all(raw_text, "");
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let found = self
            .from_fenced_blocks(text)
            .map(|sql| (sql, ExtractionMethod::FencedBlock))
            .or_else(|| self.from_line_scan(text).map(|sql| (sql, ExtractionMethod::LineScan)))
            .or_else(|| self.from_single_line(text).map(|sql| (sql, ExtractionMethod::SingleLine)))
            .or_else(|| self.from_stripped_text(text).map(|sql| (sql, ExtractionMethod::StrippedText)));

        found.map(|(sql, method)| {
            debug!("Extracted SQL via {:?}", method);
            ExtractedSql { sql, method }
        })
    }

    fn from_fenced_blocks(&self, text: &str) -> Option<String> {
        FENCED_BLOCK
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| strip_fence_tag(m.as_str()).to_string()))
            .find(|block| is_valid_sql(block))
    }

    fn from_line_scan(&self, text: &str) -> Option<String> {
        let mut captured: Vec<&str> = Vec::new();
        let mut in_block = false;

        for line in text.lines() {
            let stripped = line.trim();
            if starts_with_leading_keyword(stripped) {
                in_block = true;
                captured.push(stripped);
            } else if in_block {
                if stripped.is_empty() {
                    if captured.last().map(|l| l.ends_with(';')).unwrap_or(false) {
                        break;
                    }
                } else if stripped.starts_with("--") || stripped.starts_with('#') || stripped.starts_with("//") {
                    continue;
                } else if STOPS.iter().any(|re| re.is_match(stripped)) {
                    break;
                } else {
                    captured.push(stripped);
                }
            }
        }

        if captured.is_empty() {
            return None;
        }
        let candidate = captured.join("\n");
        let candidate = candidate.trim();
        is_valid_sql(candidate).then(|| candidate.to_string())
    }

    fn from_single_line(&self, text: &str) -> Option<String> {
        text.lines()
            .map(str::trim)
            .filter(|l| starts_with_leading_keyword(l) && l.ends_with(';'))
            .find(|l| is_valid_sql(l))
            .map(str::to_string)
    }

    fn from_stripped_text(&self, text: &str) -> Option<String> {
        let mut cleaned = text.to_string();
        for phrase in STRIPS.iter() {
            cleaned = strip_phrase_spans(&cleaned, phrase);
        }
        let cleaned = FENCE_MARKER.replace_all(&cleaned, "");
        let cleaned = cleaned.replace("```", "");
        let cleaned = cleaned.trim();

        let candidate = TERMINATED_STATEMENT.find(cleaned)?.as_str().trim();
        is_valid_sql(candidate).then(|| candidate.to_string())
    }
}

/// Removes each phrase occurrence up to (not including) the next leading
/// keyword, or to the end of the text.
fn strip_phrase_spans(text: &str, phrase: &Regex) -> String {
    let mut out = text.to_string();
    while let Some(m) = phrase.find(&out) {
        let stop = STRIP_STOP_KEYWORD
            .find_at(&out, m.end())
            .map(|k| k.start())
            .unwrap_or(out.len());
        out.replace_range(m.start()..stop, "");
    }
    out
}

/// Drops an info-string line such as `mysql` or `postgresql` left after
/// the opening fence.
fn strip_fence_tag(block: &str) -> &str {
    let block = block.trim();
    match block.split_once('\n') {
        Some((first, rest)) if is_fence_tag(first.trim()) => rest.trim(),
        _ => block,
    }
}

fn is_fence_tag(line: &str) -> bool {
    !line.is_empty()
        && line.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+'))
        && !LEADING_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_block_is_returned_trimmed() {
        let raw = "Here you go:\n```sql\n  SELECT * FROM dim_customer WHERE market = 'India';\n```\nEnjoy.";
        let extracted = SqlExtractor::new().extract_with_method(raw).unwrap();
        assert_eq!(extracted.sql, "SELECT * FROM dim_customer WHERE market = 'India';");
        assert_eq!(extracted.method, ExtractionMethod::FencedBlock);
    }

    #[test]
    fn test_first_valid_fenced_block_wins() {
        let raw = "```\nthis query is wrong\n```\n```sql\nSELECT a FROM t\n```";
        assert_eq!(SqlExtractor::new().extract(raw).as_deref(), Some("SELECT a FROM t"));
    }

    #[test]
    fn test_fence_language_tag_is_dropped() {
        let raw = "Try this:\n```mysql\nSELECT a FROM t\n```";
        let extracted = SqlExtractor::new().extract_with_method(raw).unwrap();
        assert_eq!(extracted.sql, "SELECT a FROM t");
        assert_eq!(extracted.method, ExtractionMethod::FencedBlock);

        let untagged = "```\nSELECT\n  a\nFROM t\n```";
        assert_eq!(SqlExtractor::new().extract(untagged).as_deref(), Some("SELECT\n  a\nFROM t"));
    }

    #[test]
    fn test_pure_prose_returns_none() {
        let raw = "I am sorry, I cannot help with that request. Please rephrase it.";
        assert!(SqlExtractor::new().extract(raw).is_none());
    }

    #[test]
    fn test_line_scan_stops_at_explanation() {
        let raw = "Sure.\nSELECT c.customer, SUM(s.sold_quantity)\nFROM fact_sales_monthly s\nJOIN dim_customer c ON c.customer_code = s.customer_code\nGROUP BY c.customer\nNote that totals are rounded.";
        let extracted = SqlExtractor::new().extract_with_method(raw).unwrap();
        assert_eq!(extracted.method, ExtractionMethod::LineScan);
        assert!(extracted.sql.ends_with("GROUP BY c.customer"));
        assert!(!extracted.sql.contains("Note"));
    }

    #[test]
    fn test_line_scan_stops_after_terminated_statement() {
        let raw = "SELECT * FROM dim_product;\n\nSELECT * FROM dim_customer;";
        assert_eq!(SqlExtractor::new().extract(raw).as_deref(), Some("SELECT * FROM dim_product;"));
    }

    #[test]
    fn test_think_block_is_ignored() {
        let raw = "<think>maybe SELECT nothing</think>\nSELECT product FROM dim_product;";
        assert_eq!(
            SqlExtractor::new().extract(raw).as_deref(),
            Some("SELECT product FROM dim_product;")
        );
    }

    #[test]
    fn test_stripped_text_fallback() {
        let raw = "To calculate the total we can use SELECT SUM(gross_price) FROM fact_gross_price; however it is slow.";
        let extracted = SqlExtractor::new().extract_with_method(raw).unwrap();
        assert_eq!(extracted.sql, "SELECT SUM(gross_price) FROM fact_gross_price;");
        assert_eq!(extracted.method, ExtractionMethod::StrippedText);
    }

    #[test]
    fn test_check_sql_rejections() {
        assert_eq!(check_sql("   "), Err(SqlRejection::Empty));
        assert_eq!(check_sql("-- just a comment"), Err(SqlRejection::EmptyAfterComments));
        assert_eq!(check_sql("hello world"), Err(SqlRejection::NoSqlKeyword));
        assert_eq!(check_sql("SELECT (a FROM t"), Err(SqlRejection::UnbalancedParentheses));
        assert_eq!(check_sql("SELECT 1"), Err(SqlRejection::SelectWithoutFrom));
        assert_eq!(
            check_sql("SELECT a FROM t -- however\nWHERE the issue = 1"),
            Err(SqlRejection::ExplanatoryText("the issue".to_string()))
        );
        assert!(check_sql("SELECT a FROM t WHERE is_active = 1 /* note that */").is_ok());
    }

    #[test]
    fn test_phrases_match_whole_words_only() {
        assert!(is_valid_sql("SELECT * FROM orders WHERE is_deleted = 0"));
    }
}
