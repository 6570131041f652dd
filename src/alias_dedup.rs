//! Alias Deduplication
//!
//! Renames table aliases declared more than once in the same FROM scope.
//! The first declaration keeps its name; later ones become `<alias>2`,
//! `<alias>3`, ... Column references are rebound by clause scope:
//!
//! - a reference inside the FROM/JOIN list after a renamed declaration
//!   (typically its ON predicate) follows that declaration
//! - a reference anywhere else in the statement (SELECT list, WHERE,
//!   GROUP BY, ...) stays bound to the first declaration
//! - subqueries are separate scopes; an inner declaration shadows outer ones
//!
//! If the statement cannot be tokenized, only the duplicate declarations are
//! renamed and references are left untouched.

use crate::aliases::{is_non_alias_keyword, splice, AliasTable};
use sqlparser::dialect::MySqlDialect;
use sqlparser::tokenizer::{Token, TokenWithLocation, Tokenizer};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use tracing::warn;

const CLAUSE_END: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "UNION", "EXCEPT", "INTERSECT", "WINDOW",
];

/// Aliases (lowercased) declared more than once anywhere in `sql`.
pub fn duplicate_aliases(sql: &str) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for decl in AliasTable::parse(sql).declarations() {
        if !decl.is_explicit() {
            continue;
        }
        let key = decl.alias.to_lowercase();
        match counts.iter_mut().find(|(k, _)| *k == key) {
            Some((_, n)) => *n += 1,
            None => counts.push((key, 1)),
        }
    }
    counts.into_iter().filter(|(_, n)| *n > 1).map(|(k, _)| k).collect()
}

pub fn deduplicate(sql: &str) -> String {
    if duplicate_aliases(sql).is_empty() {
        return sql.to_string();
    }

    let mut tokenizer = Tokenizer::new(&MySqlDialect {}, sql);
    match tokenizer.tokenize_with_location() {
        Ok(tokens) => ScopedRenamer::new(sql, &tokens).run(),
        Err(e) => {
            warn!("Tokenizer failed ({}), renaming duplicate declarations only", e);
            rename_declarations_only(sql)
        }
    }
}

fn rename_declarations_only(sql: &str) -> String {
    let tables = AliasTable::parse(sql);
    let mut taken: HashSet<String> = tables.aliases().iter().map(|a| a.to_lowercase()).collect();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut edits: Vec<(Range<usize>, String)> = Vec::new();

    for decl in tables.declarations() {
        let Some(span) = decl.alias_span.clone() else {
            continue;
        };
        let key = decl.alias.to_lowercase();
        let count = seen.entry(key).or_insert(0);
        *count += 1;
        if *count > 1 {
            let new_name = fresh_name(&decl.alias, *count, &taken);
            taken.insert(new_name.to_lowercase());
            edits.push((span, new_name));
        }
    }
    apply_edits(sql, edits)
}

#[derive(Default)]
struct Scope {
    /// lowercased alias -> number of declarations so far
    declared: HashMap<String, usize>,
    /// lowercased alias -> name references currently bind to
    active: HashMap<String, String>,
    in_from: bool,
    /// a `(` directly after FROM/JOIN: the closing paren is followed by an alias
    derived: bool,
    /// a SELECT opened at this depth; otherwise a nested FROM belongs to a
    /// function call such as `EXTRACT(YEAR FROM d)`
    selected: bool,
}

struct ScopedRenamer<'a> {
    sql: &'a str,
    /// (token, byte offset) for every non-whitespace token
    tokens: Vec<(&'a Token, usize)>,
    scopes: Vec<Scope>,
    taken: HashSet<String>,
    edits: Vec<(Range<usize>, String)>,
}

impl<'a> ScopedRenamer<'a> {
    fn new(sql: &'a str, tokens: &'a [TokenWithLocation]) -> Self {
        let offsets = LineIndex::new(sql);
        let tokens = tokens
            .iter()
            .filter(|t| !matches!(t.token, Token::Whitespace(_) | Token::EOF))
            .map(|t| {
                let offset = offsets.byte_offset(t.location.line as usize, t.location.column as usize);
                (&t.token, offset)
            })
            .collect();
        let taken = AliasTable::parse(sql)
            .aliases()
            .iter()
            .map(|a| a.to_lowercase())
            .collect();

        Self {
            sql,
            tokens,
            scopes: vec![Scope::default()],
            taken,
            edits: Vec::new(),
        }
    }

    fn run(mut self) -> String {
        let mut i = 0;
        while i < self.tokens.len() {
            let (token, _) = self.tokens[i];
            match token {
                Token::Word(w) if w.quote_style.is_none() => {
                    let upper = w.value.to_uppercase();
                    let call_argument = upper == "FROM"
                        && self.scopes.len() > 1
                        && !self.scopes.last().map(|s| s.selected).unwrap_or(true);
                    if (upper == "FROM" || upper == "JOIN") && !call_argument {
                        if upper == "FROM" {
                            self.current().in_from = true;
                        }
                        i = self.declaration(i + 1);
                        continue;
                    }
                    if upper == "SELECT" {
                        let scope = self.current();
                        scope.in_from = false;
                        scope.selected = true;
                        scope.declared.clear();
                        scope.active.clear();
                    } else if CLAUSE_END.contains(&upper.as_str()) {
                        let scope = self.current();
                        scope.in_from = false;
                        scope.active.clear();
                    } else if self.is_reference_head(i) {
                        self.rebind_reference(i);
                        i += 3;
                        continue;
                    }
                }
                Token::Comma => {
                    let in_from = self.current().in_from;
                    if in_from {
                        i = self.declaration(i + 1);
                        continue;
                    }
                }
                Token::LParen => {
                    self.scopes.push(Scope::default());
                }
                Token::RParen => {
                    if self.scopes.len() > 1 {
                        let closed = self.scopes.pop();
                        if closed.map(|s| s.derived).unwrap_or(false) {
                            i = self.derived_alias(i + 1);
                            continue;
                        }
                    }
                }
                _ => {}
            }
            i += 1;
        }

        apply_edits(self.sql, self.edits)
    }

    fn current(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    /// Parses `table [AS] alias` starting at token `i`; returns the index to resume at.
    fn declaration(&mut self, mut i: usize) -> usize {
        match self.tokens.get(i) {
            Some((Token::LParen, _)) => {
                self.scopes.push(Scope {
                    derived: true,
                    ..Default::default()
                });
                return i + 1;
            }
            Some((Token::Word(w), _)) if !is_non_alias_keyword(&w.value) => {}
            _ => return i,
        }
        i += 1;
        // schema-qualified table
        if matches!(self.tokens.get(i), Some((Token::Period, _)))
            && matches!(self.tokens.get(i + 1), Some((Token::Word(_), _)))
        {
            i += 2;
        }
        self.alias_after(i)
    }

    fn derived_alias(&mut self, i: usize) -> usize {
        self.alias_after(i)
    }

    fn alias_after(&mut self, mut i: usize) -> usize {
        if let Some((Token::Word(w), _)) = self.tokens.get(i) {
            if w.quote_style.is_none() && w.value.eq_ignore_ascii_case("AS") {
                i += 1;
            }
        }
        let Some(&(token, offset)) = self.tokens.get(i) else {
            return i;
        };
        let Token::Word(w) = token else {
            return i;
        };
        if w.quote_style.is_some() || is_non_alias_keyword(&w.value) {
            return i;
        }

        let key = w.value.to_lowercase();
        let count = {
            let scope = self.current();
            let count = scope.declared.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if count > 1 {
            let new_name = fresh_name(&w.value, count, &self.taken);
            self.taken.insert(new_name.to_lowercase());
            self.edits.push((offset..offset + w.value.len(), new_name.clone()));
            self.current().active.insert(key, new_name);
        } else {
            self.current().active.remove(&key);
        }
        i + 1
    }

    /// `word . word` not itself preceded by a period.
    fn is_reference_head(&self, i: usize) -> bool {
        let preceded_by_period = i > 0 && matches!(self.tokens[i - 1].0, Token::Period);
        !preceded_by_period
            && matches!(self.tokens.get(i + 1), Some((Token::Period, _)))
            && matches!(self.tokens.get(i + 2), Some((Token::Word(_), _)))
    }

    fn rebind_reference(&mut self, i: usize) {
        let (token, offset) = self.tokens[i];
        let Token::Word(w) = token else {
            return;
        };
        let key = w.value.to_lowercase();
        for scope in self.scopes.iter().rev() {
            if !scope.declared.contains_key(&key) {
                continue;
            }
            if scope.in_from {
                if let Some(new_name) = scope.active.get(&key) {
                    self.edits.push((offset..offset + w.value.len(), new_name.clone()));
                }
            }
            return;
        }
    }
}

fn fresh_name(alias: &str, start: usize, taken: &HashSet<String>) -> String {
    let mut n = start;
    loop {
        let candidate = format!("{}{}", alias, n);
        if !taken.contains(&candidate.to_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}

fn apply_edits(sql: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    edits.sort_by_key(|(span, _)| span.start);
    let mut out = sql.to_string();
    for (span, name) in edits.iter().rev() {
        out = splice(&out, std::slice::from_ref(span), name);
    }
    out
}

/// Maps tokenizer (line, column) locations, both 1-based and counted in
/// chars, to byte offsets.
struct LineIndex<'a> {
    sql: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(sql: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(sql.match_indices('\n').map(|(idx, _)| idx + 1));
        Self { sql, line_starts }
    }

    fn byte_offset(&self, line: usize, column: usize) -> usize {
        let start = self
            .line_starts
            .get(line.saturating_sub(1))
            .copied()
            .unwrap_or(self.sql.len());
        let rest = &self.sql[start..];
        rest.char_indices()
            .nth(column.saturating_sub(1))
            .map(|(idx, _)| start + idx)
            .unwrap_or(self.sql.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_declaration_renamed() {
        let sql = "SELECT a.name FROM customers a JOIN orders a ON a.customer_id = a.id";
        let out = deduplicate(sql);
        assert_eq!(
            out,
            "SELECT a.name FROM customers a JOIN orders a2 ON a2.customer_id = a2.id"
        );
        assert!(duplicate_aliases(&out).is_empty());
    }

    #[test]
    fn test_where_clause_stays_on_first_declaration() {
        let sql = "SELECT a.x FROM t1 a JOIN t2 a ON a.k = a.k WHERE a.x > 1";
        let out = deduplicate(sql);
        assert_eq!(out, "SELECT a.x FROM t1 a JOIN t2 a2 ON a2.k = a2.k WHERE a.x > 1");
    }

    #[test]
    fn test_third_declaration_gets_next_number() {
        let sql = "SELECT 1 FROM t1 s JOIN t2 s ON s.id = 1 JOIN t3 s ON s.id = 2";
        let out = deduplicate(sql);
        assert_eq!(out, "SELECT 1 FROM t1 s JOIN t2 s2 ON s2.id = 1 JOIN t3 s3 ON s3.id = 2");
    }

    #[test]
    fn test_identical_substrings_are_not_rewritten() {
        let sql = "SELECT a.area, 'a' AS label FROM t1 a JOIN t2 a ON a.id = a.id";
        let out = deduplicate(sql);
        assert!(out.starts_with("SELECT a.area, 'a' AS label FROM t1 a JOIN t2 a2"));
    }

    #[test]
    fn test_subquery_aliases_are_separate_scopes() {
        let sql = "SELECT a.x FROM t1 a WHERE a.id IN (SELECT a.id FROM t2 a)";
        assert_eq!(deduplicate(sql), sql);
    }

    #[test]
    fn test_existing_numbered_alias_is_skipped() {
        let sql = "SELECT 1 FROM t1 a JOIN t2 a2 ON a2.id = a.id JOIN t3 a ON a.id = a2.id";
        let out = deduplicate(sql);
        assert!(out.contains("JOIN t3 a3 ON a3.id = a2.id"), "{}", out);
    }

    #[test]
    fn test_multiline_offsets() {
        let sql = "SELECT a.x\nFROM t1 a\nJOIN t2 a\n  ON a.id = a.id";
        let out = deduplicate(sql);
        assert_eq!(out, "SELECT a.x\nFROM t1 a\nJOIN t2 a2\n  ON a2.id = a2.id");
    }

    #[test]
    fn test_from_inside_function_call_is_ignored() {
        let sql = "SELECT EXTRACT(YEAR FROM a.date) FROM t1 a JOIN t2 a ON a.id = a.id";
        let out = deduplicate(sql);
        assert_eq!(out, "SELECT EXTRACT(YEAR FROM a.date) FROM t1 a JOIN t2 a2 ON a2.id = a2.id");
    }

    #[test]
    fn test_no_duplicates_is_identity() {
        let sql = "SELECT a.x FROM t1 a JOIN t2 b ON a.id = b.id";
        assert_eq!(deduplicate(sql), sql);
    }
}
