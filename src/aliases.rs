//! Alias Table
//!
//! Heuristic scanning of `FROM`/`JOIN` declarations and `alias.column`
//! references. Rebuilt from scratch for every candidate; repairs change the
//! alias set, so nothing here is cached.

use lazy_static::lazy_static;
use regex::Regex;
use std::ops::Range;

lazy_static! {
    static ref DECLARATION_KEYWORD: Regex = Regex::new(r"(?i)\b(FROM|JOIN)\s+").unwrap();
    static ref TABLE_AND_ALIAS: Regex =
        Regex::new(r"^(\w+(?:\.\w+)?)(?:\s+(?:(?i:AS)\s+)?(\w+))?").unwrap();
    static ref DERIVED_ALIAS: Regex = Regex::new(r"^\s+(?:(?i:AS)\s+)?(\w+)").unwrap();
    static ref COLUMN_REFERENCE: Regex = Regex::new(r"\b(\w+)\.(\w+)\b").unwrap();
    static ref WORD: Regex = Regex::new(r"\b\w+\b").unwrap();
    static ref PAREN_OR_WORD: Regex = Regex::new(r"[()]|\b\w+\b").unwrap();
}

/// Words that can follow a table name but are never an alias.
const NON_ALIAS_KEYWORDS: &[&str] = &[
    "ON", "WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "JOIN", "INNER", "LEFT", "RIGHT",
    "FULL", "CROSS", "OUTER", "NATURAL", "UNION", "USING", "EXCEPT", "INTERSECT", "WINDOW",
    "OFFSET", "SET", "VALUES", "SELECT",
];

pub(crate) fn is_non_alias_keyword(word: &str) -> bool {
    NON_ALIAS_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

/// One table binding found after `FROM`/`JOIN` (or after a comma in a
/// `FROM a x, b y` list).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasDeclaration {
    pub alias: String,
    pub table: String,
    /// Byte span of the table token; `None` for derived tables.
    pub table_span: Option<Range<usize>>,
    /// Byte span of the alias token; `None` when the table is unaliased.
    pub alias_span: Option<Range<usize>>,
}

impl AliasDeclaration {
    pub fn is_explicit(&self) -> bool {
        self.alias_span.is_some()
    }

    /// Table name without any `schema.` prefix.
    pub fn bare_table(&self) -> &str {
        strip_qualifier(&self.table)
    }
}

/// Alias -> table mapping for one candidate, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    declarations: Vec<AliasDeclaration>,
}

impl AliasTable {
    pub fn parse(sql: &str) -> Self {
        let quoted = quoted_ranges(sql);
        let mut declarations = Vec::new();

        for caps in DECLARATION_KEYWORD.captures_iter(sql) {
            let Some(kw) = caps.get(0) else {
                continue;
            };
            if in_ranges(&quoted, kw.start()) {
                continue;
            }
            let is_from = caps
                .get(1)
                .map(|k| k.as_str().eq_ignore_ascii_case("FROM"))
                .unwrap_or(false);
            if is_from && !opens_table_list(sql, kw.start(), &quoted) {
                continue;
            }
            let mut pos = kw.end();
            loop {
                let Some((decl, next)) = parse_declaration(sql, pos) else {
                    break;
                };
                declarations.push(decl);
                // `FROM a x, b y` lists continue after a comma
                let rest = &sql[next..];
                let trimmed = rest.trim_start();
                if let Some(after_comma) = trimmed.strip_prefix(',') {
                    let skipped = rest.len() - after_comma.len();
                    pos = next + skipped + (after_comma.len() - after_comma.trim_start().len());
                } else {
                    break;
                }
            }
        }

        Self { declarations }
    }

    pub fn declarations(&self) -> &[AliasDeclaration] {
        &self.declarations
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Case-insensitive membership test; the first declaration wins.
    pub fn contains(&self, alias: &str) -> bool {
        self.lookup(alias).is_some()
    }

    pub fn table_for(&self, alias: &str) -> Option<&str> {
        self.lookup(alias).map(|d| d.table.as_str())
    }

    pub fn lookup(&self, alias: &str) -> Option<&AliasDeclaration> {
        self.declarations
            .iter()
            .find(|d| d.alias.eq_ignore_ascii_case(alias))
            .or_else(|| {
                // unaliased tables may be referenced by their bare name
                self.declarations
                    .iter()
                    .find(|d| d.alias_span.is_none() && d.bare_table().eq_ignore_ascii_case(alias))
            })
    }

    /// Distinct aliases in declaration order (first spelling kept).
    pub fn aliases(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for decl in &self.declarations {
            if !seen.iter().any(|s| s.eq_ignore_ascii_case(&decl.alias)) {
                seen.push(&decl.alias);
            }
        }
        seen
    }

    /// The first named table declared, if any. Derived tables are skipped
    /// in favour of the tables inside them.
    pub fn primary_table(&self) -> Option<&str> {
        self.declarations
            .iter()
            .find(|d| d.table_span.is_some())
            .map(|d| d.table.as_str())
    }
}

/// False for the `FROM` inside `EXTRACT(YEAR FROM d)`, `TRIM(x FROM y)` and
/// the like: within parentheses, only a group with its own SELECT lists tables.
fn opens_table_list(sql: &str, pos: usize, quoted: &[Range<usize>]) -> bool {
    // one entry per open paren: has a SELECT been seen at that depth
    let mut groups: Vec<bool> = Vec::new();
    for m in PAREN_OR_WORD.find_iter(&sql[..pos]) {
        if in_ranges(quoted, m.start()) {
            continue;
        }
        match m.as_str() {
            "(" => groups.push(false),
            ")" => {
                groups.pop();
            }
            word if word.eq_ignore_ascii_case("SELECT") => {
                if let Some(top) = groups.last_mut() {
                    *top = true;
                }
            }
            _ => {}
        }
    }
    groups.last().copied().unwrap_or(true)
}

fn parse_declaration(sql: &str, pos: usize) -> Option<(AliasDeclaration, usize)> {
    let rest = &sql[pos..];

    if rest.starts_with('(') {
        let close = matching_paren(sql, pos)?;
        let caps = DERIVED_ALIAS.captures(&sql[close + 1..])?;
        let alias = caps.get(1)?;
        if is_non_alias_keyword(alias.as_str()) {
            return None;
        }
        let span = close + 1 + alias.start()..close + 1 + alias.end();
        return Some((
            AliasDeclaration {
                alias: alias.as_str().to_string(),
                table: sql[pos..=close].to_string(),
                table_span: None,
                alias_span: Some(span.clone()),
            },
            span.end,
        ));
    }

    let caps = TABLE_AND_ALIAS.captures(rest)?;
    let table = caps.get(1)?;
    if is_non_alias_keyword(table.as_str()) {
        return None;
    }
    let table_span = pos + table.start()..pos + table.end();

    match caps.get(2) {
        Some(alias) if !is_non_alias_keyword(alias.as_str()) => {
            let alias_span = pos + alias.start()..pos + alias.end();
            Some((
                AliasDeclaration {
                    alias: alias.as_str().to_string(),
                    table: table.as_str().to_string(),
                    table_span: Some(table_span),
                    alias_span: Some(alias_span.clone()),
                },
                alias_span.end,
            ))
        }
        _ => Some((
            AliasDeclaration {
                alias: strip_qualifier(table.as_str()).to_string(),
                table: table.as_str().to_string(),
                table_span: Some(table_span.clone()),
                alias_span: None,
            },
            table_span.end,
        )),
    }
}

fn matching_paren(sql: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, ch) in sql[open..].char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// An `alias.column` occurrence; identity is its position only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnReference {
    pub alias: String,
    pub column: String,
    pub span: Range<usize>,
}

impl ColumnReference {
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.alias, self.column)
    }

    pub fn matches(&self, alias: &str, column: &str) -> bool {
        self.alias.eq_ignore_ascii_case(alias) && self.column.eq_ignore_ascii_case(column)
    }
}

/// Every `alias.column` token outside string literals and table names.
pub fn column_references(sql: &str) -> Vec<ColumnReference> {
    let quoted = quoted_ranges(sql);
    let tables = AliasTable::parse(sql);
    let table_spans: Vec<Range<usize>> = tables
        .declarations()
        .iter()
        .filter_map(|d| d.table_span.clone())
        .collect();

    COLUMN_REFERENCE
        .captures_iter(sql)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let alias = caps.get(1)?.as_str();
            if alias.starts_with(|c: char| c.is_ascii_digit()) {
                return None;
            }
            if in_ranges(&quoted, whole.start())
                || table_spans.iter().any(|s| s.contains(&whole.start()))
            {
                return None;
            }
            Some(ColumnReference {
                alias: alias.to_string(),
                column: caps.get(2)?.as_str().to_string(),
                span: whole.range(),
            })
        })
        .collect()
}

/// Replace every `alias.column` reference (case-insensitive) with `replacement`.
pub fn replace_column_reference(sql: &str, alias: &str, column: &str, replacement: &str) -> String {
    let spans: Vec<Range<usize>> = column_references(sql)
        .into_iter()
        .filter(|r| r.matches(alias, column))
        .map(|r| r.span)
        .collect();
    splice(sql, &spans, replacement)
}

/// Replace unqualified occurrences of `column` (not part of `x.column` or `column.x`).
pub fn replace_bare_column(sql: &str, column: &str, replacement: &str) -> String {
    let quoted = quoted_ranges(sql);
    let bytes = sql.as_bytes();
    let spans: Vec<Range<usize>> = WORD
        .find_iter(sql)
        .filter(|m| m.as_str().eq_ignore_ascii_case(column))
        .filter(|m| !in_ranges(&quoted, m.start()))
        .filter(|m| m.start() == 0 || bytes[m.start() - 1] != b'.')
        .filter(|m| bytes.get(m.end()) != Some(&b'.'))
        .map(|m| m.range())
        .collect();
    splice(sql, &spans, replacement)
}

/// Rewrite declared table names equal to `table` (schema prefix ignored).
pub fn replace_table(sql: &str, table: &str, replacement: &str) -> String {
    let wanted = strip_qualifier(table);
    let spans: Vec<Range<usize>> = AliasTable::parse(sql)
        .declarations()
        .iter()
        .filter(|d| d.bare_table().eq_ignore_ascii_case(wanted))
        .filter_map(|d| d.table_span.clone())
        .collect();
    splice(sql, &spans, replacement)
}

pub(crate) fn splice(sql: &str, spans: &[Range<usize>], replacement: &str) -> String {
    if spans.is_empty() {
        return sql.to_string();
    }
    let mut out = String::with_capacity(sql.len() + spans.len() * replacement.len());
    let mut last = 0;
    for span in spans {
        out.push_str(&sql[last..span.start]);
        out.push_str(replacement);
        last = span.end;
    }
    out.push_str(&sql[last..]);
    out
}

pub(crate) fn strip_qualifier(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Byte ranges covered by single-quoted string literals.
pub(crate) fn quoted_ranges(sql: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start: Option<usize> = None;
    let bytes = sql.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'\'' {
            match start {
                None => start = Some(idx),
                Some(s) => {
                    // doubled quote is an escaped quote
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 2;
                        continue;
                    }
                    ranges.push(s..idx + 1);
                    start = None;
                }
            }
        }
        idx += 1;
    }
    if let Some(s) = start {
        ranges.push(s..bytes.len());
    }
    ranges
}

pub(crate) fn in_ranges(ranges: &[Range<usize>], pos: usize) -> bool {
    ranges.iter().any(|r| r.contains(&pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_from_and_join_aliases() {
        let sql = "SELECT a.x FROM orders a JOIN customers AS c ON a.cid = c.id";
        let table = AliasTable::parse(sql);
        assert_eq!(table.aliases(), vec!["a", "c"]);
        assert_eq!(table.table_for("A"), Some("orders"));
        assert_eq!(table.table_for("c"), Some("customers"));
        assert_eq!(table.primary_table(), Some("orders"));
    }

    #[test]
    fn test_keyword_is_not_alias() {
        let sql = "SELECT * FROM orders WHERE id = 1";
        let table = AliasTable::parse(sql);
        let decl = &table.declarations()[0];
        assert!(!decl.is_explicit());
        assert_eq!(decl.alias, "orders");
        assert!(table.contains("orders"));
    }

    #[test]
    fn test_unaliased_join_after_unaliased_from() {
        let sql = "SELECT * FROM orders JOIN customers c ON orders.cid = c.id";
        let table = AliasTable::parse(sql);
        assert_eq!(table.aliases(), vec!["orders", "c"]);
    }

    #[test]
    fn test_comma_separated_from_list() {
        let sql = "SELECT * FROM orders o, customers c WHERE o.cid = c.id";
        let table = AliasTable::parse(sql);
        assert_eq!(table.aliases(), vec!["o", "c"]);
    }

    #[test]
    fn test_derived_table_alias() {
        let sql = "SELECT t.total FROM (SELECT SUM(x) AS total FROM s) t";
        let table = AliasTable::parse(sql);
        assert!(table.contains("t"));
        assert!(table.contains("s"));
    }

    #[test]
    fn test_from_inside_function_call_is_not_a_table() {
        let sql = "SELECT EXTRACT(YEAR FROM s.date) AS yr, TRIM(BOTH ' ' FROM s.note), s.bogus \
                   FROM fact_sales_monthly s";
        let table = AliasTable::parse(sql);
        assert_eq!(table.aliases(), vec!["s"]);
        assert_eq!(table.primary_table(), Some("fact_sales_monthly"));

        let refs: Vec<String> = column_references(sql).iter().map(|r| r.qualified()).collect();
        assert_eq!(refs, vec!["s.date", "s.note", "s.bogus"]);

        let out = replace_column_reference(sql, "s", "date", "s.invoice_date");
        assert!(out.starts_with("SELECT EXTRACT(YEAR FROM s.invoice_date)"));
    }

    #[test]
    fn test_subquery_from_is_still_a_table() {
        let sql = "SELECT c.customer FROM dim_customer c \
                   WHERE c.customer_code IN (SELECT SUBSTRING(f.code FROM 2) FROM fact_sales_monthly f)";
        let table = AliasTable::parse(sql);
        assert_eq!(table.aliases(), vec!["c", "f"]);
        assert_eq!(table.table_for("f"), Some("fact_sales_monthly"));
    }

    #[test]
    fn test_column_references_skip_literals_and_numbers() {
        let sql = "SELECT o.total * 1.5 FROM db.orders o WHERE o.note = 'x.y'";
        let refs: Vec<String> = column_references(sql).iter().map(|r| r.qualified()).collect();
        assert_eq!(refs, vec!["o.total", "o.note"]);
    }

    #[test]
    fn test_replace_column_reference_is_case_insensitive() {
        let sql = "SELECT FPID.discounts_pct, fpid.discounts_pct_x FROM t fpid";
        let out = replace_column_reference(sql, "fpid", "discounts_pct", "fpid2.discounts_pct");
        assert_eq!(out, "SELECT fpid2.discounts_pct, fpid.discounts_pct_x FROM t fpid");
    }

    #[test]
    fn test_replace_bare_column_leaves_qualified() {
        let sql = "SELECT qty, s.qty FROM sales s ORDER BY qty";
        let out = replace_bare_column(sql, "qty", "sold_quantity");
        assert_eq!(out, "SELECT sold_quantity, s.qty FROM sales s ORDER BY sold_quantity");
    }

    #[test]
    fn test_replace_table() {
        let sql = "SELECT * FROM fact_sale s JOIN dim_product p ON s.pc = p.pc";
        let out = replace_table(sql, "mydb.fact_sale", "fact_sales_monthly");
        assert_eq!(out, "SELECT * FROM fact_sales_monthly s JOIN dim_product p ON s.pc = p.pc");
    }
}
