//! Fallback Query
//!
//! Last resort when no targeted repair works: browse the primary table.
//! The result no longer answers the user's question and is always reported
//! as `QueryProvenance::Fallback`.

use crate::aliases::AliasTable;

pub const DEFAULT_FALLBACK_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct FallbackQueryGenerator {
    limit: usize,
}

impl Default for FallbackQueryGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_LIMIT)
    }
}

impl FallbackQueryGenerator {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    /// `SELECT * FROM <first declared table> LIMIT n`, or `None` when the
    /// query names no table.
    pub fn generate(&self, sql: &str) -> Option<String> {
        let tables = AliasTable::parse(sql);
        let table = tables.primary_table()?;
        Some(format!("SELECT * FROM {} LIMIT {}", table, self.limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_uses_first_from_table() {
        let gen = FallbackQueryGenerator::default();
        let sql = "SELECT weird.stuff FROM fact_sales_monthly fsm WHERE fsm.fiscal_year = 2021";
        assert_eq!(
            gen.generate(sql).as_deref(),
            Some("SELECT * FROM fact_sales_monthly LIMIT 10")
        );
    }

    #[test]
    fn test_fallback_respects_configured_limit() {
        let gen = FallbackQueryGenerator::new(25);
        assert_eq!(
            gen.generate("select x from gdb041.dim_customer c").as_deref(),
            Some("SELECT * FROM gdb041.dim_customer LIMIT 25")
        );
    }

    #[test]
    fn test_no_from_table() {
        let gen = FallbackQueryGenerator::default();
        assert!(gen.generate("SHOW TABLES").is_none());
        assert!(gen.generate("SELECT 'from x' AS y").is_none());
    }

    #[test]
    fn test_function_call_from_is_not_the_table() {
        let gen = FallbackQueryGenerator::default();
        let sql = "SELECT EXTRACT(YEAR FROM s.date) AS yr, s.bogus FROM fact_sales_monthly s";
        assert_eq!(
            gen.generate(sql).as_deref(),
            Some("SELECT * FROM fact_sales_monthly LIMIT 10")
        );
    }

    #[test]
    fn test_derived_table_is_skipped_for_inner_table() {
        let gen = FallbackQueryGenerator::default();
        let sql = "SELECT t.n FROM (SELECT COUNT(*) AS n FROM dim_product) t";
        assert_eq!(
            gen.generate(sql).as_deref(),
            Some("SELECT * FROM dim_product LIMIT 10")
        );
    }
}
