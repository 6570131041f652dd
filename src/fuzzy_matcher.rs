use strsim::normalized_levenshtein;

/// Fuzzy matcher for SQL identifiers (column and table names)
#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    /// Similarity threshold (0.0-1.0) for considering two names a match
    pub similarity_threshold: f64,
    /// Whether to normalize identifiers before comparison
    pub normalize: bool,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            normalize: true,
        }
    }
}

impl FuzzyMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            similarity_threshold: threshold,
            normalize: true,
        }
    }

    /// Normalize an identifier for fuzzy matching
    /// - Lowercases
    /// - Strips surrounding quotes/backticks
    /// - Drops any `schema.` qualifier
    pub fn normalize_identifier(&self, s: &str) -> String {
        if !self.normalize {
            return s.to_lowercase();
        }

        let trimmed = s.trim().trim_matches(|c| c == '`' || c == '"' || c == '\'');
        let unqualified = trimmed.rsplit('.').next().unwrap_or(trimmed);
        unqualified.to_lowercase()
    }

    /// Edit-distance ratio between two identifiers in [0, 1].
    pub fn similarity(&self, s1: &str, s2: &str) -> f64 {
        let norm1 = self.normalize_identifier(s1);
        let norm2 = self.normalize_identifier(s2);
        normalized_levenshtein(&norm1, &norm2)
    }

    /// One name contains the other (e.g. `discount` / `discounts_pct`).
    pub fn is_containment(&self, s1: &str, s2: &str) -> bool {
        let norm1 = self.normalize_identifier(s1);
        let norm2 = self.normalize_identifier(s2);
        !norm1.is_empty() && !norm2.is_empty() && (norm1.contains(&norm2) || norm2.contains(&norm1))
    }

    /// Similar enough to be worth surfacing: ratio above threshold or containment.
    pub fn is_similar(&self, s1: &str, s2: &str) -> bool {
        self.similarity(s1, s2) > self.similarity_threshold || self.is_containment(s1, s2)
    }

    /// Best-scoring candidate strictly above `threshold`. Ties keep the
    /// earliest candidate.
    pub fn find_best_match<'a, I>(&self, target: &str, candidates: I, threshold: f64) -> Option<(&'a str, f64)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut best: Option<(&'a str, f64)> = None;
        for candidate in candidates {
            let score = self.similarity(target, candidate);
            if score <= threshold {
                continue;
            }
            match best {
                Some((_, best_score)) if best_score >= score => {}
                _ => best = Some((candidate, score)),
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_identifier() {
        let matcher = FuzzyMatcher::default();
        assert_eq!(matcher.normalize_identifier("`Discounts_PCT`"), "discounts_pct");
        assert_eq!(matcher.normalize_identifier("gdb041.fact_sales_monthly"), "fact_sales_monthly");
    }

    #[test]
    fn test_similarity() {
        let matcher = FuzzyMatcher::default();
        let score = matcher.similarity("discount_pct", "discounts_pct");
        assert!(score > 0.9, "score was {}", score);
        assert!(matcher.similarity("discount_pct", "customer_code") < 0.6);
        assert_eq!(matcher.similarity("Freight_Pct", "freight_pct"), 1.0);
    }

    #[test]
    fn test_containment_counts_as_similar() {
        let matcher = FuzzyMatcher::default();
        assert!(matcher.is_containment("discount", "pre_invoice_discount_pct"));
        assert!(matcher.is_similar("discount", "pre_invoice_discount_pct"));
        assert!(!matcher.is_similar("region", "sold_quantity"));
    }

    #[test]
    fn test_find_best_match_prefers_earliest_on_tie() {
        let matcher = FuzzyMatcher::default();
        let candidates = ["fact_sales_montly", "fact_sales_monthlx", "dim_product"];
        let best = matcher.find_best_match("fact_sales_monthly", candidates.iter().copied(), 0.8);
        assert_eq!(best.map(|(name, _)| name), Some("fact_sales_montly"));
        assert!(matcher
            .find_best_match("dim_customer", ["fact_gross_price"].iter().copied(), 0.8)
            .is_none());
    }
}
