use crate::normalize::normalize;

/// Decides whether a listing title belongs to the queried brand or product family.
///
/// A title matches when either strategy holds:
/// 1. the query is a case-insensitive substring of the title;
/// 2. the normalized query is a substring of the normalized title.
///
/// Normalization tolerates brand names written with or without inner spacing
/// ("Master Chef" / "MasterChef"). The direct check is kept alongside it so a
/// query whose normalized form is empty (pure punctuation) still matches a
/// title that contains it literally.
#[derive(Debug, Clone)]
pub struct Matcher {
    query_lower: String,
    query_normalized: String,
}

impl Matcher {
    pub fn new(query: &str) -> Self {
        let query = query.trim();
        Self {
            query_lower: query.to_lowercase(),
            query_normalized: normalize(query),
        }
    }

    pub fn direct_match(&self, title: &str) -> bool {
        !self.query_lower.is_empty() && title.to_lowercase().contains(&self.query_lower)
    }

    pub fn normalized_match(&self, title: &str) -> bool {
        !self.query_normalized.is_empty() && normalize(title).contains(&self.query_normalized)
    }

    pub fn matches(&self, title: &str) -> bool {
        self.direct_match(title) || self.normalized_match(title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_substring_ignores_case() {
        let matcher = Matcher::new("Sun Feast");
        assert!(matcher.direct_match("SUN FEAST Biscuits"));
        assert!(matcher.matches("SUN FEAST Biscuits"));
    }

    #[test]
    fn normalized_match_bridges_spacing() {
        let matcher = Matcher::new("MasterChef");
        assert!(!matcher.direct_match("Master Chef Knife Set"));
        assert!(matcher.normalized_match("Master Chef Knife Set"));
        assert!(matcher.matches("Master Chef Knife Set"));
    }

    #[test]
    fn normalized_match_bridges_punctuation_in_query() {
        let matcher = Matcher::new("Mom's Magic");
        assert!(!matcher.direct_match("Sunfeast Moms Magic Cashew"));
        assert!(matcher.matches("Sunfeast Moms Magic Cashew"));
    }

    #[test]
    fn direct_match_covers_queries_that_normalize_to_nothing() {
        let matcher = Matcher::new("++");
        assert!(!matcher.normalized_match("Notebook A++ Ruled"));
        assert!(matcher.direct_match("Notebook A++ Ruled"));
        assert!(matcher.matches("Notebook A++ Ruled"));
    }

    #[test]
    fn both_strategies_are_needed() {
        let spaced = Matcher::new("MasterChef");
        let symbolic = Matcher::new("++");
        // Neither strategy alone accepts both titles.
        let titles = ["Master Chef Knife Set", "Notebook A++ Ruled"];
        assert!(spaced.matches(titles[0]) && symbolic.matches(titles[1]));
        assert!(!(spaced.direct_match(titles[0]) && symbolic.direct_match(titles[1])));
        assert!(!(spaced.normalized_match(titles[0]) && symbolic.normalized_match(titles[1])));
    }

    #[test]
    fn unrelated_titles_do_not_match() {
        let matcher = Matcher::new("Sunfeast");
        assert!(!matcher.matches("ITC Aashirvaad Atta"));
        assert!(!Matcher::new("   ").matches("anything"));
    }
}
