use crate::models::{ListingItem, ProductRecord};
use crate::normalize::slugify;
use std::collections::HashSet;

/// Tracks canonical URLs already emitted; first occurrence wins.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
    duplicates: usize,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the set with URLs persisted by an earlier run.
    pub fn with_known<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seen: urls.into_iter().map(Into::into).collect(),
            duplicates: 0,
        }
    }

    /// Returns `true` when `url` has not been seen before.
    pub fn insert(&mut self, url: &str) -> bool {
        if self.seen.contains(url) {
            self.duplicates += 1;
            false
        } else {
            self.seen.insert(url.to_string());
            true
        }
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Fills in a missing identifier from the title slug.
///
/// Returns `false` when the item has neither, so it cannot be identified.
pub fn ensure_identifier(item: &mut ListingItem) -> bool {
    let id = item.identifier.trim();
    if !id.is_empty() {
        if id.len() != item.identifier.len() {
            item.identifier = id.to_string();
        }
        return true;
    }
    let slug = slugify(&item.title);
    if slug.is_empty() {
        return false;
    }
    item.identifier = slug;
    true
}

#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub records: Vec<ProductRecord>,
    pub duplicates: usize,
    pub unidentified: usize,
}

/// Collapses raw items into unique records keyed by canonical URL.
///
/// `canonical_url` builds the URL from the (possibly derived) identifier and
/// title; returning `None` marks the item as unidentifiable. Input order is
/// preserved for the surviving records.
pub fn dedupe<F>(items: Vec<ListingItem>, dedup: &mut Deduplicator, canonical_url: F) -> DedupOutcome
where
    F: Fn(&ListingItem) -> Option<String>,
{
    let mut outcome = DedupOutcome::default();
    let before = dedup.duplicates();

    for mut item in items {
        if !ensure_identifier(&mut item) {
            outcome.unidentified += 1;
            continue;
        }
        let Some(url) = canonical_url(&item) else {
            outcome.unidentified += 1;
            continue;
        };
        if dedup.insert(&url) {
            outcome.records.push(ProductRecord {
                item,
                url,
                matched: false,
            });
        }
    }

    outcome.duplicates = dedup.duplicates() - before;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, title: &str, price: Option<&str>) -> ListingItem {
        ListingItem {
            identifier: id.to_string(),
            title: title.to_string(),
            price: price.map(str::to_string),
            available: true,
            ..Default::default()
        }
    }

    fn url_for(item: &ListingItem) -> Option<String> {
        Some(format!(
            "https://shop.test/prn/{}/prid/{}",
            slugify(&item.title),
            item.identifier
        ))
    }

    #[test]
    fn same_item_twice_yields_one_record_first_seen_wins() {
        let items = vec![
            item("7", "Good Day Cashew", Some("₹30")),
            item("7", "Good Day Cashew", Some("₹35")),
        ];
        let mut dedup = Deduplicator::new();
        let outcome = dedupe(items, &mut dedup, url_for);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.records[0].item.price.as_deref(), Some("₹30"));
    }

    #[test]
    fn order_of_first_occurrence_is_kept() {
        let items = vec![
            item("3", "C", None),
            item("1", "A", None),
            item("3", "C", None),
            item("2", "B", None),
        ];
        let mut dedup = Deduplicator::new();
        let ids: Vec<String> = dedupe(items, &mut dedup, url_for)
            .records
            .into_iter()
            .map(|r| r.item.identifier)
            .collect();
        assert_eq!(ids, ["3", "1", "2"]);
    }

    #[test]
    fn missing_identifier_falls_back_to_slug() {
        let mut it = item("", "Britannia   Good Day!! (Pack of 2)", None);
        assert!(ensure_identifier(&mut it));
        assert_eq!(it.identifier, "britannia-good-day-pack-of-2");

        let mut blank = item("  ", "!!", None);
        assert!(!ensure_identifier(&mut blank));
    }

    #[test]
    fn unidentifiable_items_are_counted() {
        let items = vec![item("", "", None), item("5", "Marie", None)];
        let mut dedup = Deduplicator::new();
        let outcome = dedupe(items, &mut dedup, url_for);
        assert_eq!(outcome.unidentified, 1);
        assert_eq!(outcome.records.len(), 1);
    }

    #[test]
    fn known_urls_from_earlier_runs_are_skipped() {
        let known = url_for(&item("9", "Bounce", None)).unwrap();
        let mut dedup = Deduplicator::with_known([known]);
        let outcome = dedupe(
            vec![item("9", "Bounce", None), item("10", "Bourbon", None)],
            &mut dedup,
            url_for,
        );
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].item.identifier, "10");
        assert_eq!(dedup.len(), 2);
    }
}
