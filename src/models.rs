use serde::Serialize;
use std::fmt;

/// Raw markup of one product card, captured before any field is parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct CardSnapshot {
    pub html: String,
}

impl CardSnapshot {
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }
}

/// One scraped, not-yet-validated product card.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingItem {
    /// Site-assigned id, or a slug/link when the site exposes none.
    pub identifier: String,
    pub title: String,
    pub price: Option<String>,
    pub pack: Option<String>,
    pub available: bool,
    pub raw_link: Option<String>,
}

/// Output row: a unique listing item, its canonical URL and match status.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub item: ListingItem,
    pub url: String,
    pub matched: bool,
}

pub const LINK_HEADERS: [&str; 6] = ["Product URL", "Title", "Price", "Pack", "In Stock", "Matched"];

impl ProductRecord {
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.url.clone(),
            self.item.title.clone(),
            self.item.price.clone().unwrap_or_default(),
            self.item.pack.clone().unwrap_or_default(),
            yes_no(self.item.available).to_string(),
            yes_no(self.matched).to_string(),
        ]
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

/// A product handed from one pipeline stage to the next (`title`, `url` columns).
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRow {
    /// 1-based position in the stage file; doubles as the product folder index.
    pub index: usize,
    pub title: String,
    pub url: String,
}

/// Machine-readable end-of-stage counts.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct StageSummary {
    pub stage: String,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StageSummary {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            ..Default::default()
        }
    }

    pub fn success(&mut self) {
        self.succeeded += 1;
    }

    pub fn failure(&mut self) {
        self.failed += 1;
    }

    pub fn skip(&mut self) {
        self.skipped += 1;
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    /// Single `SUMMARY {...}` line consumed by scripts driving the pipeline.
    pub fn to_line(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("SUMMARY {}", json)
    }
}

impl fmt::Display for StageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} succeeded, {} failed, {} skipped",
            self.stage, self.succeeded, self.failed, self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_row_follows_link_headers() {
        let record = ProductRecord {
            item: ListingItem {
                identifier: "42".to_string(),
                title: "Sunfeast Dark Fantasy".to_string(),
                price: Some("₹40".to_string()),
                pack: None,
                available: true,
                raw_link: None,
            },
            url: "https://blinkit.com/prn/sunfeast-dark-fantasy/prid/42".to_string(),
            matched: false,
        };
        let row = record.to_row();
        assert_eq!(row.len(), LINK_HEADERS.len());
        assert_eq!(row[1], "Sunfeast Dark Fantasy");
        assert_eq!(row[3], "");
        assert_eq!(row[4], "Yes");
        assert_eq!(row[5], "No");
    }

    #[test]
    fn summary_line_is_json() {
        let mut summary = StageSummary::new("harvest");
        summary.success();
        summary.success();
        summary.failure();
        summary.skip();
        assert_eq!(summary.total(), 4);
        let line = summary.to_line();
        assert!(line.starts_with("SUMMARY "));
        let value: serde_json::Value = serde_json::from_str(&line["SUMMARY ".len()..]).unwrap();
        assert_eq!(value["stage"], "harvest");
        assert_eq!(value["succeeded"], 2);
        assert_eq!(value["failed"], 1);
        assert_eq!(value["skipped"], 1);
    }
}
