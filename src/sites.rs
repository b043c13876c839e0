//! Per-site listing profiles.
//!
//! Selectors here track the live markup of each shop and are expected to
//! drift; everything else in the pipeline is site-agnostic.

use crate::extractor::{parse_price, selector, Availability, CardExtractor, FieldChain, Strategy};
use crate::harvester::HarvestOptions;
use crate::models::ListingItem;
use crate::normalize::slugify;
use anyhow::Result;
use clap::ValueEnum;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Site {
    Blinkit,
    Zepto,
    Flipkart,
    Amazon,
}

/// How a listing reveals more cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Infinite scroll: scroll to the bottom and re-count.
    Scroll,
    /// Numbered result pages, followed up to `max_pages`.
    Paginate { max_pages: u32 },
}

impl Site {
    pub fn name(&self) -> &'static str {
        match self {
            Site::Blinkit => "Blinkit",
            Site::Zepto => "Zepto",
            Site::Flipkart => "Flipkart",
            Site::Amazon => "Amazon",
        }
    }

    pub fn base_url(&self) -> &'static str {
        match self {
            Site::Blinkit => "https://blinkit.com",
            Site::Zepto => "https://www.zeptonow.com",
            Site::Flipkart => "https://www.flipkart.com",
            Site::Amazon => "https://www.amazon.in",
        }
    }

    pub fn search_url(&self, query: &str) -> String {
        let encoded = urlencoding::encode(query.trim());
        match self {
            Site::Blinkit => format!("{}/s/?q={}", self.base_url(), encoded),
            Site::Zepto => format!("{}/search?query={}", self.base_url(), plus_encoded(&encoded)),
            Site::Flipkart => format!("{}/search?q={}", self.base_url(), encoded),
            Site::Amazon => format!("{}/s?k={}", self.base_url(), plus_encoded(&encoded)),
        }
    }

    /// URL of the 1-based result page `page`. Page 1 is the plain search URL.
    pub fn page_url(&self, query: &str, page: u32) -> String {
        let first = self.search_url(query);
        if page <= 1 {
            first
        } else {
            format!("{}&page={}", first, page)
        }
    }

    pub fn card_selector(&self) -> &'static str {
        match self {
            Site::Blinkit => "div[role='button'][id]",
            Site::Zepto => "a[href*='/pn/']",
            Site::Flipkart => "div[data-id]",
            Site::Amazon => "div[data-component-type='s-search-result']",
        }
    }

    pub fn load_mode(&self) -> LoadMode {
        match self {
            Site::Blinkit | Site::Zepto => LoadMode::Scroll,
            Site::Flipkart => LoadMode::Paginate { max_pages: 10 },
            Site::Amazon => LoadMode::Paginate { max_pages: 5 },
        }
    }

    pub fn harvest_options(&self) -> HarvestOptions {
        match self.load_mode() {
            LoadMode::Scroll => HarvestOptions {
                min_wait_between_rounds: match self {
                    Site::Zepto => Duration::from_secs(2),
                    _ => Duration::from_millis(1200),
                },
                ..HarvestOptions::default()
            },
            // A page that adds nothing means the results ran out.
            LoadMode::Paginate { max_pages } => HarvestOptions {
                min_wait_between_rounds: Duration::from_secs(3),
                max_no_growth_rounds: 1,
                max_rounds: max_pages,
            },
        }
    }

    pub fn extractor(&self) -> Result<CardExtractor> {
        let base_url = self.base_url().to_string();
        let extractor = match self {
            Site::Blinkit => CardExtractor {
                base_url,
                id: FieldChain::new(vec![Strategy::own_attr("id")]),
                title: FieldChain::new(vec![
                    Strategy::text("div.tw-text-300.tw-font-semibold")?,
                    Strategy::text("[class*='line-clamp-2']")?,
                    Strategy::attr("img[alt]", "alt")?,
                ]),
                price: FieldChain::new(vec![
                    Strategy::text("div.tw-text-200.tw-font-semibold")?,
                    Strategy::text("div, span")?,
                ])
                .validated(parse_price),
                pack: FieldChain::new(vec![
                    Strategy::text("div.tw-text-200.tw-font-medium")?,
                    Strategy::text("[class*='tw-font-medium']")?,
                ]),
                link: FieldChain::new(vec![
                    Strategy::attr("a[href*='/prn/']", "href")?,
                    Strategy::attr("a[href]", "href")?,
                ]),
                availability: Availability::ButtonLabel("ADD".to_string()),
            },
            Site::Zepto => CardExtractor {
                base_url,
                id: FieldChain::new(vec![Strategy::own_attr("href")]),
                title: FieldChain::new(vec![
                    Strategy::text("[data-slot-id='ProductName']")?,
                    Strategy::text("h5")?,
                    Strategy::attr("img[alt]", "alt")?,
                ]),
                price: FieldChain::new(vec![
                    Strategy::text("[data-slot-id='EdlpPrice'] span")?,
                    Strategy::text("[data-slot-id='Price']")?,
                    Strategy::text("span, p")?,
                ])
                .validated(parse_price),
                pack: FieldChain::new(vec![
                    Strategy::text("[data-slot-id='PackSize']")?,
                    Strategy::text("[class*='pack']")?,
                ]),
                link: FieldChain::new(vec![Strategy::own_attr("href")]),
                availability: Availability::OutOfStockFlag {
                    selector: Some(selector("[data-is-out-of-stock]")?),
                    attr: "data-is-out-of-stock".to_string(),
                },
            },
            Site::Flipkart => CardExtractor {
                base_url,
                id: FieldChain::new(vec![Strategy::own_attr("data-id")]),
                title: FieldChain::new(vec![
                    Strategy::attr("a[title]", "title")?,
                    Strategy::text("div.KzDlHZ")?,
                    Strategy::attr("img[alt]", "alt")?,
                ]),
                price: FieldChain::new(vec![
                    Strategy::text("div.Nx9bqj")?,
                    Strategy::text("div")?,
                ])
                .validated(parse_price),
                pack: FieldChain::new(vec![Strategy::text("div.NqpwHC")?]),
                link: FieldChain::new(vec![
                    Strategy::attr("a[title]", "href")?,
                    Strategy::attr("a[href*='/p/']", "href")?,
                ]),
                availability: Availability::Always,
            },
            Site::Amazon => CardExtractor {
                base_url,
                id: FieldChain::new(vec![Strategy::own_attr("data-asin")]),
                title: FieldChain::new(vec![
                    Strategy::text("h2 span")?,
                    Strategy::attr("h2 a", "aria-label")?,
                    Strategy::attr("img.s-image", "alt")?,
                ]),
                price: FieldChain::new(vec![
                    Strategy::text("span.a-price > span.a-offscreen")?,
                    Strategy::text("span.a-price-whole")?,
                ])
                .validated(parse_price),
                pack: FieldChain::new(vec![Strategy::text("span.a-size-base.a-color-secondary")?]),
                link: FieldChain::new(vec![
                    Strategy::attr("h2 a[href]", "href")?,
                    Strategy::attr("a[href*='/dp/']", "href")?,
                ]),
                availability: Availability::Always,
            },
        };
        Ok(extractor)
    }

    /// Builds the canonical product URL from the item's identity.
    ///
    /// Returns `None` when the item carries nothing to build it from.
    pub fn canonical_url(&self, item: &ListingItem) -> Option<String> {
        let id = item.identifier.trim();
        match self {
            Site::Blinkit => {
                if id.is_empty() {
                    return None;
                }
                let slug = match slugify(&item.title) {
                    s if s.is_empty() => "product".to_string(),
                    s => s,
                };
                Some(format!("{}/prn/{}/prid/{}", self.base_url(), slug, id))
            }
            Site::Zepto => item.raw_link.as_deref().map(strip_query),
            Site::Flipkart => {
                let link = item.raw_link.as_deref()?;
                let pid = query_param(link, "pid").or_else(|| (!id.is_empty()).then(|| id.to_string()));
                Some(match pid {
                    Some(pid) => format!("{}?pid={}", strip_query(link), pid),
                    None => strip_query(link),
                })
            }
            Site::Amazon => {
                if is_asin(id) {
                    Some(format!("{}/dp/{}", self.base_url(), id))
                } else {
                    item.raw_link
                        .as_deref()
                        .and_then(asin_from_link)
                        .map(|asin| format!("{}/dp/{}", self.base_url(), asin))
                }
            }
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn plus_encoded(encoded: &str) -> String {
    encoded.replace("%20", "+")
}

fn strip_query(url: &str) -> String {
    url.split(['?', '#']).next().unwrap_or(url).to_string()
}

fn query_param(url: &str, name: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn is_asin(value: &str) -> bool {
    value.len() == 10 && value.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

fn asin_from_link(link: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"/dp/([A-Z0-9]{10})").expect("asin pattern"));
    re.captures(link).map(|caps| caps[1].to_string())
}
