//! Field extraction from card snapshots.
//!
//! Every field is read through an ordered chain of strategies; the first
//! non-empty (and, for prices, valid) value wins. A field that no strategy
//! finds is left empty, it never drops the item.

use crate::models::{CardSnapshot, ListingItem};
use anyhow::{anyhow, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;

pub fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Failed to parse selector {:?}: {:?}", css, e))
}

#[derive(Debug, Clone)]
enum Source {
    Text,
    Attr(String),
}

/// One way of reading a field: a selector (or the card itself) plus what to read.
#[derive(Debug, Clone)]
pub struct Strategy {
    selector: Option<Selector>,
    source: Source,
}

impl Strategy {
    pub fn text(css: &str) -> Result<Self> {
        Ok(Self {
            selector: Some(selector(css)?),
            source: Source::Text,
        })
    }

    pub fn attr(css: &str, attr: &str) -> Result<Self> {
        Ok(Self {
            selector: Some(selector(css)?),
            source: Source::Attr(attr.to_string()),
        })
    }

    /// Attribute of the card element itself.
    pub fn own_attr(attr: &str) -> Self {
        Self {
            selector: None,
            source: Source::Attr(attr.to_string()),
        }
    }

    fn read(&self, element: ElementRef) -> Option<String> {
        let raw = match &self.source {
            Source::Text => element_text(element),
            Source::Attr(name) => element.value().attr(name)?.trim().to_string(),
        };
        if raw.is_empty() {
            None
        } else {
            Some(raw)
        }
    }

    fn candidates(&self, card: ElementRef) -> Vec<String> {
        match &self.selector {
            None => self.read(card).into_iter().collect(),
            Some(sel) => card.select(sel).filter_map(|el| self.read(el)).collect(),
        }
    }
}

/// Ordered strategies for one field, with an optional validator that may
/// also clean the value.
#[derive(Debug, Clone, Default)]
pub struct FieldChain {
    strategies: Vec<Strategy>,
    validator: Option<fn(&str) -> Option<String>>,
}

impl FieldChain {
    pub fn new(strategies: Vec<Strategy>) -> Self {
        Self {
            strategies,
            validator: None,
        }
    }

    pub fn validated(mut self, validator: fn(&str) -> Option<String>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn first(&self, card: ElementRef) -> Option<String> {
        self.strategies.iter().find_map(|strategy| {
            strategy
                .candidates(card)
                .into_iter()
                .find_map(|value| match self.validator {
                    Some(validate) => validate(&value),
                    None => Some(value),
                })
        })
    }
}

#[derive(Debug, Clone)]
pub enum Availability {
    /// The site shows no stock signal on cards.
    Always,
    /// In stock when some element's own text equals the label (e.g. an "ADD" button).
    ButtonLabel(String),
    /// Out of stock when the attribute on the card (or a matching descendant) is "true".
    OutOfStockFlag { selector: Option<Selector>, attr: String },
}

impl Availability {
    fn in_stock(&self, card: ElementRef) -> bool {
        match self {
            Availability::Always => true,
            Availability::ButtonLabel(label) => card.descendants().any(|node| {
                node.value()
                    .as_text()
                    .map(|text| text.trim().eq_ignore_ascii_case(label))
                    .unwrap_or(false)
            }),
            Availability::OutOfStockFlag { selector, attr } => {
                let flag = match selector {
                    None => card.value().attr(attr).map(str::to_string),
                    Some(sel) => card
                        .select(sel)
                        .find_map(|el| el.value().attr(attr).map(str::to_string)),
                };
                !matches!(flag.as_deref().map(str::trim), Some("true"))
            }
        }
    }
}

/// Maps a card snapshot to a [`ListingItem`].
#[derive(Debug, Clone)]
pub struct CardExtractor {
    pub base_url: String,
    pub id: FieldChain,
    pub title: FieldChain,
    pub price: FieldChain,
    pub pack: FieldChain,
    pub link: FieldChain,
    pub availability: Availability,
}

impl CardExtractor {
    pub fn extract(&self, card: &CardSnapshot) -> ListingItem {
        let fragment = Html::parse_fragment(&card.html);
        let root = fragment.root_element();
        let card_el = root.children().find_map(ElementRef::wrap).unwrap_or(root);

        ListingItem {
            identifier: self.id.first(card_el).unwrap_or_default(),
            title: self.title.first(card_el).unwrap_or_default(),
            price: self.price.first(card_el),
            pack: self.pack.first(card_el),
            available: self.availability.in_stock(card_el),
            raw_link: self
                .link
                .first(card_el)
                .map(|href| absolute_url(&self.base_url, &href)),
        }
    }
}

pub fn absolute_url(base: &str, href: &str) -> String {
    if href.starts_with("http") {
        href.to_string()
    } else if href.starts_with("//") {
        format!("https:{}", href)
    } else if href.starts_with('/') {
        format!("{}{}", base.trim_end_matches('/'), href)
    } else {
        format!("{}/{}", base.trim_end_matches('/'), href)
    }
}

/// Visible text of an element with whitespace collapsed.
pub fn element_text(element: ElementRef) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn currency_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*((?:₹|Rs\.?|\$|€|£)\s*\d[\d,]*(?:\.\d+)?)").expect("currency pattern")
    })
}

fn bare_amount_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d[\d,]*(?:\.\d+)?)\s*$").expect("amount pattern"))
}

/// Accepts text that is a currency amount: a leading currency symbol followed
/// by digits, or a bare digit sequence with separators and decimals.
/// Returns the amount itself.
pub fn parse_price(text: &str) -> Option<String> {
    currency_regex()
        .captures(text)
        .or_else(|| bare_amount_regex().captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blinkit_like() -> CardExtractor {
        CardExtractor {
            base_url: "https://shop.test".to_string(),
            id: FieldChain::new(vec![Strategy::own_attr("id")]),
            title: FieldChain::new(vec![
                Strategy::text(".title").unwrap(),
                Strategy::text("[class*='semibold']").unwrap(),
            ]),
            price: FieldChain::new(vec![
                Strategy::text(".price").unwrap(),
                Strategy::text("div").unwrap(),
            ])
            .validated(parse_price),
            pack: FieldChain::new(vec![Strategy::text(".pack").unwrap()]),
            link: FieldChain::new(vec![Strategy::attr("a", "href").unwrap()]),
            availability: Availability::ButtonLabel("ADD".to_string()),
        }
    }

    #[test]
    fn parses_full_card() {
        let card = CardSnapshot::new(
            r#"<div role="button" id="482">
                 <div class="title">Sunfeast   Dark Fantasy</div>
                 <div class="pack">75 g</div>
                 <div class="price">₹40</div>
                 <a href="/prn/x/prid/482">open</a>
                 <div><button>ADD</button></div>
               </div>"#,
        );
        let item = blinkit_like().extract(&card);
        assert_eq!(item.identifier, "482");
        assert_eq!(item.title, "Sunfeast Dark Fantasy");
        assert_eq!(item.price.as_deref(), Some("₹40"));
        assert_eq!(item.pack.as_deref(), Some("75 g"));
        assert_eq!(item.raw_link.as_deref(), Some("https://shop.test/prn/x/prid/482"));
        assert!(item.available);
    }

    #[test]
    fn falls_through_strategies_in_order() {
        let card = CardSnapshot::new(
            r#"<div id="9"><span class="tw-font-semibold">Bourbon</span><div>10 min</div><div>₹ 1,299.50</div></div>"#,
        );
        let item = blinkit_like().extract(&card);
        assert_eq!(item.title, "Bourbon");
        // "10 min" is rejected by the price validator, the rupee amount is taken
        assert_eq!(item.price.as_deref(), Some("₹ 1,299.50"));
    }

    #[test]
    fn missing_fields_leave_item_intact() {
        let card = CardSnapshot::new(r#"<div id="77"><p>Notify me</p></div>"#);
        let item = blinkit_like().extract(&card);
        assert_eq!(item.identifier, "77");
        assert_eq!(item.title, "");
        assert_eq!(item.price, None);
        assert_eq!(item.pack, None);
        assert_eq!(item.raw_link, None);
        assert!(!item.available);
    }

    #[test]
    fn out_of_stock_flag() {
        let availability = Availability::OutOfStockFlag {
            selector: Some(selector("div[data-is-out-of-stock]").unwrap()),
            attr: "data-is-out-of-stock".to_string(),
        };
        let extractor = CardExtractor {
            availability,
            ..blinkit_like()
        };
        let sold_out = CardSnapshot::new(r#"<a href="/pn/a"><div data-is-out-of-stock="true">A</div></a>"#);
        let in_stock = CardSnapshot::new(r#"<a href="/pn/b"><div data-is-out-of-stock="false">B</div></a>"#);
        assert!(!extractor.extract(&sold_out).available);
        assert!(extractor.extract(&in_stock).available);
    }

    #[test]
    fn price_validation() {
        assert_eq!(parse_price("₹40").as_deref(), Some("₹40"));
        assert_eq!(parse_price(" 1,250.00 ").as_deref(), Some("1,250.00"));
        assert_eq!(parse_price("₹120\n₹150").as_deref(), Some("₹120"));
        assert_eq!(parse_price("Rs. 99").as_deref(), Some("Rs. 99"));
        assert_eq!(parse_price("Pack of 2"), None);
        assert_eq!(parse_price("500 g"), None);
        assert_eq!(parse_price("4.2 out of 5"), None);
        assert_eq!(parse_price(""), None);
    }

    #[test]
    fn absolute_urls() {
        assert_eq!(absolute_url("https://a.test/", "/p/1"), "https://a.test/p/1");
        assert_eq!(absolute_url("https://a.test", "https://b.test/x"), "https://b.test/x");
        assert_eq!(absolute_url("https://a.test", "//cdn.test/i.jpg"), "https://cdn.test/i.jpg");
        assert_eq!(absolute_url("https://a.test", "p/2"), "https://a.test/p/2");
    }
}
