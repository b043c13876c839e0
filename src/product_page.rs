//! Parsers for a rendered product detail page.

use crate::extractor::{element_text, selector};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;

const TITLE_SELECTORS: [&str; 5] = ["#productTitle", "span.VU-ZEz", "h1 span", "h1", "title"];

const THUMBNAIL_SELECTORS: [&str; 5] = [
    "#altImages img",
    "ul.ZqtVYK li img",
    "[class*='thumbnail'] img",
    "img[src*='cdn.grofers.com']",
    "img[src*='cdn.zeptonow.com']",
];

/// `(selector, attribute)` pairs for the single main image, in preference order.
const MAIN_IMAGE_SELECTORS: [(&str, &str); 4] = [
    ("img#landingImage", "data-old-hires"),
    ("img[data-a-image-name='landingImage']", "src"),
    ("img.DByuf4", "src"),
    ("main img", "src"),
];

const RATING_SELECTORS: [&str; 5] = [
    "[data-hook='rating-out-of-text']",
    "#acrPopover span.a-icon-alt",
    ".a-size-medium.a-color-base",
    "span[aria-hidden='true'] span.a-size-medium",
    "span.a-icon-alt",
];

const TABLE_SELECTORS: [&str; 4] = [
    "table.a-normal.a-spacing-micro",
    "table[role='list']",
    "#productDetails_techSpec_section_1",
    ".a-section .a-normal",
];

pub const RATING_NOT_FOUND: &str = "Rating not found";

/// Named specification fields, each with the overview classes that hold it.
const NAMED_DETAILS: [(&str, &[&str]); 5] = [
    ("Brand", &["po-brand", "brand"]),
    ("Variety", &["po-variety", "variety"]),
    ("Item Form", &["po-item_form", "item-form"]),
    ("Net Quantity", &["po-unit_count", "unit-count", "net-quantity"]),
    ("Diet Type", &["po-diet_type", "diet-type"]),
];

/// A parsed product detail page.
pub struct ProductPage {
    document: Html,
}

impl ProductPage {
    pub fn parse(html: &str) -> Self {
        Self {
            document: Html::parse_document(html),
        }
    }

    fn select_all(&self, css: &str) -> Vec<ElementRef<'_>> {
        match selector(css) {
            Ok(sel) => self.document.select(&sel).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn title(&self) -> Option<String> {
        TITLE_SELECTORS.iter().find_map(|css| {
            self.select_all(css)
                .into_iter()
                .map(element_text)
                .find(|text| !text.is_empty())
        })
    }

    /// Full-size image URLs in page order, without repeats.
    ///
    /// Uses the high-resolution gallery embedded in page scripts when present,
    /// then thumbnails (upscaled), and finally the single main image.
    pub fn image_urls(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut urls = Vec::new();
        let mut push = |url: String, urls: &mut Vec<String>| {
            if is_usable_image_url(&url) && seen.insert(url.clone()) {
                urls.push(url);
            }
        };

        for script in self.select_all("script") {
            let body: String = script.text().collect();
            for caps in hires_regex().captures_iter(&body) {
                push(caps[1].replace("\\/", "/"), &mut urls);
            }
        }
        if !urls.is_empty() {
            return urls;
        }

        for css in THUMBNAIL_SELECTORS {
            for img in self.select_all(css) {
                if let Some(src) = best_source(img) {
                    push(upscale_thumbnail(&src), &mut urls);
                }
            }
            if !urls.is_empty() {
                return urls;
            }
        }

        for (css, attr) in MAIN_IMAGE_SELECTORS {
            let found = self.select_all(css).into_iter().find_map(|img| {
                img.value()
                    .attr(attr)
                    .or_else(|| img.value().attr("src"))
                    .map(str::to_string)
            });
            if let Some(url) = found {
                push(url, &mut urls);
                if !urls.is_empty() {
                    break;
                }
            }
        }
        urls
    }

    /// First rating text that reads like "4.2 out of 5 stars".
    pub fn rating(&self) -> Option<String> {
        RATING_SELECTORS.iter().find_map(|css| {
            self.select_all(css)
                .into_iter()
                .map(element_text)
                .find(|text| text.to_lowercase().contains("out of"))
        })
    }

    /// Key/value pairs of the first specification table that yields any,
    /// else the named overview fields found by class.
    pub fn details(&self) -> Vec<(String, String)> {
        let Ok(row_sel) = selector("tr") else {
            return Vec::new();
        };
        let Ok(cell_sel) = selector("td, th") else {
            return Vec::new();
        };

        for css in TABLE_SELECTORS {
            for table in self.select_all(css) {
                let pairs: Vec<(String, String)> = table
                    .select(&row_sel)
                    .filter_map(|row| {
                        let cells: Vec<String> = row.select(&cell_sel).map(element_text).collect();
                        match cells.as_slice() {
                            [key, value, ..] if !key.is_empty() && !value.is_empty() => {
                                Some((key.clone(), value.clone()))
                            }
                            _ => None,
                        }
                    })
                    .collect();
                if !pairs.is_empty() {
                    return pairs;
                }
            }
        }

        self.named_details()
    }

    fn named_details(&self) -> Vec<(String, String)> {
        let Ok(span_sel) = selector("span") else {
            return Vec::new();
        };
        NAMED_DETAILS
            .iter()
            .filter_map(|(name, classes)| {
                classes.iter().find_map(|class| {
                    self.select_all(&format!(".{}", class)).into_iter().find_map(|el| {
                        let parent = el.parent().and_then(ElementRef::wrap)?;
                        let spans: Vec<ElementRef> = parent.select(&span_sel).collect();
                        if spans.len() < 2 {
                            return None;
                        }
                        let value = element_text(*spans.last()?);
                        (!value.is_empty()).then(|| (name.to_string(), value))
                    })
                })
            })
            .collect()
    }
}

/// Columns written by the product analyzer for each product.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductAnalysis {
    pub rating: String,
    pub brand: String,
    pub variety: String,
    pub item_form: String,
    pub net_quantity: String,
    pub diet_type: String,
    /// Remaining specification pairs as a JSON object, empty when none.
    pub other_details: String,
}

pub const ANALYSIS_HEADERS: [&str; 9] = [
    "title",
    "url",
    "rating",
    "brand",
    "variety",
    "item_form",
    "net_quantity",
    "diet_type",
    "other_details",
];

impl ProductAnalysis {
    pub fn from_page(page: &ProductPage) -> Self {
        let mut details = page.details();
        if details.is_empty() {
            details.push(("Details".to_string(), "Not found".to_string()));
        }

        let mut take = |name: &str| {
            details
                .iter()
                .position(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|i| details.remove(i).1)
                .unwrap_or_default()
        };
        let brand = take("Brand");
        let variety = take("Variety");
        let item_form = take("Item Form");
        let net_quantity = take("Net Quantity");
        let diet_type = take("Diet Type");

        let other_details = if details.is_empty() {
            String::new()
        } else {
            let map: serde_json::Map<String, serde_json::Value> = details
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect();
            serde_json::Value::Object(map).to_string()
        };

        Self {
            rating: page.rating().unwrap_or_else(|| RATING_NOT_FOUND.to_string()),
            brand,
            variety,
            item_form,
            net_quantity,
            diet_type,
            other_details,
        }
    }

    pub fn to_row(&self, title: &str, url: &str) -> Vec<String> {
        vec![
            title.to_string(),
            url.to_string(),
            self.rating.clone(),
            self.brand.clone(),
            self.variety.clone(),
            self.item_form.clone(),
            self.net_quantity.clone(),
            self.diet_type.clone(),
            self.other_details.clone(),
        ]
    }
}

fn hires_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""hiRes"\s*:\s*"(https?:[^"]+)""#).expect("hiRes pattern"))
}

/// Highest-resolution candidate of an `<img>`: last `srcset` entry, else `src`.
fn best_source(img: ElementRef) -> Option<String> {
    let from_srcset = img.value().attr("srcset").and_then(|srcset| {
        srcset
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .last()
            .and_then(|part| part.split_whitespace().next())
            .map(str::to_string)
    });
    from_srcset.or_else(|| {
        img.value()
            .attr("data-src")
            .or_else(|| img.value().attr("src"))
            .map(str::to_string)
    })
}

fn is_usable_image_url(url: &str) -> bool {
    url.starts_with("http") && !url.contains("sprite") && !url.ends_with(".gif")
}

/// Rewrites a thumbnail URL to its full-size variant.
pub fn upscale_thumbnail(url: &str) -> String {
    static AMAZON_SIZE: OnceLock<Regex> = OnceLock::new();
    static FLIPKART_SIZE: OnceLock<Regex> = OnceLock::new();

    let url = url.replace("w=120", "w=480").replace("h=120", "h=480");
    let amazon = AMAZON_SIZE.get_or_init(|| Regex::new(r"\._[A-Z]{2}[A-Z0-9_,]*_\.").expect("amazon size pattern"));
    let url = amazon.replace(&url, ".").into_owned();
    let flipkart = FLIPKART_SIZE.get_or_init(|| Regex::new(r"/image/\d+/\d+/").expect("flipkart size pattern"));
    flipkart.replace(&url, "/image/832/832/").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const AMAZON_PAGE: &str = r#"
        <html><head><title>Amazon.in</title></head><body>
          <span id="productTitle">  Sunfeast Dark Fantasy Choco Fills, 300g  </span>
          <span data-hook="rating-out-of-text">4.3 out of 5</span>
          <table class="a-normal a-spacing-micro">
            <tr><td>Brand</td><td>Sunfeast</td></tr>
            <tr><td>Item Form</td><td>Biscuit</td></tr>
            <tr><td>Flavour</td><td>Chocolate</td></tr>
            <tr><td>Empty</td><td></td></tr>
          </table>
          <script>var data = {"colorImages": {"initial": [
            {"hiRes":"https://m.media-amazon.com/images/I/71a.jpg","thumb":"x"},
            {"hiRes":"https://m.media-amazon.com/images/I/71b.jpg"},
            {"hiRes":"https://m.media-amazon.com/images/I/71a.jpg"}]}};</script>
        </body></html>"#;

    #[test]
    fn parses_title_rating_and_gallery() {
        let page = ProductPage::parse(AMAZON_PAGE);
        assert_eq!(page.title().as_deref(), Some("Sunfeast Dark Fantasy Choco Fills, 300g"));
        assert_eq!(page.rating().as_deref(), Some("4.3 out of 5"));
        assert_eq!(
            page.image_urls(),
            [
                "https://m.media-amazon.com/images/I/71a.jpg",
                "https://m.media-amazon.com/images/I/71b.jpg"
            ]
        );
    }

    #[test]
    fn analysis_splits_named_and_other_details() {
        let analysis = ProductAnalysis::from_page(&ProductPage::parse(AMAZON_PAGE));
        assert_eq!(analysis.brand, "Sunfeast");
        assert_eq!(analysis.item_form, "Biscuit");
        assert_eq!(analysis.variety, "");
        assert_eq!(analysis.other_details, r#"{"Flavour":"Chocolate"}"#);
    }

    #[test]
    fn missing_sections_use_placeholders() {
        let analysis = ProductAnalysis::from_page(&ProductPage::parse("<html><body><p>gone</p></body></html>"));
        assert_eq!(analysis.rating, RATING_NOT_FOUND);
        assert_eq!(analysis.other_details, r#"{"Details":"Not found"}"#);
    }

    #[test]
    fn overview_classes_are_a_fallback_for_tables() {
        let page = ProductPage::parse(
            r#"<div><span class="po-brand">Brand</span><span>x</span><span>ITC</span></div>"#,
        );
        assert_eq!(page.details(), [("Brand".to_string(), "ITC".to_string())]);
    }

    #[test]
    fn thumbnails_are_upscaled_when_no_gallery() {
        let page = ProductPage::parse(
            r#"<div class="thumbnail-row">
                 <img src="https://cdn.grofers.com/app/images/products/full_screen/pro_1.jpg?w=120&h=120">
                 <img src="https://cdn.grofers.com/app/images/products/full_screen/pro_1.jpg?w=120&h=120">
                 <img src="https://cdn.grofers.com/sprite.png">
               </div>"#,
        );
        assert_eq!(
            page.image_urls(),
            ["https://cdn.grofers.com/app/images/products/full_screen/pro_1.jpg?w=480&h=480"]
        );
    }

    #[test]
    fn main_image_is_last_resort() {
        let page = ProductPage::parse(
            r#"<img id="landingImage" src="https://m.media-amazon.com/small.jpg" data-old-hires="https://m.media-amazon.com/big.jpg">"#,
        );
        assert_eq!(page.image_urls(), ["https://m.media-amazon.com/big.jpg"]);
    }

    #[test]
    fn thumbnail_size_tokens() {
        assert_eq!(
            upscale_thumbnail("https://m.media-amazon.com/images/I/41x._SS40_.jpg"),
            "https://m.media-amazon.com/images/I/41x.jpg"
        );
        assert_eq!(
            upscale_thumbnail("https://rukminim2.flixcart.com/image/128/128/xif0q/biscuit/a.jpeg?q=70"),
            "https://rukminim2.flixcart.com/image/832/832/xif0q/biscuit/a.jpeg?q=70"
        );
    }
}
