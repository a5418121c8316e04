//! # Stock Parser
//!
//! Heuristic extraction of stock status, title and price from Amazon India
//! product pages. Markup changes over time, so every function here degrades to
//! "don't know" instead of guessing: [`parse`] returns [`StockStatus::Unknown`]
//! whenever the signals are missing or contradict each other, and nothing in
//! this module panics on malformed HTML.
//!
//! ## Decision order
//!
//! ```text
//! 1. #availability block mentions a known phrase  -> that status
//! 2. out-of-stock phrase only                     -> OUT_OF_STOCK
//! 3. buy-box button or "add to cart" text only    -> IN_STOCK
//! 4. out-of-stock phrase AND buy-box button       -> UNKNOWN
//! 5. nothing recognised                           -> UNKNOWN
//! ```

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::trace;

use crate::store::StockStatus;

/// Phrases Amazon uses when a product cannot be bought
const OUT_OF_STOCK_PHRASES: &[&str] = &[
    "currently unavailable",
    "temporarily out of stock",
    "currently out of stock",
    "out of stock",
    "we don't know when or if this item will be back in stock",
    "we don’t know when or if this item will be back in stock",
];

/// Phrases inside the availability block meaning the product can be bought
const IN_STOCK_PHRASES: &[&str] = &["in stock", "left in stock", "available to ship", "usually dispatched"];

/// Visible text that hints at a buy button when the ids are missing
const ADD_TO_CART_PHRASES: &[&str] = &["add to cart", "buy now"];

/// Markers of Amazon's robot check interstitial
const ROBOT_CHECK_MARKERS: &[&str] = &[
    "validatecaptcha",
    "enter the characters you see below",
    "type the characters you see in this image",
];

/// Prices outside this range (in rupees) are treated as parse noise
const MIN_PLAUSIBLE_PRICE: f64 = 10.0;
const MAX_PLAUSIBLE_PRICE: f64 = 1_000_000.0;

lazy_static! {
    static ref AVAILABILITY: Selector =
        Selector::parse("#availability, #outOfStock, #availability_feature_div").expect("Invalid availability selector");
    static ref BUY_BOX: Selector = Selector::parse(
        "#add-to-cart-button, #buy-now-button, input[name=\"submit.add-to-cart\"], input[name=\"submit.buy-now\"]"
    )
    .expect("Invalid buy box selector");
    static ref TITLE: Selector = Selector::parse("#productTitle, #title").expect("Invalid title selector");
    static ref META_TITLE: Selector = Selector::parse("meta[name=\"title\"]").expect("Invalid meta title selector");
    static ref DOCUMENT_TITLE: Selector = Selector::parse("title").expect("Invalid document title selector");
    static ref PRICE_OFFSCREEN: Selector =
        Selector::parse(".a-price .a-offscreen").expect("Invalid price selector");
    static ref PRICE_WHOLE: Selector = Selector::parse(".a-price-whole").expect("Invalid price selector");
    static ref PRICE_FRACTION: Selector = Selector::parse(".a-price-fraction").expect("Invalid price selector");
    static ref PRICE_LEGACY: Selector = Selector::parse(
        "#priceblock_dealprice, #priceblock_ourprice, #priceblock_saleprice, #corePrice_feature_div .a-offscreen"
    )
    .expect("Invalid legacy price selector");
    static ref PRICE_NUMBER: Regex =
        Regex::new(r"(\d[\d,]*(?:\.\d{1,2})?)").expect("Invalid price regex pattern");
    static ref TITLE_SUFFIX_COLON: Regex =
        Regex::new(r"(?i)\s*:\s*Amazon\.in\b.*$").expect("Invalid title suffix regex pattern");
    static ref TITLE_SUFFIX_DASH: Regex =
        Regex::new(r"(?i)\s*-\s*Amazon\.in\s*$").expect("Invalid title suffix regex pattern");
}

/// Everything a poll learns from one product page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageSnapshot {
    pub status: StockStatus,
    pub title: Option<String>,
    pub price: Option<f64>,
}

/// Classify a product page as in stock, out of stock or unknown
pub fn parse(html: &str) -> StockStatus {
    let document = Html::parse_document(html);
    classify(&document)
}

/// Parse status, title and price in one pass over the document
pub fn parse_page(html: &str) -> PageSnapshot {
    let document = Html::parse_document(html);
    PageSnapshot {
        status: classify(&document),
        title: title_from_document(&document),
        price: price_from_document(&document),
    }
}

/// Extract the product title
pub fn extract_title(html: &str) -> Option<String> {
    title_from_document(&Html::parse_document(html))
}

/// Extract the displayed price in rupees
pub fn extract_price(html: &str) -> Option<f64> {
    price_from_document(&Html::parse_document(html))
}

/// Whether the page is Amazon's CAPTCHA interstitial rather than a product page
pub fn is_robot_check(html: &str) -> bool {
    let lowered = html.to_lowercase();
    ROBOT_CHECK_MARKERS.iter().any(|marker| lowered.contains(marker))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text a user would see: text nodes outside script/style blocks
fn visible_text(document: &Html) -> String {
    let mut out = String::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|parent| {
                parent
                    .value()
                    .as_element()
                    .map(|el| matches!(el.name(), "script" | "style" | "noscript" | "template"))
            })
            .unwrap_or(false);
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    collapse_whitespace(&out).to_lowercase()
}

fn contains_any(haystack: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| haystack.contains(phrase))
}

fn classify(document: &Html) -> StockStatus {
    if let Some(status) = availability_block_status(document) {
        trace!(status = %status, "Availability block decided status");
        return status;
    }

    let text = visible_text(document);
    let out_of_stock = contains_any(&text, OUT_OF_STOCK_PHRASES);
    let buy_box = document.select(&BUY_BOX).next().is_some();
    let add_to_cart_text = contains_any(&text, ADD_TO_CART_PHRASES);

    trace!(out_of_stock, buy_box, add_to_cart_text, "Page-wide stock markers");

    match (out_of_stock, buy_box, add_to_cart_text) {
        (true, true, _) => StockStatus::Unknown,
        (true, false, _) => StockStatus::OutOfStock,
        (false, true, _) | (false, false, true) => StockStatus::InStock,
        (false, false, false) => StockStatus::Unknown,
    }
}

fn availability_block_status(document: &Html) -> Option<StockStatus> {
    for block in document.select(&AVAILABILITY) {
        let text = collapse_whitespace(&block.text().collect::<String>()).to_lowercase();
        if contains_any(&text, OUT_OF_STOCK_PHRASES) {
            return Some(StockStatus::OutOfStock);
        }
        if contains_any(&text, IN_STOCK_PHRASES) {
            return Some(StockStatus::InStock);
        }
    }
    None
}

fn title_from_document(document: &Html) -> Option<String> {
    if let Some(title) = document
        .select(&TITLE)
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .find(|t| !t.is_empty())
    {
        return Some(title);
    }

    if let Some(title) = document
        .select(&META_TITLE)
        .filter_map(|el| el.value().attr("content"))
        .map(collapse_whitespace)
        .find(|t| !t.is_empty())
    {
        return Some(strip_title_suffix(&title));
    }

    document
        .select(&DOCUMENT_TITLE)
        .next()
        .map(|el| strip_title_suffix(&collapse_whitespace(&el.text().collect::<String>())))
        .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("amazon.in"))
}

fn strip_title_suffix(title: &str) -> String {
    let stripped = TITLE_SUFFIX_COLON.replace(title, "");
    TITLE_SUFFIX_DASH.replace(&stripped, "").trim().to_string()
}

/// Parse "₹1,29,999.00" style text into rupees
pub fn parse_price_text(text: &str) -> Option<f64> {
    let number = PRICE_NUMBER.captures(text)?.get(1)?.as_str().replace(',', "");
    number.parse::<f64>().ok()
}

fn plausible(price: f64) -> Option<f64> {
    (MIN_PLAUSIBLE_PRICE..=MAX_PLAUSIBLE_PRICE)
        .contains(&price)
        .then_some(price)
}

fn price_from_document(document: &Html) -> Option<f64> {
    let offscreen = document
        .select(&PRICE_OFFSCREEN)
        .filter_map(|el| parse_price_text(&el.text().collect::<String>()))
        .find_map(plausible);
    if offscreen.is_some() {
        return offscreen;
    }

    if let Some(whole) = document.select(&PRICE_WHOLE).next() {
        let whole_text: String = whole
            .text()
            .collect::<String>()
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        let fraction_text: String = document
            .select(&PRICE_FRACTION)
            .next()
            .map(|el| el.text().collect::<String>())
            .unwrap_or_default()
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        let fraction = if fraction_text.is_empty() { "00".to_string() } else { fraction_text };
        if !whole_text.is_empty() {
            if let Some(price) = format!("{}.{}", whole_text, fraction).parse::<f64>().ok().and_then(plausible) {
                return Some(price);
            }
        }
    }

    document
        .select(&PRICE_LEGACY)
        .filter_map(|el| parse_price_text(&el.text().collect::<String>()))
        .find_map(plausible)
}
