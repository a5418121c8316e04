//! Validation module for user input
//!
//! Covers the only input the bot accepts from users:
//!
//! - Amazon product URLs (scheme, host, ASIN extraction, canonical form)
//! - Product ids passed to `/status` and `/remove`
//! - Optional display names passed to `/add`
//!
//! Errors are localization keys so the dispatcher can reply with them directly.

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

/// Base URL used for canonical product links
pub const AMAZON_BASE_URL: &str = "https://www.amazon.in";

/// Maximum stored length of a display name, in characters
pub const MAX_DISPLAY_NAME_CHARS: usize = 120;

lazy_static! {
    static ref ASIN_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"/dp/([A-Z0-9]{10})(?:[/?]|$)").expect("Invalid ASIN regex pattern"),
        Regex::new(r"/gp/product/([A-Z0-9]{10})(?:[/?]|$)").expect("Invalid ASIN regex pattern"),
        Regex::new(r"/product/([A-Z0-9]{10})(?:[/?]|$)").expect("Invalid ASIN regex pattern"),
    ];
    static ref URL_IN_TEXT: Regex =
        Regex::new(r"https?://\S+").expect("Invalid URL regex pattern");
}

/// A product link that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductLink {
    /// URL stored in the database; canonical `/dp/<ASIN>` form when the ASIN is known
    pub url: String,
    pub asin: Option<String>,
}

/// Extract an ASIN from an Amazon URL or path
///
/// # Examples
/// ```
/// use amazon_stock_tracker::validation::extract_asin;
///
/// assert_eq!(
///     extract_asin("https://www.amazon.in/Some-Phone/dp/B0CHX1W1XY?ref=abc"),
///     Some("B0CHX1W1XY".to_string())
/// );
/// assert_eq!(extract_asin("https://www.amazon.in/gp/help"), None);
/// ```
pub fn extract_asin(text: &str) -> Option<String> {
    let upper = text.to_uppercase();
    ASIN_PATTERNS
        .iter()
        .find_map(|pattern| {
            pattern
                .captures(&upper)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        })
        .or_else(|| bare_segment_asin(&upper))
}

/// Last resort for links like `/Some-Slug/B0CHX1W1XY`: a whole path segment
/// of ten alphanumerics. Requiring a digit keeps ordinary ten-letter words
/// such as `NAVIGATION` from passing as product ids.
fn bare_segment_asin(upper: &str) -> Option<String> {
    upper
        .split('/')
        .skip(1)
        .map(|segment| segment.split(['?', '#']).next().unwrap_or(segment))
        .find(|segment| {
            segment.len() == 10
                && segment.chars().all(|c| c.is_ascii_alphanumeric())
                && segment.chars().any(|c| c.is_ascii_digit())
        })
        .map(str::to_string)
}

/// Build the canonical product URL for an ASIN
pub fn canonical_product_url(asin: &str) -> String {
    format!("{}/dp/{}", AMAZON_BASE_URL, asin)
}

fn is_amazon_india_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host == "amazon.in" || host.ends_with(".amazon.in")
}

fn is_short_link_host(host: &str) -> bool {
    matches!(host.to_ascii_lowercase().as_str(), "amzn.in" | "amzn.to" | "a.co")
}

/// Validate a product URL supplied by a user
///
/// # Returns
/// * `Ok(ProductLink)` - canonicalised link
/// * `Err(&str)` - Error key: "error-url-empty", "error-url-invalid" or "error-url-not-amazon"
pub fn validate_product_url(input: &str) -> Result<ProductLink, &'static str> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("error-url-empty");
    }

    let parsed = Url::parse(trimmed).map_err(|_| "error-url-invalid")?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err("error-url-invalid");
    }

    let host = parsed.host_str().ok_or("error-url-invalid")?;

    if is_short_link_host(host) {
        // short links only resolve through a redirect, keep them verbatim
        return Ok(ProductLink {
            url: parsed.to_string(),
            asin: None,
        });
    }

    if !is_amazon_india_host(host) {
        return Err("error-url-not-amazon");
    }

    match extract_asin(parsed.path()) {
        Some(asin) => Ok(ProductLink {
            url: canonical_product_url(&asin),
            asin: Some(asin),
        }),
        None => Err("error-url-no-product"),
    }
}

/// Find the first URL in a free-text message
pub fn find_url_in_text(text: &str) -> Option<&str> {
    URL_IN_TEXT.find(text).map(|m| m.as_str())
}

/// Validate a product id argument
///
/// # Examples
/// ```
/// use amazon_stock_tracker::validation::parse_product_id;
///
/// assert_eq!(parse_product_id(" 42 "), Ok(42));
/// assert_eq!(parse_product_id(""), Err("error-id-missing"));
/// assert_eq!(parse_product_id("abc"), Err("error-id-invalid"));
/// ```
pub fn parse_product_id(input: &str) -> Result<i64, &'static str> {
    let trimmed = input.trim().trim_start_matches('#');
    if trimmed.is_empty() {
        return Err("error-id-missing");
    }

    match trimmed.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err("error-id-invalid"),
    }
}

/// Normalise a display name, truncating overly long titles
///
/// Returns `None` for blank input.
pub fn normalize_display_name(name: &str) -> Option<String> {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }

    if collapsed.chars().count() <= MAX_DISPLAY_NAME_CHARS {
        return Some(collapsed);
    }

    let truncated: String = collapsed.chars().take(MAX_DISPLAY_NAME_CHARS - 1).collect();
    Some(format!("{}…", truncated.trim_end()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_asin_patterns() {
        assert_eq!(extract_asin("/dp/B0CHX1W1XY"), Some("B0CHX1W1XY".to_string()));
        assert_eq!(
            extract_asin("/gp/product/B08N5WRWNW/ref=ox_sc_act_title_1"),
            Some("B08N5WRWNW".to_string())
        );
        assert_eq!(extract_asin("/dp/b0chx1w1xy/"), Some("B0CHX1W1XY".to_string()));
        assert_eq!(extract_asin("/dp/SHORT"), None);
    }

    #[test]
    fn test_bare_segment_needs_a_digit() {
        assert_eq!(
            extract_asin("/Some-Phone/B0CHX1W1XY?th=1"),
            Some("B0CHX1W1XY".to_string())
        );
        assert_eq!(extract_asin("/navigation/"), None);
        assert_eq!(extract_asin("/stores/ELECTRONIC/page"), None);
        assert_eq!(
            validate_product_url("https://www.amazon.in/navigation/"),
            Err("error-url-no-product")
        );
        // a dp link wins over an earlier bare segment
        assert_eq!(
            extract_asin("/ABCDE12345/dp/B08N5WRWNW"),
            Some("B08N5WRWNW".to_string())
        );
    }

    #[test]
    fn test_validate_product_url_canonicalises() {
        let link = validate_product_url(
            "https://www.amazon.in/Apple-iPhone-15-128-GB/dp/B0CHX1W1XY/ref=sr_1_1?keywords=iphone",
        )
        .unwrap();
        assert_eq!(link.url, "https://www.amazon.in/dp/B0CHX1W1XY");
        assert_eq!(link.asin.as_deref(), Some("B0CHX1W1XY"));

        let mobile = validate_product_url("https://m.amazon.in/dp/B0CHX1W1XY").unwrap();
        assert_eq!(mobile.url, link.url);
    }

    #[test]
    fn test_validate_product_url_rejections() {
        assert_eq!(validate_product_url("   "), Err("error-url-empty"));
        assert_eq!(validate_product_url("not a url"), Err("error-url-invalid"));
        assert_eq!(validate_product_url("ftp://amazon.in/dp/B0CHX1W1XY"), Err("error-url-invalid"));
        assert_eq!(
            validate_product_url("https://www.amazon.com/dp/B0CHX1W1XY"),
            Err("error-url-not-amazon")
        );
        assert_eq!(
            validate_product_url("https://evilamazon.in/dp/B0CHX1W1XY"),
            Err("error-url-not-amazon")
        );
        assert_eq!(
            validate_product_url("https://www.amazon.in/gp/help/customer"),
            Err("error-url-no-product")
        );
    }

    #[test]
    fn test_short_links_are_kept_verbatim() {
        let link = validate_product_url("https://amzn.in/d/abc123").unwrap();
        assert_eq!(link.url, "https://amzn.in/d/abc123");
        assert!(link.asin.is_none());
    }

    #[test]
    fn test_find_url_in_text() {
        assert_eq!(
            find_url_in_text("please track https://www.amazon.in/dp/B0CHX1W1XY thanks"),
            Some("https://www.amazon.in/dp/B0CHX1W1XY")
        );
        assert_eq!(find_url_in_text("hello there"), None);
    }

    #[test]
    fn test_parse_product_id() {
        assert_eq!(parse_product_id("#7"), Ok(7));
        assert_eq!(parse_product_id("0"), Err("error-id-invalid"));
        assert_eq!(parse_product_id("-3"), Err("error-id-invalid"));
    }

    #[test]
    fn test_normalize_display_name() {
        assert_eq!(normalize_display_name("  My   Phone \n"), Some("My Phone".to_string()));
        assert_eq!(normalize_display_name("   "), None);

        let long = "x".repeat(500);
        let normalized = normalize_display_name(&long).unwrap();
        assert_eq!(normalized.chars().count(), MAX_DISPLAY_NAME_CHARS);
        assert!(normalized.ends_with('…'));
    }
}
