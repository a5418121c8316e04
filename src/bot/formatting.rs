//! Reply and alert text.

use chrono::{DateTime, Utc};

use crate::localization::LocalizationManager;
use crate::notifier::{AlertKind, Notification};
use crate::store::{StockStatus, TrackedProduct};

/// Localized label for a stock status
pub fn status_label(status: StockStatus, localization: &LocalizationManager) -> String {
    let key = match status {
        StockStatus::InStock => "status-in-stock",
        StockStatus::OutOfStock => "status-out-of-stock",
        StockStatus::Unknown => "status-unknown",
        StockStatus::FetchError => "status-fetch-error",
    };
    localization.t(key)
}

/// Format rupees with Indian digit grouping, e.g. `₹1,29,999` or `₹499.50`
pub fn format_inr(price: f64) -> String {
    let paise = (price * 100.0).round() as i64;
    let rupees = paise / 100;
    let fraction = paise % 100;

    let digits = rupees.to_string();
    let grouped = if digits.len() <= 3 {
        digits
    } else {
        let (head, last_three) = digits.split_at(digits.len() - 3);
        let mut groups: Vec<&str> = Vec::new();
        let mut end = head.len();
        while end > 0 {
            let start = end.saturating_sub(2);
            groups.push(&head[start..end]);
            end = start;
        }
        groups.reverse();
        format!("{},{}", groups.join(","), last_three)
    };

    if fraction == 0 {
        format!("₹{}", grouped)
    } else {
        format!("₹{}.{:02}", grouped, fraction)
    }
}

fn format_price(price: Option<f64>, localization: &LocalizationManager) -> String {
    price
        .map(format_inr)
        .unwrap_or_else(|| localization.t("price-unknown"))
}

fn format_checked_at(checked_at: Option<DateTime<Utc>>, localization: &LocalizationManager) -> String {
    checked_at
        .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| localization.t("never-checked"))
}

/// Detailed view used by `/status`
pub fn format_product_card(product: &TrackedProduct, localization: &LocalizationManager) -> String {
    let id = product.id.to_string();
    let status = status_label(product.last_status, localization);
    let price = format_price(product.current_price, localization);
    let checked = format_checked_at(product.last_checked_at, localization);
    localization.t_args(
        "product-card",
        &[
            ("id", id.as_str()),
            ("emoji", product.last_status.emoji()),
            ("name", product.display_name.as_str()),
            ("status", status.as_str()),
            ("price", price.as_str()),
            ("checked", checked.as_str()),
            ("url", product.url.as_str()),
        ],
    )
}

/// Compact list used by `/list`
pub fn format_product_list(products: &[TrackedProduct], localization: &LocalizationManager) -> String {
    if products.is_empty() {
        return localization.t("list-empty");
    }

    let count = products.len().to_string();
    let mut lines = vec![localization.t_args("list-header", &[("count", count.as_str())])];
    for product in products {
        let id = product.id.to_string();
        let status = status_label(product.last_status, localization);
        lines.push(localization.t_args(
            "product-line",
            &[
                ("id", id.as_str()),
                ("emoji", product.last_status.emoji()),
                ("name", product.display_name.as_str()),
                ("status", status.as_str()),
            ],
        ));
    }
    lines.join("\n")
}

/// Alert text delivered by the notifier
pub fn format_notification(notification: &Notification, localization: &LocalizationManager) -> String {
    let name = notification.display_name.as_str();
    let url = notification.url.as_str();
    match &notification.kind {
        AlertKind::BackInStock => {
            let price = format_price(notification.price, localization);
            localization.t_args(
                "alert-back-in-stock",
                &[("name", name), ("price", price.as_str()), ("url", url)],
            )
        }
        AlertKind::OutOfStock => {
            localization.t_args("alert-out-of-stock", &[("name", name), ("url", url)])
        }
        AlertKind::PriceDrop {
            old_price,
            new_price,
            percent,
        } => {
            let old_price = format_inr(*old_price);
            let new_price = format_inr(*new_price);
            let percent = format!("{:.1}", percent);
            localization.t_args(
                "alert-price-drop",
                &[
                    ("name", name),
                    ("old_price", old_price.as_str()),
                    ("new_price", new_price.as_str()),
                    ("percent", percent.as_str()),
                    ("url", url),
                ],
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn localization() -> LocalizationManager {
        LocalizationManager::new().unwrap()
    }

    fn product() -> TrackedProduct {
        TrackedProduct {
            id: 7,
            owner_id: 42,
            url: "https://www.amazon.in/dp/B0CHX1W1XY".to_string(),
            asin: Some("B0CHX1W1XY".to_string()),
            display_name: "Apple iPhone 15".to_string(),
            last_status: StockStatus::OutOfStock,
            last_known_status: StockStatus::OutOfStock,
            last_checked_at: None,
            current_price: Some(69900.0),
            previous_price: None,
            check_count: 0,
            fail_count: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_format_inr_grouping() {
        assert_eq!(format_inr(499.0), "₹499");
        assert_eq!(format_inr(1299.5), "₹1,299.50");
        assert_eq!(format_inr(69900.0), "₹69,900");
        assert_eq!(format_inr(129999.0), "₹1,29,999");
        assert_eq!(format_inr(1000000.0), "₹10,00,000");
    }

    #[test]
    fn test_product_card_contents() {
        let text = format_product_card(&product(), &localization());
        assert!(text.contains("#7"));
        assert!(text.contains("Apple iPhone 15"));
        assert!(text.contains("Out of stock"));
        assert!(text.contains("₹69,900"));
        assert!(text.contains("not yet"));
    }

    #[test]
    fn test_product_list() {
        let loc = localization();
        assert_eq!(format_product_list(&[], &loc), loc.t("list-empty"));

        let text = format_product_list(&[product()], &loc);
        assert!(text.contains("(1)"));
        assert!(text.contains("#7"));
    }

    #[test]
    fn test_price_drop_alert() {
        let notification = Notification::for_product(
            &product(),
            Some(59900.0),
            AlertKind::PriceDrop {
                old_price: 69900.0,
                new_price: 59900.0,
                percent: 14.3,
            },
        );
        let text = format_notification(&notification, &localization());
        assert!(text.contains("₹69,900 → ₹59,900"));
        assert!(text.contains("-14.3%"));
    }
}
