use amazon_stock_tracker::bot::CommandDispatcher;
use amazon_stock_tracker::config::RateLimitConfig;
use amazon_stock_tracker::localization::LocalizationManager;
use amazon_stock_tracker::store::{InMemoryProductStore, ProductStore, StatusUpdate, StockStatus};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;

use test_helpers::{in_stock_page, product_url, ScriptedFetcher};

const OWNER: i64 = 4242;

struct Setup {
    store: Arc<InMemoryProductStore>,
    fetcher: Arc<ScriptedFetcher>,
    localization: Arc<LocalizationManager>,
    dispatcher: CommandDispatcher,
}

fn setup_with_limit(max_requests: usize) -> Result<Setup> {
    let store = Arc::new(InMemoryProductStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    let localization = Arc::new(LocalizationManager::new()?);
    let rate_limit = RateLimitConfig {
        max_requests,
        window_secs: 60,
    };
    let dispatcher = CommandDispatcher::new(
        store.clone(),
        fetcher.clone(),
        Arc::clone(&localization),
        &rate_limit,
        300,
    );
    Ok(Setup {
        store,
        fetcher,
        localization,
        dispatcher,
    })
}

fn setup() -> Result<Setup> {
    setup_with_limit(1000)
}

async fn reply(setup: &Setup, text: &str) -> String {
    setup
        .dispatcher
        .dispatch(OWNER, text)
        .await
        .unwrap_or_default()
}

#[tokio::test]
async fn test_start_and_help() -> Result<()> {
    let s = setup()?;
    assert_eq!(reply(&s, "/start").await, s.localization.t("welcome"));

    let help = reply(&s, "/help").await;
    assert!(help.contains("/add"));
    assert!(help.contains("every 5 minutes"));
    Ok(())
}

#[tokio::test]
async fn test_add_uses_page_title() -> Result<()> {
    let s = setup()?;
    let url = product_url(1);
    s.fetcher.set_page(&url, in_stock_page("Sony WH-1000XM5 Headphones", "₹29,990.00"));

    let text = reply(&s, &format!("/add {}?ref=sr_1_1", url)).await;
    assert!(text.contains("Sony WH-1000XM5 Headphones"), "unexpected reply: {}", text);

    let products = s.store.list(OWNER).await?;
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].url, url);
    assert_eq!(products[0].asin.as_deref(), Some("B000000001"));
    assert_eq!(products[0].display_name, "Sony WH-1000XM5 Headphones");
    // adding never records a status; only the poller does
    assert_eq!(products[0].last_status, StockStatus::Unknown);
    Ok(())
}

#[tokio::test]
async fn test_add_with_custom_name_skips_fetch() -> Result<()> {
    let s = setup()?;
    let url = product_url(2);

    reply(&s, &format!("/add {} Gift   for  Mom", url)).await;

    let products = s.store.list(OWNER).await?;
    assert_eq!(products[0].display_name, "Gift for Mom");
    assert!(s.fetcher.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_add_falls_back_to_asin_when_fetch_fails() -> Result<()> {
    let s = setup()?;
    // ScriptedFetcher answers 404 for unknown urls
    reply(&s, &format!("/add {}", product_url(3))).await;

    let products = s.store.list(OWNER).await?;
    assert_eq!(products[0].display_name, "Product B000000003");
    Ok(())
}

#[tokio::test]
async fn test_duplicate_add_is_rejected() -> Result<()> {
    let s = setup()?;
    let url = product_url(4);

    reply(&s, &format!("/add {} First", url)).await;
    let second = reply(&s, "/add https://amazon.in/Some-Slug/dp/B000000004/ref=x Second").await;

    assert_eq!(second, s.localization.t("add-already-tracked"));
    assert_eq!(s.store.list(OWNER).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_bare_link_is_added() -> Result<()> {
    let s = setup()?;
    let url = product_url(5);
    s.fetcher.set_page(&url, in_stock_page("Air Fryer", "₹4,999.00"));

    let text = reply(&s, &format!("check this out {}", url)).await;
    assert!(text.contains("Air Fryer"));
    assert_eq!(s.store.list(OWNER).await?.len(), 1);

    let no_link = reply(&s, "hello there").await;
    assert_eq!(no_link, s.localization.t("message-no-link"));
    Ok(())
}

#[tokio::test]
async fn test_invalid_urls() -> Result<()> {
    let s = setup()?;

    assert_eq!(reply(&s, "/add").await, s.localization.t("add-usage"));
    assert_eq!(
        reply(&s, "/add https://www.flipkart.com/item/p/itm123").await,
        s.localization.t("error-url-not-amazon")
    );
    assert_eq!(
        reply(&s, "/add not-a-link").await,
        s.localization.t("error-url-invalid")
    );
    assert!(s.store.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_list_status_and_remove() -> Result<()> {
    let s = setup()?;
    assert_eq!(reply(&s, "/list").await, s.localization.t("list-empty"));

    reply(&s, &format!("/add {} Kettle", product_url(6))).await;
    reply(&s, &format!("/add {} Toaster", product_url(7))).await;
    let products = s.store.list(OWNER).await?;
    let kettle = products[0].id;

    s.store
        .update_status(
            kettle,
            StatusUpdate::new(StockStatus::InStock, Utc::now()).with_price(Some(1299.0)),
        )
        .await?;

    let list = reply(&s, "/list").await;
    assert!(list.contains("Kettle"));
    assert!(list.contains("Toaster"));
    assert!(list.contains("(2)"));

    let status = reply(&s, &format!("/status {}", kettle)).await;
    assert!(status.contains("In stock"));
    assert!(status.contains("₹1,299"));

    let removed = reply(&s, &format!("/remove {}", kettle)).await;
    assert!(removed.contains("Kettle"));
    assert_eq!(s.store.list(OWNER).await?.len(), 1);

    let missing = reply(&s, &format!("/status {}", kettle)).await;
    assert!(missing.contains(&format!("#{}", kettle)));
    assert_eq!(reply(&s, "/remove").await, s.localization.t("error-id-missing"));
    assert_eq!(reply(&s, "/remove abc").await, s.localization.t("error-id-invalid"));
    Ok(())
}

#[tokio::test]
async fn test_products_are_scoped_to_owner() -> Result<()> {
    let s = setup()?;
    reply(&s, &format!("/add {} Mine", product_url(8))).await;
    let id = s.store.list(OWNER).await?[0].id;

    let other = s.dispatcher.dispatch(OWNER + 1, &format!("/remove {}", id)).await;
    assert!(other.is_some_and(|text| text.contains("No product")));
    assert_eq!(s.store.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unknown_command() -> Result<()> {
    let s = setup()?;
    assert_eq!(reply(&s, "/frobnicate").await, s.localization.t("unknown-command"));
    Ok(())
}

#[tokio::test]
async fn test_rate_limit() -> Result<()> {
    let s = setup_with_limit(2)?;

    assert_eq!(reply(&s, "/list").await, s.localization.t("list-empty"));
    assert_eq!(reply(&s, "/list").await, s.localization.t("list-empty"));
    let limited = reply(&s, "/list").await;
    assert!(limited.contains("too quickly"), "unexpected reply: {}", limited);

    // other users are unaffected
    let other = s.dispatcher.dispatch(OWNER + 1, "/list").await;
    assert_eq!(other, Some(s.localization.t("list-empty")));
    Ok(())
}
