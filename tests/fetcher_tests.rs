use amazon_stock_tracker::config::FetcherConfig;
use amazon_stock_tracker::errors::FetchError;
use amazon_stock_tracker::fetcher::{HttpPageFetcher, PageFetcher};
use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use test_helpers::{in_stock_page, ROBOT_CHECK_PAGE};

/// Serve the same canned response to every request, counting them
async fn canned_server(status_line: &'static str, body: String) -> Result<(String, Arc<AtomicUsize>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&hits);
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut request = Vec::new();
                while let Ok(n) = stream.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    Ok((format!("http://{}/dp/B000000001", addr), hits))
}

fn fast_config() -> FetcherConfig {
    FetcherConfig {
        timeout_secs: 5,
        max_retries: 2,
        retry_base_delay_ms: 10,
        retry_max_delay_ms: 20,
        min_request_interval_ms: 0,
        circuit_failure_threshold: 2,
        circuit_reset_secs: 600,
        cache_ttl_secs: 0,
    }
}

/// Fetcher with a proxy-free client so requests reach the local server
fn fetcher() -> Result<HttpPageFetcher> {
    let config = fast_config();
    let client = reqwest::Client::builder()
        .no_proxy()
        .timeout(config.timeout())
        .build()?;
    Ok(HttpPageFetcher::with_client(client, &config))
}

#[tokio::test]
async fn test_fetch_success() -> Result<()> {
    let (url, hits) = canned_server("200 OK", in_stock_page("Kettle", "₹1,299.00")).await?;
    let fetcher = fetcher()?;

    let html = fetcher.fetch(&url).await?;
    assert!(html.contains("productTitle"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_robot_check_is_blocked_without_retry() -> Result<()> {
    let (url, hits) = canned_server("200 OK", ROBOT_CHECK_PAGE.to_string()).await?;
    let fetcher = fetcher()?;

    let result = fetcher.fetch(&url).await;
    assert!(matches!(result, Err(FetchError::Blocked { .. })));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_server_errors_are_retried() -> Result<()> {
    let (url, hits) = canned_server("503 Service Unavailable", "busy".to_string()).await?;
    let fetcher = fetcher()?;

    let result = fetcher.fetch(&url).await;
    assert!(matches!(result, Err(FetchError::Http { status: 503, .. })));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn test_not_found_is_not_retried() -> Result<()> {
    let (url, hits) = canned_server("404 Not Found", "gone".to_string()).await?;
    let fetcher = fetcher()?;

    let result = fetcher.fetch(&url).await;
    assert!(matches!(result, Err(FetchError::Http { status: 404, .. })));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_circuit_opens_after_repeated_robot_checks() -> Result<()> {
    let (url, hits) = canned_server("200 OK", ROBOT_CHECK_PAGE.to_string()).await?;
    let fetcher = fetcher()?;

    for _ in 0..2 {
        assert!(fetcher.fetch(&url).await.is_err());
    }
    assert!(fetcher.circuit_breaker().is_open());

    let result = fetcher.fetch(&url).await;
    assert_eq!(result, Err(FetchError::CircuitOpen));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn test_delisted_products_do_not_open_circuit() -> Result<()> {
    let (gone_url, gone_hits) = canned_server("404 Not Found", "gone".to_string()).await?;
    let (live_url, live_hits) = canned_server("200 OK", in_stock_page("Kettle", "₹1,299.00")).await?;
    let fetcher = fetcher()?;

    // more 404s in a row than the failure threshold
    for _ in 0..5 {
        let result = fetcher.fetch(&gone_url).await;
        assert!(matches!(result, Err(FetchError::Http { status: 404, .. })));
    }
    assert!(!fetcher.circuit_breaker().is_open());
    assert_eq!(gone_hits.load(Ordering::SeqCst), 5);

    let html = fetcher.fetch(&live_url).await?;
    assert!(html.contains("Kettle"));
    assert_eq!(live_hits.load(Ordering::SeqCst), 1);
    Ok(())
}
