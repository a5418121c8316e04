use amazon_stock_tracker::observability::{self, HealthState};
use anyhow::Result;
use hyper::{Method, StatusCode};

#[tokio::test]
async fn test_readiness_without_database_reports_json() -> Result<()> {
    let response = observability::respond(&Method::GET, "/health/ready", &HealthState::default()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").map(|v| v.as_bytes()),
        Some(&b"application/json"[..])
    );

    let body: serde_json::Value = serde_json::from_str(response.body())?;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["database"], "not_configured");
    Ok(())
}

#[tokio::test]
async fn test_health_server_serves_liveness() -> Result<()> {
    let addr = observability::start_health_server(0, HealthState::default()).await?;

    let client = reqwest::Client::builder().no_proxy().build()?;
    let response = client
        .get(format!("http://127.0.0.1:{}/health", addr.port()))
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await?, "OK");
    Ok(())
}
