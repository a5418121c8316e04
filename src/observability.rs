//! Observability module for centralized metrics, tracing, and logging setup.
//!
//! This module provides:
//! - Structured logging with configurable levels and formats
//! - Metrics collection and Prometheus export
//! - The health/metrics HTTP server (`/`, `/health`, `/health/live`,
//!   `/health/ready`, `/metrics`)
//! - Metric recording helpers used by the fetcher, store, scheduler and bot

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use hyper::server::conn::http1;
use hyper::{Method, Response, StatusCode};
use hyper_util::rt::TokioIo;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tracing_subscriber::prelude::*;

use crate::observability_config::{LogFormat, ObservabilityConfig};

/// Dependencies consulted by the health endpoints
#[derive(Clone, Default)]
pub struct HealthState {
    /// Pool pinged by `/health/ready`; readiness is unconditional without one
    pub db_pool: Option<PgPool>,
    /// Prometheus handle rendered by `/metrics`
    pub metrics: Option<PrometheusHandle>,
}

/// Initialize structured logging with tracing and configuration
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.log_level))?
        .add_directive("sqlx=warn".parse()?)
        .add_directive("teloxide=warn".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);

    let format = config.effective_log_format();
    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?,
    }

    tracing::info!(
        environment = %config.environment,
        log_level = %config.log_level,
        log_format = %format,
        "Tracing initialized with structured logging"
    );
    Ok(())
}

/// Install the Prometheus recorder when metrics export is enabled
pub fn init_metrics(config: &ObservabilityConfig) -> Result<Option<PrometheusHandle>> {
    if !config.enable_metrics_export {
        tracing::info!("Metrics export disabled");
        return Ok(None);
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    tracing::info!("Metrics collection initialized");
    Ok(Some(handle))
}

fn text_response(status: StatusCode, body: impl Into<String>) -> Response<String> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<String> {
    let mut response = text_response(status, body.to_string());
    response.headers_mut().insert(
        "content-type",
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

/// Route one health server request
pub async fn respond(method: &Method, path: &str, state: &HealthState) -> Response<String> {
    if *method != Method::GET {
        return text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    }

    match path {
        "/" => text_response(StatusCode::OK, "Amazon stock tracker is running"),
        "/health" | "/health/live" => text_response(StatusCode::OK, "OK"),
        "/health/ready" => match &state.db_pool {
            Some(pool) => match check_database_health(pool).await {
                Ok(()) => json_response(StatusCode::OK, serde_json::json!({"status": "ready", "database": "ok"})),
                Err(e) => json_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    serde_json::json!({"status": "not_ready", "database": e.to_string()}),
                ),
            },
            None => json_response(
                StatusCode::OK,
                serde_json::json!({"status": "ready", "database": "not_configured"}),
            ),
        },
        "/metrics" => match &state.metrics {
            Some(handle) => {
                let mut response = text_response(StatusCode::OK, handle.render());
                response.headers_mut().insert(
                    "content-type",
                    hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
                );
                response
            }
            None => text_response(StatusCode::NOT_FOUND, "Metrics export disabled"),
        },
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

/// Bind the health server and serve it on a background task.
///
/// Returns the bound address, which differs from `port` only when `port` is 0.
pub async fn start_health_server(port: u16, state: HealthState) -> Result<SocketAddr> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(address = %local_addr, "Health server listening");

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let state = state.clone();

                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);

                        let service = hyper::service::service_fn(
                            move |req: hyper::Request<hyper::body::Incoming>| {
                                let state = state.clone();
                                async move {
                                    let response = respond(req.method(), req.uri().path(), &state).await;
                                    Ok::<_, std::convert::Infallible>(response)
                                }
                            },
                        );

                        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                            tracing::debug!("Error serving health connection: {:?}", err);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Error accepting health connection: {}", e);
                }
            }
        }
    });

    Ok(local_addr)
}

/// Check database connectivity and basic query capability
pub async fn check_database_health(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| anyhow::anyhow!("Database health check failed: {}", e))?;

    tracing::debug!("Database health check passed");
    Ok(())
}

/// Create a span for one poll cycle
pub fn poll_cycle_span(cycle: u64) -> tracing::Span {
    tracing::info_span!("poll_cycle", cycle = cycle, component = "scheduler")
}

/// Create a span for Telegram bot operations
pub fn telegram_span(operation: &str, chat_id: i64) -> tracing::Span {
    tracing::info_span!(
        "telegram_operation",
        operation = operation,
        chat_id = chat_id,
        component = "telegram"
    )
}

/// Record database operation metrics
pub fn record_db_metrics(operation: &str, duration: Duration) {
    let operation = operation.to_string();
    metrics::counter!("db_operations_total", "operation" => operation).increment(1);
    metrics::histogram!("db_operation_duration_seconds").record(duration.as_secs_f64());
}

/// Record one page fetch, `result` is "success" or a `FetchError::kind`
pub fn record_fetch_metrics(result: &str, duration: Duration, attempts: u32) {
    let result = result.to_string();
    metrics::counter!("page_fetches_total", "result" => result).increment(1);
    metrics::histogram!("page_fetch_duration_seconds").record(duration.as_secs_f64());
    metrics::histogram!("page_fetch_attempts").record(attempts as f64);
}

/// Record the outcome of a poll cycle
pub fn record_poll_cycle(checked: usize, fetch_failures: usize, notifications: usize, duration: Duration) {
    metrics::counter!("poll_cycles_total").increment(1);
    metrics::counter!("products_checked_total").increment(checked as u64);
    metrics::counter!("product_fetch_failures_total").increment(fetch_failures as u64);
    metrics::gauge!("last_poll_cycle_products").set(checked as f64);
    metrics::histogram!("poll_cycle_duration_seconds").record(duration.as_secs_f64());
    if notifications > 0 {
        metrics::counter!("notifications_queued_total").increment(notifications as u64);
    }
}

/// Record a stock status change observed by a poll
pub fn record_status_transition(from: &str, to: &str) {
    let from = from.to_string();
    let to = to.to_string();
    metrics::counter!("stock_status_transitions_total", "from" => from, "to" => to).increment(1);
}

/// Record a delivered or failed notification
pub fn record_notification(kind: &str, delivered: bool) {
    let kind = kind.to_string();
    metrics::counter!(
        "notifications_total",
        "kind" => kind,
        "result" => if delivered { "delivered" } else { "failed" }
    )
    .increment(1);
}

/// Record Telegram command processing metrics
pub fn record_command(command: &str) {
    let command = command.to_string();
    metrics::counter!("telegram_commands_total", "command" => command).increment(1);
}

/// Record a command rejected by the per-user rate limiter
pub fn record_rate_limited() {
    metrics::counter!("telegram_rate_limited_total").increment(1);
}

/// Record a page cache lookup
pub fn record_page_cache(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    metrics::counter!("page_cache_lookups_total", "outcome" => outcome).increment(1);
}

/// Update circuit breaker state metric
pub fn update_circuit_breaker_state(is_open: bool) {
    metrics::gauge!("circuit_breaker_state").set(if is_open { 1.0 } else { 0.0 });
}
