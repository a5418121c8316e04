//! # Poll Scheduler
//!
//! Periodically walks the tracked products, least recently checked first, and
//! for each one runs fetch → parse → store update → alerts.
//!
//! ```text
//! IDLE → FETCHING → PARSING → UPDATING → (NOTIFYING) → IDLE
//! ```
//!
//! A failed fetch is recorded as `FETCH_ERROR` and the cycle moves on; no
//! single product can abort a cycle. Alerts are only raised after the store
//! confirmed the update, so a product removed mid-cycle never produces one.
//!
//! Alerts compare against the last definitive reading (`last_known_status`),
//! not the raw last status, so OUT_OF_STOCK → FETCH_ERROR → IN_STOCK still
//! announces the restock while IN_STOCK → FETCH_ERROR → IN_STOCK stays quiet.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::config::SchedulerConfig;
use crate::errors::error_logging;
use crate::fetcher::PageFetcher;
use crate::notifier::{AlertKind, Notification, Notifier};
use crate::observability;
use crate::parser;
use crate::store::{ProductStore, StatusUpdate, StockStatus, TrackedProduct};

/// Summary of one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Products attempted this cycle
    pub checked: usize,
    /// Products fetched, parsed and stored
    pub updated: usize,
    /// Products whose fetch failed (stored as FETCH_ERROR)
    pub fetch_failures: usize,
    /// Products removed while the cycle was running
    pub vanished: usize,
    /// Products whose store update failed
    pub store_failures: usize,
    /// Alerts handed to the notifier
    pub notifications: usize,
    /// Whether shutdown interrupted the cycle
    pub interrupted: bool,
}

enum ProductOutcome {
    Updated { notifications: usize },
    FetchFailed,
    Vanished,
    StoreFailed,
}

/// Decide which alerts a status/price change deserves.
///
/// `previous_status` is the last definitive status stored before this poll,
/// `previous_price` the last known price.
pub fn alerts_for_transition(
    previous_status: StockStatus,
    previous_price: Option<f64>,
    new_status: StockStatus,
    new_price: Option<f64>,
    config: &SchedulerConfig,
) -> Vec<AlertKind> {
    let mut alerts = Vec::new();

    match (previous_status, new_status) {
        (StockStatus::OutOfStock | StockStatus::Unknown, StockStatus::InStock) => {
            alerts.push(AlertKind::BackInStock);
        }
        (StockStatus::InStock, StockStatus::OutOfStock) if config.notify_out_of_stock => {
            alerts.push(AlertKind::OutOfStock);
        }
        (StockStatus::InStock, StockStatus::InStock) => {
            if let (Some(old_price), Some(new_price)) = (previous_price, new_price) {
                if old_price > 0.0 && config.price_drop_threshold_percent > 0.0 {
                    let percent = (old_price - new_price) / old_price * 100.0;
                    if percent >= config.price_drop_threshold_percent {
                        alerts.push(AlertKind::PriceDrop {
                            old_price,
                            new_price,
                            percent,
                        });
                    }
                }
            }
        }
        _ => {}
    }

    alerts
}

/// Timer-driven poller sharing the store with the command dispatcher
pub struct PollScheduler {
    store: Arc<dyn ProductStore>,
    fetcher: Arc<dyn PageFetcher>,
    notifier: Arc<dyn Notifier>,
    config: SchedulerConfig,
    cycles: AtomicU64,
}

impl PollScheduler {
    pub fn new(
        store: Arc<dyn ProductStore>,
        fetcher: Arc<dyn PageFetcher>,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            notifier,
            config,
            cycles: AtomicU64::new(0),
        }
    }

    /// Run poll cycles until `shutdown` is cancelled.
    ///
    /// Cancellation is observed between products, so an in-flight fetch
    /// always completes and its result is stored before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            initial_delay_secs = self.config.initial_delay_secs,
            max_products_per_run = self.config.max_products_per_run,
            "Poll scheduler started"
        );

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Poll scheduler stopped before first cycle");
                return;
            }
            _ = tokio::time::sleep(self.config.initial_delay()) => {}
        }

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let report = self.cycle(Some(&shutdown)).await;
            if report.interrupted {
                break;
            }
        }

        info!("Poll scheduler stopped");
    }

    /// Run one full cycle immediately
    pub async fn run_cycle(&self) -> CycleReport {
        self.cycle(None).await
    }

    async fn cycle(&self, shutdown: Option<&CancellationToken>) -> CycleReport {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let span = observability::poll_cycle_span(cycle);
        self.cycle_inner(shutdown).instrument(span).await
    }

    async fn cycle_inner(&self, shutdown: Option<&CancellationToken>) -> CycleReport {
        let start = Instant::now();
        let mut report = CycleReport::default();

        let products = match self.store.list_for_polling(self.config.max_products_per_run).await {
            Ok(products) => products,
            Err(e) => {
                error_logging::log_database_error(&e, "list_for_polling", None, None);
                return report;
            }
        };

        if products.is_empty() {
            debug!("No tracked products to poll");
            return report;
        }

        for product in &products {
            if shutdown.is_some_and(|token| token.is_cancelled()) {
                report.interrupted = true;
                info!(remaining = products.len() - report.checked, "Shutdown requested, ending cycle early");
                break;
            }

            report.checked += 1;
            match self.poll_product(product).await {
                ProductOutcome::Updated { notifications } => {
                    report.updated += 1;
                    report.notifications += notifications;
                }
                ProductOutcome::FetchFailed => report.fetch_failures += 1,
                ProductOutcome::Vanished => report.vanished += 1,
                ProductOutcome::StoreFailed => report.store_failures += 1,
            }
        }

        observability::record_poll_cycle(
            report.checked,
            report.fetch_failures,
            report.notifications,
            start.elapsed(),
        );
        info!(
            checked = report.checked,
            updated = report.updated,
            fetch_failures = report.fetch_failures,
            vanished = report.vanished,
            store_failures = report.store_failures,
            notifications = report.notifications,
            duration_ms = start.elapsed().as_millis() as u64,
            "Poll cycle finished"
        );

        report
    }

    async fn poll_product(&self, product: &TrackedProduct) -> ProductOutcome {
        let checked_at = Utc::now();

        let update = match self.fetcher.fetch(&product.url).await {
            Ok(html) => {
                let snapshot = parser::parse_page(&html);
                StatusUpdate::new(snapshot.status, checked_at).with_price(snapshot.price)
            }
            Err(e) => {
                warn!(
                    product_id = product.id,
                    url = %product.url,
                    error = %e,
                    "Fetch failed, recording FETCH_ERROR"
                );
                StatusUpdate::new(StockStatus::FetchError, checked_at)
            }
        };

        match self.store.update_status(product.id, update).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(product_id = product.id, "Product removed during poll, skipping alerts");
                return ProductOutcome::Vanished;
            }
            Err(e) => {
                error_logging::log_database_error(&e, "update_status", Some(product.owner_id), Some(product.id));
                return ProductOutcome::StoreFailed;
            }
        }

        if update.status == StockStatus::FetchError {
            return ProductOutcome::FetchFailed;
        }

        if product.last_status != update.status {
            observability::record_status_transition(product.last_status.as_str(), update.status.as_str());
            info!(
                product_id = product.id,
                owner_id = product.owner_id,
                from = %product.last_status,
                to = %update.status,
                "Stock status changed"
            );
        }

        let alerts = alerts_for_transition(
            product.last_known_status,
            product.current_price,
            update.status,
            update.price,
            &self.config,
        );
        let notifications = alerts.len();
        for kind in alerts {
            self.notifier
                .notify(Notification::for_product(product, update.price, kind));
        }

        ProductOutcome::Updated { notifications }
    }
}
