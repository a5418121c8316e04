//! Outbound alerts.
//!
//! The scheduler only enqueues [`Notification`]s; delivery happens on a
//! background worker so a slow or failing Telegram API never stalls a poll
//! cycle.

use std::sync::Arc;

use parking_lot::Mutex;
use teloxide::prelude::*;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::bot::formatting::format_notification;
use crate::errors::error_logging;
use crate::localization::LocalizationManager;
use crate::observability;
use crate::store::TrackedProduct;

/// What happened to a tracked product
#[derive(Debug, Clone, PartialEq)]
pub enum AlertKind {
    /// Transition from OUT_OF_STOCK or UNKNOWN to IN_STOCK
    BackInStock,
    /// Transition from IN_STOCK to OUT_OF_STOCK
    OutOfStock,
    /// In-stock price fell by at least the configured threshold
    PriceDrop {
        old_price: f64,
        new_price: f64,
        percent: f64,
    },
}

impl AlertKind {
    /// Metric / log label
    pub fn label(&self) -> &'static str {
        match self {
            AlertKind::BackInStock => "back_in_stock",
            AlertKind::OutOfStock => "out_of_stock",
            AlertKind::PriceDrop { .. } => "price_drop",
        }
    }
}

/// An alert addressed to the owner of a product
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub owner_id: i64,
    pub product_id: i64,
    pub display_name: String,
    pub url: String,
    /// Latest observed price, if any
    pub price: Option<f64>,
    pub kind: AlertKind,
}

impl Notification {
    pub fn for_product(product: &TrackedProduct, price: Option<f64>, kind: AlertKind) -> Self {
        Self {
            owner_id: product.owner_id,
            product_id: product.id,
            display_name: product.display_name.clone(),
            url: product.url.clone(),
            price,
            kind,
        }
    }
}

/// Sink for alerts. Implementations must not block the caller.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Telegram notifier that delivers alerts from a background worker
pub struct TelegramNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl TelegramNotifier {
    /// Create the notifier and spawn its delivery worker
    pub fn new(bot: Bot, localization: Arc<LocalizationManager>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(notification_worker(bot, localization, receiver));
        Self { sender }
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            warn!("Telegram notifier channel closed");
        }
    }
}

/// Background worker that sends queued alerts
async fn notification_worker(
    bot: Bot,
    localization: Arc<LocalizationManager>,
    mut receiver: mpsc::UnboundedReceiver<Notification>,
) {
    info!("Telegram notifier started");

    while let Some(notification) = receiver.recv().await {
        let text = format_notification(&notification, &localization);
        let kind = notification.kind.label();

        match bot.send_message(ChatId(notification.owner_id), text).await {
            Ok(_) => {
                observability::record_notification(kind, true);
                info!(
                    owner_id = notification.owner_id,
                    product_id = notification.product_id,
                    kind,
                    "Alert delivered"
                );
            }
            Err(e) => {
                observability::record_notification(kind, false);
                error_logging::log_telegram_error(&e, "send_alert", notification.owner_id);
            }
        }
    }

    warn!("Telegram notifier worker shutting down");
}

/// Notifier that keeps alerts in memory, for tests and dry runs
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts recorded so far
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.sent.lock().push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_notifier_keeps_order() {
        let notifier = RecordingNotifier::new();
        for id in 1..=3 {
            notifier.notify(Notification {
                owner_id: 10,
                product_id: id,
                display_name: format!("Product {}", id),
                url: "https://www.amazon.in/dp/B0CHX1W1XY".to_string(),
                price: None,
                kind: AlertKind::BackInStock,
            });
        }
        let ids: Vec<i64> = notifier.sent().iter().map(|n| n.product_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_alert_labels() {
        assert_eq!(AlertKind::BackInStock.label(), "back_in_stock");
        assert_eq!(
            AlertKind::PriceDrop {
                old_price: 100.0,
                new_price: 90.0,
                percent: 10.0
            }
            .label(),
            "price_drop"
        );
    }
}
