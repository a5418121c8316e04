//! # Amazon Stock Tracker Telegram Bot
//!
//! A Telegram bot that polls Amazon India product pages, infers whether each
//! product can be bought, and messages the user who added it when it comes
//! back in stock.

pub mod bot;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod errors;
pub mod fetcher;
pub mod localization;
pub mod notifier;
pub mod observability;
pub mod observability_config;
pub mod parser;
pub mod rate_limit;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod validation;

// Re-export types for easier access
pub use errors::{AppError, AppResult, FetchError, StoreError};
pub use store::{ProductStore, StockStatus, TrackedProduct};
