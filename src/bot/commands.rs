//! Command parsing and dispatch.
//!
//! Commands are looked up in a static table; each maps to one handler that
//! talks to the store and returns the reply text. Nothing here touches
//! Telegram directly, which keeps the dispatcher testable with an in-memory
//! store and a scripted fetcher.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::RateLimitConfig;
use crate::errors::{error_logging, StoreError};
use crate::fetcher::PageFetcher;
use crate::localization::LocalizationManager;
use crate::observability;
use crate::parser;
use crate::rate_limit::RateLimiter;
use crate::store::{NewProduct, ProductStore};
use crate::validation::{
    find_url_in_text, normalize_display_name, parse_product_id, validate_product_url, ProductLink,
};

use super::formatting::{format_product_card, format_product_list};

/// Chat commands understood by the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Add,
    List,
    Status,
    Remove,
}

/// Command name → handler
pub const COMMANDS: &[(&str, Command)] = &[
    ("start", Command::Start),
    ("help", Command::Help),
    ("add", Command::Add),
    ("list", Command::List),
    ("status", Command::Status),
    ("remove", Command::Remove),
];

impl Command {
    pub fn name(&self) -> &'static str {
        COMMANDS
            .iter()
            .find(|(_, command)| command == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }

    /// Look up a command by name, case-insensitively
    pub fn lookup(name: &str) -> Option<Command> {
        COMMANDS
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, command)| *command)
    }
}

/// Classification of an incoming text message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input<'a> {
    Command { command: Command, args: &'a str },
    UnknownCommand(&'a str),
    Text(&'a str),
}

/// Split a message into command and arguments.
///
/// `/add@my_bot <url>` is treated like `/add <url>`.
pub fn parse_input(text: &str) -> Input<'_> {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Input::Text(trimmed);
    };

    let (head, args) = match rest.find(char::is_whitespace) {
        Some(index) => (&rest[..index], rest[index..].trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or(head);

    match Command::lookup(name) {
        Some(command) => Input::Command { command, args },
        None => Input::UnknownCommand(name),
    }
}

/// Maps chat input to store operations and reply text
pub struct CommandDispatcher {
    store: Arc<dyn ProductStore>,
    fetcher: Arc<dyn PageFetcher>,
    localization: Arc<LocalizationManager>,
    rate_limiter: RateLimiter,
    poll_interval_minutes: u64,
}

impl CommandDispatcher {
    pub fn new(
        store: Arc<dyn ProductStore>,
        fetcher: Arc<dyn PageFetcher>,
        localization: Arc<LocalizationManager>,
        rate_limit: &RateLimitConfig,
        poll_interval_secs: u64,
    ) -> Self {
        Self {
            store,
            fetcher,
            localization,
            rate_limiter: RateLimiter::from_config(rate_limit),
            poll_interval_minutes: (poll_interval_secs / 60).max(1),
        }
    }

    /// Handle one message from `owner_id`, returning the reply if any
    pub async fn dispatch(&self, owner_id: i64, text: &str) -> Option<String> {
        let input = parse_input(text);
        if input == Input::Text("") {
            return None;
        }

        if !self.rate_limiter.is_allowed(owner_id) {
            observability::record_rate_limited();
            let wait = self.rate_limiter.wait_time(owner_id).as_secs().max(1).to_string();
            return Some(self.localization.t_args("rate-limited", &[("seconds", wait.as_str())]));
        }

        let reply = match input {
            Input::Command { command, args } => {
                observability::record_command(command.name());
                debug!(owner_id, command = command.name(), "Handling command");
                match command {
                    Command::Start => self.localization.t("welcome"),
                    Command::Help => self.help(),
                    Command::Add => self.handle_add_args(owner_id, args).await,
                    Command::List => self.handle_list(owner_id).await,
                    Command::Status => self.handle_status(owner_id, args).await,
                    Command::Remove => self.handle_remove(owner_id, args).await,
                }
            }
            Input::UnknownCommand(name) => {
                observability::record_command("unknown");
                debug!(owner_id, command = name, "Unknown command");
                self.localization.t("unknown-command")
            }
            Input::Text(text) => {
                observability::record_command("text");
                match find_url_in_text(text) {
                    Some(url) => self.handle_add(owner_id, url, None).await,
                    None => self.localization.t("message-no-link"),
                }
            }
        };

        Some(reply)
    }

    fn help(&self) -> String {
        let minutes = self.poll_interval_minutes.to_string();
        self.localization.t_args("help", &[("minutes", minutes.as_str())])
    }

    fn internal_error(&self) -> String {
        self.localization.t("error-internal")
    }

    async fn handle_add_args(&self, owner_id: i64, args: &str) -> String {
        let mut parts = args.split_whitespace();
        let Some(url) = parts.next() else {
            return self.localization.t("add-usage");
        };
        let name = parts.collect::<Vec<_>>().join(" ");
        let name = (!name.is_empty()).then_some(name);
        self.handle_add(owner_id, url, name.as_deref()).await
    }

    async fn handle_add(&self, owner_id: i64, url: &str, name: Option<&str>) -> String {
        let link = match validate_product_url(url) {
            Ok(link) => link,
            Err(key) => return self.localization.t(key),
        };

        // skip the page fetch when the product is obviously a duplicate
        match self.store.list(owner_id).await {
            Ok(products) if products.iter().any(|p| p.url == link.url) => {
                return self.localization.t("add-already-tracked");
            }
            Ok(_) => {}
            Err(e) => {
                error_logging::log_database_error(&e, "list_products", Some(owner_id), None);
                return self.internal_error();
            }
        }

        let display_name = match name.and_then(normalize_display_name) {
            Some(name) => name,
            None => self.derive_display_name(&link).await,
        };

        let new_product = NewProduct {
            owner_id,
            url: link.url.clone(),
            asin: link.asin.clone(),
            display_name,
        };

        match self.store.add(new_product).await {
            Ok(product) => {
                info!(owner_id, product_id = product.id, url = %product.url, "Product added");
                let id = product.id.to_string();
                self.localization.t_args(
                    "add-success",
                    &[
                        ("id", id.as_str()),
                        ("name", product.display_name.as_str()),
                        ("url", product.url.as_str()),
                    ],
                )
            }
            Err(StoreError::AlreadyTracked { .. }) => self.localization.t("add-already-tracked"),
            Err(e) => {
                error_logging::log_database_error(&e, "add_product", Some(owner_id), None);
                self.internal_error()
            }
        }
    }

    /// Best-effort page title, falling back to the ASIN
    async fn derive_display_name(&self, link: &ProductLink) -> String {
        let fallback = || match &link.asin {
            Some(asin) => format!("Product {}", asin),
            None => "Amazon product".to_string(),
        };

        match self.fetcher.fetch(&link.url).await {
            Ok(html) => parser::extract_title(&html)
                .and_then(|title| normalize_display_name(&title))
                .unwrap_or_else(fallback),
            Err(e) => {
                debug!(url = %link.url, error = %e, "Could not fetch title, using fallback name");
                fallback()
            }
        }
    }

    async fn handle_list(&self, owner_id: i64) -> String {
        match self.store.list(owner_id).await {
            Ok(products) => format_product_list(&products, &self.localization),
            Err(e) => {
                error_logging::log_database_error(&e, "list_products", Some(owner_id), None);
                self.internal_error()
            }
        }
    }

    async fn handle_status(&self, owner_id: i64, args: &str) -> String {
        let product_id = match parse_product_id(args) {
            Ok(id) => id,
            Err(key) => return self.localization.t(key),
        };

        match self.store.get(owner_id, product_id).await {
            Ok(product) => format_product_card(&product, &self.localization),
            Err(StoreError::NotFound { .. }) => self.not_found(product_id),
            Err(e) => {
                error_logging::log_database_error(&e, "get_product", Some(owner_id), Some(product_id));
                self.internal_error()
            }
        }
    }

    async fn handle_remove(&self, owner_id: i64, args: &str) -> String {
        let product_id = match parse_product_id(args) {
            Ok(id) => id,
            Err(key) => return self.localization.t(key),
        };

        let product = match self.store.get(owner_id, product_id).await {
            Ok(product) => product,
            Err(StoreError::NotFound { .. }) => return self.not_found(product_id),
            Err(e) => {
                error_logging::log_database_error(&e, "get_product", Some(owner_id), Some(product_id));
                return self.internal_error();
            }
        };

        match self.store.remove(owner_id, product_id).await {
            Ok(()) => {
                info!(owner_id, product_id, "Product removed");
                let id = product_id.to_string();
                self.localization.t_args(
                    "remove-success",
                    &[("id", id.as_str()), ("name", product.display_name.as_str())],
                )
            }
            Err(StoreError::NotFound { .. }) => self.not_found(product_id),
            Err(e) => {
                error_logging::log_database_error(&e, "remove_product", Some(owner_id), Some(product_id));
                self.internal_error()
            }
        }
    }

    fn not_found(&self, product_id: i64) -> String {
        let id = product_id.to_string();
        self.localization.t_args("product-not-found", &[("id", id.as_str())])
    }
}
