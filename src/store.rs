//! # Product Store
//!
//! The store is the single owner of tracked product records. Both the poll
//! scheduler and the command dispatcher go through [`ProductStore`]; neither
//! keeps its own copy of the product list.
//!
//! Two implementations exist:
//! - [`crate::db::PgProductStore`] backed by PostgreSQL (production)
//! - [`InMemoryProductStore`] backed by a mutex-guarded map (tests, local runs)

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::{StoreError, StoreResult};

/// Availability of a tracked product as last observed by a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    Unknown,
    InStock,
    OutOfStock,
    FetchError,
}

impl StockStatus {
    /// Database / log representation
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Unknown => "UNKNOWN",
            StockStatus::InStock => "IN_STOCK",
            StockStatus::OutOfStock => "OUT_OF_STOCK",
            StockStatus::FetchError => "FETCH_ERROR",
        }
    }

    /// A reading that says something about availability
    pub fn is_definitive(&self) -> bool {
        matches!(self, StockStatus::InStock | StockStatus::OutOfStock)
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            StockStatus::InStock => "🟢",
            StockStatus::OutOfStock => "🔴",
            StockStatus::FetchError => "⚠️",
            StockStatus::Unknown => "⚪",
        }
    }
}

impl fmt::Display for StockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StockStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNKNOWN" => Ok(StockStatus::Unknown),
            "IN_STOCK" => Ok(StockStatus::InStock),
            "OUT_OF_STOCK" => Ok(StockStatus::OutOfStock),
            "FETCH_ERROR" => Ok(StockStatus::FetchError),
            other => Err(format!("unknown stock status: {}", other)),
        }
    }
}

/// A product URL tracked on behalf of one chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedProduct {
    pub id: i64,
    pub owner_id: i64,
    pub url: String,
    pub asin: Option<String>,
    pub display_name: String,
    pub last_status: StockStatus,
    /// Last IN_STOCK / OUT_OF_STOCK reading, UNKNOWN until there is one.
    /// Alerts compare against this so a failed poll cannot hide a transition.
    pub last_known_status: StockStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub current_price: Option<f64>,
    pub previous_price: Option<f64>,
    pub check_count: i32,
    pub fail_count: i32,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to start tracking a product
#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub owner_id: i64,
    pub url: String,
    pub asin: Option<String>,
    pub display_name: String,
}

/// Outcome of one poll attempt for one product
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusUpdate {
    pub status: StockStatus,
    pub price: Option<f64>,
    pub checked_at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(status: StockStatus, checked_at: DateTime<Utc>) -> Self {
        Self {
            status,
            price: None,
            checked_at,
        }
    }

    pub fn with_price(mut self, price: Option<f64>) -> Self {
        self.price = price;
        self
    }
}

/// One row of a product's price history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: f64,
    pub status: StockStatus,
    pub checked_at: DateTime<Utc>,
}

/// Persistence contract shared by the scheduler and the command dispatcher.
///
/// Every method is atomic with respect to a single record. `update_status`
/// on an id that no longer exists is a no-op returning `Ok(false)`; it must
/// never recreate the row.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Start tracking a product, failing with `AlreadyTracked` on a duplicate `(owner, url)`
    async fn add(&self, product: NewProduct) -> StoreResult<TrackedProduct>;

    /// All products of one owner, oldest first
    async fn list(&self, owner_id: i64) -> StoreResult<Vec<TrackedProduct>>;

    async fn get(&self, owner_id: i64, product_id: i64) -> StoreResult<TrackedProduct>;

    async fn remove(&self, owner_id: i64, product_id: i64) -> StoreResult<()>;

    /// Record a completed poll attempt. Returns whether a row was updated.
    async fn update_status(&self, product_id: i64, update: StatusUpdate) -> StoreResult<bool>;

    /// Products across all owners, least recently checked first
    async fn list_for_polling(&self, limit: usize) -> StoreResult<Vec<TrackedProduct>>;

    /// Most recent price observations, newest first
    async fn price_history(&self, product_id: i64, limit: usize) -> StoreResult<Vec<PricePoint>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    products: BTreeMap<i64, TrackedProduct>,
    history: BTreeMap<i64, Vec<PricePoint>>,
}

/// Mutex-guarded store used by tests and database-less local runs
#[derive(Debug, Default)]
pub struct InMemoryProductStore {
    state: Mutex<MemoryState>,
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked products across all owners
    pub fn len(&self) -> usize {
        self.state.lock().products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProductStore for InMemoryProductStore {
    async fn add(&self, product: NewProduct) -> StoreResult<TrackedProduct> {
        let mut state = self.state.lock();

        let duplicate = state
            .products
            .values()
            .any(|p| p.owner_id == product.owner_id && p.url == product.url);
        if duplicate {
            return Err(StoreError::AlreadyTracked {
                owner_id: product.owner_id,
                url: product.url,
            });
        }

        state.next_id += 1;
        let tracked = TrackedProduct {
            id: state.next_id,
            owner_id: product.owner_id,
            url: product.url,
            asin: product.asin,
            display_name: product.display_name,
            last_status: StockStatus::Unknown,
            last_known_status: StockStatus::Unknown,
            last_checked_at: None,
            current_price: None,
            previous_price: None,
            check_count: 0,
            fail_count: 0,
            created_at: Utc::now(),
        };
        state.products.insert(tracked.id, tracked.clone());
        Ok(tracked)
    }

    async fn list(&self, owner_id: i64) -> StoreResult<Vec<TrackedProduct>> {
        let state = self.state.lock();
        Ok(state
            .products
            .values()
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn get(&self, owner_id: i64, product_id: i64) -> StoreResult<TrackedProduct> {
        let state = self.state.lock();
        state
            .products
            .get(&product_id)
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                owner_id,
                product_id,
            })
    }

    async fn remove(&self, owner_id: i64, product_id: i64) -> StoreResult<()> {
        let mut state = self.state.lock();
        let owned = state
            .products
            .get(&product_id)
            .is_some_and(|p| p.owner_id == owner_id);
        if !owned {
            return Err(StoreError::NotFound {
                owner_id,
                product_id,
            });
        }
        state.products.remove(&product_id);
        state.history.remove(&product_id);
        Ok(())
    }

    async fn update_status(&self, product_id: i64, update: StatusUpdate) -> StoreResult<bool> {
        let mut state = self.state.lock();
        let state = &mut *state;

        let Some(product) = state.products.get_mut(&product_id) else {
            return Ok(false);
        };

        product.last_status = update.status;
        product.last_checked_at = Some(update.checked_at);

        if update.status == StockStatus::FetchError {
            product.fail_count += 1;
            return Ok(true);
        }

        product.check_count += 1;
        if update.status.is_definitive() {
            product.last_known_status = update.status;
        }
        if let Some(price) = update.price {
            if product.current_price != Some(price) {
                state.history.entry(product_id).or_default().push(PricePoint {
                    price,
                    status: update.status,
                    checked_at: update.checked_at,
                });
            }
            product.previous_price = product.current_price;
            product.current_price = Some(price);
        }
        Ok(true)
    }

    async fn list_for_polling(&self, limit: usize) -> StoreResult<Vec<TrackedProduct>> {
        let state = self.state.lock();
        let mut products: Vec<TrackedProduct> = state.products.values().cloned().collect();
        // never-checked products sort first because None < Some(_)
        products.sort_by_key(|p| (p.last_checked_at, p.id));
        products.truncate(limit);
        Ok(products)
    }

    async fn price_history(&self, product_id: i64, limit: usize) -> StoreResult<Vec<PricePoint>> {
        let state = self.state.lock();
        Ok(state
            .history
            .get(&product_id)
            .map(|points| points.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
