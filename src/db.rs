use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::errors::{error_logging, StoreError, StoreResult};
use crate::retry::{retry_async, RetryPolicy};
use crate::store::{NewProduct, PricePoint, ProductStore, StatusUpdate, StockStatus, TrackedProduct};

const PRODUCT_COLUMNS: &str = "id, owner_id, url, asin, display_name, last_status, last_known_status, \
     last_checked_at, current_price, previous_price, check_count, fail_count, created_at";

/// Create a connection pool from configuration
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    info!(
        max_connections = config.max_connections,
        connect_timeout_secs = config.connect_timeout_secs,
        "Connecting to database"
    );

    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs));
    if let Some(secs) = config.idle_timeout_secs {
        options = options.idle_timeout(Duration::from_secs(secs));
    }

    options
        .connect(&config.url)
        .await
        .context("Failed to connect to database")
}

/// Connect and initialize the schema, retrying while the database comes up
pub async fn connect_with_retry(config: &DatabaseConfig) -> Result<PgPool> {
    retry_async(&config.connect_retry_policy(), "database_startup", || async move {
        let pool = connect(config).await?;
        init_database_schema(&pool).await?;
        Ok::<_, anyhow::Error>(pool)
    })
    .await
    .with_context(|| {
        format!(
            "Database unavailable after {} attempts",
            config.connect_retry_policy().max_attempts()
        )
    })
}

/// Initialize the database schema
pub async fn init_database_schema(pool: &PgPool) -> Result<()> {
    info!("Initializing database schema");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS products (
            id BIGSERIAL PRIMARY KEY,
            owner_id BIGINT NOT NULL,
            url TEXT NOT NULL CHECK (url <> ''),
            asin VARCHAR(10),
            display_name TEXT NOT NULL,
            last_status VARCHAR(20) NOT NULL DEFAULT 'UNKNOWN',
            last_known_status VARCHAR(20) NOT NULL DEFAULT 'UNKNOWN',
            last_checked_at TIMESTAMPTZ,
            current_price DOUBLE PRECISION,
            previous_price DOUBLE PRECISION,
            check_count INTEGER NOT NULL DEFAULT 0,
            fail_count INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (owner_id, url)
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create products table")?;

    sqlx::query(
        "ALTER TABLE products ADD COLUMN IF NOT EXISTS last_known_status VARCHAR(20) NOT NULL DEFAULT 'UNKNOWN'",
    )
    .execute(pool)
    .await
    .context("Failed to add products last_known_status column")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS price_history (
            id BIGSERIAL PRIMARY KEY,
            product_id BIGINT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            price DOUBLE PRECISION NOT NULL,
            status VARCHAR(20) NOT NULL,
            checked_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create price_history table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS products_owner_id_idx ON products(owner_id)")
        .execute(pool)
        .await
        .context("Failed to create products owner_id index")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS products_last_checked_idx ON products(last_checked_at NULLS FIRST)",
    )
    .execute(pool)
    .await
    .context("Failed to create products last_checked_at index")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS price_history_product_idx ON price_history(product_id, checked_at DESC)",
    )
    .execute(pool)
    .await
    .context("Failed to create price_history index")?;

    info!("Database schema initialized successfully");
    Ok(())
}

/// Whether a database error is a connectivity problem worth retrying
fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Protocol(_)
    )
}

fn product_from_row(row: &PgRow) -> TrackedProduct {
    let status: String = row.get("last_status");
    let known: String = row.get("last_known_status");
    TrackedProduct {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        url: row.get("url"),
        asin: row.get("asin"),
        display_name: row.get("display_name"),
        last_status: status.parse().unwrap_or(StockStatus::Unknown),
        last_known_status: known.parse().unwrap_or(StockStatus::Unknown),
        last_checked_at: row.get("last_checked_at"),
        current_price: row.get("current_price"),
        previous_price: row.get("previous_price"),
        check_count: row.get("check_count"),
        fail_count: row.get("fail_count"),
        created_at: row.get("created_at"),
    }
}

/// PostgreSQL implementation of [`ProductStore`]
#[derive(Debug, Clone)]
pub struct PgProductStore {
    pool: PgPool,
    retry: RetryPolicy,
}

impl PgProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retry: RetryPolicy {
                max_retries: 2,
                base_delay_ms: 250,
                max_delay_ms: 2000,
            },
        }
    }

    /// Run a database operation, retrying connectivity failures with backoff
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let start = Instant::now();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    crate::observability::record_db_metrics(operation, start.elapsed());
                    return Ok(value);
                }
                Err(err) if is_transient(&err) && attempt < self.retry.max_attempts() => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        operation = %operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient database error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    error_logging::log_database_error(&err, operation, None, None);
                    return Err(StoreError::from(err));
                }
            }
        }
    }
}

async fn update_status_once(
    pool: &PgPool,
    product_id: i64,
    update: StatusUpdate,
) -> Result<bool, sqlx::Error> {
    let status = update.status.as_str();

    if update.status == StockStatus::FetchError {
        let result = sqlx::query(
            "UPDATE products SET last_status = $2, last_checked_at = $3, fail_count = fail_count + 1
             WHERE id = $1",
        )
        .bind(product_id)
        .bind(status)
        .bind(update.checked_at)
        .execute(pool)
        .await?;
        return Ok(result.rows_affected() > 0);
    }

    let mut tx = pool.begin().await?;

    // row lock serializes against a concurrent DELETE of the same product
    let current: Option<Option<f64>> =
        sqlx::query_scalar("SELECT current_price FROM products WHERE id = $1 FOR UPDATE")
            .bind(product_id)
            .fetch_optional(&mut *tx)
            .await?;

    let Some(current_price) = current else {
        tx.commit().await?;
        return Ok(false);
    };

    if let Some(price) = update.price {
        if current_price != Some(price) {
            sqlx::query(
                "INSERT INTO price_history (product_id, price, status, checked_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(product_id)
            .bind(price)
            .bind(status)
            .bind(update.checked_at)
            .execute(&mut *tx)
            .await?;
        }
    }

    sqlx::query(
        "UPDATE products SET
            last_status = $2,
            last_known_status = CASE WHEN $5 THEN $2 ELSE last_known_status END,
            last_checked_at = $3,
            check_count = check_count + 1,
            previous_price = CASE WHEN $4::DOUBLE PRECISION IS NULL THEN previous_price ELSE current_price END,
            current_price = COALESCE($4, current_price)
         WHERE id = $1",
    )
    .bind(product_id)
    .bind(status)
    .bind(update.checked_at)
    .bind(update.price)
    .bind(update.status.is_definitive())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn add(&self, product: NewProduct) -> StoreResult<TrackedProduct> {
        debug!(owner_id = %product.owner_id, url = %product.url, "Adding tracked product");

        let pool = &self.pool;
        let owner_id = product.owner_id;
        let url = product.url.as_str();
        let asin = product.asin.as_deref();
        let display_name = product.display_name.as_str();
        let query = format!(
            "INSERT INTO products (owner_id, url, asin, display_name) VALUES ($1, $2, $3, $4)
             ON CONFLICT (owner_id, url) DO NOTHING
             RETURNING {PRODUCT_COLUMNS}"
        );
        let query = query.as_str();

        let row = self
            .with_retry("add_product", || async move {
                sqlx::query(query)
                    .bind(owner_id)
                    .bind(url)
                    .bind(asin)
                    .bind(display_name)
                    .fetch_optional(pool)
                    .await
            })
            .await?;

        match row {
            Some(row) => {
                let tracked = product_from_row(&row);
                debug!(product_id = %tracked.id, "Tracked product created successfully");
                Ok(tracked)
            }
            None => {
                info!(owner_id = %owner_id, url = %url, "Product already tracked");
                Err(StoreError::AlreadyTracked {
                    owner_id,
                    url: product.url.clone(),
                })
            }
        }
    }

    async fn list(&self, owner_id: i64) -> StoreResult<Vec<TrackedProduct>> {
        debug!(owner_id = %owner_id, "Listing tracked products");

        let pool = &self.pool;
        let query = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE owner_id = $1 ORDER BY id");
        let query = query.as_str();

        let rows = self
            .with_retry("list_products", || async move {
                sqlx::query(query).bind(owner_id).fetch_all(pool).await
            })
            .await?;

        let products: Vec<TrackedProduct> = rows.iter().map(product_from_row).collect();
        debug!(owner_id = %owner_id, count = products.len(), "Found tracked products");
        Ok(products)
    }

    async fn get(&self, owner_id: i64, product_id: i64) -> StoreResult<TrackedProduct> {
        let pool = &self.pool;
        let query =
            format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND owner_id = $2");
        let query = query.as_str();

        let row = self
            .with_retry("get_product", || async move {
                sqlx::query(query)
                    .bind(product_id)
                    .bind(owner_id)
                    .fetch_optional(pool)
                    .await
            })
            .await?;

        row.as_ref().map(product_from_row).ok_or(StoreError::NotFound {
            owner_id,
            product_id,
        })
    }

    async fn remove(&self, owner_id: i64, product_id: i64) -> StoreResult<()> {
        debug!(owner_id = %owner_id, product_id = %product_id, "Removing tracked product");

        let pool = &self.pool;
        let result = self
            .with_retry("remove_product", || async move {
                sqlx::query("DELETE FROM products WHERE id = $1 AND owner_id = $2")
                    .bind(product_id)
                    .bind(owner_id)
                    .execute(pool)
                    .await
            })
            .await?;

        if result.rows_affected() > 0 {
            info!(product_id = %product_id, "Tracked product removed");
            Ok(())
        } else {
            Err(StoreError::NotFound {
                owner_id,
                product_id,
            })
        }
    }

    async fn update_status(&self, product_id: i64, update: StatusUpdate) -> StoreResult<bool> {
        let pool = &self.pool;
        let updated = self
            .with_retry("update_status", || update_status_once(pool, product_id, update))
            .await?;

        if !updated {
            debug!(product_id = %product_id, "Status update skipped, product no longer exists");
        }
        Ok(updated)
    }

    async fn list_for_polling(&self, limit: usize) -> StoreResult<Vec<TrackedProduct>> {
        let pool = &self.pool;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let query = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products
             ORDER BY last_checked_at ASC NULLS FIRST, id ASC
             LIMIT $1"
        );
        let query = query.as_str();

        let rows = self
            .with_retry("list_for_polling", || async move {
                sqlx::query(query).bind(limit).fetch_all(pool).await
            })
            .await?;

        Ok(rows.iter().map(product_from_row).collect())
    }

    async fn price_history(&self, product_id: i64, limit: usize) -> StoreResult<Vec<PricePoint>> {
        let pool = &self.pool;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = self
            .with_retry("price_history", || async move {
                sqlx::query(
                    "SELECT price, status, checked_at FROM price_history
                     WHERE product_id = $1 ORDER BY checked_at DESC, id DESC LIMIT $2",
                )
                .bind(product_id)
                .bind(limit)
                .fetch_all(pool)
                .await
            })
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let status: String = row.get("status");
                let checked_at: DateTime<Utc> = row.get("checked_at");
                PricePoint {
                    price: row.get("price"),
                    status: status.parse().unwrap_or(StockStatus::Unknown),
                    checked_at,
                }
            })
            .collect())
    }
}
