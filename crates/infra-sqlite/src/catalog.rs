// SQLite Catalog - WorkSource and ResultLedger

use async_trait::async_trait;
use imgpipe_core::domain::{validate_image_url, ImageResultRecord, ProductId, WorkItem};
use imgpipe_core::error::{AppError, Result};
use imgpipe_core::port::{ResultLedger, WorkFilter, WorkSource};
use sqlx::SqlitePool;
use tracing::{debug, warn};

// Helper to convert sqlx::Error to AppError with structured information.
// `wrap` picks the variant: Query for reads, Persist for ledger writes.
fn map_sqlx_error(err: sqlx::Error, wrap: fn(String) -> AppError) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => wrap(format!(
                        "Unique constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "275" => wrap(format!(
                        "Check constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "5" => wrap(format!("Database locked (SQLITE_BUSY): {}", db_err.message())),
                    "13" => wrap(format!("Database full: {}", db_err.message())),
                    _ => wrap(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                wrap(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => wrap("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => wrap(format!("Column not found: {}", col)),
        // Connection, pool, protocol errors
        _ => wrap(err.to_string()),
    }
}

/// Catalog row as inserted by seeding tools and tests
#[derive(Debug, Clone, Default)]
pub struct NewProduct {
    pub id: ProductId,
    pub user_id: Option<i64>,
    pub product_name: String,
    pub product_description: Option<String>,
    /// `None` stores SQL NULL, which the producer skips
    pub product_images: Option<Vec<String>>,
    pub product_price: Option<f64>,
}

impl NewProduct {
    pub fn new(id: ProductId, product_name: impl Into<String>) -> Self {
        Self {
            id,
            product_name: product_name.into(),
            ..Default::default()
        }
    }

    pub fn with_images<I, S>(mut self, images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.product_images = Some(images.into_iter().map(Into::into).collect());
        self
    }
}

pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_product(&self, product: &NewProduct) -> Result<()> {
        let images = product
            .product_images
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO products (
                id, user_id, product_name, product_description, product_images, product_price
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(product.id)
        .bind(product.user_id)
        .bind(&product.product_name)
        .bind(&product.product_description)
        .bind(&images)
        .bind(product.product_price)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, AppError::Persist))?;

        Ok(())
    }

    /// Number of recorded results, for operator reporting
    pub async fn count_results(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM image_results")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, AppError::Query))
    }
}

#[async_trait]
impl WorkSource for SqliteCatalog {
    async fn query(&self, filter: WorkFilter) -> Result<Vec<WorkItem>> {
        // One row per array element, trimmed; non-string and blank entries are skipped
        let rows: Vec<WorkRow> = sqlx::query_as(
            r#"
            SELECT p.id AS id, TRIM(j.value, char(32, 9, 10, 13)) AS image_url
            FROM products p, json_each(p.product_images) j
            WHERE p.product_images IS NOT NULL
              AND j.type = 'text'
              AND TRIM(j.value, char(32, 9, 10, 13)) <> ''
              AND (
                ? OR NOT EXISTS (
                    SELECT 1 FROM image_results r
                    WHERE r.product_id = p.id AND r.image_url = TRIM(j.value, char(32, 9, 10, 13))
                )
              )
            ORDER BY p.id, j.key
            "#,
        )
        .bind(filter.include_processed)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, AppError::Query))?;

        let found = rows.len();
        // Consumers reject these, so they would be re-published on every run
        let items: Vec<WorkItem> = rows
            .into_iter()
            .filter(|r| match validate_image_url(&r.image_url) {
                Ok(()) => true,
                Err(e) => {
                    warn!(product_id = r.id, error = %e, "Skipping unfetchable image reference");
                    false
                }
            })
            .map(|r| WorkItem::new(r.id, r.image_url))
            .collect();

        debug!(
            items = items.len(),
            skipped = found - items.len(),
            include_processed = filter.include_processed,
            "Catalog queried"
        );
        Ok(items)
    }
}

#[async_trait]
impl ResultLedger for SqliteCatalog {
    async fn record(&self, record: &ImageResultRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO image_results (
                product_id, image_url, result_key, location, byte_len,
                quality, width, height, processed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(product_id, image_url) DO UPDATE SET
                result_key = excluded.result_key,
                location = excluded.location,
                byte_len = excluded.byte_len,
                quality = excluded.quality,
                width = excluded.width,
                height = excluded.height,
                processed_at = excluded.processed_at
            "#,
        )
        .bind(record.product_id)
        .bind(&record.image_url)
        .bind(&record.result_key)
        .bind(&record.location)
        .bind(record.byte_len)
        .bind(record.quality)
        .bind(record.width)
        .bind(record.height)
        .bind(record.processed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, AppError::Persist))?;

        Ok(())
    }

    async fn find(&self, product_id: i64, image_url: &str) -> Result<Option<ImageResultRecord>> {
        let row = sqlx::query_as::<_, ResultRow>(
            "SELECT * FROM image_results WHERE product_id = ? AND image_url = ?",
        )
        .bind(product_id)
        .bind(image_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, AppError::Query))?;

        Ok(row.map(|r| r.into_record()))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WorkRow {
    id: i64,
    image_url: String,
}

#[derive(Debug, sqlx::FromRow)]
struct ResultRow {
    product_id: i64,
    image_url: String,
    result_key: String,
    location: String,
    byte_len: i64,
    quality: u8,
    width: u32,
    height: u32,
    processed_at: i64,
}

impl ResultRow {
    fn into_record(self) -> ImageResultRecord {
        ImageResultRecord {
            product_id: self.product_id,
            image_url: self.image_url,
            result_key: self.result_key,
            location: self.location,
            byte_len: self.byte_len,
            quality: self.quality,
            width: self.width,
            height: self.height,
            processed_at: self.processed_at,
        }
    }
}
