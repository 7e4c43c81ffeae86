use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use cotiza_core::catalog::CatalogSnapshot;
use cotiza_core::domain::product::{CatalogEntry, ProductId};

use super::quote::parse_decimal;
use super::{CatalogRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCatalogRepository {
    pool: DbPool,
}

impl SqlCatalogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CatalogRepository for SqlCatalogRepository {
    async fn upsert(&self, entry: &CatalogEntry) -> Result<(), RepositoryError> {
        let synonyms_json = serde_json::to_string(&entry.synonyms)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO product (
                id, name, sku, unit_price, stock_quantity, synonyms_json, active, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                sku = excluded.sku,
                unit_price = excluded.unit_price,
                stock_quantity = excluded.stock_quantity,
                synonyms_json = excluded.synonyms_json,
                active = excluded.active,
                updated_at = excluded.updated_at",
        )
        .bind(&entry.id.0)
        .bind(&entry.name)
        .bind(&entry.sku)
        .bind(entry.unit_price.to_string())
        .bind(i64::from(entry.stock_quantity))
        .bind(&synonyms_json)
        .bind(i64::from(entry.active))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn snapshot(&self) -> Result<CatalogSnapshot, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, sku, unit_price, stock_quantity, synonyms_json, active
             FROM product
             ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let entries: Result<Vec<CatalogEntry>, RepositoryError> =
            rows.into_iter().map(entry_from_row).collect();
        Ok(CatalogSnapshot::new(entries?))
    }
}

fn entry_from_row(row: SqliteRow) -> Result<CatalogEntry, RepositoryError> {
    let stock = row.try_get::<i64, _>("stock_quantity")?;
    let stock_quantity = u32::try_from(stock).map_err(|_| {
        RepositoryError::Decode(format!("invalid stock_quantity (expected u32): {stock}"))
    })?;

    let synonyms: Vec<String> = serde_json::from_str(&row.try_get::<String, _>("synonyms_json")?)
        .map_err(|error| RepositoryError::Decode(format!("invalid synonyms_json: {error}")))?;

    Ok(CatalogEntry {
        id: ProductId(row.try_get("id")?),
        name: row.try_get("name")?,
        sku: row.try_get("sku")?,
        unit_price: parse_decimal("unit_price", row.try_get("unit_price")?)?,
        stock_quantity,
        synonyms,
        active: row.try_get::<i64, _>("active")? != 0,
    })
}
