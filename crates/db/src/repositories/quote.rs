use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use cotiza_core::domain::quote::{Quote, QuoteId, QuoteLine, QuoteNumber};
use cotiza_core::domain::session::SessionId;

use super::session::parse_timestamp;
use super::{QuoteRepository, RepositoryError};
use crate::DbPool;

pub struct SqlQuoteRepository {
    pool: DbPool,
}

impl SqlQuoteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_lines(&self, quote_id: &str) -> Result<Vec<QuoteLine>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT product_name, product_sku, quantity, unit_price, line_total
             FROM quote_line
             WHERE quote_id = ?
             ORDER BY position ASC",
        )
        .bind(quote_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(line_from_row).collect()
    }
}

#[async_trait::async_trait]
impl QuoteRepository for SqlQuoteRepository {
    async fn allocate_number(&self, year: i32) -> Result<QuoteNumber, RepositoryError> {
        // Single statement keeps the counter bump atomic under WAL.
        let row = sqlx::query(
            "INSERT INTO quote_counter (year, last_sequence) VALUES (?, 1)
             ON CONFLICT(year) DO UPDATE SET last_sequence = last_sequence + 1
             RETURNING last_sequence",
        )
        .bind(year)
        .fetch_one(&self.pool)
        .await?;

        let sequence = row.try_get::<i64, _>("last_sequence")?;
        let sequence = u32::try_from(sequence).map_err(|_| {
            RepositoryError::Decode(format!("quote counter overflow for year {year}: {sequence}"))
        })?;

        QuoteNumber::new(year, sequence)
            .map_err(|error| RepositoryError::Decode(error.to_string()))
    }

    async fn save(&self, quote: &Quote) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO quote (
                id, quote_number, session_id, subtotal, tax_rate, tax_amount,
                shipping_cost, total, created_at, valid_until
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&quote.id.0)
        .bind(quote.number.to_string())
        .bind(&quote.session_id.0)
        .bind(quote.subtotal.to_string())
        .bind(quote.tax_rate.to_string())
        .bind(quote.tax_amount.to_string())
        .bind(quote.shipping_cost.to_string())
        .bind(quote.total.to_string())
        .bind(quote.created_at.to_rfc3339())
        .bind(quote.valid_until.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for (position, line) in quote.lines.iter().enumerate() {
            sqlx::query(
                "INSERT INTO quote_line (
                    quote_id, position, product_name, product_sku,
                    quantity, unit_price, line_total
                 ) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&quote.id.0)
            .bind(position as i64)
            .bind(&line.product_name)
            .bind(&line.product_sku)
            .bind(i64::from(line.quantity))
            .bind(line.unit_price.to_string())
            .bind(line.line_total.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_number(
        &self,
        number: &QuoteNumber,
    ) -> Result<Option<Quote>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, quote_number, session_id, subtotal, tax_rate, tax_amount,
                    shipping_cost, total, created_at, valid_until
             FROM quote
             WHERE quote_number = ?",
        )
        .bind(number.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let quote_id = row.try_get::<String, _>("id")?;
        let lines = self.load_lines(&quote_id).await?;
        quote_from_row(row, lines).map(Some)
    }

    async fn list_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<Quote>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, quote_number, session_id, subtotal, tax_rate, tax_amount,
                    shipping_cost, total, created_at, valid_until
             FROM quote
             WHERE session_id = ?
             ORDER BY created_at ASC",
        )
        .bind(&session_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut quotes = Vec::with_capacity(rows.len());
        for row in rows {
            let quote_id = row.try_get::<String, _>("id")?;
            let lines = self.load_lines(&quote_id).await?;
            quotes.push(quote_from_row(row, lines)?);
        }
        Ok(quotes)
    }
}

fn quote_from_row(row: SqliteRow, lines: Vec<QuoteLine>) -> Result<Quote, RepositoryError> {
    let number_raw = row.try_get::<String, _>("quote_number")?;
    let number = number_raw
        .parse::<QuoteNumber>()
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    Ok(Quote {
        id: QuoteId(row.try_get("id")?),
        number,
        session_id: SessionId(row.try_get("session_id")?),
        lines,
        subtotal: parse_decimal("subtotal", row.try_get("subtotal")?)?,
        tax_rate: parse_decimal("tax_rate", row.try_get("tax_rate")?)?,
        tax_amount: parse_decimal("tax_amount", row.try_get("tax_amount")?)?,
        shipping_cost: parse_decimal("shipping_cost", row.try_get("shipping_cost")?)?,
        total: parse_decimal("total", row.try_get("total")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        valid_until: parse_timestamp("valid_until", row.try_get("valid_until")?)?,
    })
}

fn line_from_row(row: SqliteRow) -> Result<QuoteLine, RepositoryError> {
    let quantity = row.try_get::<i64, _>("quantity")?;
    let quantity = u32::try_from(quantity).map_err(|_| {
        RepositoryError::Decode(format!("invalid line quantity (expected u32): {quantity}"))
    })?;

    Ok(QuoteLine {
        product_name: row.try_get("product_name")?,
        product_sku: row.try_get("product_sku")?,
        quantity,
        unit_price: parse_decimal("unit_price", row.try_get("unit_price")?)?,
        line_total: parse_decimal("line_total", row.try_get("line_total")?)?,
    })
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    value.parse::<Decimal>().map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}
