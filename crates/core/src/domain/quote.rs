use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::session::SessionId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteId(pub String);

/// Human-legible quote number, sequential per calendar year (`2026-0001`).
/// Sequences are assigned once by the store and never reused, so gaps are
/// legal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteNumber {
    year: i32,
    sequence: u32,
}

impl QuoteNumber {
    pub fn new(year: i32, sequence: u32) -> Result<Self, DomainError> {
        if sequence == 0 {
            return Err(DomainError::InvariantViolation(
                "quote sequence numbers start at 1".to_owned(),
            ));
        }
        Ok(Self { year, sequence })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl fmt::Display for QuoteNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:04}", self.year, self.sequence)
    }
}

impl FromStr for QuoteNumber {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid =
            || DomainError::InvariantViolation(format!("invalid quote number `{value}`"));
        let (year, sequence) = value.split_once('-').ok_or_else(invalid)?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let sequence = sequence.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, sequence)
    }
}

/// Snapshot of one quoted line. Name, SKU, and unit price are frozen at
/// finalization so later catalog changes never rewrite history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteLine {
    pub product_name: String,
    pub product_sku: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// Immutable priced quote. A new mutation after finalization produces a new
/// quote; existing quotes are append-only records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub number: QuoteNumber,
    pub session_id: SessionId,
    pub lines: Vec<QuoteLine>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}
