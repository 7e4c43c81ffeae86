use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::quote::QuoteLine;
use crate::errors::DomainError;

/// Pricing input for one resolved cart line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineAmount {
    pub product_name: String,
    pub product_sku: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteTotals {
    pub lines: Vec<QuoteLine>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
}

/// Pure pricing arithmetic. Intermediate figures keep full decimal
/// precision; rounding to two places happens exactly once, on the presented
/// figures, with half-up ties (10.005 -> 10.01).
#[derive(Clone, Copy, Debug)]
pub struct QuoteCalculator {
    tax_rate: Decimal,
}

impl QuoteCalculator {
    pub fn new(tax_rate: Decimal) -> Result<Self, DomainError> {
        if tax_rate < Decimal::ZERO || tax_rate >= Decimal::ONE {
            return Err(DomainError::InvariantViolation(format!(
                "tax rate {tax_rate} out of range [0, 1)"
            )));
        }
        Ok(Self { tax_rate })
    }

    pub fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    pub fn compute(
        &self,
        lines: &[LineAmount],
        shipping_cost: Decimal,
    ) -> Result<QuoteTotals, DomainError> {
        if lines.is_empty() {
            return Err(DomainError::InvariantViolation(
                "cannot price an empty set of lines".to_owned(),
            ));
        }
        if shipping_cost < Decimal::ZERO {
            return Err(DomainError::InvariantViolation(
                "shipping cost cannot be negative".to_owned(),
            ));
        }

        let mut subtotal = Decimal::ZERO;
        let mut exact_lines = Vec::with_capacity(lines.len());
        for line in lines {
            if line.quantity == 0 {
                return Err(DomainError::InvariantViolation(format!(
                    "line `{}` has zero quantity",
                    line.product_name
                )));
            }
            if line.unit_price < Decimal::ZERO {
                return Err(DomainError::InvariantViolation(format!(
                    "line `{}` has a negative unit price",
                    line.product_name
                )));
            }
            let line_total = line.unit_price * Decimal::from(line.quantity);
            subtotal += line_total;
            exact_lines.push((line, line_total));
        }

        let tax_amount = subtotal * self.tax_rate;
        let total = subtotal + tax_amount + shipping_cost;

        Ok(QuoteTotals {
            lines: exact_lines
                .into_iter()
                .map(|(line, line_total)| QuoteLine {
                    product_name: line.product_name.clone(),
                    product_sku: line.product_sku.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    line_total: round_money(line_total),
                })
                .collect(),
            subtotal: round_money(subtotal),
            tax_rate: self.tax_rate,
            tax_amount: round_money(tax_amount),
            shipping_cost: round_money(shipping_cost),
            total: round_money(total),
        })
    }
}

fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
