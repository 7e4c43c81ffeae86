use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductId(pub String);

/// One sellable product as synchronized from the external commerce system.
/// The engine never mutates entries; it only reads consistent snapshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: ProductId,
    pub name: String,
    pub sku: String,
    pub unit_price: Decimal,
    pub stock_quantity: u32,
    pub synonyms: Vec<String>,
    pub active: bool,
}

/// A scored catalog projection used for disambiguation prompts and
/// "did you mean" suggestions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub product_id: ProductId,
    pub name: String,
    pub sku: String,
    pub unit_price: Decimal,
    pub score: f64,
}

impl Candidate {
    pub fn from_entry(entry: &CatalogEntry, score: f64) -> Self {
        Self {
            product_id: entry.id.clone(),
            name: entry.name.clone(),
            sku: entry.sku.clone(),
            unit_price: entry.unit_price,
            score,
        }
    }
}
