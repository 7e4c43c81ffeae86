use std::collections::HashMap;

use crate::domain::product::{CatalogEntry, ProductId};

/// Lowercases, strips diacritics, and collapses whitespace so "Lápiz" and
/// "lapiz" compare equal. Used for cart line identity and catalog matching.
pub fn normalize_text(input: &str) -> String {
    let mut normalized = String::with_capacity(input.len());
    let mut pending_space = false;

    for ch in input.chars() {
        if ch.is_whitespace() {
            pending_space = !normalized.is_empty();
            continue;
        }
        if pending_space {
            normalized.push(' ');
            pending_space = false;
        }
        for lowered in ch.to_lowercase() {
            match lowered {
                'á' | 'à' | 'ä' | 'â' => normalized.push('a'),
                'é' | 'è' | 'ë' | 'ê' => normalized.push('e'),
                'í' | 'ì' | 'ï' | 'î' => normalized.push('i'),
                'ó' | 'ò' | 'ö' | 'ô' => normalized.push('o'),
                'ú' | 'ù' | 'ü' | 'û' => normalized.push('u'),
                'ñ' => normalized.push('n'),
                other => normalized.push(other),
            }
        }
    }

    normalized
}

/// Point-in-time read of the product catalog. Built once per turn so every
/// lookup within the turn sees the same prices and stock.
#[derive(Clone, Debug, Default)]
pub struct CatalogSnapshot {
    entries: Vec<CatalogEntry>,
    by_id: HashMap<ProductId, usize>,
    by_sku: HashMap<String, usize>,
}

impl CatalogSnapshot {
    /// Inactive entries are dropped at construction; the resolver never
    /// offers a product that cannot be sold.
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        let entries: Vec<CatalogEntry> =
            entries.into_iter().filter(|entry| entry.active).collect();
        let mut by_id = HashMap::with_capacity(entries.len());
        let mut by_sku = HashMap::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            by_id.insert(entry.id.clone(), index);
            by_sku.insert(normalize_text(&entry.sku), index);
        }
        Self { entries, by_id, by_sku }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn by_id(&self, id: &ProductId) -> Option<&CatalogEntry> {
        self.by_id.get(id).map(|&index| &self.entries[index])
    }

    pub fn by_sku(&self, sku: &str) -> Option<&CatalogEntry> {
        self.by_sku.get(&normalize_text(sku)).map(|&index| &self.entries[index])
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::domain::product::{CatalogEntry, ProductId};

    use super::{normalize_text, CatalogSnapshot};

    fn entry(id: &str, name: &str, sku: &str, active: bool) -> CatalogEntry {
        CatalogEntry {
            id: ProductId(id.to_owned()),
            name: name.to_owned(),
            sku: sku.to_owned(),
            unit_price: Decimal::new(2500, 2),
            stock_quantity: 10,
            synonyms: Vec::new(),
            active,
        }
    }

    #[test]
    fn normalization_strips_accents_and_case() {
        assert_eq!(normalize_text("Lápiz Mongol Nº2"), "lapiz mongol no2");
        assert_eq!(normalize_text("  CALCULADORA   Científica "), "calculadora cientifica");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_text("Pluma BIC Azúl");
        assert_eq!(normalize_text(&once), once);
    }

    #[test]
    fn snapshot_filters_inactive_entries() {
        let snapshot = CatalogSnapshot::new(vec![
            entry("p1", "papel bond carta", "PAP-001", true),
            entry("p2", "papel bond oficio", "PAP-002", false),
        ]);

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.by_id(&ProductId("p2".to_owned())).is_none());
    }

    #[test]
    fn sku_lookup_is_case_insensitive() {
        let snapshot = CatalogSnapshot::new(vec![entry("p1", "folder manila", "FOL-010", true)]);
        assert!(snapshot.by_sku("fol-010").is_some());
    }
}
