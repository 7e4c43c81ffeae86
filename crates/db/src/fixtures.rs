use rust_decimal::Decimal;

use cotiza_core::domain::product::{CatalogEntry, ProductId};

use crate::repositories::{CatalogRepository, RepositoryError};

/// Demo stationery catalog used by the CLI simulator and the seed command.
/// Prices are in MXN; the two bond paper variants exist on purpose so
/// disambiguation paths can be exercised out of the box.
const SEED_PRODUCTS: &[SeedProduct] = &[
    SeedProduct {
        id: "prod-papel-carta",
        name: "Papel bond carta 500 hojas",
        sku: "PAP-001",
        unit_price_cents: 9900,
        stock: 120,
        synonyms: &["hojas blancas carta", "resma carta"],
    },
    SeedProduct {
        id: "prod-papel-oficio",
        name: "Papel bond oficio 500 hojas",
        sku: "PAP-002",
        unit_price_cents: 11500,
        stock: 80,
        synonyms: &["hojas blancas oficio", "resma oficio"],
    },
    SeedProduct {
        id: "prod-lapiz-mongol",
        name: "Lápiz Mongol No. 2",
        sku: "LAP-001",
        unit_price_cents: 550,
        stock: 500,
        synonyms: &["lapices", "lapiz del numero 2"],
    },
    SeedProduct {
        id: "prod-pluma-bic-azul",
        name: "Pluma BIC punto mediano azul",
        sku: "PLU-001",
        unit_price_cents: 700,
        stock: 300,
        synonyms: &["boligrafo azul", "pluma azul"],
    },
    SeedProduct {
        id: "prod-calculadora-casio",
        name: "Calculadora Casio FX-991",
        sku: "CAL-001",
        unit_price_cents: 28900,
        stock: 35,
        synonyms: &["calculadora cientifica", "casio fx991"],
    },
    SeedProduct {
        id: "prod-folder-manila",
        name: "Folder manila tamaño carta",
        sku: "FOL-010",
        unit_price_cents: 450,
        stock: 250,
        synonyms: &["folders carta"],
    },
    SeedProduct {
        id: "prod-cuaderno-prof",
        name: "Cuaderno profesional cuadro chico 100 hojas",
        sku: "CUA-001",
        unit_price_cents: 3200,
        stock: 140,
        synonyms: &["libreta profesional", "cuaderno cuadriculado"],
    },
    SeedProduct {
        id: "prod-marcatextos",
        name: "Marcatextos amarillo fluorescente",
        sku: "MAR-001",
        unit_price_cents: 1250,
        stock: 90,
        synonyms: &["resaltador amarillo", "subrayador"],
    },
];

struct SeedProduct {
    id: &'static str,
    name: &'static str,
    sku: &'static str,
    unit_price_cents: i64,
    stock: u32,
    synonyms: &'static [&'static str],
}

impl SeedProduct {
    fn to_entry(&self) -> CatalogEntry {
        CatalogEntry {
            id: ProductId(self.id.to_owned()),
            name: self.name.to_owned(),
            sku: self.sku.to_owned(),
            unit_price: Decimal::new(self.unit_price_cents, 2),
            stock_quantity: self.stock,
            synonyms: self.synonyms.iter().map(|s| (*s).to_owned()).collect(),
            active: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedSummary {
    pub products_seeded: usize,
}

/// Idempotent: re-running refreshes the same entries instead of duplicating
/// them.
pub async fn seed_catalog(
    repository: &dyn CatalogRepository,
) -> Result<SeedSummary, RepositoryError> {
    for product in SEED_PRODUCTS {
        repository.upsert(&product.to_entry()).await?;
    }
    Ok(SeedSummary { products_seeded: SEED_PRODUCTS.len() })
}

#[cfg(test)]
mod tests {
    use crate::repositories::{CatalogRepository, InMemoryCatalogRepository};

    use super::seed_catalog;

    #[tokio::test]
    async fn seeding_twice_does_not_duplicate_products() {
        let repo = InMemoryCatalogRepository::default();

        let first = seed_catalog(&repo).await.expect("first seed");
        let second = seed_catalog(&repo).await.expect("second seed");
        assert_eq!(first, second);

        let snapshot = repo.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.len(), first.products_seeded);
    }

    #[tokio::test]
    async fn seeded_catalog_supports_sku_lookup() {
        let repo = InMemoryCatalogRepository::default();
        seed_catalog(&repo).await.expect("seed");

        let snapshot = repo.snapshot().await.expect("snapshot");
        let calculator = snapshot.by_sku("CAL-001").expect("calculator present");
        assert_eq!(calculator.name, "Calculadora Casio FX-991");
        assert!(calculator.stock_quantity > 0);
    }
}
