use crate::commands::{open_pool, run_to_completion, CommandResult, Failure};
use cotiza_core::config::AppConfig;
use cotiza_db::repositories::SqlCatalogRepository;
use cotiza_db::{migrations, seed_catalog};

/// Applies migrations first so `seed` works against a fresh database file.
pub fn run() -> CommandResult {
    run_to_completion("seed", load_demo_catalog)
}

async fn load_demo_catalog(config: AppConfig) -> Result<String, Failure> {
    let pool = open_pool(&config).await?;

    migrations::run_pending(&pool)
        .await
        .map_err(|error| ("migration", error.to_string(), 5u8))?;

    let catalog = SqlCatalogRepository::new(pool.clone());
    let summary = seed_catalog(&catalog)
        .await
        .map_err(|error| ("seed_execution", error.to_string(), 6u8))?;
    pool.close().await;

    Ok(format!("demo catalog loaded: {} products upserted", summary.products_seeded))
}
