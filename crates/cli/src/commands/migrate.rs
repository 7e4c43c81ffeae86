use crate::commands::{open_pool, run_to_completion, CommandResult, Failure};
use cotiza_core::config::AppConfig;
use cotiza_db::migrations;

pub fn run() -> CommandResult {
    run_to_completion("migrate", apply_pending)
}

async fn apply_pending(config: AppConfig) -> Result<String, Failure> {
    let pool = open_pool(&config).await?;

    migrations::run_pending(&pool)
        .await
        .map_err(|error| ("migration", error.to_string(), 5u8))?;
    pool.close().await;

    Ok("applied pending migrations".to_owned())
}
