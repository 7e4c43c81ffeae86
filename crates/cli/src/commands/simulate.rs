use std::io::{self, BufRead, Write};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::commands::{run_to_completion, CommandResult, Failure};
use cotiza_agent::{
    ConversationEngine, InboundMessage, LlmInterpreter, MessageInterpreter, OpenAiClient,
    RuleBasedInterpreter,
};
use cotiza_core::config::{AppConfig, LlmProvider};
use cotiza_core::domain::session::SessionKey;
use cotiza_core::errors::InterfaceError;
use cotiza_db::repositories::{
    InMemoryCatalogRepository, InMemoryQuoteRepository, InMemorySessionRepository,
};
use cotiza_db::seed_catalog;

/// Local REPL over the demo catalog and in-memory stores. The interpreter is
/// whatever the config selects, so the same command exercises the rules path
/// and a live model.
pub fn run() -> CommandResult {
    run_to_completion("simulate", |config| async move {
        init_logging(&config);
        let turns = simulate(config).await?;
        Ok(format!("simulation ended after {turns} turns"))
    })
}

fn init_logging(config: &AppConfig) {
    use cotiza_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

async fn simulate(config: AppConfig) -> Result<usize, Failure> {
    let interpreter: Arc<dyn MessageInterpreter> = match config.llm.provider {
        LlmProvider::Rules => Arc::new(RuleBasedInterpreter::new()),
        LlmProvider::OpenAi | LlmProvider::Ollama => {
            let client = OpenAiClient::from_config(&config.llm)
                .map_err(|error| ("llm_client", error.to_string(), 4u8))?;
            Arc::new(LlmInterpreter::new(client, &config.llm))
        }
    };

    let catalog = Arc::new(InMemoryCatalogRepository::default());
    seed_catalog(catalog.as_ref())
        .await
        .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

    let engine = ConversationEngine::new(
        interpreter,
        Arc::new(InMemorySessionRepository::default()),
        Arc::new(InMemoryQuoteRepository::default()),
        catalog,
        config.quoting.clone(),
        config.resolver,
    )
    .map_err(|error| ("engine_init", error.to_string(), 6u8))?;

    let key = SessionKey { user_id: "operador".to_owned(), chat_id: "simulador".to_owned() };
    println!("Simulador de cotizaciones sobre el catálogo demo. Escribe `salir` para terminar.");

    let stdin = io::stdin();
    let mut turns = 0usize;
    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(error) => return Err(("stdin", error.to_string(), 7u8)),
        }

        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if matches!(text, "salir" | "exit" | "quit") {
            break;
        }

        let message = InboundMessage {
            key: key.clone(),
            channel_message_id: Uuid::new_v4().to_string(),
            text: text.to_owned(),
            received_at: Utc::now(),
        };

        match engine.handle_message(&message).await {
            Ok(result) => {
                println!("{}", result.reply.text);
                turns += 1;
            }
            // The operator sees the same copy a chat user would.
            Err(error) => println!("{}", InterfaceError::from(error).user_message()),
        }
    }

    Ok(turns)
}
