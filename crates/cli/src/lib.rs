pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "cotiza",
    about = "Cotiza operator CLI",
    long_about = "Operate the conversational quoting engine: migrations, demo catalog seeding, \
                  config inspection, readiness checks, and a local chat simulator.",
    after_help = "Examples:\n  cotiza doctor --json\n  cotiza seed\n  cotiza simulate"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply any pending database migrations")]
    Migrate,
    #[command(about = "Load the demo stationery catalog into the configured database")]
    Seed,
    #[command(about = "Print the effective configuration with sources and secrets redacted")]
    Config,
    #[command(about = "Validate config, interpreter credentials, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Print the report as JSON")]
        json: bool,
    },
    #[command(about = "Chat with the quoting engine locally over in-memory stores")]
    Simulate,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Simulate => commands::simulate::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
