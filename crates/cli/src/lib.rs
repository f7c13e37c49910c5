pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "otvet",
    about = "Otvet operator CLI",
    long_about = "Operate the Otvet auto-responder: migrations, config inspection, readiness checks, and webhook registration.",
    after_help = "Examples:\n  otvet doctor --json\n  otvet config\n  otvet history chat-123 --limit 10\n  otvet register-webhook"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, credential readiness, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print the recorded question/answer history for a conversation")]
    History {
        #[arg(help = "Conversation (chat) id to inspect")]
        conversation_id: String,
        #[arg(long, default_value_t = 20, help = "Maximum number of records, newest first")]
        limit: usize,
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        name = "register-webhook",
        about = "Point the Avito messenger webhook subscription at this deployment"
    )]
    RegisterWebhook,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::History { conversation_id, limit, json } => {
            commands::history::run(&conversation_id, limit, json)
        }
        Command::RegisterWebhook => commands::register_webhook::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
