pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "fixdesk",
    about = "Fixdesk operator CLI",
    long_about = "Inspect the effective configuration and try the repair funnel locally.",
    after_help = "Examples:\n  fixdesk config\n  fixdesk chat --contact 5511999990000"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Chat with the funnel locally using offline collaborators")]
    Chat {
        #[arg(long, default_value = "local-operator", help = "Contact handle to chat as")]
        contact: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => commands::config::run(),
        Command::Chat { contact } => commands::chat::run(&contact),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
