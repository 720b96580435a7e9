//! Local conversation against the in-memory session store and the offline
//! collaborators. Useful for trying lexicon changes without any external service.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::Result;
use fixdesk_agent::{AgentRuntime, Collaborators, ConversationService, Services};
use fixdesk_core::config::{AppConfig, LoadOptions};
use fixdesk_db::InMemorySessionRepository;

use crate::commands::CommandResult;

pub const CHANNEL: &str = "cli";
const QUIT: &str = "/quit";

pub fn run(contact: &str) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let service = match local_service(&config) {
        Ok(service) => service,
        Err(error) => {
            return CommandResult::failure("chat", "runtime_init", format!("{error:#}"), 3);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let stdin = io::stdin();
    let stdout = io::stdout();
    let result =
        runtime.block_on(converse(&service, contact, stdin.lock(), &mut stdout.lock()));

    match result {
        Ok(turns) => CommandResult::success("chat", format!("conversation ended after {turns} messages")),
        Err(error) => CommandResult::failure("chat", "io", format!("{error:#}"), 4),
    }
}

/// Same lexicon and knowledge the server would load, with every collaborator offline.
pub fn local_service(config: &AppConfig) -> Result<ConversationService> {
    let services = Services::from_config(config, Collaborators::offline())?;
    Ok(ConversationService::new(
        Arc::new(InMemorySessionRepository::default()),
        Arc::new(AgentRuntime::new(services)),
    ))
}

/// Reads one message per line until EOF or `/quit`; returns the number of messages sent.
pub async fn converse<R: BufRead, W: Write>(
    service: &ConversationService,
    contact: &str,
    input: R,
    output: &mut W,
) -> Result<usize> {
    writeln!(output, "chatting as {contact} (type {QUIT} to leave)")?;
    let mut sent = 0;
    let mut paused = false;
    for line in input.lines() {
        let line = line?;
        if line.trim() == QUIT {
            break;
        }

        let outcome = service.handle_inbound(CHANNEL, contact, &line).await?;
        sent += 1;
        if let Some(reply) = outcome.reply {
            writeln!(output, "bot> {}", reply.render_plain())?;
        }
        if outcome.paused != paused {
            paused = outcome.paused;
            let notice = if paused { "(bot paused, a person will answer)" } else { "(bot resumed)" };
            writeln!(output, "{notice}")?;
        }
        output.flush()?;
    }
    Ok(sent)
}
