//! Interactive chat loop with admin slash commands.

use crate::{App, render, require_model, run_conversation};
use anyhow::Result;
use bridge_log::DEFAULT_RECENT_LIMIT;
use bridge_types::{ChatCompletionRequest, ChatMessage, Usage};
use std::io::{self, BufRead, Write};

#[derive(Debug, PartialEq, Eq)]
enum SlashCommand {
    Quit,
    Clear,
    Cost,
    Help,
    Model,
    Tools,
    Resources,
    Servers,
    SetTool { name: String, enabled: bool },
    ToolStatus(String),
    SetServer { name: String, enabled: bool },
    History(Option<String>),
    MissingArgument(&'static str),
    Unknown(String),
}

/// Parse a slash command. `None` if the input is a chat message.
fn parse_slash(input: &str) -> Option<SlashCommand> {
    if !input.starts_with('/') {
        return None;
    }

    let (cmd, arg) = match input.split_once(' ') {
        Some((c, a)) => (c, Some(a.trim()).filter(|a| !a.is_empty())),
        None => (input, None),
    };
    let named = |usage: &'static str, f: fn(String) -> SlashCommand| match arg {
        Some(name) => f(name.to_string()),
        None => SlashCommand::MissingArgument(usage),
    };

    Some(match cmd {
        "/quit" | "/exit" => SlashCommand::Quit,
        "/clear" => SlashCommand::Clear,
        "/cost" => SlashCommand::Cost,
        "/help" => SlashCommand::Help,
        "/model" => SlashCommand::Model,
        "/tools" => SlashCommand::Tools,
        "/resources" => SlashCommand::Resources,
        "/servers" => SlashCommand::Servers,
        "/enable-tool" => named("/enable-tool <name>", |name| SlashCommand::SetTool {
            name,
            enabled: true,
        }),
        "/disable-tool" => named("/disable-tool <name>", |name| SlashCommand::SetTool {
            name,
            enabled: false,
        }),
        "/tool-status" => named("/tool-status <name>", SlashCommand::ToolStatus),
        "/enable-server" => named("/enable-server <name>", |name| SlashCommand::SetServer {
            name,
            enabled: true,
        }),
        "/disable-server" => named("/disable-server <name>", |name| SlashCommand::SetServer {
            name,
            enabled: false,
        }),
        "/history" => SlashCommand::History(arg.map(str::to_string)),
        _ => SlashCommand::Unknown(cmd.to_string()),
    })
}

pub async fn run(app: &App, system: Option<String>) -> Result<()> {
    let model = require_model(app)?;
    let initial: Vec<ChatMessage> = system.into_iter().map(ChatMessage::system).collect();
    let mut messages = initial.clone();
    let mut total = Usage::default();
    let stdin = io::stdin();

    eprintln!(
        "mcp-bridge v{} (model: {model}, servers: {})",
        env!("CARGO_PKG_VERSION"),
        app.service.enabled_servers().join(", ")
    );
    eprintln!("Type your message. /help lists commands. Press Ctrl+D to exit.\n");

    loop {
        eprint!("> ");
        io::stderr().flush()?;

        let mut input = String::new();
        let bytes_read = stdin.lock().read_line(&mut input)?;
        if bytes_read == 0 {
            eprintln!();
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = parse_slash(input) {
            match command {
                SlashCommand::Quit => break,
                SlashCommand::Clear => {
                    messages = initial.clone();
                    eprintln!("Conversation cleared.");
                }
                SlashCommand::Cost => render::print_usage(&total),
                SlashCommand::Model => eprintln!("Current model: {model}"),
                other => handle_admin(app, other).await,
            }
            continue;
        }

        messages.push(ChatMessage::user(input));
        let request = ChatCompletionRequest::new(model.clone(), messages.clone());

        match run_conversation(app, request).await {
            Ok(completion) => {
                total.add(&completion.usage);
                // Keep tool traffic so follow-up questions have the context
                messages = completion.messages;
            }
            Err(e) => {
                eprintln!("\nError: {e:#}");
                // Remove the failed user message
                messages.pop();
            }
        }

        println!();
    }

    render::print_usage(&total);
    Ok(())
}

async fn handle_admin(app: &App, command: SlashCommand) {
    let service = &app.service;
    match command {
        SlashCommand::Help => print_help(),
        SlashCommand::Tools => render::print_tools(&service.list_tools().await),
        SlashCommand::Resources => render::print_resources(&service.list_resources().await),
        SlashCommand::Servers => render::print_servers(&service.all_servers()),
        SlashCommand::SetTool { name, enabled } => match service.set_tool_enabled(&name, enabled) {
            Ok(()) => eprintln!("Tool '{name}' {}.", on_off(enabled)),
            Err(e) => eprintln!("{e}"),
        },
        SlashCommand::ToolStatus(name) => match service.tool_status(&name) {
            Ok(enabled) => eprintln!("Tool '{name}' is {}.", on_off(enabled)),
            Err(e) => eprintln!("{e}"),
        },
        SlashCommand::SetServer { name, enabled } => {
            match service.set_server_enabled(&name, enabled) {
                Ok(()) => eprintln!("Server '{name}' {}.", on_off(enabled)),
                Err(e) => eprintln!("{e}"),
            }
        }
        SlashCommand::History(None) => match app.history.recent(DEFAULT_RECENT_LIMIT).await {
            Ok(summaries) => render::print_history_list(&summaries),
            Err(e) => eprintln!("Failed to list history: {e}"),
        },
        SlashCommand::History(Some(id)) => match app.history.get(&id).await {
            Ok(entry) => render::print_history_entry(&entry),
            Err(e) => eprintln!("{e}"),
        },
        SlashCommand::MissingArgument(usage) => eprintln!("Usage: {usage}"),
        SlashCommand::Unknown(cmd) => {
            eprintln!("Unknown command: {cmd}. Type /help for available commands.")
        }
        SlashCommand::Quit | SlashCommand::Clear | SlashCommand::Cost | SlashCommand::Model => {}
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "enabled" } else { "disabled" }
}

fn print_help() {
    eprintln!("Available commands:");
    eprintln!("  /help                  Show this help");
    eprintln!("  /model                 Show current model");
    eprintln!("  /cost                  Show token usage");
    eprintln!("  /tools                 List tools of enabled servers");
    eprintln!("  /resources             List resources of enabled servers");
    eprintln!("  /servers               List all servers and their flags");
    eprintln!("  /enable-tool <name>    Enable a tool");
    eprintln!("  /disable-tool <name>   Disable a tool");
    eprintln!("  /tool-status <name>    Show a tool's flag");
    eprintln!("  /enable-server <name>  Enable a server");
    eprintln!("  /disable-server <name> Disable a server");
    eprintln!("  /history [id]          List logged completions, or show one");
    eprintln!("  /clear                 Clear conversation");
    eprintln!("  /quit                  Exit");
}
