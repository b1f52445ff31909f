//! Terminal output for conversations, catalogs, and history.

use bridge_core::{ConversationEvent, ServerStatus};
use bridge_log::{HistoryEntry, HistorySummary};
use bridge_mcp::{McpResourceInfo, McpToolInfo};
use bridge_types::Usage;
use bridge_types::util::preview;
use std::collections::BTreeMap;
use std::io::{self, Write};

/// Conversation progress: replies to stdout, tool activity and errors to
/// stderr so stdout stays clean for piping.
pub fn event_printer() -> impl FnMut(ConversationEvent) {
    move |event| match event {
        ConversationEvent::AssistantMessage { text, .. } => {
            if !text.is_empty() {
                let mut out = io::stdout().lock();
                let _ = writeln!(out, "{text}");
                let _ = out.flush();
            }
        }
        ConversationEvent::ToolStart { name, arguments } => {
            eprintln!("  [tool: {name} {}]", preview(&arguments, 80));
        }
        ConversationEvent::ToolEnd {
            name,
            output,
            is_error,
        } => {
            if is_error {
                eprintln!("  [tool {name} error: {output}]");
            } else {
                eprintln!("  [tool {name} done: {}]", preview(&output, 120));
            }
        }
        ConversationEvent::ToolSkipped { name, reason } => {
            eprintln!("  [tool {name} skipped: {reason}]");
        }
        ConversationEvent::Cancelled => eprintln!("Cancelled."),
        ConversationEvent::Error(e) => eprintln!("Error: {e}"),
        ConversationEvent::Phase(_) | ConversationEvent::Usage(_) | ConversationEvent::Done => {}
    }
}

pub fn print_usage(usage: &Usage) {
    eprintln!(
        "Tokens: prompt {}, completion {}, total {}",
        usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
    );
}

pub fn print_tools(catalogs: &BTreeMap<String, Vec<McpToolInfo>>) {
    if catalogs.is_empty() {
        eprintln!("No enabled MCP servers.");
        return;
    }
    for (server, tools) in catalogs {
        println!("{server} ({} tools)", tools.len());
        for tool in tools {
            match &tool.description {
                Some(desc) => println!("  {:<24} {}", tool.name, first_line(desc)),
                None => println!("  {}", tool.name),
            }
        }
    }
}

pub fn print_resources(catalogs: &BTreeMap<String, Vec<McpResourceInfo>>) {
    if catalogs.is_empty() {
        eprintln!("No enabled MCP servers.");
        return;
    }
    for (server, resources) in catalogs {
        println!("{server} ({} resources)", resources.len());
        for resource in resources {
            let mime = resource.mime_type.as_deref().unwrap_or("-");
            println!("  {:<40} {:<20} {}", resource.uri, mime, resource.name);
        }
    }
}

pub fn print_servers(servers: &[ServerStatus]) {
    if servers.is_empty() {
        eprintln!("No MCP servers connected.");
        return;
    }
    for server in servers {
        let flag = if server.enabled { "enabled" } else { "disabled" };
        println!("  {:<24} {flag}", server.name);
    }
}

pub fn print_history_list(summaries: &[HistorySummary]) {
    if summaries.is_empty() {
        eprintln!("No logged completions.");
        return;
    }
    for s in summaries {
        println!(
            "  {} {:>8}  {:>2} tools  {:>6} tok  {}{}  {}",
            s.short_id(),
            s.age(),
            s.tool_call_count,
            s.total_tokens,
            s.model,
            if s.finished { "" } else { " (unfinished)" },
            if s.preview.is_empty() {
                "(empty)"
            } else {
                &s.preview
            }
        );
    }
}

pub fn print_history_entry(entry: &HistoryEntry) {
    println!("Completion {}", entry.completion_id);
    println!(
        "  model {}  created {}",
        entry.model,
        entry.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "  tokens: prompt {}, completion {}, total {}",
        entry.tokens.prompt_tokens, entry.tokens.completion_tokens, entry.tokens.total_tokens
    );
    let prompt = entry.preview();
    if !prompt.is_empty() {
        println!("  prompt: {prompt}");
    }
    for call in &entry.tool_calls {
        println!(
            "  [{}] {} {}",
            call.created_at.format("%H:%M:%S%.3f"),
            call.tool_name,
            preview(&call.arguments, 80)
        );
    }
    match entry
        .final_response
        .as_ref()
        .and_then(|r| r.get("content"))
        .and_then(|c| c.as_str())
    {
        Some(text) => println!("  reply: {}", preview(text, 200)),
        None => println!("  (no final reply)"),
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_line_of_multiline_description() {
        assert_eq!(first_line("Fetch a URL.\n\nLonger text"), "Fetch a URL.");
        assert_eq!(first_line(""), "");
    }

    #[test]
    fn event_printer_accepts_every_event() {
        let mut print = event_printer();
        print(ConversationEvent::ToolStart {
            name: "fetch".into(),
            arguments: "{}".into(),
        });
        print(ConversationEvent::ToolSkipped {
            name: "x".into(),
            reason: "Tool 'x' not found".into(),
        });
        print(ConversationEvent::Done);
    }
}
