//! mcp-bridge: run OpenAI-style chat completions with tools served by MCP
//! servers.

mod render;
mod repl;

use anyhow::{Context, Result};
use bridge_api::InferenceProvider;
use bridge_config::{BridgeConfig, CliOverrides};
use bridge_core::{BridgeService, Orchestrator, OrchestratorConfig};
use bridge_log::{DEFAULT_RECENT_LIMIT, History};
use bridge_mcp::ClientRegistry;
use bridge_types::{ChatCompletionRequest, ChatMessage};
use clap::{Parser, Subcommand, ValueEnum};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "mcp-bridge",
    version,
    about = "Chat completions with tools served by MCP servers"
)]
struct Cli {
    /// Config file (default: ./mcp-bridge.toml or ~/.mcp-bridge/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Inference server base URL (overrides the config file)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Inference server API key
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Chat with the inference server (interactive unless --print or --request)
    Chat {
        /// Model to use
        #[arg(short, long)]
        model: Option<String>,

        /// System prompt for the conversation
        #[arg(long)]
        system: Option<String>,

        /// Send a single prompt and print the reply (non-interactive)
        #[arg(short, long, conflicts_with = "request")]
        print: Option<String>,

        /// Send a JSON chat completion request from a file ("-" for stdin)
        /// and print the final response as JSON
        #[arg(long)]
        request: Option<PathBuf>,
    },
    /// List the tools of every enabled MCP server
    Tools,
    /// List the resources of every enabled MCP server
    Resources,
    /// List MCP servers
    Servers {
        /// Include disabled servers
        #[arg(long)]
        all: bool,
    },
    /// Show logged completions, or one completion by ID prefix
    History {
        id: Option<String>,

        #[arg(long, default_value_t = DEFAULT_RECENT_LIMIT)]
        limit: usize,
    },
}

/// Everything a command needs, built once at startup.
pub struct App {
    pub service: BridgeService,
    pub history: Arc<History>,
    pub model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let model_override = match &cli.command {
        Some(Command::Chat { model, .. }) => model.clone(),
        _ => None,
    };
    let config = BridgeConfig::load(CliOverrides {
        config_file: cli.config,
        base_url: cli.base_url,
        api_key: cli.api_key,
        model: model_override,
        log_level: cli.verbose.then(|| "debug".to_string()),
    })
    .context("Failed to load configuration")?;

    init_logging(config.log_level.as_filter(), cli.log_format);

    let app = build_app(&config).await?;
    let result = run_command(&app, cli.command).await;
    app.service.shutdown().await;
    result
}

/// Install the tracing subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn build_app(config: &BridgeConfig) -> Result<App> {
    let provider = InferenceProvider::new(
        &config.inference_server.api_key,
        &config.inference_server.base_url,
        config.inference_server.timeout,
    )
    .context("Failed to create inference client")?;

    let history = Arc::new(
        History::open(&config.history, &config.default_history_dir())
            .await
            .context("Failed to open history")?,
    );

    let registry = Arc::new(ClientRegistry::start(&config.mcp).await);
    tracing::info!(
        "{} of {} MCP servers connected",
        registry.len(),
        config.mcp.servers.len()
    );

    let orchestrator = Orchestrator::new(
        Arc::new(provider),
        Arc::clone(&registry),
        Arc::clone(&history) as Arc<dyn bridge_types::InteractionLog>,
    )
    .with_config(OrchestratorConfig {
        max_turns: config.orchestrator.max_turns,
        tool_timeout: config.orchestrator.tool_timeout(),
        parallel_tool_calls: config.orchestrator.parallel_tool_calls,
    });

    Ok(App {
        service: BridgeService::new(orchestrator, registry),
        history,
        model: config.inference_server.model.clone(),
    })
}

async fn run_command(app: &App, command: Option<Command>) -> Result<()> {
    match command {
        None => repl::run(app, None).await,
        Some(Command::Chat {
            system,
            print,
            request,
            ..
        }) => match (print, request) {
            (Some(prompt), _) => {
                let mut messages = Vec::new();
                if let Some(system) = system {
                    messages.push(ChatMessage::system(system));
                }
                messages.push(ChatMessage::user(prompt));
                let request = ChatCompletionRequest::new(require_model(app)?, messages);
                let completion = run_conversation(app, request).await?;
                tracing::debug!("conversation finished after {} turns", completion.turns);
                render::print_usage(&completion.usage);
                Ok(())
            }
            (None, Some(path)) => {
                let request = read_request(&path)?;
                let completion = run_conversation(app, request).await?;
                println!("{}", serde_json::to_string_pretty(&completion.response)?);
                Ok(())
            }
            (None, None) => repl::run(app, system).await,
        },
        Some(Command::Tools) => {
            render::print_tools(&app.service.list_tools().await);
            Ok(())
        }
        Some(Command::Resources) => {
            render::print_resources(&app.service.list_resources().await);
            Ok(())
        }
        Some(Command::Servers { all }) => {
            if all {
                render::print_servers(&app.service.all_servers());
            } else {
                for name in app.service.enabled_servers() {
                    println!("{name}");
                }
            }
            Ok(())
        }
        Some(Command::History { id: Some(id), .. }) => {
            let entry = app.history.get(&id).await?;
            render::print_history_entry(&entry);
            Ok(())
        }
        Some(Command::History { id: None, limit }) => {
            render::print_history_list(&app.history.recent(limit).await?);
            Ok(())
        }
    }
}

/// Run one conversation, cancelling it on Ctrl+C.
pub async fn run_conversation(
    app: &App,
    request: ChatCompletionRequest,
) -> Result<bridge_core::Completion> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = app
        .service
        .chat_completion(request, cancel, render::event_printer())
        .await;
    watcher.abort();
    Ok(result?)
}

pub fn require_model(app: &App) -> Result<String> {
    app.model.clone().context(
        "No model configured (pass --model, set MCP_BRIDGE__INFERENCE_SERVER__MODEL, \
         or add inference_server.model to the config file)",
    )
}

fn read_request(path: &std::path::Path) -> Result<ChatCompletionRequest> {
    let data = if path.as_os_str() == "-" {
        io::read_to_string(io::stdin()).context("Failed to read request from stdin")?
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    };
    serde_json::from_str(&data).context("Request is not a valid chat completion request")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_chat_print() {
        let cli = Cli::parse_from(["mcp-bridge", "chat", "-m", "llama", "-p", "hello"]);
        match cli.command {
            Some(Command::Chat { model, print, .. }) => {
                assert_eq!(model.as_deref(), Some("llama"));
                assert_eq!(print.as_deref(), Some("hello"));
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn cli_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["mcp-bridge", "servers", "--all", "--verbose"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Some(Command::Servers { all: true })));
    }

    #[test]
    fn cli_print_conflicts_with_request() {
        let result = Cli::try_parse_from([
            "mcp-bridge",
            "chat",
            "--print",
            "hi",
            "--request",
            "req.json",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_history_default_limit() {
        let cli = Cli::parse_from(["mcp-bridge", "history"]);
        assert!(matches!(
            cli.command,
            Some(Command::History {
                id: None,
                limit: DEFAULT_RECENT_LIMIT
            })
        ));
    }

    #[test]
    fn cli_no_subcommand_is_repl() {
        let cli = Cli::parse_from(["mcp-bridge", "--log-format", "json"]);
        assert!(cli.command.is_none());
        assert!(matches!(cli.log_format, LogFormat::Json));
    }

    #[test]
    fn read_request_rejects_invalid_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("req.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(read_request(&path).is_err());
    }

    #[test]
    fn read_request_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("req.json");
        std::fs::write(
            &path,
            r#"{"model":"m","messages":[{"role":"user","content":"hi"}],"temperature":0.5}"#,
        )
        .unwrap();
        let request = read_request(&path).unwrap();
        assert_eq!(request.model, "m");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.extra["temperature"], 0.5);
    }
}
