use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use folio_chat::config::{load_or_init, AppConfig};
use folio_chat::pipeline::ChatHandler;
use folio_chat::router::{app, run_router, DIRECT_PATH, MANUAL_PATH, PROXIED_PATH};
use folio_chat::widget::{session_id, ChatWidget, HttpTransport, SubmitOutcome, WidgetOptions, THINKING_PLACEHOLDER};
use folio_chat::logger;

#[derive(Parser)]
#[command(name = "folio-chat", version, about = "Portfolio chat backend and terminal client")]
struct Cli {
  /// Server config file; a default one is written if missing.
  #[arg(long, default_value = "config.json")]
  config: PathBuf,
  /// Overrides the bind address from the config file.
  #[arg(long)]
  bind: Option<SocketAddr>,
  #[arg(long)]
  log_file: Option<PathBuf>,
  #[arg(long, env = "FOLIO_CHAT_LOG_LEVEL", default_value = "info")]
  log_level: String,
  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Talk to a running server from the terminal.
  Chat {
    #[arg(long, default_value = "http://127.0.0.1:8787/api/chat/router")]
    endpoint: String,
    #[arg(long, default_value = ".folio-chat-session")]
    session_file: PathBuf,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();
  match cli.command {
    Some(Command::Chat {
      ref endpoint,
      ref session_file,
    }) => {
      logger::init(&cli.log_level, cli.log_file.as_deref())?;
      chat(endpoint, session_file).await
    }
    None => serve(&cli).await,
  }
}

async fn serve(cli: &Cli) -> anyhow::Result<()> {
  let config = load_or_init(&cli.config)?;
  let log_file = cli.log_file.clone().or_else(|| config.log_file.clone());
  logger::init(&cli.log_level, log_file.as_deref())?;
  tracing::info!(config = %cli.config.display(), "folio-chat starting up");

  let handlers = build_handlers(&config)?;
  if handlers.is_empty() {
    anyhow::bail!("no handler configured; add a manual, proxied or direct section to {}", cli.config.display());
  }
  for (path, handler) in &handlers {
    let status = handler.status();
    tracing::info!(path, mode = %status.mode, provider = %status.provider, model = %status.model, "mounted chat handler");
  }

  run_router(cli.bind.unwrap_or(config.bind), app(handlers)).await
}

/// Every configured handler is validated before anything is served.
fn build_handlers(config: &AppConfig) -> anyhow::Result<Vec<(&'static str, Arc<ChatHandler>)>> {
  let mut handlers = Vec::new();
  if let Some(options) = &config.manual {
    let handler = ChatHandler::manual(options).context("invalid manual handler config")?;
    handlers.push((MANUAL_PATH, Arc::new(handler)));
  }
  if let Some(options) = &config.proxied {
    let handler = ChatHandler::proxied(options).context("invalid proxied handler config")?;
    handlers.push((PROXIED_PATH, Arc::new(handler)));
  }
  if let Some(options) = &config.direct {
    let handler = ChatHandler::direct(options).context("invalid direct handler config")?;
    handlers.push((DIRECT_PATH, Arc::new(handler)));
  }
  Ok(handlers)
}

async fn chat(endpoint: &str, session_file: &std::path::Path) -> anyhow::Result<()> {
  let session_id = session_id::load_or_create(session_file);
  let transport = HttpTransport::new(endpoint);
  let mut widget = ChatWidget::new(session_id, WidgetOptions::default());
  let mut lines = BufReader::new(tokio::io::stdin()).lines();

  prompt()?;
  while let Some(line) = lines.next_line().await? {
    widget.set_input(line);
    let mut shown = String::new();
    let outcome = widget
      .submit(&transport, |transcript| {
        let Some(last) = transcript.last() else { return };
        if last.content == THINKING_PLACEHOLDER {
          return;
        }
        match last.content.strip_prefix(shown.as_str()) {
          Some(delta) => print!("{delta}"),
          None => print!("\n{}", last.content),
        }
        let _ = std::io::stdout().flush();
        shown = last.content.clone();
      })
      .await;
    if outcome != SubmitOutcome::Ignored {
      println!();
    }
    if let Some(err) = widget.error() {
      eprintln!("error: {err}");
    }
    prompt()?;
  }
  Ok(())
}

fn prompt() -> std::io::Result<()> {
  print!("> ");
  std::io::stdout().flush()
}
