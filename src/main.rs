use anyhow::Context;
use booker::channels::{Channel, TelegramChannel};
use booker::config::{expand_path, Config};
use booker::gateway::{self, GatewayState};
use booker::observability::Metrics;
use booker::{flows, Bot, ConversationEngine, Crm};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Telegram intake bot for compensation and payment requests.
#[derive(Parser, Debug)]
#[command(name = "booker", version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bot (default).
    Run,
    /// Load and validate the configuration, then exit.
    CheckConfig,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let path: Option<PathBuf> = cli.config.as_deref().map(expand_path).transpose()?;
    let config = Config::load(path.as_deref())?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = tracing::Level::from_str(&cli.log_level)
        .with_context(|| format!("invalid log level '{}'", cli.log_level))?;
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::CheckConfig => {
            let flows = flows::builtin_flows()?;
            println!("config ok, {} flow(s) loaded", flows.len());
            Ok(())
        }
        Command::Run => run(config).await,
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("starting booker v{}", env!("CARGO_PKG_VERSION"));

    let metrics = Arc::new(Metrics::new()?);
    let channel: Arc<dyn Channel> = Arc::new(TelegramChannel::new(
        config.telegram.bot_token.clone(),
        config.telegram.allowed_users.clone(),
    )?);
    let engine = ConversationEngine::new(
        Arc::clone(&channel),
        Arc::new(Crm::new()),
        flows::builtin_flows()?,
        config.conversation.session_policy(),
    )
    .with_metrics(Arc::clone(&metrics));
    let bot = Arc::new(Bot::new(channel, Arc::new(engine)));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let gateway = if config.gateway.enabled {
        let addr = config.gateway.socket_addr()?;
        let state = GatewayState {
            metrics: Arc::clone(&metrics),
        };
        Some(tokio::spawn(gateway::serve(addr, state, shutdown_rx.clone())))
    } else {
        None
    };

    let interrupt_tx = Arc::clone(&shutdown_tx);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("interrupt received"),
            Err(e) => tracing::error!("failed to listen for ctrl-c: {e}"),
        }
        let _ = interrupt_tx.send(true);
    });

    let result = bot.run(config.conversation.sweep_interval(), shutdown_rx).await;
    let _ = shutdown_tx.send(true);
    result?;

    if let Some(handle) = gateway {
        handle.await.context("gateway task panicked")??;
    }
    Ok(())
}
