//! gatelink - gateway session runner
//!
//! Resolves the gateway endpoint, holds one session open until a signal
//! arrives or the server ends it, and exits with a status describing how the
//! session ended.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use gatelink::bootstrap::{fetch_endpoint, BootstrapConfig, DEFAULT_API_BASE};
use gatelink::config::load_token;
use gatelink::{ClientConfig, GatewayClient, GatewayEvent, ReconnectConfig};
use gatelink_proto::{GatewayEndpoint, Intents};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit status for failures before or outside a session.
const FATAL_EXIT: u8 = 50;

#[derive(Parser)]
#[command(name = "gatelink")]
#[command(about = "Persistent, resumable gateway client")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and hold the session open
    Run(RunArgs),

    /// Resolve the gateway endpoint and print it
    Endpoint(TokenArgs),
}

#[derive(Args)]
struct TokenArgs {
    /// File holding the authentication token
    #[arg(long, default_value = "./token")]
    token_file: PathBuf,

    /// Authentication token; takes precedence over the token file
    #[arg(long, env = "GATELINK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// REST API base used for the bootstrap call
    #[arg(long, default_value = DEFAULT_API_BASE)]
    api_base: String,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    auth: TokenArgs,

    /// Intent bitmask requested on IDENTIFY
    #[arg(long, default_value_t = (Intents::GUILDS | Intents::GUILD_MESSAGES).bits())]
    intents: u32,

    /// Connect to this gateway URL instead of calling the bootstrap endpoint
    #[arg(long)]
    gateway_url: Option<String>,

    /// Give up after this many consecutive failed reconnects
    #[arg(long)]
    max_reconnects: Option<u32>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.json_logs) {
        eprintln!("failed to initialise logging: {e:#}");
        return ExitCode::from(FATAL_EXIT);
    }

    let result = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Endpoint(args) => print_endpoint(args).await.map(|()| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "fatal error");
            ExitCode::from(FATAL_EXIT)
        }
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("gatelink=info".parse()?);
    let json_layer = json.then(|| fmt::layer().json());
    let text_layer = (!json).then(fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
    Ok(())
}

fn resolve_token(args: &TokenArgs) -> anyhow::Result<String> {
    if let Some(token) = args.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }
    load_token(&args.token_file)
        .with_context(|| format!("failed to read token from {}", args.token_file.display()))
}

async fn resolve_endpoint(args: &TokenArgs, token: &str) -> anyhow::Result<GatewayEndpoint> {
    let config = BootstrapConfig::default().with_api_base(args.api_base.clone());
    fetch_endpoint(&config, token)
        .await
        .context("failed to resolve gateway endpoint")
}

async fn print_endpoint(args: TokenArgs) -> anyhow::Result<()> {
    let token = resolve_token(&args)?;
    let endpoint = resolve_endpoint(&args, &token).await?;
    println!("{}", serde_json::to_string_pretty(&endpoint)?);
    Ok(())
}

async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let token = resolve_token(&args.auth)?;
    let endpoint = match args.gateway_url {
        Some(url) => GatewayEndpoint::direct(url),
        None => resolve_endpoint(&args.auth, &token).await?,
    };

    let reconnect = ReconnectConfig {
        max_attempts: args.max_reconnects,
        ..ReconnectConfig::default()
    };
    let config = ClientConfig::new(token, Intents(args.intents)).with_reconnect(reconnect);
    let client = Arc::new(GatewayClient::new(endpoint, config)?);

    let mut events = client.start().await?;
    let consumer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });
    let signals = tokio::spawn(handle_signals(Arc::clone(&client)));

    let termination = client.run().await;
    signals.abort();
    client.stop().await;
    if let Err(e) = consumer.await {
        warn!(error = %e, "event consumer ended abnormally");
    }

    info!(termination = %termination, "exiting");
    Ok(ExitCode::from(termination.exit_code()))
}

fn log_event(event: &GatewayEvent) {
    match event {
        GatewayEvent::Connected => debug!("transport connected"),
        GatewayEvent::Dispatch(dispatch) => {
            info!(event = %dispatch.name, seq = ?dispatch.sequence, "dispatch");
        }
        GatewayEvent::Disconnected { reason } => warn!(reason = %reason, "disconnected"),
        GatewayEvent::Reconnecting {
            attempt,
            delay,
            action,
        } => info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            action = %action,
            "reconnect scheduled"
        ),
        GatewayEvent::Stopped(termination) => debug!(termination = %termination, "stopped"),
    }
}

/// Stop the client on the first termination signal; exit at once on a second.
async fn handle_signals(client: Arc<GatewayClient>) {
    match wait_for_signal().await {
        Ok(name) => info!(signal = name, "stopping gateway client"),
        Err(e) => {
            error!(error = %e, "failed to install signal handlers");
            return;
        }
    }

    let stop = client.stop();
    tokio::pin!(stop);
    tokio::select! {
        () = &mut stop => {}
        second = wait_for_signal() => {
            if let Ok(name) = second {
                warn!(signal = name, "second signal, exiting immediately");
            }
            std::process::exit(130);
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut hangup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                return Ok("SIGINT");
            }
            _ = terminate.recv() => return Ok("SIGTERM"),
            _ = quit.recv() => return Ok("SIGQUIT"),
            // hangups keep the session running
            _ = hangup.recv() => debug!("ignoring SIGHUP"),
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
