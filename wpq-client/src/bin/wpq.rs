//! wpq - presenter command line for Workplace Preference Quiz sessions
//!
//! `wpq create <name>` opens a session, `wpq end <code>` closes one, and
//! `wpq watch <code>` follows a session live, logging the dashboard summary
//! each time it changes.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wpq_client::channel::RealtimeChannel;
use wpq_client::sync::SyncOptions;
use wpq_client::{ClientError, HttpSessionStore, SessionCache, SessionSync};
use wpq_common::config::{TomlConfig, TransportKind};

#[derive(Parser, Debug)]
#[command(name = "wpq")]
#[command(about = "Workplace Preference Quiz presenter CLI")]
#[command(version)]
struct Args {
    /// Config file (overrides WPQ_CONFIG and platform locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Server base URL
    #[arg(long, global = true, env = "WPQ_BASE_URL")]
    base_url: Option<String>,

    /// Realtime transport
    #[arg(long, global = true, value_parser = ["sse", "polling"])]
    transport: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a session and print its share code
    Create { name: String },
    /// End a session
    End { code: String },
    /// Follow a session live
    Watch { code: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TomlConfig::load(args.config.as_deref());
    if let Some(base_url) = args.base_url {
        config.client.base_url = base_url;
    }
    match args.transport.as_deref() {
        Some("polling") => config.client.transport = TransportKind::Polling,
        Some("sse") => config.client.transport = TransportKind::Sse,
        _ => {}
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("wpq={level},wpq_client={level}", level = config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Arc::new(
        HttpSessionStore::from_config(&config.client).context("Failed to build HTTP client")?,
    );
    let mut sync = SessionSync::new(store, SyncOptions::from_config(&config.client));

    match args.command {
        Command::Create { name } => {
            let session = sync
                .create_session(&name)
                .await
                .context("Failed to create session")?;
            println!("{}", session.code);
            info!(session_code = %session.code, name = %session.name, "Session created");
        }
        Command::End { code } => {
            let session_id = sync
                .hydrate(&code)
                .await
                .with_context(|| format!("Failed to load session {}", code))?;
            let session = sync
                .end_session(session_id)
                .await
                .context("Failed to end session")?;
            info!(session_code = %session.code, ended_at = ?session.ended_at, "Session ended");
        }
        Command::Watch { code } => watch(&mut sync, &config, &code).await?,
    }

    Ok(())
}

async fn watch(
    sync: &mut SessionSync<HttpSessionStore>,
    config: &TomlConfig,
    code: &str,
) -> Result<()> {
    sync.hydrate(code)
        .await
        .with_context(|| format!("Failed to load session {}", code))?;
    log_summary(sync.cache());

    let channel = RealtimeChannel::from_config(&config.client)
        .context("Failed to build realtime channel")?;
    let (rx, handle) = channel.spawn(code);

    let result = tokio::select! {
        result = sync.drive_with(rx, log_summary) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, closing session view");
            Ok(())
        }
    };

    sync.teardown();
    handle.abort();

    match result {
        Ok(()) => Ok(()),
        Err(ClientError::Fatal(message)) => {
            error!("{}", message);
            eprintln!("{}", message);
            std::process::exit(2);
        }
        Err(e) => Err(e).context("Session view failed"),
    }
}

fn log_summary(cache: &SessionCache) {
    let Some(session) = cache.current_session() else {
        info!("No session selected");
        return;
    };
    let analytics = cache.analytics();
    let means = analytics.mean_scores.rounded();

    info!(
        session_code = %session.code,
        active = session.active,
        total = analytics.total_count,
        completed = analytics.completed_count,
        response_rate = analytics.response_rate,
        "{} | collaboration {} formality {} technology {} wellness {} | {}",
        session.name,
        means.collaboration,
        means.formality,
        means.technology,
        means.wellness,
        analytics.workplace_dna
    );
}
