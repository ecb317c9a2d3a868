//! invited - invite code service
//!
//! - REST API for code summaries, droplets and signed claims
//! - Startup pool top-up and periodic droplet rounds
//! - Bulk binding of direct codes from a file

use anyhow::Context;
use clap::{Parser, Subcommand};
use invite_service::import::{confirm, parse_records, BulkBinder};
use invite_service::state::open_storage;
use invite_service::{AppState, Server, ServiceConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "invited")]
#[command(about = "Invite code issuance and binding service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "INVITE_CONFIG")]
    config: Option<String>,

    /// Log level, overrides `logging.level`
    #[arg(long, global = true, env = "INVITE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, global = true, env = "INVITE_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server (default)
    Serve {
        /// Listen address, overrides `server.listen_addr`
        #[arg(short, long, env = "INVITE_LISTEN_ADDR")]
        listen: Option<SocketAddr>,
    },
    /// Bind direct codes to addresses from an `address,code` file
    Bind {
        #[arg(short, long)]
        file: PathBuf,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        ServiceConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_tracing(&level, cli.json || config.logging.json);

    match cli.command.unwrap_or(Command::Serve { listen: None }) {
        Command::Serve { listen } => {
            if let Some(listen) = listen {
                config.server.listen_addr = listen;
            }
            let state = AppState::bootstrap(config).await?;
            state.prime().await?;
            Server::new(state).run().await?;
        }
        Command::Bind { file, yes } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let records = parse_records(&text)?;
            println!("{} records in {}", records.len(), file.display());
            for record in &records {
                println!("  {} -> {}", record.code, record.address);
            }

            if !yes {
                let stdin = std::io::stdin();
                if !confirm(stdin.lock(), std::io::stdout())? {
                    println!("aborted");
                    return Ok(());
                }
            }

            let store = open_storage(&config).await?;
            let report = BulkBinder::new(store).apply(&records).await?;
            println!("bound {}, skipped {}", report.bound, report.skipped.len());
            for (record, outcome) in &report.skipped {
                println!("  line {}: {} {:?}", record.line, record.code, outcome);
            }
        }
    }

    Ok(())
}
