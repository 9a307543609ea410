use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tokengate::api::{self, AppState};
use tokengate::clock::{Clock, SystemClock};
use tokengate::config::{self, Config};
use tokengate::models::Identity;
use tokengate::resource::{ResourceRequest, Verb};
use tokengate::store::memory::MemoryStore;
use tokengate::store::postgres::PgStore;
use tokengate::store::EntityStore;
use tokengate::token::access_token_resource;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tokengate=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Token { command }) => handle_token_command(command, cfg).await,
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Postgres when `DATABASE_URL` is set, otherwise a process-local store.
async fn open_store(cfg: &Config, clock: Arc<dyn Clock>) -> anyhow::Result<Arc<dyn EntityStore>> {
    match cfg.database_url.as_deref() {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let db = PgStore::connect(url, clock, cfg.token_ttl()).await?;

            tracing::info!("Running migrations...");
            db.migrate().await?;
            Ok(Arc::new(db))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, tokens are kept in memory and lost on exit");
            Ok(Arc::new(MemoryStore::new(clock, cfg.token_ttl())))
        }
    }
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_store(&cfg, clock.clone()).await?;

    let login_path = format!("/{}", cfg.token_settings().base_path());
    let state = Arc::new(AppState::new(cfg, store, clock)?);
    let app = api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("tokengate listening on {} (login token at {})", addr, login_path);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_token_command(cmd: cli::TokenCommands, cfg: Config) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_store(&cfg, clock.clone()).await?;
    let tokens = access_token_resource(&cfg.token_settings(), store, clock)?;

    let projection = match cmd {
        cli::TokenCommands::Get { uid } => {
            tokens
                .process("", &ResourceRequest::new(), Verb::Get, &Identity::new(uid))
                .await?
        }
        cli::TokenCommands::Show { id, fields } => {
            let mut request = ResourceRequest::new();
            if let Some(fields) = fields {
                request = request.with_param("fields", &fields);
            }
            tokens.get_entity(&id.to_string(), &request, &Identity::new(0)).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&projection)?);
    Ok(())
}
