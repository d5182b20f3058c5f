// src/main.rs
// querydeck-backend server: HTTP façade plus in-process worker pool.

use anyhow::Result;
use clap::Parser;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use querydeck_backend::api;
use querydeck_backend::config::CONFIG;
use querydeck_backend::state::AppState;
use querydeck_backend::tasks::TaskManager;

#[derive(Parser, Debug)]
#[command(name = "querydeck-backend", about = "NL-to-SQL agent platform server")]
struct Args {
    /// Bind host (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Metadata database URL (overrides DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let mut config = CONFIG.clone();
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(database_url) = args.database_url {
        config.database.url = database_url;
    }

    info!("Starting querydeck-backend");
    info!("Connecting to database: {}", config.database.url);

    if let Some(path) = config.database.url.strip_prefix("sqlite://") {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::create_dir_all(&config.database.datasets_dir)?;

    let options = SqliteConnectOptions::from_str(&config.database.url)?
        .create_if_missing(true)
        .busy_timeout(std::time::Duration::from_secs(30));
    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready");

    let state = Arc::new(AppState::new(pool, config.clone()).await?);

    let mut tasks = TaskManager::new(state.clone());
    tasks.start();

    let app = api::router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    tasks.shutdown().await;
    Ok(())
}
