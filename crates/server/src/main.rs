use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tower_http::timeout::TimeoutLayer;

use wrgld_server::{auth::AuthzOptions, build_router, config::CONFIG_FILE_NAME, AppState, Config};
use wrgld_store::{FsObjectStore, RefStore};

/// HTTP daemon serving the wrgl repository in DIR (default: `.wrgl` under
/// the working directory).
#[derive(Parser)]
#[command(name = "wrgld", version, about)]
struct Cli {
    /// Repository directory.
    dir: Option<PathBuf>,

    /// Port to listen on.
    #[arg(short, long, env = "WRGLD_PORT", default_value_t = 8080)]
    port: u16,

    /// Request read timeout in seconds.
    #[arg(long, env = "WRGLD_READ_TIMEOUT", default_value_t = 30)]
    read_timeout: u64,

    /// Response write timeout in seconds.
    #[arg(long, env = "WRGLD_WRITE_TIMEOUT", default_value_t = 30)]
    write_timeout: u64,

    /// Read configuration from this file instead of DIR/config.toml.
    #[arg(long, env = "WRGLD_CONFIG_FILE")]
    config_file: Option<PathBuf>,

    /// Initialize the repository directory if it does not exist yet.
    #[arg(long, env = "WRGLD_INIT")]
    init: bool,

    /// Verbosity: -v for debug, -vv for trace.
    #[arg(short = 'v', long = "log-verbosity", action = clap::ArgAction::Count)]
    verbosity: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.verbosity {
        0 => "wrgld_server=info,wrgld_store=info,tower_http=info",
        1 => "wrgld_server=debug,wrgld_store=debug,tower_http=debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let dir = cli.dir.unwrap_or_else(|| PathBuf::from(".wrgl"));
    if !dir.exists() {
        if !cli.init {
            anyhow::bail!(
                "repository not found at {}. Pass --init to create it",
                dir.display()
            );
        }
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating repository at {}", dir.display()))?;
        tracing::info!("initialized repository at {}", dir.display());
    }

    let config_path = cli
        .config_file
        .unwrap_or_else(|| dir.join(CONFIG_FILE_NAME));
    let config = if config_path.exists() {
        Config::load(&config_path)
            .with_context(|| format!("loading config from {}", config_path.display()))?
    } else {
        let config = Config::default();
        config.save(&config_path)?;
        config
    };

    let db = Arc::new(FsObjectStore::open(dir.join("objects"))?);
    let rs = RefStore::open(&dir.join("refs.db"))?;
    tracing::info!("repository opened at {}", dir.display());

    let auth = AuthzOptions::bearer_tokens(&config);
    let read_timeout = Duration::from_secs(cli.read_timeout);
    let write_timeout = Duration::from_secs(cli.write_timeout);
    let state = AppState::new(db, rs, config, auth);

    let app = build_router(state.clone())
        // One bound covering request read and response write.
        .layer(TimeoutLayer::new(read_timeout + write_timeout));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", cli.port)).await?;
    tracing::info!("listening on port {}", cli.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop sweepers after the listener closes; stores drop last.
    state.stop();
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("installing Ctrl-C handler");
    tracing::info!("shutdown signal received");
}
