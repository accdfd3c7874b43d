mod auth;
mod config;
mod documents;
mod error;
mod images;
mod routes;
mod session;
mod state;
mod store;
mod template;

use anyhow::Context;
use auth::credentials::CredentialStore;
use clap::Parser;
use config::{Args, Command};
use state::AppState;
use store::{Accept, FileStore};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (silently ignored if absent).
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "md_cms=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let paths = args.paths();
    let credentials = CredentialStore::new(&paths.users_file);

    match &args.command {
        Some(Command::AddUser { username, password }) => {
            credentials
                .add_user(username, password)
                .await
                .with_context(|| format!("Cannot add user {username}"))?;
            tracing::info!(
                "Added {} to {}",
                username.trim(),
                paths.users_file.display()
            );
            return Ok(());
        }
        Some(Command::Serve) | None => {}
    }

    tracing::info!("environment: {:?}", args.environment);
    tracing::info!("documents: {}", paths.data_dir.display());
    tracing::info!("images: {}", paths.image_dir.display());
    for dir in [&paths.data_dir, &paths.image_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Cannot create {}", dir.display()))?;
    }
    if !tokio::fs::try_exists(&paths.users_file).await.unwrap_or(false) {
        tracing::warn!(
            "credential file does not exist yet: {} (sign up or run `add-user`)",
            paths.users_file.display()
        );
    }

    let state = AppState {
        documents: FileStore::new(&paths.data_dir, Accept::Text),
        images: FileStore::new(&paths.image_dir, Accept::Images),
        credentials,
        cookie_key: args.cookie_key(),
    };

    let app = routes::app(state, args.max_upload_bytes);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Cannot bind to {addr}"))?;

    tracing::info!("Listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result { tracing::error!("ctrl-c error: {}", e); }
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
    tracing::info!("Shutting down gracefully");
}
